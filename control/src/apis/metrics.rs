//! Controller metrics
//!
//! Reconciliation outcomes per intent and cycle, plus retries. Served in the
//! Prometheus text format on `GET /metrics`.

use http_body_util::Full;
use hyper::body::{Bytes, Incoming};
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use lazy_static::lazy_static;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder,
};
use std::convert::Infallible;
use tokio::net::TcpListener;
use tracing::{debug, error, info};

lazy_static! {
    /// Controller metrics registry
    pub static ref CONTROLLER_METRICS_REGISTRY: Registry = Registry::new();

    /// Intent reconciliation duration
    static ref INTENT_RECONCILIATION_DURATION: HistogramVec = {
        let opts = HistogramOpts::new(
            "intent_reconciliation_duration_seconds",
            "Intent reconciliation duration in seconds",
        );
        let histogram = HistogramVec::new(opts, &["intent", "namespace", "cycle"])
            .expect("Failed to create histogram");
        CONTROLLER_METRICS_REGISTRY
            .register(Box::new(histogram.clone()))
            .expect("Failed to register histogram");
        histogram
    };

    /// Intent reconciliations total
    static ref INTENT_RECONCILIATIONS_TOTAL: IntCounterVec = {
        let opts = Opts::new(
            "intent_reconciliations_total",
            "Total number of intent reconciliations",
        );
        let counter = IntCounterVec::new(opts, &["intent", "namespace", "cycle", "result"])
            .expect("Failed to create counter");
        CONTROLLER_METRICS_REGISTRY
            .register(Box::new(counter.clone()))
            .expect("Failed to register counter");
        counter
    };

    /// Scheduled apply retries
    static ref INTENT_RETRIES_TOTAL: IntCounterVec = {
        let opts = Opts::new(
            "intent_retries_total",
            "Total number of scheduled apply retries",
        );
        let counter = IntCounterVec::new(opts, &["intent", "namespace"])
            .expect("Failed to create counter");
        CONTROLLER_METRICS_REGISTRY
            .register(Box::new(counter.clone()))
            .expect("Failed to register counter");
        counter
    };
}

/// Record one apply or teardown cycle
pub fn record_intent_reconciliation(
    intent: &str,
    namespace: &str,
    cycle: &str,
    duration_secs: f64,
    result: &str,
) {
    INTENT_RECONCILIATION_DURATION
        .with_label_values(&[intent, namespace, cycle])
        .observe(duration_secs);

    INTENT_RECONCILIATIONS_TOTAL
        .with_label_values(&[intent, namespace, cycle, result])
        .inc();
}

/// Record a scheduled retry
pub fn record_intent_retry(intent: &str, namespace: &str) {
    INTENT_RETRIES_TOTAL
        .with_label_values(&[intent, namespace])
        .inc();
}

/// Gather controller metrics
pub fn gather_controller_metrics() -> Result<String, String> {
    let mut buffer = vec![];
    let encoder = TextEncoder::new();
    let metric_families = CONTROLLER_METRICS_REGISTRY.gather();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| format!("Failed to encode metrics: {}", e))?;

    String::from_utf8(buffer).map_err(|e| format!("Failed to convert to UTF-8: {}", e))
}

/// Serve the metrics endpoint until the task is aborted
pub async fn serve_metrics(bind_addr: String) -> Result<(), String> {
    let listener = TcpListener::bind(&bind_addr)
        .await
        .map_err(|e| format!("Failed to bind to {}: {}", bind_addr, e))?;

    info!("Metrics endpoint listening on {}", bind_addr);

    loop {
        match listener.accept().await {
            Ok((stream, peer_addr)) => {
                debug!("Accepted metrics connection from {}", peer_addr);
                tokio::spawn(async move {
                    let io = TokioIo::new(stream);
                    let service = service_fn(|req: Request<Incoming>| async move {
                        Ok::<_, Infallible>(metrics_response(req.method(), req.uri().path()))
                    });
                    if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                        debug!("Metrics connection error: {}", e);
                    }
                });
            }
            Err(e) => {
                error!("Accept error on {}: {}", bind_addr, e);
            }
        }
    }
}

fn metrics_response(method: &Method, path: &str) -> Response<Full<Bytes>> {
    if method != Method::GET || path != "/metrics" {
        let mut response = Response::new(Full::new(Bytes::from_static(b"Not Found")));
        *response.status_mut() = StatusCode::NOT_FOUND;
        return response;
    }

    match gather_controller_metrics() {
        Ok(text) => {
            let mut response = Response::new(Full::new(Bytes::from(text)));
            response.headers_mut().insert(
                CONTENT_TYPE,
                HeaderValue::from_static("text/plain; version=0.0.4"),
            );
            response
        }
        Err(e) => {
            error!("{}", e);
            let mut response = Response::new(Full::new(Bytes::from(e)));
            *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
            response
        }
    }
}
