use anyhow::{Context, Result};
use control::apis::ingress::{watch_nodes, IngressWatcher, KubeIntentSink};
use control::apis::metrics::serve_metrics;
use control::apis::nodes::KubeComputeInventory;
use control::apis::services::KubeServiceRegistry;
use control::cloud::{ControlPlane, InMemoryControlPlane};
use control::compiler::resolver::RegistryResolver;
use control::compiler::GraphCompiler;
use control::config::ControllerConfig;
use control::reconciler::dispatch::Dispatcher;
use control::reconciler::worker::IntentWorker;
use control::reconciler::Reconciler;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::mpsc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Watch events buffered between the watchers and the dispatcher
const EVENT_BUFFER: usize = 256;

/// Application Gateway Ingress Controller
///
/// Runs against the in-memory control plane; gateways, addresses and pool
/// memberships live for the lifetime of the process.
#[tokio::main]
async fn main() -> Result<()> {
    // Initialize rustls crypto provider (needed for Kubernetes TLS client)
    rustls::crypto::ring::default_provider()
        .install_default()
        .ok(); // Ignore error if already installed

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = ControllerConfig::from_env().context("Invalid controller configuration")?;

    info!("Starting {}", config.controller_name);
    info!("   IngressClass: {}", config.ingress_class);
    info!(
        "   Namespace: {}",
        config.watch_namespace.as_deref().unwrap_or("all")
    );
    info!(
        "   Tenant: {}/{} (vnet {})",
        config.tenant.subscription_id, config.tenant.resource_group, config.tenant.vnet_name
    );

    let client = kube::Client::try_default()
        .await
        .context("Failed to create Kubernetes client")?;

    let control_plane: Arc<dyn ControlPlane> = Arc::new(
        InMemoryControlPlane::new(config.tenant.clone(), config.location.clone())
            .with_implicit_machines(),
    );
    let sink = Arc::new(KubeIntentSink::new(
        client.clone(),
        config.controller_name.clone(),
    ));

    let reconciler = Reconciler::new(
        GraphCompiler::new(config.tenant.clone(), config.gateway.clone()),
        Arc::new(RegistryResolver::new(
            KubeServiceRegistry::new(client.clone()),
            config.gateway.secure_port,
        )),
        control_plane.clone(),
        Arc::new(KubeComputeInventory::new(
            client.clone(),
            config.agent_node_selector.clone(),
            control_plane,
        )),
        sink.clone(),
    );
    let worker = IntentWorker::new(Arc::new(reconciler), config.retry.clone());

    let (tx, rx) = mpsc::channel(EVENT_BUFFER);
    let mut handles = vec![];

    let ingress_watcher = IngressWatcher::new(
        client.clone(),
        config.watch_namespace.clone(),
        config.ingress_class.clone(),
        sink,
    );
    let ingress_tx = tx.clone();
    handles.push(tokio::spawn(async move {
        ingress_watcher.run(ingress_tx).await;
    }));

    let node_selector = config.agent_node_selector.clone();
    handles.push(tokio::spawn(async move {
        watch_nodes(client, node_selector, tx).await;
    }));

    let metrics_addr = config.metrics_addr.clone();
    handles.push(tokio::spawn(async move {
        if let Err(e) = serve_metrics(metrics_addr).await {
            error!("Metrics endpoint error: {}", e);
        }
    }));

    let dispatcher = Dispatcher::new(worker.clone(), config.ingress_class.clone());

    info!("Controller started. Press Ctrl-C to exit.");

    tokio::select! {
        _ = dispatcher.run(rx) => {
            error!("Dispatcher stopped unexpectedly");
        }
        _ = signal::ctrl_c() => {
            info!("Shutdown signal received");
        }
    }

    // Cleanup: abort watchers and in-flight work
    for handle in handles {
        handle.abort();
    }
    worker.shutdown();

    Ok(())
}
