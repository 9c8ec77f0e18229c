//! Ingress and node watchers
//!
//! Feed the dispatcher with typed watch events. Ingresses that cannot be
//! represented as intents are reported on the Ingress and skipped. Every
//! (re)list is bracketed by `Relisting` and `Synced` so the dispatcher can
//! drop objects deleted while the watch was down.

use super::intent::{intent_from_ingress, intent_meta};
use crate::reconciler::dispatch::{ObjectEvent, WatchEvent};
use crate::reconciler::IntentSink;
use common::RoutingIntent;
use futures::StreamExt;
use k8s_openapi::api::core::v1::Node;
use k8s_openapi::api::networking::v1::Ingress;
use kube::runtime::watcher;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::WatchStreamExt;
use kube::{api::Api, Client, ResourceExt};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Watches Ingress objects and forwards them as intents
pub struct IngressWatcher {
    client: Client,
    namespace: Option<String>,
    ingress_class: String,
    sink: Arc<dyn IntentSink>,
}

impl IngressWatcher {
    pub fn new(
        client: Client,
        namespace: Option<String>,
        ingress_class: String,
        sink: Arc<dyn IntentSink>,
    ) -> Self {
        Self {
            client,
            namespace,
            ingress_class,
            sink,
        }
    }

    /// Watch until the dispatcher goes away
    pub async fn run(self, events: mpsc::Sender<WatchEvent>) {
        let api: Api<Ingress> = match &self.namespace {
            Some(namespace) => Api::namespaced(self.client.clone(), namespace),
            None => Api::all(self.client.clone()),
        };
        let watcher = watcher(api, WatcherConfig::default()).default_backoff();

        futures::pin_mut!(watcher);

        info!(
            "Starting Ingress watcher (namespace: {})",
            self.namespace.as_deref().unwrap_or("all")
        );

        while let Some(event) = watcher.next().await {
            let forwarded = match event {
                Ok(watcher::Event::Apply(ingress)) | Ok(watcher::Event::InitApply(ingress)) => {
                    Some(self.convert(&ingress).await)
                }
                Ok(watcher::Event::Delete(ingress)) => {
                    debug!(
                        "Ingress deleted: {}/{}",
                        ingress.namespace().unwrap_or_else(|| "default".to_string()),
                        ingress.name_any()
                    );
                    // A deleted Ingress is torn down even if it no longer converts
                    let intent = intent_from_ingress(&ingress).unwrap_or_else(|_| RoutingIntent {
                        meta: intent_meta(&ingress),
                        ..Default::default()
                    });
                    Some(ObjectEvent::Deleted(intent))
                }
                Ok(watcher::Event::Init) => {
                    debug!("Ingress watcher (re)listing");
                    Some(ObjectEvent::Relisting)
                }
                Ok(watcher::Event::InitDone) => {
                    info!("Ingress watcher sync complete");
                    Some(ObjectEvent::Synced)
                }
                Err(e) => {
                    warn!("Ingress watcher error: {}", e);
                    None
                }
            };

            if let Some(event) = forwarded {
                if events.send(WatchEvent::Intent(event)).await.is_err() {
                    info!("Dispatcher stopped, closing Ingress watcher");
                    return;
                }
            }
        }
    }

    /// Convert an Ingress, reporting unrepresentable ones that we claim
    ///
    /// Unrepresentable Ingresses are forwarded as skipped so a re-list still
    /// counts them as present.
    async fn convert(&self, ingress: &Ingress) -> ObjectEvent<RoutingIntent> {
        let err = match intent_from_ingress(ingress) {
            Ok(intent) => return ObjectEvent::Applied(intent),
            Err(e) => e,
        };

        let rejected = RoutingIntent {
            meta: intent_meta(ingress),
            ..Default::default()
        };
        if !rejected.is_claimed_by(&self.ingress_class) {
            return ObjectEvent::Skipped(rejected);
        }

        warn!("Skipping Ingress {}: {}", rejected.key(), err);
        if let Err(e) = self
            .sink
            .warn(&rejected, err.reason(), &err.to_string())
            .await
        {
            warn!("Failed to record event for {}: {}", rejected.key(), e);
        }
        ObjectEvent::Skipped(rejected)
    }
}

/// Watch agent nodes and forward their names
pub async fn watch_nodes(client: Client, selector: String, events: mpsc::Sender<WatchEvent>) {
    let api: Api<Node> = Api::all(client);
    let watcher = watcher(api, WatcherConfig::default().labels(&selector)).default_backoff();

    futures::pin_mut!(watcher);

    info!("Starting node watcher (selector: {})", selector);

    while let Some(event) = watcher.next().await {
        let forwarded = match event {
            Ok(watcher::Event::Apply(node)) | Ok(watcher::Event::InitApply(node)) => {
                Some(ObjectEvent::Applied(node.name_any()))
            }
            Ok(watcher::Event::Delete(node)) => Some(ObjectEvent::Deleted(node.name_any())),
            Ok(watcher::Event::Init) => {
                debug!("Node watcher (re)listing");
                Some(ObjectEvent::Relisting)
            }
            Ok(watcher::Event::InitDone) => {
                info!("Node watcher sync complete");
                Some(ObjectEvent::Synced)
            }
            Err(e) => {
                warn!("Node watcher error: {}", e);
                None
            }
        };

        if let Some(event) = forwarded {
            if events.send(WatchEvent::Node(event)).await.is_err() {
                info!("Dispatcher stopped, closing node watcher");
                return;
            }
        }
    }
}
