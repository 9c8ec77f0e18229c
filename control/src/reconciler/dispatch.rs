//! Watch event dispatch
//!
//! Watchers deliver raw apply/delete observations. The dispatcher keeps the
//! last seen version of every intent so it can turn them into
//! created/updated/deleted notifications, and re-applies claimed intents when
//! a new compute node joins after the initial sync.
//!
//! Gateway names depend only on the intent name. The first intent to apply a
//! name owns it until it is torn down; others with the same name are refused
//! and never tear it down.

use super::worker::IntentWorker;
use super::{gateway_name, plan, IntentEvent, Plan};
use common::{IntentKey, RoutingIntent};
use std::collections::{HashMap, HashSet};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// One observation of a watched object
#[derive(Debug, Clone, PartialEq)]
pub enum ObjectEvent<T> {
    Applied(T),
    /// Present, but could not be read; the last good version stands
    Skipped(T),
    Deleted(T),
    /// A full listing starts; objects it does not mention are gone
    Relisting,
    /// Listing finished
    Synced,
}

/// Observations from every watched kind
#[derive(Debug, Clone, PartialEq)]
pub enum WatchEvent {
    Intent(ObjectEvent<RoutingIntent>),
    /// Compute node, by name
    Node(ObjectEvent<String>),
}

/// Routes watch events to the per-intent worker
pub struct Dispatcher {
    worker: IntentWorker,
    ingress_class: String,
    intents: HashMap<IntentKey, RoutingIntent>,
    /// Gateway name to the intent serving it
    owners: HashMap<String, IntentKey>,
    /// Intents seen since the current listing started
    relisted: Option<HashSet<IntentKey>>,
    nodes: HashSet<String>,
    relisted_nodes: Option<HashSet<String>>,
    nodes_synced: bool,
}

impl Dispatcher {
    pub fn new(worker: IntentWorker, ingress_class: impl Into<String>) -> Self {
        Self {
            worker,
            ingress_class: ingress_class.into(),
            intents: HashMap::new(),
            owners: HashMap::new(),
            relisted: None,
            nodes: HashSet::new(),
            relisted_nodes: None,
            nodes_synced: false,
        }
    }

    /// Consume events until every sender is gone
    pub async fn run(mut self, mut events: mpsc::Receiver<WatchEvent>) {
        info!("Starting intent dispatcher");
        while let Some(event) = events.recv().await {
            for plan in self.handle(event) {
                self.worker.submit(plan);
            }
        }
        info!("Watch streams closed, stopping dispatcher");
        self.worker.shutdown();
    }

    /// Plans required by one event
    pub fn handle(&mut self, event: WatchEvent) -> Vec<Plan> {
        match event {
            WatchEvent::Intent(event) => self.handle_intent(event),
            WatchEvent::Node(event) => self.handle_node(event),
        }
    }

    fn handle_intent(&mut self, event: ObjectEvent<RoutingIntent>) -> Vec<Plan> {
        let notification = match event {
            ObjectEvent::Applied(intent) => {
                self.mark_relisted(intent.key());
                match self.intents.insert(intent.key(), intent.clone()) {
                    Some(old) => IntentEvent::Updated { old, new: intent },
                    None => IntentEvent::Created(intent),
                }
            }
            ObjectEvent::Skipped(intent) => {
                self.mark_relisted(intent.key());
                return Vec::new();
            }
            ObjectEvent::Deleted(intent) => {
                // Prefer the cached version; it is what was last applied
                let old = self.intents.remove(&intent.key()).unwrap_or(intent);
                IntentEvent::Deleted(old)
            }
            ObjectEvent::Relisting => {
                debug!("Intent listing started, {} intents cached", self.intents.len());
                self.relisted = Some(HashSet::new());
                return Vec::new();
            }
            ObjectEvent::Synced => return self.finish_relist(),
        };

        let planned = plan(notification, &self.ingress_class);
        self.admit(planned).into_iter().collect()
    }

    fn mark_relisted(&mut self, key: IntentKey) {
        if let Some(seen) = self.relisted.as_mut() {
            seen.insert(key);
        }
    }

    /// Delete every cached intent the finished listing did not mention
    fn finish_relist(&mut self) -> Vec<Plan> {
        let Some(seen) = self.relisted.take() else {
            info!("Intent watcher synced, {} intents cached", self.intents.len());
            return Vec::new();
        };

        let mut gone: Vec<IntentKey> = self
            .intents
            .keys()
            .filter(|key| !seen.contains(*key))
            .cloned()
            .collect();
        gone.sort();
        info!(
            "Intent watcher synced, {} intents cached, {} gone since the last listing",
            seen.len(),
            gone.len()
        );

        let mut plans = Vec::new();
        for key in gone {
            if let Some(old) = self.intents.remove(&key) {
                let teardown = plan(IntentEvent::Deleted(old), &self.ingress_class);
                plans.extend(self.admit(teardown));
            }
        }
        plans
    }

    /// Filter a plan through gateway ownership
    fn admit(&mut self, plan: Plan) -> Option<Plan> {
        match plan {
            Plan::Apply(intent) => {
                let gateway = gateway_name(&intent);
                let key = intent.key();
                match self.owners.get(&gateway).cloned() {
                    Some(owner) if owner != key => {
                        warn!("{} wants gateway {}, which serves {}", key, gateway, owner);
                        Some(Plan::Refuse { intent, owner })
                    }
                    _ => {
                        self.owners.insert(gateway, key);
                        Some(Plan::Apply(intent))
                    }
                }
            }
            Plan::Teardown(intent) => {
                let gateway = gateway_name(&intent);
                match self.owners.get(&gateway).cloned() {
                    Some(owner) if owner != intent.key() => {
                        debug!(
                            "Not tearing down {} for {}, it serves {}",
                            gateway,
                            intent.key(),
                            owner
                        );
                        None
                    }
                    _ => {
                        self.owners.remove(&gateway);
                        Some(Plan::Teardown(intent))
                    }
                }
            }
            Plan::Ignore => None,
            Plan::NoOp => {
                debug!("Salient details unchanged, taking no action");
                None
            }
            refused @ Plan::Refuse { .. } => Some(refused),
        }
    }

    fn owns_gateway(&self, intent: &RoutingIntent) -> bool {
        self.owners.get(&gateway_name(intent)) == Some(&intent.key())
    }

    fn handle_node(&mut self, event: ObjectEvent<String>) -> Vec<Plan> {
        match event {
            ObjectEvent::Applied(node) => {
                if let Some(seen) = self.relisted_nodes.as_mut() {
                    seen.insert(node.clone());
                }
                // Status heartbeats re-deliver known nodes
                if !self.nodes.insert(node.clone()) {
                    return Vec::new();
                }
                if !self.nodes_synced {
                    debug!("Node {} listed during initial sync", node);
                    return Vec::new();
                }

                info!("Node {} joined, re-applying claimed intents", node);
                let mut claimed: Vec<&RoutingIntent> = self
                    .intents
                    .values()
                    .filter(|intent| intent.is_claimed_by(&self.ingress_class))
                    .filter(|intent| self.owns_gateway(intent))
                    .collect();
                claimed.sort_by_key(|intent| intent.key());
                claimed
                    .into_iter()
                    .map(|intent| Plan::Apply(intent.clone()))
                    .collect()
            }
            ObjectEvent::Skipped(_) => Vec::new(),
            ObjectEvent::Deleted(node) => {
                // Pool membership lives on the node's interface and goes with it
                self.nodes.remove(&node);
                info!("Node {} deleted", node);
                Vec::new()
            }
            ObjectEvent::Relisting => {
                self.relisted_nodes = Some(HashSet::new());
                Vec::new()
            }
            ObjectEvent::Synced => {
                if let Some(seen) = self.relisted_nodes.take() {
                    self.nodes.retain(|node| seen.contains(node));
                }
                self.nodes_synced = true;
                info!("Node watcher synced, {} nodes known", self.nodes.len());
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::InMemoryControlPlane;
    use crate::compiler::resolver::testing::StaticRegistry;
    use crate::compiler::GraphCompiler;
    use crate::config::{GatewayDefaults, RetryConfig};
    use crate::reconciler::testing::{RecordingSink, StaticInventory};
    use crate::reconciler::Reconciler;
    use common::{IntentMeta, TenantContext, INGRESS_CLASS_ANNOTATION};
    use std::sync::Arc;

    const CLASS: &str = "azure-application-gateway";

    fn dispatcher() -> Dispatcher {
        let tenant = TenantContext::new("sub", "rg", "vnet");
        let reconciler = Reconciler::new(
            GraphCompiler::new(tenant.clone(), GatewayDefaults::default()),
            Arc::new(StaticRegistry::default().resolver()),
            Arc::new(InMemoryControlPlane::new(tenant, "westus2")),
            Arc::new(StaticInventory(vec![])),
            Arc::new(RecordingSink::default()),
        );
        Dispatcher::new(
            IntentWorker::new(Arc::new(reconciler), RetryConfig::default()),
            CLASS,
        )
    }

    fn intent(name: &str) -> RoutingIntent {
        RoutingIntent {
            meta: IntentMeta {
                namespace: "default".to_string(),
                name: name.to_string(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn applied(intent: RoutingIntent) -> WatchEvent {
        WatchEvent::Intent(ObjectEvent::Applied(intent))
    }

    #[test]
    fn test_first_sighting_is_created() {
        let mut d = dispatcher();
        assert_eq!(d.handle(applied(intent("web"))), vec![Plan::Apply(intent("web"))]);
    }

    #[test]
    fn test_status_only_resync_is_ignored() {
        let mut d = dispatcher();
        d.handle(applied(intent("web")));

        let mut resynced = intent("web");
        resynced.status.addresses = vec!["20.0.0.1".to_string()];
        assert!(
            d.handle(applied(resynced.clone())).is_empty(),
            "Status churn does not re-apply"
        );
        assert!(d.handle(applied(resynced)).is_empty());
    }

    #[test]
    fn test_spec_change_is_applied() {
        let mut d = dispatcher();
        d.handle(applied(intent("web")));

        let mut changed = intent("web");
        changed
            .meta
            .labels
            .insert("tier".to_string(), "frontend".to_string());
        assert_eq!(d.handle(applied(changed.clone())), vec![Plan::Apply(changed)]);
    }

    #[test]
    fn test_class_change_tears_down_old() {
        let mut d = dispatcher();
        d.handle(applied(intent("web")));

        let mut moved = intent("web");
        moved
            .meta
            .annotations
            .insert(INGRESS_CLASS_ANNOTATION.to_string(), "nginx".to_string());
        assert_eq!(d.handle(applied(moved)), vec![Plan::Teardown(intent("web"))]);
    }

    #[test]
    fn test_delete_uses_cached_version() {
        let mut d = dispatcher();
        let mut cached = intent("web");
        cached.meta.uid = Some("abc".to_string());
        d.handle(applied(cached.clone()));

        let plans = d.handle(WatchEvent::Intent(ObjectEvent::Deleted(intent("web"))));
        assert_eq!(plans, vec![Plan::Teardown(cached)]);
        assert!(d.intents.is_empty());
    }

    #[test]
    fn test_new_node_reapplies_claimed_intents() {
        let mut d = dispatcher();
        d.handle(applied(intent("b")));
        d.handle(applied(intent("a")));
        let mut foreign = intent("c");
        foreign
            .meta
            .annotations
            .insert(INGRESS_CLASS_ANNOTATION.to_string(), "nginx".to_string());
        d.handle(applied(foreign));

        assert!(
            d.handle(WatchEvent::Node(ObjectEvent::Applied("agent-0".to_string())))
                .is_empty(),
            "Nodes listed before sync are already covered by intent creation"
        );

        d.handle(WatchEvent::Node(ObjectEvent::Synced));
        let node = |name: &str| WatchEvent::Node(ObjectEvent::Applied(name.to_string()));
        assert!(
            d.handle(node("agent-0")).is_empty(),
            "Known nodes are heartbeats"
        );
        assert_eq!(
            d.handle(node("agent-9")),
            vec![Plan::Apply(intent("a")), Plan::Apply(intent("b"))]
        );
        assert!(d.handle(node("agent-9")).is_empty());

        assert!(d
            .handle(WatchEvent::Node(ObjectEvent::Deleted("agent-9".to_string())))
            .is_empty());
        assert_eq!(d.handle(node("agent-9")).len(), 2, "A re-added node joins again");
    }

    fn in_namespace(namespace: &str, name: &str) -> RoutingIntent {
        let mut intent = intent(name);
        intent.meta.namespace = namespace.to_string();
        intent
    }

    fn foreign(intent: RoutingIntent) -> RoutingIntent {
        let mut intent = intent;
        intent
            .meta
            .annotations
            .insert(INGRESS_CLASS_ANNOTATION.to_string(), "nginx".to_string());
        intent
    }

    fn deleted(intent: RoutingIntent) -> WatchEvent {
        WatchEvent::Intent(ObjectEvent::Deleted(intent))
    }

    #[test]
    fn test_same_name_in_another_namespace_is_refused() {
        let mut d = dispatcher();
        let a = in_namespace("team-a", "web");
        let b = in_namespace("team-b", "web");

        assert_eq!(d.handle(applied(a.clone())), vec![Plan::Apply(a.clone())]);
        assert_eq!(
            d.handle(applied(b.clone())),
            vec![Plan::Refuse {
                intent: b.clone(),
                owner: a.key()
            }]
        );

        let mut changed = b.clone();
        changed.meta.labels.insert("v".to_string(), "2".to_string());
        assert!(matches!(
            d.handle(applied(changed)).as_slice(),
            [Plan::Refuse { .. }]
        ));

        assert!(
            d.handle(deleted(b)).is_empty(),
            "Deleting the refused intent leaves the owner's gateway alone"
        );
        assert_eq!(d.owners.get("k8s-aaging-web"), Some(&a.key()));
    }

    #[test]
    fn test_unclaimed_delete_spares_owned_gateway() {
        let mut d = dispatcher();
        let owner = in_namespace("team-a", "web");
        let other = foreign(in_namespace("team-b", "web"));

        d.handle(applied(owner.clone()));
        assert!(d.handle(applied(other.clone())).is_empty());
        assert!(d.handle(deleted(other)).is_empty());

        assert_eq!(
            d.handle(deleted(owner.clone())),
            vec![Plan::Teardown(owner)],
            "The owner still tears down its own gateway"
        );
    }

    #[test]
    fn test_released_name_can_be_taken() {
        let mut d = dispatcher();
        let a = in_namespace("team-a", "web");
        let b = in_namespace("team-b", "web");

        d.handle(applied(a.clone()));
        d.handle(deleted(a));

        assert_eq!(d.handle(applied(b.clone())), vec![Plan::Apply(b)]);
    }

    #[test]
    fn test_unowned_delete_is_torn_down() {
        let mut d = dispatcher();
        let leftover = foreign(intent("web"));

        assert_eq!(
            d.handle(deleted(leftover.clone())),
            vec![Plan::Teardown(leftover)],
            "Names nobody serves are cleaned up"
        );
    }

    #[test]
    fn test_relist_tears_down_missed_deletions() {
        let mut d = dispatcher();
        d.handle(WatchEvent::Intent(ObjectEvent::Relisting));
        d.handle(applied(intent("a")));
        d.handle(applied(intent("b")));
        assert!(d.handle(WatchEvent::Intent(ObjectEvent::Synced)).is_empty());

        // Watch desync; "a" was deleted while nobody was watching
        d.handle(WatchEvent::Intent(ObjectEvent::Relisting));
        assert!(d.handle(applied(intent("b"))).is_empty(), "Unchanged on re-list");
        assert_eq!(
            d.handle(WatchEvent::Intent(ObjectEvent::Synced)),
            vec![Plan::Teardown(intent("a"))]
        );
        assert!(!d.intents.contains_key(&intent("a").key()));
        assert!(d.intents.contains_key(&intent("b").key()));

        assert!(
            d.handle(WatchEvent::Intent(ObjectEvent::Synced)).is_empty(),
            "A sync without a listing deletes nothing"
        );
    }

    #[test]
    fn test_skipped_intent_survives_relist() {
        let mut d = dispatcher();
        d.handle(applied(intent("web")));

        d.handle(WatchEvent::Intent(ObjectEvent::Relisting));
        assert!(d
            .handle(WatchEvent::Intent(ObjectEvent::Skipped(intent("web"))))
            .is_empty());
        assert!(d.handle(WatchEvent::Intent(ObjectEvent::Synced)).is_empty());
        assert!(d.intents.contains_key(&intent("web").key()));
    }

    #[test]
    fn test_node_relist_forgets_missing_nodes() {
        let mut d = dispatcher();
        d.handle(applied(intent("web")));
        let node = |name: &str| WatchEvent::Node(ObjectEvent::Applied(name.to_string()));

        d.handle(WatchEvent::Node(ObjectEvent::Relisting));
        d.handle(node("agent-0"));
        d.handle(node("agent-1"));
        d.handle(WatchEvent::Node(ObjectEvent::Synced));

        d.handle(WatchEvent::Node(ObjectEvent::Relisting));
        assert!(d.handle(node("agent-0")).is_empty());
        d.handle(WatchEvent::Node(ObjectEvent::Synced));
        assert!(!d.nodes.contains("agent-1"));

        assert_eq!(
            d.handle(node("agent-1")),
            vec![Plan::Apply(intent("web"))],
            "A node that came back joins again"
        );
    }

    #[test]
    fn test_refused_intent_is_not_reapplied_on_node_join() {
        let mut d = dispatcher();
        let a = in_namespace("team-a", "web");
        d.handle(applied(a.clone()));
        d.handle(applied(in_namespace("team-b", "web")));
        d.handle(WatchEvent::Node(ObjectEvent::Synced));

        assert_eq!(
            d.handle(WatchEvent::Node(ObjectEvent::Applied("agent-0".to_string()))),
            vec![Plan::Apply(a)]
        );
    }
}
