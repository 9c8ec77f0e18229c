//! Per-intent worker
//!
//! At most one task runs per intent. A newer plan aborts the in-flight task
//! for the same intent (latest wins), which also drops any pending retry.
//! Retryable apply failures back off exponentially inside the task.

use super::{Plan, Reconciler};
use crate::apis::metrics::record_intent_retry;
use crate::config::RetryConfig;
use common::{IntentKey, RoutingIntent};
use rand::Rng;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tokio::task::AbortHandle;
use tracing::{debug, error, info, warn};

struct InFlight {
    generation: u64,
    handle: AbortHandle,
}

/// Safe RwLock read helper that recovers from poisoning
#[inline]
fn safe_read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| {
        warn!("RwLock poisoned during read, recovering (data is still valid)");
        poisoned.into_inner()
    })
}

/// Safe RwLock write helper that recovers from poisoning
#[inline]
fn safe_write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| {
        warn!("RwLock poisoned during write, recovering (data is still valid)");
        poisoned.into_inner()
    })
}

/// Latest-wins task runner keyed by intent
#[derive(Clone)]
pub struct IntentWorker {
    reconciler: Arc<Reconciler>,
    retry: RetryConfig,
    inflight: Arc<RwLock<HashMap<IntentKey, InFlight>>>,
    generation: Arc<AtomicU64>,
}

impl IntentWorker {
    pub fn new(reconciler: Arc<Reconciler>, retry: RetryConfig) -> Self {
        Self {
            reconciler,
            retry,
            inflight: Arc::new(RwLock::new(HashMap::new())),
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Start the work a plan requires, superseding older work for the same intent
    pub fn submit(&self, plan: Plan) {
        let key = match plan.key() {
            Some(key) => key,
            None => {
                debug!("Nothing to do for {:?}", plan);
                return;
            }
        };

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;

        // Hold the map while spawning so the task cannot deregister before it is registered
        let mut inflight = safe_write(&self.inflight);
        if let Some(previous) = inflight.remove(&key) {
            info!("Superseding in-flight work for {}", key);
            previous.handle.abort();
        }

        let worker = self.clone();
        let task_key = key.clone();
        let handle = tokio::spawn(async move {
            match plan {
                Plan::Apply(intent) => worker.apply_with_retry(intent).await,
                Plan::Teardown(intent) => {
                    // Best effort; failures were reported by the reconciler
                    let _ = worker.reconciler.teardown(&intent).await;
                }
                Plan::Refuse { intent, owner } => worker.reconciler.refuse(&intent, &owner).await,
                Plan::Ignore | Plan::NoOp => {}
            }
            worker.finish(&task_key, generation);
        });

        inflight.insert(
            key,
            InFlight {
                generation,
                handle: handle.abort_handle(),
            },
        );
    }

    /// Number of intents with work in flight
    pub fn in_flight(&self) -> usize {
        safe_read(&self.inflight).len()
    }

    /// Abort everything in flight
    pub fn shutdown(&self) {
        let mut inflight = safe_write(&self.inflight);
        for (key, task) in inflight.drain() {
            debug!("Aborting work for {}", key);
            task.handle.abort();
        }
    }

    fn finish(&self, key: &IntentKey, generation: u64) {
        let mut inflight = safe_write(&self.inflight);
        if inflight
            .get(key)
            .is_some_and(|task| task.generation == generation)
        {
            inflight.remove(key);
        }
    }

    async fn apply_with_retry(&self, intent: RoutingIntent) {
        let key = intent.key();
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            let err = match self.reconciler.apply(&intent).await {
                Ok(_) => return,
                Err(e) => e,
            };

            if !err.is_retryable() {
                debug!("{} failed terminally, waiting for the next change", key);
                return;
            }
            if attempt >= max_attempts {
                error!("Giving up on {} after {} attempts: {}", key, attempt, err);
                return;
            }

            let delay = self.delay(attempt - 1);
            warn!(
                "Retrying {} in {:?} (attempt {}/{}): {}",
                key, delay, attempt, max_attempts, err
            );
            record_intent_retry(&key.name, &key.namespace);
            tokio::time::sleep(delay).await;
        }
    }

    /// Backoff before retry number `retry`, with 0.5x to 1.5x jitter when enabled
    fn delay(&self, retry: u32) -> Duration {
        let base = self.retry.backoff(retry);
        if !self.retry.jitter {
            return base;
        }
        let jitter = rand::thread_rng().gen_range(0.5..1.5);
        Duration::from_secs_f64(base.as_secs_f64() * jitter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::memory::Operation;
    use crate::cloud::{primary_attachment_id, ApplyError, InMemoryControlPlane};
    use crate::compiler::resolver::testing::StaticRegistry;
    use crate::compiler::GraphCompiler;
    use crate::config::GatewayDefaults;
    use crate::reconciler::testing::{RecordingSink, StaticInventory};
    use common::{Backend, IntentMeta, IntentSpec, ServicePortRef, TenantContext};

    fn intent(name: &str, service: &str) -> RoutingIntent {
        RoutingIntent {
            meta: IntentMeta {
                namespace: "default".to_string(),
                name: name.to_string(),
                ..Default::default()
            },
            spec: IntentSpec {
                default_backend: Some(Backend::new(service, ServicePortRef::Number(80))),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn retry() -> RetryConfig {
        RetryConfig {
            initial_backoff_secs: 5,
            max_backoff_secs: 300,
            max_attempts: 4,
            jitter: false,
        }
    }

    async fn worker(
        retry: RetryConfig,
    ) -> (IntentWorker, Arc<InMemoryControlPlane>, Arc<RecordingSink>) {
        let tenant = TenantContext::new("sub", "rg", "vnet");
        let cloud = Arc::new(
            InMemoryControlPlane::new(tenant.clone(), "westus2").with_machine("agent-0"),
        );
        let attachment = primary_attachment_id(cloud.as_ref(), "agent-0").await.unwrap();
        let sink = Arc::new(RecordingSink::default());
        let resolver = StaticRegistry::default()
            .with_service("web", &[(Some("http"), 80, Some(31080))])
            .with_service("web-v2", &[(Some("http"), 80, Some(31081))])
            .resolver();

        let reconciler = Reconciler::new(
            GraphCompiler::new(tenant, GatewayDefaults::default()),
            Arc::new(resolver),
            cloud.clone(),
            Arc::new(StaticInventory(vec![attachment])),
            sink.clone(),
        );
        (IntentWorker::new(Arc::new(reconciler), retry), cloud, sink)
    }

    /// Let spawned tasks run until they block on time
    async fn settle() {
        for _ in 0..50 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failure_is_retried_with_backoff() {
        let (worker, cloud, sink) = worker(retry()).await;
        cloud.fail_times(
            Operation::PutGateway,
            None,
            ApplyError::Transport("throttled".to_string()),
            2,
        );

        worker.submit(Plan::Apply(intent("web", "web")));
        settle().await;
        assert_eq!(cloud.calls_of(Operation::PutGateway).len(), 1);

        // First retry after 5s
        tokio::time::advance(Duration::from_secs(6)).await;
        settle().await;
        assert_eq!(cloud.calls_of(Operation::PutGateway).len(), 2);

        // Second retry waits 10s
        tokio::time::advance(Duration::from_secs(6)).await;
        settle().await;
        assert_eq!(cloud.calls_of(Operation::PutGateway).len(), 2);

        tokio::time::advance(Duration::from_secs(6)).await;
        settle().await;
        assert_eq!(cloud.calls_of(Operation::PutGateway).len(), 3);
        assert_eq!(sink.addresses().len(), 1, "Third attempt succeeds");
        assert_eq!(worker.in_flight(), 0, "Finished work deregisters");
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_stop_at_max_attempts() {
        let (worker, cloud, _sink) = worker(retry()).await;
        cloud.fail(
            Operation::PutGateway,
            None,
            ApplyError::Transport("down".to_string()),
        );

        worker.submit(Plan::Apply(intent("web", "web")));
        for _ in 0..10 {
            settle().await;
            tokio::time::advance(Duration::from_secs(300)).await;
        }
        settle().await;

        assert_eq!(cloud.calls_of(Operation::PutGateway).len(), 4);
        assert_eq!(worker.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_terminal_failure_is_not_retried() {
        let (worker, cloud, sink) = worker(retry()).await;

        worker.submit(Plan::Apply(intent("web", "missing")));
        settle().await;
        tokio::time::advance(Duration::from_secs(600)).await;
        settle().await;

        assert!(cloud.calls_of(Operation::PutGateway).is_empty());
        assert_eq!(sink.reasons(), vec!["BackendResolutionFailed"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_newer_plan_supersedes_pending_retry() {
        let (worker, cloud, sink) = worker(retry()).await;
        cloud.fail_times(
            Operation::PutGateway,
            None,
            ApplyError::Transport("throttled".to_string()),
            1,
        );

        worker.submit(Plan::Apply(intent("web", "web")));
        settle().await;
        assert_eq!(cloud.calls_of(Operation::PutGateway).len(), 1);
        assert_eq!(worker.in_flight(), 1, "Retry is pending");

        worker.submit(Plan::Apply(intent("web", "web-v2")));
        settle().await;
        assert_eq!(cloud.calls_of(Operation::PutGateway).len(), 2);
        assert_eq!(worker.in_flight(), 0);

        tokio::time::advance(Duration::from_secs(600)).await;
        settle().await;
        assert_eq!(
            cloud.calls_of(Operation::PutGateway).len(),
            2,
            "The superseded retry never fires"
        );

        let gateway = cloud.gateway("k8s-aaging-web").unwrap();
        assert_eq!(gateway.backend_http_settings_collection[0].port, 31081);
        assert_eq!(sink.addresses().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_noop_plans_spawn_nothing() {
        let (worker, cloud, _sink) = worker(retry()).await;
        worker.submit(Plan::NoOp);
        worker.submit(Plan::Ignore);
        settle().await;

        assert_eq!(worker.in_flight(), 0);
        assert!(cloud.calls_of(Operation::ResourceGroupLocation).is_empty());
    }

    #[test]
    fn test_jitter_stays_in_bounds() {
        let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
        let (worker, _, _) = rt.block_on(worker(RetryConfig {
            jitter: true,
            ..retry()
        }));

        for retry in 0..6 {
            let base = worker.retry.backoff(retry).as_secs_f64();
            let delay = worker.delay(retry).as_secs_f64();
            assert!(delay >= base * 0.5 && delay <= base * 1.5);
        }
    }
}
