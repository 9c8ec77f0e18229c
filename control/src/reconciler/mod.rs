//! Intent reconciler
//!
//! Turns intent change notifications into apply or teardown cycles against the
//! external control plane. Planning is pure; cycles are sequential within one
//! intent and isolated between intents.

pub mod dispatch;
pub mod worker;

use crate::apis::metrics::record_intent_reconciliation;
use crate::cloud::{attach_to_pool, ApplyError, ControlPlane};
use crate::compiler::resolver::BackendResolver;
use crate::compiler::GraphCompiler;
use crate::error::{ApplyStep, ControllerError};
use async_trait::async_trait;
use common::{derive_name, Discriminator, IntentKey, ResourceKind, RoutingIntent};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Intent change notification
#[derive(Debug, Clone, PartialEq)]
pub enum IntentEvent {
    Created(RoutingIntent),
    Updated {
        old: RoutingIntent,
        new: RoutingIntent,
    },
    Deleted(RoutingIntent),
}

/// What to do about one notification
#[derive(Debug, Clone, PartialEq)]
pub enum Plan {
    /// Not ours
    Ignore,
    /// Ours, but nothing salient changed
    NoOp,
    Apply(RoutingIntent),
    Teardown(RoutingIntent),
    /// Ours, but another intent already serves the same gateway
    Refuse {
        intent: RoutingIntent,
        owner: IntentKey,
    },
}

impl Plan {
    pub fn key(&self) -> Option<IntentKey> {
        match self {
            Plan::Apply(intent) | Plan::Teardown(intent) | Plan::Refuse { intent, .. } => {
                Some(intent.key())
            }
            Plan::Ignore | Plan::NoOp => None,
        }
    }
}

/// Decide what a notification requires
pub fn plan(event: IntentEvent, ingress_class: &str) -> Plan {
    match event {
        IntentEvent::Created(intent) => {
            if intent.is_claimed_by(ingress_class) {
                Plan::Apply(intent)
            } else {
                Plan::Ignore
            }
        }
        IntentEvent::Updated { old, new } => {
            let was_claimed = old.is_claimed_by(ingress_class);
            let is_claimed = new.is_claimed_by(ingress_class);
            match (was_claimed, is_claimed) {
                (true, false) => Plan::Teardown(old),
                (false, false) => Plan::Ignore,
                _ if !old.salient_change(&new) => Plan::NoOp,
                _ => Plan::Apply(new),
            }
        }
        IntentEvent::Deleted(intent) => Plan::Teardown(intent),
    }
}

/// Name of the gateway an intent compiles to
///
/// Only the intent name takes part, so intents of the same name in different
/// namespaces compete for one gateway.
pub fn gateway_name(intent: &RoutingIntent) -> String {
    derive_name(intent.name(), ResourceKind::Gateway, Discriminator::None)
}

/// Compute nodes that join backend pools
#[async_trait]
pub trait ComputeInventory: Send + Sync {
    /// Network-attachment identifiers of every agent node
    async fn attachment_ids(&self) -> Result<Vec<String>, ControllerError>;
}

/// Where observed state and events about an intent are written
#[async_trait]
pub trait IntentSink: Send + Sync {
    /// Publish the allocated front-end address on the intent's status
    async fn set_address(&self, intent: &RoutingIntent, address: &str)
        -> Result<(), ControllerError>;

    /// Append a warning event attributed to the intent
    async fn warn(&self, intent: &RoutingIntent, reason: &str, message: &str)
        -> Result<(), ControllerError>;
}

/// Drives intents toward their compiled gateway graphs
pub struct Reconciler {
    compiler: GraphCompiler,
    resolver: Arc<dyn BackendResolver>,
    control_plane: Arc<dyn ControlPlane>,
    inventory: Arc<dyn ComputeInventory>,
    sink: Arc<dyn IntentSink>,
}

impl Reconciler {
    pub fn new(
        compiler: GraphCompiler,
        resolver: Arc<dyn BackendResolver>,
        control_plane: Arc<dyn ControlPlane>,
        inventory: Arc<dyn ComputeInventory>,
        sink: Arc<dyn IntentSink>,
    ) -> Self {
        Self {
            compiler,
            resolver,
            control_plane,
            inventory,
            sink,
        }
    }

    /// Run an apply cycle, recording metrics and reporting failure as an event
    pub async fn apply(&self, intent: &RoutingIntent) -> Result<String, ControllerError> {
        let start = Instant::now();
        let namespace = intent.meta.namespace.as_str();
        let name = intent.name();

        info!("Applying intent {}/{}", namespace, name);
        let result = self.apply_cycle(intent).await;

        match &result {
            Ok(address) => {
                info!("Intent {}/{} is served at {}", namespace, name, address);
                record_intent_reconciliation(
                    name,
                    namespace,
                    "apply",
                    start.elapsed().as_secs_f64(),
                    "success",
                );
            }
            Err(e) => {
                error!("Apply of intent {}/{} failed: {}", namespace, name, e);
                record_intent_reconciliation(
                    name,
                    namespace,
                    "apply",
                    start.elapsed().as_secs_f64(),
                    "error",
                );
                self.report(intent, e).await;
            }
        }

        result
    }

    /// Run a best-effort teardown cycle
    pub async fn teardown(&self, intent: &RoutingIntent) -> Result<(), ControllerError> {
        let start = Instant::now();
        let namespace = intent.meta.namespace.as_str();
        let name = intent.name();

        info!("Tearing down intent {}/{}", namespace, name);
        let result = self.teardown_cycle(intent).await;

        let outcome = if result.is_ok() { "success" } else { "error" };
        record_intent_reconciliation(
            name,
            namespace,
            "teardown",
            start.elapsed().as_secs_f64(),
            outcome,
        );
        result
    }

    /// Report that another intent owns the gateway; nothing is applied
    pub async fn refuse(&self, intent: &RoutingIntent, owner: &IntentKey) {
        let err = ControllerError::NameConflict {
            gateway: gateway_name(intent),
            owner: owner.to_string(),
        };
        warn!("Not applying {}: {}", intent.key(), err);
        self.report(intent, &err).await;
    }

    async fn apply_cycle(&self, intent: &RoutingIntent) -> Result<String, ControllerError> {
        let key = intent.key();

        let attachments = self.inventory.attachment_ids().await?;
        let location = self
            .control_plane
            .resource_group_location()
            .await
            .map_err(|e| ControllerError::apply(ApplyStep::Location, e))?;

        let graph = self
            .compiler
            .compile(intent, &location, self.resolver.as_ref(), attachments)
            .await?;

        debug!(
            "Desired gateway for {}: {}",
            key,
            serde_json::to_string(&graph.gateway).unwrap_or_default()
        );

        self.control_plane
            .put_subnet(&graph.subnet)
            .await
            .map_err(|e| ControllerError::apply(ApplyStep::Subnet, e))?;
        debug!("{}: subnet {} committed", key, graph.subnet.name);

        let address = self
            .control_plane
            .put_public_address(&graph.public_address)
            .await
            .map_err(|e| ControllerError::apply(ApplyStep::PublicAddress, e))?;
        debug!("{}: public address {} committed", key, address.name);

        let gateway = self
            .control_plane
            .put_gateway(&graph.gateway)
            .await
            .map_err(|e| ControllerError::apply(ApplyStep::Gateway, e))?;
        debug!("{}: gateway {} committed", key, gateway.name);

        let pool = gateway
            .backend_pool()
            .or_else(|| graph.gateway.backend_pool())
            .map(|pool| pool.id.clone())
            .ok_or_else(|| {
                ControllerError::apply(
                    ApplyStep::Gateway,
                    ApplyError::rejected("applicationGateway", &gateway.name, "no backend pool"),
                )
            })?;
        attach_to_pool(self.control_plane.clone(), &pool, &graph.attachments).await?;

        let address = self
            .control_plane
            .get_public_address(&address.name)
            .await
            .map_err(|e| ControllerError::apply(ApplyStep::ReadAddress, e))?;
        let ip = address.ip_address.ok_or_else(|| {
            ControllerError::apply(
                ApplyStep::ReadAddress,
                ApplyError::AddressNotAllocated(address.name.clone()),
            )
        })?;

        self.sink.set_address(intent, &ip).await?;
        Ok(ip)
    }

    async fn teardown_cycle(&self, intent: &RoutingIntent) -> Result<(), ControllerError> {
        let gateway = gateway_name(intent);
        let address = derive_name(intent.name(), ResourceKind::PublicAddress, Discriminator::None);

        let gateway_result = self
            .control_plane
            .delete_gateway(&gateway)
            .await
            .map_err(|e| ControllerError::apply(ApplyStep::DeleteGateway, e));
        if let Err(e) = &gateway_result {
            warn!("Failed to delete gateway {} for {}: {}", gateway, intent.key(), e);
            self.report(intent, e).await;
        }

        let address_result = self
            .control_plane
            .delete_public_address(&address)
            .await
            .map_err(|e| ControllerError::apply(ApplyStep::DeletePublicAddress, e));
        if let Err(e) = &address_result {
            warn!("Failed to delete public address {} for {}: {}", address, intent.key(), e);
            self.report(intent, e).await;
        }

        gateway_result.and(address_result)
    }

    async fn report(&self, intent: &RoutingIntent, err: &ControllerError) {
        if let Err(e) = self.sink.warn(intent, err.reason(), &err.to_string()).await {
            warn!(
                "Failed to record {} event for {}: {}",
                err.reason(),
                intent.key(),
                e
            );
        }
    }
}
