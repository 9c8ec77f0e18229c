//! Ingress status and event write-back

use crate::error::ControllerError;
use crate::reconciler::IntentSink;
use async_trait::async_trait;
use chrono::Utc;
use common::RoutingIntent;
use k8s_openapi::api::core::v1::{Event, EventSource, ObjectReference};
use k8s_openapi::api::networking::v1::Ingress;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::api::{Api, ObjectMeta, Patch, PatchParams, PostParams};
use kube::Client;
use serde_json::{json, Value};
use tracing::{debug, info};

/// Writes allocated addresses and warning events back to Ingress objects
pub struct KubeIntentSink {
    client: Client,
    controller_name: String,
}

impl KubeIntentSink {
    pub fn new(client: Client, controller_name: impl Into<String>) -> Self {
        Self {
            client,
            controller_name: controller_name.into(),
        }
    }
}

/// Merge patch publishing `address` as the Ingress's load balancer IP
pub fn address_status_patch(address: &str) -> Value {
    json!({
        "status": {
            "loadBalancer": {
                "ingress": [{ "ip": address }]
            }
        }
    })
}

/// Warning event attributed to an intent's Ingress
pub fn warning_event(
    intent: &RoutingIntent,
    reason: &str,
    message: &str,
    controller_name: &str,
) -> Event {
    let now = Time(Utc::now());
    Event {
        metadata: ObjectMeta {
            generate_name: Some(format!("{}.", intent.name())),
            namespace: Some(intent.meta.namespace.clone()),
            ..Default::default()
        },
        involved_object: ObjectReference {
            api_version: Some("networking.k8s.io/v1".to_string()),
            kind: Some("Ingress".to_string()),
            name: Some(intent.meta.name.clone()),
            namespace: Some(intent.meta.namespace.clone()),
            uid: intent.meta.uid.clone(),
            ..Default::default()
        },
        type_: Some("Warning".to_string()),
        reason: Some(reason.to_string()),
        message: Some(message.to_string()),
        source: Some(EventSource {
            component: Some(controller_name.to_string()),
            host: None,
        }),
        reporting_component: Some(controller_name.to_string()),
        count: Some(1),
        first_timestamp: Some(now.clone()),
        last_timestamp: Some(now),
        ..Default::default()
    }
}

#[async_trait]
impl IntentSink for KubeIntentSink {
    async fn set_address(
        &self,
        intent: &RoutingIntent,
        address: &str,
    ) -> Result<(), ControllerError> {
        let api: Api<Ingress> = Api::namespaced(self.client.clone(), &intent.meta.namespace);

        api.patch_status(
            intent.name(),
            &PatchParams::apply(&self.controller_name),
            &Patch::Merge(&address_status_patch(address)),
        )
        .await?;

        info!(
            "Updated Ingress {}/{} status: address={}",
            intent.meta.namespace,
            intent.name(),
            address
        );
        Ok(())
    }

    async fn warn(
        &self,
        intent: &RoutingIntent,
        reason: &str,
        message: &str,
    ) -> Result<(), ControllerError> {
        let api: Api<Event> = Api::namespaced(self.client.clone(), &intent.meta.namespace);
        let event = warning_event(intent, reason, message, &self.controller_name);

        api.create(&PostParams::default(), &event).await?;

        debug!(
            "Recorded {} event on Ingress {}/{}",
            reason,
            intent.meta.namespace,
            intent.name()
        );
        Ok(())
    }
}
