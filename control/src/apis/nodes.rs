//! Agent node inventory

use crate::cloud::{primary_attachment_id, ControlPlane};
use crate::error::ControllerError;
use crate::reconciler::ComputeInventory;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Node;
use kube::api::{Api, ListParams};
use kube::{Client, ResourceExt};
use std::sync::Arc;
use tracing::debug;

/// Lists agent nodes and maps each to its network attachment
pub struct KubeComputeInventory {
    client: Client,
    selector: String,
    control_plane: Arc<dyn ControlPlane>,
}

impl KubeComputeInventory {
    pub fn new(
        client: Client,
        selector: impl Into<String>,
        control_plane: Arc<dyn ControlPlane>,
    ) -> Self {
        Self {
            client,
            selector: selector.into(),
            control_plane,
        }
    }
}

#[async_trait]
impl ComputeInventory for KubeComputeInventory {
    async fn attachment_ids(&self) -> Result<Vec<String>, ControllerError> {
        let api: Api<Node> = Api::all(self.client.clone());
        let nodes = api.list(&ListParams::default().labels(&self.selector)).await?;

        let mut attachments = Vec::with_capacity(nodes.items.len());
        for node in &nodes.items {
            let name = node.name_any();
            // Agent nodes are named after their virtual machines
            let attachment = primary_attachment_id(self.control_plane.as_ref(), &name)
                .await
                .map_err(|e| {
                    ControllerError::Inventory(format!(
                        "no network attachment for node {}: {}",
                        name, e
                    ))
                })?;
            attachments.push(attachment);
        }

        debug!(
            "{} agent nodes match selector {}",
            attachments.len(),
            self.selector
        );
        Ok(attachments)
    }
}
