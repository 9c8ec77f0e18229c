//! Backend pool attachment
//!
//! Joins every compute node's network attachment to the gateway's backend
//! pool. Updates run concurrently; the first failure is reported while the
//! remaining updates finish in the background.

use super::{ApplyError, ControlPlane};
use crate::error::ControllerError;
use common::ids::network_interface_name;
use common::SubResource;
use futures::stream::{FuturesUnordered, StreamExt};
use std::sync::Arc;
use tracing::{debug, info};

/// Result of one attachment update
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachOutcome {
    Updated,
    AlreadyMember,
}

/// Counts of a finished fan-out
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AttachSummary {
    pub updated: usize,
    pub unchanged: usize,
}

/// Add `pool_id` to every attachment's IP configuration.
///
/// Returns on the first failure without cancelling updates already in flight.
pub async fn attach_to_pool(
    control_plane: Arc<dyn ControlPlane>,
    pool_id: &str,
    attachments: &[String],
) -> Result<AttachSummary, ControllerError> {
    let total = attachments.len();
    let mut tasks: FuturesUnordered<_> = attachments
        .iter()
        .map(|attachment| {
            let control_plane = control_plane.clone();
            let pool_id = pool_id.to_string();
            let attachment = attachment.clone();
            tokio::spawn(async move {
                let outcome = attach_one(control_plane.as_ref(), &pool_id, &attachment).await;
                (attachment, outcome)
            })
        })
        .collect();

    let mut summary = AttachSummary::default();
    while let Some(joined) = tasks.next().await {
        let (attachment, outcome) = joined.unwrap_or_else(|e| {
            (
                "unknown".to_string(),
                Err(ApplyError::Transport(format!("attachment task failed: {}", e))),
            )
        });

        match outcome {
            Ok(AttachOutcome::Updated) => summary.updated += 1,
            Ok(AttachOutcome::AlreadyMember) => summary.unchanged += 1,
            Err(source) => {
                return Err(ControllerError::PartialAttachment {
                    attachment,
                    succeeded: summary.updated + summary.unchanged,
                    total,
                    source,
                });
            }
        }
    }

    info!(
        "Backend pool attachments complete: {} updated, {} already attached",
        summary.updated, summary.unchanged
    );
    Ok(summary)
}

async fn attach_one(
    control_plane: &dyn ControlPlane,
    pool_id: &str,
    attachment_id: &str,
) -> Result<AttachOutcome, ApplyError> {
    let nic_name = network_interface_name(attachment_id)
        .ok_or_else(|| ApplyError::InvalidIdentifier(attachment_id.to_string()))?;

    let mut nic = control_plane.get_network_interface(nic_name).await?;
    let ip_config = nic.ip_configuration_mut(attachment_id).ok_or_else(|| {
        ApplyError::rejected("networkInterface", nic_name, "no IP configurations")
    })?;

    if ip_config.in_pool(pool_id) {
        debug!("{} already in backend pool", attachment_id);
        return Ok(AttachOutcome::AlreadyMember);
    }

    ip_config
        .backend_address_pools
        .push(SubResource::new(pool_id));
    control_plane.put_network_interface(&nic).await?;

    debug!("Attached {} to backend pool {}", attachment_id, pool_id);
    Ok(AttachOutcome::Updated)
}
