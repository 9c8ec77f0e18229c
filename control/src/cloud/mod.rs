//! External control plane
//!
//! Create-or-update, get and delete for the resource kinds a compiled graph
//! touches. The remote client is a black box behind [`ControlPlane`]; the
//! in-memory implementation backs tests and standalone mode.

pub mod attach;
pub mod memory;

use async_trait::async_trait;
use common::ids::resource_name;
use common::{ApplicationGateway, NetworkInterface, PublicAddress, Subnet};
use thiserror::Error;
use tracing::debug;

pub use attach::attach_to_pool;
pub use memory::InMemoryControlPlane;

/// External API failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApplyError {
    #[error("{kind} {name} not found")]
    NotFound { kind: &'static str, name: String },

    #[error("{kind} {name} rejected: {message}")]
    Rejected {
        kind: &'static str,
        name: String,
        message: String,
    },

    #[error("invalid resource identifier: {0}")]
    InvalidIdentifier(String),

    #[error("public address {0} has no allocated IP yet")]
    AddressNotAllocated(String),

    #[error("transport error: {0}")]
    Transport(String),
}

impl ApplyError {
    pub fn not_found(kind: &'static str, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            name: name.into(),
        }
    }

    pub fn rejected(kind: &'static str, name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Rejected {
            kind,
            name: name.into(),
            message: message.into(),
        }
    }
}

/// Reference from a virtual machine to one of its network interfaces
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceReference {
    pub id: String,
    pub primary: bool,
}

/// Compute node as the external API models it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VirtualMachine {
    pub name: String,
    pub network_interfaces: Vec<InterfaceReference>,
}

/// Put/get/delete against the external control plane.
///
/// Puts have create-or-update semantics and return the stored resource.
#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// Location of the configured resource group
    async fn resource_group_location(&self) -> Result<String, ApplyError>;

    async fn put_subnet(&self, subnet: &Subnet) -> Result<Subnet, ApplyError>;

    async fn put_public_address(&self, address: &PublicAddress)
        -> Result<PublicAddress, ApplyError>;

    async fn get_public_address(&self, name: &str) -> Result<PublicAddress, ApplyError>;

    async fn delete_public_address(&self, name: &str) -> Result<(), ApplyError>;

    async fn put_gateway(
        &self,
        gateway: &ApplicationGateway,
    ) -> Result<ApplicationGateway, ApplyError>;

    async fn delete_gateway(&self, name: &str) -> Result<(), ApplyError>;

    async fn get_virtual_machine(&self, name: &str) -> Result<VirtualMachine, ApplyError>;

    async fn get_network_interface(&self, name: &str) -> Result<NetworkInterface, ApplyError>;

    async fn put_network_interface(
        &self,
        nic: &NetworkInterface,
    ) -> Result<NetworkInterface, ApplyError>;
}

/// Primary IP-configuration identifier of a compute node.
///
/// A single interface or IP configuration is primary by definition; otherwise
/// the one flagged primary is used.
pub async fn primary_attachment_id(
    control_plane: &dyn ControlPlane,
    machine_name: &str,
) -> Result<String, ApplyError> {
    let machine = control_plane.get_virtual_machine(machine_name).await?;

    let nic_ref = match machine.network_interfaces.as_slice() {
        [only] => only,
        refs => refs.iter().find(|r| r.primary).ok_or_else(|| {
            ApplyError::rejected("virtualMachine", machine_name, "no primary network interface")
        })?,
    };

    let nic_name = resource_name(&nic_ref.id);
    let nic = control_plane.get_network_interface(nic_name).await?;

    let ip_config = match nic.ip_configurations.as_slice() {
        [only] => only,
        configs => configs.iter().find(|c| c.primary).ok_or_else(|| {
            ApplyError::rejected("networkInterface", nic_name, "no primary IP configuration")
        })?,
    };

    debug!(
        "Node {} attaches through {} ({})",
        machine_name, nic_name, ip_config.id
    );
    Ok(ip_config.id.clone())
}
