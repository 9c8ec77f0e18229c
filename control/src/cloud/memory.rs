//! In-memory control plane
//!
//! Stores resources in maps and behaves like the external API where the
//! reconciler depends on it: puts are create-or-update, a dynamic public
//! address only gets an IP once a gateway links to it, and deleting something
//! that is already gone succeeds.

use super::{ApplyError, ControlPlane, InterfaceReference, VirtualMachine};
use async_trait::async_trait;
use common::ids::resource_name;
use common::{
    ApplicationGateway, InterfaceIpConfiguration, NetworkInterface, PublicAddress, Subnet,
    TenantContext,
};
use std::collections::HashMap;
use std::fmt;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, warn};

/// Control-plane operation, for call recording and failure injection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    ResourceGroupLocation,
    PutSubnet,
    PutPublicAddress,
    GetPublicAddress,
    DeletePublicAddress,
    PutGateway,
    DeleteGateway,
    GetVirtualMachine,
    GetNetworkInterface,
    PutNetworkInterface,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = match self {
            Operation::ResourceGroupLocation => "get_resource_group",
            Operation::PutSubnet => "put_subnet",
            Operation::PutPublicAddress => "put_public_address",
            Operation::GetPublicAddress => "get_public_address",
            Operation::DeletePublicAddress => "delete_public_address",
            Operation::PutGateway => "put_gateway",
            Operation::DeleteGateway => "delete_gateway",
            Operation::GetVirtualMachine => "get_virtual_machine",
            Operation::GetNetworkInterface => "get_network_interface",
            Operation::PutNetworkInterface => "put_network_interface",
        };
        f.write_str(op)
    }
}

/// One recorded call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub operation: Operation,
    pub name: String,
}

impl fmt::Display for Call {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.operation, self.name)
    }
}

struct Failure {
    operation: Operation,
    /// Only calls on this resource fail; all calls when unset
    name: Option<String>,
    error: ApplyError,
    /// Remaining failures; unlimited when unset
    remaining: Option<u32>,
}

#[derive(Default)]
struct Resources {
    subnets: HashMap<String, Subnet>,
    addresses: HashMap<String, PublicAddress>,
    gateways: HashMap<String, ApplicationGateway>,
    machines: HashMap<String, VirtualMachine>,
    interfaces: HashMap<String, NetworkInterface>,
    allocated: u32,
}

/// Control plane backed by in-process maps
pub struct InMemoryControlPlane {
    tenant: TenantContext,
    location: String,
    /// Synthesize a machine for unknown node names
    implicit_machines: bool,
    resources: RwLock<Resources>,
    calls: RwLock<Vec<Call>>,
    failures: RwLock<Vec<Failure>>,
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

impl InMemoryControlPlane {
    pub fn new(tenant: TenantContext, location: impl Into<String>) -> Self {
        Self {
            tenant,
            location: location.into(),
            implicit_machines: false,
            resources: RwLock::new(Resources::default()),
            calls: RwLock::new(Vec::new()),
            failures: RwLock::new(Vec::new()),
        }
    }

    /// Treat every node name as an existing machine with one interface
    pub fn with_implicit_machines(mut self) -> Self {
        self.implicit_machines = true;
        self
    }

    /// Register a machine with a single interface `{name}-nic`
    pub fn with_machine(self, name: &str) -> Self {
        {
            let mut resources = safe_write(&self.resources);
            let (machine, nic) = self.machine_template(name);
            resources.interfaces.insert(nic.name.clone(), nic);
            resources.machines.insert(name.to_string(), machine);
        }
        self
    }

    /// Make matching calls fail until cleared
    pub fn fail(&self, operation: Operation, name: Option<&str>, error: ApplyError) {
        self.push_failure(operation, name, error, None);
    }

    /// Make the next `times` matching calls fail
    pub fn fail_times(
        &self,
        operation: Operation,
        name: Option<&str>,
        error: ApplyError,
        times: u32,
    ) {
        self.push_failure(operation, name, error, Some(times));
    }

    pub fn clear_failures(&self) {
        safe_write(&self.failures).clear();
    }

    /// Every call made so far, in order
    pub fn calls(&self) -> Vec<Call> {
        safe_read(&self.calls).clone()
    }

    /// Calls of one operation, in order
    pub fn calls_of(&self, operation: Operation) -> Vec<String> {
        safe_read(&self.calls)
            .iter()
            .filter(|call| call.operation == operation)
            .map(|call| call.name.clone())
            .collect()
    }

    pub fn gateway(&self, name: &str) -> Option<ApplicationGateway> {
        safe_read(&self.resources).gateways.get(name).cloned()
    }

    pub fn public_address(&self, name: &str) -> Option<PublicAddress> {
        safe_read(&self.resources).addresses.get(name).cloned()
    }

    pub fn network_interface(&self, name: &str) -> Option<NetworkInterface> {
        safe_read(&self.resources).interfaces.get(name).cloned()
    }

    fn push_failure(
        &self,
        operation: Operation,
        name: Option<&str>,
        error: ApplyError,
        remaining: Option<u32>,
    ) {
        safe_write(&self.failures).push(Failure {
            operation,
            name: name.map(str::to_string),
            error,
            remaining,
        });
    }

    fn machine_template(&self, name: &str) -> (VirtualMachine, NetworkInterface) {
        let nic_name = format!("{}-nic", name);
        let nic_id = self.tenant.network_interface_id(&nic_name);
        let machine = VirtualMachine {
            name: name.to_string(),
            network_interfaces: vec![InterfaceReference {
                id: nic_id.clone(),
                primary: true,
            }],
        };
        let nic = NetworkInterface {
            name: nic_name,
            ip_configurations: vec![InterfaceIpConfiguration {
                id: format!("{}/ipConfigurations/ipconfig1", nic_id),
                primary: true,
                backend_address_pools: Vec::new(),
            }],
        };
        (machine, nic)
    }

    /// Record the call, then fail it if an injected failure matches
    fn enter(&self, operation: Operation, name: &str) -> Result<(), ApplyError> {
        safe_write(&self.calls).push(Call {
            operation,
            name: name.to_string(),
        });

        let mut failures = safe_write(&self.failures);
        let position = failures.iter().position(|f| {
            f.operation == operation && f.name.as_deref().map_or(true, |n| n == name)
        });
        let Some(index) = position else {
            return Ok(());
        };

        let failure = &mut failures[index];
        let error = failure.error.clone();
        let exhausted = match failure.remaining.as_mut() {
            Some(n) => {
                *n = n.saturating_sub(1);
                *n == 0
            }
            None => false,
        };
        if exhausted {
            failures.remove(index);
        }
        debug!("Injected failure for {} {}: {}", operation, name, error);
        Err(error)
    }
}

#[async_trait]
impl ControlPlane for InMemoryControlPlane {
    async fn resource_group_location(&self) -> Result<String, ApplyError> {
        self.enter(Operation::ResourceGroupLocation, &self.tenant.resource_group)?;
        Ok(self.location.clone())
    }

    async fn put_subnet(&self, subnet: &Subnet) -> Result<Subnet, ApplyError> {
        self.enter(Operation::PutSubnet, &subnet.name)?;
        if subnet.vnet_name != self.tenant.vnet_name {
            return Err(ApplyError::not_found("virtualNetwork", &subnet.vnet_name));
        }
        safe_write(&self.resources)
            .subnets
            .insert(subnet.name.clone(), subnet.clone());
        Ok(subnet.clone())
    }

    async fn put_public_address(
        &self,
        address: &PublicAddress,
    ) -> Result<PublicAddress, ApplyError> {
        self.enter(Operation::PutPublicAddress, &address.name)?;
        let mut resources = safe_write(&self.resources);
        let mut stored = address.clone();
        // Allocation belongs to the external API; keep what it already assigned
        stored.ip_address = resources
            .addresses
            .get(&address.name)
            .and_then(|existing| existing.ip_address.clone());
        resources
            .addresses
            .insert(address.name.clone(), stored.clone());
        Ok(stored)
    }

    async fn get_public_address(&self, name: &str) -> Result<PublicAddress, ApplyError> {
        self.enter(Operation::GetPublicAddress, name)?;
        safe_read(&self.resources)
            .addresses
            .get(name)
            .cloned()
            .ok_or_else(|| ApplyError::not_found("publicIPAddress", name))
    }

    async fn delete_public_address(&self, name: &str) -> Result<(), ApplyError> {
        self.enter(Operation::DeletePublicAddress, name)?;
        let mut resources = safe_write(&self.resources);
        let linked = resources.gateways.values().any(|gw| {
            gw.frontend_ip_configurations
                .iter()
                .any(|fip| resource_name(&fip.public_ip_address.id) == name)
        });
        if linked {
            return Err(ApplyError::rejected(
                "publicIPAddress",
                name,
                "address is in use by a gateway",
            ));
        }
        resources.addresses.remove(name);
        Ok(())
    }

    async fn put_gateway(
        &self,
        gateway: &ApplicationGateway,
    ) -> Result<ApplicationGateway, ApplyError> {
        self.enter(Operation::PutGateway, &gateway.name)?;
        let mut resources = safe_write(&self.resources);

        for ip_config in &gateway.gateway_ip_configurations {
            let subnet = resource_name(&ip_config.subnet.id);
            if !resources.subnets.contains_key(subnet) {
                return Err(ApplyError::rejected(
                    "applicationGateway",
                    &gateway.name,
                    format!("subnet {} does not exist", subnet),
                ));
            }
        }

        for fip in &gateway.frontend_ip_configurations {
            let address_name = resource_name(&fip.public_ip_address.id).to_string();
            if !resources.addresses.contains_key(&address_name) {
                return Err(ApplyError::rejected(
                    "applicationGateway",
                    &gateway.name,
                    format!("public address {} does not exist", address_name),
                ));
            }

            let needs_ip = resources
                .addresses
                .get(&address_name)
                .is_some_and(|address| address.ip_address.is_none());
            if needs_ip {
                resources.allocated += 1;
                let n = resources.allocated;
                let ip = format!("20.0.{}.{}", n / 256, n % 256);
                if let Some(address) = resources.addresses.get_mut(&address_name) {
                    address.ip_address = Some(ip);
                }
            }
        }

        resources
            .gateways
            .insert(gateway.name.clone(), gateway.clone());
        Ok(gateway.clone())
    }

    async fn delete_gateway(&self, name: &str) -> Result<(), ApplyError> {
        self.enter(Operation::DeleteGateway, name)?;
        safe_write(&self.resources).gateways.remove(name);
        Ok(())
    }

    async fn get_virtual_machine(&self, name: &str) -> Result<VirtualMachine, ApplyError> {
        self.enter(Operation::GetVirtualMachine, name)?;
        let mut resources = safe_write(&self.resources);
        if let Some(machine) = resources.machines.get(name) {
            return Ok(machine.clone());
        }
        if !self.implicit_machines {
            return Err(ApplyError::not_found("virtualMachine", name));
        }

        let (machine, nic) = self.machine_template(name);
        resources.interfaces.insert(nic.name.clone(), nic);
        resources
            .machines
            .insert(name.to_string(), machine.clone());
        Ok(machine)
    }

    async fn get_network_interface(&self, name: &str) -> Result<NetworkInterface, ApplyError> {
        self.enter(Operation::GetNetworkInterface, name)?;
        safe_read(&self.resources)
            .interfaces
            .get(name)
            .cloned()
            .ok_or_else(|| ApplyError::not_found("networkInterface", name))
    }

    async fn put_network_interface(
        &self,
        nic: &NetworkInterface,
    ) -> Result<NetworkInterface, ApplyError> {
        self.enter(Operation::PutNetworkInterface, &nic.name)?;
        safe_write(&self.resources)
            .interfaces
            .insert(nic.name.clone(), nic.clone());
        Ok(nic.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{AddressVersion, AllocationMethod};

    fn cloud() -> InMemoryControlPlane {
        InMemoryControlPlane::new(TenantContext::new("sub", "rg", "vnet"), "westus2")
    }

    fn address(name: &str) -> PublicAddress {
        PublicAddress {
            name: name.to_string(),
            location: "westus2".to_string(),
            allocation_method: AllocationMethod::Dynamic,
            address_version: AddressVersion::IPv4,
            ip_address: None,
        }
    }

    #[tokio::test]
    async fn test_failure_injection_counts_down() {
        let cloud = cloud();
        cloud.fail_times(
            Operation::PutPublicAddress,
            Some("pip"),
            ApplyError::Transport("timeout".to_string()),
            1,
        );

        assert!(cloud.put_public_address(&address("other")).await.is_ok());
        assert!(cloud.put_public_address(&address("pip")).await.is_err());
        assert!(
            cloud.put_public_address(&address("pip")).await.is_ok(),
            "Failure is consumed after one call"
        );
        assert_eq!(
            cloud.calls_of(Operation::PutPublicAddress),
            vec!["other", "pip", "pip"]
        );
    }

    #[tokio::test]
    async fn test_address_has_no_ip_until_linked() {
        let cloud = cloud();
        let stored = cloud.put_public_address(&address("pip")).await.unwrap();
        assert!(stored.ip_address.is_none());

        let fetched = cloud.get_public_address("pip").await.unwrap();
        assert!(fetched.ip_address.is_none());
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let cloud = cloud();
        assert!(cloud.delete_gateway("missing").await.is_ok());
        assert!(cloud.delete_public_address("missing").await.is_ok());
    }

    #[tokio::test]
    async fn test_implicit_machines() {
        let cloud = cloud().with_implicit_machines();
        let machine = cloud.get_virtual_machine("agent-7").await.unwrap();
        assert_eq!(machine.network_interfaces.len(), 1);
        assert!(cloud.network_interface("agent-7-nic").is_some());
    }
}
