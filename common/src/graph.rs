//! Compiled resource graph
//!
//! Target shapes for the external L7 load-balancing API. Serialized in the
//! API's camelCase shape so a graph can be logged or diffed as JSON.

use serde::{Deserialize, Serialize};

/// Reference to another resource by identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubResource {
    pub id: String,
}

impl SubResource {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

/// Application protocol on a listener or backend setting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Protocol {
    Http,
    Https,
}

/// Routing rule type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RoutingRuleType {
    Basic,
    PathBasedRouting,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewaySku {
    pub name: String,
    pub tier: String,
    pub capacity: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayIpConfiguration {
    pub name: String,
    pub subnet: SubResource,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrontendIpConfiguration {
    pub name: String,
    pub id: String,
    pub public_ip_address: SubResource,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrontendPort {
    pub name: String,
    pub id: String,
    pub port: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendAddressPool {
    pub name: String,
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendHttpSettings {
    pub name: String,
    pub id: String,
    pub protocol: Protocol,
    pub port: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpListener {
    pub name: String,
    pub id: String,
    pub frontend_ip_configuration: SubResource,
    pub frontend_port: SubResource,
    pub protocol: Protocol,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PathRule {
    pub name: String,
    pub paths: Vec<String>,
    pub backend_address_pool: SubResource,
    pub backend_http_settings: SubResource,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UrlPathMap {
    pub name: String,
    pub id: String,
    pub default_backend_address_pool: SubResource,
    pub default_backend_http_settings: SubResource,
    pub path_rules: Vec<PathRule>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestRoutingRule {
    pub name: String,
    pub rule_type: RoutingRuleType,
    pub backend_address_pool: SubResource,
    pub backend_http_settings: SubResource,
    pub http_listener: SubResource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url_path_map: Option<SubResource>,
}

/// The gateway-like L7 resource with all of its nested sub-resources
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationGateway {
    pub name: String,
    pub location: String,
    pub sku: GatewaySku,
    pub gateway_ip_configurations: Vec<GatewayIpConfiguration>,
    pub frontend_ip_configurations: Vec<FrontendIpConfiguration>,
    pub frontend_ports: Vec<FrontendPort>,
    pub backend_address_pools: Vec<BackendAddressPool>,
    pub backend_http_settings_collection: Vec<BackendHttpSettings>,
    pub http_listeners: Vec<HttpListener>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url_path_maps: Option<Vec<UrlPathMap>>,
    pub request_routing_rules: Vec<RequestRoutingRule>,
}

impl ApplicationGateway {
    /// The single shared backend pool, if the gateway has one
    pub fn backend_pool(&self) -> Option<&BackendAddressPool> {
        self.backend_address_pools.first()
    }

    /// The shared path map, if any path rules exist
    pub fn url_path_map(&self) -> Option<&UrlPathMap> {
        self.url_path_maps.as_ref().and_then(|maps| maps.first())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AllocationMethod {
    Dynamic,
    Static,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AddressVersion {
    IPv4,
    IPv6,
}

/// Front-end public address
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicAddress {
    pub name: String,
    pub location: String,
    pub allocation_method: AllocationMethod,
    pub address_version: AddressVersion,
    /// Filled in by the external API once allocated
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
}

/// Subnet the gateway is deployed into
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subnet {
    pub name: String,
    pub vnet_name: String,
    pub address_prefix: String,
}

/// IP configuration of a compute node's network interface
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InterfaceIpConfiguration {
    pub id: String,
    pub primary: bool,
    #[serde(default)]
    pub backend_address_pools: Vec<SubResource>,
}

impl InterfaceIpConfiguration {
    /// Case-insensitive membership check, as the external API compares identifiers
    pub fn in_pool(&self, pool_id: &str) -> bool {
        self.backend_address_pools
            .iter()
            .any(|pool| pool.id.eq_ignore_ascii_case(pool_id))
    }
}

/// A compute node's network interface
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkInterface {
    pub name: String,
    pub ip_configurations: Vec<InterfaceIpConfiguration>,
}

impl NetworkInterface {
    /// The IP configuration named by `attachment_id`, else the primary one, else the first
    pub fn ip_configuration_mut(
        &mut self,
        attachment_id: &str,
    ) -> Option<&mut InterfaceIpConfiguration> {
        let index = self
            .ip_configurations
            .iter()
            .position(|cfg| cfg.id.eq_ignore_ascii_case(attachment_id))
            .or_else(|| self.ip_configurations.iter().position(|cfg| cfg.primary))
            .or_else(|| (!self.ip_configurations.is_empty()).then_some(0))?;
        self.ip_configurations.get_mut(index)
    }
}

/// Everything one compilation produces
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompiledGraph {
    pub gateway: ApplicationGateway,
    pub public_address: PublicAddress,
    pub subnet: Subnet,
    /// Compute-node attachment identifiers, passed through for pool membership
    pub attachments: Vec<String>,
}
