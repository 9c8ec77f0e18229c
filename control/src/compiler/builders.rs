//! Per-kind resource builders
//!
//! Each builder returns a fresh value; the compiler composes them.

use crate::config::GatewayDefaults;
use common::{
    derive_name, AddressVersion, AllocationMethod, BackendAddressPool, BackendHttpSettings,
    Discriminator, FrontendIpConfiguration, FrontendPort, GatewayIpConfiguration, GatewaySku,
    HttpListener, ListenerKey, PathRule, Protocol, PublicAddress, RequestRoutingRule,
    ResourceKind, RoutingRuleType, SubResource, Subnet, TenantContext, UrlPathMap,
};

/// Naming and identifier scope of one compiled gateway
pub(crate) struct GatewayScope<'a> {
    pub tenant: &'a TenantContext,
    pub intent_name: &'a str,
    pub gateway_name: String,
}

impl<'a> GatewayScope<'a> {
    pub fn new(tenant: &'a TenantContext, intent_name: &'a str) -> Self {
        Self {
            tenant,
            intent_name,
            gateway_name: derive_name(intent_name, ResourceKind::Gateway, Discriminator::None),
        }
    }

    pub fn name(&self, kind: ResourceKind, discriminator: Discriminator<'_>) -> String {
        derive_name(self.intent_name, kind, discriminator)
    }

    pub fn public_address_name(&self) -> String {
        self.name(ResourceKind::PublicAddress, Discriminator::None)
    }

    pub fn backend_pool_id(&self) -> String {
        let name = self.name(ResourceKind::BackendPool, Discriminator::None);
        self.tenant.backend_pool_id(&self.gateway_name, &name)
    }

    pub fn url_path_map_id(&self) -> String {
        let name = self.name(ResourceKind::UrlPathMap, Discriminator::None);
        self.tenant.url_path_map_id(&self.gateway_name, &name)
    }
}

pub(crate) fn sku(defaults: &GatewayDefaults) -> GatewaySku {
    GatewaySku {
        name: defaults.sku_name.clone(),
        tier: defaults.sku_tier.clone(),
        capacity: defaults.capacity,
    }
}

pub(crate) fn gateway_ip_configuration(
    scope: &GatewayScope<'_>,
    subnet_name: &str,
) -> GatewayIpConfiguration {
    GatewayIpConfiguration {
        name: scope.name(ResourceKind::GatewayIpConfiguration, Discriminator::None),
        subnet: SubResource::new(scope.tenant.subnet_id(subnet_name)),
    }
}

pub(crate) fn frontend_ip_configuration(scope: &GatewayScope<'_>) -> FrontendIpConfiguration {
    let name = scope.name(ResourceKind::FrontendIpConfiguration, Discriminator::None);
    FrontendIpConfiguration {
        id: scope
            .tenant
            .frontend_ip_configuration_id(&scope.gateway_name, &name),
        public_ip_address: SubResource::new(
            scope.tenant.public_address_id(&scope.public_address_name()),
        ),
        name,
    }
}

pub(crate) fn backend_pool(scope: &GatewayScope<'_>) -> BackendAddressPool {
    BackendAddressPool {
        name: scope.name(ResourceKind::BackendPool, Discriminator::None),
        id: scope.backend_pool_id(),
    }
}

pub(crate) fn backend_settings(
    scope: &GatewayScope<'_>,
    name: String,
    protocol: Protocol,
    port: u16,
) -> BackendHttpSettings {
    BackendHttpSettings {
        id: scope.tenant.backend_settings_id(&scope.gateway_name, &name),
        name,
        protocol,
        port,
    }
}

pub(crate) fn frontend_port(scope: &GatewayScope<'_>, port: u16) -> FrontendPort {
    let name = scope.name(ResourceKind::FrontendPort, Discriminator::Port(port));
    FrontendPort {
        id: scope.tenant.frontend_port_id(&scope.gateway_name, &name),
        name,
        port,
    }
}

pub(crate) fn http_listener(
    scope: &GatewayScope<'_>,
    key: &ListenerKey,
    frontend_ip: &FrontendIpConfiguration,
    frontend_port: &FrontendPort,
    protocol: Protocol,
) -> HttpListener {
    let name = scope.name(ResourceKind::Listener, Discriminator::Listener(key));
    HttpListener {
        id: scope.tenant.http_listener_id(&scope.gateway_name, &name),
        name,
        frontend_ip_configuration: SubResource::new(&frontend_ip.id),
        frontend_port: SubResource::new(&frontend_port.id),
        protocol,
        host_name: (!key.host.is_empty()).then(|| key.host.clone()),
    }
}

pub(crate) fn path_rule(
    scope: &GatewayScope<'_>,
    index: usize,
    path: &str,
    settings: &BackendHttpSettings,
) -> PathRule {
    PathRule {
        name: scope.name(ResourceKind::PathRule, Discriminator::Index(index)),
        paths: vec![path.to_string()],
        backend_address_pool: SubResource::new(scope.backend_pool_id()),
        backend_http_settings: SubResource::new(&settings.id),
    }
}

pub(crate) fn url_path_map(
    scope: &GatewayScope<'_>,
    default_settings: &BackendHttpSettings,
    path_rules: Vec<PathRule>,
) -> UrlPathMap {
    UrlPathMap {
        name: scope.name(ResourceKind::UrlPathMap, Discriminator::None),
        id: scope.url_path_map_id(),
        default_backend_address_pool: SubResource::new(scope.backend_pool_id()),
        default_backend_http_settings: SubResource::new(&default_settings.id),
        path_rules,
    }
}

/// Routing rule for one listener; path-based iff a path map is referenced
pub(crate) fn routing_rule(
    scope: &GatewayScope<'_>,
    key: &ListenerKey,
    listener: &HttpListener,
    settings_id: &str,
    url_path_map_id: Option<String>,
) -> RequestRoutingRule {
    let rule_type = if url_path_map_id.is_some() {
        RoutingRuleType::PathBasedRouting
    } else {
        RoutingRuleType::Basic
    };

    RequestRoutingRule {
        name: scope.name(ResourceKind::RoutingRule, Discriminator::Listener(key)),
        rule_type,
        backend_address_pool: SubResource::new(scope.backend_pool_id()),
        backend_http_settings: SubResource::new(settings_id),
        http_listener: SubResource::new(&listener.id),
        url_path_map: url_path_map_id.map(SubResource::new),
    }
}

/// Public address; the gateway only links to dynamically allocated IPv4 addresses
pub(crate) fn public_address(scope: &GatewayScope<'_>, location: &str) -> PublicAddress {
    PublicAddress {
        name: scope.public_address_name(),
        location: location.to_string(),
        allocation_method: AllocationMethod::Dynamic,
        address_version: AddressVersion::IPv4,
        ip_address: None,
    }
}

pub(crate) fn subnet(tenant: &TenantContext, defaults: &GatewayDefaults) -> Subnet {
    Subnet {
        name: defaults.subnet_name.clone(),
        vnet_name: tenant.vnet_name.clone(),
        address_prefix: defaults.subnet_cidr.clone(),
    }
}
