//! External resource identifiers
//!
//! The external API cross-references resources by hierarchical identifier:
//! `/subscriptions/{s}/resourceGroups/{rg}/providers/{provider}/{kind}/{path}`.

use serde::{Deserialize, Serialize};

const NETWORK_PROVIDER: &str = "Microsoft.Network";

/// Tenant identity every identifier is scoped to
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TenantContext {
    pub subscription_id: String,
    pub resource_group: String,
    pub vnet_name: String,
}

impl TenantContext {
    pub fn new(
        subscription_id: impl Into<String>,
        resource_group: impl Into<String>,
        vnet_name: impl Into<String>,
    ) -> Self {
        Self {
            subscription_id: subscription_id.into(),
            resource_group: resource_group.into(),
            vnet_name: vnet_name.into(),
        }
    }

    pub fn resource_id(&self, provider: &str, kind: &str, path: &str) -> String {
        format!(
            "/subscriptions/{}/resourceGroups/{}/providers/{}/{}/{}",
            self.subscription_id, self.resource_group, provider, kind, path
        )
    }

    /// Identifier of a sub-resource nested in a gateway
    pub fn gateway_resource_id(&self, gateway: &str, sub_kind: &str, name: &str) -> String {
        self.resource_id(
            NETWORK_PROVIDER,
            "applicationGateways",
            &format!("{}/{}/{}", gateway, sub_kind, name),
        )
    }

    pub fn gateway_id(&self, gateway: &str) -> String {
        self.resource_id(NETWORK_PROVIDER, "applicationGateways", gateway)
    }

    pub fn backend_pool_id(&self, gateway: &str, name: &str) -> String {
        self.gateway_resource_id(gateway, "backendAddressPools", name)
    }

    pub fn frontend_ip_configuration_id(&self, gateway: &str, name: &str) -> String {
        self.gateway_resource_id(gateway, "frontendIPConfigurations", name)
    }

    pub fn frontend_port_id(&self, gateway: &str, name: &str) -> String {
        self.gateway_resource_id(gateway, "frontendPorts", name)
    }

    pub fn backend_settings_id(&self, gateway: &str, name: &str) -> String {
        self.gateway_resource_id(gateway, "backendHttpSettingsCollection", name)
    }

    pub fn url_path_map_id(&self, gateway: &str, name: &str) -> String {
        self.gateway_resource_id(gateway, "urlPathMaps", name)
    }

    pub fn http_listener_id(&self, gateway: &str, name: &str) -> String {
        self.gateway_resource_id(gateway, "httpListeners", name)
    }

    pub fn subnet_id(&self, subnet: &str) -> String {
        self.resource_id(
            NETWORK_PROVIDER,
            "virtualNetworks",
            &format!("{}/subnets/{}", self.vnet_name, subnet),
        )
    }

    pub fn public_address_id(&self, name: &str) -> String {
        self.resource_id(NETWORK_PROVIDER, "publicIPAddresses", name)
    }

    pub fn network_interface_id(&self, name: &str) -> String {
        self.resource_id(NETWORK_PROVIDER, "networkInterfaces", name)
    }
}

/// Last path segment of an identifier
pub fn resource_name(id: &str) -> &str {
    id.rsplit('/').next().unwrap_or(id)
}

/// Network interface name from an interface or IP-configuration identifier
pub fn network_interface_name(id: &str) -> Option<&str> {
    let mut segments = id.split('/');
    segments
        .by_ref()
        .find(|segment| segment.eq_ignore_ascii_case("networkInterfaces"))?;
    segments.next().filter(|name| !name.is_empty())
}
