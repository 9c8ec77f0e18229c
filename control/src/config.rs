//! Configuration for the gateway controller
//!
//! Defaults reproduce the controller's historical fixed behaviour (subnet CIDR,
//! secure port heuristic, SKU); every value can be overridden from the environment.

use common::TenantContext;
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;
use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("required setting {0} is not set")]
    Missing(&'static str),

    #[error("invalid value {value:?} for {key}")]
    Invalid { key: &'static str, value: String },
}

/// Controller configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ControllerConfig {
    /// Controller name (event source component and field manager)
    #[serde(default = "default_controller_name")]
    pub controller_name: String,

    /// Ingress class this controller claims
    #[serde(default = "default_ingress_class")]
    pub ingress_class: String,

    /// Restrict watches to one namespace (all namespaces when unset)
    #[serde(default)]
    pub watch_namespace: Option<String>,

    /// Label selector for compute nodes that join backend pools
    #[serde(default = "default_agent_node_selector")]
    pub agent_node_selector: String,

    /// Bind address of the metrics endpoint (default: 0.0.0.0:9090)
    #[serde(default = "default_metrics_addr")]
    pub metrics_addr: String,

    /// Tenant identity for external identifiers
    #[serde(default)]
    pub tenant: TenantContext,

    /// Resource group location reported by the in-memory control plane (default: westus2)
    #[serde(default = "default_location")]
    pub location: String,

    /// Gateway shape defaults
    #[serde(default)]
    pub gateway: GatewayDefaults,

    /// Retry configuration for failed apply cycles
    #[serde(default)]
    pub retry: RetryConfig,
}

/// Gateway shape defaults
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct GatewayDefaults {
    /// Subnet the gateway is deployed into (default: agw-subnet)
    #[serde(default = "default_subnet_name")]
    pub subnet_name: String,

    /// Subnet address prefix (default: 10.1.0.0/24)
    #[serde(default = "default_subnet_cidr")]
    pub subnet_cidr: String,

    /// Frontend port treated as HTTPS (default: 443)
    #[serde(default = "default_secure_port")]
    pub secure_port: u16,

    #[serde(default = "default_sku_name")]
    pub sku_name: String,

    #[serde(default = "default_sku_tier")]
    pub sku_tier: String,

    /// Instance count (default: 1)
    #[serde(default = "default_capacity")]
    pub capacity: u32,
}

fn default_subnet_name() -> String {
    "agw-subnet".to_string()
}

fn default_subnet_cidr() -> String {
    "10.1.0.0/24".to_string()
}

fn default_secure_port() -> u16 {
    443
}

fn default_sku_name() -> String {
    "Standard_Medium".to_string()
}

fn default_sku_tier() -> String {
    "Standard".to_string()
}

fn default_capacity() -> u32 {
    1
}

impl Default for GatewayDefaults {
    fn default() -> Self {
        Self {
            subnet_name: default_subnet_name(),
            subnet_cidr: default_subnet_cidr(),
            secure_port: default_secure_port(),
            sku_name: default_sku_name(),
            sku_tier: default_sku_tier(),
            capacity: default_capacity(),
        }
    }
}

/// Retry configuration for failed apply cycles
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct RetryConfig {
    /// First retry delay in seconds (default: 5s)
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_secs: u64,

    /// Upper bound on the retry delay in seconds (default: 300s)
    #[serde(default = "default_max_backoff")]
    pub max_backoff_secs: u64,

    /// Attempts per intent change, first attempt included; 0 disables retries (default: 8)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Randomize delays between 0.5x and 1.5x (default: true)
    #[serde(default = "default_true")]
    pub jitter: bool,
}

fn default_initial_backoff() -> u64 {
    5
}

fn default_max_backoff() -> u64 {
    300
}

fn default_max_attempts() -> u32 {
    8
}

fn default_true() -> bool {
    true
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_backoff_secs: default_initial_backoff(),
            max_backoff_secs: default_max_backoff(),
            max_attempts: default_max_attempts(),
            jitter: default_true(),
        }
    }
}

impl RetryConfig {
    /// Delay before retry number `retry` (0-based), without jitter
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 2u64.saturating_pow(retry);
        let secs = self
            .initial_backoff_secs
            .saturating_mul(factor)
            .min(self.max_backoff_secs);
        Duration::from_secs(secs)
    }
}

fn default_controller_name() -> String {
    "azure-application-gateway-controller".to_string()
}

fn default_ingress_class() -> String {
    "azure-application-gateway".to_string()
}

fn default_agent_node_selector() -> String {
    "kubernetes.io/role=agent".to_string()
}

fn default_location() -> String {
    "westus2".to_string()
}

fn default_metrics_addr() -> String {
    "0.0.0.0:9090".to_string()
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            controller_name: default_controller_name(),
            ingress_class: default_ingress_class(),
            watch_namespace: None,
            agent_node_selector: default_agent_node_selector(),
            metrics_addr: default_metrics_addr(),
            tenant: TenantContext::default(),
            location: default_location(),
            gateway: GatewayDefaults::default(),
            retry: RetryConfig::default(),
        }
    }
}

impl ControllerConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(val) = lookup("AGIC_CONTROLLER_NAME") {
            config.controller_name = val;
        }
        if let Some(val) = lookup("AGIC_INGRESS_CLASS") {
            config.ingress_class = val;
        }
        config.watch_namespace = lookup("AGIC_WATCH_NAMESPACE").filter(|ns| !ns.is_empty());
        if let Some(val) = lookup("AGIC_AGENT_NODE_SELECTOR") {
            config.agent_node_selector = val;
        }
        if let Some(val) = lookup("AGIC_METRICS_ADDR") {
            config.metrics_addr = val;
        }

        config.tenant = TenantContext::new(
            lookup("AZURE_SUBSCRIPTION_ID").ok_or(ConfigError::Missing("AZURE_SUBSCRIPTION_ID"))?,
            lookup("AZURE_RESOURCE_GROUP").ok_or(ConfigError::Missing("AZURE_RESOURCE_GROUP"))?,
            lookup("AZURE_VNET_NAME").ok_or(ConfigError::Missing("AZURE_VNET_NAME"))?,
        );
        if let Some(val) = lookup("AZURE_LOCATION") {
            config.location = val;
        }

        if let Some(val) = lookup("AGIC_SUBNET_NAME") {
            config.gateway.subnet_name = val;
        }
        if let Some(val) = lookup("AGIC_SUBNET_CIDR") {
            config.gateway.subnet_cidr = val;
        }
        if let Some(val) = lookup("AGIC_SECURE_PORT") {
            config.gateway.secure_port = parse("AGIC_SECURE_PORT", val)?;
        }
        if let Some(val) = lookup("AGIC_GATEWAY_CAPACITY") {
            config.gateway.capacity = parse("AGIC_GATEWAY_CAPACITY", val)?;
        }
        if let Some(val) = lookup("AGIC_RETRY_MAX_ATTEMPTS") {
            config.retry.max_attempts = parse("AGIC_RETRY_MAX_ATTEMPTS", val)?;
        }
        if let Some(val) = lookup("AGIC_RETRY_INITIAL_BACKOFF_SECS") {
            config.retry.initial_backoff_secs = parse("AGIC_RETRY_INITIAL_BACKOFF_SECS", val)?;
        }
        if let Some(val) = lookup("AGIC_RETRY_MAX_BACKOFF_SECS") {
            config.retry.max_backoff_secs = parse("AGIC_RETRY_MAX_BACKOFF_SECS", val)?;
        }

        Ok(config)
    }
}

fn parse<T: std::str::FromStr>(key: &'static str, value: String) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::Invalid { key, value })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    const TENANT: [(&str, &str); 3] = [
        ("AZURE_SUBSCRIPTION_ID", "sub"),
        ("AZURE_RESOURCE_GROUP", "rg"),
        ("AZURE_VNET_NAME", "vnet"),
    ];

    #[test]
    fn test_default_config() {
        let config = ControllerConfig::default();
        assert_eq!(config.ingress_class, "azure-application-gateway");
        assert_eq!(config.agent_node_selector, "kubernetes.io/role=agent");
        assert_eq!(config.metrics_addr, "0.0.0.0:9090");
        assert!(config.watch_namespace.is_none());
    }

    #[test]
    fn test_gateway_defaults() {
        let config = ControllerConfig::default();

        assert_eq!(
            config.gateway.subnet_cidr, "10.1.0.0/24",
            "Subnet CIDR keeps the historical fixed value"
        );
        assert_eq!(config.gateway.subnet_name, "agw-subnet");
        assert_eq!(
            config.gateway.secure_port, 443,
            "Only port 443 is treated as HTTPS by default"
        );
        assert_eq!(config.gateway.sku_name, "Standard_Medium");
        assert_eq!(config.gateway.capacity, 1);
    }

    #[test]
    fn test_from_lookup_requires_tenant() {
        let err = ControllerConfig::from_lookup(lookup(&[])).unwrap_err();
        assert_eq!(err, ConfigError::Missing("AZURE_SUBSCRIPTION_ID"));
    }

    #[test]
    fn test_from_lookup_overrides() {
        let mut pairs = TENANT.to_vec();
        pairs.push(("AGIC_INGRESS_CLASS", "agw"));
        pairs.push(("AGIC_SUBNET_CIDR", "10.9.0.0/24"));
        pairs.push(("AGIC_SECURE_PORT", "8443"));
        pairs.push(("AGIC_WATCH_NAMESPACE", ""));

        let config = ControllerConfig::from_lookup(lookup(&pairs)).unwrap();
        assert_eq!(config.tenant.subscription_id, "sub");
        assert_eq!(config.tenant.vnet_name, "vnet");
        assert_eq!(config.ingress_class, "agw");
        assert_eq!(config.gateway.subnet_cidr, "10.9.0.0/24");
        assert_eq!(config.gateway.secure_port, 8443);
        assert!(config.watch_namespace.is_none());
    }

    #[test]
    fn test_invalid_number_is_rejected() {
        let mut pairs = TENANT.to_vec();
        pairs.push(("AGIC_SECURE_PORT", "https"));

        let err = ControllerConfig::from_lookup(lookup(&pairs)).unwrap_err();
        assert_eq!(
            err,
            ConfigError::Invalid {
                key: "AGIC_SECURE_PORT",
                value: "https".to_string()
            }
        );
    }

    #[test]
    fn test_backoff_is_exponential_and_capped() {
        let retry = RetryConfig::default();
        assert_eq!(retry.backoff(0), Duration::from_secs(5));
        assert_eq!(retry.backoff(1), Duration::from_secs(10));
        assert_eq!(retry.backoff(3), Duration::from_secs(40));
        assert_eq!(retry.backoff(10), Duration::from_secs(300));
        assert_eq!(retry.backoff(200), Duration::from_secs(300));
    }
}
