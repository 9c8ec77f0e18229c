//! Routing intents
//!
//! The declarative input the compiler consumes: an optional default backend plus
//! ordered host/path rules. Built from the intent store's objects and never
//! mutated during a reconciliation pass.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Annotation that selects the controller class for an intent
pub const INGRESS_CLASS_ANNOTATION: &str = "kubernetes.io/ingress.class";

/// Key for intent lookup: (namespace, name)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IntentKey {
    pub namespace: String,
    pub name: String,
}

impl IntentKey {
    #[inline]
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for IntentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Logical service port: a number or a named port on the service
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ServicePortRef {
    Number(u16),
    Name(String),
}

impl fmt::Display for ServicePortRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServicePortRef::Number(port) => write!(f, "{}", port),
            ServicePortRef::Name(name) => f.write_str(name),
        }
    }
}

/// (service, logical port) pair, resolved on every compile
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Backend {
    pub service_name: String,
    pub port: ServicePortRef,
}

impl Backend {
    pub fn new(service_name: impl Into<String>, port: ServicePortRef) -> Self {
        Self {
            service_name: service_name.into(),
            port,
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.service_name, self.port)
    }
}

/// One path under a host. An empty path routes the whole host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathRoute {
    pub path: String,
    pub backend: Backend,
}

/// Host rule with its ordered path routes. An empty host matches any host.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Rule {
    pub host: String,
    pub paths: Vec<PathRoute>,
}

/// TLS binding declared on an intent
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TlsBinding {
    pub hosts: Vec<String>,
    pub secret_name: Option<String>,
}

/// Routing specification
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntentSpec {
    pub default_backend: Option<Backend>,
    #[serde(default)]
    pub rules: Vec<Rule>,
    #[serde(default)]
    pub tls: Vec<TlsBinding>,
}

/// Identifying metadata. Resource versions and managed fields are deliberately absent.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntentMeta {
    pub namespace: String,
    pub name: String,
    pub uid: Option<String>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    pub class_name: Option<String>,
}

/// Observed state written back by the reconciler
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct IntentStatus {
    #[serde(default)]
    pub addresses: Vec<String>,
}

/// Routing intent
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RoutingIntent {
    pub meta: IntentMeta,
    pub spec: IntentSpec,
    #[serde(default)]
    pub status: IntentStatus,
}

impl RoutingIntent {
    pub fn key(&self) -> IntentKey {
        IntentKey::new(&self.meta.namespace, &self.meta.name)
    }

    pub fn name(&self) -> &str {
        &self.meta.name
    }

    /// True when metadata or spec differ. Status-only churn is not salient.
    pub fn salient_change(&self, other: &RoutingIntent) -> bool {
        self.meta != other.meta || self.spec != other.spec
    }

    /// Whether an intent with this class selection belongs to `class`.
    ///
    /// An unset or empty class annotation claims the intent, which assumes a single
    /// ingress controller per cluster.
    pub fn is_claimed_by(&self, class: &str) -> bool {
        let annotated = match self.meta.annotations.get(INGRESS_CLASS_ANNOTATION) {
            Some(value) => value.is_empty() || value == class,
            None => true,
        };
        let named = match &self.meta.class_name {
            Some(name) => name == class,
            None => true,
        };
        annotated && named
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn intent(annotation: Option<&str>, class_name: Option<&str>) -> RoutingIntent {
        let mut meta = IntentMeta {
            namespace: "default".to_string(),
            name: "web".to_string(),
            class_name: class_name.map(str::to_string),
            ..Default::default()
        };
        if let Some(value) = annotation {
            meta.annotations
                .insert(INGRESS_CLASS_ANNOTATION.to_string(), value.to_string());
        }
        RoutingIntent {
            meta,
            ..Default::default()
        }
    }

    #[test]
    fn test_class_filter() {
        let class = "azure-application-gateway";
        assert!(intent(None, None).is_claimed_by(class));
        assert!(intent(Some(""), None).is_claimed_by(class));
        assert!(intent(Some(class), None).is_claimed_by(class));
        assert!(!intent(Some("nginx"), None).is_claimed_by(class));
        assert!(intent(None, Some(class)).is_claimed_by(class));
        assert!(!intent(None, Some("nginx")).is_claimed_by(class));
    }

    #[test]
    fn test_status_change_is_not_salient() {
        let old = intent(None, None);
        let mut new = old.clone();
        new.status.addresses.push("20.1.2.3".to_string());
        assert!(!old.salient_change(&new));

        new.meta
            .annotations
            .insert("example.com/touch".to_string(), "1".to_string());
        assert!(old.salient_change(&new));
    }

    #[test]
    fn test_intent_key_display() {
        assert_eq!(IntentKey::new("prod", "web").to_string(), "prod/web");
    }
}
