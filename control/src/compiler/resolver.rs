//! Backend resolution
//!
//! Maps a (service, logical port) backend onto the port the gateway listens on
//! and the node port it forwards to. Every compile re-resolves; nothing is cached.

use async_trait::async_trait;
use common::{Backend, Protocol, ServicePortRef};
use thiserror::Error;
use tracing::debug;

/// Why a backend could not be resolved
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolutionCause {
    #[error("service not found")]
    ServiceNotFound,

    #[error("service has no port {0}")]
    PortNotFound(ServicePortRef),

    #[error("service port {0} has no externally reachable node port")]
    NoExternalPort(u16),

    #[error("service registry error: {0}")]
    Registry(String),
}

/// Backend resolution failure
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("failed to resolve service {service_name}: {cause}")]
pub struct ResolutionError {
    pub service_name: String,
    pub cause: ResolutionCause,
}

impl ResolutionError {
    pub fn new(service_name: impl Into<String>, cause: ResolutionCause) -> Self {
        Self {
            service_name: service_name.into(),
            cause,
        }
    }
}

/// A backend resolved to gateway-facing ports
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedBackend {
    /// Service port; the gateway listens on it
    pub frontend_port: u16,
    /// Node port the gateway forwards to
    pub backend_port: u16,
    pub protocol: Protocol,
}

/// One port of a registered service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServicePortRecord {
    pub name: Option<String>,
    pub port: u16,
    pub node_port: Option<u16>,
}

/// A service as seen by the registry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceRecord {
    pub name: String,
    pub cluster_ip: Option<String>,
    pub ports: Vec<ServicePortRecord>,
}

impl ServiceRecord {
    fn find_port(&self, port: &ServicePortRef) -> Option<&ServicePortRecord> {
        self.ports.iter().find(|p| match port {
            ServicePortRef::Number(number) => p.port == *number,
            ServicePortRef::Name(name) => p.name.as_deref() == Some(name.as_str()),
        })
    }
}

/// External service registry
#[async_trait]
pub trait ServiceRegistry: Send + Sync {
    /// Look up a service; `Ok(None)` when it does not exist
    async fn service(&self, namespace: &str, name: &str) -> Result<Option<ServiceRecord>, String>;
}

/// Resolves backends for the compiler
#[async_trait]
pub trait BackendResolver: Send + Sync {
    async fn resolve(
        &self,
        namespace: &str,
        backend: &Backend,
    ) -> Result<ResolvedBackend, ResolutionError>;
}

/// Protocol for a frontend port.
///
/// Only `secure_port` is HTTPS. This ignores annotations and service app
/// protocols; it is a known simplification kept for compatibility.
pub fn protocol_for_port(port: u16, secure_port: u16) -> Protocol {
    if port == secure_port {
        Protocol::Https
    } else {
        Protocol::Http
    }
}

/// Resolver backed by a service registry
pub struct RegistryResolver<R> {
    registry: R,
    secure_port: u16,
}

impl<R: ServiceRegistry> RegistryResolver<R> {
    pub fn new(registry: R, secure_port: u16) -> Self {
        Self {
            registry,
            secure_port,
        }
    }
}

#[async_trait]
impl<R: ServiceRegistry> BackendResolver for RegistryResolver<R> {
    async fn resolve(
        &self,
        namespace: &str,
        backend: &Backend,
    ) -> Result<ResolvedBackend, ResolutionError> {
        let fail = |cause| ResolutionError::new(&backend.service_name, cause);

        let service = self
            .registry
            .service(namespace, &backend.service_name)
            .await
            .map_err(|e| fail(ResolutionCause::Registry(e)))?
            .ok_or_else(|| fail(ResolutionCause::ServiceNotFound))?;

        let port = service
            .find_port(&backend.port)
            .ok_or_else(|| fail(ResolutionCause::PortNotFound(backend.port.clone())))?;

        let node_port = port
            .node_port
            .ok_or_else(|| fail(ResolutionCause::NoExternalPort(port.port)))?;

        debug!(
            "Service {}/{} port {} -> node port {} (cluster IP {})",
            namespace,
            service.name,
            port.port,
            node_port,
            service.cluster_ip.as_deref().unwrap_or("none")
        );

        Ok(ResolvedBackend {
            frontend_port: port.port,
            backend_port: node_port,
            protocol: protocol_for_port(port.port, self.secure_port),
        })
    }
}


#[cfg(test)]
mod tests {
    use super::testing::StaticRegistry;
    use super::*;

    fn registry() -> RegistryResolver<StaticRegistry> {
        StaticRegistry::default()
            .with_service("web", &[(Some("http"), 80, Some(31080))])
            .with_service("secure", &[(Some("https"), 443, Some(31443))])
            .with_service("internal", &[(Some("http"), 80, None)])
            .resolver()
    }

    #[tokio::test]
    async fn test_resolve_by_number_and_name() {
        let resolver = registry();

        let by_number = resolver
            .resolve("default", &Backend::new("web", ServicePortRef::Number(80)))
            .await
            .unwrap();
        let by_name = resolver
            .resolve(
                "default",
                &Backend::new("web", ServicePortRef::Name("http".to_string())),
            )
            .await
            .unwrap();

        assert_eq!(by_number, by_name);
        assert_eq!(by_number.frontend_port, 80);
        assert_eq!(by_number.backend_port, 31080);
        assert_eq!(by_number.protocol, Protocol::Http);
    }

    #[tokio::test]
    async fn test_port_443_is_https() {
        let resolved = registry()
            .resolve("default", &Backend::new("secure", ServicePortRef::Number(443)))
            .await
            .unwrap();
        assert_eq!(resolved.protocol, Protocol::Https);
    }

    #[tokio::test]
    async fn test_distinct_failures() {
        let resolver = registry();

        let missing = resolver
            .resolve("default", &Backend::new("nope", ServicePortRef::Number(80)))
            .await
            .unwrap_err();
        assert_eq!(missing.cause, ResolutionCause::ServiceNotFound);
        assert_eq!(missing.service_name, "nope");

        let wrong_port = resolver
            .resolve("default", &Backend::new("web", ServicePortRef::Number(8080)))
            .await
            .unwrap_err();
        assert_eq!(
            wrong_port.cause,
            ResolutionCause::PortNotFound(ServicePortRef::Number(8080))
        );

        let no_node_port = resolver
            .resolve("default", &Backend::new("internal", ServicePortRef::Number(80)))
            .await
            .unwrap_err();
        assert_eq!(no_node_port.cause, ResolutionCause::NoExternalPort(80));
    }

    #[test]
    fn test_protocol_heuristic() {
        assert_eq!(protocol_for_port(443, 443), Protocol::Https);
        assert_eq!(protocol_for_port(80, 443), Protocol::Http);
        assert_eq!(protocol_for_port(8443, 443), Protocol::Http);
        assert_eq!(protocol_for_port(8443, 8443), Protocol::Https);
    }
}
