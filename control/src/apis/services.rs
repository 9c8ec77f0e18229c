//! Service registry backed by the Kubernetes API

use crate::compiler::resolver::{ServicePortRecord, ServiceRecord, ServiceRegistry};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Service;
use kube::api::Api;
use kube::{Client, ResourceExt};
use tracing::warn;

/// Looks services up on demand; nothing is cached between compiles
pub struct KubeServiceRegistry {
    client: Client,
}

impl KubeServiceRegistry {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

/// Registry view of a Service. Ports outside the u16 range are dropped.
pub fn service_record(service: &Service) -> ServiceRecord {
    let spec = service.spec.as_ref();
    let ports = spec
        .and_then(|spec| spec.ports.as_ref())
        .into_iter()
        .flatten()
        .filter_map(|port| {
            let number = match u16::try_from(port.port) {
                Ok(number) => number,
                Err(_) => {
                    warn!(
                        "Service {} has out-of-range port {}, ignoring",
                        service.name_any(),
                        port.port
                    );
                    return None;
                }
            };
            Some(ServicePortRecord {
                name: port.name.clone().filter(|name| !name.is_empty()),
                port: number,
                node_port: port.node_port.and_then(|n| u16::try_from(n).ok()),
            })
        })
        .collect();

    ServiceRecord {
        name: service.name_any(),
        cluster_ip: spec.and_then(|spec| spec.cluster_ip.clone()),
        ports,
    }
}

#[async_trait]
impl ServiceRegistry for KubeServiceRegistry {
    async fn service(&self, namespace: &str, name: &str) -> Result<Option<ServiceRecord>, String> {
        let api: Api<Service> = Api::namespaced(self.client.clone(), namespace);
        let service = api
            .get_opt(name)
            .await
            .map_err(|e| format!("failed to get service {}/{}: {}", namespace, name, e))?;

        Ok(service.as_ref().map(service_record))
    }
}
