//! Ingress to routing intent conversion
//!
//! Maps `networking.k8s.io/v1` Ingress objects onto the compiler's intent
//! model. Only service backends with an explicit port are representable.

use crate::error::ControllerError;
use common::{
    Backend, IntentMeta, IntentSpec, IntentStatus, PathRoute, RoutingIntent, Rule,
    ServicePortRef, TlsBinding,
};
use k8s_openapi::api::networking::v1::{Ingress, IngressBackend};
use kube::ResourceExt;

/// Identifying metadata of an Ingress
pub fn intent_meta(ingress: &Ingress) -> IntentMeta {
    IntentMeta {
        namespace: ingress.namespace().unwrap_or_else(|| "default".to_string()),
        name: ingress.name_any(),
        uid: ingress.uid(),
        labels: ingress.labels().clone(),
        annotations: ingress.annotations().clone(),
        class_name: ingress
            .spec
            .as_ref()
            .and_then(|spec| spec.ingress_class_name.clone()),
    }
}

/// Convert an Ingress into a routing intent
///
/// Missing hosts and paths become empty strings, which match everything.
pub fn intent_from_ingress(ingress: &Ingress) -> Result<RoutingIntent, ControllerError> {
    let meta = intent_meta(ingress);
    let mut spec = IntentSpec::default();

    if let Some(ingress_spec) = &ingress.spec {
        spec.default_backend = ingress_spec
            .default_backend
            .as_ref()
            .map(backend_from)
            .transpose()?;

        for rule in ingress_spec.rules.iter().flatten() {
            let paths = rule
                .http
                .iter()
                .flat_map(|http| http.paths.iter())
                .map(|path| -> Result<PathRoute, ControllerError> {
                    Ok(PathRoute {
                        path: path.path.clone().unwrap_or_default(),
                        backend: backend_from(&path.backend)?,
                    })
                })
                .collect::<Result<Vec<_>, _>>()?;

            spec.rules.push(Rule {
                host: rule.host.clone().unwrap_or_default(),
                paths,
            });
        }

        spec.tls = ingress_spec
            .tls
            .iter()
            .flatten()
            .map(|tls| TlsBinding {
                hosts: tls.hosts.clone().unwrap_or_default(),
                secret_name: tls.secret_name.clone(),
            })
            .collect();
    }

    let addresses = ingress
        .status
        .as_ref()
        .and_then(|status| status.load_balancer.as_ref())
        .and_then(|lb| lb.ingress.as_ref())
        .map(|entries| entries.iter().filter_map(|e| e.ip.clone()).collect())
        .unwrap_or_default();

    Ok(RoutingIntent {
        meta,
        spec,
        status: IntentStatus { addresses },
    })
}

fn backend_from(backend: &IngressBackend) -> Result<Backend, ControllerError> {
    let service = match (&backend.service, &backend.resource) {
        (Some(service), _) => service,
        (None, Some(resource)) => {
            return Err(ControllerError::unsupported(format!(
                "resource backend {}/{}",
                resource.kind, resource.name
            )))
        }
        (None, None) => return Err(ControllerError::unsupported("backend without a service")),
    };

    let port = service.port.as_ref().and_then(|port| {
        match (port.number, &port.name) {
            (Some(number), _) => u16::try_from(number).ok().map(ServicePortRef::Number),
            (None, Some(name)) if !name.is_empty() => Some(ServicePortRef::Name(name.clone())),
            _ => None,
        }
    });

    match port {
        Some(port) => Ok(Backend::new(&service.name, port)),
        None => Err(ControllerError::unsupported(format!(
            "service backend {} without a port",
            service.name
        ))),
    }
}
