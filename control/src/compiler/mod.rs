//! Graph compiler
//!
//! Turns a routing intent into the full resource graph of one application
//! gateway plus its sibling public address and subnet. Stateless: every call
//! re-resolves backends and rebuilds the graph from scratch.

pub(crate) mod builders;
pub mod resolver;

use crate::config::GatewayDefaults;
use builders::GatewayScope;
use common::{
    ApplicationGateway, BackendHttpSettings, CompiledGraph, Discriminator, FrontendPort,
    IntentSpec, ListenerKey, PathRule, Protocol, ResourceKind, RoutingIntent, TenantContext,
};
use resolver::{protocol_for_port, BackendResolver, ResolutionError};
use std::collections::{BTreeMap, HashSet};
use thiserror::Error;
use tracing::{debug, warn};

/// Placeholder port of the default backend setting when an intent has no default backend
const PLACEHOLDER_BACKEND_PORT: u16 = 80;

/// Compilation errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CompileError {
    #[error("{feature} is not supported")]
    Unsupported { feature: String },

    #[error(transparent)]
    Resolution(#[from] ResolutionError),
}

/// Compiles routing intents into gateway graphs
#[derive(Debug, Clone)]
pub struct GraphCompiler {
    tenant: TenantContext,
    defaults: GatewayDefaults,
}

impl GraphCompiler {
    pub fn new(tenant: TenantContext, defaults: GatewayDefaults) -> Self {
        Self { tenant, defaults }
    }

    pub fn tenant(&self) -> &TenantContext {
        &self.tenant
    }

    /// Compile one intent.
    ///
    /// Fails before any resolver call when TLS is declared, and aborts on the
    /// first backend that cannot be resolved. No partial graph is returned.
    pub async fn compile(
        &self,
        intent: &RoutingIntent,
        location: &str,
        resolver: &dyn BackendResolver,
        attachments: Vec<String>,
    ) -> Result<CompiledGraph, CompileError> {
        if !intent.spec.tls.is_empty() {
            return Err(CompileError::Unsupported {
                feature: "tls".to_string(),
            });
        }

        let namespace = intent.meta.namespace.as_str();
        let scope = GatewayScope::new(&self.tenant, intent.name());

        // Listener key -> entry-point settings override
        let mut listeners: BTreeMap<ListenerKey, Option<String>> = BTreeMap::new();

        let default_settings_name =
            scope.name(ResourceKind::DefaultBackendSettings, Discriminator::None);
        let default_settings = match &intent.spec.default_backend {
            Some(backend) => {
                let resolved = resolver.resolve(namespace, backend).await?;
                listeners
                    .entry(ListenerKey::new(resolved.frontend_port, ""))
                    .or_insert(None);
                builders::backend_settings(
                    &scope,
                    default_settings_name,
                    resolved.protocol,
                    resolved.backend_port,
                )
            }
            None => builders::backend_settings(
                &scope,
                default_settings_name,
                Protocol::Http,
                PLACEHOLDER_BACKEND_PORT,
            ),
        };

        for path in duplicate_paths(&intent.spec) {
            warn!(
                "Intent {}/{} declares path {} more than once, emitting every rule",
                namespace,
                intent.name(),
                path
            );
        }

        let mut settings: Vec<BackendHttpSettings> = vec![default_settings];
        let mut path_rules: Vec<PathRule> = Vec::new();
        let mut index = 0usize;

        for rule in &intent.spec.rules {
            for route in &rule.paths {
                let resolved = resolver.resolve(namespace, &route.backend).await?;
                let key = ListenerKey::new(resolved.frontend_port, rule.host.as_str());

                let setting = builders::backend_settings(
                    &scope,
                    scope.name(ResourceKind::BackendSettings, Discriminator::Index(index)),
                    resolved.protocol,
                    resolved.backend_port,
                );

                let entry = listeners.entry(key).or_insert(None);
                if route.path.is_empty() {
                    // Last path-less route for a listener wins
                    *entry = Some(setting.id.clone());
                } else {
                    path_rules.push(builders::path_rule(&scope, index, &route.path, &setting));
                }

                settings.push(setting);
                index += 1;
            }
        }

        let url_path_map = (!path_rules.is_empty())
            .then(|| builders::url_path_map(&scope, &settings[0], path_rules));
        let url_path_map_id = url_path_map.as_ref().map(|map| map.id.clone());

        let frontend_ip = builders::frontend_ip_configuration(&scope);
        let mut frontend_ports = Vec::new();
        let mut http_listeners = Vec::with_capacity(listeners.len());
        let mut routing_rules = Vec::with_capacity(listeners.len());

        for (key, entry_point) in &listeners {
            let port = builders::frontend_port(&scope, key.port);
            if !frontend_ports
                .iter()
                .any(|existing: &FrontendPort| existing.name.eq_ignore_ascii_case(&port.name))
            {
                frontend_ports.push(port.clone());
            }

            let listener = builders::http_listener(
                &scope,
                key,
                &frontend_ip,
                &port,
                protocol_for_port(key.port, self.defaults.secure_port),
            );

            let settings_id = entry_point.as_deref().unwrap_or(settings[0].id.as_str());
            routing_rules.push(builders::routing_rule(
                &scope,
                key,
                &listener,
                settings_id,
                url_path_map_id.clone(),
            ));
            http_listeners.push(listener);
        }

        debug!(
            "Compiled intent {}/{}: {} listener(s), {} backend setting(s), path map: {}",
            namespace,
            intent.name(),
            http_listeners.len(),
            settings.len(),
            url_path_map.is_some()
        );

        let gateway = ApplicationGateway {
            name: scope.gateway_name.clone(),
            location: location.to_string(),
            sku: builders::sku(&self.defaults),
            gateway_ip_configurations: vec![builders::gateway_ip_configuration(
                &scope,
                &self.defaults.subnet_name,
            )],
            frontend_ip_configurations: vec![frontend_ip],
            frontend_ports,
            backend_address_pools: vec![builders::backend_pool(&scope)],
            backend_http_settings_collection: settings,
            http_listeners,
            url_path_maps: url_path_map.map(|map| vec![map]),
            request_routing_rules: routing_rules,
        };

        Ok(CompiledGraph {
            gateway,
            public_address: builders::public_address(&scope, location),
            subnet: builders::subnet(&self.tenant, &self.defaults),
            attachments,
        })
    }
}

/// Paths declared by more than one route, in first-repeat order
///
/// Routes of every host land in the one shared path map, so a path repeated
/// under different hosts collides as well.
pub fn duplicate_paths(spec: &IntentSpec) -> Vec<&str> {
    let mut seen = HashSet::new();
    let mut duplicates = Vec::new();
    for route in spec.rules.iter().flat_map(|rule| rule.paths.iter()) {
        let path = route.path.as_str();
        if !path.is_empty() && !seen.insert(path) && !duplicates.contains(&path) {
            duplicates.push(path);
        }
    }
    duplicates
}
