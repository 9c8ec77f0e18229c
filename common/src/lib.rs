//! Common Types
//!
//! Routing-intent model, resource naming, identifier derivation and the compiled
//! gateway graph. Shared by the compiler and the control-plane adapter; no I/O.

pub mod graph;
pub mod ids;
pub mod intent;
pub mod naming;

pub use graph::{
    AddressVersion, AllocationMethod, ApplicationGateway, BackendAddressPool,
    BackendHttpSettings, CompiledGraph, FrontendIpConfiguration, FrontendPort,
    GatewayIpConfiguration, GatewaySku, HttpListener, InterfaceIpConfiguration,
    NetworkInterface, PathRule, Protocol, PublicAddress, RequestRoutingRule, RoutingRuleType,
    SubResource, Subnet, UrlPathMap,
};
pub use ids::TenantContext;
pub use intent::{
    Backend, IntentKey, IntentMeta, IntentSpec, IntentStatus, PathRoute, RoutingIntent, Rule,
    ServicePortRef, TlsBinding, INGRESS_CLASS_ANNOTATION,
};
pub use naming::{derive_name, fnv1a_hash, Discriminator, ListenerKey, ResourceKind};
