//! Kubernetes API integrations
//!
//! Ingress watching, status write-back, service lookup and node inventory.

pub mod ingress;
pub mod metrics;
pub mod nodes;
pub mod services;
