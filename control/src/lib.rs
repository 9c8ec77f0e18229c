//! Application Gateway Ingress Controller Library
//!
//! Compiles routing intents into application gateway resource graphs and
//! reconciles them against the external control plane.

pub mod apis;
pub mod cloud;
pub mod compiler;
pub mod config;
pub mod error;
pub mod reconciler;
