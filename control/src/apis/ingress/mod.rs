//! Ingress integration
//!
//! Ingress objects are the cluster's routing intents.

pub mod intent;
pub mod status;
pub mod watcher;

pub use intent::intent_from_ingress;
pub use status::KubeIntentSink;
pub use watcher::{watch_nodes, IngressWatcher};
