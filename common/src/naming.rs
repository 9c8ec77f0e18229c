//! Resource naming
//!
//! Deterministic names for every resource of a compiled graph. Names depend only
//! on the intent name, the resource kind and a discriminator, never on map or
//! set iteration order, so recompiling an unchanged intent reproduces them.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Prefix shared by every top-level resource owned by this controller
pub const GATEWAY_NAME_PREFIX: &str = "k8s-aaging-";

/// De-duplication key for front-end wiring: (frontend port, host)
///
/// Ordered by port, then host. An empty host matches any host header.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ListenerKey {
    pub port: u16,
    pub host: String,
}

impl ListenerKey {
    #[inline]
    pub fn new(port: u16, host: impl Into<String>) -> Self {
        Self {
            port,
            host: host.into(),
        }
    }

    /// Name suffix shared by the listener and routing rule of this key
    pub fn suffix(&self) -> String {
        if self.host.is_empty() {
            return self.port.to_string();
        }
        format!("{}-{}", self.port, host_label(&self.host))
    }
}

impl fmt::Display for ListenerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.is_empty() {
            write!(f, "*:{}", self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// Kinds of resources in a compiled graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Gateway,
    PublicAddress,
    GatewayIpConfiguration,
    FrontendIpConfiguration,
    BackendPool,
    DefaultBackendSettings,
    BackendSettings,
    PathRule,
    UrlPathMap,
    FrontendPort,
    Listener,
    RoutingRule,
}

/// Per-resource discriminator for kinds that occur more than once
#[derive(Debug, Clone, Copy)]
pub enum Discriminator<'a> {
    None,
    Index(usize),
    Port(u16),
    Listener(&'a ListenerKey),
}

/// Derive the name of one resource of an intent's graph.
///
/// # Panics
///
/// Panics if `intent_name` is empty, or if a kind is given a discriminator it
/// does not take. Both are caller bugs.
pub fn derive_name(intent_name: &str, kind: ResourceKind, discriminator: Discriminator<'_>) -> String {
    assert!(!intent_name.is_empty(), "intent name must not be empty");

    match (kind, discriminator) {
        (ResourceKind::Gateway, Discriminator::None) => {
            format!("{}{}", GATEWAY_NAME_PREFIX, intent_name)
        }
        (ResourceKind::PublicAddress, Discriminator::None) => {
            format!("{}{}-public-ip", GATEWAY_NAME_PREFIX, intent_name)
        }
        (ResourceKind::GatewayIpConfiguration, Discriminator::None) => {
            "k8sgatewayipcfg".to_string()
        }
        (ResourceKind::FrontendIpConfiguration, Discriminator::None) => {
            "k8spublicipcfg".to_string()
        }
        (ResourceKind::BackendPool, Discriminator::None) => "k8sbackendpool".to_string(),
        (ResourceKind::DefaultBackendSettings, Discriminator::None) => {
            "k8s-defaultbackend-settings".to_string()
        }
        (ResourceKind::UrlPathMap, Discriminator::None) => "k8surlpathmap".to_string(),
        (ResourceKind::BackendSettings, Discriminator::Index(i)) => {
            format!("k8s-backend{}-settings", i)
        }
        (ResourceKind::PathRule, Discriminator::Index(i)) => format!("k8s-backend{}-pathrule", i),
        (ResourceKind::FrontendPort, Discriminator::Port(port)) => format!("k8s-fep-{}", port),
        (ResourceKind::Listener, Discriminator::Listener(key)) => {
            format!("k8s-listener-{}", key.suffix())
        }
        (ResourceKind::RoutingRule, Discriminator::Listener(key)) => {
            format!("k8s-routingrule-{}", key.suffix())
        }
        (kind, discriminator) => panic!(
            "resource kind {:?} does not take discriminator {:?}",
            kind, discriminator
        ),
    }
}

/// Host rendered as a name fragment.
///
/// Dots become dashes. Anything outside `[a-z0-9.]` would make that mapping
/// ambiguous (`a.b` vs `a-b`), so such hosts also carry a hash of the original.
fn host_label(host: &str) -> String {
    let plain = host
        .bytes()
        .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'.');

    let label: String = host
        .chars()
        .map(|c| {
            if c.is_ascii_lowercase() || c.is_ascii_digit() {
                c
            } else {
                '-'
            }
        })
        .collect();

    if plain {
        label
    } else {
        format!("{}-{:08x}", label, fnv1a_hash(host.as_bytes()) as u32)
    }
}

/// FNV-1a hash function for stable name hashing
pub const fn fnv1a_hash(bytes: &[u8]) -> u64 {
    const FNV_OFFSET: u64 = 0xcbf29ce484222325;
    const FNV_PRIME: u64 = 0x100000001b3;

    let mut hash = FNV_OFFSET;
    let mut i = 0;
    while i < bytes.len() {
        hash ^= bytes[i] as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
        i += 1;
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_top_level_names() {
        assert_eq!(
            derive_name("web", ResourceKind::Gateway, Discriminator::None),
            "k8s-aaging-web"
        );
        assert_eq!(
            derive_name("web", ResourceKind::PublicAddress, Discriminator::None),
            "k8s-aaging-web-public-ip"
        );
    }

    #[test]
    fn test_indexed_names() {
        assert_eq!(
            derive_name("web", ResourceKind::BackendSettings, Discriminator::Index(3)),
            "k8s-backend3-settings"
        );
        assert_eq!(
            derive_name("web", ResourceKind::PathRule, Discriminator::Index(0)),
            "k8s-backend0-pathrule"
        );
        assert_eq!(
            derive_name("web", ResourceKind::FrontendPort, Discriminator::Port(80)),
            "k8s-fep-80"
        );
    }

    #[test]
    fn test_listener_names() {
        let any_host = ListenerKey::new(80, "");
        let host = ListenerKey::new(80, "a.example.com");

        assert_eq!(
            derive_name("web", ResourceKind::Listener, Discriminator::Listener(&any_host)),
            "k8s-listener-80"
        );
        assert_eq!(
            derive_name("web", ResourceKind::RoutingRule, Discriminator::Listener(&host)),
            "k8s-routingrule-80-a-example-com"
        );
    }

    #[test]
    fn test_dash_and_dot_hosts_do_not_collide() {
        let dotted = ListenerKey::new(80, "a.b");
        let dashed = ListenerKey::new(80, "a-b");

        assert_eq!(dotted.suffix(), "80-a-b");
        assert_ne!(dotted.suffix(), dashed.suffix());
        assert!(dashed.suffix().starts_with("80-a-b-"));
    }

    #[test]
    fn test_wildcard_host_is_sanitized() {
        let key = ListenerKey::new(443, "*.example.com");
        let suffix = key.suffix();
        assert!(suffix.starts_with("443---example-com-"));
        assert!(!suffix.contains('*'));
        assert_eq!(suffix, key.suffix());
    }

    #[test]
    #[should_panic(expected = "intent name must not be empty")]
    fn test_empty_intent_name_panics() {
        derive_name("", ResourceKind::Gateway, Discriminator::None);
    }

    #[test]
    #[should_panic]
    fn test_wrong_discriminator_panics() {
        derive_name("web", ResourceKind::FrontendPort, Discriminator::None);
    }

    #[test]
    fn test_listener_key_ordering() {
        let mut keys = vec![
            ListenerKey::new(443, ""),
            ListenerKey::new(80, "b.example.com"),
            ListenerKey::new(80, ""),
        ];
        keys.sort();
        assert_eq!(keys[0], ListenerKey::new(80, ""));
        assert_eq!(keys[1], ListenerKey::new(80, "b.example.com"));
        assert_eq!(keys[2], ListenerKey::new(443, ""));
    }
}
