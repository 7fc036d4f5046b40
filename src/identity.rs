//! Client identifier sent to relays and stores as `x-client-info`.

use std::sync::OnceLock;

/// Process-wide client identifier, created on first use.
///
/// Constructed once at startup and shared by reference; the value is
/// write-once / read-many.
#[derive(Debug, Default)]
pub struct ClientIdentity {
    configured: Option<String>,
    cached: OnceLock<String>,
}

impl ClientIdentity {
    /// Identity that generates a random id lazily.
    pub fn new() -> Self {
        Self::default()
    }

    /// Identity with a fixed id.
    pub fn fixed(id: impl Into<String>) -> Self {
        Self {
            configured: Some(id.into()),
            cached: OnceLock::new(),
        }
    }

    /// `x-client-info` header value.
    pub fn header_value(&self) -> &str {
        self.cached.get_or_init(|| {
            let id = self
                .configured
                .clone()
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
            format!("nagare/{} {id}", crate::VERSION)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_id_is_stable() {
        let identity = ClientIdentity::new();
        let first = identity.header_value().to_string();
        assert!(first.starts_with("nagare/"));
        assert_eq!(identity.header_value(), first);
    }

    #[test]
    fn fixed_id_is_used() {
        let identity = ClientIdentity::fixed("web-42");
        assert!(identity.header_value().ends_with(" web-42"));
    }
}
