use crate::vendor::{ProtocolHandler, Vendor};

/// Static lookup from protocol tag to handler. Tags with no dedicated
/// handler resolve to the `generic-http` dialect instead of failing.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProtocolHandlerRegistry;

impl ProtocolHandlerRegistry {
    pub fn resolve(&self, tag: &str) -> Vendor {
        match Vendor::from_tag(tag) {
            Some(vendor) => vendor,
            None => {
                tracing::debug!("No handler for protocol {:?}, using {}", tag, Vendor::Generic.tag());
                Vendor::Generic
            }
        }
    }

    pub fn handler(&self, tag: &str) -> &'static dyn ProtocolHandler {
        self.resolve(tag).handler()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vendor::PROBE_ORDER;

    #[test]
    fn test_known_tags_resolve_to_their_vendor() {
        let registry = ProtocolHandlerRegistry;
        for vendor in PROBE_ORDER {
            assert_eq!(registry.resolve(vendor.tag()), vendor);
        }
        assert_eq!(registry.resolve("generic-http"), Vendor::Generic);
    }

    #[test]
    fn test_unknown_tag_falls_back() {
        let registry = ProtocolHandlerRegistry;
        assert_eq!(registry.resolve("sonoff-diy"), Vendor::Generic);
        assert_eq!(registry.resolve(""), Vendor::Generic);
    }
}
