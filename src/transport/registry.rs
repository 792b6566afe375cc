//! Scheme → transport mapping.
//!
//! # Responsibilities
//! - Register transports under every scheme they claim
//! - Reject a scheme claimed by two different transports
//! - Freeze into an immutable registry for lock-free lookups

use std::collections::HashMap;
use std::sync::Arc;

use super::{Transport, TransportConfig, TransportFactory};
use crate::error::{GatewayError, Result};

/// Mutable registration phase, used only during startup.
#[derive(Default)]
pub struct TransportRegistryBuilder {
    transports: Vec<Arc<dyn Transport>>,
    by_scheme: HashMap<String, Arc<dyn Transport>>,
}

impl TransportRegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a transport under all of its schemes.
    ///
    /// Re-registering the same instance is a no-op. Nothing is recorded
    /// when any scheme collides with a different transport.
    pub fn register(&mut self, transport: Arc<dyn Transport>) -> Result<()> {
        let schemes: Vec<String> = transport
            .scheme_names()
            .iter()
            .map(|s| s.to_ascii_lowercase())
            .collect();

        for scheme in &schemes {
            if let Some(existing) = self.by_scheme.get(scheme) {
                if !same_instance(existing, &transport) {
                    return Err(GatewayError::DuplicateScheme {
                        scheme: scheme.clone(),
                        existing: existing.name().to_string(),
                    });
                }
            }
        }

        if !self.transports.iter().any(|t| same_instance(t, &transport)) {
            self.transports.push(Arc::clone(&transport));
        }
        for scheme in schemes {
            tracing::debug!(scheme = %scheme, transport = transport.name(), "Scheme registered");
            self.by_scheme.insert(scheme, Arc::clone(&transport));
        }
        Ok(())
    }

    /// Build a transport through its factory and register it.
    pub fn register_factory(
        &mut self,
        factory: &dyn TransportFactory,
        config: &TransportConfig,
    ) -> Result<Arc<dyn Transport>> {
        let transport = factory.new_transport(config)?;
        self.register(Arc::clone(&transport))?;
        Ok(transport)
    }

    pub fn build(self) -> TransportRegistry {
        tracing::info!(
            transports = self.transports.len(),
            schemes = self.by_scheme.len(),
            "Transport registry frozen"
        );
        TransportRegistry {
            transports: self.transports,
            by_scheme: self.by_scheme,
        }
    }
}

/// Immutable scheme lookup table, shared freely once built.
pub struct TransportRegistry {
    transports: Vec<Arc<dyn Transport>>,
    by_scheme: HashMap<String, Arc<dyn Transport>>,
}

impl TransportRegistry {
    pub fn builder() -> TransportRegistryBuilder {
        TransportRegistryBuilder::new()
    }

    /// Transport for a scheme, matched case-insensitively.
    pub fn resolve(&self, scheme: &str) -> Result<Arc<dyn Transport>> {
        self.by_scheme
            .get(&scheme.to_ascii_lowercase())
            .cloned()
            .ok_or_else(|| GatewayError::UnknownScheme(scheme.to_string()))
    }

    /// Default port of a scheme; `None` when the transport has none.
    pub fn default_port(&self, scheme: &str) -> Result<Option<u16>> {
        let transport = self.resolve(scheme)?;
        Ok(transport.default_port(&scheme.to_ascii_lowercase()))
    }

    pub fn transports(&self) -> &[Arc<dyn Transport>] {
        &self.transports
    }

    /// Every registered scheme, sorted.
    pub fn schemes(&self) -> Vec<String> {
        let mut schemes: Vec<String> = self.by_scheme.keys().cloned().collect();
        schemes.sort();
        schemes
    }
}

impl std::fmt::Debug for TransportRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportRegistry")
            .field("schemes", &self.schemes())
            .finish()
    }
}

fn same_instance(a: &Arc<dyn Transport>, b: &Arc<dyn Transport>) -> bool {
    std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::pipe::PipeTransport;
    use crate::transport::tcp::TcpTransport;
    use crate::transport::TransportContext;

    #[test]
    fn resolves_registered_schemes() {
        let ctx = TransportContext::default();
        let mut builder = TransportRegistry::builder();
        builder.register(Arc::new(TcpTransport::new(&ctx))).unwrap();
        builder.register(Arc::new(PipeTransport::new(&ctx))).unwrap();
        let registry = builder.build();

        assert_eq!(registry.resolve("TCP").unwrap().name(), "tcp");
        assert_eq!(registry.default_port("pipe").unwrap(), None);
        assert_eq!(registry.schemes(), vec!["pipe", "tcp"]);
        assert!(matches!(registry.resolve("gopher"), Err(GatewayError::UnknownScheme(_))));
    }

    #[test]
    fn same_instance_registers_twice() {
        let ctx = TransportContext::default();
        let tcp: Arc<dyn Transport> = Arc::new(TcpTransport::new(&ctx));
        let mut builder = TransportRegistry::builder();
        builder.register(Arc::clone(&tcp)).unwrap();
        builder.register(Arc::clone(&tcp)).unwrap();
        assert_eq!(builder.build().transports().len(), 1);
    }

    #[test]
    fn different_instance_same_scheme_fails() {
        let ctx = TransportContext::default();
        let mut builder = TransportRegistry::builder();
        builder.register(Arc::new(TcpTransport::new(&ctx))).unwrap();
        let err = builder.register(Arc::new(TcpTransport::new(&ctx))).unwrap_err();
        assert!(matches!(err, GatewayError::DuplicateScheme { ref scheme, .. } if scheme == "tcp"));
    }
}
