//! Plugin-based backend registry
//!
//! Backends register a factory under a type name; the registry builds a
//! backend from a [`BackendConfig`] without the caller naming a concrete
//! type.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use dnssd_core::registry::BackendRegistry;
//! use dnssd_core::config::BackendConfig;
//!
//! let registry = BackendRegistry::new();
//! dnssd_backend_mdns::register(&registry);
//!
//! let backend = registry.create_backend(&BackendConfig::Mdns)?;
//! ```

use crate::config::BackendConfig;
use crate::error::{Error, Result};
use crate::traits::{ResolverBackend, ResolverBackendFactory};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

/// Registry of backend factories keyed by type name
///
/// ## Thread Safety
///
/// The registry uses interior mutability with RwLock, allowing concurrent
/// reads and exclusive writes.
#[derive(Default)]
pub struct BackendRegistry {
    backends: RwLock<HashMap<String, Arc<dyn ResolverBackendFactory>>>,
}

impl BackendRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a backend factory
    ///
    /// # Parameters
    ///
    /// - `name`: Backend type name (e.g., "mdns")
    /// - `factory`: Factory object for creating backend instances
    ///
    /// Registering the same name twice replaces the earlier factory.
    pub fn register_backend(
        &self,
        name: impl Into<String>,
        factory: Box<dyn ResolverBackendFactory>,
    ) {
        let mut backends = self.backends.write().unwrap_or_else(PoisonError::into_inner);
        backends.insert(name.into(), Arc::from(factory));
    }

    /// Create a backend from configuration
    ///
    /// # Returns
    ///
    /// - `Ok(Arc<dyn ResolverBackend>)`: Created backend instance
    /// - `Err(Error)`: If the backend type is not registered or creation fails
    pub fn create_backend(&self, config: &BackendConfig) -> Result<Arc<dyn ResolverBackend>> {
        config.validate()?;

        let backend_type = config.type_name();
        let factory = {
            let backends = self.backends.read().unwrap_or_else(PoisonError::into_inner);
            backends
                .get(backend_type)
                .cloned()
                .ok_or_else(|| Error::not_found(format!("Unknown backend type: {}", backend_type)))?
        };

        factory.create(config)
    }

    /// List all registered backend types
    pub fn list_backends(&self) -> Vec<String> {
        let backends = self.backends.read().unwrap_or_else(PoisonError::into_inner);
        backends.keys().cloned().collect()
    }

    /// Check if a backend type is registered
    pub fn has_backend(&self, name: &str) -> bool {
        let backends = self.backends.read().unwrap_or_else(PoisonError::into_inner);
        backends.contains_key(name)
    }
}
