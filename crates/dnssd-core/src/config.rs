//! Configuration types for the DNS-SD resolver
//!
//! This module defines all configuration structures used throughout the crate.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main configuration: which backend to use and how resolvers behave
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DnssdConfig {
    /// Backend configuration
    #[serde(default)]
    pub backend: BackendConfig,

    /// Resolver settings
    #[serde(default)]
    pub resolver: ResolverConfig,
}

impl DnssdConfig {
    /// Create a new configuration with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        self.backend.validate()?;
        self.resolver.validate()?;

        Ok(())
    }
}

/// Backend configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BackendConfig {
    /// Multicast DNS on the `local` domain
    #[default]
    Mdns,

    /// Custom backend
    Custom {
        /// Factory name to use
        factory: String,
        /// Custom configuration data
        config: serde_json::Value,
    },
}

impl BackendConfig {
    /// Validate the backend configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        match self {
            BackendConfig::Mdns => Ok(()),
            BackendConfig::Custom { factory, config } => {
                if factory.is_empty() {
                    return Err(crate::Error::config("Custom backend factory cannot be empty"));
                }
                if config.is_null() {
                    return Err(crate::Error::config("Custom backend config cannot be null"));
                }
                Ok(())
            }
        }
    }

    /// Get the backend type name
    pub fn type_name(&self) -> &str {
        match self {
            BackendConfig::Mdns => "mdns",
            BackendConfig::Custom { factory, .. } => factory,
        }
    }
}

/// Resolver configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolverConfig {
    /// Upper bound on how long a one-shot `resolve()` waits for the backend
    /// (in milliseconds)
    ///
    /// When the bound elapses the resolution is reported as failed.
    /// `None` waits indefinitely. Monitoring sessions are never timed out.
    #[serde(default)]
    pub resolve_timeout_ms: Option<u64>,
}

impl ResolverConfig {
    /// Set the one-shot resolve timeout
    pub fn with_resolve_timeout(mut self, timeout: Duration) -> Self {
        self.resolve_timeout_ms = Some(timeout.as_millis().try_into().unwrap_or(u64::MAX));
        self
    }

    /// The one-shot resolve timeout, if any
    pub fn resolve_timeout(&self) -> Option<Duration> {
        self.resolve_timeout_ms.map(Duration::from_millis)
    }

    /// Validate the resolver configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.resolve_timeout_ms == Some(0) {
            return Err(crate::Error::config(
                "Resolve timeout must be > 0 (omit it to wait indefinitely)",
            ));
        }
        Ok(())
    }
}
