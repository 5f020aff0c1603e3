// # dnssd-core
//
// Core library for resolving DNS-SD (zero-configuration) service instances.
//
// ## Architecture Overview
//
// Given a service identity triple (name, type, domain), this library finds
// the host name and port the service is reachable at, and optionally keeps
// following it as the advertiser's records change:
// - **ServiceReference**: Identity triple plus the current resolution
// - **ResolverBackend**: Trait for the discovery daemon that runs queries
// - **Resolver**: One-shot and monitoring resolution over a backend
// - **BackendRegistry**: Plugin-based registry for backends
//
// ## Design Principles
//
// 1. **Separation of Concerns**: Resolution state is separate from transports
// 2. **Event-Driven**: Backends push updates; resolvers never poll
// 3. **One Query**: A resolver never holds more than one open backend query
// 4. **Clean Teardown**: Dropping a resolver closes its query and silences it
//
// Enumerating which services exist (browsing) and looking up the IP address
// of a resolved host name are out of scope.

pub mod config;
pub mod error;
pub mod registry;
pub mod resolver;
pub mod service;
pub mod traits;

// Re-export core types for convenience
pub use config::{BackendConfig, DnssdConfig, ResolverConfig};
pub use error::{Error, Result};
pub use registry::BackendRegistry;
pub use resolver::{ResolveMode, ResolvedEvent, Resolver};
pub use service::{Endpoint, ServiceId, ServiceReference};
pub use traits::{QueryHandle, ResolveUpdate, ResolverBackend, UpdateSink};
