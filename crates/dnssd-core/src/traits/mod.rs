//! Core traits for the DNS-SD resolver
//!
//! - [`ResolverBackend`]: Issue resolve queries against a discovery daemon

pub mod resolver_backend;

pub use resolver_backend::{
    QueryHandle, ResolveUpdate, ResolverBackend, ResolverBackendFactory, UpdateSink,
};
