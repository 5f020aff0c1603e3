// # Resolver Backend Trait
//
// Defines the interface to the discovery daemon or protocol stack that
// actually sends resolve queries and parses SRV records.
//
// ## Implementations
//
// - mDNS (`mdns-sd`): `dnssd-backend-mdns` crate
// - Tests: scripted doubles in `dnssd-core/tests/common`
//
// ## Usage
//
// ```rust,ignore
// use dnssd_core::traits::{ResolveUpdate, ResolverBackend, UpdateSink};
// use dnssd_core::ServiceId;
//
// let backend = /* ResolverBackend implementation */;
// let id = ServiceId::new("printer", "_ipp._tcp", "local");
//
// let sink = UpdateSink::new(|update| println!("update: {:?}", update));
// let handle = backend.open_query(&id, sink)?;
//
// // ... updates arrive on the backend's own threads ...
//
// backend.close_query(handle);
// ```

use std::fmt;
use std::sync::Arc;

use crate::service::ServiceId;

/// One record update delivered by a backend for an open query
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolveUpdate {
    /// The service currently resolves to this host and port
    Available {
        /// Target host name from the SRV record
        host_name: String,
        /// Target port from the SRV record
        port: u16,
    },
    /// Resolution failed, timed out or the service was withdrawn
    Unavailable,
}

impl ResolveUpdate {
    /// Convenience constructor for an `Available` update
    pub fn available(host_name: impl Into<String>, port: u16) -> Self {
        Self::Available {
            host_name: host_name.into(),
            port,
        }
    }
}

/// Opaque token identifying an open backend query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QueryHandle(u64);

impl QueryHandle {
    /// Wrap a backend-chosen query id
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// The backend-chosen query id
    pub fn id(&self) -> u64 {
        self.0
    }
}

/// Callback a backend uses to push updates for one query
///
/// Cheap to clone and safe to call from any thread. Once the query has been
/// closed, deliveries are silently discarded by the receiving side, so a
/// backend racing `close_query` does not need its own synchronization.
#[derive(Clone)]
pub struct UpdateSink {
    deliver: Arc<dyn Fn(ResolveUpdate) + Send + Sync>,
}

impl UpdateSink {
    /// Create a sink from a delivery function
    pub fn new(deliver: impl Fn(ResolveUpdate) + Send + Sync + 'static) -> Self {
        Self {
            deliver: Arc::new(deliver),
        }
    }

    /// Deliver one update
    pub fn deliver(&self, update: ResolveUpdate) {
        (self.deliver)(update)
    }
}

impl fmt::Debug for UpdateSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpdateSink").finish_non_exhaustive()
    }
}

/// Trait for resolver backend implementations
///
/// A backend turns an identity triple into a stream of SRV-derived updates.
/// It knows nothing about resolve modes: one-shot behavior is implemented by
/// the `Resolver` closing the query after the first update.
///
/// # Contract
///
/// - `open_query` may call `sink.deliver` zero or more times, from any
///   thread, until the query is closed. It may also deliver inline before
///   it returns.
/// - Returning `Err` from `open_query` means no query was opened; the error
///   is reported to the resolver's subscribers as a failed resolution.
/// - `close_query` must be synchronous and idempotent, and must release every
///   resource held for the query (subscriptions, browse sessions, tasks).
/// - Backends must not retry on their own; retry is the caller's decision.
pub trait ResolverBackend: Send + Sync {
    /// Begin resolving `service`, delivering updates through `sink`
    ///
    /// # Returns
    ///
    /// - `Ok(QueryHandle)`: The query is open
    /// - `Err(Error)`: The query could not be started
    fn open_query(
        &self,
        service: &ServiceId,
        sink: UpdateSink,
    ) -> Result<QueryHandle, crate::Error>;

    /// Stop delivering updates for `handle` and release its resources
    fn close_query(&self, handle: QueryHandle);

    /// Get the backend name (for logging/debugging)
    fn backend_name(&self) -> &'static str;
}

/// Helper trait for constructing backends from configuration
pub trait ResolverBackendFactory: Send + Sync {
    /// Create a backend instance from configuration
    fn create(
        &self,
        config: &crate::config::BackendConfig,
    ) -> Result<Arc<dyn ResolverBackend>, crate::Error>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn sink_clones_share_the_delivery_function() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let recorder = Arc::clone(&seen);
        let sink = UpdateSink::new(move |update| recorder.lock().unwrap().push(update));

        let other = sink.clone();
        sink.deliver(ResolveUpdate::available("printer.local", 631));
        other.deliver(ResolveUpdate::Unavailable);

        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                ResolveUpdate::available("printer.local", 631),
                ResolveUpdate::Unavailable,
            ]
        );
    }
}
