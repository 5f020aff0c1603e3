//! Service resolver
//!
//! The Resolver owns one [`ServiceReference`] and is responsible for:
//! - Opening at most one backend query at a time for that service
//! - Applying backend updates to the reference
//! - Notifying subscribers with a [`ResolvedEvent`] per applied update
//! - Closing the backend query on completion, cancellation and drop
//!
//! ## Architecture
//!
//! ```text
//!  caller                     ┌──────────────┐   open_query/close_query  ┌──────────────────┐
//!  resolve() / resolve_async()│   Resolver   │──────────────────────────▶│ ResolverBackend  │
//! ───────────────────────────▶│ (session +   │                           └──────────────────┘
//!                             │  reference)  │◀──────── UpdateSink ──────────────┘
//!                             └──────────────┘
//!                                     │
//!                                     ▼
//!                           ResolvedEvent channel(s)
//! ```
//!
//! ## State Machine
//!
//! ```text
//!   Idle ──resolve()/resolve_async()──▶ QueryOpen ──first update (one-shot)──▶ Idle
//!     ▲                                     │
//!     └──────────────cancel()───────────────┘
//!
//!   any state ──drop──▶ Closed
//! ```
//!
//! Leaving `QueryOpen` always closes the backend query. Each opened query
//! gets a fresh generation number and the sink handed to the backend only
//! applies updates for the generation that is still open, so late
//! deliveries after a close, a cancel or a drop are discarded.

use crate::config::ResolverConfig;
use crate::error::Result;
use crate::service::{Endpoint, ServiceId, ServiceReference};
use crate::traits::{QueryHandle, ResolveUpdate, ResolverBackend, UpdateSink};
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{mpsc, oneshot};
use tokio_stream::Stream;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, info, warn};

/// The `resolved` notification
///
/// Fired once per applied update: once for a one-shot `resolve()`, and once
/// per backend update for as long as a monitoring session stays open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedEvent {
    /// Whether the service resolved
    pub successful: bool,
    /// The endpoint the reference held right after this update
    pub endpoint: Option<Endpoint>,
}

/// Which resolve contract was last requested
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveMode {
    /// No resolve call yet
    None,
    /// Synchronous, single result
    OneShot,
    /// Persistent, every update
    Monitoring,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    Idle,
    QueryOpen {
        generation: u64,
        /// Absent until `open_query` returns
        handle: Option<QueryHandle>,
    },
    Closed,
}

/// Mutable state shared between the Resolver and its backend sinks
struct Session {
    reference: ServiceReference,
    state: SessionState,
    /// Contract of the most recent resolve call, and of the open query if any
    mode: ResolveMode,
    next_generation: u64,
    subscribers: Vec<mpsc::UnboundedSender<ResolvedEvent>>,
    /// Completion channel of an in-flight one-shot resolve
    first_result: Option<oneshot::Sender<ResolveUpdate>>,
}

impl Session {
    fn begin(&mut self, mode: ResolveMode) -> u64 {
        self.next_generation += 1;
        self.mode = mode;
        self.state = SessionState::QueryOpen {
            generation: self.next_generation,
            handle: None,
        };
        self.next_generation
    }

    fn is_current(&self, generation: u64) -> bool {
        matches!(self.state, SessionState::QueryOpen { generation: g, .. } if g == generation)
    }

    /// Record the backend handle; false if the query was abandoned meanwhile
    fn attach(&mut self, generation: u64, query: QueryHandle) -> bool {
        match &mut self.state {
            SessionState::QueryOpen {
                generation: g,
                handle,
                ..
            } if *g == generation => {
                *handle = Some(query);
                true
            }
            _ => false,
        }
    }

    /// Move an open query back to Idle, returning its backend handle
    fn take_open_handle(&mut self) -> Option<QueryHandle> {
        match self.state {
            SessionState::QueryOpen { handle, .. } => {
                self.state = SessionState::Idle;
                handle
            }
            _ => None,
        }
    }

    fn deliver(&mut self, generation: u64, update: ResolveUpdate) {
        if !self.is_current(generation) {
            debug!(
                "Dropping update for closed query of {} (generation {})",
                self.reference.id(),
                generation
            );
            return;
        }

        if self.mode == ResolveMode::Monitoring {
            let successful = self.apply(update);
            self.notify(successful);
            return;
        }

        // One-shot: only the first update counts, resolve() applies it
        match self.first_result.take() {
            Some(tx) => {
                let _ = tx.send(update);
            }
            None => debug!("Ignoring extra update for {}", self.reference.id()),
        }
    }

    /// Backend refused to open the query
    fn fail_start(&mut self, generation: u64) {
        if !self.is_current(generation) {
            return;
        }
        match self.first_result.take() {
            Some(tx) => {
                let _ = tx.send(ResolveUpdate::Unavailable);
            }
            None => {
                self.state = SessionState::Idle;
                let successful = self.apply(ResolveUpdate::Unavailable);
                self.notify(successful);
            }
        }
    }

    /// Apply one update to the reference, returning whether it resolved
    fn apply(&mut self, update: ResolveUpdate) -> bool {
        let endpoint = match update {
            ResolveUpdate::Available { host_name, port } => match Endpoint::new(host_name, port) {
                Ok(endpoint) => Some(endpoint),
                Err(e) => {
                    warn!("Malformed record for {}: {}", self.reference.id(), e);
                    None
                }
            },
            ResolveUpdate::Unavailable => None,
        };

        match &endpoint {
            Some(endpoint) => debug!("{} resolved to {}", self.reference.id(), endpoint),
            None => debug!("{} is unresolved", self.reference.id()),
        }

        let successful = endpoint.is_some();
        self.reference.set_endpoint(endpoint);
        successful
    }

    fn notify(&mut self, successful: bool) {
        let event = ResolvedEvent {
            successful,
            endpoint: self.reference.endpoint().cloned(),
        };
        // Receivers that were dropped are pruned
        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }
}

fn lock(session: &Mutex<Session>) -> MutexGuard<'_, Session> {
    session.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Resolves one DNS-SD service to its host name and port
///
/// ## Lifecycle
///
/// 1. Create with [`Resolver::new()`], keeping the returned event receiver
/// 2. Call [`Resolver::resolve()`] for one answer, or
///    [`Resolver::resolve_async()`] to keep following the service
/// 3. Read [`Resolver::reference()`] or consume [`ResolvedEvent`]s
/// 4. Drop to tear down; no event is delivered once drop has started
///
/// ## Threading
///
/// Backend updates may arrive on any thread. Operations on one Resolver are
/// expected to be issued by a single owner; the internal lock only keeps the
/// reference consistent with concurrently arriving updates.
pub struct Resolver {
    session: Arc<Mutex<Session>>,
    backend: Arc<dyn ResolverBackend>,
    config: ResolverConfig,
}

impl Resolver {
    /// Create a resolver for `reference`
    ///
    /// # Returns
    ///
    /// A tuple of (resolver, event_receiver) where event_receiver yields
    /// every `resolved` notification
    pub fn new(
        reference: ServiceReference,
        backend: Arc<dyn ResolverBackend>,
        config: ResolverConfig,
    ) -> Result<(Self, mpsc::UnboundedReceiver<ResolvedEvent>)> {
        config.validate()?;

        let (tx, rx) = mpsc::unbounded_channel();

        let session = Session {
            reference,
            state: SessionState::Idle,
            mode: ResolveMode::None,
            next_generation: 0,
            subscribers: vec![tx],
            first_result: None,
        };

        let resolver = Self {
            session: Arc::new(Mutex::new(session)),
            backend,
            config,
        };

        Ok((resolver, rx))
    }

    /// Resolve and keep monitoring the service
    ///
    /// Returns immediately. Every update the backend delivers afterwards is
    /// applied and announced, until [`Resolver::cancel()`] or drop. If the
    /// backend cannot start the query, a failed [`ResolvedEvent`] is sent
    /// before this call returns.
    ///
    /// Does nothing while a query is already open.
    pub fn resolve_async(&self) {
        let generation = {
            let mut session = self.lock();
            let state = session.state;
            match state {
                SessionState::Closed => return,
                SessionState::QueryOpen { .. } => {
                    debug!(
                        "Query for {} already open ({:?}), not opening another",
                        session.reference.id(),
                        session.mode
                    );
                    return;
                }
                SessionState::Idle => session.begin(ResolveMode::Monitoring),
            }
        };

        info!("Monitoring {}", self.id());
        self.open(generation);
    }

    /// Resolve the service once
    ///
    /// Waits until the backend delivers a first result or fails, applies it,
    /// closes the query and notifies subscribers before returning. An open
    /// monitoring session is closed first, so no query remains open after
    /// this returns.
    ///
    /// # Returns
    ///
    /// The same value carried by the [`ResolvedEvent`] sent during this call
    pub async fn resolve(&self) -> bool {
        let (tx, rx) = oneshot::channel();

        let (generation, superseded) = {
            let mut session = self.lock();
            if session.state == SessionState::Closed {
                return false;
            }
            let superseded = session.take_open_handle();
            session.first_result = Some(tx);
            (session.begin(ResolveMode::OneShot), superseded)
        };

        if let Some(handle) = superseded {
            debug!("Closing monitoring query for {} before one-shot resolve", self.id());
            self.backend.close_query(handle);
        }

        let mut guard = OneShotGuard {
            resolver: self,
            generation,
            armed: true,
        };

        self.open(generation);

        let update = match self.config.resolve_timeout() {
            Some(limit) => match tokio::time::timeout(limit, rx).await {
                Ok(result) => result.unwrap_or(ResolveUpdate::Unavailable),
                Err(_) => {
                    warn!("Resolving {} timed out after {:?}", self.id(), limit);
                    ResolveUpdate::Unavailable
                }
            },
            None => rx.await.unwrap_or(ResolveUpdate::Unavailable),
        };

        guard.armed = false;
        self.finish_one_shot(generation, update)
    }

    /// Whether the reference currently holds a resolved host and port
    pub fn is_resolved(&self) -> bool {
        self.lock().reference.is_resolved()
    }

    /// Snapshot of the reference
    pub fn reference(&self) -> ServiceReference {
        self.lock().reference.clone()
    }

    /// Identity of the service being resolved
    pub fn id(&self) -> ServiceId {
        self.lock().reference.id().clone()
    }

    pub fn host_name(&self) -> Option<String> {
        self.lock().reference.host_name().map(str::to_string)
    }

    pub fn port(&self) -> Option<u16> {
        self.lock().reference.port()
    }

    pub fn endpoint(&self) -> Option<Endpoint> {
        self.lock().reference.endpoint().cloned()
    }

    /// The contract requested by the most recent resolve call
    pub fn mode(&self) -> ResolveMode {
        self.lock().mode
    }

    /// Whether a backend query is currently open
    pub fn is_query_open(&self) -> bool {
        matches!(self.lock().state, SessionState::QueryOpen { .. })
    }

    /// Add another receiver of `resolved` notifications
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<ResolvedEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut session = self.lock();
        if session.state != SessionState::Closed {
            session.subscribers.push(tx);
        }
        rx
    }

    /// Stream of `resolved` notifications
    ///
    /// The stream ends when the resolver is dropped.
    pub fn watch(&self) -> Pin<Box<dyn Stream<Item = ResolvedEvent> + Send + 'static>> {
        Box::pin(UnboundedReceiverStream::new(self.subscribe()))
    }

    /// Close any open query and return to idle without notifying
    ///
    /// A pending one-shot `resolve()` returns `false` without a notification
    /// and leaves the reference untouched.
    pub fn cancel(&self) {
        let handle = {
            let mut session = self.lock();
            session.first_result = None;
            session.take_open_handle()
        };

        if let Some(handle) = handle {
            debug!("Cancelled query for {}", self.id());
            self.backend.close_query(handle);
        }
    }

    fn open(&self, generation: u64) {
        let id = self.id();

        match self.backend.open_query(&id, self.sink(generation)) {
            Ok(handle) => {
                let attached = self.lock().attach(generation, handle);
                if !attached {
                    debug!("Query for {} was abandoned while opening", id);
                    self.backend.close_query(handle);
                }
            }
            Err(e) => {
                warn!(
                    "Backend {} could not resolve {}: {}",
                    self.backend.backend_name(),
                    id,
                    e
                );
                self.lock().fail_start(generation);
            }
        }
    }

    fn finish_one_shot(&self, generation: u64, update: ResolveUpdate) -> bool {
        let (successful, handle) = {
            let mut session = self.lock();
            if !session.is_current(generation) {
                // Cancelled; a newer session may own the reference now
                debug!("One-shot resolve of {} was cancelled", session.reference.id());
                return false;
            }
            let handle = session.take_open_handle();
            let successful = session.apply(update);
            session.notify(successful);
            (successful, handle)
        };

        if let Some(handle) = handle {
            self.backend.close_query(handle);
        }

        successful
    }

    fn sink(&self, generation: u64) -> UpdateSink {
        let session = Arc::downgrade(&self.session);
        UpdateSink::new(move |update| {
            if let Some(session) = session.upgrade() {
                lock(&session).deliver(generation, update);
            }
        })
    }

    fn lock(&self) -> MutexGuard<'_, Session> {
        lock(&self.session)
    }
}

impl Drop for Resolver {
    fn drop(&mut self) {
        let handle = {
            let mut session = self.lock();
            let handle = session.take_open_handle();
            session.state = SessionState::Closed;
            session.first_result = None;
            session.subscribers.clear();
            handle
        };

        if let Some(handle) = handle {
            debug!("Closing query {} on teardown", handle.id());
            self.backend.close_query(handle);
        }
    }
}

/// Closes the one-shot query if the `resolve()` future is dropped mid-wait
struct OneShotGuard<'a> {
    resolver: &'a Resolver,
    generation: u64,
    armed: bool,
}

impl Drop for OneShotGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }

        let handle = {
            let mut session = self.resolver.lock();
            if !session.is_current(self.generation) {
                return;
            }
            session.first_result = None;
            session.take_open_handle()
        };

        if let Some(handle) = handle {
            debug!("One-shot resolve abandoned, closing query {}", handle.id());
            self.resolver.backend.close_query(handle);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> Session {
        Session {
            reference: ServiceReference::new("printer", "_ipp._tcp", "local"),
            state: SessionState::Idle,
            mode: ResolveMode::None,
            next_generation: 0,
            subscribers: Vec::new(),
            first_result: None,
        }
    }

    #[test]
    fn later_valid_update_supersedes_earlier() {
        let mut session = session();
        assert!(session.apply(ResolveUpdate::available("printer.local", 631)));
        assert!(session.apply(ResolveUpdate::available("printer.local", 9100)));
        assert_eq!(session.reference.port(), Some(9100));
    }

    #[test]
    fn malformed_record_counts_as_failure_and_clears() {
        let mut session = session();
        session.apply(ResolveUpdate::available("printer.local", 631));

        assert!(!session.apply(ResolveUpdate::available("", 631)));
        assert!(!session.reference.is_resolved());
        assert!(!session.apply(ResolveUpdate::available("printer.local", 0)));
    }

    #[test]
    fn deliveries_for_other_generations_are_dropped() {
        let mut session = session();
        let (tx, mut rx) = mpsc::unbounded_channel();
        session.subscribers.push(tx);

        let first = session.begin(ResolveMode::Monitoring);
        session.take_open_handle();
        let second = session.begin(ResolveMode::Monitoring);

        session.deliver(first, ResolveUpdate::available("old.local", 1));
        assert!(rx.try_recv().is_err());
        assert!(!session.reference.is_resolved());

        session.deliver(second, ResolveUpdate::available("new.local", 2));
        let event = rx.try_recv().unwrap();
        assert!(event.successful);
        assert_eq!(session.reference.host_name(), Some("new.local"));
    }

    #[test]
    fn one_shot_delivery_goes_to_the_waiting_resolve() {
        let mut session = session();
        let (events_tx, mut events) = mpsc::unbounded_channel();
        session.subscribers.push(events_tx);
        let (tx, mut rx) = oneshot::channel();
        session.first_result = Some(tx);

        let generation = session.begin(ResolveMode::OneShot);
        session.deliver(generation, ResolveUpdate::available("printer.local", 631));
        session.deliver(generation, ResolveUpdate::available("printer.local", 9100));

        assert_eq!(
            rx.try_recv().unwrap(),
            ResolveUpdate::available("printer.local", 631)
        );
        assert!(!session.reference.is_resolved(), "resolve() applies it");
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn take_open_handle_does_not_reopen_closed_session() {
        let mut session = session();
        session.state = SessionState::Closed;
        assert_eq!(session.take_open_handle(), None);
        assert_eq!(session.state, SessionState::Closed);
    }

    #[test]
    fn dropped_subscribers_are_pruned() {
        let mut session = session();
        let (tx, rx) = mpsc::unbounded_channel();
        session.subscribers.push(tx);
        drop(rx);

        session.notify(false);
        assert!(session.subscribers.is_empty());
    }
}
