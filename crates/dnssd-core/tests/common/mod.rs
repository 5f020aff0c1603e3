//! Test doubles and common utilities for resolver contract tests
//!
//! `ScriptedBackend` never touches the network. Tests decide when and what
//! it delivers, and can inspect which queries were opened and closed.

#![allow(dead_code)]

use dnssd_core::error::{Error, Result};
use dnssd_core::traits::{QueryHandle, ResolveUpdate, ResolverBackend, UpdateSink};
use dnssd_core::{ResolvedEvent, Resolver, ResolverConfig, ServiceId, ServiceReference};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// One query as seen by the backend
#[derive(Debug, Clone)]
pub struct RecordedQuery {
    pub handle: QueryHandle,
    pub service: ServiceId,
    pub sink: UpdateSink,
    pub open: bool,
    pub close_calls: usize,
}

#[derive(Default)]
struct BackendState {
    next_id: u64,
    queries: Vec<RecordedQuery>,
    fail_on_open: bool,
    reply_on_open: Option<ResolveUpdate>,
}

/// A backend driven entirely by the test
#[derive(Default)]
pub struct ScriptedBackend {
    state: Mutex<BackendState>,
}

impl ScriptedBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// A backend whose `open_query` always fails
    pub fn failing() -> Arc<Self> {
        let backend = Self::default();
        backend.state.lock().unwrap().fail_on_open = true;
        Arc::new(backend)
    }

    /// A backend that answers inline from `open_query`
    pub fn replying(update: ResolveUpdate) -> Arc<Self> {
        let backend = Self::default();
        backend.state.lock().unwrap().reply_on_open = Some(update);
        Arc::new(backend)
    }

    /// Deliver an update to the most recent query, if it is still open
    pub fn push(&self, update: ResolveUpdate) {
        let sink = {
            let state = self.state.lock().unwrap();
            state
                .queries
                .last()
                .filter(|q| q.open)
                .map(|q| q.sink.clone())
        };

        if let Some(sink) = sink {
            sink.deliver(update);
        }
    }

    /// Deliver an update to the most recent query even if it was closed,
    /// imitating a backend thread racing `close_query`
    pub fn push_late(&self, update: ResolveUpdate) {
        let sink = {
            let state = self.state.lock().unwrap();
            state.queries.last().map(|q| q.sink.clone())
        };

        if let Some(sink) = sink {
            sink.deliver(update);
        }
    }

    /// Number of queries ever opened
    pub fn open_count(&self) -> usize {
        self.state.lock().unwrap().queries.len()
    }

    /// Number of queries currently open
    pub fn open_queries(&self) -> usize {
        self.state
            .lock()
            .unwrap()
            .queries
            .iter()
            .filter(|q| q.open)
            .count()
    }

    /// Total `close_query` calls across all queries
    pub fn close_calls(&self) -> usize {
        self.state
            .lock()
            .unwrap()
            .queries
            .iter()
            .map(|q| q.close_calls)
            .sum()
    }

    pub fn queries(&self) -> Vec<RecordedQuery> {
        self.state.lock().unwrap().queries.clone()
    }
}

impl ResolverBackend for ScriptedBackend {
    fn open_query(&self, service: &ServiceId, sink: UpdateSink) -> Result<QueryHandle> {
        let (handle, reply) = {
            let mut state = self.state.lock().unwrap();
            if state.fail_on_open {
                return Err(Error::query_start(service, "scripted failure"));
            }

            state.next_id += 1;
            let handle = QueryHandle::new(state.next_id);
            state.queries.push(RecordedQuery {
                handle,
                service: service.clone(),
                sink: sink.clone(),
                open: true,
                close_calls: 0,
            });
            (handle, state.reply_on_open.clone())
        };

        // Inline delivery happens outside the lock, like a real daemon
        // answering from its cache
        if let Some(update) = reply {
            sink.deliver(update);
        }

        Ok(handle)
    }

    fn close_query(&self, handle: QueryHandle) {
        let mut state = self.state.lock().unwrap();
        if let Some(query) = state.queries.iter_mut().find(|q| q.handle == handle) {
            query.open = false;
            query.close_calls += 1;
        }
    }

    fn backend_name(&self) -> &'static str {
        "scripted"
    }
}

/// The reference used throughout the scenarios
pub fn printer() -> ServiceReference {
    ServiceReference::new("printer", "_ipp._tcp", "local")
}

/// Build a resolver for `printer()` over `backend` with default settings
pub fn printer_resolver(
    backend: &Arc<ScriptedBackend>,
) -> (Resolver, mpsc::UnboundedReceiver<ResolvedEvent>) {
    Resolver::new(printer(), backend.clone(), ResolverConfig::default())
        .expect("resolver construction succeeds")
}

/// Drain every event currently queued
pub fn drain(rx: &mut mpsc::UnboundedReceiver<ResolvedEvent>) -> Vec<ResolvedEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
