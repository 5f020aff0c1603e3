// # mDNS Resolver Backend
//
// Resolves DNS-SD services on the `local` domain with multicast DNS, using
// the `mdns-sd` daemon.
//
// ## Architecture
//
// `mdns-sd` browses by service type and reports resolved instances of that
// type. A resolve query for one instance therefore subscribes to a browse of
// its type and filters by full instance name. The daemon keeps a single
// listener per type, so the backend runs one browse per type and fans its
// events out to every open query of that type:
//
// ```text
// ServiceDaemon ── browse("_ipp._tcp.local.") ──▶ dispatch task ──┬──▶ query 1 (printer)
//                                                                 └──▶ query 2 (scanner)
// ```
//
// The browse is stopped when the last query for its type is closed.

use dnssd_core::config::BackendConfig;
use dnssd_core::traits::{
    QueryHandle, ResolveUpdate, ResolverBackend, ResolverBackendFactory, UpdateSink,
};
use dnssd_core::{BackendRegistry, Error, Result, ServiceId};

use mdns_sd::{Receiver, ServiceDaemon, ServiceEvent};
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// The only domain multicast DNS answers for
const MDNS_DOMAIN: &str = "local";

const BACKEND_NAME: &str = "mdns";

/// One open resolve query
struct Subscriber {
    full_name: String,
    sink: UpdateSink,
}

/// A running browse for one service type
struct TypeBrowse {
    /// Type and domain as passed to the daemon
    ty_domain: String,
    task: JoinHandle<()>,
    subscribers: HashMap<u64, Subscriber>,
    /// Last resolution per instance, replayed to late subscribers
    known: HashMap<String, ResolveUpdate>,
}

impl TypeBrowse {
    fn new(ty_domain: String, task: JoinHandle<()>) -> Self {
        Self {
            ty_domain,
            task,
            subscribers: HashMap::new(),
            known: HashMap::new(),
        }
    }

    /// Record an instance update and collect the sinks interested in it
    fn route(
        &mut self,
        full_name: &str,
        update: ResolveUpdate,
    ) -> Vec<(UpdateSink, ResolveUpdate)> {
        let key = normalize(full_name);
        match &update {
            ResolveUpdate::Available { .. } => {
                self.known.insert(key.clone(), update.clone());
            }
            ResolveUpdate::Unavailable => {
                self.known.remove(&key);
            }
        }

        self.subscribers
            .values()
            .filter(|s| normalize(&s.full_name) == key)
            .map(|s| (s.sink.clone(), update.clone()))
            .collect()
    }
}

#[derive(Default)]
struct Browses {
    by_type: HashMap<String, TypeBrowse>,
    /// Query id -> type key in `by_type`
    queries: HashMap<u64, String>,
}

impl Browses {
    /// Register a query, starting a browse for its type if none is running
    ///
    /// Returns the known resolution of the query's instance, if any.
    fn add_query(
        &mut self,
        type_key: String,
        id: u64,
        subscriber: Subscriber,
        start: impl FnOnce() -> Result<TypeBrowse>,
    ) -> Result<Option<ResolveUpdate>> {
        let browse = match self.by_type.entry(type_key.clone()) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => entry.insert(start()?),
        };

        let replay = browse.known.get(&normalize(&subscriber.full_name)).cloned();
        browse.subscribers.insert(id, subscriber);
        self.queries.insert(id, type_key);
        Ok(replay)
    }

    /// Unregister a query
    ///
    /// Returns the browse of its type once no query uses it any more. Unknown
    /// or already removed ids are ignored.
    fn remove_query(&mut self, id: u64) -> Option<TypeBrowse> {
        let type_key = self.queries.remove(&id)?;

        let browse = self.by_type.get_mut(&type_key)?;
        browse.subscribers.remove(&id);
        if browse.subscribers.is_empty() {
            self.by_type.remove(&type_key)
        } else {
            None
        }
    }
}

fn lock(browses: &Mutex<Browses>) -> MutexGuard<'_, Browses> {
    browses.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Register a query and replay the known resolution of its instance
///
/// The replay is delivered under the lock so the dispatch task cannot route
/// a newer update to the query first. Lock order is browses, then the sink's.
fn subscribe(
    browses: &Mutex<Browses>,
    type_key: String,
    id: u64,
    subscriber: Subscriber,
    start: impl FnOnce() -> Result<TypeBrowse>,
) -> Result<()> {
    let sink = subscriber.sink.clone();
    let mut state = lock(browses);
    if let Some(update) = state.add_query(type_key, id, subscriber, start)? {
        sink.deliver(update);
    }
    Ok(())
}

/// DNS names compare case-insensitively and with or without the root dot
fn normalize(name: &str) -> String {
    name.trim_end_matches('.').to_ascii_lowercase()
}

/// Reject identities multicast DNS cannot resolve
fn check_service(service: &ServiceId) -> Result<()> {
    if service.is_incomplete() {
        return Err(Error::query_start(service, "incomplete service identity"));
    }
    if normalize(&service.domain) != MDNS_DOMAIN {
        return Err(Error::query_start(
            service,
            format!("mDNS only resolves the '{}' domain", MDNS_DOMAIN),
        ));
    }
    if !service.service_type.starts_with('_') {
        return Err(Error::query_start(
            service,
            "service type must look like '_name._tcp' or '_name._udp'",
        ));
    }
    Ok(())
}

/// Turn a daemon event into an instance update, if it is one
fn translate(event: ServiceEvent) -> Option<(String, ResolveUpdate)> {
    match event {
        ServiceEvent::ServiceResolved(info) => Some((
            info.get_fullname().to_string(),
            ResolveUpdate::available(info.get_hostname().trim_end_matches('.'), info.get_port()),
        )),
        ServiceEvent::ServiceRemoved(_, full_name) => Some((full_name, ResolveUpdate::Unavailable)),
        _ => None,
    }
}

async fn dispatch(
    type_key: String,
    receiver: Receiver<ServiceEvent>,
    browses: Weak<Mutex<Browses>>,
) {
    while let Ok(event) = receiver.recv_async().await {
        let Some((full_name, update)) = translate(event) else {
            continue;
        };

        let Some(browses) = browses.upgrade() else {
            break;
        };

        let deliveries = {
            let mut state = lock(&browses);
            match state.by_type.get_mut(&type_key) {
                Some(browse) => browse.route(&full_name, update),
                None => break,
            }
        };

        // Sinks run outside the lock
        for (sink, update) in deliveries {
            sink.deliver(update);
        }
    }

    debug!("Browse for {} ended", type_key);
}

/// Multicast DNS backend
pub struct MdnsBackend {
    daemon: ServiceDaemon,
    browses: Arc<Mutex<Browses>>,
    next_id: AtomicU64,
}

impl MdnsBackend {
    /// Start an mDNS daemon for resolving
    pub fn new() -> Result<Self> {
        let daemon = ServiceDaemon::new().map_err(|e| {
            Error::backend(BACKEND_NAME, format!("Failed to start mDNS daemon: {}", e))
        })?;

        info!("mDNS resolver backend started");

        Ok(Self {
            daemon,
            browses: Arc::new(Mutex::new(Browses::default())),
            next_id: AtomicU64::new(0),
        })
    }

    /// Number of service types currently being browsed
    pub fn active_browses(&self) -> usize {
        lock(&self.browses).by_type.len()
    }
}

impl ResolverBackend for MdnsBackend {
    fn open_query(&self, service: &ServiceId, sink: UpdateSink) -> Result<QueryHandle> {
        check_service(service)?;

        let runtime = Handle::try_current()
            .map_err(|e| Error::query_start(service, format!("no tokio runtime: {}", e)))?;

        let type_key = normalize(&service.type_domain());
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let full_name = service.full_name();

        let subscriber = Subscriber { full_name, sink };

        subscribe(&self.browses, type_key.clone(), id, subscriber, || {
            let ty_domain = service.type_domain();
            let receiver = self
                .daemon
                .browse(&ty_domain)
                .map_err(|e| Error::query_start(service, format!("browse failed: {}", e)))?;
            debug!("Browsing {}", type_key);
            let task = runtime.spawn(dispatch(
                type_key.clone(),
                receiver,
                Arc::downgrade(&self.browses),
            ));
            Ok(TypeBrowse::new(ty_domain, task))
        })?;

        debug!("Opened mDNS query {} for {}", id, service);

        Ok(QueryHandle::new(id))
    }

    fn close_query(&self, handle: QueryHandle) {
        let finished = lock(&self.browses).remove_query(handle.id());

        debug!("Closed mDNS query {}", handle.id());

        if let Some(browse) = finished {
            browse.task.abort();
            if let Err(e) = self.daemon.stop_browse(&browse.ty_domain) {
                warn!("Failed to stop browsing {}: {}", browse.ty_domain, e);
            }
        }
    }

    fn backend_name(&self) -> &'static str {
        BACKEND_NAME
    }
}

impl Drop for MdnsBackend {
    fn drop(&mut self) {
        let state = std::mem::take(&mut *lock(&self.browses));
        for browse in state.by_type.into_values() {
            browse.task.abort();
        }

        if let Err(e) = self.daemon.shutdown() {
            warn!("Failed to shut down mDNS daemon: {}", e);
        }
    }
}

/// Factory for creating mDNS backends
pub struct MdnsFactory;

impl ResolverBackendFactory for MdnsFactory {
    fn create(&self, config: &BackendConfig) -> Result<Arc<dyn ResolverBackend>> {
        match config {
            BackendConfig::Mdns => Ok(Arc::new(MdnsBackend::new()?)),
            _ => Err(Error::config("Invalid config for mDNS backend")),
        }
    }
}

/// Register the mDNS backend with a registry
pub fn register(registry: &BackendRegistry) {
    registry.register_backend(BACKEND_NAME, Box::new(MdnsFactory));
}
