//! Watch/poll bridge: one poller per resource kind turns periodic backend
//! listing into ordered per-client event streams.
//!
//! The backend has no native push channel, so the diff between consecutive
//! polls is the sole source of event types. Each client owns an independent
//! bounded channel; a stalled client never blocks the poller or its peers.

#![forbid(unsafe_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use metrics::counter;
use palisade_core::{ListScope, RegistryError, ResourceId, ResourceObject, WatchEvent};
use rustc_hash::FxHashMap;
use tokio::sync::{mpsc, Notify};
use tracing::{debug, info, warn};

/// What the poller needs from the registry: a full listing of the kind's
/// default scope.
#[async_trait::async_trait]
pub trait Lister<K>: Send + Sync {
    async fn list_all(&self) -> anyhow::Result<Vec<K>>;
}

/// Bridge tunables; `from_env` reads the `PALISADE_*` variables.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Per-client channel capacity. When full, the newest event is dropped.
    pub queue_cap: usize,
    pub poll_interval: Duration,
    pub backoff_max: Duration,
    /// Emit a Bookmark after this many quiet ticks; 0 disables.
    pub bookmark_ticks: u64,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            queue_cap: 256,
            poll_interval: Duration::from_millis(1000),
            backoff_max: Duration::from_secs(30),
            bookmark_ticks: 0,
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.parse::<T>().ok())
}

impl HubConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            queue_cap: env_parse("PALISADE_QUEUE_CAP").unwrap_or(d.queue_cap),
            poll_interval: env_parse("PALISADE_POLL_MS")
                .map(Duration::from_millis)
                .unwrap_or(d.poll_interval),
            backoff_max: env_parse("PALISADE_POLL_BACKOFF_MAX_SECS")
                .map(Duration::from_secs)
                .unwrap_or(d.backoff_max),
            bookmark_ticks: env_parse("PALISADE_BOOKMARK_TICKS").unwrap_or(d.bookmark_ticks),
        }
    }
}

struct ClientSlot<K> {
    id: u64,
    scope: ListScope,
    tx: mpsc::Sender<WatchEvent<K>>,
    /// New clients receive the current snapshot as Added events on the next
    /// tick instead of that tick's diff, so they never see duplicates.
    needs_sync: bool,
}

struct HubState<K> {
    clients: Vec<ClientSlot<K>>,
    next_id: u64,
    poller: Option<tokio::task::JoinHandle<()>>,
}

/// Per-kind bridge. Created on first watch registration; the poll task stops
/// as soon as the last client deregisters (no busy polling with zero
/// listeners).
pub struct PollHub<K: ResourceObject> {
    lister: Arc<dyn Lister<K>>,
    config: HubConfig,
    state: Mutex<HubState<K>>,
    wakeup: Notify,
}

/// A registered client's end of the stream. Dropping the handle deregisters
/// the client immediately.
pub struct WatchHandle<K: ResourceObject> {
    rx: mpsc::Receiver<WatchEvent<K>>,
    hub: Arc<PollHub<K>>,
    id: u64,
}

impl<K: ResourceObject> WatchHandle<K> {
    /// Pull until closed.
    pub async fn recv(&mut self) -> Option<WatchEvent<K>> {
        self.rx.recv().await
    }
}

impl<K: ResourceObject> Drop for WatchHandle<K> {
    fn drop(&mut self) {
        self.hub.deregister(self.id);
    }
}

impl<K: ResourceObject> PollHub<K> {
    pub fn new(lister: Arc<dyn Lister<K>>) -> Arc<Self> {
        Self::with_config(lister, HubConfig::from_env())
    }

    pub fn with_config(lister: Arc<dyn Lister<K>>, config: HubConfig) -> Arc<Self> {
        Arc::new(Self {
            lister,
            config,
            state: Mutex::new(HubState { clients: Vec::new(), next_id: 0, poller: None }),
            wakeup: Notify::new(),
        })
    }

    /// Register a new client; spawns the poll task on the first registration.
    pub fn register(self: &Arc<Self>, scope: ListScope) -> WatchHandle<K> {
        let (tx, rx) = mpsc::channel(self.config.queue_cap);
        let id = {
            let mut st = self.state.lock().expect("watch hub state poisoned");
            let id = st.next_id;
            st.next_id += 1;
            st.clients.push(ClientSlot { id, scope, tx, needs_sync: true });
            if st.poller.is_none() {
                let hub = Arc::clone(self);
                st.poller = Some(tokio::spawn(async move { poll_loop(hub).await }));
                info!(kind = K::KIND, "watch poller started");
            }
            id
        };
        self.wakeup.notify_one();
        WatchHandle { rx, hub: Arc::clone(self), id }
    }

    /// Wake the poller ahead of schedule, typically right after a write.
    /// Events still come only from the poll diff.
    pub fn nudge(&self) {
        self.wakeup.notify_one();
    }

    pub fn client_count(&self) -> usize {
        self.state.lock().expect("watch hub state poisoned").clients.len()
    }

    pub fn polling(&self) -> bool {
        self.state.lock().expect("watch hub state poisoned").poller.is_some()
    }

    fn deregister(&self, id: u64) {
        let mut st = self.state.lock().expect("watch hub state poisoned");
        st.clients.retain(|c| c.id != id);
        if st.clients.is_empty() {
            if let Some(task) = st.poller.take() {
                task.abort();
                info!(kind = K::KIND, "watch poller stopped; last client left");
            }
        }
    }

    fn scope_admits(scope: &ListScope, ev: &WatchEvent<K>) -> bool {
        match ev.object() {
            Some(obj) => {
                let meta = obj.metadata();
                scope.matches(meta.namespace.as_deref(), &meta.labels)
            }
            // bookmarks and errors go to everyone
            None => true,
        }
    }

    fn offer(tx: &mpsc::Sender<WatchEvent<K>>, ev: WatchEvent<K>, client: u64) {
        // Drop-newest policy: a full queue sheds this event and the client
        // detects the gap from the resourceVersion discontinuity.
        if tx.try_send(ev).is_err() {
            counter!("watch_dropped_events", 1u64);
            debug!(kind = K::KIND, client, "client queue full; dropped newest event");
        }
    }

    /// Deliver one tick's worth of output. Freshly registered clients get the
    /// post-tick snapshot as Added events instead of the diff.
    fn dispatch_tick(&self, events: &[WatchEvent<K>], current: &[K]) {
        let mut st = self.state.lock().expect("watch hub state poisoned");
        for client in st.clients.iter_mut() {
            if client.needs_sync {
                for obj in current {
                    let ev = WatchEvent::Added(obj.clone());
                    if Self::scope_admits(&client.scope, &ev) {
                        Self::offer(&client.tx, ev, client.id);
                    }
                }
                client.needs_sync = false;
            } else {
                for ev in events {
                    if Self::scope_admits(&client.scope, ev) {
                        Self::offer(&client.tx, ev.clone(), client.id);
                    }
                }
            }
        }
    }

    fn dispatch_error(&self, err: RegistryError) {
        let st = self.state.lock().expect("watch hub state poisoned");
        for client in st.clients.iter() {
            Self::offer(&client.tx, WatchEvent::Error(err.clone()), client.id);
        }
    }
}

fn revision_of<K: ResourceObject>(obj: &K) -> String {
    obj.resource_version().unwrap_or_default().to_string()
}

/// Highest resourceVersion in a listing; numeric when parseable, else
/// lexicographic. Only used for bookmark progress markers.
fn max_revision<K: ResourceObject>(items: &[K]) -> String {
    items
        .iter()
        .map(revision_of)
        .max_by(|a, b| match (a.parse::<u64>(), b.parse::<u64>()) {
            (Ok(x), Ok(y)) => x.cmp(&y),
            _ => a.cmp(b),
        })
        .unwrap_or_default()
}

async fn poll_loop<K: ResourceObject>(hub: Arc<PollHub<K>>) {
    let cfg = hub.config.clone();
    let mut prev: Option<FxHashMap<ResourceId, K>> = None;
    let mut failures: u32 = 0;
    let mut quiet_ticks: u64 = 0;
    let mut last_bookmark_rv = String::new();

    loop {
        match hub.lister.list_all().await {
            Ok(items) => {
                failures = 0;
                counter!("watch_poll_ticks", 1u64);

                let mut next: FxHashMap<ResourceId, K> = FxHashMap::default();
                let mut events: Vec<WatchEvent<K>> = Vec::new();
                for obj in &items {
                    let id = obj.id();
                    match prev.as_ref().and_then(|p| p.get(&id)) {
                        None if prev.is_some() => events.push(WatchEvent::Added(obj.clone())),
                        Some(old) if revision_of(old) != revision_of(obj) => {
                            events.push(WatchEvent::Modified(obj.clone()))
                        }
                        _ => {}
                    }
                    next.insert(id, obj.clone());
                }
                if let Some(prev_map) = prev.take() {
                    for (id, old) in prev_map {
                        if !next.contains_key(&id) {
                            events.push(WatchEvent::Deleted(old));
                        }
                    }
                }

                if events.is_empty() {
                    quiet_ticks += 1;
                    if cfg.bookmark_ticks > 0 && quiet_ticks >= cfg.bookmark_ticks {
                        let rv = max_revision(&items);
                        if !rv.is_empty() && rv != last_bookmark_rv {
                            events.push(WatchEvent::Bookmark { resource_version: rv.clone() });
                            last_bookmark_rv = rv;
                        }
                        quiet_ticks = 0;
                    }
                } else {
                    quiet_ticks = 0;
                }

                hub.dispatch_tick(&events, &items);
                prev = Some(next);
            }
            Err(err) => {
                failures += 1;
                counter!("watch_poll_failures", 1u64);
                warn!(kind = K::KIND, error = %err, failures, "watch poll failed");
                if failures == 3 {
                    hub.dispatch_error(RegistryError::from_backend(err, "watch", K::KIND));
                }
                let exp = cfg.poll_interval * 2u32.saturating_pow(failures.min(5));
                let delay = exp.min(cfg.backoff_max);
                tokio::time::sleep(delay).await;
                continue;
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(cfg.poll_interval) => {}
            _ = hub.wakeup.notified() => {}
        }
    }
}
