#![forbid(unsafe_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use palisade_core::{ListScope, ObjectMeta, ResourceObject, WatchEvent};
use palisade_watch::{HubConfig, Lister, PollHub};
use serde::{Deserialize, Serialize};
use tokio::time::timeout;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct MiniPolicy {
    metadata: ObjectMeta,
}

impl ResourceObject for MiniPolicy {
    const KIND: &'static str = "MiniPolicy";
    const API_VERSION: &'static str = "policy/v1";
    const NAMESPACED: bool = true;

    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }
    fn metadata_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}

fn obj(name: &str, ns: &str, rv: &str) -> MiniPolicy {
    let mut metadata = ObjectMeta::named(name);
    metadata.namespace = Some(ns.to_string());
    metadata.resource_version = Some(rv.to_string());
    MiniPolicy { metadata }
}

/// In-test backend: the poller lists whatever the test last stored.
struct FakeBackend {
    items: Mutex<Vec<MiniPolicy>>,
    fail: AtomicBool,
}

impl FakeBackend {
    fn new() -> Arc<Self> {
        Arc::new(Self { items: Mutex::new(Vec::new()), fail: AtomicBool::new(false) })
    }

    fn set(&self, items: Vec<MiniPolicy>) {
        *self.items.lock().unwrap() = items;
    }
}

#[async_trait::async_trait]
impl Lister<MiniPolicy> for FakeBackend {
    async fn list_all(&self) -> anyhow::Result<Vec<MiniPolicy>> {
        if self.fail.load(Ordering::SeqCst) {
            anyhow::bail!("backend unavailable");
        }
        Ok(self.items.lock().unwrap().clone())
    }
}

fn fast_config(queue_cap: usize) -> HubConfig {
    HubConfig {
        queue_cap,
        poll_interval: Duration::from_millis(5),
        backoff_max: Duration::from_millis(50),
        bookmark_ticks: 0,
    }
}

async fn next_event(
    handle: &mut palisade_watch::WatchHandle<MiniPolicy>,
) -> WatchEvent<MiniPolicy> {
    timeout(Duration::from_secs(2), handle.recv())
        .await
        .expect("timed out waiting for watch event")
        .expect("watch stream closed")
}

#[tokio::test]
async fn liveness_one_event_per_transition() {
    let backend = FakeBackend::new();
    let hub = PollHub::with_config(backend.clone() as Arc<dyn Lister<MiniPolicy>>, fast_config(64));
    let mut handle = hub.register(ListScope::all());

    backend.set(vec![obj("web", "edge", "1")]);
    let ev = next_event(&mut handle).await;
    assert!(matches!(ev, WatchEvent::Added(ref o) if o.metadata.name == "web"), "{ev:?}");

    backend.set(vec![obj("web", "edge", "2")]);
    let ev = next_event(&mut handle).await;
    assert!(matches!(ev, WatchEvent::Modified(ref o) if o.resource_version() == Some("2")), "{ev:?}");

    backend.set(vec![]);
    let ev = next_event(&mut handle).await;
    assert!(matches!(ev, WatchEvent::Deleted(ref o) if o.metadata.name == "web"), "{ev:?}");

    // several more ticks observe the same state; no duplicates arrive
    let extra = timeout(Duration::from_millis(100), handle.recv()).await;
    assert!(extra.is_err(), "unexpected extra event: {extra:?}");
}

#[tokio::test]
async fn unchanged_resource_version_emits_nothing() {
    let backend = FakeBackend::new();
    backend.set(vec![obj("web", "edge", "1")]);
    let hub = PollHub::with_config(backend.clone() as Arc<dyn Lister<MiniPolicy>>, fast_config(64));
    let mut handle = hub.register(ListScope::all());

    // initial sync for this client
    let ev = next_event(&mut handle).await;
    assert!(matches!(ev, WatchEvent::Added(_)));

    // same object, same rv, many ticks later
    let extra = timeout(Duration::from_millis(100), handle.recv()).await;
    assert!(extra.is_err(), "rv did not change but got {extra:?}");
}

#[tokio::test]
async fn late_client_gets_snapshot_once() {
    let backend = FakeBackend::new();
    backend.set(vec![obj("a", "edge", "1"), obj("b", "edge", "1")]);
    let hub = PollHub::with_config(backend.clone() as Arc<dyn Lister<MiniPolicy>>, fast_config(64));

    let mut first = hub.register(ListScope::all());
    let _ = next_event(&mut first).await;
    let _ = next_event(&mut first).await;

    let mut late = hub.register(ListScope::all());
    let mut names = vec![];
    for _ in 0..2 {
        match next_event(&mut late).await {
            WatchEvent::Added(o) => names.push(o.metadata.name.clone()),
            other => panic!("expected Added, got {other:?}"),
        }
    }
    names.sort();
    assert_eq!(names, vec!["a", "b"]);
    let extra = timeout(Duration::from_millis(100), late.recv()).await;
    assert!(extra.is_err(), "snapshot delivered twice: {extra:?}");
}

#[tokio::test]
async fn scope_filters_by_namespace() {
    let backend = FakeBackend::new();
    let hub = PollHub::with_config(backend.clone() as Arc<dyn Lister<MiniPolicy>>, fast_config(64));
    let mut edge_only = hub.register(ListScope::in_namespace("edge"));

    backend.set(vec![obj("a", "edge", "1"), obj("b", "dmz", "1")]);
    let ev = next_event(&mut edge_only).await;
    assert!(matches!(ev, WatchEvent::Added(ref o) if o.metadata.namespace.as_deref() == Some("edge")));
    let extra = timeout(Duration::from_millis(100), edge_only.recv()).await;
    assert!(extra.is_err(), "saw an out-of-scope event: {extra:?}");
}

#[tokio::test]
async fn stalled_client_drops_newest_and_never_blocks_the_poller() {
    let backend = FakeBackend::new();
    let hub = PollHub::with_config(backend.clone() as Arc<dyn Lister<MiniPolicy>>, fast_config(1));
    let mut stalled = hub.register(ListScope::all());
    let mut healthy = hub.register(ListScope::all());

    // stalled client reads nothing while three distinct transitions happen
    for rv in ["1", "2", "3"] {
        backend.set(vec![obj("web", "edge", rv)]);
        // healthy client keeps consuming, proving the poller still runs
        let _ = next_event(&mut healthy).await;
    }

    // the stalled queue (cap 1) kept only the oldest event
    let ev = next_event(&mut stalled).await;
    assert!(matches!(ev, WatchEvent::Added(ref o) if o.resource_version() == Some("1")), "{ev:?}");

    // a later transition is still delivered; rv jumps, exposing the gap
    backend.set(vec![obj("web", "edge", "4")]);
    let ev = next_event(&mut stalled).await;
    assert!(matches!(ev, WatchEvent::Modified(ref o) if o.resource_version() == Some("4")), "{ev:?}");
}

#[tokio::test]
async fn last_deregistration_stops_the_poller() {
    let backend = FakeBackend::new();
    let hub = PollHub::with_config(backend.clone() as Arc<dyn Lister<MiniPolicy>>, fast_config(8));

    let a = hub.register(ListScope::all());
    let b = hub.register(ListScope::all());
    assert_eq!(hub.client_count(), 2);
    assert!(hub.polling());

    drop(a);
    assert!(hub.polling(), "poller must survive while a client remains");
    drop(b);
    assert_eq!(hub.client_count(), 0);
    assert!(!hub.polling(), "poller must stop with zero listeners");
}

#[tokio::test]
async fn repeated_poll_failures_surface_one_error_event() {
    let backend = FakeBackend::new();
    backend.set(vec![obj("web", "edge", "1")]);
    let hub = PollHub::with_config(backend.clone() as Arc<dyn Lister<MiniPolicy>>, fast_config(8));
    let mut handle = hub.register(ListScope::all());
    let _ = next_event(&mut handle).await;

    backend.fail.store(true, Ordering::SeqCst);
    let ev = timeout(Duration::from_secs(5), handle.recv())
        .await
        .expect("no error event before timeout")
        .expect("stream closed");
    match ev {
        WatchEvent::Error(err) => assert!(err.retryable(), "poll failure should be retryable: {err:?}"),
        other => panic!("expected Error event, got {other:?}"),
    }

    // recovery resumes the diff stream
    backend.fail.store(false, Ordering::SeqCst);
    backend.set(vec![obj("web", "edge", "2")]);
    let ev = timeout(Duration::from_secs(5), handle.recv())
        .await
        .expect("no event after recovery")
        .expect("stream closed");
    assert!(matches!(ev, WatchEvent::Modified(_)), "{ev:?}");
}

#[tokio::test]
async fn bookmarks_mark_quiet_progress() {
    let backend = FakeBackend::new();
    backend.set(vec![obj("web", "edge", "7")]);
    let mut cfg = fast_config(8);
    cfg.bookmark_ticks = 3;
    let hub = PollHub::with_config(backend.clone() as Arc<dyn Lister<MiniPolicy>>, cfg);
    let mut handle = hub.register(ListScope::all());
    let _ = next_event(&mut handle).await;

    let ev = timeout(Duration::from_secs(2), handle.recv())
        .await
        .expect("no bookmark before timeout")
        .expect("stream closed");
    assert_eq!(ev, WatchEvent::Bookmark { resource_version: "7".to_string() });
}
