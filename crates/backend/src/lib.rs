//! Reference backend: an in-memory map with backend-assigned uid and
//! monotonically increasing resourceVersion.
//!
//! Errors are deliberately free text ("not found", "already exists",
//! "resource version conflict"); the registry's classifier owns the mapping
//! to categories. A JSON snapshot can be saved and reloaded so short-lived
//! processes share state through a file.

#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use chrono::Utc;
use palisade_core::{DomainRecord, ListScope, ResourceId};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

pub struct MemoryBackend<D> {
    records: RwLock<HashMap<ResourceId, D>>,
    revision: AtomicU64,
}

/// On-disk snapshot shape. The revision counter travels with the records so
/// a reload never reissues an already-used resourceVersion.
#[derive(Serialize, Deserialize)]
struct Snapshot<D> {
    revision: u64,
    records: Vec<D>,
}

impl<D: DomainRecord> Default for MemoryBackend<D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D: DomainRecord> MemoryBackend<D> {
    pub fn new() -> Self {
        Self { records: RwLock::new(HashMap::new()), revision: AtomicU64::new(0) }
    }

    fn next_revision(&self) -> String {
        (self.revision.fetch_add(1, Ordering::SeqCst) + 1).to_string()
    }

    pub fn len(&self) -> usize {
        self.records.read().expect("backend state poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Load a snapshot written by `save`. A missing file yields an empty
    /// backend so first runs need no setup step.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::new());
        }
        let raw = std::fs::read(path)?;
        let snap: Snapshot<D> = serde_json::from_slice(&raw)?;
        let mut records = HashMap::with_capacity(snap.records.len());
        for rec in snap.records {
            records.insert(rec.id(), rec);
        }
        debug!(path = %path.display(), records = records.len(), "backend snapshot loaded");
        Ok(Self { records: RwLock::new(records), revision: AtomicU64::new(snap.revision) })
    }

    pub fn save(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let snap = {
            let records = self.records.read().expect("backend state poisoned");
            Snapshot {
                revision: self.revision.load(Ordering::SeqCst),
                records: records.values().cloned().collect(),
            }
        };
        let raw = serde_json::to_vec_pretty(&snap)?;
        std::fs::write(path.as_ref(), raw)?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl<D: DomainRecord> palisade_core::BackendOps<D> for MemoryBackend<D> {
    async fn get(&self, id: &ResourceId) -> anyhow::Result<D> {
        let records = self.records.read().expect("backend state poisoned");
        records.get(id).cloned().ok_or_else(|| anyhow::anyhow!("{id} not found"))
    }

    async fn list(&self, scope: &ListScope) -> anyhow::Result<Vec<D>> {
        let records = self.records.read().expect("backend state poisoned");
        let mut out: Vec<D> = records
            .values()
            .filter(|rec| scope.matches(rec.id().namespace.as_deref(), rec.labels()))
            .cloned()
            .collect();
        // stable listing order regardless of map iteration
        out.sort_by(|a, b| {
            let (a, b) = (a.id(), b.id());
            (a.namespace.clone(), a.name.clone()).cmp(&(b.namespace, b.name))
        });
        Ok(out)
    }

    async fn create(&self, mut rec: D) -> anyhow::Result<D> {
        let id = rec.id();
        let mut records = self.records.write().expect("backend state poisoned");
        if records.contains_key(&id) {
            anyhow::bail!("{id} already exists");
        }
        rec.set_uid(Uuid::new_v4().to_string());
        rec.set_revision(self.next_revision());
        if rec.created_at().is_none() {
            rec.set_created_at(Utc::now());
        }
        records.insert(id, rec.clone());
        Ok(rec)
    }

    async fn update(&self, mut rec: D) -> anyhow::Result<D> {
        let id = rec.id();
        let mut records = self.records.write().expect("backend state poisoned");
        let stored = records.get(&id).ok_or_else(|| anyhow::anyhow!("{id} not found"))?;

        // optimistic concurrency: a caller-supplied revision must match
        let have = stored.revision().unwrap_or_default();
        if let Some(want) = rec.revision() {
            if !want.is_empty() && want != have {
                anyhow::bail!("{id}: resource version conflict (have {have}, want {want})");
            }
        }

        // backend-owned fields always come from the stored record
        if let Some(uid) = stored.uid() {
            rec.set_uid(uid.to_string());
        }
        if let Some(at) = stored.created_at() {
            rec.set_created_at(at);
        }
        rec.set_revision(self.next_revision());
        records.insert(id, rec.clone());
        Ok(rec)
    }

    async fn delete(&self, id: &ResourceId) -> anyhow::Result<D> {
        let mut records = self.records.write().expect("backend state poisoned");
        records.remove(id).ok_or_else(|| anyhow::anyhow!("{id} not found"))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use chrono::{DateTime, Utc};
    use palisade_core::{BackendOps, DomainRecord, ListScope, ResourceId};
    use serde::{Deserialize, Serialize};

    use super::MemoryBackend;

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    struct Rec {
        name: String,
        namespace: Option<String>,
        uid: Option<String>,
        revision: Option<String>,
        created_at: Option<DateTime<Utc>>,
        labels: BTreeMap<String, String>,
        payload: u32,
    }

    impl DomainRecord for Rec {
        fn id(&self) -> ResourceId {
            ResourceId { name: self.name.clone(), namespace: self.namespace.clone() }
        }
        fn uid(&self) -> Option<&str> {
            self.uid.as_deref()
        }
        fn set_uid(&mut self, uid: String) {
            self.uid = Some(uid);
        }
        fn revision(&self) -> Option<&str> {
            self.revision.as_deref()
        }
        fn set_revision(&mut self, revision: String) {
            self.revision = Some(revision);
        }
        fn created_at(&self) -> Option<DateTime<Utc>> {
            self.created_at
        }
        fn set_created_at(&mut self, at: DateTime<Utc>) {
            self.created_at = Some(at);
        }
        fn labels(&self) -> &BTreeMap<String, String> {
            &self.labels
        }
    }

    fn rec(name: &str, ns: Option<&str>) -> Rec {
        Rec { name: name.into(), namespace: ns.map(Into::into), ..Default::default() }
    }

    #[tokio::test]
    async fn create_assigns_uid_revision_and_timestamp() {
        let backend = MemoryBackend::new();
        let echo = backend.create(rec("web", Some("edge"))).await.unwrap();
        assert!(echo.uid.is_some());
        assert_eq!(echo.revision.as_deref(), Some("1"));
        assert!(echo.created_at.is_some());
    }

    #[tokio::test]
    async fn duplicate_create_fails_with_already_exists_text() {
        let backend = MemoryBackend::new();
        backend.create(rec("web", Some("edge"))).await.unwrap();
        let err = backend.create(rec("web", Some("edge"))).await.unwrap_err();
        assert!(err.to_string().contains("already exists"), "{err}");
        // same name in a different namespace is a different identity
        backend.create(rec("web", Some("dmz"))).await.unwrap();
    }

    #[tokio::test]
    async fn revision_increases_on_every_write() {
        let backend = MemoryBackend::new();
        let mut cur = backend.create(rec("web", Some("edge"))).await.unwrap();
        let mut seen = vec![cur.revision.clone().unwrap()];
        for payload in 1..=3 {
            cur.payload = payload;
            cur = backend.update(cur).await.unwrap();
            seen.push(cur.revision.clone().unwrap());
        }
        let nums: Vec<u64> = seen.iter().map(|s| s.parse().unwrap()).collect();
        assert!(nums.windows(2).all(|w| w[0] < w[1]), "{nums:?}");
    }

    #[tokio::test]
    async fn stale_revision_is_a_conflict() {
        let backend = MemoryBackend::new();
        let first = backend.create(rec("web", Some("edge"))).await.unwrap();
        let mut fresh = first.clone();
        fresh.payload = 1;
        backend.update(fresh).await.unwrap();

        let mut stale = first;
        stale.payload = 2;
        let err = backend.update(stale).await.unwrap_err();
        assert!(err.to_string().contains("resource version conflict"), "{err}");
    }

    #[tokio::test]
    async fn update_preserves_uid_and_creation_time() {
        let backend = MemoryBackend::new();
        let created = backend.create(rec("web", Some("edge"))).await.unwrap();

        let mut desired = rec("web", Some("edge"));
        desired.uid = Some("forged".into());
        desired.revision = None; // unconditional write
        let updated = backend.update(desired).await.unwrap();
        assert_eq!(updated.uid, created.uid);
        assert_eq!(updated.created_at, created.created_at);
    }

    #[tokio::test]
    async fn list_filters_by_scope_and_sorts() {
        let backend = MemoryBackend::new();
        let mut labeled = rec("api", Some("edge"));
        labeled.labels.insert("tier".into(), "backend".into());
        backend.create(labeled).await.unwrap();
        backend.create(rec("web", Some("edge"))).await.unwrap();
        backend.create(rec("db", Some("dmz"))).await.unwrap();

        let edge = backend.list(&ListScope::in_namespace("edge")).await.unwrap();
        let names: Vec<&str> = edge.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["api", "web"]);

        let tiered =
            backend.list(&ListScope::all().with_label("tier", "backend")).await.unwrap();
        assert_eq!(tiered.len(), 1);
        assert_eq!(tiered[0].name, "api");
    }

    #[tokio::test]
    async fn delete_returns_the_last_record() {
        let backend = MemoryBackend::new();
        backend.create(rec("web", Some("edge"))).await.unwrap();
        let gone = backend.delete(&ResourceId::namespaced("edge", "web")).await.unwrap();
        assert_eq!(gone.name, "web");
        let err = backend.get(&ResourceId::namespaced("edge", "web")).await.unwrap_err();
        assert!(err.to_string().contains("not found"), "{err}");
    }

    #[tokio::test]
    async fn snapshot_round_trip_keeps_revision_counter() {
        let dir = std::env::temp_dir().join(format!("palisade-backend-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("state.json");

        let backend = MemoryBackend::new();
        backend.create(rec("web", Some("edge"))).await.unwrap();
        backend.save(&path).unwrap();

        let reloaded: MemoryBackend<Rec> = MemoryBackend::load(&path).unwrap();
        assert_eq!(reloaded.len(), 1);
        let echo = reloaded.create(rec("api", Some("edge"))).await.unwrap();
        // the counter resumes past the snapshot, never reissuing "1"
        assert_eq!(echo.revision.as_deref(), Some("2"));
        std::fs::remove_dir_all(&dir).ok();
    }
}
