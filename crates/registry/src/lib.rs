//! Generic registry: the single source of truth for the CRUD + patch +
//! watch contract of one resource kind, independent of that kind's fields.
//!
//! A concrete registry is assembled per kind from a `Converter`, a
//! `Validator`, and a `BackendOps`; the registry owns identity and scoping
//! rules, optimistic-concurrency surfacing, managed-fields bookkeeping, and
//! event notification. It never retries and never persists anything itself.

#![forbid(unsafe_code)]

use std::sync::{Arc, OnceLock};
use std::time::Instant;

use metrics::counter;
use palisade_core::{
    ApplyContext, BackendOps, Converter, ListScope, ObjectList, RegistryError, RegistryResult,
    ResourceId, ResourceObject, UpdateSource, Validator,
};
use palisade_patch::{apply_patch, PatchType};
use palisade_watch::{HubConfig, Lister, PollHub, WatchHandle};
use tracing::info;

mod status;
mod summary;

pub use status::StatusStorage;
pub use summary::{age_of, col, render, ColumnSpec, MetaTabulator, Table, Tabulator};

#[derive(Debug, Clone)]
pub struct StorageOptions {
    /// Update of an absent object delegates to Create instead of NotFound.
    pub allow_create_on_update: bool,
    pub watch: HubConfig,
}

impl Default for StorageOptions {
    fn default() -> Self {
        Self { allow_create_on_update: false, watch: HubConfig::from_env() }
    }
}

/// Generic storage engine for one resource kind.
pub struct BaseStorage<K: ResourceObject, D> {
    converter: Arc<dyn Converter<K, D>>,
    validator: Arc<dyn Validator<K>>,
    backend: Arc<dyn BackendOps<D>>,
    tabulator: Arc<dyn Tabulator<K>>,
    options: StorageOptions,
    hub: OnceLock<Arc<PollHub<K>>>,
}

/// Feeds the watch poller from the backend through the converter.
struct BackendLister<K: ResourceObject, D> {
    backend: Arc<dyn BackendOps<D>>,
    converter: Arc<dyn Converter<K, D>>,
}

#[async_trait::async_trait]
impl<K: ResourceObject, D: Send + Sync + 'static> Lister<K> for BackendLister<K, D> {
    async fn list_all(&self) -> anyhow::Result<Vec<K>> {
        let recs = self.backend.list(&ListScope::all()).await?;
        let mut out = Vec::with_capacity(recs.len());
        for rec in &recs {
            out.push(self.converter.from_domain(rec).map_err(anyhow::Error::new)?);
        }
        Ok(out)
    }
}

impl<K: ResourceObject, D: Send + Sync + 'static> BaseStorage<K, D> {
    pub fn new(
        converter: Arc<dyn Converter<K, D>>,
        validator: Arc<dyn Validator<K>>,
        backend: Arc<dyn BackendOps<D>>,
    ) -> Self {
        Self::with_options(converter, validator, backend, StorageOptions::default())
    }

    pub fn with_options(
        converter: Arc<dyn Converter<K, D>>,
        validator: Arc<dyn Validator<K>>,
        backend: Arc<dyn BackendOps<D>>,
        options: StorageOptions,
    ) -> Self {
        Self {
            converter,
            validator,
            backend,
            tabulator: Arc::new(MetaTabulator),
            options,
            hub: OnceLock::new(),
        }
    }

    pub fn with_tabulator(mut self, tabulator: Arc<dyn Tabulator<K>>) -> Self {
        self.tabulator = tabulator;
        self
    }

    /// Resolve the acting identity and enforce the kind's namespace scoping.
    /// A missing namespace on a namespaced kind is a caller error, never a
    /// backend error; so is a namespace on a cluster-scoped kind.
    fn resolve_id(&self, namespace: Option<&str>, name: &str) -> RegistryResult<ResourceId> {
        if name.is_empty() {
            return Err(RegistryError::bad_request("resource name must not be empty"));
        }
        match (K::NAMESPACED, namespace) {
            (true, Some(ns)) if !ns.is_empty() => Ok(ResourceId::namespaced(ns, name)),
            (true, _) => Err(RegistryError::bad_request(format!(
                "namespace required for namespaced kind {}",
                K::KIND
            ))),
            (false, None) => Ok(ResourceId::cluster(name)),
            (false, Some(_)) => Err(RegistryError::bad_request(format!(
                "kind {} is cluster-scoped; namespace must be empty",
                K::KIND
            ))),
        }
    }

    fn check_fields(&self, verb: &str, fields: Vec<palisade_core::FieldError>) -> RegistryResult<()> {
        if fields.is_empty() {
            Ok(())
        } else {
            counter!("registry_validation_failures", 1u64);
            Err(RegistryError::from_field_errors(K::KIND, verb, fields))
        }
    }

    async fn fetch(&self, id: &ResourceId, operation: &str) -> RegistryResult<K> {
        let rec = self
            .backend
            .get(id)
            .await
            .map_err(|e| RegistryError::from_backend(e, operation, &id.to_string()))?;
        self.converter.from_domain(&rec)
    }

    fn notify(&self) {
        if let Some(hub) = self.hub.get() {
            hub.nudge();
        }
    }

    /// Fetch one object by identity. No side effects.
    pub async fn get(&self, namespace: Option<&str>, name: &str) -> RegistryResult<K> {
        let id = self.resolve_id(namespace, name)?;
        self.fetch(&id, "get").await
    }

    /// List within a caller-supplied scope. An empty result is a valid,
    /// non-error outcome.
    pub async fn list(&self, scope: &ListScope) -> RegistryResult<ObjectList<K>> {
        if !K::NAMESPACED && scope.namespace.is_some() {
            return Err(RegistryError::bad_request(format!(
                "kind {} is cluster-scoped; namespace selector must be empty",
                K::KIND
            )));
        }
        let recs = self
            .backend
            .list(scope)
            .await
            .map_err(|e| RegistryError::from_backend(e, "list", K::KIND))?;
        self.converter.to_list(recs)
    }

    /// Validate and persist a new object, returning the write's echo with
    /// backend-assigned uid and resourceVersion. Emits Added via the bridge.
    pub async fn create(&self, obj: &K, ctx: &ApplyContext) -> RegistryResult<K> {
        let t0 = Instant::now();
        let id = self.resolve_id(obj.metadata().namespace.as_deref(), &obj.metadata().name)?;
        self.check_fields("create", self.validator.validate_create(obj))?;

        let mut desired = obj.clone();
        if !ctx.field_manager.is_empty() {
            desired.metadata_mut().upsert_managed_fields(
                &ctx.field_manager,
                "Update",
                K::API_VERSION,
            );
        }
        if ctx.dry_run_requested() {
            info!(kind = K::KIND, id = %id, "storage: create dry-run ok");
            return Ok(desired);
        }

        let rec = self.converter.to_domain(&desired)?;
        let echo = self
            .backend
            .create(rec)
            .await
            .map_err(|e| RegistryError::from_backend(e, "create", &id.to_string()))?;
        let created = self.converter.from_domain(&echo)?;
        counter!("registry_writes", 1u64);
        self.notify();
        info!(kind = K::KIND, id = %id, took_ms = %t0.elapsed().as_millis(), "storage: create ok");
        Ok(created)
    }

    /// Resolve the desired state from a deferred producer against the
    /// current object, validate, and persist. Returns the stored object and
    /// whether it was created (create-on-update path).
    pub async fn update(
        &self,
        namespace: Option<&str>,
        name: &str,
        source: &dyn UpdateSource<K>,
        ctx: &ApplyContext,
    ) -> RegistryResult<(K, bool)> {
        let t0 = Instant::now();
        let id = self.resolve_id(namespace, name)?;

        let current = match self.fetch(&id, "update").await {
            Ok(k) => Some(k),
            Err(RegistryError::NotFound(_)) if self.options.allow_create_on_update => None,
            Err(e) => return Err(e),
        };
        let Some(current) = current else {
            let desired = source.resolve(None)?;
            if desired.id() != id {
                return Err(RegistryError::bad_request(
                    "resource identity (name, namespace) is immutable",
                ));
            }
            let created = self.create(&desired, ctx).await?;
            return Ok((created, true));
        };

        let desired = source.resolve(Some(&current))?;
        if desired.id() != id {
            return Err(RegistryError::bad_request(
                "resource identity (name, namespace) is immutable",
            ));
        }
        // Surface stale writes before the backend sees them; the backend
        // still enforces the same precondition authoritatively.
        if let (Some(want), Some(have)) = (desired.resource_version(), current.resource_version())
        {
            if !want.is_empty() && want != have {
                counter!("registry_conflicts", 1u64);
                return Err(RegistryError::Conflict(format!(
                    "update {id}: resource version conflict (have {have}, want {want})"
                )));
            }
        }
        self.check_fields("update", self.validator.validate_update(&desired, &current))?;

        let mut desired = desired;
        if !ctx.field_manager.is_empty() {
            desired.metadata_mut().upsert_managed_fields(
                &ctx.field_manager,
                "Update",
                K::API_VERSION,
            );
        }
        if ctx.dry_run_requested() {
            info!(kind = K::KIND, id = %id, "storage: update dry-run ok");
            return Ok((desired, false));
        }

        let rec = self.converter.to_domain(&desired)?;
        let echo = self
            .backend
            .update(rec)
            .await
            .map_err(|e| RegistryError::from_backend(e, "update", &id.to_string()))?;
        let updated = self.converter.from_domain(&echo)?;
        counter!("registry_writes", 1u64);
        self.notify();
        info!(kind = K::KIND, id = %id, took_ms = %t0.elapsed().as_millis(), "storage: update ok");
        Ok((updated, false))
    }

    /// Delete by identity, returning the last-seen object. The bool mirrors
    /// the contract's `immediate` flag; always true since there is no
    /// finalizer or grace-period machinery.
    pub async fn delete(
        &self,
        namespace: Option<&str>,
        name: &str,
        ctx: &ApplyContext,
    ) -> RegistryResult<(K, bool)> {
        let t0 = Instant::now();
        let id = self.resolve_id(namespace, name)?;
        let current = self.fetch(&id, "delete").await?;
        self.check_fields("delete", self.validator.validate_delete(&current))?;
        if ctx.dry_run_requested() {
            info!(kind = K::KIND, id = %id, "storage: delete dry-run ok");
            return Ok((current, true));
        }
        let gone = self
            .backend
            .delete(&id)
            .await
            .map_err(|e| RegistryError::from_backend(e, "delete", &id.to_string()))?;
        let last = self.converter.from_domain(&gone)?;
        counter!("registry_writes", 1u64);
        self.notify();
        info!(kind = K::KIND, id = %id, took_ms = %t0.elapsed().as_millis(), "storage: delete ok");
        Ok((last, true))
    }

    /// Apply a raw patch payload. The patch-type tag is checked before any
    /// backend call; the patched result goes through update validation
    /// before it is ever persisted.
    pub async fn patch(
        &self,
        namespace: Option<&str>,
        name: &str,
        patch_type_tag: &str,
        raw: &[u8],
        ctx: &ApplyContext,
    ) -> RegistryResult<K> {
        let t0 = Instant::now();
        let patch_type = PatchType::from_tag(patch_type_tag)?;
        let id = self.resolve_id(namespace, name)?;
        let current = self.fetch(&id, "patch").await?;

        let patched = apply_patch(&current, patch_type, raw)?;
        if patched.id() != id || patched.metadata().uid != current.metadata().uid {
            return Err(RegistryError::bad_request(
                "patch must not change resource identity",
            ));
        }
        self.check_fields("patch", self.validator.validate_update(&patched, &current))?;

        let mut patched = patched;
        if !ctx.field_manager.is_empty() {
            patched.metadata_mut().upsert_managed_fields(
                &ctx.field_manager,
                "Apply",
                K::API_VERSION,
            );
        }
        if ctx.dry_run_requested() {
            info!(kind = K::KIND, id = %id, "storage: patch dry-run ok");
            return Ok(patched);
        }

        let rec = self.converter.to_domain(&patched)?;
        let echo = self
            .backend
            .update(rec)
            .await
            .map_err(|e| RegistryError::from_backend(e, "patch", &id.to_string()))?;
        let stored = self.converter.from_domain(&echo)?;
        counter!("registry_writes", 1u64);
        self.notify();
        info!(kind = K::KIND, id = %id, took_ms = %t0.elapsed().as_millis(), "storage: patch ok");
        Ok(stored)
    }

    /// Register a watch client; the stream is consumed by pulling until
    /// closed. The per-kind poller starts on first registration.
    pub fn watch(&self, scope: ListScope) -> RegistryResult<WatchHandle<K>> {
        if !K::NAMESPACED && scope.namespace.is_some() {
            return Err(RegistryError::bad_request(format!(
                "kind {} is cluster-scoped; namespace selector must be empty",
                K::KIND
            )));
        }
        let hub = self.hub.get_or_init(|| {
            let lister = BackendLister {
                backend: Arc::clone(&self.backend),
                converter: Arc::clone(&self.converter),
            };
            PollHub::with_config(Arc::new(lister), self.options.watch.clone())
        });
        Ok(hub.register(scope))
    }

    /// Pure rendering of objects into a fixed column set.
    pub fn table(&self, objs: &[K]) -> Table {
        render(self.tabulator.as_ref(), objs)
    }
}
