//! Per-kind contracts the generic registry is parameterized over.
//!
//! A concrete registry is assembled by supplying kind-specific
//! implementations of `Converter`, `Validator`, and `BackendOps`; the
//! registry itself never looks inside a kind's spec or status.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{FieldError, RegistryError};
use crate::meta::{ListMeta, ListScope, ObjectList, ObjectMeta, ResourceId, TypeMeta};

/// Capabilities the registry needs from an external representation `K`.
pub trait ResourceObject:
    Clone + Serialize + DeserializeOwned + Send + Sync + 'static
{
    const KIND: &'static str;
    const API_VERSION: &'static str;
    const NAMESPACED: bool;

    fn metadata(&self) -> &ObjectMeta;
    fn metadata_mut(&mut self) -> &mut ObjectMeta;

    fn id(&self) -> ResourceId {
        self.metadata().id()
    }

    fn resource_version(&self) -> Option<&str> {
        self.metadata().resource_version.as_deref()
    }
}

/// Bidirectional mapping between the wire shape `K` and the backend's
/// domain shape `D`. Metadata must survive a round trip field-for-field,
/// managedFields included.
pub trait Converter<K: ResourceObject, D>: Send + Sync {
    fn to_domain(&self, obj: &K) -> Result<D, RegistryError>;
    fn from_domain(&self, rec: &D) -> Result<K, RegistryError>;

    /// Batch path used by List.
    fn to_list(&self, recs: Vec<D>) -> Result<ObjectList<K>, RegistryError> {
        let mut items = Vec::with_capacity(recs.len());
        for rec in &recs {
            items.push(self.from_domain(rec)?);
        }
        Ok(ObjectList {
            type_meta: TypeMeta::new(K::API_VERSION, &format!("{}List", K::KIND)),
            metadata: ListMeta::default(),
            items,
        })
    }
}

/// Pure per-kind validation; each call returns every failing field.
pub trait Validator<K: ResourceObject>: Send + Sync {
    fn validate_create(&self, obj: &K) -> Vec<FieldError>;
    fn validate_update(&self, obj: &K, old: &K) -> Vec<FieldError>;

    fn validate_delete(&self, _obj: &K) -> Vec<FieldError> {
        Vec::new()
    }
}

/// Persistence seam for one resource kind. The backend is the source of
/// truth for name uniqueness, uid, and resourceVersion; errors are free
/// text and the classifier owns the taxonomy.
#[async_trait::async_trait]
pub trait BackendOps<D>: Send + Sync {
    async fn get(&self, id: &ResourceId) -> anyhow::Result<D>;
    async fn list(&self, scope: &ListScope) -> anyhow::Result<Vec<D>>;
    /// Returns the write's echo with backend-assigned uid/resourceVersion.
    async fn create(&self, rec: D) -> anyhow::Result<D>;
    async fn update(&self, rec: D) -> anyhow::Result<D>;
    /// Returns the record as it was just before deletion.
    async fn delete(&self, id: &ResourceId) -> anyhow::Result<D>;
}

/// What the reference backend needs from a domain record.
pub trait DomainRecord: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    fn id(&self) -> ResourceId;
    fn uid(&self) -> Option<&str>;
    fn set_uid(&mut self, uid: String);
    fn revision(&self) -> Option<&str>;
    fn set_revision(&mut self, revision: String);
    fn created_at(&self) -> Option<DateTime<Utc>>;
    fn set_created_at(&mut self, at: DateTime<Utc>);
    fn labels(&self) -> &BTreeMap<String, String>;
}

/// Deferred producer of the desired object for Update.
///
/// The indirection exists so a conflict-retry loop can re-invoke the source
/// against a freshly re-fetched current object without changing the
/// registry's public contract.
pub trait UpdateSource<K: ResourceObject>: Send + Sync {
    fn resolve(&self, current: Option<&K>) -> Result<K, RegistryError>;
}

impl<K, F> UpdateSource<K> for F
where
    K: ResourceObject,
    F: Fn(Option<&K>) -> Result<K, RegistryError> + Send + Sync,
{
    fn resolve(&self, current: Option<&K>) -> Result<K, RegistryError> {
        (self)(current)
    }
}

/// One-shot replacement source ignoring the current object.
pub struct ReplaceWith<K>(pub K);

impl<K: ResourceObject> UpdateSource<K> for ReplaceWith<K> {
    fn resolve(&self, _current: Option<&K>) -> Result<K, RegistryError> {
        Ok(self.0.clone())
    }
}
