//! Status subresource: a write path that can only move the `status` field.
//!
//! Controllers report observed state through here; whatever the payload says
//! about spec or metadata is discarded and the stored values win. The
//! reverse holds on the main path, which is expected to preserve status
//! as-is (kind converters keep it opaque).

use std::sync::Arc;

use palisade_core::{
    ApplyContext, RegistryError, RegistryResult, ReplaceWith, ResourceObject,
};
use palisade_patch::{apply_patch, PatchType};
use serde_json::Value;

use crate::BaseStorage;

pub struct StatusStorage<K: ResourceObject, D> {
    parent: Arc<BaseStorage<K, D>>,
}

impl<K: ResourceObject, D: Send + Sync + 'static> StatusStorage<K, D> {
    pub fn new(parent: Arc<BaseStorage<K, D>>) -> Self {
        Self { parent }
    }

    /// Keep everything from `current` except `status`, which is taken from
    /// `desired` (cleared when desired has none).
    fn overlay_status(current: &K, desired: &K) -> RegistryResult<K> {
        let mut base = serde_json::to_value(current)
            .map_err(|e| RegistryError::Internal(format!("encode {}: {e}", K::KIND)))?;
        let incoming = serde_json::to_value(desired)
            .map_err(|e| RegistryError::Internal(format!("encode {}: {e}", K::KIND)))?;
        if let Value::Object(ref mut map) = base {
            match incoming.get("status") {
                Some(status) => {
                    map.insert("status".to_string(), status.clone());
                }
                None => {
                    map.remove("status");
                }
            }
        }
        serde_json::from_value(base)
            .map_err(|e| RegistryError::Internal(format!("decode {}: {e}", K::KIND)))
    }

    pub async fn get(&self, namespace: Option<&str>, name: &str) -> RegistryResult<K> {
        self.parent.get(namespace, name).await
    }

    /// Replace the object's status with the payload's. The resourceVersion
    /// precondition of the main update path still applies.
    pub async fn update(
        &self,
        namespace: Option<&str>,
        name: &str,
        desired: &K,
        ctx: &ApplyContext,
    ) -> RegistryResult<K> {
        let current = self.parent.get(namespace, name).await?;
        let mut merged = Self::overlay_status(&current, desired)?;
        // The precondition comes from the caller's payload, not the fetch.
        merged.metadata_mut().resource_version =
            desired.metadata().resource_version.clone();
        let (stored, _) = self
            .parent
            .update(namespace, name, &ReplaceWith(merged), ctx)
            .await?;
        Ok(stored)
    }

    /// Patch against the current object, then keep only the status delta.
    pub async fn patch(
        &self,
        namespace: Option<&str>,
        name: &str,
        patch_type_tag: &str,
        raw: &[u8],
        ctx: &ApplyContext,
    ) -> RegistryResult<K> {
        let patch_type = PatchType::from_tag(patch_type_tag)?;
        let current = self.parent.get(namespace, name).await?;
        let patched = apply_patch(&current, patch_type, raw)?;
        let mut merged = Self::overlay_status(&current, &patched)?;
        merged.metadata_mut().resource_version =
            current.metadata().resource_version.clone();
        let (stored, _) = self
            .parent
            .update(namespace, name, &ReplaceWith(merged), ctx)
            .await?;
        Ok(stored)
    }
}
