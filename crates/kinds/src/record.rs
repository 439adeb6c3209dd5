//! Domain-side metadata shared by every kind's record type.
//!
//! The round-trip law requires the converter to carry metadata
//! field-for-field, managedFields included, so the domain shape mirrors
//! `ObjectMeta` minus wire concerns (no type tag, no serde renaming).

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use palisade_core::{ManagedFieldsEntry, ObjectMeta, ResourceId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RecordMeta {
    pub name: String,
    pub namespace: Option<String>,
    pub uid: Option<String>,
    pub revision: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub generation: Option<i64>,
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
    pub managed_fields: Vec<ManagedFieldsEntry>,
}

impl RecordMeta {
    pub fn from_meta(meta: &ObjectMeta) -> Self {
        Self {
            name: meta.name.clone(),
            namespace: meta.namespace.clone(),
            uid: meta.uid.clone(),
            revision: meta.resource_version.clone(),
            created_at: meta.creation_timestamp,
            generation: meta.generation,
            labels: meta.labels.clone(),
            annotations: meta.annotations.clone(),
            managed_fields: meta.managed_fields.clone(),
        }
    }

    pub fn to_meta(&self) -> ObjectMeta {
        ObjectMeta {
            name: self.name.clone(),
            namespace: self.namespace.clone(),
            uid: self.uid.clone(),
            resource_version: self.revision.clone(),
            generation: self.generation,
            creation_timestamp: self.created_at,
            labels: self.labels.clone(),
            annotations: self.annotations.clone(),
            managed_fields: self.managed_fields.clone(),
        }
    }

    pub fn id(&self) -> ResourceId {
        ResourceId { name: self.name.clone(), namespace: self.namespace.clone() }
    }
}

/// One impl of the record plumbing per kind would be nine identical method
/// bodies; the macro keeps them in lockstep with the trait.
macro_rules! impl_domain_record {
    ($record:ty) => {
        impl palisade_core::DomainRecord for $record {
            fn id(&self) -> palisade_core::ResourceId {
                self.meta.id()
            }
            fn uid(&self) -> Option<&str> {
                self.meta.uid.as_deref()
            }
            fn set_uid(&mut self, uid: String) {
                self.meta.uid = Some(uid);
            }
            fn revision(&self) -> Option<&str> {
                self.meta.revision.as_deref()
            }
            fn set_revision(&mut self, revision: String) {
                self.meta.revision = Some(revision);
            }
            fn created_at(&self) -> Option<chrono::DateTime<chrono::Utc>> {
                self.meta.created_at
            }
            fn set_created_at(&mut self, at: chrono::DateTime<chrono::Utc>) {
                self.meta.created_at = Some(at);
            }
            fn labels(&self) -> &std::collections::BTreeMap<String, String> {
                &self.meta.labels
            }
        }
    };
}

pub(crate) use impl_domain_record;
