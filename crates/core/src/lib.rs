//! Palisade core: shared resource types, the per-kind contracts
//! (Converter/Validator/BackendOps), and the error taxonomy.

#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};

mod apply;
mod contract;
mod error;
mod meta;

pub use apply::ApplyContext;
pub use contract::{
    BackendOps, Converter, DomainRecord, ReplaceWith, ResourceObject, UpdateSource, Validator,
};
pub use error::{FieldError, FieldErrorKind, RegistryError, RegistryResult};
pub use meta::{
    Condition, ListMeta, ListScope, ManagedFieldsEntry, ObjectList, ObjectMeta, ResourceId,
    TypeMeta,
};

/// One event on a single client's watch stream.
///
/// Ordering is FIFO relative to the state transitions the poller observed;
/// there is no cross-client ordering guarantee.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "object")]
pub enum WatchEvent<K> {
    Added(K),
    Modified(K),
    Deleted(K),
    /// Progress marker carrying the highest resourceVersion seen so far.
    Bookmark { resource_version: String },
    Error(RegistryError),
}

impl<K> WatchEvent<K> {
    pub fn event_type(&self) -> &'static str {
        match self {
            WatchEvent::Added(_) => "Added",
            WatchEvent::Modified(_) => "Modified",
            WatchEvent::Deleted(_) => "Deleted",
            WatchEvent::Bookmark { .. } => "Bookmark",
            WatchEvent::Error(_) => "Error",
        }
    }

    pub fn object(&self) -> Option<&K> {
        match self {
            WatchEvent::Added(o) | WatchEvent::Modified(o) | WatchEvent::Deleted(o) => Some(o),
            _ => None,
        }
    }
}
