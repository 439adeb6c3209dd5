//! Patch engines: whole-document merge patch and indexed patch-operation
//! application. Both are pure functions of (current document, patch payload);
//! neither talks to the backend.

#![forbid(unsafe_code)]

use metrics::counter;
use palisade_core::{RegistryError, ResourceObject};
use serde_json::Value;
use tracing::debug;

mod merge;
mod ops;

pub use merge::merge_documents;
pub use ops::{apply_ops, parse_ops, OpKind, PatchOp};

pub const MERGE_PATCH_TYPE: &str = "application/merge-patch+json";
pub const JSON_PATCH_TYPE: &str = "application/json-patch+json";

/// Patch algorithm selector, carried explicitly on the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchType {
    /// RFC-7396 style whole-document merge; `null` deletes.
    Merge,
    /// RFC-6902 style ordered operation list.
    OperationList,
}

impl PatchType {
    /// An unrecognized tag is rejected before any backend call.
    pub fn from_tag(tag: &str) -> Result<Self, PatchError> {
        match tag {
            MERGE_PATCH_TYPE => Ok(Self::Merge),
            JSON_PATCH_TYPE => Ok(Self::OperationList),
            other => Err(PatchError::UnknownType(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, thiserror::Error, PartialEq)]
pub enum PatchError {
    #[error("unknown patch type: {0}")]
    UnknownType(String),
    #[error("malformed patch payload: {0}")]
    Parse(String),
    #[error("patch with zero operations")]
    EmptyPatch,
    #[error("invalid JSON pointer: {0}")]
    BadPointer(String),
    #[error("path does not exist: {0}")]
    PathNotFound(String),
    #[error("test operation failed at {0}")]
    TestFailed(String),
    #[error("cannot move {from} into its own child {path}")]
    MoveIntoSelf { from: String, path: String },
    #[error("operation {op} requires {field}")]
    MissingField { op: &'static str, field: &'static str },
    #[error("patched document no longer matches the resource shape: {0}")]
    Shape(String),
}

impl From<PatchError> for RegistryError {
    fn from(err: PatchError) -> Self {
        RegistryError::bad_request(err.to_string())
    }
}

/// Apply a raw patch payload to `current`, returning a fresh instance built
/// from the patched tree. The input is never mutated, and fields the patch
/// deleted stay deleted in the output.
pub fn apply_patch<K: ResourceObject>(
    current: &K,
    patch_type: PatchType,
    raw: &[u8],
) -> Result<K, PatchError> {
    counter!("patch_attempts", 1u64);
    let current_tree =
        serde_json::to_value(current).map_err(|e| PatchError::Shape(e.to_string()))?;
    let patched = match patch_type {
        PatchType::Merge => {
            let patch: Value =
                serde_json::from_slice(raw).map_err(|e| PatchError::Parse(e.to_string()))?;
            merge_documents(&current_tree, &patch)
        }
        PatchType::OperationList => {
            let ops = parse_ops(raw)?;
            apply_ops(&current_tree, &ops)?
        }
    };
    let out: K = serde_json::from_value(patched).map_err(|e| {
        counter!("patch_shape_rejected", 1u64);
        PatchError::Shape(e.to_string())
    })?;
    debug!(kind = K::KIND, ?patch_type, "patch applied");
    Ok(out)
}
