//! RFC-7396 style merge: the patch's own shape implies the edit.

use serde_json::Value;

/// Merge `patch` into `current` and return the merged tree.
///
/// Object members of the patch merge recursively, `null` members delete,
/// and anything else (arrays included) replaces the current value
/// wholesale. Idempotent; not commutative across chained patches.
pub fn merge_documents(current: &Value, patch: &Value) -> Value {
    let Value::Object(patch_map) = patch else {
        return patch.clone();
    };
    let mut out = match current {
        Value::Object(map) => map.clone(),
        // Non-object current is discarded and rebuilt from the patch.
        _ => serde_json::Map::new(),
    };
    for (key, patch_value) in patch_map {
        if patch_value.is_null() {
            out.remove(key);
        } else {
            let base = out.get(key).cloned().unwrap_or(Value::Null);
            out.insert(key.clone(), merge_documents(&base, patch_value));
        }
    }
    Value::Object(out)
}
