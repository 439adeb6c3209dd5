//! Indexed patch-operation application (RFC-6902 shape): an ordered list of
//! add/remove/replace/move/copy/test operations addressed by JSON Pointer.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::PatchError;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OpKind {
    Add,
    Remove,
    Replace,
    Move,
    Copy,
    Test,
}

/// One `{op, path, value?, from?}` instruction.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PatchOp {
    pub op: OpKind,
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
}

/// Parse and validate an operation list. A syntactically valid array with
/// zero operations is a caller error, distinct from "no patch".
pub fn parse_ops(raw: &[u8]) -> Result<Vec<PatchOp>, PatchError> {
    let ops: Vec<PatchOp> =
        serde_json::from_slice(raw).map_err(|e| PatchError::Parse(e.to_string()))?;
    if ops.is_empty() {
        return Err(PatchError::EmptyPatch);
    }
    for op in &ops {
        split_pointer(&op.path)?;
        match op.op {
            OpKind::Add | OpKind::Replace | OpKind::Test => {
                if op.value.is_none() {
                    return Err(PatchError::MissingField { op: op_name(op.op), field: "value" });
                }
            }
            OpKind::Move | OpKind::Copy => match &op.from {
                Some(from) => {
                    split_pointer(from)?;
                }
                None => {
                    return Err(PatchError::MissingField { op: op_name(op.op), field: "from" })
                }
            },
            OpKind::Remove => {}
        }
    }
    Ok(ops)
}

/// Apply operations in array order against a copy of `current`. A failing
/// `test` (or any other error) aborts the whole patch with no partial
/// effect: the working tree is only returned on success.
pub fn apply_ops(current: &Value, ops: &[PatchOp]) -> Result<Value, PatchError> {
    let mut work = current.clone();
    for op in ops {
        apply_one(&mut work, op)?;
    }
    Ok(work)
}

fn op_name(kind: OpKind) -> &'static str {
    match kind {
        OpKind::Add => "add",
        OpKind::Remove => "remove",
        OpKind::Replace => "replace",
        OpKind::Move => "move",
        OpKind::Copy => "copy",
        OpKind::Test => "test",
    }
}

fn apply_one(doc: &mut Value, op: &PatchOp) -> Result<(), PatchError> {
    let path = split_pointer(&op.path)?;
    match op.op {
        OpKind::Add => add_at(doc, &path, op.value.clone().unwrap_or(Value::Null), &op.path),
        OpKind::Remove => remove_at(doc, &path, &op.path).map(|_| ()),
        OpKind::Replace => replace_at(doc, &path, op.value.clone().unwrap_or(Value::Null), &op.path),
        OpKind::Move => {
            let from_raw = op.from.as_deref().unwrap_or_default();
            let from = split_pointer(from_raw)?;
            if path.len() > from.len() && path[..from.len()] == from[..] {
                return Err(PatchError::MoveIntoSelf {
                    from: from_raw.to_string(),
                    path: op.path.clone(),
                });
            }
            let taken = remove_at(doc, &from, from_raw)?;
            add_at(doc, &path, taken, &op.path)
        }
        OpKind::Copy => {
            let from_raw = op.from.as_deref().unwrap_or_default();
            let from = split_pointer(from_raw)?;
            let copied = resolve(doc, &from, from_raw)?.clone();
            add_at(doc, &path, copied, &op.path)
        }
        OpKind::Test => {
            let actual = resolve(doc, &path, &op.path)?;
            let expected = op.value.as_ref().unwrap_or(&Value::Null);
            if actual != expected {
                return Err(PatchError::TestFailed(op.path.clone()));
            }
            Ok(())
        }
    }
}

/// Split a JSON Pointer into unescaped tokens. Empty pointer addresses the
/// whole document.
fn split_pointer(path: &str) -> Result<Vec<String>, PatchError> {
    if path.is_empty() {
        return Ok(Vec::new());
    }
    if !path.starts_with('/') {
        return Err(PatchError::BadPointer(path.to_string()));
    }
    Ok(path[1..].split('/').map(|t| t.replace("~1", "/").replace("~0", "~")).collect())
}

fn parse_index(token: &str, path: &str) -> Result<usize, PatchError> {
    // "01" is not a valid array index per RFC 6901
    if token.len() > 1 && token.starts_with('0') {
        return Err(PatchError::BadPointer(path.to_string()));
    }
    token.parse::<usize>().map_err(|_| PatchError::PathNotFound(path.to_string()))
}

fn resolve<'a>(doc: &'a Value, tokens: &[String], path: &str) -> Result<&'a Value, PatchError> {
    let mut cur = doc;
    for token in tokens {
        cur = match cur {
            Value::Object(map) => {
                map.get(token).ok_or_else(|| PatchError::PathNotFound(path.to_string()))?
            }
            Value::Array(arr) => {
                let idx = parse_index(token, path)?;
                arr.get(idx).ok_or_else(|| PatchError::PathNotFound(path.to_string()))?
            }
            _ => return Err(PatchError::PathNotFound(path.to_string())),
        };
    }
    Ok(cur)
}

fn descend<'a>(doc: &'a mut Value, token: &str, path: &str) -> Result<&'a mut Value, PatchError> {
    match doc {
        Value::Object(map) => {
            map.get_mut(token).ok_or_else(|| PatchError::PathNotFound(path.to_string()))
        }
        Value::Array(arr) => {
            let idx = parse_index(token, path)?;
            arr.get_mut(idx).ok_or_else(|| PatchError::PathNotFound(path.to_string()))
        }
        _ => Err(PatchError::PathNotFound(path.to_string())),
    }
}

fn add_at(doc: &mut Value, tokens: &[String], value: Value, path: &str) -> Result<(), PatchError> {
    let Some((last, parents)) = tokens.split_last() else {
        *doc = value;
        return Ok(());
    };
    let mut target = doc;
    for token in parents {
        target = descend(target, token, path)?;
    }
    match target {
        Value::Object(map) => {
            map.insert(last.clone(), value);
            Ok(())
        }
        Value::Array(arr) => {
            if last == "-" {
                arr.push(value);
            } else {
                let idx = parse_index(last, path)?;
                if idx > arr.len() {
                    return Err(PatchError::PathNotFound(path.to_string()));
                }
                arr.insert(idx, value);
            }
            Ok(())
        }
        _ => Err(PatchError::PathNotFound(path.to_string())),
    }
}

fn remove_at(doc: &mut Value, tokens: &[String], path: &str) -> Result<Value, PatchError> {
    let Some((last, parents)) = tokens.split_last() else {
        return Err(PatchError::BadPointer("cannot remove the whole document".to_string()));
    };
    let mut target = doc;
    for token in parents {
        target = descend(target, token, path)?;
    }
    match target {
        Value::Object(map) => {
            map.remove(last.as_str()).ok_or_else(|| PatchError::PathNotFound(path.to_string()))
        }
        Value::Array(arr) => {
            let idx = parse_index(last, path)?;
            if idx >= arr.len() {
                return Err(PatchError::PathNotFound(path.to_string()));
            }
            Ok(arr.remove(idx))
        }
        _ => Err(PatchError::PathNotFound(path.to_string())),
    }
}

fn replace_at(
    doc: &mut Value,
    tokens: &[String],
    value: Value,
    path: &str,
) -> Result<(), PatchError> {
    if tokens.is_empty() {
        *doc = value;
        return Ok(());
    }
    let target = {
        let mut cur = doc;
        for token in tokens {
            cur = descend(cur, token, path)?;
        }
        cur
    };
    *target = value;
    Ok(())
}
