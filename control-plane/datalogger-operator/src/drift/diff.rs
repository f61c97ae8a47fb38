use json_patch::{MoveOperation, Patch, PatchOperation, ReplaceOperation};
use serde::Serialize;
use serde_json::Value as JsonValue;

/// RFC 6902 patch turning `from` into `to`.
pub fn diff<T: Serialize>(from: &T, to: &T) -> Result<Patch, serde_json::Error> {
    let from = serde_json::to_value(from)?;
    let to = serde_json::to_value(to)?;
    Ok(json_patch::diff(&from, &to))
}

/// Merge adjacent operations of a patch meant for `source`:
/// `remove p` + `add p v` becomes `replace p v`, and `remove p` + `add q v`
/// where `v` is the removed value becomes `move p -> q`.
///
/// Values are read from `source` as it evolves under the patch. If the patch
/// does not apply cleanly the input is returned unchanged.
pub fn factorize(source: &JsonValue, patch: Patch) -> Patch {
    let mut doc = source.clone();
    let mut out = Vec::with_capacity(patch.0.len());
    let mut ops = patch.0.clone().into_iter().peekable();

    while let Some(op) = ops.next() {
        let merged = match (&op, ops.peek()) {
            (PatchOperation::Remove(rm), Some(PatchOperation::Add(add))) => {
                if rm.path == add.path {
                    Some(PatchOperation::Replace(ReplaceOperation {
                        path: add.path.clone(),
                        value: add.value.clone(),
                    }))
                } else if doc.pointer(rm.path.as_str()) == Some(&add.value) {
                    Some(PatchOperation::Move(MoveOperation {
                        from: rm.path.clone(),
                        path: add.path.clone(),
                    }))
                } else {
                    None
                }
            }
            _ => None,
        };
        let next = match merged {
            Some(m) => {
                ops.next();
                m
            }
            None => op,
        };
        if json_patch::patch(&mut doc, std::slice::from_ref(&next)).is_err() {
            return patch;
        }
        out.push(next);
    }
    Patch(out)
}

/// Factorized diff rendered as JSON, for debug logs.
pub fn describe<T: Serialize>(from: &T, to: &T) -> Result<String, serde_json::Error> {
    let source = serde_json::to_value(from)?;
    let patch = factorize(&source, diff(from, to)?);
    serde_json::to_string(&patch)
}
