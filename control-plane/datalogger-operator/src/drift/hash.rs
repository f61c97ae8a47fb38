use kube::Resource;
use serde::Serialize;
use serde_json::{Map, Value as JsonValue};
use sha2::{Digest, Sha256};

/// Annotation holding the hex SHA-256 of the object as last written.
pub const HASH_ANNOTATION: &str = "app.datalogger.io/last-applied-hash";

#[derive(thiserror::Error, Debug)]
pub enum HashError {
    #[error("failed to encode object for hashing: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Hash annotation currently stored on `obj`.
pub fn stored_hash<K: Resource>(obj: &K) -> Option<&str> {
    obj.meta()
        .annotations
        .as_ref()?
        .get(HASH_ANNOTATION)
        .map(String::as_str)
}

fn strip_annotation<K: Resource>(obj: &mut K) {
    let meta = obj.meta_mut();
    if let Some(annotations) = meta.annotations.as_mut() {
        annotations.remove(HASH_ANNOTATION);
        if annotations.is_empty() {
            meta.annotations = None;
        }
    }
}

/// Recursively sort object keys so equal content encodes to equal bytes
/// whatever map ordering serde_json was built with.
fn canonicalize(value: JsonValue) -> JsonValue {
    match value {
        JsonValue::Object(map) => {
            let mut entries: Vec<(String, JsonValue)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            let mut sorted = Map::new();
            for (k, v) in entries {
                sorted.insert(k, canonicalize(v));
            }
            JsonValue::Object(sorted)
        }
        JsonValue::Array(items) => {
            JsonValue::Array(items.into_iter().map(canonicalize).collect())
        }
        other => other,
    }
}

/// Canonical JSON bytes of `obj` without its hash annotation.
pub fn canonical_bytes<K: Resource + Serialize + Clone>(
    obj: &K,
) -> Result<Vec<u8>, HashError> {
    let mut stripped = obj.clone();
    strip_annotation(&mut stripped);
    let value = canonicalize(serde_json::to_value(&stripped)?);
    Ok(serde_json::to_vec(&value)?)
}

fn digest<K: Resource + Serialize + Clone>(obj: &K) -> Result<String, HashError> {
    let bytes = canonical_bytes(obj)?;
    Ok(hex::encode(Sha256::digest(&bytes)))
}

/// Hash `obj` (minus any previous hash) and store the digest under
/// [`HASH_ANNOTATION`]. Returns the digest.
pub fn compute_hash<K: Resource + Serialize + Clone>(
    obj: &mut K,
) -> Result<String, HashError> {
    strip_annotation(obj);
    let hash = digest(obj)?;
    obj.meta_mut()
        .annotations
        .get_or_insert_with(Default::default)
        .insert(HASH_ANNOTATION.to_string(), hash.clone());
    Ok(hash)
}

/// Compare by content hash. Each side uses its stored annotation, or a hash
/// computed on demand when it has none.
pub fn equal<K: Resource + Serialize + Clone>(
    desired: &K,
    current: &K,
) -> Result<bool, HashError> {
    let want = match stored_hash(desired) {
        Some(h) => h.to_string(),
        None => digest(desired)?,
    };
    let have = match stored_hash(current) {
        Some(h) => h.to_string(),
        None => digest(current)?,
    };
    Ok(want == have)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
    use kube::core::ObjectMeta;

    use super::*;
    use crate::crd::API_GROUP;

    fn deployment(replicas: i32) -> Deployment {
        Deployment {
            metadata: ObjectMeta {
                name: Some("app1".into()),
                namespace: Some("default".into()),
                labels: Some(BTreeMap::from([("app".into(), "app1".into())])),
                ..Default::default()
            },
            spec: Some(DeploymentSpec {
                replicas: Some(replicas),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn annotation_key_lives_in_the_api_group() {
        assert_eq!(HASH_ANNOTATION, format!("{API_GROUP}/last-applied-hash"));
    }

    #[test]
    fn compute_hash_writes_hex_sha256() {
        let mut dep = deployment(2);
        let hash = compute_hash(&mut dep).unwrap();
        assert_eq!(hash.len(), 64);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(stored_hash(&dep), Some(hash.as_str()));
    }

    #[test]
    fn compute_hash_ignores_previous_hash() {
        let mut a = deployment(2);
        let first = compute_hash(&mut a).unwrap();
        let second = compute_hash(&mut a).unwrap();
        assert_eq!(first, second);

        let mut b = deployment(2);
        b.metadata.annotations = Some(BTreeMap::from([(
            HASH_ANNOTATION.to_string(),
            "stale".to_string(),
        )]));
        assert_eq!(compute_hash(&mut b).unwrap(), first);
    }

    #[test]
    fn equal_computes_missing_desired_hash_on_demand() {
        let mut current = deployment(2);
        compute_hash(&mut current).unwrap();
        let desired = deployment(2);
        assert!(equal(&desired, &current).unwrap());
        assert!(!equal(&deployment(3), &current).unwrap());
    }

    #[test]
    fn equal_is_byte_identity_of_canonical_json() {
        let a = deployment(2);
        let mut b = deployment(2);
        b.metadata
            .labels
            .get_or_insert_with(Default::default)
            .insert("extra".into(), "x".into());
        assert_eq!(
            equal(&a, &b).unwrap(),
            canonical_bytes(&a).unwrap() == canonical_bytes(&b).unwrap()
        );
        assert!(!equal(&a, &b).unwrap());
        assert!(equal(&a, &deployment(2)).unwrap());
    }

    #[test]
    fn other_annotations_are_part_of_the_hash() {
        let plain = deployment(2);
        let mut annotated = deployment(2);
        annotated.metadata.annotations =
            Some(BTreeMap::from([("note".to_string(), "x".to_string())]));
        assert!(!equal(&plain, &annotated).unwrap());
    }

    #[test]
    fn canonicalize_sorts_nested_keys() {
        let v = canonicalize(serde_json::json!({"b": {"d": 1, "c": [ {"z": 1, "y": 2} ]}, "a": 0}));
        assert_eq!(
            serde_json::to_string(&v).unwrap(),
            r#"{"a":0,"b":{"c":[{"y":2,"z":1}],"d":1}}"#
        );
    }
}
