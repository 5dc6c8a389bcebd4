//! Content fingerprints for drift detection.
//!
//! The fingerprint is a sha256 over a canonical JSON rendering of the object
//! (object keys sorted at every level) with server-managed metadata, the
//! status and the fingerprint annotation itself left out. It only detects
//! change; it is not a security property.

use crate::error::ControllerError;
use cluster_client::ClientError;
use kube::api::DynamicObject;
use serde_json::Value;
use sha2::{Digest, Sha256};

pub const FINGERPRINT_ANNOTATION: &str = "gpuops.microscaler.io/last-applied-hash";

const SERVER_MANAGED_METADATA: &[&str] = &[
    "resourceVersion",
    "uid",
    "generation",
    "creationTimestamp",
    "deletionTimestamp",
    "managedFields",
    "selfLink",
];

fn strip(value: &mut Value) {
    let Some(root) = value.as_object_mut() else {
        return;
    };
    root.remove("status");
    let Some(metadata) = root.get_mut("metadata").and_then(Value::as_object_mut) else {
        return;
    };
    for field in SERVER_MANAGED_METADATA {
        metadata.remove(*field);
    }
    let empty = match metadata.get_mut("annotations").and_then(Value::as_object_mut) {
        Some(annotations) => {
            annotations.remove(FINGERPRINT_ANNOTATION);
            annotations.is_empty()
        }
        None => false,
    };
    if empty {
        metadata.remove("annotations");
    }
}

/// Writes `value` with object keys in sorted order.
fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(&map[key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

/// Fingerprint of an object's specification.
pub fn fingerprint(obj: &DynamicObject) -> Result<String, ControllerError> {
    let mut value = serde_json::to_value(obj).map_err(ClientError::from)?;
    strip(&mut value);
    let mut canonical = String::new();
    write_canonical(&value, &mut canonical);
    Ok(format!("{:x}", Sha256::digest(canonical.as_bytes())))
}

/// Fingerprint recorded on a stored object, if any.
pub fn stored_fingerprint(obj: &DynamicObject) -> Option<&str> {
    obj.metadata
        .annotations
        .as_ref()?
        .get(FINGERPRINT_ANNOTATION)
        .map(String::as_str)
}

/// Computes the fingerprint and records it on the object.
pub fn annotate(obj: &mut DynamicObject) -> Result<String, ControllerError> {
    let hash = fingerprint(obj)?;
    obj.metadata
        .annotations
        .get_or_insert_with(Default::default)
        .insert(FINGERPRINT_ANNOTATION.to_string(), hash.clone());
    Ok(hash)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn object(value: Value) -> DynamicObject {
        serde_json::from_value(value).unwrap()
    }

    fn config_map(data: Value) -> DynamicObject {
        object(json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": {"name": "default-gpu-clients", "namespace": "gpu-operator"},
            "data": data
        }))
    }

    #[test]
    fn test_fingerprint_ignores_key_order_and_server_fields() {
        let a = config_map(json!({"a": "1", "b": "2"}));
        let mut b = config_map(json!({"b": "2", "a": "1"}));
        b.metadata.resource_version = Some("42".to_string());
        b.metadata.uid = Some("0b7c9a8e".to_string());
        b.data["status"] = json!({"phase": "whatever"});
        assert_eq!(fingerprint(&a).unwrap(), fingerprint(&b).unwrap());
    }

    #[test]
    fn test_fingerprint_changes_with_content() {
        let a = config_map(json!({"clients.yaml": "version: v1"}));
        let b = config_map(json!({"clients.yaml": "version: v2"}));
        assert_ne!(fingerprint(&a).unwrap(), fingerprint(&b).unwrap());
    }

    #[test]
    fn test_annotation_excluded_from_fingerprint() {
        let mut obj = config_map(json!({"a": "1"}));
        let before = fingerprint(&obj).unwrap();
        let recorded = annotate(&mut obj).unwrap();
        assert_eq!(before, recorded);
        assert_eq!(stored_fingerprint(&obj), Some(recorded.as_str()));
        assert_eq!(fingerprint(&obj).unwrap(), recorded);
        assert_eq!(recorded.len(), 64);
    }
}
