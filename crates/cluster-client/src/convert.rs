//! Conversion between typed `k8s-openapi` objects and `DynamicObject`.

use crate::error::ClientError;
use kube::api::DynamicObject;
use serde::Serialize;
use serde::de::DeserializeOwned;

/// Converts a typed object into a `DynamicObject`, keeping `apiVersion`/`kind`.
pub fn to_dynamic<K: Serialize>(obj: &K) -> Result<DynamicObject, ClientError> {
    Ok(serde_json::from_value(serde_json::to_value(obj)?)?)
}

/// Converts a `DynamicObject` back into a typed object.
pub fn from_dynamic<K: DeserializeOwned>(obj: &DynamicObject) -> Result<K, ClientError> {
    Ok(serde_json::from_value(serde_json::to_value(obj)?)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::apps::v1::DaemonSet;
    use kube::api::ObjectMeta;

    #[test]
    fn test_typed_dynamic_round_trip_keeps_type_meta() {
        let ds = DaemonSet {
            metadata: ObjectMeta {
                name: Some("nvidia-device-plugin-daemonset".to_string()),
                namespace: Some("gpu-operator".to_string()),
                ..Default::default()
            },
            ..Default::default()
        };

        let dynamic = to_dynamic(&ds).unwrap();
        let types = dynamic.types.clone().unwrap();
        assert_eq!(types.kind, "DaemonSet");
        assert_eq!(types.api_version, "apps/v1");

        let back: DaemonSet = from_dynamic(&dynamic).unwrap();
        assert_eq!(back, ds);
    }
}
