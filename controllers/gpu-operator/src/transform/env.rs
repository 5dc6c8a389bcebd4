//! Environment variable upserts.
//!
//! Every runtime path, runtime class name, MIG strategy and feature flag the
//! transforms set goes through `upsert_env`, so an existing variable keeps
//! its position and only its value changes.

use crds::EnvVarSpec;
use k8s_openapi::api::core::v1::{Container, EnvVar, EnvVarSource, ObjectFieldSelector};

/// Overwrites `name` in place when present, appends it otherwise.
pub fn upsert_env(env: &mut Vec<EnvVar>, name: &str, value: impl Into<String>) {
    let value = Some(value.into());
    match env.iter_mut().find(|e| e.name == name) {
        Some(existing) => {
            existing.value = value;
            existing.value_from = None;
        }
        None => env.push(EnvVar {
            name: name.to_string(),
            value,
            value_from: None,
        }),
    }
}

pub fn set_env(container: &mut Container, name: &str, value: impl Into<String>) {
    upsert_env(container.env.get_or_insert_with(Vec::new), name, value);
}

/// Sets `name` from a pod field (downward API), e.g. `status.hostIP`.
pub fn set_env_from_field(container: &mut Container, name: &str, field_path: &str) {
    let env = container.env.get_or_insert_with(Vec::new);
    let source = Some(EnvVarSource {
        field_ref: Some(ObjectFieldSelector {
            api_version: None,
            field_path: field_path.to_string(),
        }),
        ..Default::default()
    });
    match env.iter_mut().find(|e| e.name == name) {
        Some(existing) => {
            existing.value = None;
            existing.value_from = source;
        }
        None => env.push(EnvVar {
            name: name.to_string(),
            value: None,
            value_from: source,
        }),
    }
}

/// Literal value of `name`, if set.
pub fn get_env<'a>(container: &'a Container, name: &str) -> Option<&'a str> {
    container
        .env
        .as_ref()?
        .iter()
        .find(|e| e.name == name)
        .and_then(|e| e.value.as_deref())
}

/// Upserts user-supplied variables in order.
pub fn apply_env_overrides(container: &mut Container, overrides: &[EnvVarSpec]) {
    for var in overrides {
        set_env(container, &var.name, var.value.as_str());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn var(name: &str, value: &str) -> EnvVar {
        EnvVar {
            name: name.to_string(),
            value: Some(value.to_string()),
            value_from: None,
        }
    }

    #[test]
    fn test_upsert_overwrites_in_place() {
        let mut env = vec![var("A", "1"), var("B", "2"), var("C", "3")];
        upsert_env(&mut env, "B", "20");
        assert_eq!(env, vec![var("A", "1"), var("B", "20"), var("C", "3")]);

        upsert_env(&mut env, "D", "4");
        assert_eq!(env.last(), Some(&var("D", "4")));
        assert_eq!(env.len(), 4);
    }

    #[test]
    fn test_upsert_is_idempotent() {
        let mut once = vec![var("RUNTIME", "containerd"), var("ROOT", "/usr/local/nvidia")];
        upsert_env(&mut once, "CDI_ENABLED", "true");
        upsert_env(&mut once, "RUNTIME", "crio");

        let mut twice = once.clone();
        upsert_env(&mut twice, "CDI_ENABLED", "true");
        upsert_env(&mut twice, "RUNTIME", "crio");
        assert_eq!(once, twice);
    }

    #[test]
    fn test_upsert_replaces_field_reference() {
        let mut container = Container::default();
        set_env_from_field(&mut container, "NODE_IP", "status.hostIP");
        assert_eq!(get_env(&container, "NODE_IP"), None);

        set_env(&mut container, "NODE_IP", "10.0.0.1");
        let env = container.env.as_ref().unwrap();
        assert_eq!(env.len(), 1);
        assert!(env[0].value_from.is_none());
        assert_eq!(get_env(&container, "NODE_IP"), Some("10.0.0.1"));
    }

    #[test]
    fn test_overrides_apply_in_order() {
        let mut container = Container {
            env: Some(vec![var("FAIL_ON_INIT_ERROR", "true")]),
            ..Default::default()
        };
        apply_env_overrides(
            &mut container,
            &[
                EnvVarSpec::new("FAIL_ON_INIT_ERROR", "false"),
                EnvVarSpec::new("PASS_DEVICE_SPECS", "true"),
            ],
        );
        assert_eq!(get_env(&container, "FAIL_ON_INIT_ERROR"), Some("false"));
        assert_eq!(get_env(&container, "PASS_DEVICE_SPECS"), Some("true"));
    }
}
