//! Image reference resolution.

use crate::error::ControllerError;
use crds::ImageSpec;

const DIGEST_MARKER: &str = "sha256:";

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

/// Content-addressed references are never re-tagged.
pub fn is_digest(image: &str) -> bool {
    image.contains(DIGEST_MARKER)
}

/// Final image path of a component.
///
/// A bare `image` is taken as a full path. With `repository`, `image` and
/// `version` all set the path is assembled, using `@` for digests. Anything
/// else falls back to the operator's default image for the component.
pub fn resolve_image(spec: &ImageSpec, fallback: Option<&str>, component: &str) -> Result<String, ControllerError> {
    match (non_empty(&spec.repository), non_empty(&spec.image), non_empty(&spec.version)) {
        (None, Some(image), None) => Ok(image.to_string()),
        (Some(repository), Some(image), Some(version)) => {
            let separator = if version.starts_with(DIGEST_MARKER) { '@' } else { ':' };
            Ok(format!("{}/{}{}{}", repository.trim_end_matches('/'), image, separator, version))
        }
        _ => fallback
            .map(str::trim)
            .filter(|f| !f.is_empty())
            .map(str::to_string)
            .ok_or_else(|| {
                ControllerError::InvalidConfig(format!(
                    "no image path for {}: set repository, image and version in the ClusterPolicy or provide a default image",
                    component
                ))
            }),
    }
}

/// Appends the OS tag ("550.54.15" -> "550.54.15-ubuntu22.04").
pub fn with_os_suffix(image: &str, os_tag: &str) -> String {
    if is_digest(image) || os_tag.is_empty() {
        image.to_string()
    } else {
        format!("{}-{}", image, os_tag)
    }
}

/// Precompiled driver image for one kernel: "550-5.15.0-91-generic-ubuntu22.04".
pub fn precompiled(image: &str, kernel: &str, os_tag: &str) -> String {
    if is_digest(image) {
        image.to_string()
    } else {
        with_os_suffix(&format!("{}-{}", image, kernel), os_tag)
    }
}

/// Adds `tag` when the reference has neither tag nor digest.
pub fn with_tag_if_missing(image: &str, tag: &str) -> String {
    let last_segment = image.rsplit('/').next().unwrap_or(image);
    if image.contains('@') || last_segment.contains(':') {
        image.to_string()
    } else {
        format!("{}:{}", image, tag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(repository: Option<&str>, image: Option<&str>, version: Option<&str>) -> ImageSpec {
        ImageSpec {
            repository: repository.map(str::to_string),
            image: image.map(str::to_string),
            version: version.map(str::to_string),
            ..Default::default()
        }
    }

    #[test]
    fn test_resolve_from_coordinates() {
        let image = resolve_image(&spec(Some("nvcr.io/nvidia/"), Some("driver"), Some("550.54.15")), None, "driver");
        assert_eq!(image.unwrap(), "nvcr.io/nvidia/driver:550.54.15");

        let digest = "sha256:2b5ba5d5f5e7d2b6f9c1f4a3f2e1d0c9b8a7f6e5d4c3b2a1f0e9d8c7b6a5f4e3";
        let image = resolve_image(&spec(Some("nvcr.io/nvidia"), Some("driver"), Some(digest)), None, "driver");
        assert_eq!(image.unwrap(), format!("nvcr.io/nvidia/driver@{}", digest));
    }

    #[test]
    fn test_resolve_full_path_and_fallback() {
        let image = resolve_image(&spec(None, Some("registry.local/driver:1.0"), None), None, "driver");
        assert_eq!(image.unwrap(), "registry.local/driver:1.0");

        let image = resolve_image(&spec(Some("nvcr.io"), None, Some("1.0")), Some("nvcr.io/nvidia/driver:550"), "driver");
        assert_eq!(image.unwrap(), "nvcr.io/nvidia/driver:550");
    }

    #[test]
    fn test_unresolvable_image_is_config_error() {
        let err = resolve_image(&ImageSpec::default(), Some("  "), "device-plugin").unwrap_err();
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("device-plugin"));
    }

    #[test]
    fn test_os_suffix_skips_digests() {
        assert_eq!(with_os_suffix("nvcr.io/nvidia/driver:550", "ubuntu22.04"), "nvcr.io/nvidia/driver:550-ubuntu22.04");
        assert_eq!(with_os_suffix("nvcr.io/nvidia/driver@sha256:abcd", "rhel8"), "nvcr.io/nvidia/driver@sha256:abcd");
        assert_eq!(
            precompiled("nvcr.io/nvidia/driver:550", "5.15.0-91-generic", "ubuntu22.04"),
            "nvcr.io/nvidia/driver:550-5.15.0-91-generic-ubuntu22.04"
        );
    }

    #[test]
    fn test_tag_if_missing() {
        assert_eq!(with_tag_if_missing("registry:5000/dtk", "414.92"), "registry:5000/dtk:414.92");
        assert_eq!(with_tag_if_missing("quay.io/dtk:latest", "414.92"), "quay.io/dtk:latest");
        assert_eq!(with_tag_if_missing("quay.io/dtk@sha256:abcd", "414.92"), "quay.io/dtk@sha256:abcd");
    }
}
