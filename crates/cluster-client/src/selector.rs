//! Label and field selectors for list requests.

use kube::api::ListParams;
use std::collections::BTreeMap;

/// Label/field selector pair passed to `list`.
///
/// Selectors use the API server syntax: comma-separated requirements of the
/// form `key=value`, `key!=value`, `key` (exists) and `!key` (absent).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selector {
    pub labels: Option<String>,
    pub fields: Option<String>,
}

impl Selector {
    /// Matches every object.
    pub fn everything() -> Self {
        Self::default()
    }

    pub fn labels(selector: impl Into<String>) -> Self {
        Self {
            labels: Some(selector.into()),
            fields: None,
        }
    }

    /// Builds an equality selector from a label map (e.g. a DaemonSet's `matchLabels`).
    pub fn from_label_map(labels: &BTreeMap<String, String>) -> Self {
        let selector = labels
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join(",");
        Self::labels(selector)
    }

    pub fn with_fields(mut self, selector: impl Into<String>) -> Self {
        self.fields = Some(selector.into());
        self
    }

    pub fn to_list_params(&self) -> ListParams {
        let mut lp = ListParams::default();
        if let Some(labels) = self.labels.as_deref().filter(|s| !s.is_empty()) {
            lp = lp.labels(labels);
        }
        if let Some(fields) = self.fields.as_deref().filter(|s| !s.is_empty()) {
            lp = lp.fields(fields);
        }
        lp
    }

    /// Evaluates the label selector against a label map.
    pub fn matches_labels(&self, labels: &BTreeMap<String, String>) -> bool {
        matches_requirements(self.labels.as_deref(), |key| labels.get(key).map(String::as_str))
    }

    /// Evaluates the field selector; `lookup` resolves a field path such as
    /// `metadata.name` to its value.
    pub fn matches_fields<'a, F>(&self, lookup: F) -> bool
    where
        F: Fn(&str) -> Option<&'a str>,
    {
        matches_requirements(self.fields.as_deref(), lookup)
    }
}

fn matches_requirements<'a, F>(selector: Option<&str>, lookup: F) -> bool
where
    F: Fn(&str) -> Option<&'a str>,
{
    let Some(selector) = selector else {
        return true;
    };

    selector
        .split(',')
        .map(str::trim)
        .filter(|req| !req.is_empty())
        .all(|req| {
            if let Some((key, value)) = req.split_once("!=") {
                lookup(key.trim()) != Some(value.trim())
            } else if let Some((key, value)) = req.split_once("==") {
                lookup(key.trim()) == Some(value.trim())
            } else if let Some((key, value)) = req.split_once('=') {
                lookup(key.trim()) == Some(value.trim())
            } else if let Some(key) = req.strip_prefix('!') {
                lookup(key.trim()).is_none()
            } else {
                lookup(req).is_some()
            }
        })
}
