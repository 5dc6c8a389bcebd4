//! Settings applied to every operand DaemonSet.

use crate::components::SpecError;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Common DaemonSet settings.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DaemonsetsSpec {
    /// Extra labels added to every operand pod
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,

    /// Extra annotations added to every operand pod
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,

    /// Extra tolerations added to every operand pod
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tolerations: Vec<TolerationSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority_class_name: Option<String>,

    /// RollingUpdate or OnDelete
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_strategy: Option<UpdateStrategy>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rolling_update: Option<RollingUpdateSpec>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
pub enum UpdateStrategy {
    #[default]
    RollingUpdate,
    OnDelete,
}

impl UpdateStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            UpdateStrategy::RollingUpdate => "RollingUpdate",
            UpdateStrategy::OnDelete => "OnDelete",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RollingUpdateSpec {
    /// Integer ("1") or percentage ("25%")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_unavailable: Option<String>,
}

/// Toleration added to operand pods.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TolerationSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operator: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effect: Option<String>,
}

/// Parsed `maxUnavailable` value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaxUnavailable {
    Count(i32),
    Percent(u8),
}

impl MaxUnavailable {
    /// Parses "3" or "25%". Negative counts and percentages above 100 are rejected.
    pub fn parse(raw: &str) -> Result<Self, SpecError> {
        let invalid = |reason: &str| SpecError::InvalidValue {
            field: "daemonsets.rollingUpdate.maxUnavailable",
            value: raw.to_string(),
            reason: reason.to_string(),
        };

        let trimmed = raw.trim();
        if let Some(percent) = trimmed.strip_suffix('%') {
            let value: u8 = percent
                .parse()
                .map_err(|_| invalid("percentage must be an integer between 0 and 100"))?;
            if value > 100 {
                return Err(invalid("percentage must be an integer between 0 and 100"));
            }
            Ok(MaxUnavailable::Percent(value))
        } else {
            let value: i32 = trimmed
                .parse()
                .map_err(|_| invalid("must be an integer or a percentage"))?;
            if value < 0 {
                return Err(invalid("must not be negative"));
            }
            Ok(MaxUnavailable::Count(value))
        }
    }
}

impl DaemonsetsSpec {
    /// Validated `maxUnavailable`, if configured.
    pub fn max_unavailable(&self) -> Result<Option<MaxUnavailable>, SpecError> {
        self.rolling_update
            .as_ref()
            .and_then(|r| r.max_unavailable.as_deref())
            .filter(|raw| !raw.is_empty())
            .map(MaxUnavailable::parse)
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_max_unavailable_parse() {
        assert_eq!(MaxUnavailable::parse("1"), Ok(MaxUnavailable::Count(1)));
        assert_eq!(MaxUnavailable::parse("25%"), Ok(MaxUnavailable::Percent(25)));
        assert_eq!(MaxUnavailable::parse(" 100% "), Ok(MaxUnavailable::Percent(100)));
    }

    #[test]
    fn test_max_unavailable_rejects_malformed() {
        assert!(MaxUnavailable::parse("101%").is_err());
        assert!(MaxUnavailable::parse("-1").is_err());
        assert!(MaxUnavailable::parse("abc").is_err());
        assert!(MaxUnavailable::parse("1.5%").is_err());
    }

    #[test]
    fn test_unset_max_unavailable() {
        let spec = DaemonsetsSpec::default();
        assert_eq!(spec.max_unavailable(), Ok(None));

        let spec = DaemonsetsSpec {
            rolling_update: Some(RollingUpdateSpec {
                max_unavailable: Some("2".to_string()),
            }),
            ..Default::default()
        };
        assert_eq!(spec.max_unavailable(), Ok(Some(MaxUnavailable::Count(2))));
    }
}
