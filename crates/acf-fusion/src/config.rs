use std::str::FromStr;

use acf_core::{DocType, Level};
use chrono::{Datelike, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("{key}={value:?} is not valid: {reason}")]
    Invalid { key: String, value: String, reason: String },
    #[error("{field} out of range: {value}")]
    OutOfRange { field: &'static str, value: f64 },
}

/// What to do when the same observation is fused twice.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvidencePolicy {
    /// Every fusion pass appends, duplicates included.
    #[default]
    AppendAll,
    /// An entry identical to one already logged (ignoring its timestamp) is not appended again.
    DedupIdentical,
}

impl FromStr for EvidencePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "append_all" | "append" => Ok(EvidencePolicy::AppendAll),
            "dedup_identical" | "dedup" => Ok(EvidencePolicy::DedupIdentical),
            other => Err(format!("unknown evidence policy: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FusionConfig {
    pub target_doc_type: DocType,
    pub admission_year: i32,
    /// A line on more than this share of pages is a running header/footer.
    pub boilerplate_ratio: f64,
    /// Matches must score strictly above this to produce evidence.
    pub match_threshold: f64,
    pub ambiguity_margin: f64,
    /// Candidates whose content score falls below this are never extracted.
    pub content_floor: f64,
    pub match_floor: f64,
    pub low_confidence_cutoff: f64,
    pub name_similarity_floor: f64,
    pub grade_threshold: f64,
    /// Arbitration priority is `content_score + match_score * match_weight`.
    pub match_weight: f64,
    pub synth_default_level: Level,
    pub default_language: String,
    pub evidence_policy: EvidencePolicy,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            target_doc_type: DocType::Spots,
            admission_year: Utc::now().year(),
            boilerplate_ratio: 0.6,
            match_threshold: 0.65,
            ambiguity_margin: 0.15,
            content_floor: -5.0,
            match_floor: 0.01,
            low_confidence_cutoff: 0.5,
            name_similarity_floor: 0.3,
            grade_threshold: 0.85,
            match_weight: 10.0,
            synth_default_level: Level::Master,
            default_language: "ro".to_string(),
            evidence_policy: EvidencePolicy::AppendAll,
        }
    }
}

impl FusionConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for the `ACF_*` keys.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(v) = parsed(&lookup, "ACF_TARGET_DOC_TYPE")? {
            config.target_doc_type = v;
        }
        if let Some(v) = parsed(&lookup, "ACF_ADMISSION_YEAR")? {
            config.admission_year = v;
        }
        if let Some(v) = parsed(&lookup, "ACF_BOILERPLATE_RATIO")? {
            config.boilerplate_ratio = v;
        }
        if let Some(v) = parsed(&lookup, "ACF_MATCH_THRESHOLD")? {
            config.match_threshold = v;
        }
        if let Some(v) = parsed(&lookup, "ACF_AMBIGUITY_MARGIN")? {
            config.ambiguity_margin = v;
        }
        if let Some(v) = parsed(&lookup, "ACF_CONTENT_FLOOR")? {
            config.content_floor = v;
        }
        if let Some(v) = parsed(&lookup, "ACF_SYNTH_DEFAULT_LEVEL")? {
            config.synth_default_level = v;
        }
        if let Some(v) = parsed(&lookup, "ACF_EVIDENCE_POLICY")? {
            config.evidence_policy = v;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let unit_fields = [
            ("boilerplate_ratio", self.boilerplate_ratio),
            ("match_threshold", self.match_threshold),
            ("ambiguity_margin", self.ambiguity_margin),
            ("match_floor", self.match_floor),
            ("low_confidence_cutoff", self.low_confidence_cutoff),
            ("name_similarity_floor", self.name_similarity_floor),
            ("grade_threshold", self.grade_threshold),
        ];
        for (field, value) in unit_fields {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::OutOfRange { field, value });
            }
        }
        if !self.content_floor.is_finite() {
            return Err(ConfigError::OutOfRange {
                field: "content_floor",
                value: self.content_floor,
            });
        }
        if !self.match_weight.is_finite() || self.match_weight < 0.0 {
            return Err(ConfigError::OutOfRange {
                field: "match_weight",
                value: self.match_weight,
            });
        }
        if !(1900..=2200).contains(&self.admission_year) {
            return Err(ConfigError::OutOfRange {
                field: "admission_year",
                value: f64::from(self.admission_year),
            });
        }
        Ok(())
    }
}

fn parsed<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let Some(raw) = lookup(key) else {
        return Ok(None);
    };
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    trimmed.parse().map(Some).map_err(|e: T::Err| ConfigError::Invalid {
        key: key.to_string(),
        value: raw.clone(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_match_documented_values() {
        let config = FusionConfig::default();
        assert_eq!(config.boilerplate_ratio, 0.6);
        assert_eq!(config.match_threshold, 0.65);
        assert_eq!(config.ambiguity_margin, 0.15);
        assert_eq!(config.content_floor, -5.0);
        assert_eq!(config.synth_default_level, Level::Master);
        assert_eq!(config.evidence_policy, EvidencePolicy::AppendAll);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn env_overrides_are_applied() {
        let config = FusionConfig::from_lookup(lookup(&[
            ("ACF_TARGET_DOC_TYPE", "results"),
            ("ACF_ADMISSION_YEAR", "2026"),
            ("ACF_MATCH_THRESHOLD", "0.7"),
            ("ACF_SYNTH_DEFAULT_LEVEL", "Licenta"),
            ("ACF_EVIDENCE_POLICY", "dedup_identical"),
            ("ACF_CONTENT_FLOOR", " "),
        ]))
        .unwrap();
        assert_eq!(config.target_doc_type, DocType::Results);
        assert_eq!(config.admission_year, 2026);
        assert_eq!(config.match_threshold, 0.7);
        assert_eq!(config.synth_default_level, Level::Licenta);
        assert_eq!(config.evidence_policy, EvidencePolicy::DedupIdentical);
        assert_eq!(config.content_floor, -5.0);
    }

    #[test]
    fn unparsable_values_name_the_key() {
        let err = FusionConfig::from_lookup(lookup(&[("ACF_MATCH_THRESHOLD", "high")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { ref key, .. } if key == "ACF_MATCH_THRESHOLD"));
    }

    #[test]
    fn out_of_range_values_are_rejected() {
        let err = FusionConfig::from_lookup(lookup(&[("ACF_BOILERPLATE_RATIO", "1.5")])).unwrap_err();
        assert_eq!(
            err,
            ConfigError::OutOfRange {
                field: "boilerplate_ratio",
                value: 1.5
            }
        );
    }
}
