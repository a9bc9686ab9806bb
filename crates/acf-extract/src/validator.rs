use std::collections::HashSet;
use std::sync::LazyLock;

use acf_core::{fold_diacritics, Lexicon, ProgramRecord, ValidationStatus, ValidationVerdict};
use regex::Regex;
use serde::Serialize;

const MIN_NAME_LEN: usize = 4;
const MAX_NAME_LEN: usize = 150;
const MAX_DIGIT_RATIO: f64 = 0.4;

const BASE_SCORE: f64 = 20.0;
const POSITIVE_BONUS: f64 = 20.0;
const SUFFIX_BONUS: f64 = 15.0;
const MULTI_TOKEN_BONUS: f64 = 10.0;
const TITLE_CASE_BONUS: f64 = 10.0;
const PASS_SCORE: f64 = 45.0;
const QUARANTINE_SCORE: f64 = 30.0;

/// Evidence strong enough to back materialized seat counts.
pub const EVIDENCE_MIN_MATCH: f64 = 0.75;
pub const EVIDENCE_MIN_CONTENT: f64 = 20.0;
/// Confidence at which a structured HTML table stands on its own.
pub const TABLE_MIN_CONFIDENCE: f64 = 0.8;

static EMBEDDED_SEATS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\d+\s*(?:loc|buget|tax)").unwrap());

#[derive(Debug, Clone, Serialize)]
pub struct CheckOutcome {
    pub check: &'static str,
    pub verdict: ValidationVerdict,
}

/// Result of the composed row checks. `verdict` is the deciding outcome.
#[derive(Debug, Clone, Serialize)]
pub struct RowValidation {
    pub verdict: ValidationVerdict,
    pub checks: Vec<CheckOutcome>,
}

/// Scores candidate program names for plausibility.
#[derive(Debug, Clone)]
pub struct NameValidator {
    negative: Vec<String>,
    positive: Vec<String>,
    suffixes: Vec<String>,
    noise_markers: Vec<String>,
}

impl NameValidator {
    pub fn new(lexicon: &Lexicon) -> Self {
        Self {
            negative: lexicon.negative_name_keywords.clone(),
            positive: lexicon.positive_name_keywords.clone(),
            suffixes: lexicon.program_suffixes.clone(),
            noise_markers: lexicon.name_noise_markers.clone(),
        }
    }

    pub fn validate_program_name(&self, name: &str) -> ValidationVerdict {
        let len = name.chars().count();
        if name.trim().is_empty() {
            return ValidationVerdict::fail(0.0, "empty");
        }
        if len < MIN_NAME_LEN {
            return ValidationVerdict::fail(0.0, "too_short");
        }
        if len > MAX_NAME_LEN {
            return ValidationVerdict::fail(0.0, "too_long");
        }

        let normalized = normalize_for_keywords(name);
        let digits = normalized.chars().filter(char::is_ascii_digit).count();
        if digits as f64 / len as f64 > MAX_DIGIT_RATIO {
            return ValidationVerdict::fail(10.0, "high_digit_ratio");
        }

        let letters: Vec<char> = normalized.chars().filter(|c| c.is_alphabetic()).collect();
        let distinct: HashSet<char> = letters.iter().copied().collect();
        if letters.len() >= 6 && distinct.len() <= 2 {
            return ValidationVerdict::fail(5.0, "low_character_diversity");
        }

        let tokens: Vec<&str> = normalized.split_whitespace().collect();
        if let Some(keyword) = self
            .negative
            .iter()
            .find(|kw| tokens.iter().any(|t| t.starts_with(kw.as_str())))
        {
            return ValidationVerdict::fail(0.0, format!("negative_keyword:{keyword}"));
        }

        let mut score = BASE_SCORE;
        if self
            .positive
            .iter()
            .any(|kw| tokens.iter().any(|t| t.starts_with(kw.as_str())))
        {
            score += POSITIVE_BONUS;
        }
        if tokens
            .iter()
            .any(|t| self.suffixes.iter().any(|s| t.ends_with(s.as_str())))
        {
            score += SUFFIX_BONUS;
        }
        if name.split_whitespace().count() >= 2 {
            score += MULTI_TOKEN_BONUS;
        }
        if is_title_case(name) {
            score += TITLE_CASE_BONUS;
        }

        if score >= PASS_SCORE {
            ValidationVerdict::pass(score, "plausible_name")
        } else if score >= QUARANTINE_SCORE {
            ValidationVerdict::new(ValidationStatus::Quarantine, score, "low_confidence_name")
        } else {
            ValidationVerdict::fail(score, "low_score")
        }
    }

    /// Name, hygiene, identifier and seat-evidence checks in order. Hygiene and identifier
    /// findings are soft (REVIEW) and do not stop the chain; any other non-PASS does.
    pub fn validate_row(&self, record: &ProgramRecord) -> RowValidation {
        let mut checks = Vec::new();

        let name = self.validate_program_name(&record.name);
        checks.push(CheckOutcome { check: "name", verdict: name.clone() });
        if !name.is_pass() {
            return RowValidation { verdict: name, checks };
        }

        let hygiene = self.name_hygiene(&record.name, name.score);
        let identifiers = identifier_presence(record, name.score);
        checks.push(CheckOutcome { check: "name_hygiene", verdict: hygiene });
        checks.push(CheckOutcome { check: "identifiers", verdict: identifiers });

        let sufficiency = spots_sufficiency(record, name.score);
        checks.push(CheckOutcome { check: "spots_evidence", verdict: sufficiency.clone() });
        if !sufficiency.is_pass() {
            return RowValidation { verdict: sufficiency, checks };
        }

        let verdict = checks
            .iter()
            .map(|c| &c.verdict)
            .find(|v| v.status == ValidationStatus::Review)
            .cloned()
            .unwrap_or(name);
        RowValidation { verdict, checks }
    }

    fn name_hygiene(&self, name: &str, score: f64) -> ValidationVerdict {
        if EMBEDDED_SEATS_RE.is_match(&fold_diacritics(name)) {
            return ValidationVerdict::new(ValidationStatus::Review, score, "embedded_seat_counts");
        }
        let lower = name.to_lowercase();
        if let Some(marker) = self.noise_markers.iter().find(|m| lower.contains(m.as_str())) {
            return ValidationVerdict::new(ValidationStatus::Review, score, format!("ui_noise:{marker}"));
        }
        ValidationVerdict::pass(score, "clean_name")
    }
}

fn identifier_presence(record: &ProgramRecord, score: f64) -> ValidationVerdict {
    if record.id.trim().is_empty() {
        ValidationVerdict::new(ValidationStatus::Review, score, "missing_id")
    } else if record.admission_year.is_none() {
        ValidationVerdict::new(ValidationStatus::Review, score, "missing_admission_year")
    } else {
        ValidationVerdict::pass(score, "identifiers_present")
    }
}

fn spots_sufficiency(record: &ProgramRecord, score: f64) -> ValidationVerdict {
    if !record.has_spots() {
        return ValidationVerdict::pass(score, "no_spots_claimed");
    }
    let backed = record
        .evidence
        .spots()
        .iter()
        .any(|e| e.match_score >= EVIDENCE_MIN_MATCH && e.content_score >= EVIDENCE_MIN_CONTENT);
    if backed {
        return ValidationVerdict::pass(score, "spots_backed_by_evidence");
    }
    if record.source_type.is_structured_table() && record.accuracy_confidence >= TABLE_MIN_CONFIDENCE {
        return ValidationVerdict::pass(score, "spots_backed_by_table");
    }
    ValidationVerdict::new(ValidationStatus::Reject, 0.0, "unsupported_spots")
}

/// Lowercase ascii-folded text with punctuation turned into spaces.
pub fn normalize_for_keywords(text: &str) -> String {
    fold_diacritics(text)
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '_' || c.is_whitespace() { c } else { ' ' })
        .collect()
}

/// Every cased run starts upper and continues lower; at least one cased character.
pub fn is_title_case(text: &str) -> bool {
    let mut any_cased = false;
    let mut previous_cased = false;
    for c in text.chars() {
        if c.is_uppercase() {
            if previous_cased {
                return false;
            }
            previous_cased = true;
            any_cased = true;
        } else if c.is_lowercase() {
            if !previous_cased {
                return false;
            }
            previous_cased = true;
            any_cased = true;
        } else {
            previous_cased = false;
        }
    }
    any_cased
}

#[cfg(test)]
mod tests {
    use super::*;
    use acf_core::{EvidenceEntry, SourceType, SpotsValue};
    use chrono::Utc;

    fn validator() -> NameValidator {
        NameValidator::new(&Lexicon::default())
    }

    fn entry(content: f64, matched: f64) -> EvidenceEntry {
        EvidenceEntry {
            source_url: "https://ace.ucv.ro/cifra.pdf".into(),
            source_name: "cifra".into(),
            value: SpotsValue { budget: Some(50), tax: Some(20) },
            content_score: content,
            match_score: matched,
            likelihood: 0.8,
            matched_name: "Automatica".into(),
            match_status: None,
            page: Some(1),
            snippet: String::new(),
            observed_at: Utc::now(),
        }
    }

    #[test]
    fn short_names_fail() {
        let v = validator().validate_program_name("Abc");
        assert_eq!(v.status, ValidationStatus::Fail);
        assert_eq!(v.reason, "too_short");
    }

    #[test]
    fn four_letter_program_passes() {
        let v = validator().validate_program_name("Arte");
        assert_eq!(v.status, ValidationStatus::Pass);
        assert!(v.score >= 45.0);
    }

    #[test]
    fn structural_rejections() {
        let v = validator();
        assert_eq!(v.validate_program_name("0251 412 290").reason, "high_digit_ratio");
        assert_eq!(v.validate_program_name("aaaaaa bbbb").reason, "low_character_diversity");
        assert_eq!(v.validate_program_name(&"Informatica ".repeat(20)).reason, "too_long");
        assert_eq!(
            v.validate_program_name("Secretariat Facultate").reason,
            "negative_keyword:secretariat"
        );
    }

    #[test]
    fn diacritics_do_not_hide_keywords() {
        let v = validator().validate_program_name("Știința Mediului");
        assert_eq!(v.status, ValidationStatus::Pass);
        assert_eq!(v.score, 60.0);
    }

    #[test]
    fn weak_names_land_in_quarantine_or_fail() {
        let v = validator();
        assert_eq!(v.validate_program_name("Diverse Altele").status, ValidationStatus::Quarantine);
        assert_eq!(v.validate_program_name("diverse").status, ValidationStatus::Fail);
    }

    #[test]
    fn title_case_follows_word_boundaries() {
        assert!(is_title_case("Ingineria Sistemelor"));
        assert!(is_title_case("Calculatoare (Engleza)"));
        assert!(!is_title_case("ingineria sistemelor"));
        assert!(!is_title_case("CONTACT"));
        assert!(!is_title_case("123"));
    }

    #[test]
    fn row_without_evidence_for_spots_is_rejected() {
        let mut record = ProgramRecord::new("ace", "Automatica", SourceType::Html);
        record.admission_year = Some(2026);
        record.spots_budget = Some(50);
        let result = validator().validate_row(&record);
        assert_eq!(result.verdict.status, ValidationStatus::Reject);

        record.evidence.append_spots(entry(10.0, 0.9));
        assert_eq!(validator().validate_row(&record).verdict.status, ValidationStatus::Reject);

        record.evidence.append_spots(entry(25.0, 0.8));
        assert_eq!(validator().validate_row(&record).verdict.status, ValidationStatus::Pass);
    }

    #[test]
    fn structured_table_backs_its_own_counts() {
        let mut record = ProgramRecord::new("ace", "Automatica", SourceType::HtmlTable);
        record.admission_year = Some(2026);
        record.spots_budget = Some(50);
        record.accuracy_confidence = 0.85;
        assert!(validator().validate_row(&record).verdict.is_pass());
    }

    #[test]
    fn soft_checks_return_review_without_stopping() {
        let mut record = ProgramRecord::new("ace", "Automatica 50 locuri buget", SourceType::Html);
        record.spots_budget = Some(50);
        let result = validator().validate_row(&record);
        assert_eq!(result.verdict.status, ValidationStatus::Reject);
        assert_eq!(result.checks.len(), 4);

        let mut clean = ProgramRecord::new("ace", "Automatica", SourceType::Html);
        clean.admission_year = None;
        let result = validator().validate_row(&clean);
        assert_eq!(result.verdict.status, ValidationStatus::Review);
        assert_eq!(result.verdict.reason, "missing_admission_year");
    }
}
