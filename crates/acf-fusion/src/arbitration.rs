//! Which evidence entry a record currently shows.
//!
//! The materialized seat counts are always those of the entry with the highest
//! `content_score + match_score * weight`. Ties fall through content score, match
//! score, the values themselves and finally the source url, so the winner never
//! depends on the order entries were appended in.

use std::cmp::Ordering;

use acf_core::{EvidenceEntry, ProgramRecord, SourceType};

use crate::FusionError;

/// Content scores are mapped onto 0..=1 over this window before averaging with the match score.
const CONTENT_SCORE_MIN: f64 = -20.0;
const CONTENT_SCORE_SPAN: f64 = 55.0;

pub fn priority(entry: &EvidenceEntry, match_weight: f64) -> f64 {
    entry.content_score + entry.match_score * match_weight
}

pub fn likelihood(content_score: f64, match_score: f64) -> f64 {
    let content = ((content_score - CONTENT_SCORE_MIN) / CONTENT_SCORE_SPAN).clamp(0.0, 1.0);
    (content + match_score.clamp(0.0, 1.0)) / 2.0
}

/// Total order over entries; `Greater` wins arbitration.
pub fn compare_entries(a: &EvidenceEntry, b: &EvidenceEntry, match_weight: f64) -> Ordering {
    priority(a, match_weight)
        .total_cmp(&priority(b, match_weight))
        .then_with(|| a.content_score.total_cmp(&b.content_score))
        .then_with(|| a.match_score.total_cmp(&b.match_score))
        .then_with(|| a.value.cmp(&b.value))
        .then_with(|| b.source_url.cmp(&a.source_url))
}

pub fn check_entry(record_id: &str, entry: &EvidenceEntry) -> Result<(), FusionError> {
    let reason = if !entry.content_score.is_finite() {
        format!("content_score is {}", entry.content_score)
    } else if !entry.match_score.is_finite() || !(0.0..=1.0).contains(&entry.match_score) {
        format!("match_score {} outside 0..=1", entry.match_score)
    } else if !entry.likelihood.is_finite() {
        format!("likelihood is {}", entry.likelihood)
    } else {
        return Ok(());
    };
    Err(FusionError::CorruptEvidence {
        record: record_id.to_string(),
        source_url: entry.source_url.clone(),
        reason,
    })
}

/// Re-derives the materialized seat counts and provenance from the evidence log alone.
/// Returns false, leaving the record untouched, when the log is empty.
pub fn recompute_from_evidence(record: &mut ProgramRecord, match_weight: f64) -> Result<bool, FusionError> {
    for entry in record.evidence.spots() {
        check_entry(&record.id, entry)?;
    }
    let Some(winner) = record
        .evidence
        .spots()
        .iter()
        .max_by(|a, b| compare_entries(a, b, match_weight))
        .cloned()
    else {
        return Ok(false);
    };

    record.spots_budget = winner.value.budget;
    record.spots_tax = winner.value.tax;
    record.accuracy_confidence = winner.likelihood;
    if record.source_type == SourceType::PdfOnly {
        record.source_url = winner.source_url.clone();
    }
    let meta = &mut record.metadata;
    meta.best_source_score = Some(priority(&winner, match_weight));
    meta.pdf_match_score = Some(winner.match_score);
    meta.pdf_match_name = Some(winner.matched_name);
    meta.pdf_source = Some(winner.source_url);
    meta.match_status = winner.match_status;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use acf_core::{MatchStatus, SpotsValue};
    use chrono::{TimeZone, Utc};

    fn entry(url: &str, budget: u32, content: f64, matched: f64) -> EvidenceEntry {
        EvidenceEntry {
            source_url: url.to_string(),
            source_name: url.to_string(),
            value: SpotsValue { budget: Some(budget), tax: Some(10) },
            content_score: content,
            match_score: matched,
            likelihood: likelihood(content, matched),
            matched_name: "Informatica".into(),
            match_status: Some(MatchStatus::Match),
            page: Some(1),
            snippet: String::new(),
            observed_at: Utc.with_ymd_and_hms(2026, 7, 1, 0, 0, 0).unwrap(),
        }
    }

    fn record_with(entries: &[EvidenceEntry]) -> ProgramRecord {
        let mut record = ProgramRecord::new("fmi", "Informatica", SourceType::Html);
        for e in entries {
            record.evidence.append_spots(e.clone());
        }
        record
    }

    #[test]
    fn likelihood_is_bounded() {
        assert_eq!(likelihood(-40.0, 0.0), 0.0);
        assert_eq!(likelihood(35.0, 1.0), 1.0);
        assert!((likelihood(35.0, 0.8) - 0.9).abs() < 1e-9);
        assert!((likelihood(-20.0, 0.5) - 0.25).abs() < 1e-9);
    }

    #[test]
    fn higher_content_dominates_match_score() {
        let strong = entry("https://x.ro/strong.pdf", 150, 30.0, 0.7);
        let weak = entry("https://x.ro/weak.pdf", 100, 20.0, 1.0);
        assert_eq!(compare_entries(&strong, &weak, 10.0), Ordering::Greater);
    }

    #[test]
    fn exact_ties_resolve_by_source() {
        let a = entry("https://x.ro/a.pdf", 100, 20.0, 0.8);
        let b = entry("https://x.ro/b.pdf", 100, 20.0, 0.8);
        let mut forward = record_with(&[a.clone(), b.clone()]);
        let mut backward = record_with(&[b, a]);
        recompute_from_evidence(&mut forward, 10.0).unwrap();
        recompute_from_evidence(&mut backward, 10.0).unwrap();
        assert_eq!(forward.metadata, backward.metadata);
        assert_eq!(forward.metadata.pdf_source.as_deref(), Some("https://x.ro/a.pdf"));
    }

    #[test]
    fn empty_log_leaves_record_alone() {
        let mut record = record_with(&[]);
        record.spots_budget = Some(7);
        assert!(!recompute_from_evidence(&mut record, 10.0).unwrap());
        assert_eq!(record.spots_budget, Some(7));
        assert_eq!(record.metadata.best_source_score, None);
    }

    #[test]
    fn corrupt_entries_are_contract_errors() {
        let mut record = record_with(&[entry("https://x.ro/a.pdf", 10, 20.0, 1.5)]);
        let err = recompute_from_evidence(&mut record, 10.0).unwrap_err();
        assert!(matches!(err, FusionError::CorruptEvidence { .. }));

        let mut record = record_with(&[entry("https://x.ro/a.pdf", 10, f64::NAN, 0.5)]);
        assert!(recompute_from_evidence(&mut record, 10.0).is_err());
    }
}
