use acf_core::{Lexicon, MatchStatus, PdfRow, ProgramRecord};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::config::FusionConfig;
use crate::similarity::{normalize_name, partial_ratio, token_set_ratio};

const NAME_WEIGHT: f64 = 0.5;
const LEVEL_WEIGHT: f64 = 0.3;
const DOMAIN_WEIGHT: f64 = 0.2;
const DOMAIN_MIN_SIMILARITY: f64 = 0.8;

/// Best row for one program, by index into the rows that were scored.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    pub row: Option<usize>,
    pub score: f64,
    pub status: MatchStatus,
}

impl MatchResult {
    fn none() -> Self {
        Self {
            row: None,
            score: 0.0,
            status: MatchStatus::NoMatch,
        }
    }
}

/// Scores HTML program records against document rows on name, level and domain.
#[derive(Debug, Clone)]
pub struct FuzzyMatcher {
    abbreviations: Vec<(Regex, String)>,
    name_floor: f64,
    match_floor: f64,
    low_confidence_cutoff: f64,
    ambiguity_margin: f64,
}

impl FuzzyMatcher {
    pub fn new(config: &FusionConfig, lexicon: &Lexicon) -> Result<Self, regex::Error> {
        let abbreviations = lexicon
            .abbreviations
            .iter()
            .map(|a| {
                let pattern = format!(r"\b{}\b", regex::escape(&a.short.to_lowercase()));
                Regex::new(&pattern).map(|re| (re, a.expansion.to_lowercase()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            abbreviations,
            name_floor: config.name_similarity_floor,
            match_floor: config.match_floor,
            low_confidence_cutoff: config.low_confidence_cutoff,
            ambiguity_margin: config.ambiguity_margin,
        })
    }

    /// Normalized name with known abbreviations spelled out ("ing. calc" -> "inginerie calculatoare").
    pub fn normalize(&self, name: &str) -> String {
        let mut text = normalize_name(name);
        for (pattern, expansion) in &self.abbreviations {
            text = pattern.replace_all(&text, expansion.as_str()).into_owned();
        }
        text
    }

    pub fn score(&self, record: &ProgramRecord, row: &PdfRow) -> f64 {
        self.score_normalized(record, &self.normalize(&record.name), row)
    }

    fn score_normalized(&self, record: &ProgramRecord, record_name: &str, row: &PdfRow) -> f64 {
        // declared levels that disagree can never match
        if let (Some(a), Some(b)) = (record.level, row.level) {
            if a != b {
                return 0.0;
            }
        }

        let row_name = self.normalize(&row.program_name);
        let name_score = token_set_ratio(record_name, &row_name).max(partial_ratio(record_name, &row_name));
        if name_score < self.name_floor {
            return 0.0;
        }

        let level_score = match (record.level, row.level) {
            (Some(_), Some(_)) => 1.0,
            (None, None) => 0.5,
            _ => 0.0,
        };
        let domain_score = match (record.domain.as_deref(), row.domain.as_deref()) {
            (Some(a), Some(b)) if partial_ratio(&normalize_name(a), &normalize_name(b)) > DOMAIN_MIN_SIMILARITY => 1.0,
            _ => 0.0,
        };

        (NAME_WEIGHT * name_score + LEVEL_WEIGHT * level_score + DOMAIN_WEIGHT * domain_score).min(1.0)
    }

    /// Top-scoring row with its status: `ambiguous` when the runner-up is within the
    /// margin, `low_confidence` below the cutoff, `no_match` when nothing clears the floor.
    pub fn match_record(&self, record: &ProgramRecord, rows: &[PdfRow]) -> MatchResult {
        let record_name = self.normalize(&record.name);
        let mut scored: Vec<(usize, f64)> = rows
            .iter()
            .enumerate()
            .map(|(idx, row)| (idx, self.score_normalized(record, &record_name, row)))
            .filter(|(_, score)| *score > self.match_floor)
            .collect();
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));

        let Some(&(best_row, best)) = scored.first() else {
            return MatchResult::none();
        };
        let mut status = MatchStatus::Match;
        if let Some(&(_, second)) = scored.get(1) {
            if best - second < self.ambiguity_margin {
                status = MatchStatus::Ambiguous;
            }
        }
        if best < self.low_confidence_cutoff {
            status = MatchStatus::LowConfidence;
        }
        MatchResult {
            row: Some(best_row),
            score: best,
            status,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use acf_core::{Level, SourceType};

    fn matcher() -> FuzzyMatcher {
        FuzzyMatcher::new(&FusionConfig::default(), &Lexicon::default()).unwrap()
    }

    fn record(name: &str, level: Option<Level>) -> ProgramRecord {
        let mut r = ProgramRecord::new("ace", name, SourceType::Html);
        r.level = level;
        r
    }

    fn row(name: &str, level: Option<Level>) -> PdfRow {
        PdfRow {
            program_name: name.to_string(),
            spots_budget: Some(50),
            spots_tax: Some(20),
            level,
            domain: None,
            page: Some(1),
            raw_snippet: String::new(),
        }
    }

    #[test]
    fn abbreviations_expand_on_whole_tokens() {
        let m = matcher();
        assert_eq!(m.normalize("Ing. Calc. (Eng)"), "inginerie calculatoare engleza");
        assert_eq!(m.normalize("Ingineria mediului"), "ingineria mediului");
    }

    #[test]
    fn conflicting_levels_score_zero() {
        let m = matcher();
        let score = m.score(&record("Informatica", Some(Level::Licenta)), &row("Informatica", Some(Level::Master)));
        assert_eq!(score, 0.0);
    }

    #[test]
    fn weighted_signals() {
        let m = matcher();
        let licenta = Some(Level::Licenta);
        assert!((m.score(&record("Automatica", licenta), &row("Automatica", licenta)) - 0.8).abs() < 1e-9);
        assert!((m.score(&record("Automatica", None), &row("Automatica", None)) - 0.65).abs() < 1e-9);
        assert!((m.score(&record("Automatica", licenta), &row("Automatica", None)) - 0.5).abs() < 1e-9);

        let mut with_domain = record("Automatica", licenta);
        with_domain.domain = Some("Ingineria sistemelor".into());
        let mut domain_row = row("Automatica", licenta);
        domain_row.domain = Some("Domeniul Ingineria Sistemelor".into());
        assert!((m.score(&with_domain, &domain_row) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn unrelated_names_are_not_rescued_by_level() {
        let m = matcher();
        let licenta = Some(Level::Licenta);
        assert_eq!(m.score(&record("Drept", licenta), &row("Muzica", licenta)), 0.0);
    }

    #[test]
    fn match_status_flags() {
        let m = matcher();
        let licenta = Some(Level::Licenta);
        let target = record("Automatica", licenta);

        let clear = m.match_record(&target, &[row("Chimie alimentara", licenta), row("Automatica", licenta)]);
        assert_eq!(clear.row, Some(1));
        assert_eq!(clear.status, MatchStatus::Match);

        let close = m.match_record(&target, &[row("Automatica", licenta), row("Automatica si robotica", licenta)]);
        assert_eq!(close.status, MatchStatus::Ambiguous);

        let weak = m.match_record(&record("Automatica", None), &[row("Automatizari", Some(Level::Master))]);
        assert_eq!(weak.status, MatchStatus::LowConfidence);
        assert!((weak.score - 0.45).abs() < 1e-9);

        let none = m.match_record(&target, &[row("Drept", licenta)]);
        assert_eq!(none, MatchResult { row: None, score: 0.0, status: MatchStatus::NoMatch });
    }
}
