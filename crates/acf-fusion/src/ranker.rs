use std::sync::LazyLock;

use acf_core::{fold_diacritics, Candidate, ContentMetrics, DocType, Lexicon};
use acf_extract::Document;
use regex::Regex;
use tracing::debug;

use crate::config::FusionConfig;

static RE_SEAT_COUNT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)\d+\s+(?:loc|buget|tax)").unwrap());

const TARGET_YEAR_BONUS: f64 = 10.0;
const PRIOR_YEAR_BONUS: f64 = 5.0;
const PRIOR_YEAR_RESULTS_BONUS: f64 = 8.0;
const DOC_TYPE_BONUS: f64 = 15.0;
const CONFLICTING_TYPE_PENALTY: f64 = 10.0;
const CALENDAR_PENALTY: f64 = 20.0;

const SAMPLED_PAGES: usize = 2;
const SCANNED_DENSITY: f64 = 50.0;
const SCANNED_PENALTY: f64 = 10.0;
const DIGITAL_TEXT_BONUS: f64 = 5.0;
const SEAT_ROWS_BONUS: f64 = 10.0;
const SEAT_ROWS_CAP: usize = 10;
const TABLE_BONUS: f64 = 5.0;

/// Two-stage candidate ordering: link metadata first, document content on demand.
#[derive(Debug, Clone)]
pub struct CandidateRanker {
    target: DocType,
    admission_year: i32,
    target_keywords: Vec<String>,
    conflicting_keywords: Vec<String>,
    calendar_keywords: Vec<String>,
}

impl CandidateRanker {
    pub fn new(config: &FusionConfig, lexicon: &Lexicon) -> Self {
        let target = config.target_doc_type;
        let conflicting_keywords = DocType::ALL
            .into_iter()
            .filter(|t| *t != target && *t != DocType::Calendar)
            .flat_map(|t| lexicon.doc_keywords(t).iter().cloned())
            .collect();
        let calendar_keywords = if target == DocType::Calendar {
            Vec::new()
        } else {
            lexicon.doc_keywords(DocType::Calendar).to_vec()
        };
        Self {
            target,
            admission_year: config.admission_year,
            target_keywords: lexicon.doc_keywords(target).to_vec(),
            conflicting_keywords,
            calendar_keywords,
        }
    }

    /// Stage A score from link text and url only.
    pub fn stage_a_score(&self, candidate: &Candidate) -> f64 {
        let text = fold_diacritics(&candidate.link_text).to_lowercase();
        let url = candidate.url.to_lowercase();
        let mut score = 0.0;

        let year = self.admission_year.to_string();
        let prior = (self.admission_year - 1).to_string();
        if text.contains(&year) || url.contains(&year) {
            score += TARGET_YEAR_BONUS;
        } else if text.contains(&prior) || url.contains(&prior) {
            score += if self.target == DocType::Results {
                PRIOR_YEAR_RESULTS_BONUS
            } else {
                PRIOR_YEAR_BONUS
            };
        }

        if self
            .target_keywords
            .iter()
            .any(|k| text.contains(k.as_str()) || url.contains(k.as_str()))
        {
            score += DOC_TYPE_BONUS;
        }
        if self.conflicting_keywords.iter().any(|k| text.contains(k.as_str())) {
            score -= CONFLICTING_TYPE_PENALTY;
        }
        if self.calendar_keywords.iter().any(|k| text.contains(k.as_str())) {
            score -= CALENDAR_PENALTY;
        }
        score
    }

    /// Scores every candidate and sorts best first; equal scores keep discovery order.
    pub fn rank(&self, mut candidates: Vec<Candidate>) -> Vec<Candidate> {
        for candidate in &mut candidates {
            candidate.stage_a_score = self.stage_a_score(candidate);
            debug!(url = %candidate.url, score = candidate.stage_a_score, "stage a");
        }
        candidates.sort_by(|a, b| b.stage_a_score.total_cmp(&a.stage_a_score));
        candidates
    }

    /// Stage B: inspects at most the first two pages of an opened document.
    pub fn evaluate_content(&self, document: &Document) -> ContentMetrics {
        let mut metrics = ContentMetrics {
            page_count: document.page_count(),
            ..ContentMetrics::default()
        };
        if document.pages.is_empty() {
            return metrics;
        }

        let sampled = &document.pages[..document.pages.len().min(SAMPLED_PAGES)];
        let sample_text = sampled.iter().map(|p| p.text.as_str()).collect::<Vec<_>>().join("\n");
        metrics.has_table = sampled.iter().any(|p| !p.tables.is_empty());
        metrics.text_density = sample_text.chars().count() as f64 / sampled.len() as f64;
        if sample_text.contains(&self.admission_year.to_string()) {
            metrics.detected_year = Some(self.admission_year);
        }
        metrics.rows_with_numbers = RE_SEAT_COUNT.find_iter(&sample_text).count();

        let mut score = if metrics.text_density < SCANNED_DENSITY {
            -SCANNED_PENALTY
        } else {
            DIGITAL_TEXT_BONUS
        };
        if metrics.rows_with_numbers > 0 {
            score += SEAT_ROWS_BONUS + metrics.rows_with_numbers.min(SEAT_ROWS_CAP) as f64;
        }
        if metrics.has_table {
            score += TABLE_BONUS;
        }
        metrics.content_score = score;
        metrics
    }
}
