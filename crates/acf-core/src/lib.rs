//! Core domain model and provenance types for ACF.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use unicode_normalization::{char::is_combining_mark, UnicodeNormalization};
use uuid::Uuid;

mod lexicon;

pub use lexicon::{Abbreviation, Lexicon};

pub const CRATE_NAME: &str = "acf-core";

/// Namespace string mixed into every program id so ids never collide with other uuid-v5 users.
const PROGRAM_ID_NAMESPACE: &str = "acf:program";

/// Study cycle of a program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Level {
    Licenta,
    Master,
    Doctorat,
}

impl Level {
    /// Detects a level from free text ("Licență", "MASTER", "studii de doctorat").
    pub fn detect(text: &str) -> Option<Level> {
        let folded = fold_diacritics(text).to_lowercase();
        if folded.contains("licenta") || folded.contains("bachelor") {
            Some(Level::Licenta)
        } else if folded.contains("master") {
            Some(Level::Master)
        } else if folded.contains("doctorat") || folded.contains("phd") {
            Some(Level::Doctorat)
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Licenta => "Licenta",
            Level::Master => "Master",
            Level::Doctorat => "Doctorat",
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Level {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Level::detect(s).ok_or_else(|| format!("unknown study level: {s}"))
    }
}

/// Kind of admission document a candidate link is expected to carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocType {
    Spots,
    Results,
    Guide,
    Exam,
    Calendar,
}

impl DocType {
    pub const ALL: [DocType; 5] = [
        DocType::Spots,
        DocType::Results,
        DocType::Guide,
        DocType::Exam,
        DocType::Calendar,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DocType::Spots => "spots",
            DocType::Results => "results",
            DocType::Guide => "guide",
            DocType::Exam => "exam",
            DocType::Calendar => "calendar",
        }
    }
}

impl fmt::Display for DocType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DocType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        DocType::ALL
            .into_iter()
            .find(|t| t.as_str() == lower)
            .ok_or_else(|| format!("unknown document type: {s}"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValidationStatus {
    Pass,
    Quarantine,
    Fail,
    Reject,
    Review,
}

/// Outcome of one heuristic check. `score` is bounded to 0..=100.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationVerdict {
    pub status: ValidationStatus,
    pub score: f64,
    pub reason: String,
}

impl ValidationVerdict {
    pub fn new(status: ValidationStatus, score: f64, reason: impl Into<String>) -> Self {
        Self {
            status,
            score: score.clamp(0.0, 100.0),
            reason: reason.into(),
        }
    }

    pub fn pass(score: f64, reason: impl Into<String>) -> Self {
        Self::new(ValidationStatus::Pass, score, reason)
    }

    pub fn fail(score: f64, reason: impl Into<String>) -> Self {
        Self::new(ValidationStatus::Fail, score, reason)
    }

    pub fn is_pass(&self) -> bool {
        self.status == ValidationStatus::Pass
    }
}

/// One admission-figures line pulled out of a document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PdfRow {
    pub program_name: String,
    pub spots_budget: Option<u32>,
    pub spots_tax: Option<u32>,
    pub level: Option<Level>,
    #[serde(default)]
    pub domain: Option<String>,
    /// 1-based page the row was read from.
    pub page: Option<u32>,
    #[serde(default)]
    pub raw_snippet: String,
}

impl PdfRow {
    pub fn has_spots(&self) -> bool {
        self.spots_budget.is_some() || self.spots_tax.is_some()
    }
}

/// Stage B inspection result for a candidate document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContentMetrics {
    pub page_count: usize,
    pub text_density: f64,
    pub has_table: bool,
    pub rows_with_numbers: usize,
    pub detected_year: Option<i32>,
    pub content_score: f64,
}

/// A discovered PDF link on a faculty page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub url: String,
    pub link_text: String,
    pub discovered_at: DateTime<Utc>,
    #[serde(default)]
    pub stage_a_score: f64,
    #[serde(default)]
    pub metrics: Option<ContentMetrics>,
}

impl Candidate {
    pub fn new(url: impl Into<String>, link_text: impl Into<String>, discovered_at: DateTime<Utc>) -> Self {
        Self {
            url: url.into(),
            link_text: link_text.into(),
            discovered_at,
            stage_a_score: 0.0,
            metrics: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SpotsValue {
    pub budget: Option<u32>,
    pub tax: Option<u32>,
}

/// One fused observation of a program's seat counts. Never mutated once logged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceEntry {
    pub source_url: String,
    pub source_name: String,
    pub value: SpotsValue,
    pub content_score: f64,
    pub match_score: f64,
    /// Fused likelihood in 0..=1.
    pub likelihood: f64,
    pub matched_name: String,
    #[serde(default)]
    pub match_status: Option<MatchStatus>,
    pub page: Option<u32>,
    pub snippet: String,
    pub observed_at: DateTime<Utc>,
}

impl EvidenceEntry {
    /// Same observation regardless of when it was recorded.
    pub fn same_observation(&self, other: &EvidenceEntry) -> bool {
        self.source_url == other.source_url
            && self.value == other.value
            && self.content_score == other.content_score
            && self.match_score == other.match_score
            && self.matched_name == other.matched_name
    }
}

/// Append-only evidence ledger of a record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Evidence {
    #[serde(default)]
    spots: Vec<EvidenceEntry>,
}

impl Evidence {
    pub fn spots(&self) -> &[EvidenceEntry] {
        &self.spots
    }

    pub fn append_spots(&mut self, entry: EvidenceEntry) {
        self.spots.push(entry);
    }

    pub fn is_empty(&self) -> bool {
        self.spots.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStatus {
    Match,
    Ambiguous,
    LowConfidence,
    NoMatch,
}

impl MatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchStatus::Match => "match",
            MatchStatus::Ambiguous => "ambiguous",
            MatchStatus::LowConfidence => "low_confidence",
            MatchStatus::NoMatch => "no_match",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    #[default]
    Html,
    HtmlList,
    HtmlTable,
    JsonLd,
    PdfOnly,
}

impl SourceType {
    /// Sources whose seat counts were read from a structured table.
    pub fn is_structured_table(&self) -> bool {
        matches!(self, SourceType::HtmlTable)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProgramMetadata {
    pub best_source_score: Option<f64>,
    pub pdf_match_score: Option<f64>,
    pub pdf_match_name: Option<String>,
    pub pdf_source: Option<String>,
    pub match_status: Option<MatchStatus>,
    pub grade_source: Option<String>,
}

/// A study program, either scraped from HTML or synthesized from a PDF row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgramRecord {
    pub id: String,
    pub faculty_slug: String,
    pub name: String,
    pub level: Option<Level>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub source_url: String,
    #[serde(default)]
    pub source_type: SourceType,
    pub spots_budget: Option<u32>,
    pub spots_tax: Option<u32>,
    #[serde(default)]
    pub spots_raw: Option<String>,
    pub accuracy_confidence: f64,
    #[serde(default)]
    pub admission_year: Option<i32>,
    #[serde(default)]
    pub last_admission_grade: Option<f64>,
    #[serde(default)]
    pub evidence: Evidence,
    #[serde(default)]
    pub metadata: ProgramMetadata,
}

impl ProgramRecord {
    /// Blank record whose id is derived from `(faculty_slug, name)`.
    pub fn new(faculty_slug: impl Into<String>, name: impl Into<String>, source_type: SourceType) -> Self {
        let faculty_slug = faculty_slug.into();
        let name = name.into();
        Self {
            id: stable_program_id(&faculty_slug, &name),
            faculty_slug,
            name,
            level: None,
            language: None,
            domain: None,
            source_url: String::new(),
            source_type,
            spots_budget: None,
            spots_tax: None,
            spots_raw: None,
            accuracy_confidence: 0.5,
            admission_year: None,
            last_admission_grade: None,
            evidence: Evidence::default(),
            metadata: ProgramMetadata::default(),
        }
    }

    pub fn has_spots(&self) -> bool {
        self.spots_budget.is_some() || self.spots_tax.is_some()
    }
}

/// Decomposes and drops combining marks: "Științe" -> "Stiinte".
pub fn fold_diacritics(input: &str) -> String {
    input.nfkd().filter(|c| !is_combining_mark(*c)).collect()
}

/// Slug used for identity: lowercase, ascii, hyphenated, without 4-digit years or
/// parenthetical notes that carry numbers ("(2024)", "(10 locuri)").
/// Other parentheticals stay: "Calculatoare (engleza)" is its own program.
pub fn normalize_name_for_id(name: &str) -> String {
    let mut kept = String::with_capacity(name.len());
    let mut rest = name;
    while let Some(open) = rest.find('(') {
        kept.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        match after.find(')') {
            Some(close) => {
                let note = &after[..close];
                if !note.chars().any(|c| c.is_ascii_digit()) {
                    kept.push(' ');
                    kept.push_str(note);
                    kept.push(' ');
                }
                rest = &after[close + 1..];
            }
            None => {
                kept.push_str(after);
                rest = "";
            }
        }
    }
    kept.push_str(rest);

    let folded = fold_diacritics(&kept).to_lowercase();
    let tokens = folded
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|t| !t.is_empty())
        .filter(|t| !(t.len() == 4 && t.chars().all(|c| c.is_ascii_digit())))
        .collect::<Vec<_>>();
    tokens.join("-")
}

/// Deterministic program id: the same faculty and normalized name always map to the same record.
pub fn stable_program_id(faculty_slug: &str, name: &str) -> String {
    let source = format!(
        "{}:{}:{}",
        PROGRAM_ID_NAMESPACE,
        faculty_slug.trim().to_ascii_lowercase(),
        normalize_name_for_id(name)
    );
    Uuid::new_v5(&Uuid::NAMESPACE_URL, source.as_bytes()).to_string()
}
