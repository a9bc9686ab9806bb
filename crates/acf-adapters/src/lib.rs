//! Institution adapter contracts + the per-university implementations.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use acf_core::{Candidate, Lexicon, ProgramRecord};
use acf_extract::Document;
use anyhow::Context;
use chrono::{DateTime, Utc};
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use thiserror::Error;

mod grades;
mod ucv;

pub use grades::{GradeParser, MIN_GRADE_SAMPLES, UNKNOWN_PROGRAM};
pub use ucv::{UcvAdapter, UcvRules};

pub const CRATE_NAME: &str = "acf-adapters";

/// Where a page came from and what the caller is looking for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdapterContext {
    pub faculty_slug: String,
    pub page_url: String,
    pub fetched_at: DateTime<Utc>,
    pub admission_year: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FacultyConfig {
    pub name: String,
    pub slug: String,
    #[serde(default)]
    pub urls: Vec<String>,
}

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("{0}")]
    Message(String),
    #[error("invalid selector `{selector}`: {reason}")]
    Selector { selector: String, reason: String },
    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

/// Per-institution extraction rules. Parsing only: pages and documents are handed in by the caller.
pub trait UniversityAdapter: Send + Sync {
    fn slug(&self) -> &'static str;
    fn name(&self) -> &'static str;

    fn discover_faculties(&self) -> Result<Vec<FacultyConfig>, AdapterError>;

    fn extract_programs(&self, html: &str, ctx: &AdapterContext) -> Result<Vec<ProgramRecord>, AdapterError>;

    fn extract_pdf_candidates(&self, html: &str, ctx: &AdapterContext) -> Result<Vec<Candidate>, AdapterError>;

    /// Results-sheet links, best first, with their relevance in `stage_a_score`.
    fn extract_grade_candidates(&self, html: &str, ctx: &AdapterContext) -> Result<Vec<Candidate>, AdapterError>;

    /// Program name to last admission grade.
    fn parse_grades(&self, document: &Document) -> BTreeMap<String, f64>;
}

pub fn supported_universities() -> &'static [&'static str] {
    &["ucv"]
}

/// Registry keyed on the university slug. Institution rules are read from
/// `<rules_dir>/<slug>.yaml` when present, else built-in defaults apply.
pub fn adapter_for_university(
    slug: &str,
    lexicon: &Lexicon,
    rules_dir: &Path,
) -> anyhow::Result<Option<Box<dyn UniversityAdapter>>> {
    let normalized = slug.trim().to_ascii_lowercase();
    let rules_path = rules_dir.join(format!("{normalized}.yaml"));
    match normalized.as_str() {
        "ucv" => {
            let rules = if rules_path.exists() {
                UcvRules::from_path(&rules_path)?
            } else {
                UcvRules::default()
            };
            Ok(Some(Box::new(UcvAdapter::new(lexicon, rules))))
        }
        _ => Ok(None),
    }
}

pub(crate) fn read_yaml_file<T: serde::de::DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    let data = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_yaml::from_str(&data).with_context(|| format!("parsing {}", path.display()))
}

pub(crate) fn parse_selector(selector: &str) -> Result<Selector, AdapterError> {
    Selector::parse(selector).map_err(|e| AdapterError::Selector {
        selector: selector.to_string(),
        reason: e.to_string(),
    })
}

/// Text of an element with nodes joined by spaces and whitespace collapsed.
pub(crate) fn element_text(element: ElementRef<'_>) -> String {
    element
        .text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

/// First element matching any selector, in order; the whole document otherwise.
pub(crate) fn find_container<'a>(document: &'a Html, selectors: &[&str]) -> Result<ElementRef<'a>, AdapterError> {
    for selector in selectors {
        let sel = parse_selector(selector)?;
        if let Some(found) = document.select(&sel).next() {
            return Ok(found);
        }
    }
    Ok(document.root_element())
}

pub(crate) fn resolve_url(base: &str, href: &str) -> Option<String> {
    match url::Url::parse(href) {
        Ok(absolute) => Some(absolute.to_string()),
        Err(_) => url::Url::parse(base).ok()?.join(href).ok().map(|u| u.to_string()),
    }
}
