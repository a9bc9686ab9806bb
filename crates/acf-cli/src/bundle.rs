//! Per-faculty input bundles read by the `fuse` and `rank` commands.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use acf_adapters::{AdapterContext, UniversityAdapter};
use acf_core::{Candidate, ProgramRecord};
use acf_extract::load_document;
use acf_fusion::FacultyInput;
use acf_storage::{DocumentSource, DocumentStore, InMemoryDocuments};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{debug, info, warn};

fn default_university() -> String {
    "ucv".to_string()
}

/// One faculty's inputs. Relative file paths resolve against the bundle's directory.
#[derive(Debug, Clone, Deserialize)]
pub struct Bundle {
    pub faculty_slug: String,
    #[serde(default = "default_university")]
    pub university: String,
    /// Saved faculty pages, run through the institution adapter.
    #[serde(default)]
    pub pages: Vec<BundlePage>,
    #[serde(default)]
    pub candidates: Vec<Candidate>,
    #[serde(default)]
    pub programs: Vec<ProgramRecord>,
    /// Explicit grades; these override anything parsed from results sheets.
    #[serde(default)]
    pub grades: BTreeMap<String, f64>,
    /// Local copies of documents keyed by url. Other urls are looked up in the document store.
    #[serde(default)]
    pub documents: BTreeMap<String, PathBuf>,
    #[serde(skip)]
    base_dir: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BundlePage {
    pub url: String,
    pub file: PathBuf,
}

impl Bundle {
    pub fn from_path(path: &Path) -> Result<Self> {
        let data = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        let mut bundle: Bundle =
            serde_json::from_str(&data).with_context(|| format!("parsing {}", path.display()))?;
        bundle.base_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
        Ok(bundle)
    }

    fn resolve(&self, file: &Path) -> PathBuf {
        if file.is_absolute() {
            file.to_path_buf()
        } else {
            self.base_dir.join(file)
        }
    }

    /// Runs the adapter over the bundled pages. Programs and candidates found there are
    /// added after the listed ones; duplicates (same id, same url) keep the first.
    pub fn prepare(
        self,
        adapter: &dyn UniversityAdapter,
        admission_year: i32,
        fetched_at: DateTime<Utc>,
    ) -> Result<PreparedBundle> {
        let mut programs = self.programs.clone();
        let mut candidates = self.candidates.clone();
        let mut grade_candidates = Vec::new();

        for page in &self.pages {
            let path = self.resolve(&page.file);
            let html = fs::read_to_string(&path).with_context(|| format!("reading page {}", path.display()))?;
            let ctx = AdapterContext {
                faculty_slug: self.faculty_slug.clone(),
                page_url: page.url.clone(),
                fetched_at,
                admission_year,
            };
            let found = adapter
                .extract_programs(&html, &ctx)
                .with_context(|| format!("extracting programs from {}", page.url))?;
            debug!(page = %page.url, programs = found.len(), "adapter programs");
            programs.extend(found);
            candidates.extend(adapter.extract_pdf_candidates(&html, &ctx)?);
            grade_candidates.extend(adapter.extract_grade_candidates(&html, &ctx)?);
        }

        let mut ids = BTreeSet::new();
        programs.retain(|p| ids.insert(p.id.clone()));
        let mut urls = BTreeSet::new();
        candidates.retain(|c| urls.insert(c.url.clone()));
        let mut urls = BTreeSet::new();
        grade_candidates.retain(|c| urls.insert(c.url.clone()));
        grade_candidates.sort_by(|a, b| b.stage_a_score.total_cmp(&a.stage_a_score));

        let local_documents = self
            .documents
            .iter()
            .map(|(url, file)| (url.clone(), self.resolve(file)))
            .collect();

        Ok(PreparedBundle {
            input: FacultyInput {
                faculty_slug: self.faculty_slug,
                candidates,
                programs,
                grades: self.grades,
            },
            grade_candidates,
            local_documents,
        })
    }
}

/// A bundle with its pages already parsed, ready to have documents attached.
#[derive(Debug, Clone)]
pub struct PreparedBundle {
    pub input: FacultyInput,
    pub grade_candidates: Vec<Candidate>,
    local_documents: BTreeMap<String, PathBuf>,
}

impl PreparedBundle {
    /// Candidate and results-sheet urls that have no local copy in the bundle.
    pub fn stored_urls(&self) -> Vec<String> {
        let mut urls = BTreeSet::new();
        for candidate in self.input.candidates.iter().chain(&self.grade_candidates) {
            if !self.local_documents.contains_key(&candidate.url) {
                urls.insert(candidate.url.clone());
            }
        }
        urls.into_iter().collect()
    }

    /// Stored and bundled documents. Unreadable ones are logged and left out, so their
    /// candidates are skipped like any other missing document.
    pub async fn load_documents(&self, store: &DocumentStore, concurrency: usize) -> InMemoryDocuments {
        let mut documents = store.load_many(&self.stored_urls(), concurrency).await;
        for (url, path) in &self.local_documents {
            match tokio::fs::read(path).await {
                Ok(bytes) => documents.insert(url, bytes),
                Err(err) => warn!(url = %url, path = %path.display(), error = %err, "bundled document unreadable"),
            }
        }
        documents
    }

    /// Parses the best results sheet that yields any grades, then lays the bundle's
    /// explicit grades over it.
    pub fn into_input(self, adapter: &dyn UniversityAdapter, documents: &dyn DocumentSource) -> FacultyInput {
        let mut grades = BTreeMap::new();
        for candidate in &self.grade_candidates {
            let Ok(bytes) = documents.fetch(&candidate.url) else {
                continue;
            };
            match load_document(&bytes) {
                Ok(document) => {
                    let parsed = adapter.parse_grades(&document);
                    if !parsed.is_empty() {
                        info!(url = %candidate.url, programs = parsed.len(), "parsed results sheet");
                        grades = parsed;
                        break;
                    }
                }
                Err(err) => debug!(url = %candidate.url, error = %err, "results sheet unreadable"),
            }
        }
        let PreparedBundle { mut input, .. } = self;
        grades.append(&mut input.grades);
        FacultyInput { grades, ..input }
    }
}
