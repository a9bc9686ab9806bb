use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

use acf_core::{
    fold_diacritics, stable_program_id, Candidate, EvidenceEntry, Lexicon, MatchStatus, PdfRow, ProgramRecord,
    SourceType, SpotsValue, ValidationStatus,
};
use acf_extract::{load_document, DocumentExtractor, NameValidator};
use acf_storage::DocumentSource;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, info_span, warn};
use uuid::Uuid;

use crate::arbitration::{self, recompute_from_evidence};
use crate::config::{EvidencePolicy, FusionConfig};
use crate::matcher::{FuzzyMatcher, MatchResult};
use crate::ranker::CandidateRanker;
use crate::similarity::{normalize_name, token_set_ratio};
use crate::FusionError;

/// Extracted names this short are layout debris, not programs.
const MIN_SANE_NAME_LEN: usize = 5;
/// Synthesized records match their own row exactly.
const SYNTHESIZED_MATCH_SCORE: f64 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionKind {
    SkippedFaculty,
    SkippedCandidate,
    DiscardedSource,
    DroppedRow,
    Quarantined,
    Ambiguous,
    Rejected,
    Review,
}

impl DecisionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionKind::SkippedFaculty => "skipped_faculty",
            DecisionKind::SkippedCandidate => "skipped_candidate",
            DecisionKind::DiscardedSource => "discarded_source",
            DecisionKind::DroppedRow => "dropped_row",
            DecisionKind::Quarantined => "quarantined",
            DecisionKind::Ambiguous => "ambiguous",
            DecisionKind::Rejected => "rejected",
            DecisionKind::Review => "review",
        }
    }
}

/// Why something was skipped, dropped or flagged. `reason` is machine-readable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub kind: DecisionKind,
    pub subject: String,
    pub reason: String,
}

/// A row held back for manual review.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuarantineEntry {
    pub faculty_slug: String,
    pub name: String,
    pub reason: String,
    pub score: f64,
    pub source_url: String,
    pub row: PdfRow,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FacultySummary {
    pub candidates_total: usize,
    pub candidates_used: usize,
    pub candidates_skipped: usize,
    pub rows_extracted: usize,
    pub rows_dropped: usize,
    pub rows_quarantined: usize,
    pub matches: usize,
    pub ambiguous: usize,
    pub records_synthesized: usize,
    pub evidence_appended: usize,
    pub grades_attached: usize,
}

/// Everything the engine needs about one faculty.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FacultyInput {
    pub faculty_slug: String,
    #[serde(default)]
    pub candidates: Vec<Candidate>,
    #[serde(default)]
    pub programs: Vec<ProgramRecord>,
    #[serde(default)]
    pub grades: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunContext {
    pub run_id: Uuid,
    /// Timestamp stamped on every evidence entry of the run.
    pub now: DateTime<Utc>,
}

impl RunContext {
    pub fn start() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            now: Utc::now(),
        }
    }
}

/// Provenance of a batch of rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceDocument {
    pub url: String,
    pub name: String,
    pub content_score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FacultyOutcome {
    pub faculty_slug: String,
    pub programs: Vec<ProgramRecord>,
    pub quarantine: Vec<QuarantineEntry>,
    pub decisions: Vec<Decision>,
    /// Candidates in ranked order, with content metrics where they were opened.
    pub candidates: Vec<Candidate>,
    pub summary: FacultySummary,
    pub skipped: Option<String>,
}

/// Stateless per-run pipeline. Faculty state lives in [`FacultyFusion`], so one engine
/// can serve any number of faculties concurrently.
#[derive(Debug, Clone)]
pub struct FusionEngine {
    config: FusionConfig,
    ranker: CandidateRanker,
    extractor: DocumentExtractor,
    validator: NameValidator,
    matcher: FuzzyMatcher,
    sanity_markers: Vec<String>,
}

impl FusionEngine {
    pub fn new(config: FusionConfig, lexicon: &Lexicon) -> Result<Self, FusionError> {
        config.validate()?;
        Ok(Self {
            ranker: CandidateRanker::new(&config, lexicon),
            extractor: DocumentExtractor::new(lexicon, config.boilerplate_ratio)?,
            validator: NameValidator::new(lexicon),
            matcher: FuzzyMatcher::new(&config, lexicon)?,
            sanity_markers: lexicon.sanity_garbage_markers.clone(),
            config,
        })
    }

    pub fn config(&self) -> &FusionConfig {
        &self.config
    }

    pub fn ranker(&self) -> &CandidateRanker {
        &self.ranker
    }

    /// Starts fusing into `programs`. With no programs at all the faculty runs in
    /// PDF-only mode for its whole lifetime.
    pub fn begin(
        &self,
        faculty_slug: impl Into<String>,
        programs: Vec<ProgramRecord>,
        observed_at: DateTime<Utc>,
    ) -> FacultyFusion<'_> {
        FacultyFusion {
            engine: self,
            faculty_slug: faculty_slug.into(),
            pdf_only: programs.is_empty(),
            programs,
            observed_at,
            quarantine: Vec::new(),
            decisions: Vec::new(),
            summary: FacultySummary::default(),
            skipped: None,
            best_attempts: HashMap::new(),
        }
    }

    pub fn recompute_from_evidence(&self, record: &mut ProgramRecord) -> Result<bool, FusionError> {
        recompute_from_evidence(record, self.config.match_weight)
    }

    /// Ranks, opens, extracts and fuses every candidate of one faculty, in order.
    /// Candidate failures are recorded as decisions; only contract errors return `Err`.
    pub fn process_faculty(
        &self,
        input: FacultyInput,
        documents: &dyn DocumentSource,
        run: &RunContext,
    ) -> Result<FacultyOutcome, FusionError> {
        let FacultyInput {
            faculty_slug,
            candidates,
            programs,
            grades,
        } = input;
        let span = info_span!("fuse_faculty", faculty = %faculty_slug, run_id = %run.run_id);
        let _entered = span.enter();

        let mut fusion = self.begin(faculty_slug, programs, run.now);
        fusion.summary.candidates_total = candidates.len();
        if candidates.is_empty() {
            fusion.skip("no_candidates");
        }

        let ranked = self.ranker.rank(candidates);
        let mut evaluated = Vec::with_capacity(ranked.len());
        for mut candidate in ranked {
            match self.open_candidate(&mut candidate, documents, &mut fusion) {
                Some((rows, content_score)) => {
                    let source = SourceDocument {
                        url: candidate.url.clone(),
                        name: candidate.link_text.clone(),
                        content_score,
                    };
                    fusion.fuse_rows(rows, &source)?;
                    fusion.summary.candidates_used += 1;
                }
                None => fusion.summary.candidates_skipped += 1,
            }
            evaluated.push(candidate);
        }
        if fusion.summary.candidates_used == 0 && fusion.skipped.is_none() {
            fusion.skip("no_usable_candidates");
        }

        fusion.attach_grades(&grades);
        let mut outcome = fusion.finish();
        outcome.candidates = evaluated;
        Ok(outcome)
    }

    /// Stage B plus extraction for one candidate; `None` means it contributed nothing.
    fn open_candidate(
        &self,
        candidate: &mut Candidate,
        documents: &dyn DocumentSource,
        fusion: &mut FacultyFusion<'_>,
    ) -> Option<(Vec<PdfRow>, f64)> {
        let url = candidate.url.clone();
        let bytes = match documents.fetch(&url) {
            Ok(bytes) => bytes,
            Err(err) => {
                fusion.decide(DecisionKind::SkippedCandidate, &url, format!("fetch_failed: {err}"));
                return None;
            }
        };
        let document = match load_document(&bytes) {
            Ok(document) => document,
            Err(err) => {
                fusion.decide(DecisionKind::SkippedCandidate, &url, format!("unreadable: {err}"));
                return None;
            }
        };

        let metrics = self.ranker.evaluate_content(&document);
        let content_score = metrics.content_score;
        info!(
            url = %url,
            content_score,
            density = metrics.text_density,
            seat_lines = metrics.rows_with_numbers,
            "candidate content"
        );
        candidate.metrics = Some(metrics);
        if content_score < self.config.content_floor {
            fusion.decide(
                DecisionKind::SkippedCandidate,
                &url,
                format!("low_content_score:{content_score}"),
            );
            return None;
        }

        let rows = self.extractor.extract(&document);
        if rows.is_empty() {
            fusion.decide(DecisionKind::SkippedCandidate, &url, "no_rows");
            return None;
        }

        let total = rows.len();
        fusion.summary.rows_extracted += total;
        let (sane, garbage): (Vec<PdfRow>, Vec<PdfRow>) = rows.into_iter().partition(|r| self.is_sane(r));
        if sane.is_empty() || sane.len() * 2 < total {
            fusion.decide(
                DecisionKind::DiscardedSource,
                &url,
                format!("garbage_rows:{}/{}", garbage.len(), total),
            );
            return None;
        }
        for row in garbage {
            fusion.summary.rows_dropped += 1;
            fusion.decide(DecisionKind::DroppedRow, row.program_name, "sanity_filter");
        }
        Some((sane, content_score))
    }

    fn is_sane(&self, row: &PdfRow) -> bool {
        let name = fold_diacritics(&row.program_name).to_lowercase();
        name.chars().count() > MIN_SANE_NAME_LEN && !self.sanity_markers.iter().any(|m| name.contains(m.as_str()))
    }
}

/// Fusion state of a single faculty.
#[derive(Debug)]
pub struct FacultyFusion<'a> {
    engine: &'a FusionEngine,
    faculty_slug: String,
    programs: Vec<ProgramRecord>,
    pdf_only: bool,
    observed_at: DateTime<Utc>,
    quarantine: Vec<QuarantineEntry>,
    decisions: Vec<Decision>,
    summary: FacultySummary,
    skipped: Option<String>,
    best_attempts: HashMap<usize, MatchResult>,
}

impl FacultyFusion<'_> {
    pub fn programs(&self) -> &[ProgramRecord] {
        &self.programs
    }

    pub fn is_pdf_only(&self) -> bool {
        self.pdf_only
    }

    pub fn decisions(&self) -> &[Decision] {
        &self.decisions
    }

    pub fn quarantine(&self) -> &[QuarantineEntry] {
        &self.quarantine
    }

    /// Validates one source's rows, then synthesizes or matches them and arbitrates.
    /// Returns how many evidence entries were appended.
    pub fn fuse_rows(&mut self, rows: Vec<PdfRow>, source: &SourceDocument) -> Result<usize, FusionError> {
        let accepted = self.validate_rows(rows, source);
        if accepted.is_empty() {
            self.decide(DecisionKind::DiscardedSource, &source.url, "no_valid_rows");
            return Ok(0);
        }
        if self.pdf_only {
            self.synthesize(accepted, source)
        } else {
            self.match_rows(&accepted, source)
        }
    }

    fn validate_rows(&mut self, rows: Vec<PdfRow>, source: &SourceDocument) -> Vec<PdfRow> {
        let mut accepted = Vec::with_capacity(rows.len());
        for row in rows {
            let verdict = self.engine.validator.validate_program_name(&row.program_name);
            match verdict.status {
                ValidationStatus::Pass => accepted.push(row),
                ValidationStatus::Quarantine => {
                    self.summary.rows_quarantined += 1;
                    self.decide(
                        DecisionKind::Quarantined,
                        row.program_name.clone(),
                        format!("{}:{:.0}", verdict.reason, verdict.score),
                    );
                    self.quarantine.push(QuarantineEntry {
                        faculty_slug: self.faculty_slug.clone(),
                        name: row.program_name.clone(),
                        reason: verdict.reason,
                        score: verdict.score,
                        source_url: source.url.clone(),
                        row,
                    });
                }
                _ => {
                    self.summary.rows_dropped += 1;
                    self.decide(DecisionKind::DroppedRow, row.program_name, verdict.reason);
                }
            }
        }
        accepted
    }

    fn synthesize(&mut self, rows: Vec<PdfRow>, source: &SourceDocument) -> Result<usize, FusionError> {
        let engine = self.engine;
        let config = &engine.config;
        let mut appended = 0;
        for row in rows {
            let id = stable_program_id(&self.faculty_slug, &row.program_name);
            let idx = match self.programs.iter().position(|p| p.id == id) {
                Some(idx) => idx,
                None => {
                    let mut record =
                        ProgramRecord::new(self.faculty_slug.clone(), row.program_name.clone(), SourceType::PdfOnly);
                    record.level = Some(row.level.unwrap_or(config.synth_default_level));
                    record.language = Some(config.default_language.clone());
                    record.domain = row.domain.clone();
                    record.source_url = source.url.clone();
                    record.admission_year = Some(config.admission_year);
                    info!(program = %record.name, level = ?record.level, "synthesized program from document row");
                    self.programs.push(record);
                    self.summary.records_synthesized += 1;
                    self.programs.len() - 1
                }
            };
            let entry = self.evidence_entry(&row, source, SYNTHESIZED_MATCH_SCORE, MatchStatus::Match);
            if self.append_evidence(idx, entry)? {
                appended += 1;
            }
        }
        Ok(appended)
    }

    fn match_rows(&mut self, rows: &[PdfRow], source: &SourceDocument) -> Result<usize, FusionError> {
        let threshold = self.engine.config.match_threshold;
        let mut appended = 0;
        for idx in 0..self.programs.len() {
            let result = self.engine.matcher.match_record(&self.programs[idx], rows);
            self.note_attempt(idx, result);
            let Some(row) = result.row.filter(|_| result.score > threshold).map(|r| &rows[r]) else {
                debug!(
                    program = %self.programs[idx].name,
                    score = result.score,
                    status = result.status.as_str(),
                    "no acceptable match"
                );
                continue;
            };

            self.summary.matches += 1;
            info!(
                program = %self.programs[idx].name,
                row = %row.program_name,
                score = result.score,
                status = result.status.as_str(),
                "matched"
            );
            if result.status == MatchStatus::Ambiguous {
                self.summary.ambiguous += 1;
                let subject = self.programs[idx].name.clone();
                self.decide(
                    DecisionKind::Ambiguous,
                    subject,
                    format!("ambiguous_match:{}:{:.2}", row.program_name, result.score),
                );
            }
            let entry = self.evidence_entry(row, source, result.score, result.status);
            if self.append_evidence(idx, entry)? {
                appended += 1;
            }
        }
        Ok(appended)
    }

    fn evidence_entry(
        &self,
        row: &PdfRow,
        source: &SourceDocument,
        match_score: f64,
        status: MatchStatus,
    ) -> EvidenceEntry {
        EvidenceEntry {
            source_url: source.url.clone(),
            source_name: source.name.clone(),
            value: SpotsValue {
                budget: row.spots_budget,
                tax: row.spots_tax,
            },
            content_score: source.content_score,
            match_score,
            likelihood: arbitration::likelihood(source.content_score, match_score),
            matched_name: row.program_name.clone(),
            match_status: Some(status),
            page: row.page,
            snippet: row.raw_snippet.clone(),
            observed_at: self.observed_at,
        }
    }

    /// Appends to the record's log (unless deduplicated) and re-arbitrates.
    fn append_evidence(&mut self, idx: usize, entry: EvidenceEntry) -> Result<bool, FusionError> {
        let engine = self.engine;
        let config = &engine.config;
        let record = &mut self.programs[idx];
        if config.evidence_policy == EvidencePolicy::DedupIdentical
            && record.evidence.spots().iter().any(|e| e.same_observation(&entry))
        {
            debug!(program = %record.name, source = %entry.source_url, "identical evidence already logged");
            return Ok(false);
        }
        arbitration::check_entry(&record.id, &entry)?;
        record.evidence.append_spots(entry);
        recompute_from_evidence(record, config.match_weight)?;
        self.summary.evidence_appended += 1;
        Ok(true)
    }

    fn note_attempt(&mut self, idx: usize, result: MatchResult) {
        let replace = match self.best_attempts.get(&idx) {
            None => true,
            Some(prev) => result
                .score
                .total_cmp(&prev.score)
                .then_with(|| status_rank(result.status).cmp(&status_rank(prev.status)))
                == Ordering::Greater,
        };
        if replace {
            self.best_attempts.insert(idx, result);
        }
    }

    /// Attaches the last admission grade from the closest grade-map key. Independent of seats.
    pub fn attach_grades(&mut self, grades: &BTreeMap<String, f64>) -> usize {
        if grades.is_empty() {
            return 0;
        }
        let threshold = self.engine.config.grade_threshold;
        let keys: Vec<(&String, String)> = grades.keys().map(|k| (k, normalize_name(k))).collect();
        let mut attached = 0;
        for record in &mut self.programs {
            let name = normalize_name(&record.name);
            let mut best: Option<(&String, f64)> = None;
            for (key, normalized) in &keys {
                let score = token_set_ratio(&name, normalized);
                if score >= threshold && best.map_or(true, |(_, b)| score > b) {
                    best = Some((key, score));
                }
            }
            if let Some((key, score)) = best {
                debug!(program = %record.name, grade_key = %key, score, "attached grade");
                record.last_admission_grade = grades.get(key.as_str()).copied();
                record.metadata.grade_source = Some(key.clone());
                attached += 1;
            }
        }
        self.summary.grades_attached += attached;
        attached
    }

    /// Settles match statuses, flags records that need review and hands back the results.
    pub fn finish(mut self) -> FacultyOutcome {
        for (idx, attempt) in &self.best_attempts {
            let record = &mut self.programs[*idx];
            if record.evidence.is_empty() {
                record.metadata.match_status = Some(attempt.status);
            }
        }

        let mut flagged = Vec::new();
        for record in &self.programs {
            let check = self.engine.validator.validate_row(record);
            let kind = match check.verdict.status {
                ValidationStatus::Pass => continue,
                ValidationStatus::Review | ValidationStatus::Quarantine => DecisionKind::Review,
                ValidationStatus::Fail | ValidationStatus::Reject => DecisionKind::Rejected,
            };
            flagged.push((kind, record.name.clone(), check.verdict.reason));
        }
        for (kind, subject, reason) in flagged {
            self.decide(kind, subject, reason);
        }

        if self.programs.is_empty() && self.skipped.is_none() {
            self.skip("no_programs");
        }
        info!(
            faculty = %self.faculty_slug,
            programs = self.programs.len(),
            extracted = self.summary.rows_extracted,
            matched = self.summary.matches,
            quarantined = self.summary.rows_quarantined,
            evidence = self.summary.evidence_appended,
            "faculty fused"
        );

        FacultyOutcome {
            faculty_slug: self.faculty_slug,
            programs: self.programs,
            quarantine: self.quarantine,
            decisions: self.decisions,
            candidates: Vec::new(),
            summary: self.summary,
            skipped: self.skipped,
        }
    }

    fn skip(&mut self, reason: &str) {
        warn!(faculty = %self.faculty_slug, reason, "skipping faculty");
        self.skipped = Some(reason.to_string());
        let subject = self.faculty_slug.clone();
        self.decisions.push(Decision {
            kind: DecisionKind::SkippedFaculty,
            subject,
            reason: reason.to_string(),
        });
    }

    fn decide(&mut self, kind: DecisionKind, subject: impl Into<String>, reason: impl Into<String>) {
        let decision = Decision {
            kind,
            subject: subject.into(),
            reason: reason.into(),
        };
        match kind {
            DecisionKind::SkippedCandidate | DecisionKind::DiscardedSource | DecisionKind::Rejected => {
                warn!(kind = kind.as_str(), subject = %decision.subject, reason = %decision.reason, "decision")
            }
            _ => info!(kind = kind.as_str(), subject = %decision.subject, reason = %decision.reason, "decision"),
        }
        self.decisions.push(decision);
    }
}

fn status_rank(status: MatchStatus) -> u8 {
    match status {
        MatchStatus::NoMatch => 0,
        MatchStatus::LowConfidence => 1,
        MatchStatus::Ambiguous => 2,
        MatchStatus::Match => 3,
    }
}
