//! Candidate ranking, program matching and evidence arbitration for one faculty at a time.

use acf_extract::ExtractError;
use thiserror::Error;

pub mod arbitration;
mod config;
mod engine;
mod matcher;
mod ranker;
pub mod similarity;

pub use arbitration::recompute_from_evidence;
pub use config::{ConfigError, EvidencePolicy, FusionConfig};
pub use engine::{
    Decision, DecisionKind, FacultyFusion, FacultyInput, FacultyOutcome, FacultySummary, FusionEngine,
    QuarantineEntry, RunContext, SourceDocument,
};
pub use matcher::{FuzzyMatcher, MatchResult};
pub use ranker::CandidateRanker;

pub const CRATE_NAME: &str = "acf-fusion";

/// Contract violations. Everything recoverable is reported as a [`Decision`] instead.
#[derive(Debug, Error)]
pub enum FusionError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("invalid pattern: {0}")]
    Pattern(#[from] regex::Error),
    #[error(transparent)]
    Extract(#[from] ExtractError),
    #[error("corrupt evidence on record {record} from {source_url}: {reason}")]
    CorruptEvidence {
        record: String,
        source_url: String,
        reason: String,
    },
}
