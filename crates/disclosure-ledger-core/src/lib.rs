//! Normalize, materialize, reconcile and diff government information-disclosure
//! annual reports extracted from scanned documents.
//!
//! Everything in this crate is pure: no I/O, no shared mutable state. Persistence
//! lives in `disclosure-ledger-store-sqlite`.

pub mod classify;
pub mod consistency;
pub mod diff;
pub mod materialize;
pub mod normalize;
pub mod skeleton;

pub use classify::{classify, Classification, SemanticKind, CLASSIFIER_REVISION};
pub use consistency::{
    apply_tolerance_overrides, check_cross_year, check_within_year, cross_year_formulas,
    summarize, validate_formulas, within_year_formulas, CheckBadge, CheckSummary,
    ConsistencyIssue, EvidenceRef, Formula, FormulaCategory, IssueStatus, Severity, Side, Term,
};
pub use diff::{
    diff_reports, render_diff, similarity, tokenize, DiffOptions, DiffResult, DiffSpan,
    SectionChange, SectionDiff, DEFAULT_LOW_SIMILARITY_THRESHOLD, DEFAULT_MAX_EDIT_DISTANCE,
    MAX_EDIT_DISTANCE_CEILING,
};
pub use materialize::{
    cell_ref, flatten_report, parse_payload, ActiveDisclosureFact, ApplicationFact,
    FactSnapshot, Flattened, LegalProceedingFact, ValueCell,
};
pub use normalize::{extraction_object, normalize, CanonicalReport};

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum CoreError {
    #[error("parse error: {0}")]
    Parse(String),
    #[error("validation error: {0}")]
    Validation(String),
}
