//! Mapping rules: templates, field specifications, and record validation

pub mod sample;
pub mod spec;
pub mod validate;

pub use sample::sample_record;
pub use spec::{FieldKind, FieldSet, FieldSpec, MappingRules, Template};
pub use validate::{
    validate_batch, validate_record, BatchSummary, IssueFrequency, RecordReport, ValidationIssue,
};
