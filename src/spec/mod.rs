//! The control specification model.
//!
//! "Controls are data": a control is a declarative object, never code.
//! This module defines the typed value model, the discriminated pipeline
//! and assertion unions, governance metadata, and the validated
//! `ControlSpec` the compiler consumes. All structural invariants are
//! enforced at construction time.

pub mod assertion;
pub mod control;
pub mod governance;
pub mod pipeline;
pub mod value;

pub use assertion::{
    Aggregation, Assertion, ColumnComparison, MatchValue, TemporalDateMath, ValueMatch,
};
pub use control::ControlSpec;
pub use governance::{
    EvidenceRequirements, Governance, OntologyBinding, ReviewerWorkflow, TestingFrequency,
};
pub use pipeline::{
    FilterComparison, FilterInList, FilterIsNull, JoinLeft, PipelineAction, PipelineStep,
    PopulationPipeline, SamplingMethod, SamplingStrategy,
};
pub use value::{AggFunc, CompareOp, MatchOp, OrderingOp, ScalarKind, ScalarValue};
