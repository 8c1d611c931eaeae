//! # attest_core
//!
//! A compliance-control attestation core. Controls are data: a typed,
//! declarative specification is compiled to one deterministic DuckDB
//! query over Parquet evidence, executed with bounded resources, judged
//! under materiality rules, and recorded in an append-only audit ledger
//! bound cryptographically to the evidence that was tested.
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use attest_core::prelude::*;
//!
//! let spec = ControlSpec::from_json(&candidate_json)?;
//! let manifest = EvidenceManifest::new(entries)?;
//!
//! let engine = ExecutionEngine::new(EngineConfig::default());
//! let report = engine.run(&spec, &manifest, &ExecutionContext::default());
//!
//! let ledger = AuditLedger::open(Path::new("data/audit.db"))?;
//! ledger.record_execution(&report, &manifest)?;
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐
//! │ ControlSpec  │   │  Evidence    │
//! │  (spec::*)   │   │  Manifest    │
//! └──────┬───────┘   └──────┬───────┘
//!        └───────┬──────────┘
//!                ▼
//!         compiler::compile        pure, idempotent
//!                │
//!                ▼
//!           QueryPlan ──► validation::validate   schema pre-flight
//!                │
//!                ▼
//!        ExecutionEngine::run      EXPLAIN, count, execute
//!                │
//!                ▼
//!         ExecutionReport ──► AuditLedger        append-only
//! ```
//!
//! Specification construction is the only operation that fails without
//! producing a report; every later failure becomes an ERROR verdict that
//! is still recorded.

pub mod compiler;
pub mod config;
pub mod engine;
pub mod error;
pub mod ledger;
pub mod manifest;
pub mod report;
pub mod spec;
pub mod sql;
pub mod validation;

/// Re-exports for convenient usage.
pub mod prelude {
    pub use crate::compiler::{compile, CompileError, QueryPlan, QueryShape};
    pub use crate::config::Settings;
    pub use crate::engine::{CancelToken, EngineConfig, ExecutionContext, ExecutionEngine};
    pub use crate::error::SpecError;
    pub use crate::ledger::{ApprovalMetadata, AuditLedger, IntegrityStatus, LedgerError};
    pub use crate::manifest::{
        EvidenceManifest, LogicalType, ManifestColumn, ManifestEntry, SourceMetadata,
    };
    pub use crate::report::{ErrorKind, ExecutionReport, Verdict};
    pub use crate::spec::ControlSpec;
}

// Also export the main types at the crate root.
pub use compiler::{compile, QueryPlan};
pub use engine::{EngineConfig, ExecutionContext, ExecutionEngine};
pub use error::SpecError;
pub use ledger::AuditLedger;
pub use manifest::EvidenceManifest;
pub use report::{ErrorKind, ExecutionReport, Verdict};
pub use spec::ControlSpec;
