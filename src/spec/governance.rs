//! Governance, ontology, and evidence-handling metadata.
//!
//! None of this influences generated SQL. It exists so auditors can trace
//! a control back to the regulatory objective it tests and so reviewers
//! can audit the mapping from policy language to physical columns.

use serde::{Deserialize, Serialize};

/// How often a control is expected to be tested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TestingFrequency {
    Continuous,
    Daily,
    Weekly,
    Quarterly,
    Annual,
}

/// Metadata linking a control to regulatory frameworks and ownership.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Governance {
    pub control_id: String,
    /// Semantic version of the specification (`MAJOR.MINOR.PATCH`).
    pub version: String,
    pub owner_role: String,
    pub testing_frequency: TestingFrequency,
    pub regulatory_citations: Vec<String>,
    pub risk_objective: String,
}

/// Maps a business term to the physical evidence column that carries it.
///
/// Non-normative for execution; the schema validator cross-checks each
/// binding against the manifest so a stale mapping is caught before any
/// data is read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OntologyBinding {
    pub business_term: String,
    pub dataset_alias: String,
    pub technical_field: String,
    pub data_type: crate::manifest::LogicalType,
}

/// What happens to results once a run completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReviewerWorkflow {
    #[serde(rename = "Auto-Close_If_Pass")]
    AutoCloseIfPass,
    #[serde(rename = "Requires_Human_Signoff")]
    RequiresHumanSignoff,
    #[serde(rename = "Four_Eyes_Review")]
    FourEyesReview,
}

/// Audit retention and exception routing configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EvidenceRequirements {
    pub retention_years: i64,
    pub reviewer_workflow: ReviewerWorkflow,
    pub exception_routing_queue: String,
}

/// Check a version string is a numeric `MAJOR.MINOR.PATCH` triple.
pub(crate) fn is_semantic_version(version: &str) -> bool {
    let mut parts = 0usize;
    for part in version.split('.') {
        parts += 1;
        if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
            return false;
        }
    }
    parts == 3
}
