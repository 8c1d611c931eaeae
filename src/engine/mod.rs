//! Execution & attestation engine.
//!
//! One call, one control, one fresh analytical session. `run` never
//! panics and always produces an `ExecutionReport`: every failure past
//! specification construction becomes an ERROR verdict that is still
//! recorded, because auditors must see failures.
//!
//! Phase order inside a session is fixed: schema pre-flight, EXPLAIN
//! dry-run, population count, then the exception query. A cancellation
//! token is observed at each phase boundary.

mod session;
pub mod verdict;

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::compiler::{self, QueryPlan};
use crate::manifest::EvidenceManifest;
use crate::report::{ErrorKind, ExecutionReport, Verdict};
use crate::spec::ControlSpec;
use crate::validation;

use session::Session;

/// Engine configuration, passed explicitly at construction. There is no
/// ambient configuration anywhere in the core.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Memory ceiling for the analytical session, in megabytes.
    pub memory_limit_mb: Option<u64>,
    /// How many exception rows are retained on the report.
    pub exception_sample_limit: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            memory_limit_mb: None,
            exception_sample_limit: 100,
        }
    }
}

/// A cooperative cancellation signal, cloneable across threads.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_canceled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Per-run context: an optional cancellation signal.
#[derive(Debug, Clone, Default)]
pub struct ExecutionContext {
    pub cancel: Option<CancelToken>,
}

impl ExecutionContext {
    fn canceled(&self) -> bool {
        self.cancel.as_ref().is_some_and(CancelToken::is_canceled)
    }
}

/// Executes compiled controls against Parquet evidence.
pub struct ExecutionEngine {
    config: EngineConfig,
}

impl ExecutionEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    /// Compile, validate, and execute one control, returning its report.
    pub fn run(
        &self,
        spec: &ControlSpec,
        manifest: &EvidenceManifest,
        ctx: &ExecutionContext,
    ) -> ExecutionReport {
        let control_id = spec.governance.control_id.clone();
        info!(control_id = %control_id, "executing control");

        let plan = match compiler::compile(spec, manifest) {
            Ok(plan) => plan,
            Err(error) => {
                warn!(control_id = %control_id, %error, "compilation failed");
                return self.error_report(
                    spec,
                    manifest.all_hashes(),
                    String::new(),
                    error.error_kind(),
                    error.to_string(),
                );
            }
        };

        if let Err(errors) = validation::validate(&plan, manifest) {
            let message = errors
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("; ");
            warn!(control_id = %control_id, %message, "schema validation failed");
            return self.plan_error(spec, &plan, errors[0].error_kind(), message);
        }

        let session = match Session::open(&self.config) {
            Ok(session) => session,
            Err(error) => {
                return self.plan_error(
                    spec,
                    &plan,
                    ErrorKind::ExecutionFailed,
                    error.to_string(),
                )
            }
        };

        if ctx.canceled() {
            return self.plan_error(spec, &plan, ErrorKind::Canceled, canceled_message());
        }

        // The engine's own planner gets a veto before any data is read.
        if let Err(error) = session.explain(&plan.sql) {
            warn!(control_id = %control_id, %error, "engine rejected generated SQL");
            return self.plan_error(spec, &plan, ErrorKind::CompileRejected, error.to_string());
        }

        if ctx.canceled() {
            return self.plan_error(spec, &plan, ErrorKind::Canceled, canceled_message());
        }

        let total_population = match session.count(&plan.population_count_sql) {
            Ok(count) => count,
            Err(error) => {
                return self.plan_error(spec, &plan, ErrorKind::ExecutionFailed, error.to_string())
            }
        };

        if total_population == 0 {
            // Silent PASS on an empty feed would mask a broken upstream.
            let message = format!(
                "zero population: dataset '{}' has no rows after population filters; \
                 cannot attest to control effectiveness",
                plan.base_dataset
            );
            warn!(control_id = %control_id, "{}", message);
            return self.plan_error(spec, &plan, ErrorKind::ZeroPopulation, message);
        }

        if ctx.canceled() {
            return self.plan_error(spec, &plan, ErrorKind::Canceled, canceled_message());
        }

        let (exception_count, exceptions_sample) =
            match session.collect(&plan.sql, self.config.exception_sample_limit) {
                Ok(result) => result,
                Err(error) => {
                    return self.plan_error(
                        spec,
                        &plan,
                        ErrorKind::ExecutionFailed,
                        error.to_string(),
                    )
                }
            };

        let materiality = spec.max_materiality();
        let verdict = verdict::resolve(exception_count, total_population, materiality);
        let rate = verdict::exception_rate_percent(exception_count, total_population);
        debug!(
            control_id = %control_id,
            total_population,
            exception_count,
            rate,
            verdict = %verdict,
            "control executed"
        );

        ExecutionReport {
            execution_id: Uuid::new_v4(),
            control_id,
            specification_version: plan.specification_version.clone(),
            verdict,
            error_kind: None,
            error_message: None,
            total_population,
            exception_count,
            exception_rate_percent: rate,
            materiality_threshold_percent: materiality,
            query_text: plan.sql,
            manifest_hashes: plan.manifest_hashes,
            exceptions_sample,
            executed_at: Utc::now(),
        }
    }

    fn plan_error(
        &self,
        spec: &ControlSpec,
        plan: &QueryPlan,
        kind: ErrorKind,
        message: String,
    ) -> ExecutionReport {
        self.error_report(
            spec,
            plan.manifest_hashes.clone(),
            plan.sql.clone(),
            kind,
            message,
        )
    }

    fn error_report(
        &self,
        spec: &ControlSpec,
        manifest_hashes: BTreeMap<String, String>,
        query_text: String,
        kind: ErrorKind,
        message: String,
    ) -> ExecutionReport {
        ExecutionReport {
            execution_id: Uuid::new_v4(),
            control_id: spec.governance.control_id.clone(),
            specification_version: spec.governance.version.clone(),
            verdict: Verdict::Error,
            error_kind: Some(kind),
            error_message: Some(message),
            total_population: 0,
            exception_count: 0,
            exception_rate_percent: 0.0,
            materiality_threshold_percent: spec.max_materiality(),
            query_text,
            manifest_hashes,
            exceptions_sample: Vec::new(),
            executed_at: Utc::now(),
        }
    }
}

fn canceled_message() -> String {
    "execution canceled before completion".to_string()
}
