//! End-to-end engine tests over generated Parquet evidence.
//!
//! Each test builds its fixture files with DuckDB (`COPY ... (FORMAT
//! PARQUET)`) in a temporary directory, assembles a manifest with real
//! content hashes, and runs the full pipeline: compile, validate,
//! dry-run, count, execute, verdict.

use std::path::Path;

use attest_core::manifest::{
    hash_file, EvidenceManifest, LogicalType, ManifestColumn, ManifestEntry, SourceMetadata,
};
use attest_core::prelude::*;
use attest_core::spec::ControlSpec;

fn write_parquet(
    dir: &Path,
    alias: &str,
    select_sql: &str,
    columns: &[(&str, LogicalType)],
) -> ManifestEntry {
    let path = dir.join(format!("{}.parquet", alias));
    let conn = duckdb::Connection::open_in_memory().unwrap();
    conn.execute_batch(&format!(
        "CREATE TABLE fixture AS {};\nCOPY fixture TO '{}' (FORMAT PARQUET);",
        select_sql,
        path.display()
    ))
    .unwrap();
    let row_count: i64 = conn
        .query_row("SELECT COUNT(*) FROM fixture", [], |row| row.get(0))
        .unwrap();
    ManifestEntry {
        alias: alias.to_string(),
        path: path.clone(),
        content_hash: hash_file(&path).unwrap(),
        row_count: row_count as u64,
        columns: columns
            .iter()
            .map(|(name, logical_type)| ManifestColumn {
                name: name.to_string(),
                logical_type: *logical_type,
            })
            .collect(),
        source: SourceMetadata::default(),
    }
}

fn engine() -> ExecutionEngine {
    ExecutionEngine::new(EngineConfig::default())
}

fn run(spec: &ControlSpec, manifest: &EvidenceManifest) -> ExecutionReport {
    engine().run(spec, manifest, &ExecutionContext::default())
}

fn governance(control_id: &str) -> serde_json::Value {
    serde_json::json!({
        "control_id": control_id,
        "version": "1.0.0",
        "owner_role": "Control Owner",
        "testing_frequency": "Daily",
        "regulatory_citations": [],
        "risk_objective": "test objective"
    })
}

fn evidence() -> serde_json::Value {
    serde_json::json!({
        "retention_years": 7,
        "reviewer_workflow": "Auto-Close_If_Pass",
        "exception_routing_queue": "queue"
    })
}

// ============================================================================
// Scenario 1: row-level filter + temporal assertion
// ============================================================================

fn settlement_spec() -> ControlSpec {
    ControlSpec::from_value(serde_json::json!({
        "governance": governance("CTRL-OPS-T2-003"),
        "ontology_bindings": [],
        "population": {
            "base_dataset": "equity_settlements",
            "steps": [{
                "step_id": "settled_only",
                "action": {
                    "operation": "filter_comparison",
                    "field": "trade_status",
                    "operator": "eq",
                    "value": "SETTLED"
                }
            }]
        },
        "assertions": [{
            "assertion_type": "temporal_date_math",
            "assertion_id": "A1",
            "description": "settlement within two days of trade",
            "base_date_field": "settlement_date",
            "operator": "lte",
            "target_date_field": "trade_date",
            "offset_days": 2
        }],
        "evidence": evidence()
    }))
    .unwrap()
}

const SETTLEMENT_COLUMNS: &[(&str, LogicalType)] = &[
    ("trade_id", LogicalType::String),
    ("trade_date", LogicalType::Date),
    ("settlement_date", LogicalType::Date),
    ("trade_status", LogicalType::String),
];

#[test]
fn test_single_late_settlement_fails_the_control() {
    let dir = tempfile::tempdir().unwrap();
    let entry = write_parquet(
        dir.path(),
        "equity_settlements",
        "SELECT 'T' || CAST(i AS VARCHAR) AS trade_id,
                DATE '2024-01-10' AS trade_date,
                CASE WHEN i = 0 THEN DATE '2024-01-13' ELSE DATE '2024-01-12' END AS settlement_date,
                'SETTLED' AS trade_status
         FROM (SELECT range AS i FROM range(20000))",
        SETTLEMENT_COLUMNS,
    );
    let manifest = EvidenceManifest::new(vec![entry]).unwrap();

    let report = run(&settlement_spec(), &manifest);
    assert_eq!(report.verdict, Verdict::Fail);
    assert_eq!(report.total_population, 20000);
    assert_eq!(report.exception_count, 1);
    assert!(report.error_kind.is_none());
    assert_eq!(report.exceptions_sample.len(), 1);
    assert_eq!(report.exceptions_sample[0]["trade_id"], "T0");
    assert_eq!(report.exceptions_sample[0]["settlement_date"], "2024-01-13");
    // The verdict is bound to the exact evidence bytes.
    assert_eq!(
        report.manifest_hashes.get("equity_settlements").map(String::as_str),
        manifest.hash_of("equity_settlements")
    );
}

#[test]
fn test_compliant_population_passes() {
    let dir = tempfile::tempdir().unwrap();
    let entry = write_parquet(
        dir.path(),
        "equity_settlements",
        "SELECT 'T' || CAST(i AS VARCHAR) AS trade_id,
                DATE '2024-01-10' AS trade_date,
                DATE '2024-01-12' AS settlement_date,
                'SETTLED' AS trade_status
         FROM (SELECT range AS i FROM range(50))",
        SETTLEMENT_COLUMNS,
    );
    let manifest = EvidenceManifest::new(vec![entry]).unwrap();

    let report = run(&settlement_spec(), &manifest);
    assert_eq!(report.verdict, Verdict::Pass);
    assert_eq!(report.exception_count, 0);
    assert!(report.exceptions_sample.is_empty());
}

// ============================================================================
// Scenario 2: composite-key left join, OR-combined assertions
// ============================================================================

#[test]
fn test_wall_cross_join_flags_rows_violating_any_assertion() {
    let dir = tempfile::tempdir().unwrap();
    let trades = write_parquet(
        dir.path(),
        "trades",
        "SELECT * FROM (VALUES
            ('E1', 'AAPL', DATE '2024-02-05'),
            ('E2', 'MSFT', DATE '2024-02-03'),
            ('E3', 'TSLA', DATE '2024-02-10'),
            ('E4', 'NVDA', DATE '2024-02-07')
         ) AS t(employee_id, ticker_symbol, trade_date)",
        &[
            ("employee_id", LogicalType::String),
            ("ticker_symbol", LogicalType::String),
            ("trade_date", LogicalType::Date),
        ],
    );
    let register = write_parquet(
        dir.path(),
        "wall_cross_register",
        "SELECT * FROM (VALUES
            ('E1', 'AAPL', 'CLEARED', DATE '2024-02-01'),
            ('E2', 'MSFT', 'CLEARED', DATE '2024-02-03'),
            ('E3', 'TSLA', 'PENDING', DATE '2024-02-01')
         ) AS t(employee_id, ticker_symbol, restriction_status, clearance_date)",
        &[
            ("employee_id", LogicalType::String),
            ("ticker_symbol", LogicalType::String),
            ("restriction_status", LogicalType::String),
            ("clearance_date", LogicalType::Date),
        ],
    );
    let manifest = EvidenceManifest::new(vec![trades, register]).unwrap();

    let spec = ControlSpec::from_value(serde_json::json!({
        "governance": governance("CTRL-MNPI-707"),
        "ontology_bindings": [],
        "population": {
            "base_dataset": "trades",
            "steps": [
                {
                    "step_id": "join_register",
                    "action": {
                        "operation": "join_left",
                        "left_dataset": "trades",
                        "right_dataset": "wall_cross_register",
                        "left_keys": ["employee_id", "ticker_symbol"],
                        "right_keys": ["employee_id", "ticker_symbol"]
                    }
                },
                {
                    "step_id": "restricted_only",
                    "action": {
                        "operation": "filter_is_null",
                        "field": "restriction_status",
                        "is_null": false
                    }
                }
            ]
        },
        "assertions": [
            {
                "assertion_type": "value_match",
                "assertion_id": "A1",
                "description": "restriction must be cleared",
                "field": "restriction_status",
                "operator": "eq",
                "expected_value": "CLEARED",
                "ignore_case_and_space": true
            },
            {
                "assertion_type": "column_comparison",
                "assertion_id": "A2",
                "description": "trade strictly after clearance",
                "left_field": "trade_date",
                "operator": "gt",
                "right_field": "clearance_date"
            }
        ],
        "evidence": evidence()
    }))
    .unwrap();

    let report = run(&spec, &manifest);
    // E4 has no register row, so the IS NOT NULL filter removes it.
    assert_eq!(report.total_population, 3);
    // E2 violates only the date comparison; E3 violates only the status
    // match. E1 satisfies both and must not appear.
    assert_eq!(report.exception_count, 2);
    assert_eq!(report.verdict, Verdict::Fail);

    let employees: Vec<&str> = report
        .exceptions_sample
        .iter()
        .map(|row| row["employee_id"].as_str().unwrap())
        .collect();
    assert!(employees.contains(&"E2"));
    assert!(employees.contains(&"E3"));
    assert!(!employees.contains(&"E1"));
}

// ============================================================================
// Scenario 3: aggregation with HAVING
// ============================================================================

#[test]
fn test_client_funds_floor_flags_single_deficient_date() {
    let dir = tempfile::tempdir().unwrap();
    let entry = write_parquet(
        dir.path(),
        "cass_balances",
        "SELECT calculation_date, account_type, CAST(current_balance AS DOUBLE) AS current_balance
         FROM (VALUES
            (DATE '2024-03-01', 'CLIENT_FUNDS', 30000000.0),
            (DATE '2024-03-01', 'CLIENT_FUNDS', 21000000.0),
            (DATE '2024-03-02', 'CLIENT_FUNDS', 52000000.0),
            (DATE '2024-03-03', 'CLIENT_FUNDS', 49000000.0),
            (DATE '2024-03-04', 'CLIENT_FUNDS', 50000000.0),
            (DATE '2024-03-05', 'CLIENT_FUNDS', 61000000.0),
            (DATE '2024-03-03', 'HOUSE_FUNDS', 99000000.0)
         ) AS t(calculation_date, account_type, current_balance)",
        &[
            ("calculation_date", LogicalType::Date),
            ("account_type", LogicalType::String),
            ("current_balance", LogicalType::Numeric),
        ],
    );
    let manifest = EvidenceManifest::new(vec![entry]).unwrap();

    let spec = ControlSpec::from_value(serde_json::json!({
        "governance": governance("CTRL-CASS-006"),
        "ontology_bindings": [],
        "population": {
            "base_dataset": "cass_balances",
            "steps": [{
                "step_id": "client_funds_only",
                "action": {
                    "operation": "filter_comparison",
                    "field": "account_type",
                    "operator": "eq",
                    "value": "CLIENT_FUNDS"
                }
            }]
        },
        "assertions": [{
            "assertion_type": "aggregation",
            "assertion_id": "A1",
            "description": "daily client funds at or above 50M",
            "group_by_fields": ["calculation_date"],
            "metric_field": "current_balance",
            "aggregation_function": "SUM",
            "operator": "gte",
            "threshold": 50000000.0
        }],
        "evidence": evidence()
    }))
    .unwrap();

    let report = run(&spec, &manifest);
    // Five distinct calculation dates under the filter.
    assert_eq!(report.total_population, 5);
    // Only 2024-03-03 sums below the floor (the house-funds row on that
    // date is filtered out).
    assert_eq!(report.exception_count, 1);
    assert_eq!(report.verdict, Verdict::Fail);

    let row = &report.exceptions_sample[0];
    assert_eq!(row["calculation_date"], "2024-03-03");
    assert_eq!(row["exception_count"], 1);
    assert_eq!(row["sum_current_balance"], 49000000.0);
}

// ============================================================================
// Scenario 4: IN-list with case/space folding
// ============================================================================

#[test]
fn test_executive_approval_in_list_folds_case_and_space() {
    let dir = tempfile::tempdir().unwrap();
    let invoices = write_parquet(
        dir.path(),
        "invoices",
        "SELECT * FROM (VALUES
            ('INV-1', 250000.0, 'A1'),
            ('INV-2', 180000.0, 'A2'),
            ('INV-3', 120000.0, 'A3'),
            ('INV-4', 90000.0,  'A4')
         ) AS t(invoice_id, invoice_amount, approver_id)",
        &[
            ("invoice_id", LogicalType::String),
            ("invoice_amount", LogicalType::Numeric),
            ("approver_id", LogicalType::String),
        ],
    );
    let titles = write_parquet(
        dir.path(),
        "employee_titles",
        "SELECT * FROM (VALUES
            ('A1', 'vp'),
            ('A2', ' CEO '),
            ('A3', 'svp'),
            ('A4', 'clerk')
         ) AS t(approver_id, approver_title)",
        &[
            ("approver_id", LogicalType::String),
            ("approver_title", LogicalType::String),
        ],
    );
    let manifest = EvidenceManifest::new(vec![invoices, titles]).unwrap();

    let spec = ControlSpec::from_value(serde_json::json!({
        "governance": governance("CTRL-SOX-AP-004"),
        "ontology_bindings": [],
        "population": {
            "base_dataset": "invoices",
            "steps": [
                {
                    "step_id": "large_invoices",
                    "action": {
                        "operation": "filter_comparison",
                        "field": "invoice_amount",
                        "operator": "gt",
                        "value": 100000
                    }
                },
                {
                    "step_id": "join_titles",
                    "action": {
                        "operation": "join_left",
                        "left_dataset": "invoices",
                        "right_dataset": "employee_titles",
                        "left_keys": ["approver_id"],
                        "right_keys": ["approver_id"]
                    }
                }
            ]
        },
        "assertions": [{
            "assertion_type": "value_match",
            "assertion_id": "A1",
            "description": "approver must be an executive",
            "field": "approver_title",
            "operator": "in",
            "expected_value": ["SVP", "EVP", "CEO", "CFO"],
            "ignore_case_and_space": true
        }],
        "evidence": evidence()
    }))
    .unwrap();

    let report = run(&spec, &manifest);
    // Three invoices above 100k.
    assert_eq!(report.total_population, 3);
    // 'vp' is an exception; ' CEO ' and 'svp' fold into the list.
    assert_eq!(report.exception_count, 1);
    assert_eq!(report.exceptions_sample[0]["invoice_id"], "INV-1");
}

// ============================================================================
// Scenario 5: null-defines-compliance across a three-way join
// ============================================================================

#[test]
fn test_terminated_employee_with_live_account_appears_exactly_once() {
    let dir = tempfile::tempdir().unwrap();
    let terminations = write_parquet(
        dir.path(),
        "terminations",
        "SELECT * FROM (VALUES
            ('E1', DATE '2024-04-01'),
            ('E2', DATE '2024-04-02'),
            ('E3', DATE '2024-04-03')
         ) AS t(employee_id, termination_date)",
        &[
            ("employee_id", LogicalType::String),
            ("termination_date", LogicalType::Date),
        ],
    );
    let tickets = write_parquet(
        dir.path(),
        "service_tickets",
        "SELECT * FROM (VALUES
            ('E1', 'TK-1', 'CLOSED'),
            ('E2', 'TK-2', 'CLOSED')
         ) AS t(employee_id, ticket_id, ticket_status)",
        &[
            ("employee_id", LogicalType::String),
            ("ticket_id", LogicalType::String),
            ("ticket_status", LogicalType::String),
        ],
    );
    let accounts = write_parquet(
        dir.path(),
        "system_accounts",
        "SELECT * FROM (VALUES
            ('E2', 'ACC-2', 'ACTIVE')
         ) AS t(account_holder_id, account_id, account_status)",
        &[
            ("account_holder_id", LogicalType::String),
            ("account_id", LogicalType::String),
            ("account_status", LogicalType::String),
        ],
    );
    let manifest = EvidenceManifest::new(vec![terminations, tickets, accounts]).unwrap();

    let spec = ControlSpec::from_value(serde_json::json!({
        "governance": governance("CTRL-IAM-007"),
        "ontology_bindings": [],
        "population": {
            "base_dataset": "terminations",
            "steps": [
                {
                    "step_id": "join_tickets",
                    "action": {
                        "operation": "join_left",
                        "left_dataset": "terminations",
                        "right_dataset": "service_tickets",
                        "left_keys": ["employee_id"],
                        "right_keys": ["employee_id"]
                    }
                },
                {
                    "step_id": "join_accounts",
                    "action": {
                        "operation": "join_left",
                        "left_dataset": "service_tickets",
                        "right_dataset": "system_accounts",
                        "left_keys": ["employee_id"],
                        "right_keys": ["account_holder_id"]
                    }
                }
            ]
        },
        "assertions": [
            {
                "assertion_type": "value_match",
                "assertion_id": "A1",
                "description": "deprovisioning ticket exists",
                "field": "ticket_id",
                "operator": "neq",
                "expected_value": null
            },
            {
                "assertion_type": "value_match",
                "assertion_id": "A2",
                "description": "deprovisioning ticket closed",
                "field": "ticket_status",
                "operator": "eq",
                "expected_value": "CLOSED",
                "ignore_case_and_space": true
            },
            {
                "assertion_type": "value_match",
                "assertion_id": "A3",
                "description": "system account deleted",
                "field": "account_id",
                "operator": "eq",
                "expected_value": null
            }
        ],
        "evidence": evidence()
    }))
    .unwrap();

    let report = run(&spec, &manifest);
    assert_eq!(report.total_population, 3);
    // E1: ticket closed, no account -> compliant.
    // E2: account still present -> exception via A3 only.
    // E3: no ticket at all -> exception via A1 and A2, still one row.
    assert_eq!(report.exception_count, 2);
    let e2_rows = report
        .exceptions_sample
        .iter()
        .filter(|row| row["employee_id"] == "E2")
        .count();
    assert_eq!(e2_rows, 1);
    // Null ticket fields survive canonicalization as explicit nulls.
    let e3 = report
        .exceptions_sample
        .iter()
        .find(|row| row["employee_id"] == "E3")
        .unwrap();
    assert!(e3["ticket_id"].is_null());
}

// ============================================================================
// Scenario 6 and error paths
// ============================================================================

#[test]
fn test_zero_population_is_an_error_not_a_pass() {
    let dir = tempfile::tempdir().unwrap();
    let entry = write_parquet(
        dir.path(),
        "equity_settlements",
        "SELECT 'x' AS trade_id, DATE '2024-01-01' AS trade_date,
                DATE '2024-01-01' AS settlement_date, 'SETTLED' AS trade_status
         WHERE 1 = 0",
        SETTLEMENT_COLUMNS,
    );
    let manifest = EvidenceManifest::new(vec![entry]).unwrap();

    let report = run(&settlement_spec(), &manifest);
    assert_eq!(report.verdict, Verdict::Error);
    assert_eq!(report.error_kind, Some(ErrorKind::ZeroPopulation));
    assert_eq!(report.exception_count, 0);
    assert_eq!(report.total_population, 0);
    assert!(report
        .error_message
        .as_deref()
        .unwrap()
        .contains("equity_settlements"));
}

#[test]
fn test_filters_eliminating_every_row_also_trip_the_guard() {
    let dir = tempfile::tempdir().unwrap();
    let entry = write_parquet(
        dir.path(),
        "equity_settlements",
        "SELECT 'T1' AS trade_id, DATE '2024-01-10' AS trade_date,
                DATE '2024-01-12' AS settlement_date, 'PENDING' AS trade_status",
        SETTLEMENT_COLUMNS,
    );
    let manifest = EvidenceManifest::new(vec![entry]).unwrap();

    let report = run(&settlement_spec(), &manifest);
    assert_eq!(report.verdict, Verdict::Error);
    assert_eq!(report.error_kind, Some(ErrorKind::ZeroPopulation));
}

#[test]
fn test_missing_dataset_reports_manifest_missing() {
    let manifest = EvidenceManifest::new(vec![]).unwrap();
    let report = run(&settlement_spec(), &manifest);
    assert_eq!(report.verdict, Verdict::Error);
    assert_eq!(report.error_kind, Some(ErrorKind::ManifestMissing));
}

#[test]
fn test_schema_drift_names_closest_columns() {
    let dir = tempfile::tempdir().unwrap();
    // Physical file drifted: settlement_date became settled_date.
    let entry = write_parquet(
        dir.path(),
        "equity_settlements",
        "SELECT 'T1' AS trade_id, DATE '2024-01-10' AS trade_date,
                DATE '2024-01-12' AS settled_date, 'SETTLED' AS trade_status",
        &[
            ("trade_id", LogicalType::String),
            ("trade_date", LogicalType::Date),
            ("settled_date", LogicalType::Date),
            ("trade_status", LogicalType::String),
        ],
    );
    let manifest = EvidenceManifest::new(vec![entry]).unwrap();

    let report = run(&settlement_spec(), &manifest);
    assert_eq!(report.verdict, Verdict::Error);
    assert_eq!(report.error_kind, Some(ErrorKind::SchemaDrift));
    let message = report.error_message.unwrap();
    assert!(message.contains("settlement_date"));
    assert!(message.contains("settled_date"));
}

#[test]
fn test_pre_canceled_context_reports_canceled() {
    let dir = tempfile::tempdir().unwrap();
    let entry = write_parquet(
        dir.path(),
        "equity_settlements",
        "SELECT 'T1' AS trade_id, DATE '2024-01-10' AS trade_date,
                DATE '2024-01-12' AS settlement_date, 'SETTLED' AS trade_status",
        SETTLEMENT_COLUMNS,
    );
    let manifest = EvidenceManifest::new(vec![entry]).unwrap();

    let token = CancelToken::new();
    token.cancel();
    let report = engine().run(
        &settlement_spec(),
        &manifest,
        &ExecutionContext {
            cancel: Some(token),
        },
    );
    assert_eq!(report.verdict, Verdict::Error);
    assert_eq!(report.error_kind, Some(ErrorKind::Canceled));
}

#[test]
fn test_value_match_folds_case_and_whitespace() {
    let dir = tempfile::tempdir().unwrap();
    let entry = write_parquet(
        dir.path(),
        "access_reviews",
        "SELECT * FROM (VALUES
            ('R1', 'Approved'),
            ('R2', ' APPROVED '),
            ('R3', 'approved'),
            ('R4', 'DENIED')
         ) AS t(review_id, review_status)",
        &[
            ("review_id", LogicalType::String),
            ("review_status", LogicalType::String),
        ],
    );
    let manifest = EvidenceManifest::new(vec![entry]).unwrap();

    let spec = ControlSpec::from_value(serde_json::json!({
        "governance": governance("CTRL-UAR-002"),
        "ontology_bindings": [],
        "population": {
            "base_dataset": "access_reviews",
            "steps": []
        },
        "assertions": [{
            "assertion_type": "value_match",
            "assertion_id": "A1",
            "description": "review must be approved",
            "field": "review_status",
            "operator": "eq",
            "expected_value": "APPROVED",
            "ignore_case_and_space": true
        }],
        "evidence": evidence()
    }))
    .unwrap();

    let report = run(&spec, &manifest);
    assert_eq!(report.total_population, 4);
    // Only the denial survives the fold.
    assert_eq!(report.exception_count, 1);
    assert_eq!(report.exceptions_sample[0]["review_id"], "R4");
}

#[test]
fn test_sample_is_capped_while_count_is_exact() {
    let dir = tempfile::tempdir().unwrap();
    // Every row violates the assertion.
    let entry = write_parquet(
        dir.path(),
        "equity_settlements",
        "SELECT 'T' || CAST(i AS VARCHAR) AS trade_id,
                DATE '2024-01-10' AS trade_date,
                DATE '2024-01-20' AS settlement_date,
                'SETTLED' AS trade_status
         FROM (SELECT range AS i FROM range(250))",
        SETTLEMENT_COLUMNS,
    );
    let manifest = EvidenceManifest::new(vec![entry]).unwrap();

    let report = run(&settlement_spec(), &manifest);
    assert_eq!(report.exception_count, 250);
    assert_eq!(report.exceptions_sample.len(), 100);
}
