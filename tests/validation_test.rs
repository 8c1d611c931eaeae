//! Schema validator integration tests: drift suggestions and coarse
//! type compatibility.

use attest_core::compiler::compile;
use attest_core::manifest::{
    EvidenceManifest, LogicalType, ManifestColumn, ManifestEntry, SourceMetadata,
};
use attest_core::spec::ControlSpec;
use attest_core::validation::{validate, ValidationError};

fn entry(alias: &str, columns: &[(&str, LogicalType)]) -> ManifestEntry {
    ManifestEntry {
        alias: alias.to_string(),
        path: std::path::PathBuf::from(format!("/evidence/{}.parquet", alias)),
        content_hash: "ab".repeat(32),
        row_count: 10,
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

fn spec(doc: serde_json::Value) -> ControlSpec {
    ControlSpec::from_value(doc).unwrap()
}

fn base_doc() -> serde_json::Value {
    serde_json::json!({
        "governance": {
            "control_id": "CTRL-VAL-001",
            "version": "1.0.0",
            "owner_role": "Owner",
            "testing_frequency": "Daily",
            "regulatory_citations": [],
            "risk_objective": "validation fixture"
        },
        "ontology_bindings": [],
        "population": {
            "base_dataset": "settlements",
            "steps": []
        },
        "assertions": [{
            "assertion_type": "value_match",
            "assertion_id": "A1",
            "description": "status settled",
            "field": "trade_status",
            "operator": "eq",
            "expected_value": "SETTLED"
        }],
        "evidence": {
            "retention_years": 7,
            "reviewer_workflow": "Auto-Close_If_Pass",
            "exception_routing_queue": "q"
        }
    })
}

fn settlements_manifest() -> EvidenceManifest {
    EvidenceManifest::new(vec![entry(
        "settlements",
        &[
            ("trade_id", LogicalType::String),
            ("trade_status", LogicalType::String),
            ("trade_date", LogicalType::Date),
            ("settlement_date", LogicalType::Date),
            ("notional_amount", LogicalType::Numeric),
        ],
    )])
    .unwrap()
}

#[test]
fn test_clean_plan_validates() {
    let plan = compile(&spec(base_doc()), &settlements_manifest()).unwrap();
    assert!(validate(&plan, &settlements_manifest()).is_ok());
}

#[test]
fn test_missing_column_suggests_nearest_names() {
    let mut doc = base_doc();
    doc["assertions"][0]["field"] = serde_json::json!("trade_statuss");
    let manifest = settlements_manifest();
    let plan = compile(&spec(doc), &manifest).unwrap();

    let errors = validate(&plan, &manifest).unwrap_err();
    assert_eq!(errors.len(), 1);
    match &errors[0] {
        ValidationError::SchemaDrift {
            column, closest, ..
        } => {
            assert_eq!(column, "trade_statuss");
            assert_eq!(closest[0], "trade_status");
            assert_eq!(closest.len(), 3);
        }
        other => panic!("unexpected error: {:?}", other),
    }
}

#[test]
fn test_numeric_comparison_on_string_column_is_a_type_mismatch() {
    let mut doc = base_doc();
    doc["population"]["steps"] = serde_json::json!([{
        "step_id": "large_only",
        "action": {
            "operation": "filter_comparison",
            "field": "trade_status",
            "operator": "gt",
            "value": 100000
        }
    }]);
    let manifest = settlements_manifest();
    let plan = compile(&spec(doc), &manifest).unwrap();

    let errors = validate(&plan, &manifest).unwrap_err();
    assert!(matches!(&errors[0], ValidationError::TypeMismatch { column, .. } if column == "trade_status"));
}

#[test]
fn test_date_math_on_string_column_is_a_type_mismatch() {
    let mut doc = base_doc();
    doc["assertions"] = serde_json::json!([{
        "assertion_type": "temporal_date_math",
        "assertion_id": "A1",
        "description": "timeliness",
        "base_date_field": "trade_id",
        "operator": "lte",
        "target_date_field": "trade_date",
        "offset_days": 2
    }]);
    let manifest = settlements_manifest();
    let plan = compile(&spec(doc), &manifest).unwrap();

    let errors = validate(&plan, &manifest).unwrap_err();
    assert!(matches!(&errors[0], ValidationError::TypeMismatch { column, .. } if column == "trade_id"));
}

#[test]
fn test_sum_over_string_column_is_a_type_mismatch() {
    let mut doc = base_doc();
    doc["assertions"] = serde_json::json!([{
        "assertion_type": "aggregation",
        "assertion_id": "A1",
        "description": "sum of statuses makes no sense",
        "group_by_fields": ["trade_date"],
        "metric_field": "trade_status",
        "aggregation_function": "SUM",
        "operator": "gte",
        "threshold": 1.0
    }]);
    let manifest = settlements_manifest();
    let plan = compile(&spec(doc), &manifest).unwrap();

    let errors = validate(&plan, &manifest).unwrap_err();
    assert!(matches!(&errors[0], ValidationError::TypeMismatch { .. }));
}

#[test]
fn test_count_over_string_column_is_fine() {
    let mut doc = base_doc();
    doc["assertions"] = serde_json::json!([{
        "assertion_type": "aggregation",
        "assertion_id": "A1",
        "description": "at most 5 trades per day",
        "group_by_fields": ["trade_date"],
        "metric_field": "trade_status",
        "aggregation_function": "COUNT",
        "operator": "lte",
        "threshold": 5.0
    }]);
    let manifest = settlements_manifest();
    let plan = compile(&spec(doc), &manifest).unwrap();
    assert!(validate(&plan, &manifest).is_ok());
}

#[test]
fn test_qualified_reference_to_unknown_dataset() {
    let mut doc = base_doc();
    doc["assertions"][0]["field"] = serde_json::json!("phantom_dataset.trade_status");
    let manifest = settlements_manifest();
    let plan = compile(&spec(doc), &manifest).unwrap();

    let errors = validate(&plan, &manifest).unwrap_err();
    assert!(matches!(
        &errors[0],
        ValidationError::MissingDataset { dataset } if dataset == "phantom_dataset"
    ));
}

#[test]
fn test_ontology_binding_must_agree_with_manifest() {
    let mut doc = base_doc();
    doc["ontology_bindings"] = serde_json::json!([
        {
            "business_term": "Trade Status",
            "dataset_alias": "settlements",
            "technical_field": "trade_status",
            "data_type": "string"
        },
        {
            "business_term": "Notional",
            "dataset_alias": "settlements",
            "technical_field": "notional_amount",
            "data_type": "string"
        }
    ]);
    let manifest = settlements_manifest();
    let plan = compile(&spec(doc), &manifest).unwrap();

    let errors = validate(&plan, &manifest).unwrap_err();
    // Only the second binding disagrees (numeric column declared string).
    assert_eq!(errors.len(), 1);
    assert!(matches!(
        &errors[0],
        ValidationError::TypeMismatch { column, .. } if column == "notional_amount"
    ));
}

#[test]
fn test_join_key_type_disagreement() {
    let manifest = EvidenceManifest::new(vec![
        entry(
            "settlements",
            &[
                ("trade_id", LogicalType::String),
                ("trade_status", LogicalType::String),
                ("counterparty_ref", LogicalType::String),
            ],
        ),
        entry(
            "counterparties",
            &[
                ("counterparty_id", LogicalType::Numeric),
                ("counterparty_name", LogicalType::String),
            ],
        ),
    ])
    .unwrap();

    let mut doc = base_doc();
    doc["population"]["steps"] = serde_json::json!([{
        "step_id": "join_counterparties",
        "action": {
            "operation": "join_left",
            "left_dataset": "settlements",
            "right_dataset": "counterparties",
            "left_keys": ["counterparty_ref"],
            "right_keys": ["counterparty_id"]
        }
    }]);
    let plan = compile(&spec(doc), &manifest).unwrap();

    let errors = validate(&plan, &manifest).unwrap_err();
    assert!(matches!(
        &errors[0],
        ValidationError::TypeMismatch { column, .. } if column == "counterparty_id"
    ));
}

#[test]
fn test_all_failures_are_collected_in_one_pass() {
    let mut doc = base_doc();
    doc["assertions"] = serde_json::json!([
        {
            "assertion_type": "value_match",
            "assertion_id": "A1",
            "description": "first drifted column",
            "field": "trade_statuss",
            "operator": "eq",
            "expected_value": "SETTLED"
        },
        {
            "assertion_type": "column_comparison",
            "assertion_id": "A2",
            "description": "second drifted column",
            "left_field": "settlement_dat",
            "operator": "gt",
            "right_field": "trade_date"
        }
    ]);
    let manifest = settlements_manifest();
    let plan = compile(&spec(doc), &manifest).unwrap();

    let errors = validate(&plan, &manifest).unwrap_err();
    assert_eq!(errors.len(), 2);
}
