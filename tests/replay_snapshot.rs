//! Typed replay against snapshot bundles, and the snapshot store's
//! content addressing.

use anyhow::Result;
use serde_json::{json, Map, Value};

use buff::record::{
    Artifacts, CodeVersion, DecisionRecord, Outcome, RecordParts, RunContext, RISK_MODE_COMPUTED,
    RISK_MODE_FACT,
};
use buff::replay::{ReplayConfig, ReplayMode, ReplayRunner};
use buff::risk::{evaluate_risk, validate_risk_inputs, RiskConfig, RiskState};
use buff::selector::select_strategy;
use buff::snapshot::{create_snapshot, load_snapshot, Snapshot};
use buff::strategy::builtin_registry;
use buff::Error;

fn risk_inputs_payload() -> Value {
    json!({
        "symbol": "BTCUSDT",
        "timeframe": "1m",
        "as_of": "2026-02-01T00:00:00Z",
        "atr_pct": 0.005,
        "realized_vol": 0.004,
        "missing_fraction": 0.0,
        "timestamps_valid": true,
        "latest_metrics_valid": true,
        "invalid_index": false,
        "invalid_close": false,
    })
}

fn risk_config_value() -> Value {
    json!({
        "missing_red": 0.2,
        "atr_yellow": 0.01,
        "atr_red": 0.02,
        "rvol_yellow": 0.01,
        "rvol_red": 0.02,
        "no_metrics_state": "YELLOW",
    })
}

fn market_features() -> Value {
    json!({"trend_state": "UP", "volatility_regime": "LOW"})
}

fn features_map(features: &Value) -> Map<String, Value> {
    features.as_object().unwrap().clone()
}

/// Build a record the way the driver would.
fn build_record(risk_mode: &str) -> DecisionRecord {
    let cfg = RiskConfig::from_value(&risk_config_value()).unwrap();
    let validated = validate_risk_inputs(&risk_inputs_payload()).unwrap();
    let decision = evaluate_risk(&validated, &cfg).unwrap();
    let selection = select_strategy(
        &features_map(&market_features()),
        decision.state,
        "1m",
        builtin_registry(),
    );
    let outcome = Outcome::derive(decision.state, &selection);

    DecisionRecord::assemble(RecordParts {
        run_id: "replay_run".to_string(),
        seq: 0,
        decision_id: "dec-001".to_string(),
        ts_utc: "2026-02-01T00:00:00.000Z".to_string(),
        symbol: Some("BTCUSDT".to_string()),
        timeframe: "1m".to_string(),
        code_version: CodeVersion {
            git_commit: "deadbeef".to_string(),
            dirty: false,
        },
        run_context: RunContext {
            seed: 42,
            ..RunContext::default()
        },
        artifacts: Artifacts::default(),
        risk_state: decision.state,
        market_state: market_features(),
        selector_inputs: json!({}),
        config: json!({"risk_config": risk_config_value()}),
        risk_mode: risk_mode.to_string(),
        selection,
        outcome,
    })
    .unwrap()
}

fn computed_record() -> DecisionRecord {
    build_record(RISK_MODE_COMPUTED)
}

fn matching_snapshot() -> Snapshot {
    Snapshot {
        snapshot_version: 1,
        decision_id: "dec-001".to_string(),
        symbol: "BTCUSDT".to_string(),
        timeframe: "1m".to_string(),
        market_data: None,
        features: market_features(),
        risk_inputs: Some(risk_inputs_payload()),
        config: Some(json!({"risk_config": risk_config_value()})),
        selector_inputs: json!({}),
    }
}

#[test]
fn strict_core_replay_matches_a_faithful_record() -> Result<()> {
    let record = computed_record();
    let runner = ReplayRunner::new(builtin_registry());
    let report = runner.replay(&record, &matching_snapshot(), ReplayMode::StrictCore)?;
    assert!(report.matched, "diffs: {:?}", report.diffs);
    assert_eq!(
        report.replay_record.hashes.content_hash,
        record.hashes.content_hash
    );
    Ok(())
}

#[test]
fn strict_full_ignores_metadata_overrides() -> Result<()> {
    let record = computed_record();
    let runner = ReplayRunner::with_config(
        builtin_registry(),
        ReplayConfig {
            ts_utc_override: Some("2026-02-01T01:00:00.000Z".to_string()),
        },
    );
    let report = runner.replay(&record, &matching_snapshot(), ReplayMode::StrictFull)?;
    assert!(report.matched, "diffs: {:?}", report.diffs);
    Ok(())
}

#[test]
fn replay_fails_closed_on_missing_risk_config() {
    let mut record = computed_record();
    record.inputs.config = json!({});
    let mut snapshot = matching_snapshot();
    snapshot.config = None;

    let runner = ReplayRunner::new(builtin_registry());
    let err = runner
        .replay(&record, &snapshot, ReplayMode::StrictCore)
        .unwrap_err();
    match &err {
        Error::MissingConfig { path } => assert_eq!(path, "inputs.config.risk_config"),
        other => panic!("unexpected error: {other}"),
    }
    assert!(err.to_string().contains("inputs.config.risk_config"));
}

#[test]
fn drifted_snapshot_features_emit_diff_paths() -> Result<()> {
    let record = computed_record();
    let mut snapshot = matching_snapshot();
    snapshot.features = json!({"trend_state": "RANGE", "volatility_regime": "LOW"});

    let runner = ReplayRunner::new(builtin_registry());
    let report = runner.replay(&record, &snapshot, ReplayMode::StrictCore)?;
    assert!(!report.matched);
    assert!(report
        .diffs
        .iter()
        .any(|diff| diff.path == "selection.strategy_id"));
    assert!(report
        .diffs
        .iter()
        .any(|diff| diff.path == "hashes.core_hash"));
    Ok(())
}

#[test]
fn fact_mode_replays_the_recorded_risk_state() -> Result<()> {
    let record = build_record(RISK_MODE_FACT);
    // Snapshot without any risk inputs: fact mode never recomputes.
    let mut snapshot = matching_snapshot();
    snapshot.risk_inputs = None;
    snapshot.config = None;

    let runner = ReplayRunner::new(builtin_registry());
    let report = runner.replay(&record, &snapshot, ReplayMode::StrictCore)?;
    assert!(report.matched, "diffs: {:?}", report.diffs);
    Ok(())
}

// --- snapshot store ---

fn snapshot_payload() -> Value {
    json!({
        "snapshot_version": 1,
        "decision_id": "dec-001",
        "symbol": "BTCUSDT",
        "timeframe": "1m",
        "market_data": [
            {"ts": "2026-02-01T00:00:00Z", "open": 100.0, "high": 101.0,
             "low": 99.5, "close": 100.5, "volume": 10.0}
        ],
        "features": {"trend_state": "UP", "volatility_regime": "LOW"},
        "risk_inputs": risk_inputs_payload(),
        "config": {"risk_config": risk_config_value()},
        "selector_inputs": {"trend_state": "UP"},
    })
}

#[test]
fn snapshot_round_trips_through_its_content_address() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let out_path = create_snapshot(&snapshot_payload(), dir.path())?;

    let stored = load_snapshot(&out_path)?;
    assert!(stored.snapshot_hash.starts_with("sha256:"));
    assert_eq!(
        out_path.file_name().unwrap().to_str().unwrap(),
        stored.snapshot_ref
    );
    assert_eq!(
        std::fs::read_to_string(&out_path)?,
        stored.snapshot.to_canonical_json()?
    );
    Ok(())
}

#[test]
fn snapshot_create_is_idempotent_for_equal_content() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let first = create_snapshot(&snapshot_payload(), dir.path())?;
    let second = create_snapshot(&snapshot_payload(), dir.path())?;
    assert_eq!(first, second);
    Ok(())
}

#[test]
fn snapshot_with_wrong_file_name_is_rejected() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let out_path = create_snapshot(&snapshot_payload(), dir.path())?;

    let forged = dir.path().join(format!("snapshot_{}.json", "0".repeat(64)));
    std::fs::copy(&out_path, &forged)?;
    let err = load_snapshot(&forged).unwrap_err();
    assert!(matches!(err, Error::SnapshotTampered { .. }));
    Ok(())
}

#[test]
fn snapshot_with_unknown_version_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let mut payload = snapshot_payload();
    payload["snapshot_version"] = json!(2);
    let err = create_snapshot(&payload, dir.path()).unwrap_err();
    assert!(matches!(err, Error::SchemaMismatch { .. }));
}
