//! Stream-level replay verification: corruption tolerance, hash
//! mismatch detection, and field tampering detection.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::Result;
use serde_json::{Map, Value};

use buff::clock::FixedClock;
use buff::loader::{load_records, load_shard};
use buff::replay::replay_verify;
use buff::risk::RiskState;
use buff::selector::select_strategy;
use buff::strategy::builtin_registry;
use buff::writer::{list_shards, RecordWriter, WriterOptions};

fn clock() -> Box<FixedClock> {
    Box::new(FixedClock("2026-02-01T00:00:00.000Z".to_string()))
}

fn market(pairs: &[(&str, &str)]) -> Map<String, Value> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), Value::String(v.to_string())))
        .collect()
}

fn write_run(root: &Path, run_id: &str, states: &[(Map<String, Value>, RiskState)]) -> PathBuf {
    let mut writer =
        RecordWriter::open(root, run_id, WriterOptions::default(), clock()).unwrap();
    for (state, risk_state) in states {
        let selection = select_strategy(state, *risk_state, "1m", builtin_registry());
        writer
            .append("1m", *risk_state, Value::Object(state.clone()), selection)
            .unwrap();
    }
    writer.close().unwrap();
    root.join(run_id)
}

fn single_shard(run_dir: &Path) -> PathBuf {
    let shards = list_shards(run_dir).unwrap();
    assert_eq!(shards.len(), 1);
    shards[0].1.clone()
}

/// Rewrite one field of one stored line, leaving the hashes untouched.
fn tamper_line(shard: &Path, mutate: impl FnOnce(&mut Value)) {
    let text = std::fs::read_to_string(shard).unwrap();
    let mut lines: Vec<String> = text.lines().map(String::from).collect();
    let mut payload: Value = serde_json::from_str(&lines[0]).unwrap();
    mutate(&mut payload);
    lines[0] = serde_json::to_string(&payload).unwrap();
    std::fs::write(shard, lines.join("\n") + "\n").unwrap();
}

#[test]
fn replay_matches_every_record_of_a_clean_run() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let run_dir = write_run(
        dir.path(),
        "clean",
        &[
            (market(&[("trend_state", "UP")]), RiskState::GREEN),
            (
                market(&[("trend_state", "RANGE"), ("volatility_regime", "LOW")]),
                RiskState::GREEN,
            ),
            (market(&[("trend_state", "UP")]), RiskState::RED),
            (market(&[("trend_state", "DOWN")]), RiskState::YELLOW),
            (
                market(&[("volatility_regime", "HIGH"), ("momentum_state", "SPIKE")]),
                RiskState::GREEN,
            ),
        ],
    );

    let summary = replay_verify(&run_dir, builtin_registry())?;
    assert_eq!(summary.total, 5);
    assert_eq!(summary.matched, 5);
    assert_eq!(summary.mismatched, 0);
    assert_eq!(summary.hash_mismatch, 0);
    assert_eq!(summary.errors, 0);
    assert!(summary.ok());
    Ok(())
}

#[test]
fn tampered_market_state_hash_is_a_hash_mismatch() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let run_dir = write_run(
        dir.path(),
        "tamper-hash",
        &[(market(&[("trend_state", "UP")]), RiskState::GREEN)],
    );
    tamper_line(&single_shard(&run_dir), |payload| {
        payload["market_state_hash"] = Value::String("sha256:deadbeef".to_string());
    });

    let summary = replay_verify(&run_dir, builtin_registry())?;
    assert_eq!(summary.total, 1);
    assert_eq!(summary.hash_mismatch, 1);
    assert_eq!(summary.matched, 0);
    Ok(())
}

#[test]
fn tampered_selection_is_a_mismatch() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let run_dir = write_run(
        dir.path(),
        "tamper-selection",
        &[(market(&[("trend_state", "UP")]), RiskState::GREEN)],
    );
    tamper_line(&single_shard(&run_dir), |payload| {
        payload["selection"]["strategy_id"] = Value::String("NONE".to_string());
    });

    let summary = replay_verify(&run_dir, builtin_registry())?;
    assert_eq!(summary.total, 1);
    assert_eq!(summary.mismatched, 1);
    assert_eq!(summary.matched, 0);
    Ok(())
}

#[test]
fn tampered_core_hash_is_a_hash_mismatch() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let run_dir = write_run(
        dir.path(),
        "tamper-core",
        &[(market(&[("trend_state", "UP")]), RiskState::GREEN)],
    );
    tamper_line(&single_shard(&run_dir), |payload| {
        payload["hashes"]["core_hash"] = Value::String("sha256:deadbeef".to_string());
    });

    let summary = replay_verify(&run_dir, builtin_registry())?;
    assert_eq!(summary.hash_mismatch, 1);
    assert_eq!(summary.matched, 0);
    Ok(())
}

#[test]
fn loader_counts_malformed_lines_and_never_aborts() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let run_dir = write_run(
        dir.path(),
        "corrupt",
        &[
            (market(&[("trend_state", "UP")]), RiskState::GREEN),
            (market(&[("trend_state", "DOWN")]), RiskState::GREEN),
        ],
    );
    let shard = single_shard(&run_dir);

    // Interleave garbage the way a crashed or buggy writer would.
    let mut file = OpenOptions::new().append(true).open(&shard)?;
    file.write_all(b"{bad json\n")?;
    file.write_all(b"{\"schema_version\":\"dr.v1\"\n")?;
    drop(file);

    let (records, errors) = load_shard(&shard)?;
    assert_eq!(records.len(), 2);
    assert_eq!(errors, 2);

    let summary = replay_verify(&run_dir, builtin_registry())?;
    assert_eq!(summary.total, 2);
    assert_eq!(summary.matched, 2);
    assert_eq!(summary.errors, 2);
    Ok(())
}

#[test]
fn foreign_schema_version_is_a_hard_stop() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let run_dir = write_run(
        dir.path(),
        "foreign",
        &[(market(&[("trend_state", "UP")]), RiskState::GREEN)],
    );
    tamper_line(&single_shard(&run_dir), |payload| {
        payload["schema_version"] = Value::String("dr.v2".to_string());
    });

    assert!(load_records(&run_dir).is_err());
    assert!(replay_verify(&run_dir, builtin_registry()).is_err());
    Ok(())
}

#[test]
fn records_across_shards_load_in_order() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let options = WriterOptions {
        rotate_every: 1,
        ..WriterOptions::default()
    };
    let mut writer = RecordWriter::open(dir.path(), "sharded", options, clock())?;
    for trend in ["UP", "DOWN", "UP"] {
        let state = market(&[("trend_state", trend)]);
        let selection = select_strategy(&state, RiskState::GREEN, "1m", builtin_registry());
        writer.append("1m", RiskState::GREEN, Value::Object(state), selection)?;
    }
    writer.close()?;

    let summary = replay_verify(&dir.path().join("sharded"), builtin_registry())?;
    assert_eq!(summary.total, 3);
    assert_eq!(summary.matched, 3);
    Ok(())
}
