//! replay.rs: Replay verification.
//!
//! Two layers share the same re-execution path. `replay_verify` walks a
//! record stream, re-runs the selector from each record's own inputs and
//! buckets the result into matched / mismatched / hash_mismatch.
//! `ReplayRunner` replays a single record against a snapshot bundle,
//! optionally re-running the risk state machine, and reports field-level
//! diffs.

use std::path::Path;

use serde::Serialize;
use serde_json::{Map, Value};
use tracing::debug;

use crate::canonical;
use crate::loader::{load_records, LoadedRecord};
use crate::record::{
    canonicalize_core_payload, DecisionRecord, Outcome, RecordParts, RISK_MODE_COMPUTED,
};
use crate::risk::{evaluate_risk, validate_risk_inputs, RiskConfig, RiskState};
use crate::selector::{select_strategy, Selection};
use crate::snapshot::Snapshot;
use crate::strategy::StrategyRegistry;
use crate::{Error, Result};

/// Authoritative counters of a stream verification pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReplaySummary {
    pub total: usize,
    pub matched: usize,
    pub mismatched: usize,
    pub hash_mismatch: usize,
    pub errors: usize,
}

impl ReplaySummary {
    pub fn ok(&self) -> bool {
        self.mismatched == 0 && self.hash_mismatch == 0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReplayDiff {
    pub path: String,
    pub expected: Value,
    pub actual: Value,
}

#[derive(Debug, Clone)]
pub struct ReplayReport {
    pub matched: bool,
    pub diffs: Vec<ReplayDiff>,
    pub replay_record: DecisionRecord,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayMode {
    StrictCore,
    StrictFull,
}

#[derive(Debug, Clone, Default)]
pub struct ReplayConfig {
    /// Timestamp stamped on replay records. Ignored by strict-full
    /// comparison, which zeroes non-deterministic metadata on both sides.
    pub ts_utc_override: Option<String>,
}

fn market_state_object(value: &Value) -> Result<&Map<String, Value>> {
    value
        .as_object()
        .ok_or_else(|| Error::InvalidInputs("market_state must be a mapping".into()))
}

/// Re-execute the decision recorded in `record` and re-assemble a record
/// with the original's metadata substituted in.
fn reexecute(
    record: &DecisionRecord,
    market_features: &Value,
    risk_state: RiskState,
    registry: &StrategyRegistry,
    ts_utc: &str,
) -> Result<DecisionRecord> {
    let selection = select_strategy(
        market_state_object(market_features)?,
        risk_state,
        &record.timeframe,
        registry,
    );
    let outcome = Outcome::derive(risk_state, &selection);

    DecisionRecord::assemble(RecordParts {
        run_id: record.run_id.clone(),
        seq: record.seq,
        decision_id: record.decision_id.clone(),
        ts_utc: ts_utc.to_string(),
        symbol: record.symbol.clone(),
        timeframe: record.timeframe.clone(),
        code_version: record.code_version.clone(),
        run_context: record.run_context.clone(),
        artifacts: record.artifacts.clone(),
        risk_state,
        market_state: record.market_state.clone(),
        selector_inputs: record.inputs.selector_inputs.clone(),
        config: record.inputs.config.clone(),
        risk_mode: record.inputs.risk_mode.clone(),
        selection,
        outcome,
    })
}

fn selection_diffs(stored: &Selection, replayed: &Selection) -> Vec<ReplayDiff> {
    let mut diffs = Vec::new();
    let mut push = |path: &str, expected: Value, actual: Value| {
        if expected != actual {
            diffs.push(ReplayDiff {
                path: path.to_string(),
                expected,
                actual,
            });
        }
    };
    push(
        "selection.strategy_id",
        serde_json::json!(stored.strategy_id),
        serde_json::json!(replayed.strategy_id),
    );
    push(
        "selection.engine_id",
        serde_json::json!(stored.engine_id),
        serde_json::json!(replayed.engine_id),
    );
    push(
        "selection.status",
        serde_json::json!(stored.status),
        serde_json::json!(replayed.status),
    );
    push(
        "selection.reasons",
        serde_json::json!(stored.reasons),
        serde_json::json!(replayed.reasons),
    );
    push(
        "selection.rules_fired",
        serde_json::json!(stored.rules_fired),
        serde_json::json!(replayed.rules_fired),
    );
    diffs
}

/// Verify a record stream: for every loaded record, check the stored
/// stream hashes against recomputation, re-run the selection, and
/// compare against what was written.
pub fn replay_verify(records_path: &Path, registry: &StrategyRegistry) -> Result<ReplaySummary> {
    let (records, errors) = load_records(records_path)?;
    let mut summary = ReplaySummary {
        total: records.len(),
        errors,
        ..ReplaySummary::default()
    };

    for loaded in &records {
        match verify_one(loaded, registry) {
            Ok(Verdict::Matched) => summary.matched += 1,
            Ok(Verdict::Mismatched) => summary.mismatched += 1,
            Ok(Verdict::HashMismatch) => summary.hash_mismatch += 1,
            Err(err) => {
                debug!(error = %err, seq = loaded.record.seq, "replay errored on record");
                summary.errors += 1;
            }
        }
    }

    Ok(summary)
}

enum Verdict {
    Matched,
    Mismatched,
    HashMismatch,
}

fn verify_one(loaded: &LoadedRecord, registry: &StrategyRegistry) -> Result<Verdict> {
    let record = &loaded.record;

    // Stored stream hashes must match recomputation over the stored
    // payload; a difference means corruption or tampering, and the
    // record is not replayed further.
    let market_state_hash = canonical::digest_json(&record.market_state)?;
    if market_state_hash != record.market_state_hash {
        return Ok(Verdict::HashMismatch);
    }
    let risk_state = RiskState::parse(&record.risk_state)?;
    let inputs_digest =
        crate::record::event_identity_digest(&record.market_state, risk_state, &record.timeframe)?;
    if inputs_digest != record.inputs_digest {
        return Ok(Verdict::HashMismatch);
    }

    let replay_record = reexecute(
        record,
        &record.inputs.market_features,
        risk_state,
        registry,
        &record.ts_utc,
    )?;

    if !selection_diffs(&record.selection, &replay_record.selection).is_empty() {
        return Ok(Verdict::Mismatched);
    }
    if replay_record.hashes.core_hash != record.hashes.core_hash {
        return Ok(Verdict::HashMismatch);
    }
    // Same fields, same core hash; anything else differing would be a
    // hash-partitioning bug surfaced by the core canonicalization check.
    if canonicalize_core_payload(&loaded.raw)? != replay_record.canonicalize_core()? {
        return Ok(Verdict::Mismatched);
    }
    Ok(Verdict::Matched)
}

/// Replays one record against its snapshot bundle.
pub struct ReplayRunner<'a> {
    registry: &'a StrategyRegistry,
    config: ReplayConfig,
}

impl<'a> ReplayRunner<'a> {
    pub fn new(registry: &'a StrategyRegistry) -> ReplayRunner<'a> {
        ReplayRunner {
            registry,
            config: ReplayConfig::default(),
        }
    }

    pub fn with_config(registry: &'a StrategyRegistry, config: ReplayConfig) -> ReplayRunner<'a> {
        ReplayRunner { registry, config }
    }

    /// Re-run the decision from the snapshot's inputs. In `computed`
    /// risk mode the risk state machine runs again from the snapshot's
    /// risk inputs and the recorded config; in `fact` mode the recorded
    /// risk state is taken as ground truth.
    pub fn replay(
        &self,
        record: &DecisionRecord,
        snapshot: &Snapshot,
        mode: ReplayMode,
    ) -> Result<ReplayReport> {
        let risk_state = if record.inputs.risk_mode == RISK_MODE_COMPUTED {
            let risk_config = record
                .inputs
                .config
                .get("risk_config")
                .or_else(|| snapshot.config.as_ref().and_then(|c| c.get("risk_config")))
                .ok_or(Error::MissingConfig {
                    path: "inputs.config.risk_config".to_string(),
                })?;
            let cfg = RiskConfig::from_value(risk_config)?;
            let risk_inputs = snapshot.risk_inputs.as_ref().ok_or(Error::MissingConfig {
                path: "snapshot.risk_inputs".to_string(),
            })?;
            let validated = validate_risk_inputs(risk_inputs)?;
            evaluate_risk(&validated, &cfg)?.state
        } else {
            RiskState::parse(&record.inputs.risk_state)?
        };

        let ts_utc = self
            .config
            .ts_utc_override
            .clone()
            .unwrap_or_else(|| record.ts_utc.clone());
        let replay_record =
            reexecute(record, &snapshot.features, risk_state, self.registry, &ts_utc)?;

        let mut diffs = selection_diffs(&record.selection, &replay_record.selection);
        if record.inputs.risk_state != replay_record.inputs.risk_state {
            diffs.push(ReplayDiff {
                path: "inputs.risk_state".to_string(),
                expected: Value::String(record.inputs.risk_state.clone()),
                actual: Value::String(replay_record.inputs.risk_state.clone()),
            });
        }
        if record.hashes.core_hash != replay_record.hashes.core_hash {
            diffs.push(ReplayDiff {
                path: "hashes.core_hash".to_string(),
                expected: Value::String(record.hashes.core_hash.clone()),
                actual: Value::String(replay_record.hashes.core_hash.clone()),
            });
        }

        if mode == ReplayMode::StrictFull {
            let expected = neutral_content_hash(record)?;
            let actual = neutral_content_hash(&replay_record)?;
            if expected != actual {
                diffs.push(ReplayDiff {
                    path: "hashes.content_hash".to_string(),
                    expected: Value::String(expected),
                    actual: Value::String(actual),
                });
            }
        }

        Ok(ReplayReport {
            matched: diffs.is_empty(),
            diffs,
            replay_record,
        })
    }
}

/// Content hash with non-deterministic metadata zeroed: `ts_utc`,
/// `code_version` and `run_context` do not participate.
fn neutral_content_hash(record: &DecisionRecord) -> Result<String> {
    let mut view = record.to_value()?;
    if let Some(map) = view.as_object_mut() {
        map.remove("hashes");
        map.insert("ts_utc".to_string(), Value::Null);
        map.insert("code_version".to_string(), Value::Null);
        map.insert("run_context".to_string(), Value::Null);
    }
    canonical::digest_json(&view)
}
