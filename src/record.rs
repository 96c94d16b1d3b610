//! record.rs: Decision record assembly and hash partitioning.
//!
//! A record carries three digests with distinct scopes:
//!   - `inputs_hash`   — the `inputs` section alone;
//!   - `core_hash`     — the replay-comparable subset: inputs, the
//!     order-normalized selection, and the outcome;
//!   - `content_hash`  — the whole record minus the `hashes` section.
//!
//! Replay equivalence lives at `core_hash`: metadata (timestamps, code
//! version, platform) may differ between the original run and a replay
//! without breaking the match.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::canonical::{self, NUMERIC_POLICY_ID};
use crate::risk::RiskState;
use crate::selector::Selection;
use crate::{Error, Result, RECORD_SCHEMA_VERSION};

pub const RISK_MODE_FACT: &str = "fact";
pub const RISK_MODE_COMPUTED: &str = "computed";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeVersion {
    pub git_commit: String,
    pub dirty: bool,
}

impl Default for CodeVersion {
    fn default() -> Self {
        CodeVersion {
            git_commit: "unknown".to_string(),
            dirty: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunContext {
    pub seed: i64,
    pub language_runtime_tag: String,
    pub platform: String,
    pub numeric_policy_id: String,
}

impl Default for RunContext {
    fn default() -> Self {
        RunContext {
            seed: 0,
            language_runtime_tag: "rust".to_string(),
            platform: std::env::consts::OS.to_string(),
            numeric_policy_id: NUMERIC_POLICY_ID.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Artifacts {
    #[serde(default)]
    pub snapshot_ref: Option<String>,
    #[serde(default)]
    pub features_ref: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Inputs {
    pub market_features: Value,
    pub risk_state: String,
    pub selector_inputs: Value,
    pub config: Value,
    pub risk_mode: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outcome {
    pub decision: String,
    pub allowed: bool,
    #[serde(default)]
    pub notes: Option<String>,
}

impl Outcome {
    /// Standard outcome for a freshly made decision: RED blocks, a
    /// selection executes, anything else is a pass.
    pub fn derive(risk_state: RiskState, selection: &Selection) -> Outcome {
        if risk_state == RiskState::RED {
            Outcome {
                decision: "BLOCK".to_string(),
                allowed: false,
                notes: None,
            }
        } else if selection.selected {
            Outcome {
                decision: "SELECT".to_string(),
                allowed: true,
                notes: None,
            }
        } else {
            Outcome {
                decision: "SKIP".to_string(),
                allowed: true,
                notes: None,
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hashes {
    pub inputs_hash: String,
    pub core_hash: String,
    pub content_hash: String,
}

/// One immutable decision entry. Construct via [`DecisionRecord::assemble`];
/// the hashes are computed exactly once and never recomputed in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub schema_version: String,
    pub run_id: String,
    pub seq: u64,
    pub decision_id: String,
    pub ts_utc: String,
    #[serde(default)]
    pub symbol: Option<String>,
    pub timeframe: String,
    pub code_version: CodeVersion,
    pub run_context: RunContext,
    pub artifacts: Artifacts,
    pub risk_state: String,
    pub market_state: Value,
    pub market_state_hash: String,
    pub inputs_digest: String,
    pub inputs: Inputs,
    pub selection: Selection,
    pub outcome: Outcome,
    pub hashes: Hashes,
}

/// Everything the assembler needs. Metadata substitution during replay
/// works by copying these fields from the original record.
#[derive(Debug, Clone)]
pub struct RecordParts {
    pub run_id: String,
    pub seq: u64,
    pub decision_id: String,
    pub ts_utc: String,
    pub symbol: Option<String>,
    pub timeframe: String,
    pub code_version: CodeVersion,
    pub run_context: RunContext,
    pub artifacts: Artifacts,
    pub risk_state: RiskState,
    pub market_state: Value,
    pub selector_inputs: Value,
    pub config: Value,
    pub risk_mode: String,
    pub selection: Selection,
    pub outcome: Outcome,
}

/// Digest of the event identity. Also the idempotency key for any
/// externally-visible effect derived from the event.
pub fn event_identity_digest(
    market_state: &Value,
    risk_state: RiskState,
    timeframe: &str,
) -> Result<String> {
    canonical::digest_json(&json!({
        "market_state": market_state,
        "risk_state": risk_state.as_str(),
        "timeframe": timeframe,
    }))
}

/// Selection view with `reasons` and `rules_fired` sorted lexically.
/// Hashing goes through this view; the record keeps the original order.
fn normalize_selection(selection: &Value) -> Value {
    let mut normalized = selection.clone();
    if let Some(map) = normalized.as_object_mut() {
        for field in ["reasons", "rules_fired"] {
            if let Some(Value::Array(items)) = map.get_mut(field) {
                items.sort_by(|a, b| {
                    a.as_str()
                        .unwrap_or_default()
                        .cmp(b.as_str().unwrap_or_default())
                });
            }
        }
    }
    normalized
}

/// Canonical text of the replay-comparable subset of a serialized
/// record. The `hashes` subtree is not part of the view, so mutating it
/// leaves this function's output unchanged.
pub fn canonicalize_core_payload(payload: &Value) -> Result<String> {
    let map = payload
        .as_object()
        .ok_or_else(|| Error::InvalidInputs("record payload must be a mapping".into()))?;
    let inputs = map
        .get("inputs")
        .ok_or_else(|| Error::InvalidInputs("record payload missing inputs".into()))?;
    let selection = map
        .get("selection")
        .ok_or_else(|| Error::InvalidInputs("record payload missing selection".into()))?;
    let outcome = map
        .get("outcome")
        .ok_or_else(|| Error::InvalidInputs("record payload missing outcome".into()))?;
    canonical::canonical_json(&json!({
        "inputs": inputs,
        "selection": normalize_selection(selection),
        "outcome": outcome,
    }))
}

impl DecisionRecord {
    /// Assemble a record and compute its hash partition.
    pub fn assemble(parts: RecordParts) -> Result<DecisionRecord> {
        let market_state_hash = canonical::digest_json(&parts.market_state)?;
        let inputs_digest =
            event_identity_digest(&parts.market_state, parts.risk_state, &parts.timeframe)?;

        let inputs = Inputs {
            market_features: parts.market_state.clone(),
            risk_state: parts.risk_state.as_str().to_string(),
            selector_inputs: parts.selector_inputs,
            config: parts.config,
            risk_mode: parts.risk_mode,
        };

        let mut record = DecisionRecord {
            schema_version: RECORD_SCHEMA_VERSION.to_string(),
            run_id: parts.run_id,
            seq: parts.seq,
            decision_id: parts.decision_id,
            ts_utc: parts.ts_utc,
            symbol: parts.symbol,
            timeframe: parts.timeframe,
            code_version: parts.code_version,
            run_context: parts.run_context,
            artifacts: parts.artifacts,
            risk_state: parts.risk_state.as_str().to_string(),
            market_state: parts.market_state,
            market_state_hash,
            inputs_digest,
            inputs,
            selection: parts.selection,
            outcome: parts.outcome,
            hashes: Hashes {
                inputs_hash: String::new(),
                core_hash: String::new(),
                content_hash: String::new(),
            },
        };

        let inputs_hash = canonical::digest_json(&serde_json::to_value(&record.inputs)?)?;
        let core_text = record.canonicalize_core()?;
        let core_hash = canonical::digest_bytes(core_text.as_bytes());

        let mut content_view = serde_json::to_value(&record)?;
        if let Some(map) = content_view.as_object_mut() {
            map.remove("hashes");
        }
        let content_hash = canonical::digest_json(&content_view)?;

        record.hashes = Hashes {
            inputs_hash,
            core_hash,
            content_hash,
        };
        Ok(record)
    }

    pub fn to_value(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }

    /// Canonical line form (no trailing newline; the writer adds it).
    pub fn to_canonical_json(&self) -> Result<String> {
        canonical::canonical_json(&self.to_value()?)
    }

    pub fn canonicalize_core(&self) -> Result<String> {
        canonicalize_core_payload(&self.to_value()?)
    }

    /// Parse a serialized record, rejecting foreign schema versions.
    pub fn from_value(payload: &Value) -> Result<DecisionRecord> {
        let found = payload
            .get("schema_version")
            .and_then(Value::as_str)
            .unwrap_or_default();
        if found != RECORD_SCHEMA_VERSION {
            return Err(Error::SchemaMismatch {
                found: found.to_string(),
                expected: RECORD_SCHEMA_VERSION.to_string(),
            });
        }
        Ok(serde_json::from_value(payload.clone())?)
    }
}
