//! Fail-closed veto boundary. Validation happens here, not inside the
//! state machine: an unparseable payload becomes a synthetic RED
//! decision with reason `invalid_inputs` plus a best-effort audit event,
//! and the caller proceeds with the most restrictive outcome.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::warn;
use uuid::Uuid;

use crate::canonical;
use crate::clock::Clock;
use crate::risk::contracts::{validate_risk_inputs, RiskConfig, RiskDecision, RiskState};
use crate::risk::state_machine::evaluate_risk;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub event_id: String,
    pub ts_utc: String,
    pub component: String,
    pub action: String,
    pub inputs_hash: String,
    pub decision: String,
    pub reasons: Vec<String>,
    pub snapshot: Value,
    pub config_version: String,
    pub inputs_digest: String,
}

pub fn make_audit_event(
    component: &str,
    action: &str,
    decision: &RiskDecision,
    clock: &dyn Clock,
) -> AuditEvent {
    let inputs_hash = canonical::digest_json(&decision.snapshot)
        .unwrap_or_else(|_| String::new());
    AuditEvent {
        event_id: Uuid::new_v4().to_string(),
        ts_utc: clock.ts_utc(),
        component: component.to_string(),
        action: action.to_string(),
        inputs_hash,
        decision: decision.state.to_string(),
        reasons: decision.reasons.clone(),
        snapshot: decision.snapshot.clone(),
        config_version: decision.config_version.clone(),
        inputs_digest: decision.inputs_digest.clone(),
    }
}

fn invalid_decision(cfg: &RiskConfig) -> RiskDecision {
    RiskDecision {
        state: RiskState::RED,
        reasons: vec!["invalid_inputs".to_string()],
        snapshot: json!({ "invalid": true }),
        config_version: cfg.config_version.clone(),
        inputs_digest: String::new(),
    }
}

/// Evaluate a raw risk-inputs payload. Returns the decision and the
/// audit event recording it. Never fails: anything invalid is RED.
pub fn risk_veto(payload: &Value, cfg: &RiskConfig, clock: &dyn Clock) -> (RiskDecision, AuditEvent) {
    let decision = validate_risk_inputs(payload)
        .and_then(|validated| evaluate_risk(&validated, cfg))
        .unwrap_or_else(|err| {
            warn!(error = %err, "risk inputs rejected, failing closed to RED");
            invalid_decision(cfg)
        });
    let audit_event = make_audit_event("risk_veto", "evaluate", &decision, clock);
    (decision, audit_event)
}
