//! Centralized execution gate. Single integration point for the risk
//! veto before any externally-visible effect.

use serde_json::Value;

use crate::clock::Clock;
use crate::risk::{risk_veto, AuditEvent, RiskConfig, RiskDecision, RiskState};

#[derive(Debug, Clone)]
pub struct GateResult {
    pub allowed: bool,
    pub decision: RiskDecision,
    pub audit_event: AuditEvent,
    pub reason: Option<String>,
}

pub fn gate_execution(payload: &Value, cfg: &RiskConfig, clock: &dyn Clock) -> GateResult {
    let (decision, audit_event) = risk_veto(payload, cfg, clock);
    if decision.state == RiskState::RED {
        return GateResult {
            allowed: false,
            decision,
            audit_event,
            reason: Some("risk_veto".to_string()),
        };
    }
    GateResult {
        allowed: true,
        decision,
        audit_event,
        reason: None,
    }
}
