//! Deterministic risk state machine (GREEN/YELLOW/RED).

use serde_json::json;

use crate::Result;

// Canonical type definitions live in contracts; this module evaluates.
pub use crate::risk::contracts::{RiskConfig, RiskDecision, RiskInputs, RiskState};

fn push_reason(reasons: &mut Vec<String>, reason: &str) {
    if !reasons.iter().any(|r| r == reason) {
        reasons.push(reason.to_string());
    }
}

fn snapshot(inputs: &RiskInputs) -> serde_json::Value {
    json!({
        "symbol": inputs.symbol,
        "timeframe": inputs.timeframe,
        "as_of": inputs.as_of,
        "atr_pct": inputs.atr_pct,
        "realized_vol": inputs.realized_vol,
        "missing_fraction": inputs.missing_fraction,
        "timestamps_valid": inputs.timestamps_valid,
        "latest_metrics_valid": inputs.latest_metrics_valid,
        "invalid_index": inputs.invalid_index,
        "invalid_close": inputs.invalid_close,
    })
}

/// Evaluate risk state using deterministic rules; first matching rule
/// wins. Pure: no I/O, no clocks.
pub fn evaluate_risk(inputs: &RiskInputs, cfg: &RiskConfig) -> Result<RiskDecision> {
    let inputs_digest = inputs.digest()?;
    let decision = |state: RiskState, reasons: Vec<String>| RiskDecision {
        state,
        reasons,
        snapshot: snapshot(inputs),
        config_version: cfg.config_version.clone(),
        inputs_digest: inputs_digest.clone(),
    };

    // Structural integrity failures outrank everything else.
    let mut reasons: Vec<String> = Vec::new();
    if inputs.invalid_index {
        push_reason(&mut reasons, "invalid_index");
    }
    if !inputs.timestamps_valid {
        push_reason(&mut reasons, "invalid_timestamps");
    }
    if inputs.invalid_close {
        push_reason(&mut reasons, "invalid_close");
    }
    if !reasons.is_empty() {
        return Ok(decision(RiskState::RED, reasons));
    }

    if inputs.missing_fraction > cfg.missing_red {
        return Ok(decision(
            RiskState::RED,
            vec!["missing_fraction_exceeded".to_string()],
        ));
    }

    if !inputs.latest_metrics_valid {
        return Ok(decision(RiskState::RED, vec!["missing_metrics".to_string()]));
    }

    if inputs.atr_pct.is_none() && inputs.realized_vol.is_none() {
        return Ok(decision(cfg.no_metrics_state, vec!["no_metrics".to_string()]));
    }

    let mut red_reasons: Vec<String> = Vec::new();
    let mut yellow_reasons: Vec<String> = Vec::new();

    if let Some(atr_pct) = inputs.atr_pct {
        if atr_pct >= cfg.atr_red {
            push_reason(&mut red_reasons, "atr_pct_above_red");
        } else if atr_pct >= cfg.atr_yellow {
            push_reason(&mut yellow_reasons, "atr_pct_above_yellow");
        }
    }

    if let Some(realized_vol) = inputs.realized_vol {
        if realized_vol >= cfg.rvol_red {
            push_reason(&mut red_reasons, "realized_vol_above_red");
        } else if realized_vol >= cfg.rvol_yellow {
            push_reason(&mut yellow_reasons, "realized_vol_above_yellow");
        }
    }

    if !red_reasons.is_empty() {
        return Ok(decision(RiskState::RED, red_reasons));
    }
    if !yellow_reasons.is_empty() {
        return Ok(decision(RiskState::YELLOW, yellow_reasons));
    }
    Ok(decision(RiskState::GREEN, Vec::new()))
}
