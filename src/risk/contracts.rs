//! Authoritative risk types and input validation.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::canonical;
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RiskState {
    GREEN,
    YELLOW,
    RED,
}

impl RiskState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskState::GREEN => "GREEN",
            RiskState::YELLOW => "YELLOW",
            RiskState::RED => "RED",
        }
    }

    pub fn parse(text: &str) -> Result<RiskState> {
        match text {
            "GREEN" => Ok(RiskState::GREEN),
            "YELLOW" => Ok(RiskState::YELLOW),
            "RED" => Ok(RiskState::RED),
            other => Err(Error::InvalidInputs(format!("unknown risk state: {other}"))),
        }
    }
}

impl std::fmt::Display for RiskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Permission {
    ALLOW,
    RESTRICT,
    BLOCK,
}

pub fn permission_for_state(state: RiskState) -> Permission {
    match state {
        RiskState::GREEN => Permission::ALLOW,
        RiskState::YELLOW => Permission::RESTRICT,
        RiskState::RED => Permission::BLOCK,
    }
}

/// Typed, validated risk inputs for the permission layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskInputs {
    pub symbol: String,
    pub timeframe: String,
    pub as_of: String,
    pub atr_pct: Option<f64>,
    pub realized_vol: Option<f64>,
    pub missing_fraction: f64,
    pub timestamps_valid: bool,
    pub latest_metrics_valid: bool,
    pub invalid_index: bool,
    pub invalid_close: bool,
}

impl RiskInputs {
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).expect("risk inputs serialize")
    }

    /// Digest of the canonical encoding of the validated inputs.
    pub fn digest(&self) -> Result<String> {
        canonical::digest_serialize(self)
    }
}

fn require_str(payload: &Map<String, Value>, field: &str) -> Result<String> {
    match payload.get(field) {
        Some(Value::String(s)) if !s.trim().is_empty() => Ok(s.trim().to_string()),
        _ => Err(Error::InvalidInputs(format!(
            "{field} must be a non-empty string"
        ))),
    }
}

fn require_bool(payload: &Map<String, Value>, field: &str) -> Result<bool> {
    match payload.get(field) {
        Some(Value::Bool(b)) => Ok(*b),
        _ => Err(Error::InvalidInputs(format!("{field} must be a boolean"))),
    }
}

fn require_float(payload: &Map<String, Value>, field: &str) -> Result<f64> {
    let value = payload
        .get(field)
        .and_then(Value::as_f64)
        .ok_or_else(|| Error::InvalidInputs(format!("{field} must be a number")))?;
    if !value.is_finite() {
        return Err(Error::InvalidInputs(format!(
            "{field} must be a finite number"
        )));
    }
    Ok(value)
}

fn optional_float(payload: &Map<String, Value>, field: &str) -> Result<Option<f64>> {
    match payload.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(_) => require_float(payload, field).map(Some),
    }
}

/// Parse an ISO-8601 UTC timestamp, accepting a trailing `Z` or a
/// numeric offset, and normalize it to the `Z` form used in hashes.
fn require_utc_timestamp(payload: &Map<String, Value>, field: &str) -> Result<String> {
    let text = require_str(payload, field)
        .map_err(|_| Error::InvalidInputs(format!("{field} must be a non-empty ISO timestamp")))?;
    let parsed: DateTime<Utc> = DateTime::parse_from_rfc3339(&text)
        .map_err(|_| Error::InvalidInputs(format!("{field} must be a valid ISO timestamp")))?
        .with_timezone(&Utc);
    Ok(parsed.to_rfc3339_opts(SecondsFormat::Secs, true))
}

/// Validate and normalize a risk inputs payload. Any violation is a
/// validation failure; callers above the veto boundary fail closed.
pub fn validate_risk_inputs(payload: &Value) -> Result<RiskInputs> {
    let map = payload
        .as_object()
        .ok_or_else(|| Error::InvalidInputs("risk inputs payload must be a mapping".into()))?;

    let symbol = require_str(map, "symbol")?;
    let timeframe = require_str(map, "timeframe")?;
    let as_of = require_utc_timestamp(map, "as_of")?;

    let atr_pct = optional_float(map, "atr_pct")?;
    if atr_pct.is_some_and(|v| v < 0.0) {
        return Err(Error::InvalidInputs("atr_pct must be >= 0".into()));
    }

    let realized_vol = optional_float(map, "realized_vol")?;
    if realized_vol.is_some_and(|v| v < 0.0) {
        return Err(Error::InvalidInputs("realized_vol must be >= 0".into()));
    }

    let missing_fraction = require_float(map, "missing_fraction")?;
    if !(0.0..=1.0).contains(&missing_fraction) {
        return Err(Error::InvalidInputs(
            "missing_fraction must be in [0, 1]".into(),
        ));
    }

    Ok(RiskInputs {
        symbol,
        timeframe,
        as_of,
        atr_pct,
        realized_vol,
        missing_fraction,
        timestamps_valid: require_bool(map, "timestamps_valid")?,
        latest_metrics_valid: require_bool(map, "latest_metrics_valid")?,
        invalid_index: require_bool(map, "invalid_index")?,
        invalid_close: require_bool(map, "invalid_close")?,
    })
}

/// Risk policy thresholds. Packs are named presets of this config; the
/// pack identity travels in every decision record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskConfig {
    pub pack_id: String,
    pub pack_version: String,
    pub config_version: String,
    pub missing_red: f64,
    pub atr_yellow: f64,
    pub atr_red: f64,
    pub rvol_yellow: f64,
    pub rvol_red: f64,
    pub no_metrics_state: RiskState,
}

impl RiskConfig {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        pack_id: &str,
        pack_version: &str,
        config_version: &str,
        missing_red: f64,
        atr_yellow: f64,
        atr_red: f64,
        rvol_yellow: f64,
        rvol_red: f64,
        no_metrics_state: RiskState,
    ) -> Result<RiskConfig> {
        if !(0.0..=1.0).contains(&missing_red) {
            return Err(Error::InvalidInputs("missing_red must be in [0, 1]".into()));
        }
        if !(0.0 < atr_yellow && atr_yellow < atr_red) {
            return Err(Error::InvalidInputs(
                "atr thresholds must satisfy 0 < yellow < red".into(),
            ));
        }
        if !(0.0 < rvol_yellow && rvol_yellow < rvol_red) {
            return Err(Error::InvalidInputs(
                "rvol thresholds must satisfy 0 < yellow < red".into(),
            ));
        }
        if no_metrics_state == RiskState::GREEN {
            return Err(Error::InvalidInputs(
                "no_metrics_state must be YELLOW or RED".into(),
            ));
        }
        Ok(RiskConfig {
            pack_id: pack_id.to_string(),
            pack_version: pack_version.to_string(),
            config_version: config_version.to_string(),
            missing_red,
            atr_yellow,
            atr_red,
            rvol_yellow,
            rvol_red,
            no_metrics_state,
        })
    }

    /// Parse a `risk_config` subtree as recorded in `inputs.config`.
    /// Identity fields default for ad-hoc configs that predate packs.
    pub fn from_value(value: &Value) -> Result<RiskConfig> {
        let map = value
            .as_object()
            .ok_or_else(|| Error::InvalidInputs("risk_config must be a mapping".into()))?;
        let get = |field: &str| -> Result<f64> { require_float(map, field) };
        let text = |field: &str, default: &str| -> String {
            map.get(field)
                .and_then(Value::as_str)
                .unwrap_or(default)
                .to_string()
        };
        let no_metrics_state = match map.get("no_metrics_state").and_then(Value::as_str) {
            Some(s) => RiskState::parse(s)?,
            None => RiskState::YELLOW,
        };
        RiskConfig::new(
            &text("pack_id", "adhoc"),
            &text("pack_version", "v0"),
            &text("config_version", "v1"),
            get("missing_red")?,
            get("atr_yellow")?,
            get("atr_red")?,
            get("rvol_yellow")?,
            get("rvol_red")?,
            no_metrics_state,
        )
    }

    /// The subtree recorded under `inputs.config.risk_config`.
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).expect("risk config serialize")
    }
}

/// Output of the risk state machine. The snapshot copies every input
/// field so replay can detect input drift.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskDecision {
    pub state: RiskState,
    pub reasons: Vec<String>,
    pub snapshot: Value,
    pub config_version: String,
    pub inputs_digest: String,
}

impl RiskDecision {
    pub fn permission(&self) -> Permission {
        permission_for_state(self.state)
    }
}
