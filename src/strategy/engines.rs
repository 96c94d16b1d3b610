//! Strategy engines for applicability checks. Engines look at the shape
//! of the market, profiles (registry.rs) decide which engine runs and
//! under which exact conditions.

use serde_json::{Map, Value};

fn missing_keys(required: &[&str], market_state: &Map<String, Value>) -> Vec<String> {
    let mut missing: Vec<String> = required
        .iter()
        .filter(|key| !market_state.contains_key(**key))
        .map(|key| key.to_string())
        .collect();
    missing.sort();
    missing
}

fn state_str<'a>(market_state: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    market_state.get(key).and_then(Value::as_str)
}

pub trait StrategyEngine: Send + Sync {
    fn engine_id(&self) -> &'static str;
    fn description(&self) -> &'static str;
    fn required_market_keys(&self) -> &'static [&'static str];

    /// Applicability check against the market state and timeframe.
    /// Returns the verdict and the reason tags explaining it.
    fn is_applicable(
        &self,
        market_state: &Map<String, Value>,
        timeframe: &str,
    ) -> (bool, Vec<String>);

    /// Shared missing-key guard; engines call this first.
    fn check_keys(&self, market_state: &Map<String, Value>) -> Option<Vec<String>> {
        let missing = missing_keys(self.required_market_keys(), market_state);
        if missing.is_empty() {
            None
        } else {
            Some(vec![format!("ENGINE_MISSING_KEYS:{}", missing.join(","))])
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TrendEngine;

impl StrategyEngine for TrendEngine {
    fn engine_id(&self) -> &'static str {
        "trend"
    }

    fn description(&self) -> &'static str {
        "Trend applicability checks"
    }

    fn required_market_keys(&self) -> &'static [&'static str] {
        &["trend_state"]
    }

    fn is_applicable(
        &self,
        market_state: &Map<String, Value>,
        _timeframe: &str,
    ) -> (bool, Vec<String>) {
        if let Some(reasons) = self.check_keys(market_state) {
            return (false, reasons);
        }
        match state_str(market_state, "trend_state") {
            Some("UP") | Some("DOWN") => (true, vec!["ENGINE_TREND_OK".to_string()]),
            _ => (false, vec!["ENGINE_TREND_NOT_APPLICABLE".to_string()]),
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct MeanRevertEngine;

impl StrategyEngine for MeanRevertEngine {
    fn engine_id(&self) -> &'static str {
        "mean_revert"
    }

    fn description(&self) -> &'static str {
        "Mean reversion applicability checks"
    }

    fn required_market_keys(&self) -> &'static [&'static str] {
        &["trend_state"]
    }

    fn is_applicable(
        &self,
        market_state: &Map<String, Value>,
        _timeframe: &str,
    ) -> (bool, Vec<String>) {
        if let Some(reasons) = self.check_keys(market_state) {
            return (false, reasons);
        }
        match state_str(market_state, "trend_state") {
            Some("RANGE") => (true, vec!["ENGINE_MEAN_REVERT_OK".to_string()]),
            _ => (false, vec!["ENGINE_MEAN_REVERT_NOT_APPLICABLE".to_string()]),
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct BreakoutEngine;

impl StrategyEngine for BreakoutEngine {
    fn engine_id(&self) -> &'static str {
        "breakout"
    }

    fn description(&self) -> &'static str {
        "Breakout applicability checks"
    }

    fn required_market_keys(&self) -> &'static [&'static str] {
        &["volatility_regime"]
    }

    fn is_applicable(
        &self,
        market_state: &Map<String, Value>,
        _timeframe: &str,
    ) -> (bool, Vec<String>) {
        if let Some(reasons) = self.check_keys(market_state) {
            return (false, reasons);
        }
        let volatility = state_str(market_state, "volatility_regime");
        let momentum = state_str(market_state, "momentum_state");
        if matches!(volatility, Some("HIGH") | Some("EXPANDING")) || momentum == Some("SPIKE") {
            (true, vec!["ENGINE_BREAKOUT_OK".to_string()])
        } else {
            (false, vec!["ENGINE_BREAKOUT_NOT_APPLICABLE".to_string()])
        }
    }
}
