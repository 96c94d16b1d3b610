//! Strategy profile registry. The registry is an explicit dependency of
//! the selector; candidate ordering is declared at registration time
//! (priority, then strategy_id) and frozen on first enumeration, so
//! repeated enumeration is stable by construction.

use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use serde_json::{Map, Value};

use crate::strategy::engines::{BreakoutEngine, MeanRevertEngine, StrategyEngine, TrendEngine};

/// A named trading profile bound to an engine. Profiles carry the exact
/// market-state conditions under which the engine may run.
#[derive(Debug, Clone)]
pub struct StrategyProfile {
    pub strategy_id: String,
    pub engine_id: String,
    pub rule_id: String,
    pub description: String,
    pub conservative: bool,
    pub priority: u32,
    pub required_market_keys: Vec<String>,
    pub required_conditions: BTreeMap<String, Value>,
}

impl StrategyProfile {
    /// Key-presence and condition-equality checks, with reason tags.
    pub fn is_profile_applicable(&self, market_state: &Map<String, Value>) -> (bool, Vec<String>) {
        let mut missing: Vec<&str> = self
            .required_market_keys
            .iter()
            .map(String::as_str)
            .filter(|key| !market_state.contains_key(*key))
            .collect();
        missing.sort_unstable();
        if !missing.is_empty() {
            return (
                false,
                vec![format!("PROFILE_MISSING_KEYS:{}", missing.join(","))],
            );
        }

        for (key, expected) in &self.required_conditions {
            if market_state.get(key) != Some(expected) {
                return (false, vec![format!("PROFILE_CONDITION_MISMATCH:{key}")]);
            }
        }

        (true, vec!["PROFILE_OK".to_string()])
    }
}

pub struct StrategyRegistry {
    engines: BTreeMap<String, Box<dyn StrategyEngine>>,
    profiles: Vec<StrategyProfile>,
    frozen: bool,
}

impl Default for StrategyRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl StrategyRegistry {
    pub fn new() -> Self {
        StrategyRegistry {
            engines: BTreeMap::new(),
            profiles: Vec::new(),
            frozen: false,
        }
    }

    pub fn register_engine(&mut self, engine: Box<dyn StrategyEngine>) {
        debug_assert!(!self.frozen, "registry is frozen");
        self.engines.insert(engine.engine_id().to_string(), engine);
    }

    pub fn register_profile(&mut self, profile: StrategyProfile) {
        debug_assert!(!self.frozen, "registry is frozen");
        self.profiles.push(profile);
    }

    pub fn engine(&self, engine_id: &str) -> Option<&dyn StrategyEngine> {
        self.engines.get(engine_id).map(Box::as_ref)
    }

    /// Candidate profiles in declared priority order. Freezes the
    /// ordering on first call.
    pub fn profiles(&mut self) -> &[StrategyProfile] {
        if !self.frozen {
            self.profiles
                .sort_by(|a, b| (a.priority, &a.strategy_id).cmp(&(b.priority, &b.strategy_id)));
            self.frozen = true;
        }
        &self.profiles
    }

    /// Read-only view for an already-frozen registry.
    pub fn profiles_frozen(&self) -> &[StrategyProfile] {
        debug_assert!(self.frozen, "registry must be frozen before enumeration");
        &self.profiles
    }

    pub fn freeze(mut self) -> Self {
        self.profiles();
        self
    }
}

fn condition(key: &str, value: &str) -> BTreeMap<String, Value> {
    let mut map = BTreeMap::new();
    map.insert(key.to_string(), Value::String(value.to_string()));
    map
}

/// The built-in registry: three engines, four profiles. Rule ids follow
/// the selector's historical numbering (R0/R1 are reserved for the risk
/// veto and the YELLOW restriction).
pub fn build_builtin_registry() -> StrategyRegistry {
    let mut registry = StrategyRegistry::new();
    registry.register_engine(Box::new(TrendEngine));
    registry.register_engine(Box::new(MeanRevertEngine));
    registry.register_engine(Box::new(BreakoutEngine));

    registry.register_profile(StrategyProfile {
        strategy_id: "trend_follow_v1_conservative".to_string(),
        engine_id: "trend".to_string(),
        rule_id: "R2".to_string(),
        description: "Long trend-following in confirmed uptrends".to_string(),
        conservative: true,
        priority: 10,
        required_market_keys: vec!["trend_state".to_string()],
        required_conditions: condition("trend_state", "UP"),
    });
    registry.register_profile(StrategyProfile {
        strategy_id: "trend_follow_v1_short".to_string(),
        engine_id: "trend".to_string(),
        rule_id: "R3".to_string(),
        description: "Short trend-following in confirmed downtrends".to_string(),
        conservative: false,
        priority: 20,
        required_market_keys: vec!["trend_state".to_string()],
        required_conditions: condition("trend_state", "DOWN"),
    });
    registry.register_profile(StrategyProfile {
        strategy_id: "mean_revert_v1_range".to_string(),
        engine_id: "mean_revert".to_string(),
        rule_id: "R4".to_string(),
        description: "Range-bound mean reversion".to_string(),
        conservative: true,
        priority: 30,
        required_market_keys: vec!["trend_state".to_string()],
        required_conditions: condition("trend_state", "RANGE"),
    });
    registry.register_profile(StrategyProfile {
        strategy_id: "breakout_v1_expansion".to_string(),
        engine_id: "breakout".to_string(),
        rule_id: "R5".to_string(),
        description: "Volatility-expansion breakout".to_string(),
        conservative: false,
        priority: 40,
        required_market_keys: vec!["volatility_regime".to_string()],
        required_conditions: BTreeMap::new(),
    });

    registry.freeze()
}

static BUILTIN: Lazy<StrategyRegistry> = Lazy::new(build_builtin_registry);

/// Shared frozen built-in registry.
pub fn builtin_registry() -> &'static StrategyRegistry {
    &BUILTIN
}
