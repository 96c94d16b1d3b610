//! Strategy selector: pure function from (market state, risk state,
//! timeframe) to a selection. Reproducible from recorded inputs alone —
//! no clocks, no randomness, registry order frozen.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::risk::RiskState;
use crate::strategy::StrategyRegistry;

pub const STATUS_SELECTED: &str = "selected";
pub const STATUS_RISK_VETO: &str = "risk_veto";
pub const STATUS_NO_APPLICABLE: &str = "no_applicable_strategy";

/// Selector output. `reasons` and `rules_fired` keep the order in which
/// they were produced; hashing normalizes them separately (record.rs).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Selection {
    pub selected: bool,
    pub strategy_id: Option<String>,
    pub engine_id: Option<String>,
    pub status: String,
    #[serde(default)]
    pub score: Option<f64>,
    pub reasons: Vec<String>,
    pub rules_fired: Vec<String>,
}

impl Selection {
    fn vetoed() -> Selection {
        Selection {
            selected: false,
            strategy_id: None,
            engine_id: None,
            status: STATUS_RISK_VETO.to_string(),
            score: None,
            reasons: vec!["RISK_VETO:RED".to_string()],
            rules_fired: vec!["R0".to_string()],
        }
    }

    fn none(reasons: Vec<String>, rules_fired: Vec<String>) -> Selection {
        Selection {
            selected: false,
            strategy_id: None,
            engine_id: None,
            status: STATUS_NO_APPLICABLE.to_string(),
            score: None,
            reasons,
            rules_fired,
        }
    }
}

/// Select a strategy for the given market state under the given risk
/// state. First candidate (in registry priority order) passing the
/// profile-key, profile-condition and engine-applicability checks wins.
pub fn select_strategy(
    market_state: &Map<String, Value>,
    risk_state: RiskState,
    timeframe: &str,
    registry: &StrategyRegistry,
) -> Selection {
    if risk_state == RiskState::RED {
        return Selection::vetoed();
    }

    let mut reasons: Vec<String> = Vec::new();
    let mut rules_fired: Vec<String> = Vec::new();
    let conservative_only = risk_state == RiskState::YELLOW;
    if conservative_only {
        reasons.push("RISK_LIMIT:YELLOW".to_string());
        rules_fired.push("R1".to_string());
    }

    for profile in registry.profiles_frozen() {
        if conservative_only && !profile.conservative {
            continue;
        }

        let (profile_ok, profile_reasons) = profile.is_profile_applicable(market_state);
        if !profile_ok {
            continue;
        }

        let Some(engine) = registry.engine(&profile.engine_id) else {
            continue;
        };
        let (engine_ok, engine_reasons) = engine.is_applicable(market_state, timeframe);
        if !engine_ok {
            continue;
        }

        let mut selected_reasons = reasons.clone();
        selected_reasons.extend(profile_reasons);
        selected_reasons.extend(engine_reasons);
        selected_reasons.push(format!("SELECTED:{}", profile.strategy_id));
        let mut selected_rules = rules_fired.clone();
        selected_rules.push(profile.rule_id.clone());

        return Selection {
            selected: true,
            strategy_id: Some(profile.strategy_id.clone()),
            engine_id: Some(profile.engine_id.clone()),
            status: STATUS_SELECTED.to_string(),
            score: None,
            reasons: selected_reasons,
            rules_fired: selected_rules,
        };
    }

    reasons.push("NO_APPLICABLE_STRATEGY".to_string());
    rules_fired.push("R9".to_string());
    Selection::none(reasons, rules_fired)
}
