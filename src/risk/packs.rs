//! Deterministic core risk policy packs (v1). Pack identity is part of
//! every decision record; changing a threshold means a new pack version.

use once_cell::sync::Lazy;

use crate::risk::contracts::{RiskConfig, RiskState};

pub static L1_CONSERVATIVE: Lazy<RiskConfig> = Lazy::new(|| {
    RiskConfig::new(
        "L1_CONSERVATIVE",
        "v1",
        "risk-pack:L1_CONSERVATIVE@v1",
        0.08,
        0.012,
        0.02,
        0.012,
        0.02,
        RiskState::RED,
    )
    .expect("builtin pack is valid")
});

pub static L3_BALANCED: Lazy<RiskConfig> = Lazy::new(|| {
    RiskConfig::new(
        "L3_BALANCED",
        "v1",
        "risk-pack:L3_BALANCED@v1",
        0.2,
        0.02,
        0.05,
        0.02,
        0.05,
        RiskState::YELLOW,
    )
    .expect("builtin pack is valid")
});

pub static L5_AGGRESSIVE: Lazy<RiskConfig> = Lazy::new(|| {
    RiskConfig::new(
        "L5_AGGRESSIVE",
        "v1",
        "risk-pack:L5_AGGRESSIVE@v1",
        0.35,
        0.04,
        0.08,
        0.04,
        0.08,
        RiskState::YELLOW,
    )
    .expect("builtin pack is valid")
});

pub fn pack_by_id(pack_id: &str) -> Option<&'static RiskConfig> {
    match pack_id {
        "L1_CONSERVATIVE" => Some(&L1_CONSERVATIVE),
        "L3_BALANCED" => Some(&L3_BALANCED),
        "L5_AGGRESSIVE" => Some(&L5_AGGRESSIVE),
        _ => None,
    }
}
