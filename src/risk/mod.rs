//! Risk permission layer: validated inputs, deterministic state machine,
//! fail-closed veto boundary, and named config packs.
//!
//! `contracts` holds the single authoritative definition of every Risk*
//! type; the other submodules re-export from it.

pub mod contracts;
pub mod packs;
pub mod state_machine;
pub mod veto;

pub use contracts::{
    permission_for_state, validate_risk_inputs, Permission, RiskConfig, RiskDecision, RiskInputs,
    RiskState,
};
pub use state_machine::evaluate_risk;
pub use veto::{risk_veto, AuditEvent};
