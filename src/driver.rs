//! driver.rs: The closed decision loop.
//!
//! An event flows risk evaluation → strategy selection → record assembly
//! → durable append. When an idempotency store is attached, the append
//! is guarded by the event's identity digest: replaying an already-seen
//! event returns the stored record instead of producing a second effect.

use serde_json::Value;

use crate::clock::Clock;
use crate::gate::gate_execution;
use crate::record::{event_identity_digest, DecisionRecord};
use crate::risk::RiskConfig;
use crate::selector::select_strategy;
use crate::store::IdempotencyStore;
use crate::strategy::StrategyRegistry;
use crate::writer::RecordWriter;
use crate::{Error, Result};

#[derive(Debug, Clone)]
pub struct DecisionEvent {
    pub market_state: Value,
    pub risk_inputs: Value,
    pub timeframe: String,
    /// Overrides the driver's default risk config for this event.
    pub config: Option<RiskConfig>,
}

pub struct DecisionDriver<'a> {
    writer: RecordWriter,
    registry: &'a StrategyRegistry,
    risk_config: RiskConfig,
    store: Option<IdempotencyStore>,
    clock: Box<dyn Clock>,
}

impl<'a> DecisionDriver<'a> {
    pub fn new(
        writer: RecordWriter,
        registry: &'a StrategyRegistry,
        risk_config: RiskConfig,
        store: Option<IdempotencyStore>,
        clock: Box<dyn Clock>,
    ) -> DecisionDriver<'a> {
        DecisionDriver {
            writer,
            registry,
            risk_config,
            store,
            clock,
        }
    }

    /// Run one event through the loop. Fail-closed: invalid risk inputs
    /// produce a RED record, never an error.
    pub fn process(&mut self, event: &DecisionEvent) -> Result<DecisionRecord> {
        let cfg = event.config.as_ref().unwrap_or(&self.risk_config);
        let gate = gate_execution(&event.risk_inputs, cfg, self.clock.as_ref());
        let risk_state = gate.decision.state;

        let key = event_identity_digest(&event.market_state, risk_state, &event.timeframe)?;
        if let Some(store) = &self.store {
            if let Some(stored) = store.get(&key)? {
                return DecisionRecord::from_value(&stored);
            }
        }

        let market_state_map = event
            .market_state
            .as_object()
            .ok_or_else(|| Error::InvalidInputs("market_state must be a mapping".into()))?;
        let selection = select_strategy(market_state_map, risk_state, &event.timeframe, self.registry);

        let record = self.writer.append(
            &event.timeframe,
            risk_state,
            event.market_state.clone(),
            selection,
        )?;

        if let Some(store) = &self.store {
            store.put(&key, &record.to_value()?)?;
        }
        Ok(record)
    }

    pub fn writer_mut(&mut self) -> &mut RecordWriter {
        &mut self.writer
    }

    pub fn close(self) -> Result<()> {
        self.writer.close()
    }
}
