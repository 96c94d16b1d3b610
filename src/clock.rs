//! Timestamp providers. Record contents must never depend on ambient
//! wall-clock reads, so every component that stamps a time takes a
//! `Clock` explicitly; tests pin a `FixedClock`.

use chrono::{SecondsFormat, Utc};

pub trait Clock: Send + Sync {
    /// RFC-3339 UTC timestamp with a trailing `Z`, millisecond precision.
    fn ts_utc(&self) -> String;
}

/// Production clock backed by the system time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn ts_utc(&self) -> String {
        Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
    }
}

/// Clock pinned to one timestamp. Used by tests and by audit runs that
/// need byte-identical output across invocations.
#[derive(Debug, Clone)]
pub struct FixedClock(pub String);

impl Clock for FixedClock {
    fn ts_utc(&self) -> String {
        self.0.clone()
    }
}
