// Declare all the modules that make up our library and make them public
pub mod canonical;
pub mod clock;
pub mod driver;
pub mod gate;
pub mod loader;
pub mod record;
pub mod replay;
pub mod risk;
pub mod selector;
pub mod snapshot;
pub mod store;
pub mod strategy;
pub mod writer;


/// Schema tag stamped on every decision record line. Loads of any other
/// tag are rejected, never migrated.
pub const RECORD_SCHEMA_VERSION: &str = "dr.v1";

// Shared error type for the core. Pure functions surface these to the
// caller; the loader and verifier count-and-continue instead.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("non_canonical_value at {path}: {detail}")]
    NonCanonicalValue { path: String, detail: String },

    #[error("invalid_inputs: {0}")]
    InvalidInputs(String),

    #[error("missing_config: {path}")]
    MissingConfig { path: String },

    #[error("schema_mismatch: found {found:?}, expected {expected:?}")]
    SchemaMismatch { found: String, expected: String },

    #[error("invalid_run_id: {0}")]
    InvalidRunId(String),

    #[error("snapshot_tampered at {path}: stored name does not match content hash")]
    SnapshotTampered { path: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Db(#[from] rusqlite::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
