//! loader.rs: Tolerant JSONL record reader. Malformed or truncated lines
//! are skipped and counted, never fatal; an unknown schema version is a
//! hard stop (records are rejected across versions, not migrated).

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use serde_json::Value;
use tracing::debug;

use crate::record::DecisionRecord;
use crate::writer::list_shards;
use crate::{Error, Result, RECORD_SCHEMA_VERSION};

/// Fields a line must carry to count as a record at all.
const REQUIRED_FIELDS: &[&str] = &[
    "schema_version",
    "run_id",
    "seq",
    "ts_utc",
    "timeframe",
    "risk_state",
    "market_state",
    "market_state_hash",
    "selection",
    "inputs_digest",
    "hashes",
];

const REQUIRED_HASHES: &[&str] = &["inputs_hash", "core_hash", "content_hash"];

/// A successfully loaded record: the raw payload (exactly as stored,
/// for hash recomputation) plus the typed view.
#[derive(Debug, Clone)]
pub struct LoadedRecord {
    pub raw: Value,
    pub record: DecisionRecord,
}

fn has_required_fields(payload: &Value) -> bool {
    let Some(map) = payload.as_object() else {
        return false;
    };
    if REQUIRED_FIELDS.iter().any(|field| !map.contains_key(*field)) {
        return false;
    }
    let Some(hashes) = map.get("hashes").and_then(Value::as_object) else {
        return false;
    };
    REQUIRED_HASHES.iter().all(|field| hashes.contains_key(*field))
}

/// Load one shard. Returns the parsed records and the count of skipped
/// lines. Never aborts on a bad line; aborts on a foreign schema tag.
pub fn load_shard(path: &Path) -> Result<(Vec<LoadedRecord>, usize)> {
    let mut records = Vec::new();
    let mut error_count = 0usize;

    let reader = BufReader::new(File::open(path)?);
    for (line_no, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let payload: Value = match serde_json::from_str(&line) {
            Ok(value) => value,
            Err(_) => {
                debug!(shard = %path.display(), line = line_no, "skipping corrupt line");
                error_count += 1;
                continue;
            }
        };
        if let Some(found) = payload.get("schema_version").and_then(Value::as_str) {
            if found != RECORD_SCHEMA_VERSION {
                return Err(Error::SchemaMismatch {
                    found: found.to_string(),
                    expected: RECORD_SCHEMA_VERSION.to_string(),
                });
            }
        }
        if !has_required_fields(&payload) {
            debug!(shard = %path.display(), line = line_no, "skipping record with missing fields");
            error_count += 1;
            continue;
        }
        match DecisionRecord::from_value(&payload) {
            Ok(record) => records.push(LoadedRecord {
                raw: payload,
                record,
            }),
            Err(Error::SchemaMismatch { found, expected }) => {
                return Err(Error::SchemaMismatch { found, expected });
            }
            Err(_) => {
                debug!(shard = %path.display(), line = line_no, "skipping undecodable record");
                error_count += 1;
            }
        }
    }

    Ok((records, error_count))
}

/// Load every shard of a run directory in ascending shard order, or a
/// single file when `path` is not a directory.
pub fn load_records(path: &Path) -> Result<(Vec<LoadedRecord>, usize)> {
    if path.is_dir() {
        let mut records = Vec::new();
        let mut error_count = 0usize;
        for (_, shard_path) in list_shards(path)? {
            let (mut shard_records, shard_errors) = load_shard(&shard_path)?;
            records.append(&mut shard_records);
            error_count += shard_errors;
        }
        Ok((records, error_count))
    } else {
        load_shard(path)
    }
}
