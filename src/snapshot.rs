//! snapshot.rs: Content-addressed snapshot store.
//!
//! A snapshot bundles every input a replay needs. The file name is
//! derived from the digest of the canonical bundle, the contents are the
//! canonical encoding itself, and the file is read-only after create —
//! concurrent creators of equal content converge on the same name.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::canonical;
use crate::{Error, Result};

pub const SNAPSHOT_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub snapshot_version: u32,
    pub decision_id: String,
    pub symbol: String,
    pub timeframe: String,
    pub market_data: Option<Value>,
    pub features: Value,
    pub risk_inputs: Option<Value>,
    pub config: Option<Value>,
    pub selector_inputs: Value,
}

/// A snapshot as read back from the store, with its verified address.
#[derive(Debug, Clone)]
pub struct StoredSnapshot {
    pub snapshot: Snapshot,
    pub snapshot_hash: String,
    pub snapshot_ref: String,
}

impl Snapshot {
    pub fn from_value(payload: &Value) -> Result<Snapshot> {
        let version = payload
            .get("snapshot_version")
            .and_then(Value::as_u64)
            .unwrap_or(0);
        if version != u64::from(SNAPSHOT_SCHEMA_VERSION) {
            return Err(Error::SchemaMismatch {
                found: version.to_string(),
                expected: SNAPSHOT_SCHEMA_VERSION.to_string(),
            });
        }
        Ok(serde_json::from_value(payload.clone())?)
    }

    pub fn to_value(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }

    pub fn to_canonical_json(&self) -> Result<String> {
        canonical::canonical_json(&self.to_value()?)
    }

    pub fn snapshot_hash(&self) -> Result<String> {
        canonical::digest_json(&self.to_value()?)
    }

    /// File name under the store: the bare hex of the content digest.
    pub fn file_name(&self) -> Result<String> {
        let digest = self.snapshot_hash()?;
        let hex = digest.trim_start_matches("sha256:");
        Ok(format!("snapshot_{hex}.json"))
    }
}

fn hex_from_file_name(path: &Path) -> Option<String> {
    path.file_name()?
        .to_str()?
        .strip_prefix("snapshot_")?
        .strip_suffix(".json")
        .map(str::to_string)
}

/// Write a snapshot payload into `dir` under its content address.
/// Creating the same content twice is success; a name collision with
/// different content is tampering.
pub fn create_snapshot(payload: &Value, dir: &Path) -> Result<PathBuf> {
    let snapshot = Snapshot::from_value(payload)?;
    let text = snapshot.to_canonical_json()?;
    let out_path = dir.join(snapshot.file_name()?);

    fs::create_dir_all(dir)?;
    match fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&out_path)
    {
        Ok(mut file) => {
            use std::io::Write;
            file.write_all(text.as_bytes())?;
            file.sync_all()?;
            drop(file);
            let mut perms = fs::metadata(&out_path)?.permissions();
            perms.set_readonly(true);
            fs::set_permissions(&out_path, perms)?;
        }
        Err(err) if err.kind() == ErrorKind::AlreadyExists => {
            let existing = fs::read_to_string(&out_path)?;
            if existing != text {
                return Err(Error::SnapshotTampered {
                    path: out_path.display().to_string(),
                });
            }
        }
        Err(err) => return Err(err.into()),
    }

    Ok(out_path)
}

/// Load a snapshot and verify its filename against the content digest.
pub fn load_snapshot(path: &Path) -> Result<StoredSnapshot> {
    let text = fs::read_to_string(path)?;
    let digest = canonical::digest_bytes(text.as_bytes());
    let hex = digest.trim_start_matches("sha256:");

    let expected_hex = hex_from_file_name(path).ok_or_else(|| Error::SnapshotTampered {
        path: path.display().to_string(),
    })?;
    if expected_hex != hex {
        return Err(Error::SnapshotTampered {
            path: path.display().to_string(),
        });
    }

    let payload: Value = serde_json::from_str(&text)?;
    let snapshot = Snapshot::from_value(&payload)?;

    // The stored bytes must themselves be canonical, or re-encoding
    // would silently change the address.
    if snapshot.to_canonical_json()? != text {
        return Err(Error::SnapshotTampered {
            path: path.display().to_string(),
        });
    }

    let snapshot_ref = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or_default()
        .to_string();
    Ok(StoredSnapshot {
        snapshot,
        snapshot_hash: digest,
        snapshot_ref,
    })
}
