//! writer.rs: Append-only, shard-rotating decision record writer.
//!
//! The writer exclusively owns the active shard handle and the in-memory
//! `seq` counter. Every append writes exactly one `\n`-terminated
//! canonical line and syncs it to durable storage before returning, so
//! the only artifact a crash can leave behind is a partial trailing line
//! — which readers and sequence inference skip.

use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use crate::clock::Clock;
use crate::record::{
    Artifacts, CodeVersion, DecisionRecord, Outcome, RecordParts, RunContext, RISK_MODE_FACT,
};
use crate::risk::RiskState;
use crate::selector::Selection;
use crate::{Error, Result, RECORD_SCHEMA_VERSION};

const SHARD_PREFIX: &str = "decision_records_";
const SHARD_SUFFIX: &str = ".jsonl";

/// Run ids become directory names; keep them boring.
pub fn sanitize_run_id(run_id: &str) -> Result<&str> {
    if run_id.is_empty() {
        return Err(Error::InvalidRunId("missing_run_id".into()));
    }
    if !run_id
        .chars()
        .all(|ch| ch.is_ascii_alphanumeric() || ch == '_' || ch == '-')
    {
        return Err(Error::InvalidRunId(run_id.to_string()));
    }
    Ok(run_id)
}

fn shard_file_name(index: u32) -> String {
    format!("{SHARD_PREFIX}{index:04}{SHARD_SUFFIX}")
}

fn shard_index(file_name: &str) -> Option<u32> {
    file_name
        .strip_prefix(SHARD_PREFIX)?
        .strip_suffix(SHARD_SUFFIX)?
        .parse()
        .ok()
}

/// Shard files of a run directory in ascending suffix order.
pub fn list_shards(run_dir: &Path) -> Result<Vec<(u32, PathBuf)>> {
    let mut shards = Vec::new();
    if !run_dir.exists() {
        return Ok(shards);
    }
    for entry in std::fs::read_dir(run_dir)? {
        let entry = entry?;
        let name = entry.file_name();
        if let Some(index) = name.to_str().and_then(shard_index) {
            shards.push((index, entry.path()));
        }
    }
    shards.sort_by_key(|(index, _)| *index);
    Ok(shards)
}

fn last_valid_seq_in_shard(path: &Path) -> Result<Option<u64>> {
    let mut text = String::new();
    File::open(path)?.read_to_string(&mut text)?;
    for line in text.lines().rev() {
        if line.trim().is_empty() {
            continue;
        }
        let Ok(value) = serde_json::from_str::<Value>(line) else {
            debug!(shard = %path.display(), "skipping unparsable tail line");
            continue;
        };
        if value.get("schema_version").and_then(Value::as_str) != Some(RECORD_SCHEMA_VERSION) {
            continue;
        }
        if let Some(seq) = value.get("seq").and_then(Value::as_u64) {
            return Ok(Some(seq));
        }
    }
    Ok(None)
}

/// Restart-safe sequence recovery: scan shards newest-first, each from
/// the tail backward, and return (last valid seq + 1), or 0 when no
/// valid record exists anywhere in the run.
pub fn infer_next_seq(run_dir: &Path) -> Result<u64> {
    for (_, path) in list_shards(run_dir)?.into_iter().rev() {
        if let Some(seq) = last_valid_seq_in_shard(&path)? {
            return Ok(seq + 1);
        }
    }
    Ok(0)
}

/// Drop an unterminated trailing line left by a crash mid-append. A
/// partial line is not a record, so this never deletes recorded data;
/// it only keeps the next append from concatenating onto garbage.
fn trim_partial_tail(path: &Path) -> Result<()> {
    if !path.exists() {
        return Ok(());
    }
    let mut bytes = Vec::new();
    File::open(path)?.read_to_end(&mut bytes)?;
    if bytes.is_empty() || bytes.ends_with(b"\n") {
        return Ok(());
    }
    let keep = bytes
        .iter()
        .rposition(|b| *b == b'\n')
        .map(|pos| pos + 1)
        .unwrap_or(0);
    debug!(shard = %path.display(), dropped = bytes.len() - keep, "trimming partial tail line");
    let file = OpenOptions::new().write(true).open(path)?;
    file.set_len(keep as u64)?;
    file.sync_data()?;
    Ok(())
}

#[derive(Debug, Clone)]
pub struct WriterOptions {
    /// Explicit starting sequence; `None` infers from the shard tail.
    pub start_seq: Option<u64>,
    /// Auto-rotate once the active shard holds this many records
    /// (0 disables size-based rotation).
    pub rotate_every: usize,
    pub symbol: Option<String>,
    /// Recorded verbatim under `inputs.config`.
    pub config: Value,
    pub code_version: CodeVersion,
    pub seed: i64,
}

impl Default for WriterOptions {
    fn default() -> Self {
        WriterOptions {
            start_seq: None,
            rotate_every: 0,
            symbol: None,
            config: Value::Object(serde_json::Map::new()),
            code_version: CodeVersion::default(),
            seed: 0,
        }
    }
}

pub struct RecordWriter {
    run_dir: PathBuf,
    run_id: String,
    options: WriterOptions,
    clock: Box<dyn Clock>,
    file: File,
    shard: u32,
    records_in_shard: usize,
    seq: u64,
}

impl RecordWriter {
    /// Open (or create) the run directory under `root`, attach to the
    /// newest shard, and recover the sequence counter from its tail.
    pub fn open(
        root: &Path,
        run_id: &str,
        options: WriterOptions,
        clock: Box<dyn Clock>,
    ) -> Result<RecordWriter> {
        let run_id = sanitize_run_id(run_id)?.to_string();
        let run_dir = root.join(&run_id);
        std::fs::create_dir_all(&run_dir)?;

        let shards = list_shards(&run_dir)?;
        let shard = shards.last().map(|(index, _)| *index).unwrap_or(0);
        let shard_path = run_dir.join(shard_file_name(shard));
        trim_partial_tail(&shard_path)?;
        let seq = match options.start_seq {
            Some(seq) => seq,
            None => infer_next_seq(&run_dir)?,
        };
        let records_in_shard = count_full_lines(&shard_path)?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&shard_path)?;

        Ok(RecordWriter {
            run_dir,
            run_id,
            options,
            clock,
            file,
            shard,
            records_in_shard,
            seq,
        })
    }

    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    pub fn next_seq(&self) -> u64 {
        self.seq
    }

    /// Assemble and durably append one record. The record is fully
    /// encoded before any byte is written, so an encoding failure
    /// produces no partial write.
    pub fn append(
        &mut self,
        timeframe: &str,
        risk_state: RiskState,
        market_state: Value,
        selection: Selection,
    ) -> Result<DecisionRecord> {
        if self.options.rotate_every > 0 && self.records_in_shard >= self.options.rotate_every {
            self.rotate()?;
        }

        let outcome = Outcome::derive(risk_state, &selection);
        let record = DecisionRecord::assemble(RecordParts {
            run_id: self.run_id.clone(),
            seq: self.seq,
            decision_id: Uuid::new_v4().to_string(),
            ts_utc: self.clock.ts_utc(),
            symbol: self.options.symbol.clone(),
            timeframe: timeframe.to_string(),
            code_version: self.options.code_version.clone(),
            run_context: RunContext {
                seed: self.options.seed,
                ..RunContext::default()
            },
            artifacts: Artifacts::default(),
            risk_state,
            market_state,
            selector_inputs: Value::Object(serde_json::Map::new()),
            config: self.options.config.clone(),
            risk_mode: RISK_MODE_FACT.to_string(),
            selection,
            outcome,
        })?;

        let mut line = record.to_canonical_json()?;
        line.push('\n');
        self.file.write_all(line.as_bytes())?;
        self.file.flush()?;
        self.file.sync_data()?;

        self.seq += 1;
        self.records_in_shard += 1;
        Ok(record)
    }

    /// Close the active shard and open the next one.
    pub fn rotate(&mut self) -> Result<()> {
        self.file.sync_data()?;
        self.shard += 1;
        let shard_path = self.run_dir.join(shard_file_name(self.shard));
        self.file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&shard_path)?;
        self.records_in_shard = 0;
        Ok(())
    }

    pub fn close(mut self) -> Result<()> {
        self.file.flush()?;
        self.file.sync_data()?;
        Ok(())
    }
}

fn count_full_lines(path: &Path) -> Result<usize> {
    if !path.exists() {
        return Ok(0);
    }
    let mut bytes = Vec::new();
    File::open(path)?.read_to_end(&mut bytes)?;
    Ok(bytes.iter().filter(|b| **b == b'\n').count())
}
