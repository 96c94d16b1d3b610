//! Restart safety and shard rotation for the record writer.

use std::fs::OpenOptions;
use std::io::{Read, Write};
use std::path::Path;

use anyhow::Result;
use serde_json::{Map, Value};

use buff::clock::FixedClock;
use buff::loader::load_records;
use buff::risk::RiskState;
use buff::selector::select_strategy;
use buff::strategy::builtin_registry;
use buff::writer::{infer_next_seq, list_shards, RecordWriter, WriterOptions};

fn clock() -> Box<FixedClock> {
    Box::new(FixedClock("2026-02-01T00:00:00.000Z".to_string()))
}

fn market(trend: &str) -> Map<String, Value> {
    let mut map = Map::new();
    map.insert(
        "trend_state".to_string(),
        Value::String(trend.to_string()),
    );
    map
}

fn append_selected(writer: &mut RecordWriter, trend: &str) -> Result<u64> {
    let state = market(trend);
    let selection = select_strategy(&state, RiskState::GREEN, "1m", builtin_registry());
    let record = writer.append("1m", RiskState::GREEN, Value::Object(state), selection)?;
    Ok(record.seq)
}

fn truncate_mid_line(path: &Path) -> Result<()> {
    let mut bytes = Vec::new();
    std::fs::File::open(path)?.read_to_end(&mut bytes)?;
    assert!(bytes.len() > 5);
    bytes.truncate(bytes.len() - 5);
    std::fs::write(path, bytes)?;
    Ok(())
}

#[test]
fn restart_continues_sequence_after_mid_line_truncation() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let mut writer = RecordWriter::open(dir.path(), "test_run", WriterOptions::default(), clock())?;
    assert_eq!(append_selected(&mut writer, "UP")?, 0);
    assert_eq!(append_selected(&mut writer, "DOWN")?, 1);
    assert_eq!(append_selected(&mut writer, "UP")?, 2);
    writer.close()?;

    let run_dir = dir.path().join("test_run");
    let shards = list_shards(&run_dir)?;
    assert_eq!(shards.len(), 1);
    truncate_mid_line(&shards[0].1)?;

    assert_eq!(infer_next_seq(&run_dir)?, 2);

    let mut writer = RecordWriter::open(dir.path(), "test_run", WriterOptions::default(), clock())?;
    assert_eq!(writer.next_seq(), 2);
    let seq = append_selected(&mut writer, "UP")?;
    writer.close()?;
    assert_eq!(seq, 2);

    let (records, errors) = load_records(&run_dir)?;
    assert_eq!(records.len(), 3);
    assert_eq!(errors, 0);
    assert_eq!(
        records.iter().map(|r| r.record.seq).collect::<Vec<_>>(),
        vec![0, 1, 2]
    );
    Ok(())
}

#[test]
fn empty_run_dir_starts_at_seq_zero() -> Result<()> {
    let dir = tempfile::tempdir()?;
    assert_eq!(infer_next_seq(&dir.path().join("missing"))?, 0);
    let mut writer = RecordWriter::open(dir.path(), "fresh", WriterOptions::default(), clock())?;
    assert_eq!(writer.next_seq(), 0);
    assert_eq!(append_selected(&mut writer, "UP")?, 0);
    writer.close()?;
    Ok(())
}

#[test]
fn rotation_produces_multiple_shards_in_order() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let options = WriterOptions {
        rotate_every: 2,
        ..WriterOptions::default()
    };
    let mut writer = RecordWriter::open(dir.path(), "rotate", options, clock())?;
    for trend in ["UP", "DOWN", "UP", "DOWN", "UP"] {
        append_selected(&mut writer, trend)?;
    }
    writer.close()?;

    let run_dir = dir.path().join("rotate");
    let shards = list_shards(&run_dir)?;
    assert!(shards.len() >= 2, "expected rotation, got {}", shards.len());
    assert!(shards[0].1.ends_with("decision_records_0000.jsonl"));

    let (records, errors) = load_records(&run_dir)?;
    assert_eq!(errors, 0);
    assert_eq!(
        records.iter().map(|r| r.record.seq).collect::<Vec<_>>(),
        vec![0, 1, 2, 3, 4]
    );
    Ok(())
}

#[test]
fn explicit_rotate_and_restart_keep_sequence_monotonic() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let mut writer = RecordWriter::open(dir.path(), "manual", WriterOptions::default(), clock())?;
    append_selected(&mut writer, "UP")?;
    writer.rotate()?;
    append_selected(&mut writer, "DOWN")?;
    writer.close()?;

    // A fresh writer attaches to the newest shard and continues.
    let mut writer = RecordWriter::open(dir.path(), "manual", WriterOptions::default(), clock())?;
    assert_eq!(writer.next_seq(), 2);
    assert_eq!(append_selected(&mut writer, "UP")?, 2);
    writer.close()?;
    Ok(())
}

#[test]
fn writer_rejects_hostile_run_ids() {
    let dir = tempfile::tempdir().unwrap();
    let result = RecordWriter::open(dir.path(), "../escape", WriterOptions::default(), clock());
    assert!(result.is_err());
    let result = RecordWriter::open(dir.path(), "", WriterOptions::default(), clock());
    assert!(result.is_err());
}

#[test]
fn appends_survive_unterminated_tail_from_foreign_writer() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let mut writer = RecordWriter::open(dir.path(), "tail", WriterOptions::default(), clock())?;
    append_selected(&mut writer, "UP")?;
    writer.close()?;

    let shard = &list_shards(&dir.path().join("tail"))?[0].1;
    let mut file = OpenOptions::new().append(true).open(shard)?;
    file.write_all(b"{\"schema_version\":\"dr.v1\"")?;
    drop(file);

    let mut writer = RecordWriter::open(dir.path(), "tail", WriterOptions::default(), clock())?;
    assert_eq!(writer.next_seq(), 1);
    append_selected(&mut writer, "DOWN")?;
    writer.close()?;

    let (records, errors) = load_records(&dir.path().join("tail"))?;
    assert_eq!(records.len(), 2);
    assert_eq!(errors, 0);
    Ok(())
}
