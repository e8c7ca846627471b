// src/persistence.rs - Persistence collaborator interface and implementations
//
// The core never talks to a storage engine directly. Alarm summaries are
// fire-and-forget; configuration records are read back at startup.

use crate::{
    alarms::{AlarmRecord, AlarmState},
    error::{PlcError, Result},
    tag::Tag,
};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;

/// One line of the alarm summary / audit trail
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlarmSummary {
    pub name: String,
    pub state: AlarmState,
    pub timestamp: Option<DateTime<Utc>>,
    pub ack_timestamp: Option<DateTime<Utc>>,
    pub recorded_at: DateTime<Utc>,
}

/// Storage collaborator used for audit records and startup reload
pub trait Persistence: Send + Sync {
    fn create_alarm_summary(&self, summary: &AlarmSummary) -> Result<()>;

    fn get_tags(&self) -> Result<Vec<Tag>>;

    fn get_alarms(&self) -> Result<Vec<AlarmRecord>>;

    fn put_tag(&self, tag: &Tag) -> Result<()>;

    fn put_alarm(&self, alarm: &AlarmRecord) -> Result<()>;

    fn delete_tag(&self, id: &str) -> Result<()>;

    fn delete_alarm(&self, id: &str) -> Result<()>;
}

/// Discards everything; reload finds nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct NullPersistence;

impl Persistence for NullPersistence {
    fn create_alarm_summary(&self, _summary: &AlarmSummary) -> Result<()> {
        Ok(())
    }

    fn get_tags(&self) -> Result<Vec<Tag>> {
        Ok(Vec::new())
    }

    fn get_alarms(&self) -> Result<Vec<AlarmRecord>> {
        Ok(Vec::new())
    }

    fn put_tag(&self, _tag: &Tag) -> Result<()> {
        Ok(())
    }

    fn put_alarm(&self, _alarm: &AlarmRecord) -> Result<()> {
        Ok(())
    }

    fn delete_tag(&self, _id: &str) -> Result<()> {
        Ok(())
    }

    fn delete_alarm(&self, _id: &str) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    tags: BTreeMap<String, Tag>,
    alarms: BTreeMap<String, AlarmRecord>,
    summaries: Vec<AlarmSummary>,
}

/// In-process store of records and summaries.
///
/// `set_failing(true)` makes every call fail, which is how tests simulate
/// an unreachable database.
#[derive(Debug, Default)]
pub struct MemoryPersistence {
    state: Mutex<MemoryState>,
    failing: AtomicBool,
}

impl MemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::Relaxed);
    }

    /// Summaries recorded so far, oldest first
    pub fn summaries(&self) -> Vec<AlarmSummary> {
        self.state.lock().summaries.clone()
    }

    fn check(&self) -> Result<()> {
        if self.failing.load(Ordering::Relaxed) {
            return Err(PlcError::Persistence("storage unavailable".to_string()));
        }
        Ok(())
    }
}

impl Persistence for MemoryPersistence {
    fn create_alarm_summary(&self, summary: &AlarmSummary) -> Result<()> {
        self.check()?;
        self.state.lock().summaries.push(summary.clone());
        Ok(())
    }

    fn get_tags(&self) -> Result<Vec<Tag>> {
        self.check()?;
        Ok(self.state.lock().tags.values().cloned().collect())
    }

    fn get_alarms(&self) -> Result<Vec<AlarmRecord>> {
        self.check()?;
        Ok(self.state.lock().alarms.values().cloned().collect())
    }

    fn put_tag(&self, tag: &Tag) -> Result<()> {
        self.check()?;
        self.state.lock().tags.insert(tag.id.clone(), tag.clone());
        Ok(())
    }

    fn put_alarm(&self, alarm: &AlarmRecord) -> Result<()> {
        self.check()?;
        self.state
            .lock()
            .alarms
            .insert(alarm.identifier.clone(), alarm.clone());
        Ok(())
    }

    fn delete_tag(&self, id: &str) -> Result<()> {
        self.check()?;
        self.state.lock().tags.remove(id);
        Ok(())
    }

    fn delete_alarm(&self, id: &str) -> Result<()> {
        self.check()?;
        self.state.lock().alarms.remove(id);
        Ok(())
    }
}

/// Appends alarm summaries to a JSON-lines file.
///
/// Configuration records are kept in memory; only the audit trail is
/// written to disk.
pub struct JsonlSummaryLog {
    path: PathBuf,
    writer: Mutex<BufWriter<File>>,
    records: MemoryPersistence,
}

impl JsonlSummaryLog {
    /// Open `path` in append mode, creating parent directories as needed.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            writer: Mutex::new(BufWriter::with_capacity(8192, file)),
            records: MemoryPersistence::new(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Parse every summary written to the file so far
    pub fn read_all(&self) -> Result<Vec<AlarmSummary>> {
        let content = std::fs::read_to_string(&self.path)?;
        content
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(|l| serde_json::from_str(l).map_err(PlcError::from))
            .collect()
    }
}

impl Persistence for JsonlSummaryLog {
    fn create_alarm_summary(&self, summary: &AlarmSummary) -> Result<()> {
        let mut writer = self.writer.lock();
        serde_json::to_writer(&mut *writer, summary)?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        debug!("Summary for '{}' appended to {}", summary.name, self.path.display());
        Ok(())
    }

    fn get_tags(&self) -> Result<Vec<Tag>> {
        self.records.get_tags()
    }

    fn get_alarms(&self) -> Result<Vec<AlarmRecord>> {
        self.records.get_alarms()
    }

    fn put_tag(&self, tag: &Tag) -> Result<()> {
        self.records.put_tag(tag)
    }

    fn put_alarm(&self, alarm: &AlarmRecord) -> Result<()> {
        self.records.put_alarm(alarm)
    }

    fn delete_tag(&self, id: &str) -> Result<()> {
        self.records.delete_tag(id)
    }

    fn delete_alarm(&self, id: &str) -> Result<()> {
        self.records.delete_alarm(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(name: &str, state: AlarmState) -> AlarmSummary {
        AlarmSummary {
            name: name.to_string(),
            state,
            timestamp: Some(Utc::now()),
            ack_timestamp: None,
            recorded_at: Utc::now(),
        }
    }

    #[test]
    fn test_failing_memory_store_errors() {
        let store = MemoryPersistence::new();
        store.set_failing(true);
        let err = store
            .create_alarm_summary(&summary("A1", AlarmState::Unack))
            .unwrap_err();
        assert!(matches!(err, PlcError::Persistence(_)));
        store.set_failing(false);
        store
            .create_alarm_summary(&summary("A1", AlarmState::Unack))
            .unwrap();
        assert_eq!(store.summaries().len(), 1);
    }

    #[test]
    fn test_jsonl_log_appends_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit").join("alarms.jsonl");
        let log = JsonlSummaryLog::open(&path).unwrap();
        log.create_alarm_summary(&summary("A1", AlarmState::Unack))
            .unwrap();
        log.create_alarm_summary(&summary("A1", AlarmState::Acked))
            .unwrap();

        let read = log.read_all().unwrap();
        assert_eq!(read.len(), 2);
        assert_eq!(read[1].state, AlarmState::Acked);
    }
}
