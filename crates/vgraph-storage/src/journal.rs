//! ---
//! vg_section: "03-persistence-logging"
//! vg_subsection: "module"
//! vg_type: "source"
//! vg_scope: "code"
//! vg_description: "Append-only JSON-lines measurement journal."
//! vg_version: "v0.1.0"
//! vg_owner: "tbd"
//! ---
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::Digest;
use tokio::task;
use tracing::warn;

use crate::measurement::{Measurement, MeasurementQuery, MeasurementStore};
use crate::{Result, StorageError};

/// Journal format revision written into the header line.
pub const JOURNAL_VERSION: u16 = 1;

/// First line of every journal file.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct JournalHeader {
    version: u16,
    created_at: DateTime<Utc>,
    hash: String,
}

impl JournalHeader {
    fn new() -> Self {
        let created_at = Utc::now();
        let hash = format!(
            "{:x}",
            sha2::Sha256::digest(created_at.to_rfc3339().as_bytes())
        );
        Self {
            version: JOURNAL_VERSION,
            created_at,
            hash,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct JournalEntry {
    sequence: u64,
    recorded_at: DateTime<Utc>,
    row: Measurement,
}

struct JournalWriter {
    file: File,
    next_sequence: u64,
    /// Set when a write failed partway; the next append starts a fresh line.
    torn: bool,
}

struct JournalInner {
    path: PathBuf,
    writer: Mutex<JournalWriter>,
}

/// Durable measurement store backed by a JSON-lines file.
///
/// Each insert appends one line and flushes; the assigned sequence number
/// doubles as the row identifier. Reads scan the file, so history queries are
/// linear in journal size. File work runs on the blocking pool.
#[derive(Clone)]
pub struct JournalStore {
    inner: Arc<JournalInner>,
}

/// What a scan of an existing journal found.
struct Recovery {
    last_sequence: u64,
    /// Byte length up to and including the last newline.
    complete_len: u64,
    total_len: u64,
}

impl JournalStore {
    /// Open a journal for appending, writing a header if the file is new.
    ///
    /// A trailing partial line left by an interrupted append is truncated away.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let recovery = if path.exists() {
            Some(recover(path)?)
        } else {
            None
        };
        if let Some(recovery) = &recovery {
            if recovery.complete_len < recovery.total_len {
                warn!(
                    path = %path.display(),
                    discarded = recovery.total_len - recovery.complete_len,
                    "truncating partial trailing journal line"
                );
                OpenOptions::new()
                    .write(true)
                    .open(path)?
                    .set_len(recovery.complete_len)?;
            }
        }

        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        let next_sequence = match recovery {
            Some(recovery) if recovery.complete_len > 0 => recovery.last_sequence,
            _ => {
                let mut line = serde_json::to_vec(&JournalHeader::new())?;
                line.push(b'\n');
                file.write_all(&line)?;
                file.flush()?;
                0
            }
        };

        Ok(Self {
            inner: Arc::new(JournalInner {
                path: path.to_path_buf(),
                writer: Mutex::new(JournalWriter {
                    file,
                    next_sequence,
                    torn: false,
                }),
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    async fn blocking<T, F>(&self, work: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&JournalInner) -> Result<T> + Send + 'static,
    {
        let inner = self.inner.clone();
        task::spawn_blocking(move || work(&inner)).await?
    }
}

impl JournalInner {
    fn append(&self, row: &Measurement) -> Result<u64> {
        let mut guard = self.writer.lock();
        let sequence = guard.next_sequence + 1;
        let entry = JournalEntry {
            sequence,
            recorded_at: Utc::now(),
            row: Measurement {
                id: Some(sequence),
                ..row.clone()
            },
        };
        let mut line = Vec::with_capacity(256);
        if guard.torn {
            line.push(b'\n');
        }
        serde_json::to_writer(&mut line, &entry)?;
        line.push(b'\n');

        let file = &mut guard.file;
        if let Err(err) = file.write_all(&line).and_then(|()| file.flush()) {
            guard.torn = true;
            return Err(err.into());
        }
        guard.torn = false;
        guard.next_sequence = sequence;
        Ok(sequence)
    }

    fn scan(&self) -> Result<Vec<Measurement>> {
        let reader = BufReader::new(File::open(&self.path)?);
        let mut rows = Vec::new();
        for (index, line) in reader.lines().enumerate().skip(1) {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<JournalEntry>(&line) {
                Ok(entry) => rows.push(entry.row),
                Err(err) => warn!(
                    path = %self.path.display(),
                    line = index + 1,
                    error = %err,
                    "skipping unreadable journal line"
                ),
            }
        }
        Ok(rows)
    }

    fn ping(&self) -> Result<()> {
        OpenOptions::new()
            .append(true)
            .open(&self.path)
            .map(|_| ())
            .map_err(|err| StorageError::Unavailable(format!("{}: {err}", self.path.display())))
    }
}

impl std::fmt::Debug for JournalStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JournalStore")
            .field("path", &self.inner.path)
            .finish_non_exhaustive()
    }
}

fn recover(path: &Path) -> Result<Recovery> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut recovery = Recovery {
        last_sequence: 0,
        complete_len: 0,
        total_len: 0,
    };
    let mut line = Vec::new();
    let mut first = true;
    loop {
        line.clear();
        let read = reader.read_until(b'\n', &mut line)?;
        if read == 0 {
            break;
        }
        recovery.total_len += read as u64;
        if line.last() != Some(&b'\n') {
            break;
        }
        recovery.complete_len = recovery.total_len;
        if std::mem::take(&mut first) {
            continue;
        }
        if let Ok(entry) = serde_json::from_slice::<JournalEntry>(&line) {
            recovery.last_sequence = recovery.last_sequence.max(entry.sequence);
        }
    }
    Ok(recovery)
}

#[async_trait]
impl MeasurementStore for JournalStore {
    async fn ping(&self) -> Result<()> {
        self.blocking(|inner| inner.ping()).await
    }

    async fn insert_measurement(&self, row: &Measurement) -> Result<u64> {
        let row = row.clone();
        self.blocking(move |inner| inner.append(&row)).await
    }

    async fn query_measurements(&self, query: &MeasurementQuery) -> Result<Vec<Measurement>> {
        query.validate()?;
        let query = query.clone();
        self.blocking(move |inner| Ok(query.select(&inner.scan()?)))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample(current: f64) -> Measurement {
        Measurement {
            id: None,
            measurement_time: Utc::now(),
            current_value: current,
            voltage_value: 6.0,
            circuit_id: "circuit_B".into(),
            sensor_model: "I-Sensor-Pro".into(),
            is_overload: false,
        }
    }

    #[tokio::test]
    async fn appends_and_reads_back() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let store = JournalStore::open(&dir.path().join("journal.jsonl"))?;
        assert_eq!(store.insert_measurement(&sample(1.0)).await?, 1);
        assert_eq!(store.insert_measurement(&sample(2.0)).await?, 2);

        let rows = store
            .query_measurements(&MeasurementQuery::range(None, None, 10))
            .await?;
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].id, Some(1));
        assert_eq!(rows[1].current_value, 2.0);
        Ok(())
    }

    #[tokio::test]
    async fn reopen_continues_sequence() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("nested/journal.jsonl");
        {
            let store = JournalStore::open(&path)?;
            store.insert_measurement(&sample(1.0)).await?;
            store.insert_measurement(&sample(1.5)).await?;
        }
        let store = JournalStore::open(&path)?;
        assert_eq!(store.insert_measurement(&sample(2.0)).await?, 3);
        Ok(())
    }

    #[tokio::test]
    async fn torn_lines_are_skipped() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("journal.jsonl");
        let store = JournalStore::open(&path)?;
        store.insert_measurement(&sample(1.0)).await?;
        {
            let mut file = OpenOptions::new().append(true).open(&path)?;
            file.write_all(b"{\"sequence\": 2, \"recorded\n")?;
        }
        let rows = store
            .query_measurements(&MeasurementQuery::latest(10))
            .await?;
        assert_eq!(rows.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn reopen_truncates_partial_tail() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("journal.jsonl");
        {
            let store = JournalStore::open(&path)?;
            store.insert_measurement(&sample(1.0)).await?;
        }
        {
            let mut file = OpenOptions::new().append(true).open(&path)?;
            file.write_all(b"{\"sequence\":2,\"recorded_at\":\"2024")?;
        }

        let store = JournalStore::open(&path)?;
        assert_eq!(store.insert_measurement(&sample(2.0)).await?, 2);
        assert_eq!(store.insert_measurement(&sample(3.0)).await?, 3);

        let rows = store
            .query_measurements(&MeasurementQuery::range(None, None, 100))
            .await?;
        let currents: Vec<f64> = rows.iter().map(|row| row.current_value).collect();
        assert_eq!(currents, vec![1.0, 2.0, 3.0]);
        assert!(fs::read_to_string(&path)?.ends_with('\n'));
        Ok(())
    }

    #[tokio::test]
    async fn torn_header_starts_fresh_journal() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("journal.jsonl");
        fs::write(&path, b"{\"version\":1,\"crea")?;

        let store = JournalStore::open(&path)?;
        assert_eq!(store.insert_measurement(&sample(4.0)).await?, 1);
        let rows = store
            .query_measurements(&MeasurementQuery::latest(10))
            .await?;
        assert_eq!(rows.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn blocked_writer_leaves_runtime_free() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let store = JournalStore::open(&dir.path().join("journal.jsonl"))?;

        let held = store.inner.writer.lock();
        let pending = tokio::time::timeout(
            std::time::Duration::from_millis(50),
            store.insert_measurement(&sample(1.0)),
        )
        .await;
        assert!(pending.is_err());
        drop(held);

        store.ping().await?;
        Ok(())
    }

    #[tokio::test]
    async fn ping_fails_when_file_removed() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("journal.jsonl");
        let store = JournalStore::open(&path)?;
        store.ping().await?;
        fs::remove_file(&path)?;
        assert!(matches!(
            store.ping().await,
            Err(StorageError::Unavailable(_))
        ));
        Ok(())
    }
}
