//! ---
//! vg_section: "03-persistence-logging"
//! vg_subsection: "module"
//! vg_type: "source"
//! vg_scope: "code"
//! vg_description: "Bounded in-memory measurement store."
//! vg_version: "v0.1.0"
//! vg_owner: "tbd"
//! ---
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::measurement::{Measurement, MeasurementQuery, MeasurementStore};
use crate::{Result, StorageError};

/// Keeps the most recent `retain` rows in memory.
///
/// Availability can be toggled so callers can exercise storage outages.
#[derive(Debug)]
pub struct MemoryStore {
    rows: Mutex<VecDeque<Measurement>>,
    retain: usize,
    next_id: AtomicU64,
    available: AtomicBool,
}

impl MemoryStore {
    pub fn new(retain: usize) -> Self {
        Self {
            rows: Mutex::new(VecDeque::new()),
            retain: retain.max(1),
            next_id: AtomicU64::new(1),
            available: AtomicBool::new(true),
        }
    }

    /// Mark the store reachable or unreachable. While unreachable every
    /// operation fails with [`StorageError::Unavailable`].
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.rows.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of every retained row in insertion order.
    pub fn rows(&self) -> Vec<Measurement> {
        self.rows.lock().iter().cloned().collect()
    }

    fn check(&self) -> Result<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StorageError::Unavailable("memory store offline".into()))
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(100_000)
    }
}

#[async_trait]
impl MeasurementStore for MemoryStore {
    async fn ping(&self) -> Result<()> {
        self.check()
    }

    async fn insert_measurement(&self, row: &Measurement) -> Result<u64> {
        self.check()?;
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let mut rows = self.rows.lock();
        rows.push_back(Measurement {
            id: Some(id),
            ..row.clone()
        });
        while rows.len() > self.retain {
            rows.pop_front();
        }
        Ok(id)
    }

    async fn query_measurements(&self, query: &MeasurementQuery) -> Result<Vec<Measurement>> {
        self.check()?;
        query.validate()?;
        let rows = self.rows.lock();
        Ok(query.select(rows.iter()))
    }
}
