//! Outbox: operations whose remote delivery failed, kept for retry.
//!
//! Persists an [`Outbox`] JSON document at `<state_dir>/outbox.json`.
//! Writes use an atomic `.tmp` + rename. Entries are retried oldest first.
//! Entries the server will never accept are set aside as dead letters so
//! the rest of the queue keeps moving.

use std::collections::VecDeque;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use syncbox_core::{paths::outbox_path, SyncOperation};

use crate::error::{io_err, SyncError};

/// Maximum number of queued operations; the oldest is dropped beyond this.
pub const OUTBOX_CAPACITY: usize = 1024;
/// Dead letters kept for inspection; the oldest is dropped beyond this.
pub const DEAD_LETTER_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboxEntry {
    pub operation: SyncOperation,
    pub queued_at: DateTime<Utc>,
    #[serde(default)]
    pub attempts: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Outbox {
    #[serde(default)]
    entries: VecDeque<OutboxEntry>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    dead_letters: Vec<OutboxEntry>,
}

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Queue `operation`; returns the entry evicted to stay within capacity.
    pub fn push(&mut self, operation: SyncOperation) -> Option<OutboxEntry> {
        let evicted = if self.entries.len() >= OUTBOX_CAPACITY {
            self.entries.pop_front()
        } else {
            None
        };
        self.entries.push_back(OutboxEntry {
            operation,
            queued_at: Utc::now(),
            attempts: 1,
        });
        evicted
    }

    pub fn front(&self) -> Option<&OutboxEntry> {
        self.entries.front()
    }

    /// Drop the head after a successful delivery.
    pub fn pop_front(&mut self) -> Option<OutboxEntry> {
        self.entries.pop_front()
    }

    pub fn get(&self, index: usize) -> Option<&OutboxEntry> {
        self.entries.get(index)
    }

    pub fn remove(&mut self, index: usize) -> Option<OutboxEntry> {
        self.entries.remove(index)
    }

    /// Move the entry at `index` to the dead letters and return it.
    pub fn dead_letter(&mut self, index: usize) -> Option<&OutboxEntry> {
        let entry = self.entries.remove(index)?;
        Some(self.keep_dead(entry))
    }

    /// Record an operation the server refused outright.
    pub fn reject(&mut self, operation: SyncOperation) -> &OutboxEntry {
        self.keep_dead(OutboxEntry {
            operation,
            queued_at: Utc::now(),
            attempts: 1,
        })
    }

    /// Move every queued entry to the dead letters, oldest first.
    pub fn dead_letter_all(&mut self) -> usize {
        let count = self.entries.len();
        while self.dead_letter(0).is_some() {}
        count
    }

    pub fn dead_letters(&self) -> &[OutboxEntry] {
        &self.dead_letters
    }

    fn keep_dead(&mut self, entry: OutboxEntry) -> &OutboxEntry {
        if self.dead_letters.len() >= DEAD_LETTER_CAPACITY {
            self.dead_letters.remove(0);
        }
        let index = self.dead_letters.len();
        self.dead_letters.push(entry);
        &self.dead_letters[index]
    }

    /// Count one more failed delivery of the head.
    pub fn record_failure(&mut self) {
        if let Some(entry) = self.entries.front_mut() {
            entry.attempts = entry.attempts.saturating_add(1);
        }
    }
}

/// Load the outbox from `state_dir`; empty if the file does not exist yet.
pub fn load_at(state_dir: &Path) -> Result<Outbox, SyncError> {
    let path = outbox_path(state_dir);
    if !path.exists() {
        return Ok(Outbox::new());
    }
    let contents = std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
    Ok(serde_json::from_str(&contents)?)
}

/// Save the outbox atomically. Writes `<path>.tmp` then renames.
pub fn save_at(state_dir: &Path, outbox: &Outbox) -> Result<(), SyncError> {
    std::fs::create_dir_all(state_dir).map_err(|e| io_err(state_dir, e))?;

    let path = outbox_path(state_dir);
    let json = serde_json::to_string_pretty(outbox)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, &json).map_err(|e| io_err(&tmp, e))?;
    std::fs::rename(&tmp, &path).map_err(|e| io_err(&path, e))?;
    Ok(())
}
