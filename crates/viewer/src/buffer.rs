//! Buffer — the bounded, append-only log behind the viewer.
//!
//! New entries land in a [`PendingQueue`] (cheap, one push per message) and
//! are moved into the visible [`LogBuffer`] on flush. Readers never see the
//! buffer itself, only [`Snapshot`]s: a flush writes through
//! `Arc::make_mut`, so a snapshot held by a reader keeps its contents while
//! the buffer moves on to a fresh copy.

use std::collections::VecDeque;
use std::sync::Arc;

use crate::model::LogEntry;

/// Entries received since the last flush, in arrival order.
#[derive(Debug, Default)]
pub struct PendingQueue {
    entries: Vec<LogEntry>,
}

impl PendingQueue {
    pub fn push(&mut self, entry: LogEntry) {
        self.entries.push(entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    fn drain(&mut self) -> std::vec::Drain<'_, LogEntry> {
        self.entries.drain(..)
    }
}

/// Immutable view of the buffer at one point in time.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    entries: Arc<VecDeque<LogEntry>>,
    evicted: u64,
    epoch: u64,
}

impl Snapshot {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, position: usize) -> Option<&LogEntry> {
        self.entries.get(position)
    }

    pub fn iter(&self) -> impl Iterator<Item = &LogEntry> {
        self.entries.iter()
    }

    /// Entries in `range` of buffer positions, clamped to the buffer.
    pub fn range(&self, range: std::ops::Range<usize>) -> impl Iterator<Item = &LogEntry> {
        let end = range.end.min(self.entries.len());
        let start = range.start.min(end);
        self.entries.range(start..end)
    }

    /// Total entries evicted from the front since the buffer was last reset.
    pub fn evicted(&self) -> u64 {
        self.evicted
    }

    /// Reset counter; changes every time the buffer is reset.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Total entries ever appended since the last reset.
    pub fn appended_total(&self) -> u64 {
        self.evicted + self.entries.len() as u64
    }

    /// Buffer position of the entry with the given stable index, or `None`
    /// if it was evicted (or never existed).
    pub fn position_of(&self, index: u64) -> Option<usize> {
        // Indices are normally increasing, so try a binary search first and
        // fall back to a scan when a source sent them out of order.
        self.entries
            .binary_search_by_key(&index, |e| e.index)
            .ok()
            .or_else(|| self.entries.iter().position(|e| e.index == index))
    }
}

/// Bounded FIFO log buffer.
#[derive(Debug)]
pub struct LogBuffer {
    lines: Arc<VecDeque<LogEntry>>,
    pending: PendingQueue,
    max_lines: usize,
    evicted: u64,
    epoch: u64,
}

/// What one flush did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlushStats {
    pub appended: usize,
    pub evicted: usize,
}

impl LogBuffer {
    pub fn new(max_lines: usize) -> Self {
        Self {
            lines: Arc::new(VecDeque::new()),
            pending: PendingQueue::default(),
            max_lines: max_lines.max(1),
            evicted: 0,
            epoch: 0,
        }
    }

    pub fn max_lines(&self) -> usize {
        self.max_lines
    }

    /// Visible line count (excludes pending entries).
    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn pending(&self) -> &PendingQueue {
        &self.pending
    }

    /// Queue an entry for the next flush.
    pub fn enqueue(&mut self, entry: LogEntry) {
        self.pending.push(entry);
    }

    /// Move every pending entry into the buffer and trim. Returns `None` when
    /// there was nothing to flush, so callers can skip notifying observers.
    pub fn flush(&mut self) -> Option<FlushStats> {
        if self.pending.is_empty() {
            return None;
        }
        let appended = self.pending.len();
        let lines = Arc::make_mut(&mut self.lines);
        lines.extend(self.pending.drain());
        let evicted = self.trim();
        Some(FlushStats { appended, evicted })
    }

    /// Append entries directly to the visible buffer, then trim.
    pub fn append(&mut self, entries: impl IntoIterator<Item = LogEntry>) -> usize {
        Arc::make_mut(&mut self.lines).extend(entries);
        self.trim()
    }

    /// Evict from the front until `len <= max_lines`. Returns the number of
    /// entries evicted.
    pub fn trim(&mut self) -> usize {
        let excess = self.lines.len().saturating_sub(self.max_lines);
        if excess > 0 {
            Arc::make_mut(&mut self.lines).drain(..excess);
            self.evicted += excess as u64;
        }
        excess
    }

    /// Drop everything, visible and pending, and start a new epoch.
    pub fn reset(&mut self) {
        // A fresh Arc rather than clearing in place: readers keep what they had
        self.lines = Arc::new(VecDeque::new());
        self.pending.clear();
        self.evicted = 0;
        self.epoch += 1;
    }

    /// Start at a specific epoch (used when a viewer replaces its buffer).
    pub fn with_epoch(mut self, epoch: u64) -> Self {
        self.epoch = epoch;
        self
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            entries: Arc::clone(&self.lines),
            evicted: self.evicted,
            epoch: self.epoch,
        }
    }
}
