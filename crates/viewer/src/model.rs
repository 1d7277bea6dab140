//! Model — log entries, levels, and the backend's wire types.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Log severity, ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Level {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl Level {
    /// All levels in display order.
    pub const ALL: [Level; 5] = [Level::Trace, Level::Debug, Level::Info, Level::Warn, Level::Error];

    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Trace => "TRACE",
            Level::Debug => "DEBUG",
            Level::Info => "INFO",
            Level::Warn => "WARN",
            Level::Error => "ERROR",
        }
    }

    /// Case-insensitive parse; `WARNING` is accepted as `WARN`.
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        Self::ALL
            .into_iter()
            .find(|level| level.as_str().eq_ignore_ascii_case(s))
            .or_else(|| s.eq_ignore_ascii_case("WARNING").then_some(Level::Warn))
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Level {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Level::parse(s).ok_or_else(|| format!("unknown log level: {}", s))
    }
}

/// One line in the viewer's buffer.
///
/// `index` is unique within a subscription and is what search results and
/// jumps refer to; the position inside the buffer shifts as old lines are
/// evicted, the index never does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub index: u64,
    pub raw_text: String,
    pub timestamp: Option<String>,
    pub level: Option<Level>,
    pub domain: Option<String>,
    pub is_context_line: bool,
    pub is_match: bool,
}

impl LogEntry {
    pub fn new(index: u64, raw_text: impl Into<String>) -> Self {
        Self {
            index,
            raw_text: raw_text.into(),
            timestamp: None,
            level: None,
            domain: None,
            is_context_line: false,
            is_match: false,
        }
    }
}

/// Summary computed by the backend for an uploaded file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSummary {
    /// Count of entries per level, e.g. {"INFO": 123, "WARN": 5}
    pub levels: HashMap<String, usize>,
    pub total_lines: usize,
    pub unique_domains: Vec<String>,
    pub start_timestamp: Option<String>,
    pub stop_timestamp: Option<String>,
}

impl LogSummary {
    /// Level counts with known levels first in severity order, then anything
    /// the backend reported that we don't recognize, alphabetically.
    pub fn levels_in_order(&self) -> Vec<(String, usize)> {
        let mut known = Vec::new();
        let mut unknown = Vec::new();
        for (name, count) in &self.levels {
            match Level::parse(name) {
                Some(level) => known.push((level, name.clone(), *count)),
                None => unknown.push((name.clone(), *count)),
            }
        }
        known.sort_by_key(|(level, _, _)| *level);
        unknown.sort();

        known
            .into_iter()
            .map(|(_, name, count)| (name, count))
            .chain(unknown)
            .collect()
    }
}

/// Response body of `POST /upload`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadResponse {
    pub session_id: String,
    #[serde(default)]
    pub summary: LogSummary,
}

/// Server-side filters for `GET /stream_logs`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamFilter {
    pub levels: Vec<Level>,
    pub domains: Vec<String>,
    pub keywords: Vec<String>,
    /// Lines of context around keyword matches
    pub context: Option<u32>,
}

impl StreamFilter {
    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
            && self.domains.is_empty()
            && self.keywords.is_empty()
            && self.context.is_none()
    }

    /// Query pairs in the order the backend documents them. Empty lists are
    /// left out entirely rather than sent as empty strings.
    pub fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::new();
        if !self.levels.is_empty() {
            let levels: Vec<&str> = self.levels.iter().map(Level::as_str).collect();
            pairs.push(("levels", levels.join(",")));
        }
        if !self.domains.is_empty() {
            pairs.push(("domains", self.domains.join(",")));
        }
        if !self.keywords.is_empty() {
            pairs.push(("keywords", self.keywords.join(",")));
        }
        if let Some(context) = self.context {
            pairs.push(("context", context.to_string()));
        }
        pairs
    }
}
