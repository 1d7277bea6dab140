//! Parse — turn one stream payload into a `LogEntry`.
//!
//! Payloads are either a JSON object (`{line, idx, timestamp, level, domain,
//! context, matched}`, all optional) or a raw log line such as
//! `[2024-05-01 12:00:00] [ERROR] [net] connection reset`. Fields missing
//! from a JSON payload are recovered from its text the same way a raw line
//! is parsed.

use regex::Regex;
use serde::Deserialize;
use std::sync::LazyLock;

use crate::model::{Level, LogEntry};

// Leading bracketed date: "[2024-05-01 12:00:00.123]" or "[2024-05-01T12:00:00Z]"
static TIMESTAMP: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*\[(?P<ts>\d{4}-\d{2}-\d{2}[^\]]*)\]").expect("timestamp pattern is valid")
});

// Level token directly after the timestamp (or at the start of the line)
static LEVEL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*\[(?P<level>trace|debug|info|warn|warning|error)\]").expect("level pattern is valid")
});

/// Structured event as sent by the backend. Every field is optional; the
/// text may also arrive as `message` or `text`.
#[derive(Debug, Deserialize)]
struct WireEvent {
    #[serde(alias = "message", alias = "text")]
    line: Option<String>,
    idx: Option<u64>,
    timestamp: Option<String>,
    level: Option<String>,
    domain: Option<String>,
    #[serde(default)]
    context: bool,
    #[serde(default)]
    matched: bool,
}

/// Hands out entry indices.
///
/// Sources may supply their own index (`idx`); the allocator then jumps past
/// it so locally assigned indices never collide with supplied ones. Once a
/// supplied index reaches `u64::MAX` there is nothing left to hand out and
/// unnumbered entries are refused.
#[derive(Debug, Clone)]
pub struct IndexAllocator {
    next: Option<u64>,
}

impl IndexAllocator {
    pub fn new() -> Self {
        Self { next: Some(0) }
    }

    pub fn assign(&mut self, supplied: Option<u64>) -> Option<u64> {
        match supplied {
            Some(idx) => {
                if self.next.is_some_and(|next| idx >= next) {
                    self.next = idx.checked_add(1);
                }
                Some(idx)
            }
            None => {
                let idx = self.next?;
                self.next = idx.checked_add(1);
                Some(idx)
            }
        }
    }

    /// Index the next unnumbered entry would get.
    pub fn peek(&self) -> Option<u64> {
        self.next
    }
}

impl Default for IndexAllocator {
    fn default() -> Self {
        Self::new()
    }
}

/// Fields recovered from a raw line.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct LineFields {
    pub timestamp: Option<String>,
    pub level: Option<Level>,
    pub domain: Option<String>,
}

/// Parse a single event payload. Returns `None` when the payload carries no
/// usable text; such events are dropped by the caller.
pub fn parse_event(data: &str, indices: &mut IndexAllocator) -> Option<LogEntry> {
    let trimmed = data.trim_start();
    if trimmed.starts_with('{') {
        if let Ok(event) = serde_json::from_str::<WireEvent>(trimmed) {
            return from_wire(event, indices);
        }
        // Not our JSON shape: keep it as a raw line
    }

    let text = data.trim_end_matches(['\r', '\n']);
    if text.trim().is_empty() {
        return None;
    }

    let fields = parse_line(text);
    let mut entry = LogEntry::new(indices.assign(None)?, text);
    entry.timestamp = fields.timestamp;
    entry.level = fields.level;
    entry.domain = fields.domain;
    Some(entry)
}

fn from_wire(event: WireEvent, indices: &mut IndexAllocator) -> Option<LogEntry> {
    let text = event.line.filter(|line| !line.trim().is_empty())?;
    let fallback = parse_line(&text);

    let mut entry = LogEntry::new(indices.assign(event.idx)?, text);
    entry.timestamp = event
        .timestamp
        .filter(|ts| !ts.is_empty())
        .or(fallback.timestamp);
    entry.level = event
        .level
        .as_deref()
        .and_then(Level::parse)
        .or(fallback.level);
    entry.domain = event.domain.filter(|d| !d.is_empty()).or(fallback.domain);
    entry.is_context_line = event.context;
    entry.is_match = event.matched;
    Some(entry)
}

/// Extract timestamp, level and domain from a raw line.
///
/// The domain is the first token left after the timestamp and level tokens
/// are removed: the contents of a bracketed token, or else the first
/// whitespace-delimited word (trailing `:` stripped). Lines with neither a
/// timestamp nor a level are free text and get no domain.
pub fn parse_line(line: &str) -> LineFields {
    let mut rest = line;
    let mut fields = LineFields::default();

    if let Some(caps) = TIMESTAMP.captures(rest) {
        fields.timestamp = Some(caps["ts"].trim().to_string());
        rest = &rest[caps.get(0).map_or(0, |m| m.end())..];
    }

    if let Some(caps) = LEVEL.captures(rest) {
        fields.level = Level::parse(&caps["level"]);
        rest = &rest[caps.get(0).map_or(0, |m| m.end())..];
    }

    if fields.timestamp.is_none() && fields.level.is_none() {
        return fields;
    }

    fields.domain = first_token(rest);
    fields
}

fn first_token(text: &str) -> Option<String> {
    let text = text.trim_start();
    let token = if let Some(inner) = text.strip_prefix('[') {
        inner.split_once(']').map(|(inside, _)| inside.trim())?
    } else {
        text.split_whitespace().next()?.trim_end_matches(':')
    };
    (!token.is_empty()).then(|| token.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bracketed_line() {
        let line = "[2024-05-01 12:00:00.123] [ERROR] [net] connection reset by peer";
        let fields = parse_line(line);
        assert_eq!(fields.timestamp.as_deref(), Some("2024-05-01 12:00:00.123"));
        assert_eq!(fields.level, Some(Level::Error));
        assert_eq!(fields.domain.as_deref(), Some("net"));
    }

    #[test]
    fn test_parse_whitespace_domain() {
        let fields = parse_line("[2024-05-01T12:00:00Z] [info] scheduler: tick");
        assert_eq!(fields.level, Some(Level::Info));
        assert_eq!(fields.domain.as_deref(), Some("scheduler"));
    }

    #[test]
    fn test_parse_level_without_timestamp() {
        let fields = parse_line("[WARNING] [disk] 91% full");
        assert_eq!(fields.timestamp, None);
        assert_eq!(fields.level, Some(Level::Warn));
        assert_eq!(fields.domain.as_deref(), Some("disk"));
    }

    #[test]
    fn test_level_in_message_body_is_ignored() {
        let fields = parse_line("[2024-01-01] [net] peer sent [error] frame");
        assert_eq!(fields.timestamp.as_deref(), Some("2024-01-01"));
        assert_eq!(fields.level, None);
        assert_eq!(fields.domain.as_deref(), Some("net"));

        let fields = parse_line("peer sent [ERROR] frame");
        assert_eq!(fields, LineFields::default());
    }

    #[test]
    fn test_parse_free_text_has_no_fields() {
        assert_eq!(parse_line("just some words"), LineFields::default());
    }

    #[test]
    fn test_parse_event_plain_text() {
        let mut indices = IndexAllocator::new();
        let entry = parse_event("[2024-05-01 12:00:00] [DEBUG] [db] query ok", &mut indices).unwrap();
        assert_eq!(entry.index, 0);
        assert_eq!(entry.level, Some(Level::Debug));
        assert_eq!(entry.domain.as_deref(), Some("db"));
        assert!(!entry.is_match);

        let next = parse_event("second line", &mut indices).unwrap();
        assert_eq!(next.index, 1);
        assert_eq!(next.raw_text, "second line");
    }

    #[test]
    fn test_parse_event_json() {
        let mut indices = IndexAllocator::new();
        let data = r#"{"line":"[2024-05-01 12:00:00] [INFO] [api] started","idx":41,"level":"ERROR","context":true,"matched":false}"#;
        let entry = parse_event(data, &mut indices).unwrap();

        assert_eq!(entry.index, 41);
        assert_eq!(entry.level, Some(Level::Error)); // structured field wins
        assert_eq!(entry.domain.as_deref(), Some("api")); // recovered from text
        assert_eq!(entry.timestamp.as_deref(), Some("2024-05-01 12:00:00"));
        assert!(entry.is_context_line);
        assert!(!entry.is_match);
    }

    #[test]
    fn test_supplied_index_advances_counter() {
        let mut indices = IndexAllocator::new();
        parse_event(r#"{"line":"a","idx":10}"#, &mut indices).unwrap();
        let local = parse_event("b", &mut indices).unwrap();
        assert_eq!(local.index, 11);

        // A smaller supplied index doesn't move the counter backwards
        parse_event(r#"{"line":"c","idx":3}"#, &mut indices).unwrap();
        assert_eq!(indices.peek(), Some(12));
    }

    #[test]
    fn test_exhausted_indices_refuse_unnumbered_lines() {
        let mut indices = IndexAllocator::new();
        let last = parse_event(r#"{"line":"a","idx":18446744073709551615}"#, &mut indices).unwrap();
        assert_eq!(last.index, u64::MAX);
        assert_eq!(indices.peek(), None);

        // No index left that could not collide
        assert!(parse_event("unnumbered", &mut indices).is_none());
        assert!(parse_event(r#"{"line":"b"}"#, &mut indices).is_none());

        // Supplied indices are still accepted
        let supplied = parse_event(r#"{"line":"c","idx":7}"#, &mut indices).unwrap();
        assert_eq!(supplied.index, 7);
        assert_eq!(indices.peek(), None);
    }

    #[test]
    fn test_unusable_payloads_are_dropped() {
        let mut indices = IndexAllocator::new();
        assert!(parse_event("", &mut indices).is_none());
        assert!(parse_event("   \r\n", &mut indices).is_none());
        assert!(parse_event(r#"{"idx":5,"level":"INFO"}"#, &mut indices).is_none());
        assert!(parse_event(r#"{"line":"   "}"#, &mut indices).is_none());
        // Dropped events never consume an index
        assert_eq!(indices.peek(), Some(0));
    }

    #[test]
    fn test_invalid_json_kept_as_text() {
        let mut indices = IndexAllocator::new();
        let entry = parse_event("{not json", &mut indices).unwrap();
        assert_eq!(entry.raw_text, "{not json");
    }
}
