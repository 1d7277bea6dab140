//! Follow-tail viewport over buffer snapshots.
//!
//! Only the rows inside the viewport are ever materialized. The view tracks
//! how many entries the buffer has evicted so that a scrolled-back row stays
//! put while new lines push old ones out of the front.

use std::ops::Range;

use chrono::{DateTime, NaiveDateTime, TimeDelta};

use crate::buffer::Snapshot;

#[derive(Debug, Clone)]
pub struct TailView {
    viewport_height: usize,
    /// First visible buffer position
    offset: usize,
    following: bool,
    len: usize,
    epoch: u64,
    evicted: u64,
}

impl TailView {
    pub fn new(viewport_height: usize) -> Self {
        Self {
            viewport_height: viewport_height.max(1),
            offset: 0,
            following: true,
            len: 0,
            epoch: 0,
            evicted: 0,
        }
    }

    /// Bring the view up to date with a newly published snapshot.
    pub fn on_buffer_changed(&mut self, snapshot: &Snapshot) {
        if snapshot.epoch() != self.epoch {
            self.epoch = snapshot.epoch();
            self.offset = 0;
            self.following = true;
        } else {
            // Entries dropped from the front shift every position down
            let dropped = snapshot.evicted().saturating_sub(self.evicted) as usize;
            self.offset = self.offset.saturating_sub(dropped);
        }
        self.evicted = snapshot.evicted();
        self.len = snapshot.len();

        if self.following {
            self.offset = self.bottom();
        } else {
            self.offset = self.offset.min(self.bottom());
        }
    }

    /// Buffer positions currently on screen.
    pub fn visible_range(&self) -> Range<usize> {
        let end = (self.offset + self.viewport_height).min(self.len);
        self.offset.min(end)..end
    }

    /// Scroll by `delta` rows; negative scrolls toward older lines.
    /// Scrolling up pauses follow mode, reaching the bottom resumes it.
    pub fn scroll(&mut self, delta: isize) {
        let target = if delta < 0 {
            self.offset.saturating_sub(delta.unsigned_abs())
        } else {
            self.offset.saturating_add(delta as usize)
        };
        self.scroll_to(target);
    }

    pub fn scroll_to(&mut self, offset: usize) {
        self.offset = offset.min(self.bottom());
        self.following = self.is_at_bottom();
    }

    pub fn follow_tail(&mut self) {
        self.following = true;
        self.offset = self.bottom();
    }

    pub fn is_following(&self) -> bool {
        self.following
    }

    pub fn is_at_bottom(&self) -> bool {
        self.offset >= self.bottom()
    }

    pub fn viewport_height(&self) -> usize {
        self.viewport_height
    }

    pub fn set_viewport_height(&mut self, height: usize) {
        self.viewport_height = height.max(1);
        if self.following {
            self.offset = self.bottom();
        } else {
            self.offset = self.offset.min(self.bottom());
        }
    }

    /// Scroll so the entry with stable `index` is visible, roughly centered.
    /// Returns its buffer position, or `None` if it is no longer buffered.
    pub fn jump_to_index(&mut self, snapshot: &Snapshot, index: u64) -> Option<usize> {
        self.on_buffer_changed(snapshot);
        let position = snapshot.position_of(index)?;
        self.scroll_to(position.saturating_sub(self.viewport_height / 2));
        Some(position)
    }

    fn bottom(&self) -> usize {
        self.len.saturating_sub(self.viewport_height)
    }
}

impl Default for TailView {
    fn default() -> Self {
        Self::new(40)
    }
}

fn parse_timestamp(ts: &str) -> Option<NaiveDateTime> {
    let ts = ts.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(ts) {
        return Some(dt.naive_utc());
    }
    ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(ts, fmt).ok())
}

/// Time elapsed between two entry timestamps, if both parse.
pub fn time_delta(previous: &str, current: &str) -> Option<TimeDelta> {
    Some(parse_timestamp(current)? - parse_timestamp(previous)?)
}

/// Render a delta as `+1.234s` (or `-0.500s` for out-of-order lines).
pub fn format_delta(delta: TimeDelta) -> String {
    let millis = delta.num_milliseconds();
    let sign = if millis < 0 { '-' } else { '+' };
    let millis = millis.unsigned_abs();
    format!("{}{}.{:03}s", sign, millis / 1000, millis % 1000)
}

/// Render an elapsed time for humans: `12.400s`, `3m 12.400s`, `2h 0m 5.000s`.
pub fn format_duration(delta: TimeDelta) -> String {
    let millis = delta.num_milliseconds();
    let sign = if millis < 0 { "-" } else { "" };
    let millis = millis.unsigned_abs();
    let (hours, rest) = (millis / 3_600_000, millis % 3_600_000);
    let (minutes, rest) = (rest / 60_000, rest % 60_000);
    let seconds = format!("{}.{:03}s", rest / 1000, rest % 1000);
    match (hours, minutes) {
        (0, 0) => format!("{}{}", sign, seconds),
        (0, m) => format!("{}{}m {}", sign, m, seconds),
        (h, m) => format!("{}{}h {}m {}", sign, h, m, seconds),
    }
}

/// Format the rows in `range` for display, one string per entry.
pub fn render_lines(snapshot: &Snapshot, range: Range<usize>, show_delta: bool) -> Vec<String> {
    let mut previous = range
        .start
        .checked_sub(1)
        .and_then(|p| snapshot.get(p))
        .and_then(|e| e.timestamp.clone());

    snapshot
        .range(range)
        .map(|entry| {
            let mut line = format!("{}: ", entry.index.saturating_add(1));
            if show_delta {
                let delta = match (&previous, &entry.timestamp) {
                    (Some(prev), Some(cur)) => time_delta(prev, cur).map(format_delta),
                    _ => None,
                };
                line.push_str(&format!("{:>10} ", delta.unwrap_or_default()));
                if entry.timestamp.is_some() {
                    previous = entry.timestamp.clone();
                }
            }
            line.push_str(&entry.raw_text);
            line
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::LogBuffer;
    use crate::model::LogEntry;

    fn fill(buffer: &mut LogBuffer, range: Range<u64>) -> Snapshot {
        buffer.append(range.map(|i| LogEntry::new(i, format!("line {}", i))));
        buffer.trim();
        buffer.snapshot()
    }

    #[test]
    fn test_follows_tail_by_default() {
        let mut buffer = LogBuffer::new(100);
        let mut view = TailView::new(10);

        view.on_buffer_changed(&fill(&mut buffer, 0..25));
        assert_eq!(view.visible_range(), 15..25);
        assert!(view.is_following());

        view.on_buffer_changed(&fill(&mut buffer, 25..30));
        assert_eq!(view.visible_range(), 20..30);
    }

    #[test]
    fn test_short_buffer_shows_everything() {
        let mut buffer = LogBuffer::new(100);
        let mut view = TailView::new(10);
        view.on_buffer_changed(&fill(&mut buffer, 0..3));
        assert_eq!(view.visible_range(), 0..3);
        assert!(view.is_at_bottom());
    }

    #[test]
    fn test_scroll_up_pauses_follow_and_bottom_resumes() {
        let mut buffer = LogBuffer::new(100);
        let mut view = TailView::new(10);
        view.on_buffer_changed(&fill(&mut buffer, 0..50));

        view.scroll(-5);
        assert!(!view.is_following());
        assert_eq!(view.visible_range(), 35..45);

        // New lines do not move a paused view
        view.on_buffer_changed(&fill(&mut buffer, 50..60));
        assert_eq!(view.visible_range(), 35..45);

        view.scroll(1000);
        assert!(view.is_following());
        assert_eq!(view.visible_range(), 50..60);
    }

    #[test]
    fn test_paused_row_stays_anchored_under_eviction() {
        let mut buffer = LogBuffer::new(20);
        let mut view = TailView::new(5);
        let snap = fill(&mut buffer, 0..20);
        view.on_buffer_changed(&snap);
        view.scroll_to(5);
        assert_eq!(snap.get(view.visible_range().start).unwrap().index, 5);

        // Three lines evicted from the front
        let snap = fill(&mut buffer, 20..23);
        view.on_buffer_changed(&snap);
        assert_eq!(snap.get(view.visible_range().start).unwrap().index, 5);
    }

    #[test]
    fn test_reset_snapshot_resumes_following() {
        let mut buffer = LogBuffer::new(100);
        let mut view = TailView::new(10);
        view.on_buffer_changed(&fill(&mut buffer, 0..50));
        view.scroll(-20);

        buffer.reset();
        view.on_buffer_changed(&buffer.snapshot());
        assert!(view.is_following());
        assert_eq!(view.visible_range(), 0..0);
    }

    #[test]
    fn test_jump_to_index() {
        let mut buffer = LogBuffer::new(30);
        let mut view = TailView::new(10);
        let snap = fill(&mut buffer, 0..100);

        // Index 80 is at position 10 (70 evicted)
        assert_eq!(view.jump_to_index(&snap, 80), Some(10));
        assert!(view.visible_range().contains(&10));
        assert!(!view.is_following());

        // Evicted entries are not found and the view does not move
        let before = view.visible_range();
        assert_eq!(view.jump_to_index(&snap, 3), None);
        assert_eq!(view.visible_range(), before);
    }

    #[test]
    fn test_jump_on_empty_snapshot() {
        let mut view = TailView::new(10);
        assert_eq!(view.jump_to_index(&Snapshot::default(), 0), None);
    }

    #[test]
    fn test_time_delta() {
        let d = time_delta("2024-01-01 10:00:00.000", "2024-01-01 10:00:01.234").unwrap();
        assert_eq!(format_delta(d), "+1.234s");

        let d = time_delta("2024-01-01T10:00:00Z", "2024-01-01T09:59:59.500Z").unwrap();
        assert_eq!(format_delta(d), "-0.500s");

        assert!(time_delta("yesterday", "2024-01-01 10:00:00").is_none());
    }

    #[test]
    fn test_format_duration() {
        let d = time_delta("2024-01-01 10:00:00", "2024-01-01 10:03:12.400").unwrap();
        assert_eq!(format_duration(d), "3m 12.400s");
        assert_eq!(format_duration(TimeDelta::milliseconds(12_400)), "12.400s");
        assert_eq!(format_duration(TimeDelta::seconds(7205)), "2h 0m 5.000s");
        assert_eq!(format_duration(TimeDelta::milliseconds(-1_500)), "-1.500s");
    }

    #[test]
    fn test_render_last_possible_index() {
        let mut buffer = LogBuffer::new(1);
        buffer.append([LogEntry::new(u64::MAX, "end of the line")]);
        let lines = render_lines(&buffer.snapshot(), 0..1, false);
        assert_eq!(lines[0], format!("{}: end of the line", u64::MAX));
    }

    #[test]
    fn test_render_lines() {
        let mut buffer = LogBuffer::new(10);
        let mut first = LogEntry::new(0, "[2024-01-01 10:00:00.000] start");
        first.timestamp = Some("2024-01-01 10:00:00.000".into());
        let mut second = LogEntry::new(1, "[2024-01-01 10:00:02.500] later");
        second.timestamp = Some("2024-01-01 10:00:02.500".into());
        buffer.append([first, second, LogEntry::new(2, "no timestamp")]);
        let snap = buffer.snapshot();

        let plain = render_lines(&snap, 0..3, false);
        assert_eq!(plain[0], "1: [2024-01-01 10:00:00.000] start");
        assert_eq!(plain[2], "3: no timestamp");

        let with_delta = render_lines(&snap, 1..3, true);
        assert!(with_delta[0].contains("+2.500s"));
        assert!(with_delta[0].ends_with("later"));
        assert!(!with_delta[1].contains('+'));
    }
}
