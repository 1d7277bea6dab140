//! Search — debounced, chunked, cancellable substring search.
//!
//! A search scans one [`Snapshot`] in fixed-size chunks and yields to the
//! scheduler between chunks, so a large buffer never monopolizes the
//! runtime. Each query gets a generation number; only the run for the
//! latest generation may commit, and the check happens under the same lock
//! as the commit itself.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::buffer::Snapshot;
use crate::model::LogEntry;

#[derive(Debug, Clone)]
pub struct SearchOptions {
    pub debounce: Duration,
    pub min_query_len: usize,
    pub chunk_size: usize,
    pub max_results: usize,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(150),
            min_query_len: 2,
            chunk_size: 500,
            max_results: 1000,
        }
    }
}

/// A matching entry, referenced by its stable index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchResult {
    pub entry_index: u64,
    pub text: String,
}

/// Committed results of the most recent query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchOutcome {
    pub query: String,
    pub results: Vec<SearchResult>,
    /// More entries matched than `max_results`
    pub truncated: bool,
    /// Buffer epoch the results were computed against
    pub epoch: u64,
    pub generation: u64,
}

/// Prepared, lowercased needle.
struct Needle {
    lower: String,
    ascii: bool,
}

impl Needle {
    fn new(query: &str) -> Self {
        Self {
            lower: query.to_lowercase(),
            ascii: query.is_ascii(),
        }
    }

    fn matches(&self, haystack: &str) -> bool {
        if self.ascii {
            // No allocation for the common case
            let needle = self.lower.as_bytes();
            haystack
                .as_bytes()
                .windows(needle.len())
                .any(|window| window.eq_ignore_ascii_case(needle))
        } else {
            haystack.to_lowercase().contains(&self.lower)
        }
    }
}

fn scan_chunk<'a>(
    chunk: impl Iterator<Item = &'a LogEntry>,
    needle: &Needle,
    results: &mut Vec<SearchResult>,
    cap: usize,
) -> bool {
    for entry in chunk {
        if needle.matches(&entry.raw_text) {
            if results.len() == cap {
                return true;
            }
            results.push(SearchResult {
                entry_index: entry.index,
                text: entry.raw_text.clone(),
            });
        }
    }
    false
}

/// Scan `snapshot` for entries containing `query`, case-insensitively, in
/// buffer order.
///
/// Returns `None` if `cancel` fired before the scan completed. Otherwise
/// returns the matches (at most `max_results`) and whether more existed.
pub async fn search_chunked(
    snapshot: &Snapshot,
    query: &str,
    options: &SearchOptions,
    cancel: &CancellationToken,
) -> Option<(Vec<SearchResult>, bool)> {
    let needle = Needle::new(query);
    let chunk_size = options.chunk_size.max(1);
    let mut results = Vec::new();
    let mut start = 0;

    if needle.lower.is_empty() {
        return Some((results, false));
    }

    while start < snapshot.len() {
        if cancel.is_cancelled() {
            return None;
        }
        let end = (start + chunk_size).min(snapshot.len());
        if scan_chunk(snapshot.range(start..end), &needle, &mut results, options.max_results) {
            return Some((results, true));
        }
        start = end;
        tokio::task::yield_now().await;
    }

    if cancel.is_cancelled() {
        return None;
    }
    Some((results, false))
}

/// Runs queries against the latest buffer snapshot.
pub struct Searcher {
    snapshots: watch::Receiver<Snapshot>,
    options: SearchOptions,
    latest: Arc<AtomicU64>,
    current: Option<CancellationToken>,
    outcome_tx: watch::Sender<SearchOutcome>,
}

impl Searcher {
    pub fn new(snapshots: watch::Receiver<Snapshot>, options: SearchOptions) -> Self {
        let (outcome_tx, _) = watch::channel(SearchOutcome::default());
        Self {
            snapshots,
            options,
            latest: Arc::new(AtomicU64::new(0)),
            current: None,
            outcome_tx,
        }
    }

    /// Start a search for `query`, superseding any search in progress.
    /// Returns the query's generation.
    pub fn query(&mut self, query: impl Into<String>) -> u64 {
        let query = query.into();
        let generation = self.latest.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(previous) = self.current.take() {
            previous.cancel();
        }

        let epoch = self.snapshots.borrow().epoch();
        if query.chars().count() < self.options.min_query_len {
            trace!(generation, "Query below minimum length, clearing results");
            commit(
                &self.outcome_tx,
                &self.latest,
                SearchOutcome {
                    query,
                    epoch,
                    generation,
                    ..SearchOutcome::default()
                },
            );
            return generation;
        }

        let cancel = CancellationToken::new();
        self.current = Some(cancel.clone());

        let snapshots = self.snapshots.clone();
        let options = self.options.clone();
        let latest = Arc::clone(&self.latest);
        let outcome_tx = self.outcome_tx.clone();

        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(options.debounce) => {}
            }

            let snapshot = snapshots.borrow().clone();
            debug!(generation, query = %query, lines = snapshot.len(), "Searching");

            if let Some((results, truncated)) = search_chunked(&snapshot, &query, &options, &cancel).await {
                let committed = commit(
                    &outcome_tx,
                    &latest,
                    SearchOutcome {
                        query,
                        results,
                        truncated,
                        epoch: snapshot.epoch(),
                        generation,
                    },
                );
                if !committed {
                    trace!(generation, "Search superseded before commit");
                }
            }
        });

        generation
    }

    /// Abandon the running search, if any.
    pub fn cancel(&mut self) {
        if let Some(token) = self.current.take() {
            token.cancel();
        }
    }

    pub fn outcome(&self) -> SearchOutcome {
        self.outcome_tx.borrow().clone()
    }

    /// Receiver notified whenever a search commits.
    pub fn outcomes(&self) -> watch::Receiver<SearchOutcome> {
        self.outcome_tx.subscribe()
    }
}

impl Drop for Searcher {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Publish `outcome` unless a newer query was issued meanwhile.
fn commit(tx: &watch::Sender<SearchOutcome>, latest: &AtomicU64, outcome: SearchOutcome) -> bool {
    tx.send_if_modified(|current| {
        if latest.load(Ordering::SeqCst) != outcome.generation {
            return false;
        }
        *current = outcome;
        true
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::LogBuffer;

    fn snapshot_of(texts: &[&str]) -> Snapshot {
        let mut buffer = LogBuffer::new(texts.len().max(1));
        buffer.append(
            texts
                .iter()
                .enumerate()
                .map(|(i, t)| LogEntry::new(i as u64, *t)),
        );
        buffer.snapshot()
    }

    fn options(chunk_size: usize, max_results: usize) -> SearchOptions {
        SearchOptions {
            debounce: Duration::from_millis(150),
            min_query_len: 2,
            chunk_size,
            max_results,
        }
    }

    #[tokio::test]
    async fn test_search_matches_case_insensitively_in_order() {
        let snap = snapshot_of(&[
            "ERROR disk full",
            "info ok",
            "Connection error on eth0",
            "all good",
            "errors: 3",
        ]);
        let cancel = CancellationToken::new();
        let (results, truncated) = search_chunked(&snap, "eRRor", &options(2, 100), &cancel).await.unwrap();

        let idx: Vec<u64> = results.iter().map(|r| r.entry_index).collect();
        assert_eq!(idx, vec![0, 2, 4]);
        assert!(!truncated);
    }

    #[tokio::test]
    async fn test_search_non_ascii() {
        let snap = snapshot_of(&["Ünïcode FEHLER", "plain", "ünïcode fehler again"]);
        let cancel = CancellationToken::new();
        let (results, _) = search_chunked(&snap, "üNÏCODE", &options(500, 100), &cancel).await.unwrap();
        assert_eq!(results.len(), 2);
    }

    #[tokio::test]
    async fn test_search_cap_reports_truncation() {
        let texts: Vec<String> = (0..50).map(|i| format!("match {}", i)).collect();
        let refs: Vec<&str> = texts.iter().map(String::as_str).collect();
        let snap = snapshot_of(&refs);
        let cancel = CancellationToken::new();

        let (results, truncated) = search_chunked(&snap, "match", &options(7, 10), &cancel).await.unwrap();
        assert_eq!(results.len(), 10);
        assert_eq!(results.last().unwrap().entry_index, 9);
        assert!(truncated);

        // Exactly at the cap is not truncated
        let (results, truncated) = search_chunked(&snap, "match", &options(7, 50), &cancel).await.unwrap();
        assert_eq!(results.len(), 50);
        assert!(!truncated);
    }

    #[test]
    fn test_search_yields_between_chunks() {
        let snap = snapshot_of(&["aa", "bb", "aa"]);
        let cancel = CancellationToken::new();
        let opts = options(1, 10);
        let mut task = tokio_test::task::spawn(search_chunked(&snap, "aa", &opts, &cancel));

        // One chunk per poll
        tokio_test::assert_pending!(task.poll());
        assert!(task.is_woken());
        tokio_test::assert_pending!(task.poll());
        tokio_test::assert_pending!(task.poll());
        let (results, truncated) = tokio_test::assert_ready!(task.poll()).unwrap();
        assert_eq!(results.len(), 2);
        assert!(!truncated);
    }

    #[test]
    fn test_cancel_between_chunks() {
        let snap = snapshot_of(&["aa", "bb", "aa"]);
        let cancel = CancellationToken::new();
        let opts = options(1, 10);
        let mut task = tokio_test::task::spawn(search_chunked(&snap, "aa", &opts, &cancel));

        tokio_test::assert_pending!(task.poll());
        cancel.cancel();
        assert!(tokio_test::assert_ready!(task.poll()).is_none());
    }

    #[tokio::test]
    async fn test_cancelled_search_returns_none() {
        let snap = snapshot_of(&["aa", "bb"]);
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(search_chunked(&snap, "aa", &options(1, 10), &cancel).await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_searcher_commits_after_debounce() {
        let (_tx, rx) = watch::channel(snapshot_of(&["alpha", "beta", "alphabet"]));
        let mut searcher = Searcher::new(rx, options(500, 100));
        let mut outcomes = searcher.outcomes();

        let generation = searcher.query("alp");
        let outcome = outcomes
            .wait_for(|o| o.generation == generation)
            .await
            .unwrap()
            .clone();
        let idx: Vec<u64> = outcome.results.iter().map(|r| r.entry_index).collect();
        assert_eq!(idx, vec![0, 2]);
        assert_eq!(outcome.query, "alp");
    }

    #[tokio::test(start_paused = true)]
    async fn test_short_query_clears_results() {
        let (_tx, rx) = watch::channel(snapshot_of(&["alpha", "beta"]));
        let mut searcher = Searcher::new(rx, options(500, 100));
        let mut outcomes = searcher.outcomes();

        let first = searcher.query("alpha");
        outcomes.wait_for(|o| o.generation == first).await.unwrap();
        assert_eq!(searcher.outcome().results.len(), 1);

        let second = searcher.query("a");
        // Committed synchronously, no debounce
        let outcome = searcher.outcome();
        assert_eq!(outcome.generation, second);
        assert!(outcome.results.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_superseded_query_never_commits() {
        let (_tx, rx) = watch::channel(snapshot_of(&["first needle", "second haystack"]));
        let mut searcher = Searcher::new(rx, options(1, 100));
        let mut outcomes = searcher.outcomes();

        let stale = searcher.query("needle");
        // Supersede inside the debounce window
        tokio::time::sleep(Duration::from_millis(100)).await;
        let fresh = searcher.query("haystack");

        outcomes.wait_for(|o| o.generation == fresh).await.unwrap();
        // Give any stale run every chance to finish
        tokio::time::sleep(Duration::from_secs(1)).await;

        let outcome = searcher.outcome();
        assert_eq!(outcome.generation, fresh);
        assert_eq!(outcome.query, "haystack");
        assert_eq!(outcome.results[0].entry_index, 1);
        assert_ne!(outcome.generation, stale);
    }

    #[test]
    fn test_stale_commit_is_rejected() {
        let (tx, _rx) = watch::channel(SearchOutcome::default());
        let latest = AtomicU64::new(2);

        let stale = SearchOutcome {
            query: "old".into(),
            generation: 1,
            ..SearchOutcome::default()
        };
        assert!(!commit(&tx, &latest, stale));

        let fresh = SearchOutcome {
            query: "new".into(),
            generation: 2,
            ..SearchOutcome::default()
        };
        assert!(commit(&tx, &latest, fresh));
        assert_eq!(tx.borrow().query, "new");
    }

    #[tokio::test(start_paused = true)]
    async fn test_results_outlive_eviction() {
        let mut buffer = LogBuffer::new(3);
        buffer.append((0..3).map(|i| LogEntry::new(i, format!("row {}", i))));
        let (tx, rx) = watch::channel(buffer.snapshot());
        let mut searcher = Searcher::new(rx, options(1, 100));
        let mut outcomes = searcher.outcomes();

        let generation = searcher.query("row");
        outcomes.wait_for(|o| o.generation == generation).await.unwrap();
        assert_eq!(searcher.outcome().results.len(), 3);

        // Evict everything; old outcome still refers to indices 0..3
        buffer.append((3..6).map(|i| LogEntry::new(i, format!("row {}", i))));
        tx.send_replace(buffer.snapshot());
        let snap = buffer.snapshot();
        let first = &searcher.outcome().results[0];
        assert_eq!(snap.position_of(first.entry_index), None);
    }
}
