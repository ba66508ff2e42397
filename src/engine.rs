//! The sync engine.
//!
//! Drives repeated calls against the remote log, decides the sync window,
//! merges each batch into the archive, and checkpoints after every unit of
//! progress. Merge-to-disk always precedes checkpoint-persist, so a crash
//! between them costs at most one redundant re-merge on the next run.
//!
//! Pagination is a [`PaginationStrategy`]: the incremental cursor walk and
//! the per-date walk used for full resyncs are two implementations behind
//! one fetch/merge/checkpoint loop.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Days, NaiveDate, Utc};

use crate::api::{Direction, FetchParams, LogSource, Pacer, Page};
use crate::archive::ArchiveWriter;
use crate::error::{ExportError, Result};
use crate::record::LifelogRecord;
use crate::report::{Reporter, RunSummary};
use crate::state::{StateStore, SyncState};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    /// Cursor walk from the newest record back to the local resume point.
    Incremental,
    /// Per-date walk from the remote's safe sync point backward, extending
    /// past known history until the empty-day heuristic fires.
    FullResync,
}

#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub mode: SyncMode,
    /// Records requested per page.
    pub batch_size: u32,
    /// Window used when the archive is empty.
    pub lookback_days: u32,
    /// Consecutive empty days that end a full resync.
    pub empty_day_limit: u32,
    /// Mandatory wait between requests, independent of response latency.
    /// Sized to stay under the remote's request-rate ceiling.
    pub request_delay: Duration,
    pub include_markdown: bool,
    pub include_headings: bool,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            mode: SyncMode::Incremental,
            batch_size: 50,
            lookback_days: 30,
            empty_day_limit: 10,
            request_delay: Duration::from_secs(1),
            include_markdown: true,
            include_headings: true,
        }
    }
}

/// The two boundaries of a sync window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frontier {
    /// Most recent date the walk covers.
    pub upper: NaiveDate,
    /// Oldest date known history requires; the per-date walk may extend
    /// below it.
    pub lower: NaiveDate,
}

/// One pagination position. The engine asks for the next request, hands the
/// fetched page back, and persists whatever cursor the strategy wants
/// checkpointed; everything else about the walk lives in the strategy.
pub trait PaginationStrategy {
    /// The next request to issue, or `None` when the walk is complete.
    fn next_request(&mut self, state: &SyncState) -> Option<FetchParams>;

    /// Digest one fetched page and advance the position. Runs before the
    /// page is merged.
    fn absorb(&mut self, page: &Page, state: &mut SyncState);

    /// Pagination token to persist with the next checkpoint.
    fn checkpoint_cursor(&self) -> Option<String>;

    /// Short label for the pending request, for reporting and failure
    /// records.
    fn scope(&self) -> String;
}

/// Incremental strategy: walk pages newest-first via `nextCursor` until the
/// cursor is exhausted, a short page arrives, or a page reaches the lower
/// bound.
pub struct CursorWalk {
    batch_size: u32,
    include_markdown: bool,
    include_headings: bool,
    lower: NaiveDate,
    cursor: Option<String>,
    done: bool,
}

impl CursorWalk {
    pub fn new(options: &SyncOptions, lower: NaiveDate, resume_cursor: Option<String>) -> Self {
        Self {
            batch_size: options.batch_size,
            include_markdown: options.include_markdown,
            include_headings: options.include_headings,
            lower,
            cursor: resume_cursor,
            done: false,
        }
    }
}

impl PaginationStrategy for CursorWalk {
    fn next_request(&mut self, _state: &SyncState) -> Option<FetchParams> {
        if self.done {
            return None;
        }
        Some(FetchParams {
            limit: self.batch_size,
            direction: Direction::Desc,
            cursor: self.cursor.clone(),
            date: None,
            include_markdown: self.include_markdown,
            include_headings: self.include_headings,
        })
    }

    fn absorb(&mut self, page: &Page, _state: &mut SyncState) {
        let oldest = page.records.iter().map(LifelogRecord::bucket_date).min();
        self.done = page.next_cursor.is_none()
            || page.records.len() < self.batch_size as usize
            || oldest.is_some_and(|date| date <= self.lower);
        self.cursor = page.next_cursor.clone();
    }

    fn checkpoint_cursor(&self) -> Option<String> {
        // A finished walk clears the cursor; an unfinished one leaves the
        // resume point for the next run.
        if self.done { None } else { self.cursor.clone() }
    }

    fn scope(&self) -> String {
        self.cursor.as_deref().unwrap_or("frontier").to_string()
    }
}

/// Full-resync strategy: one calendar date at a time, newest first, paging
/// within a date when it exceeds the batch size. Known-empty dates are
/// skipped without a fetch but still count toward the termination
/// heuristic, which fires after a configurable run of consecutive empty
/// days.
pub struct DateWalk {
    batch_size: u32,
    include_markdown: bool,
    include_headings: bool,
    empty_day_limit: u32,
    date: Option<NaiveDate>,
    day_cursor: Option<String>,
    consecutive_empty: u32,
}

impl DateWalk {
    pub fn new(options: &SyncOptions, start: NaiveDate) -> Self {
        Self {
            batch_size: options.batch_size,
            include_markdown: options.include_markdown,
            include_headings: options.include_headings,
            empty_day_limit: options.empty_day_limit,
            date: Some(start),
            day_cursor: None,
            consecutive_empty: 0,
        }
    }
}

impl PaginationStrategy for DateWalk {
    fn next_request(&mut self, state: &SyncState) -> Option<FetchParams> {
        loop {
            if self.consecutive_empty >= self.empty_day_limit {
                return None;
            }
            let date = self.date?;
            if self.day_cursor.is_none() && state.is_empty_day(date) {
                self.consecutive_empty += 1;
                self.date = date.pred_opt();
                continue;
            }
            return Some(FetchParams {
                limit: self.batch_size,
                direction: Direction::Asc,
                cursor: self.day_cursor.clone(),
                date: Some(date),
                include_markdown: self.include_markdown,
                include_headings: self.include_headings,
            });
        }
    }

    fn absorb(&mut self, page: &Page, state: &mut SyncState) {
        let Some(date) = self.date else { return };
        let first_page_of_day = self.day_cursor.is_none();
        if page.records.is_empty() && first_page_of_day {
            state.mark_empty(date);
            self.consecutive_empty += 1;
        } else if !page.records.is_empty() {
            self.consecutive_empty = 0;
        }
        let full_page = page.records.len() >= self.batch_size as usize;
        if full_page && page.next_cursor.is_some() {
            // The date has more records; keep paging within it.
            self.day_cursor = page.next_cursor.clone();
        } else {
            self.day_cursor = None;
            self.date = date.pred_opt();
        }
    }

    fn checkpoint_cursor(&self) -> Option<String> {
        // The persisted cursor belongs to the incremental walk only.
        None
    }

    fn scope(&self) -> String {
        match self.date {
            Some(date) => date.to_string(),
            None => "exhausted".to_string(),
        }
    }
}

pub struct SyncEngine<'a> {
    source: &'a mut dyn LogSource,
    archive: &'a ArchiveWriter,
    store: &'a dyn StateStore,
    pacer: &'a dyn Pacer,
    reporter: &'a dyn Reporter,
    options: SyncOptions,
    now: DateTime<Utc>,
    made_request: bool,
}

impl<'a> SyncEngine<'a> {
    pub fn new(
        source: &'a mut dyn LogSource,
        archive: &'a ArchiveWriter,
        store: &'a dyn StateStore,
        pacer: &'a dyn Pacer,
        reporter: &'a dyn Reporter,
        options: SyncOptions,
    ) -> Self {
        Self {
            source,
            archive,
            store,
            pacer,
            reporter,
            options,
            now: Utc::now(),
            made_request: false,
        }
    }

    pub fn run(&mut self) -> Result<RunSummary> {
        self.run_at(Utc::now())
    }

    /// Run one sync with the clock pinned to `now`. Split out from
    /// [`run`](Self::run) so scenario tests control the calendar.
    pub fn run_at(&mut self, now: DateTime<Utc>) -> Result<RunSummary> {
        let today = now.date_naive();
        let mut state = self.store.load();
        self.now = now;
        self.made_request = false;
        let mut summary = RunSummary::default();

        match self.options.mode {
            SyncMode::Incremental => {
                // A checkpointed cursor means the previous walk stopped
                // early: the newest local bucket no longer marks completed
                // coverage, so fall back to the lookback window.
                let resuming = state.last_cursor.is_some();
                let latest_local = if resuming {
                    None
                } else {
                    self.archive.latest_bucket_date()
                };
                let frontier =
                    incremental_frontier(today, latest_local, self.options.lookback_days);
                if !resuming && checkpoint_covers(&state, frontier.upper) {
                    self.reporter.note("Archive is already up to date.");
                    return Ok(summary);
                }
                if resuming {
                    self.reporter.note("Resuming an interrupted cursor walk.");
                } else {
                    self.reporter.note(&format!(
                        "Checking for records newer than {}.",
                        frontier.lower
                    ));
                }
                let mut strategy =
                    CursorWalk::new(&self.options, frontier.lower, state.last_cursor.clone());
                self.walk(&mut strategy, &mut state, &mut summary)?;
            }
            SyncMode::FullResync => {
                let Some(latest) = self.peek_latest(&mut state)? else {
                    self.reporter.note("Remote log is empty; nothing to sync.");
                    return Ok(summary);
                };
                let frontier = full_frontier(
                    latest.bucket_date(),
                    self.archive.earliest_bucket_date(),
                    today,
                    self.options.lookback_days,
                );
                self.reporter.note(&format!(
                    "Full resync: walking back from {} (known history reaches {}).",
                    frontier.upper, frontier.lower
                ));
                let mut strategy = DateWalk::new(&self.options, frontier.upper);
                self.walk(&mut strategy, &mut state, &mut summary)?;
            }
        }

        self.reporter.done(&summary);
        Ok(summary)
    }

    /// The shared fetch/merge/checkpoint loop. One iteration is the atomic
    /// unit of progress: merge to disk, then persist the checkpoint.
    fn walk(
        &mut self,
        strategy: &mut dyn PaginationStrategy,
        state: &mut SyncState,
        summary: &mut RunSummary,
    ) -> Result<()> {
        while let Some(params) = strategy.next_request(state) {
            let scope = strategy.scope();
            let page = self.fetch_paced(state, &params, &scope)?;
            summary.pages += 1;
            summary.fetched += page.records.len();

            strategy.absorb(&page, state);
            let dates = self.merge_batch(state, &page.records, summary)?;
            self.reporter.batch(&scope, page.records.len(), &dates);

            state.last_cursor = strategy.checkpoint_cursor();
            self.checkpoint(state, summary);
        }
        Ok(())
    }

    fn peek_latest(&mut self, state: &mut SyncState) -> Result<Option<LifelogRecord>> {
        match self.source.peek(Direction::Desc) {
            Ok(latest) => {
                self.made_request = true;
                Ok(latest)
            }
            Err(err) => Err(self.abort(state, "peek", err)),
        }
    }

    fn fetch_paced(
        &mut self,
        state: &mut SyncState,
        params: &FetchParams,
        scope: &str,
    ) -> Result<Page> {
        if self.made_request {
            self.pacer.pause(self.options.request_delay);
        }
        self.made_request = true;
        match self.source.fetch_page(params) {
            Ok(page) => Ok(page),
            Err(err) => Err(self.abort(state, scope, err)),
        }
    }

    /// Merge one batch, bucketed by date. Any date that received real data
    /// is no longer considered empty.
    fn merge_batch(
        &mut self,
        state: &mut SyncState,
        records: &[LifelogRecord],
        summary: &mut RunSummary,
    ) -> Result<Vec<NaiveDate>> {
        let mut by_date: BTreeMap<NaiveDate, Vec<LifelogRecord>> = BTreeMap::new();
        for record in records {
            by_date
                .entry(record.bucket_date())
                .or_default()
                .push(record.clone());
        }
        let mut dates = Vec::with_capacity(by_date.len());
        for (date, batch) in by_date {
            let outcome = match self.archive.merge(date, &batch) {
                Ok(outcome) => outcome,
                Err(err) => return Err(self.abort(state, &date.to_string(), err)),
            };
            state.clear_empty(date);
            summary.added += outcome.added;
            if outcome.created {
                summary.created += 1;
            } else if outcome.added > 0 {
                summary.updated += 1;
            }
            summary.cover(date);
            dates.push(date);
        }
        Ok(dates)
    }

    fn checkpoint(&self, state: &mut SyncState, summary: &mut RunSummary) {
        state.last_sync_time = Some(self.now);
        if let Err(err) = self.store.save(state) {
            summary.state_save_failures += 1;
            self.reporter.warn(&format!("checkpoint not saved: {err}"));
        }
    }

    /// Record the failure, persist state best-effort, hand the error back.
    fn abort(&self, state: &mut SyncState, scope: &str, err: ExportError) -> ExportError {
        state.record_failure(scope, &err);
        if self.store.save(state).is_err() {
            self.reporter
                .warn("could not persist sync state after a failure");
        }
        err
    }
}

// ── Frontier selection ───────────────────────────────────────────────────

/// Incremental window: re-check everything from the local resume point up
/// to today. Late-arriving records on the boundary date are picked up
/// because the boundary itself is re-fetched.
pub fn incremental_frontier(
    today: NaiveDate,
    latest_local: Option<NaiveDate>,
    lookback_days: u32,
) -> Frontier {
    Frontier {
        upper: today,
        lower: latest_local.unwrap_or_else(|| fallback_lower(today, lookback_days)),
    }
}

/// Full-resync window: the remote's most recent record marks a day that
/// may still be receiving writes, so the day before it is the safe upper
/// bound.
pub fn full_frontier(
    latest_remote: NaiveDate,
    earliest_local: Option<NaiveDate>,
    today: NaiveDate,
    lookback_days: u32,
) -> Frontier {
    let upper = latest_remote.pred_opt().unwrap_or(latest_remote);
    let lower = earliest_local.unwrap_or_else(|| fallback_lower(today, lookback_days));
    Frontier {
        upper,
        lower: lower.min(upper),
    }
}

fn fallback_lower(today: NaiveDate, lookback_days: u32) -> NaiveDate {
    today
        .checked_sub_days(Days::new(u64::from(lookback_days)))
        .unwrap_or(today)
}

/// True when the checkpoint already covers the window's upper bound, in
/// which case an incremental run is an idempotent no-op.
fn checkpoint_covers(state: &SyncState, upper: NaiveDate) -> bool {
    state
        .last_sync_time
        .is_some_and(|at| at.date_naive() >= upper)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn day(text: &str) -> NaiveDate {
        text.parse().unwrap()
    }

    fn record(id: &str, start: &str) -> LifelogRecord {
        LifelogRecord {
            id: id.into(),
            start_time: start.parse().unwrap(),
            end_time: start.parse().unwrap(),
            contents: None,
        }
    }

    fn page(records: Vec<LifelogRecord>, next: Option<&str>) -> Page {
        Page {
            records,
            next_cursor: next.map(String::from),
        }
    }

    #[test]
    fn incremental_frontier_resumes_from_latest_local_bucket() {
        let frontier = incremental_frontier(day("2024-03-05"), Some(day("2024-03-02")), 30);
        assert_eq!(frontier.upper, day("2024-03-05"));
        assert_eq!(frontier.lower, day("2024-03-02"));
    }

    #[test]
    fn incremental_frontier_falls_back_to_lookback_window() {
        let frontier = incremental_frontier(day("2024-03-05"), None, 30);
        assert_eq!(frontier.lower, day("2024-02-04"));
    }

    #[test]
    fn full_frontier_stops_short_of_the_day_still_being_written() {
        let frontier = full_frontier(
            day("2024-03-05"),
            Some(day("2024-02-01")),
            day("2024-03-05"),
            30,
        );
        assert_eq!(frontier.upper, day("2024-03-04"));
        assert_eq!(frontier.lower, day("2024-02-01"));
    }

    #[test]
    fn full_frontier_clamps_lower_to_upper() {
        let frontier = full_frontier(
            day("2024-03-05"),
            Some(day("2024-03-10")),
            day("2024-03-05"),
            30,
        );
        assert_eq!(frontier.lower, frontier.upper);
    }

    #[test]
    fn checkpoint_coverage_is_date_granular() {
        let mut state = SyncState::default();
        assert!(!checkpoint_covers(&state, day("2024-03-05")));
        state.last_sync_time = Some("2024-03-05T01:00:00Z".parse().unwrap());
        assert!(checkpoint_covers(&state, day("2024-03-05")));
        assert!(!checkpoint_covers(&state, day("2024-03-06")));
    }

    #[test]
    fn cursor_walk_stops_on_short_page() {
        let options = SyncOptions {
            batch_size: 2,
            ..SyncOptions::default()
        };
        let mut walk = CursorWalk::new(&options, day("2024-02-01"), None);
        let mut state = SyncState::default();

        assert!(walk.next_request(&state).is_some());
        walk.absorb(
            &page(vec![record("a", "2024-03-01T08:00:00Z")], Some("c1")),
            &mut state,
        );
        assert_eq!(walk.checkpoint_cursor(), None);
        assert!(walk.next_request(&state).is_none());
    }

    #[test]
    fn cursor_walk_stops_when_a_page_reaches_the_lower_bound() {
        let options = SyncOptions {
            batch_size: 2,
            ..SyncOptions::default()
        };
        let mut walk = CursorWalk::new(&options, day("2024-03-01"), None);
        let mut state = SyncState::default();

        walk.absorb(
            &page(
                vec![
                    record("a", "2024-03-02T08:00:00Z"),
                    record("b", "2024-03-01T08:00:00Z"),
                ],
                Some("c1"),
            ),
            &mut state,
        );
        assert!(walk.next_request(&state).is_none());
    }

    #[test]
    fn cursor_walk_continues_on_full_pages_and_checkpoints_the_cursor() {
        let options = SyncOptions {
            batch_size: 1,
            ..SyncOptions::default()
        };
        let mut walk = CursorWalk::new(&options, day("2024-02-01"), None);
        let mut state = SyncState::default();

        walk.absorb(
            &page(vec![record("a", "2024-03-02T08:00:00Z")], Some("c1")),
            &mut state,
        );
        assert_eq!(walk.checkpoint_cursor().as_deref(), Some("c1"));
        let next = walk.next_request(&state).unwrap();
        assert_eq!(next.cursor.as_deref(), Some("c1"));
    }

    #[test]
    fn date_walk_skips_known_empty_days_and_counts_them() {
        let options = SyncOptions {
            empty_day_limit: 2,
            ..SyncOptions::default()
        };
        let mut walk = DateWalk::new(&options, day("2024-03-04"));
        let mut state = SyncState::default();
        state.mark_empty(day("2024-03-04"));
        state.mark_empty(day("2024-03-03"));

        // Both known-empty days are skipped without a request, and the
        // heuristic fires.
        assert!(walk.next_request(&state).is_none());
    }

    #[test]
    fn date_walk_marks_empty_days_and_advances() {
        let options = SyncOptions {
            empty_day_limit: 10,
            ..SyncOptions::default()
        };
        let mut walk = DateWalk::new(&options, day("2024-03-04"));
        let mut state = SyncState::default();

        let request = walk.next_request(&state).unwrap();
        assert_eq!(request.date, Some(day("2024-03-04")));
        walk.absorb(&page(vec![], None), &mut state);
        assert!(state.is_empty_day(day("2024-03-04")));

        let request = walk.next_request(&state).unwrap();
        assert_eq!(request.date, Some(day("2024-03-03")));
    }

    #[test]
    fn date_walk_pages_within_a_large_day() {
        let options = SyncOptions {
            batch_size: 1,
            ..SyncOptions::default()
        };
        let mut walk = DateWalk::new(&options, day("2024-03-04"));
        let mut state = SyncState::default();

        walk.next_request(&state).unwrap();
        walk.absorb(
            &page(vec![record("a", "2024-03-04T08:00:00Z")], Some("d2")),
            &mut state,
        );
        let request = walk.next_request(&state).unwrap();
        assert_eq!(request.date, Some(day("2024-03-04")));
        assert_eq!(request.cursor.as_deref(), Some("d2"));

        walk.absorb(&page(vec![], None), &mut state);
        // The empty tail page neither marks the day empty nor counts it.
        assert!(!state.is_empty_day(day("2024-03-04")));
        let request = walk.next_request(&state).unwrap();
        assert_eq!(request.date, Some(day("2024-03-03")));
    }
}
