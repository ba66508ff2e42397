//! Run progress reporting.
//!
//! The engine never talks to stderr directly; it narrates through this
//! trait so output policy stays out of the sync logic.

use chrono::NaiveDate;

/// What a run accomplished. Returned by the engine and rendered by the
/// reporter's terminal summary.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
    /// Network pages fetched.
    pub pages: usize,
    /// Records received, before dedup.
    pub fetched: usize,
    /// Records newly added across all buckets.
    pub added: usize,
    /// Buckets created this run.
    pub created: usize,
    /// Existing buckets that received new merges.
    pub updated: usize,
    /// Date span touched by merges, oldest to newest.
    pub date_range: Option<(NaiveDate, NaiveDate)>,
    /// Checkpoint saves that failed. Nonzero means the next run may
    /// re-fetch already-archived pages.
    pub state_save_failures: usize,
}

impl RunSummary {
    pub(crate) fn cover(&mut self, date: NaiveDate) {
        self.date_range = Some(match self.date_range {
            Some((lo, hi)) => (lo.min(date), hi.max(date)),
            None => (date, date),
        });
    }
}

/// Observer for sync progress.
pub trait Reporter {
    /// A page or date batch was merged. `scope` names the cursor or date
    /// the batch came from.
    fn batch(&self, scope: &str, fetched: usize, dates: &[NaiveDate]);
    /// A status line worth surfacing at normal verbosity.
    fn note(&self, message: &str);
    /// A non-fatal problem.
    fn warn(&self, message: &str);
    /// Terminal summary of a completed run.
    fn done(&self, summary: &RunSummary);
}

/// Reporter writing to stderr, honoring the CLI's verbose/quiet flags.
pub struct ConsoleReporter {
    pub verbose: bool,
    pub quiet: bool,
}

impl Reporter for ConsoleReporter {
    fn batch(&self, scope: &str, fetched: usize, dates: &[NaiveDate]) {
        if self.verbose {
            let dates = dates
                .iter()
                .map(NaiveDate::to_string)
                .collect::<Vec<_>>()
                .join(", ");
            if dates.is_empty() {
                eprintln!("Fetched {fetched} record(s) [{scope}]");
            } else {
                eprintln!("Fetched {fetched} record(s) [{scope}] -> {dates}");
            }
        }
    }

    fn note(&self, message: &str) {
        if !self.quiet {
            eprintln!("{message}");
        }
    }

    fn warn(&self, message: &str) {
        eprintln!("Warning: {message}");
    }

    fn done(&self, summary: &RunSummary) {
        if self.quiet {
            return;
        }
        let mut line = format!(
            "Done. {} fetched, {} new across {} day(s).",
            summary.fetched,
            summary.added,
            summary.created + summary.updated,
        );
        if let Some((oldest, newest)) = summary.date_range {
            line.push_str(&format!(" Range {oldest}..{newest}."));
        }
        eprintln!("{line}");
        if summary.state_save_failures > 0 {
            eprintln!(
                "Warning: {} checkpoint save(s) failed; the next run may re-fetch already-archived pages.",
                summary.state_save_failures
            );
        }
    }
}

/// Reporter that swallows everything.
pub struct NullReporter;

impl Reporter for NullReporter {
    fn batch(&self, _scope: &str, _fetched: usize, _dates: &[NaiveDate]) {}
    fn note(&self, _message: &str) {}
    fn warn(&self, _message: &str) {}
    fn done(&self, _summary: &RunSummary) {}
}
