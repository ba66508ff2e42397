//! # lifelog-export
//!
//! A CLI tool that incrementally exports a remote lifelog API to a local
//! archive of per-date files.
//!
//! ## What it does
//!
//! The remote service stores timestamped conversational records
//! ("lifelogs") behind a paginated, rate-limited HTTP API. This tool walks
//! that API and materializes one file per calendar date under an archive
//! directory: a pretty-printed JSON bucket of deduplicated, time-sorted
//! records, plus an optional Markdown rendering for reading.
//!
//! ## Incremental sync
//!
//! Runs are meant to be scheduled and interrupted. A small state file
//! (`.sync-state.json`) checkpoints the last successful sync, the pagination
//! cursor of an unfinished walk, and the set of dates known to be empty.
//! Merging into a bucket is idempotent, and every merge is written to disk
//! before its checkpoint, so a crash at any point costs at most one
//! re-fetched page on the next run — never a lost or duplicated record.
//!
//! ## Usage
//!
//! ```sh
//! # Incremental sync into a directory
//! LIFELOG_API_KEY=... lifelog-export ~/notes/lifelogs
//!
//! # Re-walk the remote day by day, extending history backward
//! LIFELOG_API_KEY=... lifelog-export ~/notes/lifelogs --full --markdown
//! ```
//!
//! Preferences can be persisted in `~/.config/lifelog-export/config.toml`.
//!
//! ## Rate limits
//!
//! The exporter issues one request at a time with a mandatory delay between
//! requests, and treats HTTP 429 as a cooldown rather than a failure. Slow
//! and steady is the intended operating mode.

pub mod api;
pub mod archive;
pub mod engine;
pub mod error;
pub mod record;
pub mod report;
pub mod state;
