//! Per-date archive files and the idempotent merge that maintains them.
//!
//! Each calendar date owns one JSON bucket: the deduplicated, time-sorted
//! records for that day. Merging a batch is a full load-union-rewrite, so
//! applying the same batch twice, in any order, relative to any prior
//! state, converges to the same bucket. That property is what makes the
//! sync engine safe to re-run after a crash between merge and checkpoint.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use serde::Serialize;

use crate::error::{ExportError, Result};
use crate::record::{ContentItem, ContentKind, LifelogRecord};

/// How a merged bucket is materialized on disk.
///
/// The JSON bucket is always written; it is the canonical set that later
/// merges read back. Narrative mode additionally renders a Markdown view,
/// recomputed from the merged set on every merge (never appended to).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderMode {
    Structured,
    Narrative,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergeOutcome {
    /// No bucket file existed before this merge.
    pub created: bool,
    /// Records not previously present in the bucket.
    pub added: usize,
    /// Bucket size after the merge.
    pub total: usize,
}

pub struct ArchiveWriter {
    root: PathBuf,
    mode: RenderMode,
}

impl ArchiveWriter {
    pub fn new(root: PathBuf, mode: RenderMode) -> Self {
        Self { root, mode }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn json_path(&self, date: NaiveDate) -> PathBuf {
        self.root.join(format!("{date}.json"))
    }

    fn markdown_path(&self, date: NaiveDate) -> PathBuf {
        self.root.join(format!("{date}.md"))
    }

    /// All bucket dates present on disk, ascending.
    fn bucket_dates(&self) -> Vec<NaiveDate> {
        let Ok(entries) = fs::read_dir(&self.root) else {
            return Vec::new();
        };
        let mut dates: Vec<NaiveDate> = entries
            .flatten()
            .filter_map(|entry| {
                let name = entry.file_name();
                let name = name.to_string_lossy();
                name.strip_suffix(".json")?.parse().ok()
            })
            .collect();
        dates.sort_unstable();
        dates
    }

    /// Newest bucket date in the archive: the resume point for
    /// incremental runs.
    pub fn latest_bucket_date(&self) -> Option<NaiveDate> {
        self.bucket_dates().pop()
    }

    /// Oldest bucket date in the archive: where a full resync starts
    /// extending history backward.
    pub fn earliest_bucket_date(&self) -> Option<NaiveDate> {
        self.bucket_dates().first().copied()
    }

    /// A missing or unparsable bucket is an empty bucket, never an error.
    pub fn load_bucket(&self, date: NaiveDate) -> Vec<LifelogRecord> {
        match fs::read_to_string(self.json_path(date)) {
            Ok(text) => serde_json::from_str(&text).unwrap_or_default(),
            Err(_) => Vec::new(),
        }
    }

    /// Merge `new_records` into the bucket for `date`: load, union,
    /// re-sort ascending by start time, dedup by id, rewrite in full.
    pub fn merge(&self, date: NaiveDate, new_records: &[LifelogRecord]) -> Result<MergeOutcome> {
        let json_path = self.json_path(date);
        let created = !json_path.exists();
        let existing = self.load_bucket(date);
        let before = existing.len();
        let merged = merge_records(existing, new_records);

        let json = serde_json::to_string_pretty(&merged)
            .map_err(|err| write_error(&json_path, err.to_string()))?;
        fs::write(&json_path, json).map_err(|err| write_error(&json_path, err.to_string()))?;

        if self.mode == RenderMode::Narrative {
            self.write_markdown(date, &merged)?;
        }

        Ok(MergeOutcome {
            created,
            added: merged.len().saturating_sub(before),
            total: merged.len(),
        })
    }

    fn write_markdown(&self, date: NaiveDate, records: &[LifelogRecord]) -> Result<()> {
        let path = self.markdown_path(date);
        let file = File::create(&path).map_err(|err| write_error(&path, err.to_string()))?;
        let mut writer = BufWriter::new(file);
        render_markdown(&mut writer, date, records)
            .and_then(|()| writer.flush())
            .map_err(|err| write_error(&path, err.to_string()))
    }
}

/// Union + sort + dedup. Later occurrences win on duplicate ids (record
/// content for a given id is assumed immutable upstream), so re-merging an
/// already-applied batch is a no-op.
fn merge_records(existing: Vec<LifelogRecord>, incoming: &[LifelogRecord]) -> Vec<LifelogRecord> {
    let mut by_id: HashMap<String, LifelogRecord> =
        HashMap::with_capacity(existing.len() + incoming.len());
    for record in existing.into_iter().chain(incoming.iter().cloned()) {
        by_id.insert(record.id.clone(), record);
    }
    let mut merged: Vec<LifelogRecord> = by_id.into_values().collect();
    // Tie-break on id so output is deterministic for equal start times.
    merged.sort_by(|a, b| {
        a.start_time
            .cmp(&b.start_time)
            .then_with(|| a.id.cmp(&b.id))
    });
    merged
}

#[derive(Serialize)]
struct Frontmatter {
    date: NaiveDate,
    records: usize,
}

fn render_markdown<W: Write>(
    writer: &mut W,
    date: NaiveDate,
    records: &[LifelogRecord],
) -> io::Result<()> {
    let fm = Frontmatter {
        date,
        records: records.len(),
    };
    writeln!(writer, "---")?;
    let yaml = serde_yaml::to_string(&fm).map_err(io::Error::other)?;
    write!(writer, "{yaml}")?;
    writeln!(writer, "---")?;

    let mut blocks: Vec<String> = Vec::new();
    for record in records {
        for item in record.items() {
            if let Some(block) = render_item(item) {
                blocks.push(block);
            }
        }
    }
    if !blocks.is_empty() {
        writeln!(writer)?;
        writeln!(writer, "{}", blocks.join("\n\n"))?;
    }
    Ok(())
}

/// One content block as a Markdown line, or `None` when it renders blank.
fn render_item(item: &ContentItem) -> Option<String> {
    let text = item.content.trim();
    if text.is_empty() {
        return None;
    }
    let block = match item.kind {
        ContentKind::Heading1 => format!("# {text}"),
        ContentKind::Heading2 => format!("## {text}"),
        ContentKind::Heading3 => format!("### {text}"),
        ContentKind::Blockquote => {
            let speaker = item.speaker_name.as_deref().unwrap_or("Unknown");
            match item.start_time {
                Some(at) => format!("> [{}] {speaker}: {text}", at.format("%H:%M")),
                None => format!("> {speaker}: {text}"),
            }
        }
        ContentKind::Paragraph => text.to_string(),
    };
    Some(block)
}

fn write_error(path: &Path, message: String) -> ExportError {
    ExportError::Write {
        path: path.display().to_string(),
        message,
    }
}
