//! Wire and archive types for lifelog records.
//!
//! The remote API returns records as camelCase JSON; the same shape is
//! written back out into the per-date archive buckets, so these types serve
//! both directions.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// One conversational unit fetched from the remote log.
///
/// `id` is globally unique and stable across repeated fetches; it is the
/// dedup key when merging into a bucket. `start_time` is the sort and
/// date-bucketing key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LifelogRecord {
    pub id: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    /// Ordered content blocks. Absent when the fetch excluded contents
    /// (e.g. a frontier probe).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contents: Option<Vec<ContentItem>>,
}

impl LifelogRecord {
    /// The UTC calendar date this record is archived under.
    pub fn bucket_date(&self) -> NaiveDate {
        self.start_time.date_naive()
    }

    pub fn items(&self) -> &[ContentItem] {
        self.contents.as_deref().unwrap_or(&[])
    }
}

/// One line/block within a record. No nesting; a record's contents form a
/// flat ordered sequence rendered in order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentItem {
    #[serde(rename = "type")]
    pub kind: ContentKind,
    pub content: String,
    /// Only used when rendering quoted speech.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speaker_name: Option<String>,
}

/// Closed tag set for content blocks. An unrecognized tag fails
/// deserialization, which surfaces as a protocol violation upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContentKind {
    #[serde(rename = "heading1")]
    Heading1,
    #[serde(rename = "heading2")]
    Heading2,
    #[serde(rename = "heading3")]
    Heading3,
    #[serde(rename = "blockquote")]
    Blockquote,
    #[serde(rename = "paragraph")]
    Paragraph,
}
