//! Remote lifelog API client.
//!
//! Wraps `GET {base}/v1/lifelogs` behind a page-at-a-time fetch primitive
//! with retries, exponential backoff, a rate-limit cooldown, and strict
//! response validation. The transport and the waits are both pluggable so
//! the retry behavior is testable without a server.

use std::time::Duration;

use chrono::NaiveDate;
use serde::Deserialize;
use thiserror::Error;
use url::Url;

use crate::error::{ExportError, Result};
use crate::record::LifelogRecord;

pub const DEFAULT_BASE_URL: &str = "https://api.limitless.ai";

/// Sort direction by `startTime`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

impl Direction {
    fn as_str(self) -> &'static str {
        match self {
            Direction::Asc => "asc",
            Direction::Desc => "desc",
        }
    }
}

/// Selector for one page fetch.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchParams {
    pub limit: u32,
    pub direction: Direction,
    pub cursor: Option<String>,
    /// Exact-day filter.
    pub date: Option<NaiveDate>,
    pub include_markdown: bool,
    pub include_headings: bool,
}

impl FetchParams {
    fn to_query(&self) -> Vec<(&'static str, String)> {
        let mut query = vec![
            ("limit", self.limit.to_string()),
            ("direction", self.direction.as_str().to_string()),
            ("includeMarkdown", self.include_markdown.to_string()),
            ("includeHeadings", self.include_headings.to_string()),
        ];
        if let Some(cursor) = &self.cursor {
            query.push(("cursor", cursor.clone()));
        }
        if let Some(date) = self.date {
            query.push(("date", date.to_string()));
        }
        query
    }
}

/// One page of results.
#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    pub records: Vec<LifelogRecord>,
    pub next_cursor: Option<String>,
}

/// A page-at-a-time view of the remote log. The sync engine only ever talks
/// to this trait, so scripted sources can stand in during tests.
pub trait LogSource {
    fn fetch_page(&mut self, params: &FetchParams) -> Result<Page>;

    /// Limit-1 probe for the newest or oldest record, used to compute sync
    /// boundaries. Contents are excluded; only the timestamps matter.
    fn peek(&mut self, direction: Direction) -> Result<Option<LifelogRecord>> {
        let params = FetchParams {
            limit: 1,
            direction,
            cursor: None,
            date: None,
            include_markdown: false,
            include_headings: false,
        };
        Ok(self.fetch_page(&params)?.records.into_iter().next())
    }
}

/// A blocking wait. Injectable so tests can observe backoff and cooldown
/// pacing instead of actually sleeping.
pub trait Pacer {
    fn pause(&self, duration: Duration);
}

/// Pacer backed by `std::thread::sleep`.
pub struct ThreadPacer;

impl Pacer for ThreadPacer {
    fn pause(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

#[derive(Debug, Error)]
#[error("{0}")]
pub struct TransportError(pub String);

/// Raw HTTP response, already drained.
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: u16,
    pub body: String,
}

/// Minimal transport surface: one authenticated GET.
pub trait Transport {
    fn get(
        &self,
        url: &Url,
        api_key: &str,
        query: &[(&'static str, String)],
    ) -> std::result::Result<RawResponse, TransportError>;
}

/// Transport backed by a blocking `reqwest` client with a per-request
/// timeout independent of retry timing.
pub struct HttpTransport {
    client: reqwest::blocking::Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| ExportError::Config(format!("failed to build HTTP client: {err}")))?;
        Ok(Self { client })
    }
}

impl Transport for HttpTransport {
    fn get(
        &self,
        url: &Url,
        api_key: &str,
        query: &[(&'static str, String)],
    ) -> std::result::Result<RawResponse, TransportError> {
        let response = self
            .client
            .get(url.clone())
            .header("X-API-Key", api_key)
            .query(query)
            .send()
            .map_err(|err| TransportError(err.to_string()))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .map_err(|err| TransportError(err.to_string()))?;
        Ok(RawResponse { status, body })
    }
}

/// Retry tuning. Rate-limit cooldowns sit outside the retry ceiling: under a
/// hard request quota a 429 is expected steady-state, not a failure.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum attempts per request for transient failures.
    pub retry_limit: u32,
    /// First backoff delay; doubles on each subsequent failure.
    pub base_delay: Duration,
    /// Wait applied on HTTP 429 before retrying the same attempt.
    pub rate_limit_cooldown: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retry_limit: 3,
            base_delay: Duration::from_millis(500),
            rate_limit_cooldown: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    fn backoff_delay(&self, prior_failures: u32) -> Duration {
        self.base_delay * 2u32.pow(prior_failures.min(10))
    }
}

/// Authenticated, retrying client for the lifelog endpoint.
pub struct LifelogClient<T = HttpTransport, P = ThreadPacer> {
    endpoint: Url,
    api_key: String,
    transport: T,
    pacer: P,
    policy: RetryPolicy,
}

impl LifelogClient {
    pub fn new(
        base_url: &str,
        api_key: String,
        timeout: Duration,
        policy: RetryPolicy,
    ) -> Result<Self> {
        Self::with_transport(base_url, api_key, HttpTransport::new(timeout)?, ThreadPacer, policy)
    }
}

impl<T: Transport, P: Pacer> LifelogClient<T, P> {
    pub fn with_transport(
        base_url: &str,
        api_key: String,
        transport: T,
        pacer: P,
        policy: RetryPolicy,
    ) -> Result<Self> {
        let endpoint = lifelogs_endpoint(base_url)?;
        Ok(Self {
            endpoint,
            api_key,
            transport,
            pacer,
            policy,
        })
    }

    fn request(&self, params: &FetchParams) -> Result<Page> {
        let query = params.to_query();
        let mut attempts = 0u32;
        let mut last_error;
        loop {
            match self.transport.get(&self.endpoint, &self.api_key, &query) {
                Ok(raw) if raw.status == 429 => {
                    // Wait out the quota window and retry the same attempt.
                    self.pacer.pause(self.policy.rate_limit_cooldown);
                    continue;
                }
                Ok(raw) if (200..300).contains(&raw.status) => return parse_page(&raw.body),
                Ok(raw) if raw.status >= 500 => {
                    attempts += 1;
                    last_error = parse_api_error(raw.status, &raw.body);
                }
                Ok(raw) => {
                    // Remaining 4xx: the request itself is wrong, retrying
                    // will not fix it.
                    return Err(ExportError::Fetch {
                        attempts: attempts + 1,
                        last_error: parse_api_error(raw.status, &raw.body),
                    });
                }
                Err(err) => {
                    attempts += 1;
                    last_error = err.to_string();
                }
            }
            if attempts >= self.policy.retry_limit {
                return Err(ExportError::Fetch {
                    attempts,
                    last_error,
                });
            }
            self.pacer.pause(self.policy.backoff_delay(attempts - 1));
        }
    }
}

impl<T: Transport, P: Pacer> LogSource for LifelogClient<T, P> {
    fn fetch_page(&mut self, params: &FetchParams) -> Result<Page> {
        self.request(params)
    }
}

fn lifelogs_endpoint(base_url: &str) -> Result<Url> {
    let trimmed = base_url.trim();
    if !trimmed.starts_with("http://") && !trimmed.starts_with("https://") {
        return Err(ExportError::Config(format!(
            "API base URL must include http:// or https://: {trimmed:?}"
        )));
    }
    let joined = format!("{}/v1/lifelogs", trimmed.trim_end_matches('/'));
    Url::parse(&joined)
        .map_err(|err| ExportError::Config(format!("invalid API base URL {trimmed:?}: {err}")))
}

// Expected envelope:
// { "data": { "lifelogs": [...] }, "meta": { "lifelogs": { "nextCursor": ... } } }

#[derive(Deserialize)]
struct Envelope {
    data: EnvelopeData,
    meta: EnvelopeMeta,
}

#[derive(Deserialize)]
struct EnvelopeData {
    lifelogs: Vec<LifelogRecord>,
}

#[derive(Deserialize)]
struct EnvelopeMeta {
    lifelogs: EnvelopeMetaLifelogs,
}

#[derive(Deserialize)]
struct EnvelopeMetaLifelogs {
    #[serde(rename = "nextCursor")]
    next_cursor: Option<String>,
}

fn parse_page(body: &str) -> Result<Page> {
    let envelope: Envelope = serde_json::from_str(body)
        .map_err(|err| ExportError::Protocol(err.to_string()))?;
    Ok(Page {
        records: envelope.data.lifelogs,
        next_cursor: envelope.meta.lifelogs.next_cursor,
    })
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: Option<String>,
    message: Option<String>,
}

fn parse_api_error(status: u16, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<ApiErrorBody>(body) {
        if let Some(message) = payload.message.or(payload.error) {
            return format!("{} ({})", message.trim(), status);
        }
    }
    let trimmed = body.trim();
    if trimmed.is_empty() {
        format!("HTTP {}", status)
    } else {
        format!("{} ({})", trimmed, status)
    }
}
