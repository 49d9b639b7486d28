//! Lyric download, parsing and time-indexed lookup.
//!
//! The lyric thread only downloads and parses. Selecting the line to show happens on the
//! player thread via [`LyricTrack::select`], keyed on decoded audio time rather than wall
//! clock.

use std::collections::HashSet;
use std::io::{ErrorKind, Read};
use std::sync::Mutex;

use anyhow::{Context, Result, anyhow, bail};
use serde::Deserialize;
use serde_json::Value;

use crate::config::StreamConfig;
use crate::services::HttpClient;
use crate::worker::{Latch, lock};

/// One timed lyric line.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LyricLine {
    pub timestamp_ms: u64,
    pub text: String,
}

#[derive(Deserialize)]
struct LyricDocument {
    data: Option<LyricData>,
}

#[derive(Deserialize)]
struct LyricData {
    lrclist: Option<Vec<Value>>,
    simpl: Option<Recommendations>,
}

#[derive(Deserialize)]
struct Recommendations {
    musiclist: Option<Vec<Value>>,
}

/// Convert a fractional-seconds string such as `"12.34"` to milliseconds.
///
/// Digits past the third decimal are truncated.
pub fn parse_timestamp_ms(raw: &str) -> Option<u64> {
    let raw = raw.trim();
    let (secs, frac) = raw.split_once('.').unwrap_or((raw, ""));
    if secs.is_empty() && frac.is_empty() {
        return None;
    }
    let all_digits = |s: &str| s.bytes().all(|b| b.is_ascii_digit());
    if !all_digits(secs) || !all_digits(frac) {
        return None;
    }

    let whole: u64 = if secs.is_empty() { 0 } else { secs.parse().ok()? };
    let millis = frac
        .bytes()
        .chain(std::iter::repeat(b'0'))
        .take(3)
        .fold(0u64, |acc, b| acc * 10 + u64::from(b - b'0'));
    whole.checked_mul(1000)?.checked_add(millis)
}

fn string_field<'a>(item: &'a Value, key: &str) -> Option<std::borrow::Cow<'a, str>> {
    match item.get(key)? {
        Value::String(s) => Some(s.as_str().into()),
        Value::Number(n) => Some(n.to_string().into()),
        _ => None,
    }
}

/// Extract timed lines from a lyric document, sorted by timestamp.
///
/// Lines without text or with a missing or unparsable time are skipped. An empty result
/// is an error.
pub fn parse_lyrics(body: &str) -> Result<Vec<LyricLine>> {
    let doc: LyricDocument = serde_json::from_str(body).context("parse lyric document")?;
    let items = doc
        .data
        .and_then(|d| d.lrclist)
        .ok_or_else(|| anyhow!("lyric document has no lrclist"))?;

    let mut lines = Vec::with_capacity(items.len());
    for (index, item) in items.iter().enumerate() {
        let text = item.get("lineLyric").and_then(Value::as_str);
        let time = string_field(item, "time").and_then(|t| parse_timestamp_ms(&t));
        match (text, time) {
            (Some(text), Some(timestamp_ms)) => lines.push(LyricLine {
                timestamp_ms,
                text: text.to_string(),
            }),
            _ => tracing::debug!(index, "skipping incomplete lyric line"),
        }
    }
    if lines.is_empty() {
        bail!("lyric document contains no usable lines");
    }

    lines.sort_by_key(|l| l.timestamp_ms);
    Ok(lines)
}

/// Pick the first recommended track id not yet in `played`, and mark it played.
pub fn parse_recommended_song(body: &str, played: &mut HashSet<String>) -> Option<String> {
    let doc: LyricDocument = match serde_json::from_str(body) {
        Ok(doc) => doc,
        Err(e) => {
            tracing::debug!(error = %e, "recommendations unavailable");
            return None;
        }
    };
    let candidates = doc.data?.simpl?.musiclist?;

    for item in &candidates {
        let Some(id) = string_field(item, "musicrId") else {
            continue;
        };
        if id.is_empty() || played.contains(&*id) {
            continue;
        }
        let id = id.into_owned();
        played.insert(id.clone());
        tracing::info!(track_id = %id, "next song recommended");
        return Some(id);
    }

    tracing::info!(candidates = candidates.len(), "no unplayed recommendation left");
    None
}

/// Lyric lines of the current song plus the index currently on screen.
#[derive(Debug, Default)]
pub struct LyricTrack {
    inner: Mutex<TrackState>,
}

#[derive(Debug, Default)]
struct TrackState {
    lines: Vec<LyricLine>,
    current: Option<usize>,
}

impl LyricTrack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a new set of lines and forget the on-screen index.
    pub fn replace(&self, lines: Vec<LyricLine>) {
        let mut g = lock(&self.inner);
        g.lines = lines;
        g.current = None;
    }

    pub fn reset(&self) {
        self.replace(Vec::new());
    }

    pub fn len(&self) -> usize {
        lock(&self.inner).lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Text of the line currently on screen.
    pub fn current_text(&self) -> Option<String> {
        let g = lock(&self.inner);
        g.current.map(|i| g.lines[i].text.clone())
    }

    /// Move to the last line with `timestamp_ms <= time_ms`, scanning forward only.
    ///
    /// Returns the text to show when the selection changed, the empty string meaning
    /// "before the first line". Returns `None` when nothing changed or no lyrics are loaded.
    pub fn select(&self, time_ms: u64) -> Option<String> {
        let mut g = lock(&self.inner);
        if g.lines.is_empty() {
            return None;
        }

        let start = g.current.unwrap_or(0);
        let mut next = g.current;
        for (i, line) in g.lines.iter().enumerate().skip(start) {
            if line.timestamp_ms > time_ms {
                break;
            }
            next = Some(i);
        }

        if next == g.current {
            return None;
        }
        g.current = next;
        Some(next.map(|i| g.lines[i].text.clone()).unwrap_or_default())
    }
}

/// Fetch the lyric document, retrying transient failures.
///
/// Redirect responses count against `lyric_max_redirects` and are retried like other
/// failures. Setting `stop` aborts between attempts.
pub fn download_lyrics(
    http: &dyn HttpClient,
    url: &str,
    cfg: &StreamConfig,
    stop: &Latch,
) -> Result<String> {
    if url.is_empty() {
        bail!("lyric url is empty");
    }

    let attempts = cfg.lyric_max_retries.max(1);
    let mut redirects = 0;
    for attempt in 1..=attempts {
        if attempt > 1 && stop.wait_timeout(cfg.lyric_retry_backoff()) {
            bail!("lyric download stopped");
        }
        if stop.is_set() {
            bail!("lyric download stopped");
        }

        match fetch_once(http, url, cfg) {
            Ok(Fetch::Body(body)) => {
                tracing::info!(bytes = body.len(), attempt, "lyrics downloaded");
                return Ok(body);
            }
            Ok(Fetch::Redirect(status)) => {
                redirects += 1;
                tracing::warn!(status, attempt, redirects, "lyric request redirected");
                if redirects >= cfg.lyric_max_redirects {
                    bail!("too many redirects fetching lyrics");
                }
            }
            Err(e) => tracing::warn!(attempt, "lyric download attempt failed: {e:#}"),
        }
    }
    bail!("lyric download failed after {attempts} attempts")
}

enum Fetch {
    Body(String),
    Redirect(u16),
}

fn fetch_once(http: &dyn HttpClient, url: &str, cfg: &StreamConfig) -> Result<Fetch> {
    let headers = [
        ("User-Agent", cfg.user_agent.as_str()),
        ("Accept", "application/json"),
    ];
    let mut resp = http
        .get(url, &headers, Some(cfg.lyric_request_timeout()))
        .context("open lyric url")?;
    let status = resp.status();
    if (300..400).contains(&status) {
        return Ok(Fetch::Redirect(status));
    }
    if !(200..300).contains(&status) {
        bail!("unexpected http status {status}");
    }

    let mut body = Vec::new();
    let mut buf = [0u8; 1024];
    loop {
        match resp.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => body.extend_from_slice(&buf[..n]),
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) if !body.is_empty() => {
                tracing::warn!(bytes = body.len(), "lyric read ended with error, keeping data: {e}");
                break;
            }
            Err(e) => return Err(e).context("read lyric body"),
        }
    }
    if body.is_empty() {
        bail!("empty lyric body");
    }
    Ok(Fetch::Body(String::from_utf8_lossy(&body).into_owned()))
}
