//! Network → buffer stage.
//!
//! Reads the HTTP body in fixed-size chunks and pushes them into the stream's
//! [`ChunkBuffer`](crate::buffer::ChunkBuffer), waiting there whenever the player falls
//! behind. The buffer is always marked finished on exit so the player can drain it.

use std::io::ErrorKind;
use std::sync::atomic::Ordering;

use anyhow::{Context, Result, bail};

use crate::buffer::AudioChunk;
use crate::config::StreamConfig;
use crate::services::{HttpClient, HttpResponse};
use crate::stream::StreamState;

const PROGRESS_LOG_BYTES: u64 = 256 * 1024;

/// Container guessed from the first bytes of a stream. Diagnostic only.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamFormat {
    Id3TaggedMp3,
    MpegFrame,
    Wav,
    Flac,
    Ogg,
    Unknown([u8; 4]),
}

/// Guess the container from magic bytes; `None` if fewer than four bytes are given.
pub fn sniff_format(head: &[u8]) -> Option<StreamFormat> {
    let magic: [u8; 4] = head.get(..4)?.try_into().ok()?;
    let format = match magic {
        [b'I', b'D', b'3', _] => StreamFormat::Id3TaggedMp3,
        [0xFF, b1, _, _] if b1 & 0xE0 == 0xE0 => StreamFormat::MpegFrame,
        [b'R', b'I', b'F', b'F'] => StreamFormat::Wav,
        [b'f', b'L', b'a', b'C'] => StreamFormat::Flac,
        [b'O', b'g', b'g', b'S'] => StreamFormat::Ogg,
        other => StreamFormat::Unknown(other),
    };
    Some(format)
}

/// Downloader thread body. Never fails: errors are logged and end the download early.
pub(crate) fn run_downloader(
    http: &dyn HttpClient,
    url: &str,
    stream: &StreamState,
    cfg: &StreamConfig,
) {
    match download_stream(http, url, stream, cfg) {
        Ok(total) => tracing::info!(
            generation = stream.generation,
            bytes = total,
            cancelled = stream.is_cancelled(),
            "stream download finished"
        ),
        Err(e) => tracing::error!(
            generation = stream.generation,
            url = %url,
            "stream download failed: {e:#}"
        ),
    }
    stream.downloading.store(false, Ordering::SeqCst);
    stream.buffer.finish();
}

fn download_stream(
    http: &dyn HttpClient,
    url: &str,
    stream: &StreamState,
    cfg: &StreamConfig,
) -> Result<u64> {
    if !url.starts_with("http") {
        bail!("invalid stream url: {url}");
    }

    let headers = [
        ("User-Agent", cfg.user_agent.as_str()),
        ("Accept", "*/*"),
        ("Range", "bytes=0-"),
        ("Accept-Encoding", "identity"),
    ];
    let mut resp = http.get(url, &headers, None).context("open stream")?;
    let status = resp.status();
    if status != 200 && status != 206 {
        bail!("unexpected http status {status}");
    }
    tracing::info!(
        status,
        content_type = resp.header("Content-Type").unwrap_or("-"),
        content_length = resp.header("Content-Length").unwrap_or("-"),
        "stream opened"
    );

    pump_body(&mut resp, stream, cfg.download_chunk_bytes.max(1))
}

fn pump_body(resp: &mut HttpResponse, stream: &StreamState, chunk_bytes: usize) -> Result<u64> {
    let mut buf = vec![0u8; chunk_bytes];
    let mut total = 0u64;
    let mut next_progress = PROGRESS_LOG_BYTES;
    let mut sniffed = false;

    loop {
        if stream.is_cancelled() {
            tracing::debug!(bytes = total, "stream download cancelled");
            break;
        }
        let n = match std::io::Read::read(resp, &mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => {
                tracing::warn!(bytes = total, "stream read failed, treating as truncated: {e}");
                break;
            }
        };

        if !sniffed && n >= 4 {
            sniffed = true;
            match sniff_format(&buf[..n]) {
                Some(StreamFormat::Unknown(magic)) => {
                    tracing::warn!(magic = ?magic, "unrecognised stream format")
                }
                Some(format) => tracing::info!(format = ?format, "stream format detected"),
                None => {}
            }
        }

        if !stream.buffer.push(AudioChunk::from(&buf[..n])) {
            tracing::debug!(bytes = total, "buffer cancelled while downloading");
            break;
        }
        total += n as u64;
        stream.bytes_downloaded.store(total, Ordering::Relaxed);

        if total >= next_progress {
            tracing::info!(
                bytes = total,
                buffered = stream.buffer.len_bytes(),
                "stream download progress"
            );
            next_progress += PROGRESS_LOG_BYTES;
        }
    }
    Ok(total)
}
