//! Blocking HTTP transport backed by `ureq`.

use std::io::{ErrorKind, Read};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};

use crate::config::StreamConfig;
use crate::services::{HttpClient, HttpResponse};

/// [`HttpClient`] over a shared `ureq` agent.
///
/// The agent sets only connect and response-header timeouts, so a long stream body is never
/// cut off mid-song; short requests add a whole-call timeout per request. Status codes are
/// handed back to the caller rather than turned into errors.
pub struct UreqHttpClient {
    agent: ureq::Agent,
}

impl UreqHttpClient {
    pub fn new(cfg: &StreamConfig) -> Self {
        let config = ureq::Agent::config_builder()
            .timeout_connect(Some(Duration::from_millis(cfg.http_connect_timeout_ms)))
            .timeout_recv_response(Some(Duration::from_millis(cfg.http_response_timeout_ms)))
            .http_status_as_error(false)
            .user_agent(cfg.user_agent.as_str())
            .build();
        Self {
            agent: ureq::Agent::new_with_config(config),
        }
    }
}

impl HttpClient for UreqHttpClient {
    fn get(
        &self,
        url: &str,
        headers: &[(&str, &str)],
        timeout: Option<Duration>,
    ) -> Result<HttpResponse> {
        let mut req = match timeout {
            Some(timeout) => self
                .agent
                .get(url)
                .config()
                .timeout_global(Some(timeout))
                .build(),
            None => self.agent.get(url),
        };
        for (name, value) in headers {
            req = req.header(*name, *value);
        }
        let resp = req.call().with_context(|| format!("GET {url}"))?;

        let status = resp.status().as_u16();
        let headers = resp
            .headers()
            .iter()
            .filter_map(|(k, v)| {
                v.to_str()
                    .ok()
                    .map(|v| (k.as_str().to_string(), v.to_string()))
            })
            .collect();
        let (_, body) = resp.into_parts();
        Ok(HttpResponse::new(
            status,
            headers,
            Box::new(body.into_reader()),
        ))
    }
}

/// Read a whole response body, failing if it grows past `cap` bytes.
///
/// A body over the cap is treated as an error instead of being parsed partially.
pub fn read_body_capped(resp: &mut HttpResponse, cap: usize) -> Result<Vec<u8>> {
    let mut body = Vec::new();
    let mut buf = [0u8; 4096];
    loop {
        let n = match resp.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e).context("read response body"),
        };
        if body.len() + n > cap {
            return Err(anyhow!("response body exceeds {cap} bytes"));
        }
        body.extend_from_slice(&buf[..n]);
    }
    Ok(body)
}
