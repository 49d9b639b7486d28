//! [`SongCatalog`] over templated HTTP endpoints.
//!
//! `{query}` in the search template is replaced by the URL-encoded song name, `{id}` in the
//! resolve and lyric templates by the track id.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use serde::Deserialize;
use serde_json::Value;

use crate::http::read_body_capped;
use crate::services::{HttpClient, ResolvedTrack, SearchResponse, SongCatalog};

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    pub search_url_template: String,
    pub resolve_url_template: String,
    pub lyric_url_template: String,
    pub user_agent: String,
    /// Larger search responses are rejected, not parsed partially.
    pub max_search_bytes: usize,
    pub max_resolve_bytes: usize,
    /// Whole-call limit for search and resolve requests, body included.
    pub request_timeout_ms: u64,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            search_url_template: "https://search.kuwo.cn/r.s?pn=0&rn=3&all={query}&ft=music\
                &newsearch=1&alflac=1&itemset=web_2013&client=kt&cluster=0&vermerge=1\
                &rformat=json&encoding=utf8&show_copyright_off=1&pcmp4=1&ver=mbox&plat=pc\
                &vipver=MUSIC_9.1.1.2_BCS2&devid=38668888&newver=1&issubtitle=1&pcjson=1"
                .to_string(),
            resolve_url_template:
                "https://antiserver.kuwo.cn/anti.s?type=convert_url&rid={id}&format=mp3&response=url"
                    .to_string(),
            lyric_url_template: "https://www.kuwo.cn/newh5/singles/songinfoandlrc?musicId={id}"
                .to_string(),
            user_agent: "music-player/0.1".to_string(),
            max_search_bytes: 128 * 1024,
            max_resolve_bytes: 4 * 1024,
            request_timeout_ms: 10_000,
        }
    }
}

pub struct HttpSongCatalog {
    http: Arc<dyn HttpClient>,
    cfg: CatalogConfig,
}

impl HttpSongCatalog {
    pub fn new(http: Arc<dyn HttpClient>, cfg: CatalogConfig) -> Self {
        Self { http, cfg }
    }

    fn fetch_text(&self, url: &str, cap: usize) -> Result<String> {
        let headers = [
            ("User-Agent", self.cfg.user_agent.as_str()),
            ("Accept", "*/*"),
        ];
        let timeout = Duration::from_millis(self.cfg.request_timeout_ms);
        let mut resp = self.http.get(url, &headers, Some(timeout))?;
        let status = resp.status();
        if !(200..300).contains(&status) {
            bail!("unexpected http status {status}");
        }
        let body = read_body_capped(&mut resp, cap)?;
        Ok(String::from_utf8_lossy(&body).into_owned())
    }
}

impl SongCatalog for HttpSongCatalog {
    fn search(&self, song_name: &str) -> Result<SearchResponse> {
        let url = self
            .cfg
            .search_url_template
            .replace("{query}", &urlencoding::encode(song_name));
        tracing::debug!(url = %url, "searching catalog");
        let raw = self
            .fetch_text(&url, self.cfg.max_search_bytes)
            .context("song search")?;
        let track_id = first_track_id(&raw);
        if track_id.is_none() {
            tracing::warn!(song = %song_name, "search returned no usable track id");
        }
        Ok(SearchResponse { raw, track_id })
    }

    fn resolve(&self, track_id: &str) -> Result<ResolvedTrack> {
        if track_id.is_empty() {
            bail!("track id is empty");
        }
        let url = self.cfg.resolve_url_template.replace("{id}", track_id);
        let body = self
            .fetch_text(&url, self.cfg.max_resolve_bytes)
            .context("resolve track")?;
        let stream_url =
            parse_stream_url(&body).ok_or_else(|| anyhow!("no stream url in resolver response"))?;
        Ok(ResolvedTrack {
            stream_url,
            lyric_url: self.cfg.lyric_url_template.replace("{id}", track_id),
        })
    }
}

#[derive(Deserialize)]
struct SearchDocument {
    #[serde(default)]
    abslist: Vec<Value>,
}

/// `DC_TARGETID` of the first hit; numeric ids are accepted too.
pub fn first_track_id(raw: &str) -> Option<String> {
    let doc: SearchDocument = serde_json::from_str(raw).ok()?;
    let id = match doc.abslist.first()?.get("DC_TARGETID")? {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    (!id.is_empty()).then_some(id)
}

/// Stream URL from a resolver body: a `url=` line wins, else the first bare http line.
pub fn parse_stream_url(body: &str) -> Option<String> {
    let lines = || body.lines().map(str::trim);
    lines()
        .find_map(|l| l.strip_prefix("url="))
        .filter(|u| u.starts_with("http"))
        .or_else(|| lines().find(|l| l.starts_with("http")))
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Route, RouteHttp};

    fn catalog(http: RouteHttp, cap: usize) -> HttpSongCatalog {
        HttpSongCatalog::new(
            Arc::new(http),
            CatalogConfig {
                search_url_template: "http://search.test/?q={query}".to_string(),
                resolve_url_template: "http://resolve.test/?rid={id}".to_string(),
                lyric_url_template: "http://lyric.test/?id={id}".to_string(),
                max_search_bytes: cap,
                ..CatalogConfig::default()
            },
        )
    }

    #[test]
    fn first_hit_id_is_extracted() {
        assert_eq!(
            first_track_id(r#"{"abslist":[{"DC_TARGETID":"123"},{"DC_TARGETID":"456"}]}"#),
            Some("123".to_string())
        );
        assert_eq!(
            first_track_id(r#"{"abslist":[{"DC_TARGETID":789}]}"#),
            Some("789".to_string())
        );
        assert_eq!(first_track_id(r#"{"abslist":[]}"#), None);
        assert_eq!(first_track_id(r#"{"abslist":[{"DC_TARGETID":""}]}"#), None);
        assert_eq!(first_track_id("not json"), None);
    }

    #[test]
    fn stream_url_from_either_body_shape() {
        let keyed = "format=mp3\nbitrate=128\nurl=http://cdn.test/a.mp3\nsig=1";
        assert_eq!(parse_stream_url(keyed), Some("http://cdn.test/a.mp3".to_string()));
        assert_eq!(
            parse_stream_url("  https://cdn.test/b.mp3 \n"),
            Some("https://cdn.test/b.mp3".to_string())
        );
        assert_eq!(parse_stream_url("res=failed"), None);
    }

    #[test]
    fn search_encodes_query() {
        let http = RouteHttp::default().with(
            "http://search.test/?q=hello%20world",
            Route::Bytes(200, br#"{"abslist":[{"DC_TARGETID":"77"}]}"#.to_vec()),
        );
        let result = catalog(http, 1024).search("hello world").unwrap();
        assert_eq!(result.track_id.as_deref(), Some("77"));
        assert!(result.raw.contains("abslist"));
    }

    #[test]
    fn catalog_requests_carry_a_call_timeout() {
        let http = Arc::new(RouteHttp::default().with(
            "http://resolve.test/?rid=5",
            Route::Bytes(200, b"http://cdn.test/5.mp3".to_vec()),
        ));
        let c = HttpSongCatalog::new(
            http.clone(),
            CatalogConfig {
                resolve_url_template: "http://resolve.test/?rid={id}".to_string(),
                request_timeout_ms: 250,
                ..CatalogConfig::default()
            },
        );
        c.resolve("5").unwrap();
        assert_eq!(
            http.timeout_for("http://resolve.test/?rid=5"),
            Some(Some(Duration::from_millis(250)))
        );
    }

    #[test]
    fn oversized_search_response_is_an_error() {
        let body = format!(r#"{{"abslist":[{{"DC_TARGETID":"1"}}],"pad":"{}"}}"#, "x".repeat(2000));
        let http = RouteHttp::default().with("http://search.test/?q=x", Route::Bytes(200, body.into_bytes()));
        assert!(catalog(http, 1024).search("x").is_err());
    }

    #[test]
    fn search_error_status_fails() {
        let http = RouteHttp::default().with("http://search.test/?q=x", Route::Bytes(503, Vec::new()));
        assert!(catalog(http, 1024).search("x").is_err());
    }

    #[test]
    fn resolve_fills_both_urls() {
        let http = RouteHttp::default().with(
            "http://resolve.test/?rid=42",
            Route::Bytes(200, b"http://cdn.test/42.mp3\r\n".to_vec()),
        );
        let track = catalog(http, 1024).resolve("42").unwrap();
        assert_eq!(track.stream_url, "http://cdn.test/42.mp3");
        assert_eq!(track.lyric_url, "http://lyric.test/?id=42");
    }

    #[test]
    fn resolve_rejects_empty_id_and_bad_body() {
        let http = RouteHttp::default().with("http://resolve.test/?rid=1", Route::Bytes(200, b"nope".to_vec()));
        let c = catalog(http, 1024);
        assert!(c.resolve("").is_err());
        assert!(c.resolve("1").is_err());
    }
}
