use std::path::Path;

use anyhow::{Context, Result};
use audio_output::OutputConfig;
use music_stream::{CatalogConfig, StreamConfig};
use serde::Deserialize;

use crate::cli::Args;

/// Everything the binary can be tuned with; every table is optional.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub stream: StreamConfig,
    pub catalog: CatalogConfig,
    pub output: OutputConfig,
}

impl AppConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw =
            std::fs::read_to_string(path).with_context(|| format!("read config {:?}", path))?;
        Self::parse(&raw).with_context(|| format!("parse config {:?}", path))
    }

    fn parse(raw: &str) -> Result<Self> {
        Ok(toml::from_str::<AppConfig>(raw)?)
    }

    /// Config file (when given) with command-line overrides applied.
    pub fn resolve(args: &Args) -> Result<Self> {
        let mut cfg = match args.config.as_deref() {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };
        if let Some(device) = args.device.as_ref() {
            cfg.output.device = Some(device.clone());
        }
        if let Some(secs) = args.buffer_seconds {
            cfg.output.buffer_seconds = secs;
        }
        Ok(cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn partial_tables_keep_defaults() {
        let cfg = AppConfig::parse(
            r#"
            [output]
            device = "usb"

            [catalog]
            max_resolve_bytes = 2048
            "#,
        )
        .unwrap();
        assert_eq!(cfg.output.device.as_deref(), Some("usb"));
        assert_eq!(cfg.output.packet_queue, OutputConfig::default().packet_queue);
        assert_eq!(cfg.catalog.max_resolve_bytes, 2048);
        assert_eq!(
            cfg.stream.max_buffer_bytes,
            StreamConfig::default().max_buffer_bytes
        );
    }

    #[test]
    fn cli_overrides_output_settings() {
        let args = Args::parse_from([
            "music-player",
            "--device",
            "speakers",
            "--buffer-seconds",
            "0.5",
            "stream",
            "http://example.com/a.mp3",
        ]);
        let cfg = AppConfig::resolve(&args).unwrap();
        assert_eq!(cfg.output.device.as_deref(), Some("speakers"));
        assert_eq!(cfg.output.buffer_seconds, 0.5);
    }

    #[test]
    fn unknown_value_types_are_rejected() {
        assert!(AppConfig::parse("[output]\npacket_queue = \"many\"").is_err());
    }
}
