//! Music Player: search a song catalog or take a stream URL, and play the MP3 stream
//! through the local output device while printing synced lyrics.
//!
//! ## Pipeline
//! 1. **Download**: a background thread pulls the HTTP stream into a bounded byte buffer.
//! 2. **Decode**: the player thread finds MPEG frames and decodes them to 16-bit packets.
//! 3. **Output**: packets are resampled to the device rate and played via CPAL.
//!
//! When a song ends on its own, the first recommended song from its lyric metadata starts
//! next unless `--once` is given.

mod cli;
mod config;
mod console;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use audio_output::CpalSink;
use clap::Parser;
use crossbeam_channel::{Receiver, select};
use music_stream::{Capabilities, HttpClient, HttpSongCatalog, MusicPlayer, UreqHttpClient};
use tracing_subscriber::EnvFilter;

use crate::config::AppConfig;
use crate::console::{AlwaysIdle, LogDisplay};

const POLL: Duration = Duration::from_millis(250);
/// Idle time tolerated between songs while the next one is searched and resolved.
const IDLE_GRACE: Duration = Duration::from_secs(10);
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, PartialEq, Eq)]
enum Outcome {
    Finished,
    Interrupted,
}

fn main() -> Result<()> {
    let args = cli::Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("info,music_player=info,music_stream=info")
        }))
        .init();

    if args.list_devices {
        audio_output::device::list_devices(&cpal::default_host())?;
        return Ok(());
    }
    let Some(cmd) = args.cmd.as_ref() else {
        bail!("nothing to play; use `play <song>` or `stream <url>`");
    };

    let cfg = AppConfig::resolve(&args)?;
    let http: Arc<dyn HttpClient> = Arc::new(UreqHttpClient::new(&cfg.stream));
    let sink = Arc::new(CpalSink::open(cfg.output.clone()).context("open audio output")?);
    tracing::info!(device = %sink.device_name(), "output device");
    let catalog = Arc::new(HttpSongCatalog::new(http.clone(), cfg.catalog.clone()));
    let caps = Capabilities::new(
        http,
        sink.clone(),
        Arc::new(AlwaysIdle),
        Arc::new(LogDisplay::default()),
        catalog,
    );
    let player = MusicPlayer::new(caps, cfg.stream.clone())?;

    let (stop_tx, stop_rx) = crossbeam_channel::bounded(1);
    if let Err(e) = ctrlc::set_handler(move || {
        let _ = stop_tx.try_send(());
    }) {
        tracing::warn!("Ctrl-C handler not installed: {e}");
    }

    let started = match cmd {
        cli::Command::Play { song } => player.download(song),
        cli::Command::Stream { url } => player.start_streaming(url),
    };
    if !started {
        bail!("could not start playback: {}", player.download_result());
    }

    let outcome = wait_for_playback(&player, &stop_rx, args.once);
    player.stop();
    if outcome == Outcome::Finished && !sink.wait_drained(DRAIN_TIMEOUT) {
        tracing::warn!("output did not drain before exit");
    }
    let (events, frames) = sink.underruns();
    if events > 0 {
        tracing::info!(events, frames, "output underruns");
    }
    tracing::info!(?outcome, "done");
    Ok(())
}

fn wait_for_playback(player: &MusicPlayer, stop: &Receiver<()>, once: bool) -> Outcome {
    let ticker = crossbeam_channel::tick(POLL);
    let first_generation = player.status().generation;
    let mut idle = Duration::ZERO;

    loop {
        select! {
            recv(stop) -> _ => {
                tracing::info!("interrupted");
                return Outcome::Interrupted;
            }
            recv(ticker) -> _ => {
                let status = player.status();
                if once && status.generation != first_generation {
                    return Outcome::Finished;
                }
                if status.playing || status.downloading {
                    idle = Duration::ZERO;
                } else {
                    idle += POLL;
                    if once || idle >= IDLE_GRACE {
                        if let Ok(json) = serde_json::to_string(&status) {
                            tracing::debug!(status = %json, "player idle");
                        }
                        return Outcome::Finished;
                    }
                }
            }
        }
    }
}
