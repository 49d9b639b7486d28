use std::path::PathBuf;

use clap::{Parser, Subcommand};

const VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("GIT_SHA"),
    ", ",
    env!("BUILD_DATE"),
    ")"
);

#[derive(Parser, Debug)]
#[command(name = "music-player", version = VERSION)]
pub struct Args {
    #[command(subcommand)]
    pub cmd: Option<Command>,

    /// List output devices and exit
    #[arg(long)]
    pub list_devices: bool,

    /// TOML config with [stream], [catalog] and [output] tables
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Use a specific output device by substring match
    #[arg(long)]
    pub device: Option<String>,

    /// Output queue target in seconds
    #[arg(long)]
    pub buffer_seconds: Option<f32>,

    /// Exit after the first song instead of following recommendations
    #[arg(long)]
    pub once: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Search the catalog for a song and play it
    Play {
        /// Song name, e.g. "artist title"
        song: String,
    },

    /// Play an MP3 stream URL directly
    Stream {
        url: String,
    },
}
