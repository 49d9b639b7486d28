//! Streaming MP3 playback with time-synced lyrics.
//!
//! [`MusicPlayer`] drives three threads per song: a downloader filling a bounded
//! [`ChunkBuffer`], a player decoding frames from it into mono PCM packets for an
//! [`AudioSink`], and a lyric fetcher. Everything outside the process is reached through
//! the traits in [`services`].

pub mod buffer;
pub mod catalog;
pub mod config;
pub mod decode;
pub mod downloader;
pub mod frame;
pub mod http;
pub mod lyrics;
pub mod pcm;
pub mod services;
pub mod status;
pub mod window;
pub mod worker;

mod player;
mod session;
mod stream;

#[cfg(test)]
pub(crate) mod testing;

pub use buffer::{AudioChunk, ChunkBuffer};
pub use catalog::{CatalogConfig, HttpSongCatalog};
pub use config::StreamConfig;
pub use http::UreqHttpClient;
pub use services::{
    AudioPacket, AudioSink, Capabilities, DeviceActivity, DeviceStateSource, Display, HttpClient,
    HttpResponse, ResolvedTrack, SearchResponse, SongCatalog,
};
pub use session::MusicPlayer;
pub use status::PlayerStatus;
