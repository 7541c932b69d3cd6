//! SongPod peer: serves local songs to other peers, talks to the tracker and plays
//! songs streamed from other peers.

pub mod audio;
pub mod commands;
pub mod config;
pub mod conn;
pub mod handler;
pub mod library;
pub mod playback;
pub mod server;
pub mod tracker;

pub use config::Config;
pub use playback::{PlaybackController, PlaybackEvent, PlaybackState};
pub use server::{Server, ServerConfig};
pub use tracker::TrackerClient;
