//! Core library for the Music Stream player.
//!
//! Each module owns one part of the playback widget: the shared audio graph,
//! per-track playback sessions, the coordinator that enforces exclusive
//! playback, the frequency visualisation loop and the song list that ties
//! them together. Platform specifics sit behind the [`graph::AudioBackend`]
//! and [`media::MediaElement`] traits; [`audio`] provides a native
//! implementation of both.

pub mod analysis;
pub mod audio;
pub mod catalog;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod graph;
pub mod media;
pub mod observer;
pub mod session;
pub mod songlist;
pub mod timeline;
pub mod visualizer;

#[cfg(test)]
mod testing;

pub use analysis::Analyser;
pub use catalog::{format_time, load_tracks, JsonCatalog, StaticCatalog, Track, TrackId, TrackSource};
pub use config::{AppConfig, AudioConfig, PlaybackConfig, Settings, VisualizerConfig};
pub use coordinator::{PlaybackCoordinator, Preemptible};
pub use error::{MusicStreamError, Result};
pub use graph::{AudioGraph, ContextInfo, ContextState};
pub use observer::{ErrorReporter, NullObserver, PlaybackObserver, TracingReporter};
pub use session::{PlaybackSession, PlaybackState, Progress, SessionContext};
pub use songlist::SongList;
pub use timeline::FrameClock;
pub use visualizer::{bar_color, bar_layout, Bar, LoopStatus, Painter, Rgb, Theme, VisualizationLoop};
