use std::{fmt, path::PathBuf};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::{ErrorReporter, MusicStreamError, Result};

/// Identity of a track. The source locator doubles as the coordination key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrackId(String);

impl TrackId {
    /// Wraps a locator as an identity.
    pub fn new(locator: impl Into<String>) -> Self {
        Self(locator.into())
    }
}

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Immutable description of a streamable track.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Track {
    pub title: String,
    pub source: String,
    pub created_at: NaiveDate,
}

impl Track {
    pub fn new(title: impl Into<String>, source: impl Into<String>, created_at: NaiveDate) -> Self {
        Self {
            title: title.into(),
            source: source.into(),
            created_at,
        }
    }

    /// Tracks are identified by their locator.
    pub fn id(&self) -> TrackId {
        TrackId::new(self.source.clone())
    }
}

/// Supplies the list of tracks shown to the user.
pub trait TrackSource {
    fn list(&self) -> Result<Vec<Track>>;
}

/// Lists tracks, turning any failure into an empty list plus one report so
/// the caller never has to deal with a missing catalog.
pub fn load_tracks(source: &dyn TrackSource, reporter: &dyn ErrorReporter) -> Vec<Track> {
    match source.list() {
        Ok(tracks) => {
            tracing::debug!(count = tracks.len(), "loaded track list");
            tracks
        }
        Err(err) => {
            reporter.report(&format!("Error fetching songs: {err}"));
            Vec::new()
        }
    }
}

/// In-memory catalog.
#[derive(Debug, Clone, Default)]
pub struct StaticCatalog {
    tracks: Vec<Track>,
}

impl StaticCatalog {
    pub fn new(tracks: Vec<Track>) -> Self {
        Self { tracks }
    }

    /// The demo songs bundled with the player, resolved against `base_url`.
    pub fn sample(base_url: &str) -> Self {
        const SONGS: [(&str, &str, (i32, u32, u32)); 4] = [
            ("Summer Vibes", "songs/Back%20to%20the%2090%27s.mp3", (2023, 6, 15)),
            ("Chill Beats", "songs/Drowning%20in%20a%20Sea%20of%20Bills.mp3", (2023, 5, 22)),
            ("Rock Anthem", "songs/Playground%20of%20Hearts.mp3", (2023, 7, 1)),
            ("Acoustic Dreams", "songs/The%20Secret%20of%20the%20Boy.mp3", (2023, 6, 30)),
        ];

        let tracks = SONGS
            .iter()
            .filter_map(|(title, url, (y, m, d))| {
                NaiveDate::from_ymd_opt(*y, *m, *d)
                    .map(|date| Track::new(*title, format!("{base_url}{url}"), date))
            })
            .collect();
        Self { tracks }
    }
}

impl TrackSource for StaticCatalog {
    fn list(&self) -> Result<Vec<Track>> {
        Ok(self.tracks.clone())
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CatalogEntry {
    title: String,
    url: String,
    date_created: NaiveDate,
}

/// Catalog backed by a `songs.json` file. Each entry's `url` is relative to
/// `base_url`.
#[derive(Debug, Clone)]
pub struct JsonCatalog {
    path: PathBuf,
    base_url: String,
}

impl JsonCatalog {
    /// Reads `path`, prefixing every song url with `base_url`.
    pub fn new(path: impl Into<PathBuf>, base_url: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            base_url: base_url.into(),
        }
    }
}

impl TrackSource for JsonCatalog {
    fn list(&self) -> Result<Vec<Track>> {
        let text = std::fs::read_to_string(&self.path).map_err(|err| {
            MusicStreamError::msg(format!(
                "failed to read catalog '{}': {err}",
                self.path.display()
            ))
        })?;
        let entries: Vec<CatalogEntry> = serde_json::from_str(&text)?;

        Ok(entries
            .into_iter()
            .map(|entry| {
                Track::new(
                    entry.title,
                    format!("{}{}", self.base_url, entry.url),
                    entry.date_created,
                )
            })
            .collect())
    }
}

/// Formats seconds as `m:ss`.
pub fn format_time(seconds: f64) -> String {
    let seconds = if seconds.is_finite() { seconds.max(0.0) } else { 0.0 };
    let minutes = (seconds / 60.0).floor() as u64;
    let rest = (seconds % 60.0).floor() as u64;
    format!("{minutes}:{rest:02}")
}
