/// Result alias that carries the custom [`MusicStreamError`] type.
pub type Result<T> = std::result::Result<T, MusicStreamError>;

/// Common error type for the core crate.
#[derive(Debug, thiserror::Error)]
pub enum MusicStreamError {
    /// The shared audio context could not be created or resumed. Playback
    /// features are disabled but the rest of the application keeps working.
    #[error("audio is unavailable: {0}")]
    AudioUnavailable(String),
    /// A network or decode failure scoped to a single track.
    #[error("failed to load '{track}': {reason}")]
    ResourceLoadFailure { track: String, reason: String },
    /// A media element was about to be wired into the graph a second time.
    #[error("media element for '{track}' is already wired into the audio graph")]
    WiringConflict { track: String },
    /// Internal consistency check of the playback coordinator failed.
    #[error("playback policy violated: {0}")]
    PolicyViolation(String),
    #[error("invalid input: {0}")]
    InvalidInput(&'static str),
    #[error("failed to decode '{path}': {reason}")]
    Decode { path: String, reason: String },
    #[error("{0}")]
    Message(String),
    /// Wrapper around standard IO errors.
    #[error("{0}")]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Json(#[from] serde_json::Error),
}

impl MusicStreamError {
    /// Creates a new error that simply wraps the provided message.
    pub fn msg<T: Into<String>>(msg: T) -> Self {
        Self::Message(msg.into())
    }

    /// Builds a load failure for the given track locator.
    pub fn load_failure(track: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ResourceLoadFailure {
            track: track.into(),
            reason: reason.into(),
        }
    }

    /// Returns `true` when the error disables playback for the whole page
    /// rather than a single track.
    pub fn is_audio_unavailable(&self) -> bool {
        matches!(self, Self::AudioUnavailable(_))
    }
}

impl From<&str> for MusicStreamError {
    fn from(value: &str) -> Self {
        Self::msg(value)
    }
}

impl From<String> for MusicStreamError {
    fn from(value: String) -> Self {
        Self::Message(value)
    }
}
