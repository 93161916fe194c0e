use std::sync::Mutex;

use crate::{PlaybackState, TrackId};

/// Receives user-facing error messages (the toast surface).
pub trait ErrorReporter: Send + Sync {
    fn report(&self, message: &str);
}

/// Notified about playback transitions so the view can follow along.
pub trait PlaybackObserver: Send + Sync {
    fn state_changed(&self, track: &TrackId, state: PlaybackState);

    /// Called when a track reaches its natural end.
    fn ended(&self, _track: &TrackId) {}
}

/// Reporter that logs every message and remembers the most recent one.
#[derive(Debug, Default)]
pub struct TracingReporter {
    last: Mutex<Option<String>>,
}

impl TracingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Most recent message shown to the user.
    pub fn last_message(&self) -> Option<String> {
        self.last.lock().ok().and_then(|slot| slot.clone())
    }
}

impl ErrorReporter for TracingReporter {
    fn report(&self, message: &str) {
        tracing::error!("{message}");
        if let Ok(mut slot) = self.last.lock() {
            *slot = Some(message.to_string());
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NullObserver;

impl PlaybackObserver for NullObserver {
    fn state_changed(&self, _track: &TrackId, _state: PlaybackState) {}
}
