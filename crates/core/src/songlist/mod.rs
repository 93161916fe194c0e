use std::sync::Arc;

use crate::{
    media::MediaElement, AudioGraph, ErrorReporter, MusicStreamError, Painter,
    PlaybackCoordinator, PlaybackObserver, PlaybackSession, PlaybackState, Result,
    SessionContext, Settings, Theme, Track, TrackId, VisualizerConfig,
};

/// Application-scoped owner of the shared graph, the coordinator and one
/// session per mounted track.
pub struct SongList {
    ctx: SessionContext,
    sessions: Vec<PlaybackSession>,
}

impl SongList {
    /// Builds the list around a shared graph. The coordinator starts under
    /// the policy in `settings`.
    pub fn new(
        graph: AudioGraph,
        settings: Settings,
        reporter: Arc<dyn ErrorReporter>,
        observer: Arc<dyn PlaybackObserver>,
        visualizer: VisualizerConfig,
    ) -> Self {
        Self {
            ctx: SessionContext {
                graph,
                coordinator: PlaybackCoordinator::new(settings.exclusive_playback),
                reporter,
                observer,
                visualizer,
            },
            sessions: Vec::new(),
        }
    }

    /// Creates the session for `track`. Each track may be mounted once.
    pub fn mount(
        &mut self,
        track: Track,
        element: Box<dyn MediaElement>,
        painter: Box<dyn Painter>,
    ) -> Result<()> {
        let id = track.id();
        if self.position(&id).is_some() {
            return Err(MusicStreamError::InvalidInput("track is already mounted"));
        }
        tracing::debug!(track = %id, title = %track.title, "mounting track");
        self.sessions
            .push(PlaybackSession::new(track, element, painter, self.ctx.clone()));
        Ok(())
    }

    /// Tears down and removes the session of `track`.
    pub fn unmount(&mut self, track: &TrackId) -> bool {
        match self.position(track) {
            Some(index) => {
                let mut session = self.sessions.remove(index);
                session.teardown();
                true
            }
            None => false,
        }
    }

    /// Forwards a play/pause request to the session of `track`.
    pub fn toggle(&mut self, track: &TrackId) -> Result<()> {
        let index = self
            .position(track)
            .ok_or(MusicStreamError::InvalidInput("track is not mounted"))?;
        self.sessions[index].toggle();
        Ok(())
    }

    /// Reacts to a change of the externally owned settings.
    pub fn apply_settings(&mut self, settings: &Settings) -> Result<()> {
        self.ctx.coordinator.set_policy(settings.exclusive_playback)
    }

    /// One frame: deliver element events, then paint every active loop.
    pub fn frame(&mut self, theme: Theme) {
        for session in &mut self.sessions {
            session.pump_events();
        }
        for session in &mut self.sessions {
            session.render_frame(theme);
        }
    }

    /// The session mounted for `track`, if any.
    pub fn session(&self, track: &TrackId) -> Option<&PlaybackSession> {
        self.sessions.iter().find(|session| session.id() == track)
    }

    /// Sessions in mount order.
    pub fn sessions(&self) -> &[PlaybackSession] {
        &self.sessions
    }

    pub fn state(&self, track: &TrackId) -> Option<PlaybackState> {
        self.session(track).map(PlaybackSession::state)
    }

    /// Snapshot of every session's state, in mount order.
    pub fn states(&self) -> Vec<(TrackId, PlaybackState)> {
        self.sessions
            .iter()
            .map(|session| (session.id().clone(), session.state()))
            .collect()
    }

    /// `true` once nothing is playing or loading.
    pub fn is_quiet(&self) -> bool {
        self.sessions.iter().all(|session| {
            !matches!(
                session.state(),
                PlaybackState::Playing | PlaybackState::Loading
            )
        })
    }

    pub fn coordinator(&self) -> &PlaybackCoordinator {
        &self.ctx.coordinator
    }

    pub fn graph(&self) -> &AudioGraph {
        &self.ctx.graph
    }

    fn position(&self, track: &TrackId) -> Option<usize> {
        self.sessions.iter().position(|session| session.id() == track)
    }
}

impl Drop for SongList {
    fn drop(&mut self) {
        for session in &mut self.sessions {
            session.teardown();
        }
    }
}
