//! Per-track playback sessions.
//!
//! A [`PlaybackSession`] owns one media element and walks it through
//! `Idle -> Loading -> Playing <-> Paused`. Transitions within a session are
//! strictly sequential: a toggle that arrives while a load is in flight is
//! ignored, and every suspension point (context resume, ready signal, play
//! start) either lands in `Playing` or falls back to `Idle`/`Paused`.

use std::{
    fmt,
    sync::{
        atomic::{AtomicU8, Ordering},
        Arc, Mutex, MutexGuard, Weak,
    },
};

use serde::Serialize;

use crate::{
    media::{MediaElement, MediaEvent, Subscription},
    Analyser, AudioGraph, ErrorReporter, LoopStatus, MusicStreamError, Painter, PlaybackCoordinator,
    PlaybackObserver, Preemptible, Result, Theme, Track, TrackId, VisualizationLoop,
    VisualizerConfig,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackState {
    Idle = 0,
    Loading = 1,
    Playing = 2,
    Paused = 3,
}

impl PlaybackState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => PlaybackState::Loading,
            2 => PlaybackState::Playing,
            3 => PlaybackState::Paused,
            _ => PlaybackState::Idle,
        }
    }

    /// Whether audio is audible for this state.
    pub fn is_playing(self) -> bool {
        self == PlaybackState::Playing
    }
}

/// Duration and elapsed time of the current track, in seconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Progress {
    /// Unknown until metadata has loaded.
    pub duration: Option<f64>,
    pub elapsed: f64,
}

impl Progress {
    /// Remaining seconds, once the duration is known.
    pub fn time_left(&self) -> Option<f64> {
        self.duration
            .map(|duration| (duration - self.elapsed).max(0.0))
    }
}

/// Collaborators injected into every session.
#[derive(Clone)]
pub struct SessionContext {
    pub graph: AudioGraph,
    pub coordinator: PlaybackCoordinator,
    pub reporter: Arc<dyn ErrorReporter>,
    pub observer: Arc<dyn PlaybackObserver>,
    pub visualizer: VisualizerConfig,
}

/// The part of a session the coordinator can reach.
struct SessionShared {
    track: TrackId,
    state: AtomicU8,
    element: Mutex<Box<dyn MediaElement>>,
    observer: Arc<dyn PlaybackObserver>,
}

impl SessionShared {
    fn state(&self) -> PlaybackState {
        PlaybackState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn set_state(&self, next: PlaybackState) {
        let previous = PlaybackState::from_u8(self.state.swap(next as u8, Ordering::SeqCst));
        if previous != next {
            tracing::debug!(track = %self.track, ?previous, ?next, "playback state changed");
            self.observer.state_changed(&self.track, next);
        }
    }

    fn lock_element(&self) -> Result<MutexGuard<'_, Box<dyn MediaElement>>> {
        self.element
            .lock()
            .map_err(|_| MusicStreamError::msg("media element has been poisoned"))
    }
}

impl Preemptible for SessionShared {
    fn track_id(&self) -> &TrackId {
        &self.track
    }

    fn is_playing(&self) -> bool {
        self.state().is_playing()
    }

    fn force_pause(&self) {
        if !self.is_playing() {
            return;
        }
        match self.lock_element() {
            Ok(mut element) => element.pause(),
            Err(err) => tracing::error!(track = %self.track, error = %err, "cannot pause element"),
        }
        self.set_state(PlaybackState::Paused);
    }
}

/// Playback state and resources of one mounted track.
pub struct PlaybackSession {
    track: Track,
    shared: Arc<SessionShared>,
    ctx: SessionContext,
    subscription: Option<Subscription>,
    progress: Progress,
    ready: bool,
    painter: Option<Box<dyn Painter>>,
    visualization: Option<VisualizationLoop>,
    torn_down: bool,
}

impl PlaybackSession {
    /// Creates the session, subscribes to its element and registers it with
    /// the coordinator.
    pub fn new(
        track: Track,
        element: Box<dyn MediaElement>,
        painter: Box<dyn Painter>,
        ctx: SessionContext,
    ) -> Self {
        let subscription = element.events().subscribe();
        let shared = Arc::new(SessionShared {
            track: track.id(),
            state: AtomicU8::new(PlaybackState::Idle as u8),
            element: Mutex::new(element),
            observer: ctx.observer.clone(),
        });

        let weak: Weak<SessionShared> = Arc::downgrade(&shared);
        if let Err(err) = ctx.coordinator.register(weak) {
            tracing::error!(track = %shared.track, error = %err, "failed to register session");
        }

        Self {
            track,
            shared,
            ctx,
            subscription: Some(subscription),
            progress: Progress::default(),
            ready: false,
            painter: Some(painter),
            visualization: None,
            torn_down: false,
        }
    }

    /// The catalog entry this session plays.
    pub fn track(&self) -> &Track {
        &self.track
    }

    /// Identity shared with the graph and the coordinator.
    pub fn id(&self) -> &TrackId {
        &self.shared.track
    }

    /// Current state. Also readable by the coordinator.
    pub fn state(&self) -> PlaybackState {
        self.shared.state()
    }

    /// Duration and elapsed time as last reported by the element.
    pub fn progress(&self) -> Progress {
        self.progress
    }

    /// `true` while a visualisation loop is painting.
    pub fn is_visualizing(&self) -> bool {
        self.visualization
            .as_ref()
            .map(VisualizationLoop::is_running)
            .unwrap_or(false)
    }

    /// Play/pause request from the user.
    pub fn toggle(&mut self) {
        if self.torn_down {
            return;
        }

        match self.state() {
            PlaybackState::Loading => {
                tracing::debug!(track = %self.id(), "toggle ignored while loading");
            }
            PlaybackState::Playing => self.pause(),
            PlaybackState::Idle | PlaybackState::Paused => {
                if let Err(err) = self.ctx.graph.acquire_context() {
                    self.report(&err);
                    return;
                }
                if self.ready && self.state() == PlaybackState::Paused {
                    self.start_playback();
                } else {
                    self.begin_loading();
                }
            }
        }
    }

    /// Drains pending element events and applies them in order.
    pub fn pump_events(&mut self) -> usize {
        let events = match self.subscription.as_ref() {
            Some(subscription) => subscription.drain(),
            None => return 0,
        };
        let count = events.len();
        for event in events {
            self.handle_event(event);
        }
        count
    }

    /// Applies one element event to the state machine.
    pub fn handle_event(&mut self, event: MediaEvent) {
        if self.torn_down {
            return;
        }

        match event {
            MediaEvent::LoadedMetadata { duration } => {
                self.progress = Progress {
                    duration: Some(duration),
                    elapsed: 0.0,
                };
            }
            MediaEvent::CanPlayThrough => {
                self.ready = true;
                if self.state() == PlaybackState::Loading {
                    self.start_playback();
                }
            }
            MediaEvent::TimeUpdate { current_time } => {
                self.progress.elapsed = current_time;
            }
            MediaEvent::Ended => self.finish(),
            MediaEvent::Error(reason) => {
                let err = MusicStreamError::load_failure(self.track.source.clone(), reason);
                self.report(&err);
                self.ready = false;
                match self.state() {
                    PlaybackState::Loading => self.shared.set_state(PlaybackState::Idle),
                    PlaybackState::Playing => self.pause(),
                    PlaybackState::Idle | PlaybackState::Paused => {}
                }
            }
        }
    }

    /// Runs one visualisation frame if a loop is active.
    pub fn render_frame(&mut self, theme: Theme) {
        let status = match self.visualization.as_mut() {
            Some(visualization) => visualization.frame(theme),
            None => return,
        };

        match status {
            Ok(LoopStatus::Painted) => {}
            Ok(LoopStatus::Stopped) => self.park_visualization(),
            Err(err) => {
                tracing::warn!(track = %self.id(), error = %err, "visualisation frame failed");
                self.park_visualization();
            }
        }
    }

    /// Stops everything and returns the session to `Idle`. Safe to call more
    /// than once.
    pub fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;

        self.park_visualization();
        if self.state() == PlaybackState::Playing {
            if let Ok(mut element) = self.shared.lock_element() {
                element.pause();
            }
        }
        self.subscription = None;

        let id = self.shared.track.clone();
        if let Err(err) = self.ctx.coordinator.request_pause(&id) {
            tracing::warn!(track = %id, error = %err, "failed to release playback priority");
        }
        if let Err(err) = self.ctx.coordinator.unregister(&id) {
            tracing::warn!(track = %id, error = %err, "failed to unregister session");
        }
        if let Err(err) = self.ctx.graph.release(&id) {
            tracing::warn!(track = %id, error = %err, "failed to release graph nodes");
        }
        self.shared.set_state(PlaybackState::Idle);
        tracing::debug!(track = %id, "session torn down");
    }

    fn begin_loading(&mut self) {
        self.ready = false;
        self.shared.set_state(PlaybackState::Loading);
        match self.shared.lock_element() {
            Ok(mut element) => element.set_source(&self.track.source),
            Err(err) => {
                self.shared.set_state(PlaybackState::Idle);
                self.report(&err);
            }
        }
    }

    fn start_playback(&mut self) {
        let fallback = match self.state() {
            PlaybackState::Loading => PlaybackState::Idle,
            _ => PlaybackState::Paused,
        };
        let id = self.shared.track.clone();

        let analyser = self
            .shared
            .lock_element()
            .and_then(|mut element| self.ctx.graph.wire(&id, &mut **element));
        let analyser = match analyser {
            Ok(analyser) => analyser,
            Err(err) => {
                self.report(&err);
                self.shared.set_state(fallback);
                return;
            }
        };

        if let Err(err) = self.ctx.coordinator.request_play(&id) {
            tracing::warn!(track = %id, error = %err, "coordinator unavailable, playing anyway");
        }

        let played = self.shared.lock_element().and_then(|mut element| element.play());
        if let Err(err) = played {
            self.report(&err);
            if let Err(err) = self.ctx.coordinator.request_pause(&id) {
                tracing::warn!(track = %id, error = %err, "failed to release playback priority");
            }
            self.shared.set_state(fallback);
            return;
        }

        self.shared.set_state(PlaybackState::Playing);
        self.start_visualization(analyser);
    }

    fn pause(&mut self) {
        match self.shared.lock_element() {
            Ok(mut element) => element.pause(),
            Err(err) => self.report(&err),
        }
        self.shared.set_state(PlaybackState::Paused);
        self.park_visualization();
        if let Err(err) = self.ctx.coordinator.request_pause(self.id()) {
            tracing::warn!(track = %self.id(), error = %err, "failed to release playback priority");
        }
    }

    /// Natural end of track. Always lands in `Paused` and always notifies,
    /// whatever state the session was in.
    fn finish(&mut self) {
        self.shared
            .state
            .store(PlaybackState::Paused as u8, Ordering::SeqCst);
        self.park_visualization();
        let id = self.shared.track.clone();
        if let Err(err) = self.ctx.coordinator.request_pause(&id) {
            tracing::warn!(track = %id, error = %err, "failed to release playback priority");
        }
        self.ctx.observer.state_changed(&id, PlaybackState::Paused);
        self.ctx.observer.ended(&id);
        tracing::debug!(track = %id, "track ended");
    }

    fn start_visualization(&mut self, analyser: Analyser) {
        self.park_visualization();
        let Some(painter) = self.painter.take() else {
            tracing::warn!(track = %self.id(), "no canvas available for visualisation");
            return;
        };

        let weak = Arc::downgrade(&self.shared);
        let still_playing = move || {
            weak.upgrade()
                .map(|shared| shared.state().is_playing())
                .unwrap_or(false)
        };
        let visualizer = self.ctx.visualizer.clone();
        match VisualizationLoop::start(analyser, painter, visualizer, still_playing) {
            Ok(visualization) => self.visualization = Some(visualization),
            Err(err) => {
                tracing::warn!(track = %self.id(), error = %err, "failed to start visualisation")
            }
        }
    }

    fn park_visualization(&mut self) {
        if let Some(visualization) = self.visualization.take() {
            if let Some(painter) = visualization.into_painter() {
                self.painter = Some(painter);
            }
        }
    }

    fn report(&self, err: &MusicStreamError) {
        tracing::warn!(track = %self.id(), error = %err, "playback failed");
        self.ctx
            .reporter
            .report(&format!("Error playing audio: {err}"));
    }
}

impl Drop for PlaybackSession {
    fn drop(&mut self) {
        self.teardown();
    }
}

impl fmt::Debug for PlaybackSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlaybackSession")
            .field("track", &self.shared.track)
            .field("state", &self.state())
            .field("progress", &self.progress)
            .field("visualizing", &self.is_visualizing())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Harness, RecordingPainter};

    #[test]
    fn first_toggle_loads_then_plays_on_ready() {
        let harness = Harness::new(true);
        let (mut session, controls) = harness.session("a");

        session.toggle();
        assert_eq!(session.state(), PlaybackState::Loading);
        assert_eq!(controls.fetches(), 1);

        controls.ready(120.0);
        session.pump_events();

        assert_eq!(session.state(), PlaybackState::Playing);
        assert!(!controls.is_paused());
        assert!(session.is_visualizing());
        assert_eq!(session.progress().duration, Some(120.0));
        assert_eq!(
            harness.observer.states_for("a"),
            vec![PlaybackState::Loading, PlaybackState::Playing]
        );
    }

    #[test]
    fn second_toggle_while_loading_is_ignored() {
        let harness = Harness::new(true);
        let (mut session, controls) = harness.session("a");

        session.toggle();
        session.toggle();
        session.toggle();
        assert_eq!(controls.fetches(), 1);
        assert_eq!(session.state(), PlaybackState::Loading);

        controls.ready(10.0);
        session.pump_events();
        assert_eq!(session.state(), PlaybackState::Playing);
        assert_eq!(controls.plays(), 1);
        let playing = harness
            .observer
            .states_for("a")
            .into_iter()
            .filter(|state| *state == PlaybackState::Playing)
            .count();
        assert_eq!(playing, 1);
    }

    #[test]
    fn toggle_pauses_and_resumes_without_refetch() {
        let harness = Harness::new(true);
        let (mut session, controls) = harness.session("a");
        session.toggle();
        controls.ready(10.0);
        session.pump_events();

        session.toggle();
        assert_eq!(session.state(), PlaybackState::Paused);
        assert!(controls.is_paused());
        assert!(!session.is_visualizing());

        session.toggle();
        assert_eq!(session.state(), PlaybackState::Playing);
        assert_eq!(controls.fetches(), 1);
        assert_eq!(controls.plays(), 2);
    }

    #[test]
    fn ended_always_pauses_and_notifies() {
        let harness = Harness::new(true);
        let (mut session, controls) = harness.session("a");

        controls.emit(MediaEvent::Ended);
        session.pump_events();
        assert_eq!(session.state(), PlaybackState::Paused);
        assert_eq!(harness.observer.ended_count("a"), 1);

        session.toggle();
        controls.ready(10.0);
        session.pump_events();
        assert_eq!(session.state(), PlaybackState::Playing);

        controls.emit(MediaEvent::Ended);
        session.pump_events();
        assert_eq!(session.state(), PlaybackState::Paused);
        assert_eq!(harness.observer.ended_count("a"), 2);
        assert_eq!(
            harness.observer.states_for("a").last(),
            Some(&PlaybackState::Paused)
        );
    }

    #[test]
    fn ended_while_loading_lands_in_paused() {
        let harness = Harness::new(true);
        let (mut session, controls) = harness.session("a");

        session.toggle();
        controls.emit(MediaEvent::Ended);
        session.pump_events();
        assert_eq!(session.state(), PlaybackState::Paused);
        assert_eq!(harness.observer.ended_count("a"), 1);
        assert!(!session.is_visualizing());

        session.toggle();
        controls.ready(10.0);
        session.pump_events();
        assert_eq!(session.state(), PlaybackState::Playing);
        assert_eq!(controls.plays(), 1);
    }

    #[test]
    fn ended_while_paused_stays_paused_and_notifies() {
        let harness = Harness::new(true);
        let (mut session, controls) = harness.session("a");
        session.toggle();
        controls.ready(10.0);
        session.pump_events();
        session.toggle();
        assert_eq!(session.state(), PlaybackState::Paused);

        controls.emit(MediaEvent::Ended);
        session.pump_events();

        assert_eq!(session.state(), PlaybackState::Paused);
        assert_eq!(harness.observer.ended_count("a"), 1);
        assert_eq!(harness.coordinator.active().unwrap(), None);
    }

    #[derive(Debug, Clone, Copy)]
    enum Step {
        Toggle,
        Ready,
        Fail,
        End,
    }

    #[test]
    fn every_short_sequence_settles() {
        const STEPS: [Step; 4] = [Step::Toggle, Step::Ready, Step::Fail, Step::End];
        const LENGTH: u32 = 5;

        for code in 0..STEPS.len().pow(LENGTH) {
            let sequence: Vec<Step> = (0..LENGTH)
                .map(|position| STEPS[code / STEPS.len().pow(position) % STEPS.len()])
                .collect();
            let harness = Harness::new(true);
            let (mut session, controls) = harness.session("a");

            for step in &sequence {
                match step {
                    Step::Toggle => session.toggle(),
                    Step::Ready => controls.ready(10.0),
                    Step::Fail => controls.emit(MediaEvent::Error("network error".to_string())),
                    Step::End => controls.emit(MediaEvent::Ended),
                }
                session.pump_events();

                if !matches!(step, Step::Toggle) {
                    assert_ne!(session.state(), PlaybackState::Loading, "{sequence:?}");
                }
                assert_eq!(
                    session.is_visualizing(),
                    session.state().is_playing(),
                    "{sequence:?}"
                );
            }

            let entered_playing = harness
                .observer
                .states_for("a")
                .into_iter()
                .filter(|state| *state == PlaybackState::Playing)
                .count();
            assert_eq!(entered_playing, controls.plays(), "{sequence:?}");
        }
    }

    #[test]
    fn load_error_returns_to_idle_and_reports() {
        let harness = Harness::new(true);
        let (mut session, controls) = harness.session("a");

        session.toggle();
        controls.emit(MediaEvent::Error("network error".to_string()));
        session.pump_events();

        assert_eq!(session.state(), PlaybackState::Idle);
        assert_eq!(harness.reporter.messages().len(), 1);
        assert!(harness.reporter.messages()[0].contains("network error"));

        session.toggle();
        assert_eq!(session.state(), PlaybackState::Loading);
        assert_eq!(controls.fetches(), 2);
    }

    #[test]
    fn rejected_play_never_sticks_in_loading() {
        let harness = Harness::new(true);
        let (mut session, controls) = harness.session("a");

        controls.reject_next_play("autoplay blocked");
        session.toggle();
        controls.ready(10.0);
        session.pump_events();

        assert_eq!(session.state(), PlaybackState::Idle);
        assert_eq!(harness.reporter.messages().len(), 1);
        assert_eq!(harness.coordinator.active().unwrap(), None);
    }

    #[test]
    fn audio_unavailable_keeps_session_idle() {
        let harness = Harness::denying_audio();
        let (mut session, controls) = harness.session("a");

        session.toggle();

        assert_eq!(session.state(), PlaybackState::Idle);
        assert_eq!(controls.fetches(), 0);
        assert!(harness.reporter.messages()[0].contains("audio is unavailable"));
    }

    #[test]
    fn time_updates_drive_progress() {
        let harness = Harness::new(true);
        let (mut session, controls) = harness.session("a");
        session.toggle();
        controls.ready(100.0);
        controls.emit(MediaEvent::TimeUpdate { current_time: 42.5 });
        session.pump_events();

        let progress = session.progress();
        assert_eq!(progress.elapsed, 42.5);
        assert_eq!(progress.time_left(), Some(57.5));
    }

    #[test]
    fn teardown_stops_loop_and_detaches() {
        let harness = Harness::new(true);
        let painter = RecordingPainter::new(600.0, 50.0);
        let log = painter.log();
        let (mut session, controls) = harness.session_with_painter("a", painter);
        session.toggle();
        controls.ready(10.0);
        session.pump_events();
        session.render_frame(Theme::Dark);
        assert_eq!(log.paints(), 1);

        session.teardown();

        assert_eq!(session.state(), PlaybackState::Idle);
        assert!(controls.is_paused());
        assert_eq!(controls.listeners(), 0);
        assert!(log.last_was_clear());
        session.render_frame(Theme::Dark);
        assert_eq!(log.paints(), 1);
        assert_eq!(harness.graph.wired_count().unwrap(), 0);
    }
}
