use std::{
    fmt,
    sync::{Arc, Mutex, MutexGuard, Weak},
};

use crate::{MusicStreamError, Result, TrackId};

/// A session the coordinator is allowed to pre-empt.
pub trait Preemptible: Send + Sync {
    fn track_id(&self) -> &TrackId;

    fn is_playing(&self) -> bool;

    /// Pauses the session without reporting back to the coordinator.
    fn force_pause(&self);
}

struct CoordinatorState {
    exclusive: bool,
    active: Option<TrackId>,
    sessions: Vec<Weak<dyn Preemptible>>,
}

/// Enforces the exclusive/concurrent playback policy across sessions.
///
/// The policy is cooperative: a play request is always granted, and under
/// the exclusive policy every other playing session is paused before the
/// grant returns. Nothing is polled between requests.
#[derive(Clone)]
pub struct PlaybackCoordinator {
    shared: Arc<Mutex<CoordinatorState>>,
}

impl PlaybackCoordinator {
    /// Starts with no active track under the given policy.
    pub fn new(exclusive: bool) -> Self {
        Self {
            shared: Arc::new(Mutex::new(CoordinatorState {
                exclusive,
                active: None,
                sessions: Vec::new(),
            })),
        }
    }

    /// Makes a session eligible for pre-emption. Held weakly, so a dropped
    /// session simply disappears.
    pub fn register(&self, session: Weak<dyn Preemptible>) -> Result<()> {
        let mut state = self.lock()?;
        state.sessions.retain(|weak| weak.strong_count() > 0);
        state.sessions.push(session);
        Ok(())
    }

    /// Forgets the session of `track` and any dead registrations.
    pub fn unregister(&self, track: &TrackId) -> Result<()> {
        let mut state = self.lock()?;
        state.sessions.retain(|weak| {
            weak.upgrade()
                .map(|session| session.track_id() != track)
                .unwrap_or(false)
        });
        if state.active.as_ref() == Some(track) {
            state.active = None;
        }
        Ok(())
    }

    /// Grants `track` the right to play. Always returns `true`.
    pub fn request_play(&self, track: &TrackId) -> Result<bool> {
        let others = {
            let mut state = self.lock()?;
            if !state.exclusive {
                return Ok(true);
            }
            state.active = Some(track.clone());
            state
                .sessions
                .iter()
                .filter_map(Weak::upgrade)
                .filter(|session| session.track_id() != track)
                .collect::<Vec<_>>()
        };

        for session in others.iter().filter(|session| session.is_playing()) {
            tracing::debug!(track = %session.track_id(), by = %track, "pre-empting session");
            session.force_pause();
        }

        if let Err(err) = self.check_consistency() {
            tracing::error!(error = %err, "coordinator left more than one session playing");
        }
        Ok(true)
    }

    /// Clears the active track if `track` holds it.
    pub fn request_pause(&self, track: &TrackId) -> Result<()> {
        let mut state = self.lock()?;
        if state.active.as_ref() == Some(track) {
            state.active = None;
        }
        Ok(())
    }

    /// Switches policy. Takes effect at the next play request; currently
    /// playing sessions are left alone in both directions.
    pub fn set_policy(&self, exclusive: bool) -> Result<()> {
        let mut state = self.lock()?;
        if state.exclusive != exclusive {
            tracing::info!(exclusive, "playback policy changed");
            state.exclusive = exclusive;
        }
        Ok(())
    }

    /// `true` under the exclusive policy.
    pub fn is_exclusive(&self) -> Result<bool> {
        Ok(self.lock()?.exclusive)
    }

    /// Track that last won playback priority, if it still holds it.
    pub fn active(&self) -> Result<Option<TrackId>> {
        Ok(self.lock()?.active.clone())
    }

    /// Under the exclusive policy at most one registered session may play.
    pub fn check_consistency(&self) -> Result<()> {
        let (exclusive, sessions) = {
            let state = self.lock()?;
            (
                state.exclusive,
                state.sessions.iter().filter_map(Weak::upgrade).collect::<Vec<_>>(),
            )
        };
        if !exclusive {
            return Ok(());
        }

        let playing: Vec<String> = sessions
            .iter()
            .filter(|session| session.is_playing())
            .map(|session| session.track_id().to_string())
            .collect();
        if playing.len() > 1 {
            return Err(MusicStreamError::PolicyViolation(format!(
                "{} sessions playing under exclusive policy: {}",
                playing.len(),
                playing.join(", ")
            )));
        }
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, CoordinatorState>> {
        self.shared
            .lock()
            .map_err(|_| MusicStreamError::msg("playback coordinator has been poisoned"))
    }
}

impl fmt::Debug for PlaybackCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.shared.lock() {
            Ok(state) => f
                .debug_struct("PlaybackCoordinator")
                .field("exclusive", &state.exclusive)
                .field("active", &state.active)
                .field("sessions", &state.sessions.len())
                .finish(),
            Err(_) => f.debug_struct("PlaybackCoordinator").finish_non_exhaustive(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use super::*;

    struct StubSession {
        id: TrackId,
        playing: AtomicBool,
        pauses: AtomicUsize,
    }

    impl StubSession {
        fn new(id: &str, playing: bool) -> Arc<Self> {
            Arc::new(Self {
                id: TrackId::new(id),
                playing: AtomicBool::new(playing),
                pauses: AtomicUsize::new(0),
            })
        }
    }

    impl Preemptible for StubSession {
        fn track_id(&self) -> &TrackId {
            &self.id
        }

        fn is_playing(&self) -> bool {
            self.playing.load(Ordering::SeqCst)
        }

        fn force_pause(&self) {
            self.pauses.fetch_add(1, Ordering::SeqCst);
            self.playing.store(false, Ordering::SeqCst);
        }
    }

    fn register(coordinator: &PlaybackCoordinator, session: &Arc<StubSession>) {
        let weak: Weak<StubSession> = Arc::downgrade(session);
        coordinator.register(weak).unwrap();
    }

    #[test]
    fn exclusive_grant_pauses_playing_others() {
        let coordinator = PlaybackCoordinator::new(true);
        let a = StubSession::new("a", true);
        let b = StubSession::new("b", false);
        let c = StubSession::new("c", false);
        for session in [&a, &b, &c] {
            register(&coordinator, session);
        }

        assert!(coordinator.request_play(&b.id).unwrap());
        b.playing.store(true, Ordering::SeqCst);

        assert!(!a.is_playing());
        assert_eq!(a.pauses.load(Ordering::SeqCst), 1);
        assert_eq!(c.pauses.load(Ordering::SeqCst), 0);
        assert_eq!(coordinator.active().unwrap(), Some(b.id.clone()));
        coordinator.check_consistency().unwrap();
    }

    #[test]
    fn concurrent_grant_touches_nothing() {
        let coordinator = PlaybackCoordinator::new(false);
        let a = StubSession::new("a", true);
        register(&coordinator, &a);

        assert!(coordinator.request_play(&TrackId::new("b")).unwrap());
        assert!(a.is_playing());
        assert_eq!(coordinator.active().unwrap(), None);
    }

    #[test]
    fn pause_clears_only_matching_active() {
        let coordinator = PlaybackCoordinator::new(true);
        coordinator.request_play(&TrackId::new("a")).unwrap();

        coordinator.request_pause(&TrackId::new("b")).unwrap();
        assert_eq!(coordinator.active().unwrap(), Some(TrackId::new("a")));

        coordinator.request_pause(&TrackId::new("a")).unwrap();
        assert_eq!(coordinator.active().unwrap(), None);
    }

    #[test]
    fn switching_to_exclusive_is_not_retroactive() {
        let coordinator = PlaybackCoordinator::new(false);
        let a = StubSession::new("a", true);
        let b = StubSession::new("b", true);
        register(&coordinator, &a);
        register(&coordinator, &b);

        coordinator.set_policy(true).unwrap();
        assert!(a.is_playing() && b.is_playing());
        assert!(matches!(
            coordinator.check_consistency(),
            Err(MusicStreamError::PolicyViolation(_))
        ));

        coordinator.request_play(&a.id).unwrap();
        assert!(a.is_playing());
        assert!(!b.is_playing());
    }

    #[test]
    fn dropped_sessions_are_skipped() {
        let coordinator = PlaybackCoordinator::new(true);
        let a = StubSession::new("a", true);
        register(&coordinator, &a);
        drop(a);

        assert!(coordinator.request_play(&TrackId::new("b")).unwrap());
    }
}
