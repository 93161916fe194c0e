//! Playable media resources and their event plumbing.
//!
//! A [`MediaElement`] is the per-session resource that fetches, decodes and
//! plays one track. It reports progress through an [`EventHub`]; consumers
//! hold a [`Subscription`] whose lifetime bounds the listener registration.

use std::{
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        mpsc::{self, Receiver, Sender},
        Arc, Mutex, Weak,
    },
};

use crate::Result;

/// Process-unique identity of a media element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ElementId(u64);

impl ElementId {
    /// Allocates a process-unique id.
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ElementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "element#{}", self.0)
    }
}

/// Notifications emitted by a media element.
#[derive(Debug, Clone, PartialEq)]
pub enum MediaEvent {
    LoadedMetadata { duration: f64 },
    /// Enough data is buffered to play to the end without stalling.
    CanPlayThrough,
    TimeUpdate { current_time: f64 },
    Ended,
    Error(String),
}

/// Pull-based producer of mono samples, handed to the audio graph when an
/// element is captured.
pub trait SampleSource: Send {
    /// Fills `out` with samples at `sample_rate` and returns how many were
    /// produced. The remainder of `out` is left silent.
    fn render(&mut self, out: &mut [f32], sample_rate: u32) -> usize;
}

/// The playable media resource owned by one playback session.
pub trait MediaElement: Send {
    fn id(&self) -> ElementId;

    /// Points the element at a new locator, starting the fetch.
    fn set_source(&mut self, locator: &str);

    fn source(&self) -> Option<&str>;

    /// Starts or resumes playback. Rejections (autoplay, decode, missing
    /// data) are returned as errors.
    fn play(&mut self) -> Result<()>;

    fn pause(&mut self);

    /// Redirects the element's output into an audio graph. Platforms refuse
    /// to do this twice for the same element.
    fn capture(&mut self) -> Result<Box<dyn SampleSource>>;

    fn events(&self) -> &EventHub;
}

#[derive(Debug, Default)]
struct Listeners {
    next_id: u64,
    senders: Vec<(u64, Sender<MediaEvent>)>,
}

/// Fan-out point for media events.
#[derive(Debug, Clone, Default)]
pub struct EventHub {
    listeners: Arc<Mutex<Listeners>>,
}

impl EventHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a listener. The registration lasts as long as the returned
    /// [`Subscription`].
    pub fn subscribe(&self) -> Subscription {
        let (sender, receiver) = mpsc::channel();
        let id = match self.listeners.lock() {
            Ok(mut listeners) => {
                let id = listeners.next_id;
                listeners.next_id += 1;
                listeners.senders.push((id, sender));
                id
            }
            Err(_) => {
                tracing::warn!("event hub poisoned, subscription will stay silent");
                u64::MAX
            }
        };

        Subscription {
            id,
            receiver,
            hub: Arc::downgrade(&self.listeners),
        }
    }

    /// Delivers `event` to every live subscription.
    pub fn emit(&self, event: MediaEvent) {
        let Ok(mut listeners) = self.listeners.lock() else {
            return;
        };
        listeners
            .senders
            .retain(|(_, sender)| sender.send(event.clone()).is_ok());
    }

    pub fn listener_count(&self) -> usize {
        self.listeners
            .lock()
            .map(|listeners| listeners.senders.len())
            .unwrap_or(0)
    }
}

/// Scoped listener registration on an [`EventHub`]. Dropping it detaches the
/// listener.
pub struct Subscription {
    id: u64,
    receiver: Receiver<MediaEvent>,
    hub: Weak<Mutex<Listeners>>,
}

impl Subscription {
    /// Next pending event without blocking.
    pub fn try_next(&self) -> Option<MediaEvent> {
        self.receiver.try_recv().ok()
    }

    /// Takes every event delivered so far.
    pub fn drain(&self) -> Vec<MediaEvent> {
        self.receiver.try_iter().collect()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(listeners) = self.hub.upgrade() {
            if let Ok(mut listeners) = listeners.lock() {
                listeners.senders.retain(|(id, _)| *id != self.id);
            }
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}
