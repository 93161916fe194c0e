//! The process-wide audio processing graph.
//!
//! [`AudioGraph`] is the only component that creates or connects nodes. It
//! owns the platform [`AudioBackend`], creates the audio context lazily on
//! the first user-initiated request and keeps one source/analyser pair per
//! track. Sessions receive a clone of the handle at construction.

use std::{
    collections::HashMap,
    fmt,
    sync::{Arc, Mutex, MutexGuard},
};

use crate::{
    media::{ElementId, MediaElement},
    Analyser, AudioConfig, MusicStreamError, Result, TrackId,
};

/// Lifecycle of the audio context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextState {
    /// Created but not yet allowed to produce sound.
    Suspended,
    Running,
    Closed,
}

/// Backend-assigned node identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(pub u64);

/// Platform audio API. Creating a media source twice for one element is an
/// error on every platform; [`AudioGraph`] guards against it.
pub trait AudioBackend: Send {
    /// Creates the context and reports the state it starts in.
    fn create_context(&mut self) -> Result<ContextState>;

    fn state(&self) -> ContextState;

    fn resume(&mut self) -> Result<()>;

    fn sample_rate(&self) -> u32;

    fn destination(&self) -> NodeId;

    fn create_media_source(&mut self, element: &mut dyn MediaElement) -> Result<NodeId>;

    fn create_analyser(&mut self, analyser: Analyser) -> Result<NodeId>;

    fn connect(&mut self, from: NodeId, to: NodeId) -> Result<()>;

    /// Removes every connection leaving or entering `node` and forgets it.
    fn disconnect(&mut self, node: NodeId) -> Result<()>;
}

/// Snapshot of the shared context returned by [`AudioGraph::acquire_context`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextInfo {
    pub state: ContextState,
    pub sample_rate: u32,
}

struct GraphEntry {
    element: ElementId,
    source: NodeId,
    analyser_node: NodeId,
    analyser: Analyser,
}

struct GraphInner {
    backend: Box<dyn AudioBackend>,
    config: AudioConfig,
    context_created: bool,
    entries: HashMap<TrackId, GraphEntry>,
}

/// Cloneable, application-scoped handle over the shared audio graph.
#[derive(Clone)]
pub struct AudioGraph {
    shared: Arc<Mutex<GraphInner>>,
}

impl AudioGraph {
    /// Wraps `backend`. No context is created until the first
    /// [`AudioGraph::acquire_context`].
    pub fn new(backend: impl AudioBackend + 'static, config: AudioConfig) -> Self {
        Self {
            shared: Arc::new(Mutex::new(GraphInner {
                backend: Box::new(backend),
                config,
                context_created: false,
                entries: HashMap::new(),
            })),
        }
    }

    /// Creates the context on first use and resumes it when suspended.
    pub fn acquire_context(&self) -> Result<ContextInfo> {
        let mut inner = self.lock()?;
        inner.ensure_running()
    }

    /// Connects `element` into the graph for `track` and returns its
    /// analyser. Wiring the same track and element again returns the
    /// existing analyser without creating nodes.
    pub fn wire(&self, track: &TrackId, element: &mut dyn MediaElement) -> Result<Analyser> {
        let mut inner = self.lock()?;
        let element_id = element.id();

        if let Some(entry) = inner.entries.get(track) {
            if entry.element == element_id {
                return Ok(entry.analyser.clone());
            }
            tracing::warn!(track = %track, "replacing graph entry of a remounted track");
            inner.release_entry(track)?;
        }

        if let Some((owner, _)) = inner
            .entries
            .iter()
            .find(|(_, entry)| entry.element == element_id)
        {
            tracing::error!(track = %track, owner = %owner, "element already wired");
            return Err(MusicStreamError::WiringConflict {
                track: track.to_string(),
            });
        }

        inner.ensure_running()?;

        let analyser = Analyser::new(&inner.config)?;
        let backend = inner.backend.as_mut();
        let source = backend.create_media_source(element)?;
        let analyser_node = match connect_pair(backend, source, analyser.clone()) {
            Ok(node) => node,
            Err(err) => {
                if let Err(cleanup) = backend.disconnect(source) {
                    tracing::warn!(error = %cleanup, "failed to drop half-wired source");
                }
                return Err(err);
            }
        };

        tracing::info!(track = %track, element = %element_id, "wired media element");
        inner.entries.insert(
            track.clone(),
            GraphEntry {
                element: element_id,
                source,
                analyser_node,
                analyser: analyser.clone(),
            },
        );
        Ok(analyser)
    }

    /// Analyser wired for `track`, if any.
    pub fn analyser(&self, track: &TrackId) -> Result<Option<Analyser>> {
        Ok(self
            .lock()?
            .entries
            .get(track)
            .map(|entry| entry.analyser.clone()))
    }

    /// Disconnects the nodes of `track`. Called when its session goes away.
    pub fn release(&self, track: &TrackId) -> Result<()> {
        self.lock()?.release_entry(track)
    }

    /// Number of tracks currently wired into the graph.
    pub fn wired_count(&self) -> Result<usize> {
        Ok(self.lock()?.entries.len())
    }

    /// `None` until the context has been created.
    pub fn context_state(&self) -> Result<Option<ContextState>> {
        let inner = self.lock()?;
        Ok(inner.context_created.then(|| inner.backend.state()))
    }

    fn lock(&self) -> Result<MutexGuard<'_, GraphInner>> {
        self.shared
            .lock()
            .map_err(|_| MusicStreamError::msg("audio graph has been poisoned"))
    }
}

impl fmt::Debug for AudioGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.shared.lock() {
            Ok(inner) => f
                .debug_struct("AudioGraph")
                .field("context_created", &inner.context_created)
                .field("wired", &inner.entries.len())
                .finish(),
            Err(_) => f.debug_struct("AudioGraph").finish_non_exhaustive(),
        }
    }
}

impl GraphInner {
    fn ensure_running(&mut self) -> Result<ContextInfo> {
        if !self.context_created {
            let state = self.backend.create_context().map_err(unavailable)?;
            self.context_created = true;
            tracing::info!(?state, sample_rate = self.backend.sample_rate(), "created audio context");
        }

        match self.backend.state() {
            ContextState::Running => {}
            ContextState::Suspended => {
                self.backend.resume().map_err(unavailable)?;
                tracing::debug!("resumed audio context");
            }
            ContextState::Closed => {
                return Err(MusicStreamError::AudioUnavailable(
                    "audio context has been closed".to_string(),
                ))
            }
        }

        Ok(ContextInfo {
            state: self.backend.state(),
            sample_rate: self.backend.sample_rate(),
        })
    }

    fn release_entry(&mut self, track: &TrackId) -> Result<()> {
        if let Some(entry) = self.entries.remove(track) {
            self.backend.disconnect(entry.analyser_node)?;
            self.backend.disconnect(entry.source)?;
            tracing::debug!(track = %track, "released graph entry");
        }
        Ok(())
    }
}

/// Source feeds the analyser and the destination directly, so analysis never
/// sits between the source and what the user hears.
fn connect_pair(backend: &mut dyn AudioBackend, source: NodeId, analyser: Analyser) -> Result<NodeId> {
    let destination = backend.destination();
    let node = backend.create_analyser(analyser)?;
    backend.connect(source, node)?;
    backend.connect(node, destination)?;
    backend.connect(source, destination)?;
    Ok(node)
}

fn unavailable(err: MusicStreamError) -> MusicStreamError {
    match err {
        MusicStreamError::AudioUnavailable(_) => err,
        other => MusicStreamError::AudioUnavailable(other.to_string()),
    }
}
