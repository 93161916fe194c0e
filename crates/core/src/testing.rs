//! Fakes shared by the unit tests.

use std::{
    collections::HashSet,
    sync::{Arc, Mutex},
};

use chrono::NaiveDate;

use crate::{
    graph::{AudioBackend, ContextState, NodeId},
    media::{ElementId, EventHub, MediaElement, MediaEvent, SampleSource},
    Analyser, AudioConfig, AudioGraph, Bar, ErrorReporter, MusicStreamError, Painter,
    PlaybackCoordinator, PlaybackObserver, PlaybackSession, PlaybackState, Result,
    SessionContext, Track, TrackId, VisualizerConfig,
};

#[derive(Debug, Default)]
struct BackendLog {
    deny: bool,
    contexts_created: usize,
    resumes: usize,
    sources_created: usize,
    connections: usize,
    captured: HashSet<ElementId>,
    next_node: u64,
}

/// Backend that records calls and refuses to capture an element twice.
pub(crate) struct FakeBackend {
    log: Arc<Mutex<BackendLog>>,
    state: ContextState,
}

impl FakeBackend {
    pub(crate) fn new() -> Self {
        Self {
            log: Arc::new(Mutex::new(BackendLog {
                next_node: 1,
                ..Default::default()
            })),
            state: ContextState::Closed,
        }
    }

    pub(crate) fn counters(&self) -> BackendCounters {
        BackendCounters {
            log: self.log.clone(),
        }
    }

    fn next_node(&self) -> NodeId {
        let mut log = self.log.lock().unwrap();
        log.next_node += 1;
        NodeId(log.next_node)
    }
}

impl AudioBackend for FakeBackend {
    fn create_context(&mut self) -> Result<ContextState> {
        let mut log = self.log.lock().unwrap();
        if log.deny {
            return Err(MusicStreamError::AudioUnavailable("denied".to_string()));
        }
        log.contexts_created += 1;
        self.state = ContextState::Suspended;
        Ok(self.state)
    }

    fn state(&self) -> ContextState {
        self.state
    }

    fn resume(&mut self) -> Result<()> {
        let mut log = self.log.lock().unwrap();
        if log.deny {
            return Err(MusicStreamError::AudioUnavailable("denied".to_string()));
        }
        log.resumes += 1;
        self.state = ContextState::Running;
        Ok(())
    }

    fn sample_rate(&self) -> u32 {
        48_000
    }

    fn destination(&self) -> NodeId {
        NodeId(0)
    }

    fn create_media_source(&mut self, element: &mut dyn MediaElement) -> Result<NodeId> {
        {
            let mut log = self.log.lock().unwrap();
            if !log.captured.insert(element.id()) {
                return Err(MusicStreamError::msg("element already has a source node"));
            }
            log.sources_created += 1;
        }
        element.capture()?;
        Ok(self.next_node())
    }

    fn create_analyser(&mut self, _analyser: Analyser) -> Result<NodeId> {
        Ok(self.next_node())
    }

    fn connect(&mut self, _from: NodeId, _to: NodeId) -> Result<()> {
        self.log.lock().unwrap().connections += 1;
        Ok(())
    }

    fn disconnect(&mut self, _node: NodeId) -> Result<()> {
        Ok(())
    }
}

pub(crate) struct BackendCounters {
    log: Arc<Mutex<BackendLog>>,
}

impl BackendCounters {
    pub(crate) fn deny_audio(&self) {
        self.log.lock().unwrap().deny = true;
    }

    pub(crate) fn contexts_created(&self) -> usize {
        self.log.lock().unwrap().contexts_created
    }

    pub(crate) fn resumes(&self) -> usize {
        self.log.lock().unwrap().resumes
    }

    pub(crate) fn sources_created(&self) -> usize {
        self.log.lock().unwrap().sources_created
    }

    pub(crate) fn connections(&self) -> usize {
        self.log.lock().unwrap().connections
    }
}

#[derive(Debug, Default)]
struct ElementScript {
    paused: bool,
    fetches: usize,
    plays: usize,
    reject_play: Option<String>,
}

/// Media element driven by the test through [`ElementControls`].
pub(crate) struct FakeElement {
    id: ElementId,
    source: Option<String>,
    captured: bool,
    hub: EventHub,
    script: Arc<Mutex<ElementScript>>,
}

impl FakeElement {
    pub(crate) fn new() -> (Self, ElementControls) {
        let hub = EventHub::new();
        let script = Arc::new(Mutex::new(ElementScript {
            paused: true,
            ..Default::default()
        }));
        let controls = ElementControls {
            hub: hub.clone(),
            script: script.clone(),
        };
        let element = Self {
            id: ElementId::next(),
            source: None,
            captured: false,
            hub,
            script,
        };
        (element, controls)
    }
}

struct Silence;

impl SampleSource for Silence {
    fn render(&mut self, out: &mut [f32], _sample_rate: u32) -> usize {
        out.fill(0.0);
        out.len()
    }
}

impl MediaElement for FakeElement {
    fn id(&self) -> ElementId {
        self.id
    }

    fn set_source(&mut self, locator: &str) {
        self.source = Some(locator.to_string());
        self.script.lock().unwrap().fetches += 1;
    }

    fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }

    fn play(&mut self) -> Result<()> {
        let mut script = self.script.lock().unwrap();
        script.plays += 1;
        if let Some(reason) = script.reject_play.take() {
            return Err(MusicStreamError::msg(reason));
        }
        script.paused = false;
        Ok(())
    }

    fn pause(&mut self) {
        self.script.lock().unwrap().paused = true;
    }

    fn capture(&mut self) -> Result<Box<dyn SampleSource>> {
        if self.captured {
            return Err(MusicStreamError::WiringConflict {
                track: self.source.clone().unwrap_or_default(),
            });
        }
        self.captured = true;
        Ok(Box::new(Silence))
    }

    fn events(&self) -> &EventHub {
        &self.hub
    }
}

pub(crate) struct ElementControls {
    hub: EventHub,
    script: Arc<Mutex<ElementScript>>,
}

impl ElementControls {
    /// Emits the metadata and ready signals a finished fetch produces.
    pub(crate) fn ready(&self, duration: f64) {
        self.hub.emit(MediaEvent::LoadedMetadata { duration });
        self.hub.emit(MediaEvent::CanPlayThrough);
    }

    pub(crate) fn emit(&self, event: MediaEvent) {
        self.hub.emit(event);
    }

    pub(crate) fn reject_next_play(&self, reason: &str) {
        self.script.lock().unwrap().reject_play = Some(reason.to_string());
    }

    pub(crate) fn fetches(&self) -> usize {
        self.script.lock().unwrap().fetches
    }

    pub(crate) fn plays(&self) -> usize {
        self.script.lock().unwrap().plays
    }

    pub(crate) fn is_paused(&self) -> bool {
        self.script.lock().unwrap().paused
    }

    pub(crate) fn listeners(&self) -> usize {
        self.hub.listener_count()
    }
}

#[derive(Debug, Clone, PartialEq)]
enum PaintCall {
    Paint { snapshot_len: usize, bars: usize },
    Clear,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct PaintLog {
    calls: Arc<Mutex<Vec<PaintCall>>>,
}

impl PaintLog {
    pub(crate) fn paints(&self) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|call| matches!(call, PaintCall::Paint { .. }))
            .count()
    }

    pub(crate) fn last_snapshot_len(&self) -> Option<usize> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find_map(|call| match call {
                PaintCall::Paint { snapshot_len, .. } => Some(*snapshot_len),
                PaintCall::Clear => None,
            })
    }

    pub(crate) fn last_bar_count(&self) -> Option<usize> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find_map(|call| match call {
                PaintCall::Paint { bars, .. } => Some(*bars),
                PaintCall::Clear => None,
            })
    }

    pub(crate) fn last_was_clear(&self) -> bool {
        matches!(self.calls.lock().unwrap().last(), Some(PaintCall::Clear))
    }
}

pub(crate) struct RecordingPainter {
    width: f32,
    height: f32,
    log: PaintLog,
}

impl RecordingPainter {
    pub(crate) fn new(width: f32, height: f32) -> Self {
        Self {
            width,
            height,
            log: PaintLog::default(),
        }
    }

    pub(crate) fn log(&self) -> PaintLog {
        self.log.clone()
    }
}

impl Painter for RecordingPainter {
    fn size(&self) -> (f32, f32) {
        (self.width, self.height)
    }

    fn paint(&mut self, snapshot: &[u8], bars: &[Bar]) {
        self.log.calls.lock().unwrap().push(PaintCall::Paint {
            snapshot_len: snapshot.len(),
            bars: bars.len(),
        });
    }

    fn clear(&mut self) {
        self.log.calls.lock().unwrap().push(PaintCall::Clear);
    }
}

#[derive(Debug, Default)]
pub(crate) struct RecordingReporter {
    messages: Mutex<Vec<String>>,
}

impl RecordingReporter {
    pub(crate) fn messages(&self) -> Vec<String> {
        self.messages.lock().unwrap().clone()
    }
}

impl ErrorReporter for RecordingReporter {
    fn report(&self, message: &str) {
        self.messages.lock().unwrap().push(message.to_string());
    }
}

#[derive(Debug, Default)]
pub(crate) struct RecordingObserver {
    states: Mutex<Vec<(TrackId, PlaybackState)>>,
    ended: Mutex<Vec<TrackId>>,
}

impl RecordingObserver {
    pub(crate) fn states_for(&self, track: &str) -> Vec<PlaybackState> {
        let track = TrackId::new(track);
        self.states
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, _)| *id == track)
            .map(|(_, state)| *state)
            .collect()
    }

    pub(crate) fn ended_count(&self, track: &str) -> usize {
        let track = TrackId::new(track);
        self.ended
            .lock()
            .unwrap()
            .iter()
            .filter(|id| **id == track)
            .count()
    }
}

impl PlaybackObserver for RecordingObserver {
    fn state_changed(&self, track: &TrackId, state: PlaybackState) {
        self.states.lock().unwrap().push((track.clone(), state));
    }

    fn ended(&self, track: &TrackId) {
        self.ended.lock().unwrap().push(track.clone());
    }
}

pub(crate) fn small_audio_config() -> AudioConfig {
    AudioConfig {
        fft_size: 64,
        ..Default::default()
    }
}

pub(crate) fn track(name: &str) -> Track {
    Track::new(
        name,
        name,
        NaiveDate::from_ymd_opt(2023, 6, 15).expect("valid date"),
    )
}

/// Wires fakes together the way the song list does.
pub(crate) struct Harness {
    pub(crate) graph: AudioGraph,
    pub(crate) coordinator: PlaybackCoordinator,
    pub(crate) reporter: Arc<RecordingReporter>,
    pub(crate) observer: Arc<RecordingObserver>,
}

impl Harness {
    pub(crate) fn new(exclusive: bool) -> Self {
        Self::with_backend(FakeBackend::new(), exclusive)
    }

    pub(crate) fn denying_audio() -> Self {
        let backend = FakeBackend::new();
        backend.counters().deny_audio();
        Self::with_backend(backend, true)
    }

    fn with_backend(backend: FakeBackend, exclusive: bool) -> Self {
        Self {
            graph: AudioGraph::new(backend, small_audio_config()),
            coordinator: PlaybackCoordinator::new(exclusive),
            reporter: Arc::new(RecordingReporter::default()),
            observer: Arc::new(RecordingObserver::default()),
        }
    }

    pub(crate) fn context(&self) -> SessionContext {
        SessionContext {
            graph: self.graph.clone(),
            coordinator: self.coordinator.clone(),
            reporter: self.reporter.clone(),
            observer: self.observer.clone(),
            visualizer: VisualizerConfig::default(),
        }
    }

    pub(crate) fn session(&self, name: &str) -> (PlaybackSession, ElementControls) {
        self.session_with_painter(name, RecordingPainter::new(600.0, 50.0))
    }

    pub(crate) fn session_with_painter(
        &self,
        name: &str,
        painter: RecordingPainter,
    ) -> (PlaybackSession, ElementControls) {
        let (element, controls) = FakeElement::new();
        let session = PlaybackSession::new(
            track(name),
            Box::new(element),
            Box::new(painter),
            self.context(),
        );
        (session, controls)
    }
}

/// Writes a 16-bit PCM WAV file with `N` interleaved channels.
pub(crate) fn write_wav<const N: usize>(path: &std::path::Path, sample_rate: u32, frames: &[[i16; N]]) {
    let spec = hound::WavSpec {
        channels: N as u16,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec).unwrap();
    for sample in frames.iter().flatten() {
        writer.write_sample(*sample).unwrap();
    }
    writer.finalize().unwrap();
}
