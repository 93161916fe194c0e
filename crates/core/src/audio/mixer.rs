use std::{
    collections::BTreeMap,
    fmt,
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use crate::{
    graph::{AudioBackend, ContextState, NodeId},
    media::{MediaElement, SampleSource},
    Analyser, MusicStreamError, Result,
};

const DESTINATION: NodeId = NodeId(0);
const BLOCK: usize = 1024;

enum Node {
    Destination,
    Source(Box<dyn SampleSource>),
    Analyser(Analyser),
}

struct MixerState {
    context: ContextState,
    sample_rate: u32,
    nodes: BTreeMap<NodeId, Node>,
    edges: Vec<(NodeId, NodeId)>,
    next_node: u64,
    scratch: Vec<f32>,
    /// Fractional sample owed by the last headless advance.
    carry: f64,
}

impl MixerState {
    fn insert(&mut self, node: Node) -> NodeId {
        let id = NodeId(self.next_node);
        self.next_node += 1;
        self.nodes.insert(id, node);
        id
    }

    fn render(&mut self, out: &mut [f32]) -> Result<()> {
        out.fill(0.0);
        if self.context != ContextState::Running {
            return Ok(());
        }

        let sources: Vec<NodeId> = self
            .nodes
            .iter()
            .filter(|(_, node)| matches!(node, Node::Source(_)))
            .map(|(id, _)| *id)
            .collect();

        let mut signal = std::mem::take(&mut self.scratch);
        for id in sources {
            signal.clear();
            signal.resize(out.len(), 0.0);
            if let Some(Node::Source(source)) = self.nodes.get_mut(&id) {
                source.render(&mut signal, self.sample_rate);
            }
            if let Err(err) = self.propagate(id, &signal, out, 0) {
                self.scratch = signal;
                return Err(err);
            }
        }
        self.scratch = signal;

        for sample in out.iter_mut() {
            *sample = sample.clamp(-1.0, 1.0);
        }
        Ok(())
    }

    /// Pushes `signal` along every edge leaving `from`. Analysers observe the
    /// signal and pass it through unchanged.
    fn propagate(&self, from: NodeId, signal: &[f32], out: &mut [f32], depth: usize) -> Result<()> {
        if depth > self.nodes.len() {
            return Err(MusicStreamError::msg("audio graph contains a cycle"));
        }
        for &(_, to) in self.edges.iter().filter(|(edge_from, _)| *edge_from == from) {
            match self.nodes.get(&to) {
                Some(Node::Destination) => {
                    for (mixed, sample) in out.iter_mut().zip(signal) {
                        *mixed += sample;
                    }
                }
                Some(Node::Analyser(analyser)) => {
                    analyser.push_samples(signal)?;
                    self.propagate(to, signal, out, depth + 1)?;
                }
                Some(Node::Source(_)) | None => {}
            }
        }
        Ok(())
    }
}

/// Pull-based software renderer shared between the backend and whatever
/// drives it (the frame loop in headless mode, an output device otherwise).
#[derive(Clone)]
pub struct Mixer {
    shared: Arc<Mutex<MixerState>>,
}

impl Mixer {
    /// Creates a mixer holding only the destination node. The context
    /// stays suspended until the backend resumes it.
    pub fn new(sample_rate: u32) -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert(DESTINATION, Node::Destination);
        Self {
            shared: Arc::new(Mutex::new(MixerState {
                context: ContextState::Closed,
                sample_rate,
                nodes,
                edges: Vec::new(),
                next_node: 1,
                scratch: Vec::new(),
                carry: 0.0,
            })),
        }
    }

    /// Renders the next block of mono output. Silent unless the context
    /// is running.
    pub fn render(&self, out: &mut [f32]) -> Result<()> {
        self.lock()?.render(out)
    }

    /// Renders and discards `elapsed` worth of output, keeping sources and
    /// analysers moving without a device. Returns the samples rendered.
    pub fn advance(&self, elapsed: Duration) -> Result<usize> {
        let mut state = self.lock()?;
        let exact = elapsed.as_secs_f64() * state.sample_rate as f64 + state.carry;
        let total = exact.floor() as usize;
        state.carry = exact - total as f64;

        let mut block = [0.0; BLOCK];
        let mut remaining = total;
        while remaining > 0 {
            let len = remaining.min(BLOCK);
            state.render(&mut block[..len])?;
            remaining -= len;
        }
        Ok(total)
    }

    pub fn sample_rate(&self) -> Result<u32> {
        Ok(self.lock()?.sample_rate)
    }

    /// Adopts the rate of the device that will pull from the mixer.
    pub fn set_sample_rate(&self, sample_rate: u32) -> Result<()> {
        if sample_rate == 0 {
            return Err(MusicStreamError::InvalidInput("sample rate must be positive"));
        }
        self.lock()?.sample_rate = sample_rate;
        Ok(())
    }

    pub fn context(&self) -> Result<ContextState> {
        Ok(self.lock()?.context)
    }

    /// Nodes alive, the destination included.
    pub fn node_count(&self) -> Result<usize> {
        Ok(self.lock()?.nodes.len())
    }

    fn lock(&self) -> Result<MutexGuard<'_, MixerState>> {
        self.shared
            .lock()
            .map_err(|_| MusicStreamError::msg("software mixer has been poisoned"))
    }
}

impl fmt::Debug for Mixer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.shared.lock() {
            Ok(state) => f
                .debug_struct("Mixer")
                .field("context", &state.context)
                .field("sample_rate", &state.sample_rate)
                .field("nodes", &state.nodes.len())
                .field("edges", &state.edges.len())
                .finish(),
            Err(_) => f.debug_struct("Mixer").finish_non_exhaustive(),
        }
    }
}

/// [`AudioBackend`] rendering through a [`Mixer`]. Contexts start suspended
/// and only produce sound once resumed.
#[derive(Debug, Clone)]
pub struct SoftwareBackend {
    mixer: Mixer,
}

impl SoftwareBackend {
    pub fn new(mixer: Mixer) -> Self {
        Self { mixer }
    }

    pub fn mixer(&self) -> &Mixer {
        &self.mixer
    }
}

impl AudioBackend for SoftwareBackend {
    fn create_context(&mut self) -> Result<ContextState> {
        let mut state = self.mixer.lock()?;
        state.context = ContextState::Suspended;
        Ok(state.context)
    }

    fn state(&self) -> ContextState {
        self.mixer
            .lock()
            .map(|state| state.context)
            .unwrap_or(ContextState::Closed)
    }

    fn resume(&mut self) -> Result<()> {
        let mut state = self.mixer.lock()?;
        if state.context == ContextState::Closed {
            return Err(MusicStreamError::AudioUnavailable(
                "cannot resume a closed context".to_string(),
            ));
        }
        state.context = ContextState::Running;
        Ok(())
    }

    fn sample_rate(&self) -> u32 {
        self.mixer.sample_rate().unwrap_or(0)
    }

    fn destination(&self) -> NodeId {
        DESTINATION
    }

    fn create_media_source(&mut self, element: &mut dyn MediaElement) -> Result<NodeId> {
        let source = element.capture()?;
        Ok(self.mixer.lock()?.insert(Node::Source(source)))
    }

    fn create_analyser(&mut self, analyser: Analyser) -> Result<NodeId> {
        Ok(self.mixer.lock()?.insert(Node::Analyser(analyser)))
    }

    fn connect(&mut self, from: NodeId, to: NodeId) -> Result<()> {
        let mut state = self.mixer.lock()?;
        if !state.nodes.contains_key(&from) || !state.nodes.contains_key(&to) {
            return Err(MusicStreamError::msg(format!(
                "cannot connect unknown nodes {} -> {}",
                from.0, to.0
            )));
        }
        if !state.edges.contains(&(from, to)) {
            state.edges.push((from, to));
        }
        Ok(())
    }

    fn disconnect(&mut self, node: NodeId) -> Result<()> {
        let mut state = self.mixer.lock()?;
        state.edges.retain(|(from, to)| *from != node && *to != node);
        if node != DESTINATION {
            state.nodes.remove(&node);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        testing::{small_audio_config, FakeElement},
        AudioGraph, TrackId,
    };

    struct Constant(f32);

    impl SampleSource for Constant {
        fn render(&mut self, out: &mut [f32], _sample_rate: u32) -> usize {
            out.fill(self.0);
            out.len()
        }
    }

    fn wired(value: f32) -> (Mixer, SoftwareBackend, NodeId) {
        let mixer = Mixer::new(1_000);
        let mut backend = SoftwareBackend::new(mixer.clone());
        backend.create_context().unwrap();
        let source = mixer.lock().unwrap().insert(Node::Source(Box::new(Constant(value))));
        (mixer, backend, source)
    }

    #[test]
    fn suspended_context_is_silent() {
        let (mixer, mut backend, source) = wired(0.25);
        backend.connect(source, DESTINATION).unwrap();

        let mut out = [1.0; 8];
        mixer.render(&mut out).unwrap();
        assert!(out.iter().all(|sample| *sample == 0.0));

        backend.resume().unwrap();
        mixer.render(&mut out).unwrap();
        assert!(out.iter().all(|sample| *sample == 0.25));
    }

    #[test]
    fn both_paths_reach_the_destination() {
        let (mixer, mut backend, source) = wired(0.25);
        backend.resume().unwrap();
        let analyser = Analyser::new(&small_audio_config()).unwrap();
        let node = backend.create_analyser(analyser).unwrap();
        backend.connect(source, node).unwrap();
        backend.connect(node, DESTINATION).unwrap();
        backend.connect(source, DESTINATION).unwrap();

        let mut out = [0.0; 4];
        mixer.render(&mut out).unwrap();
        assert!(out.iter().all(|sample| *sample == 0.5));

        backend.disconnect(node).unwrap();
        mixer.render(&mut out).unwrap();
        assert!(out.iter().all(|sample| *sample == 0.25));
    }

    #[test]
    fn advance_carries_fractional_samples() {
        let (mixer, mut backend, _) = wired(0.0);
        backend.resume().unwrap();

        assert_eq!(mixer.advance(Duration::from_micros(2_500)).unwrap(), 2);
        assert_eq!(mixer.advance(Duration::from_micros(2_500)).unwrap(), 3);
        assert_eq!(mixer.advance(Duration::from_millis(3_000)).unwrap(), 3_000);
    }

    #[test]
    fn connecting_unknown_nodes_fails() {
        let (_, mut backend, source) = wired(0.0);
        assert!(backend.connect(source, NodeId(99)).is_err());
    }

    #[test]
    fn graph_wiring_feeds_the_analyser() {
        let mixer = Mixer::new(8_000);
        let graph = AudioGraph::new(SoftwareBackend::new(mixer.clone()), small_audio_config());
        let (mut element, _controls) = FakeElement::new();

        let analyser = graph.wire(&TrackId::new("a"), &mut element).unwrap();
        assert_eq!(mixer.context().unwrap(), ContextState::Running);
        // destination, source, analyser
        assert_eq!(mixer.node_count().unwrap(), 3);

        mixer.advance(Duration::from_millis(10)).unwrap();
        let mut bins = vec![255; analyser.frequency_bin_count().unwrap()];
        analyser.byte_frequency_data(&mut bins).unwrap();
        assert!(bins.iter().all(|bin| *bin == 0));

        graph.release(&TrackId::new("a")).unwrap();
        assert_eq!(mixer.node_count().unwrap(), 1);
    }
}
