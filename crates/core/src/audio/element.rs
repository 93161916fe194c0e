use std::{
    fmt,
    path::PathBuf,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, MutexGuard,
    },
    thread,
    time::Duration,
};

use url::Url;

use super::decode::{decode_file, DecodedAudio};
use crate::{
    media::{ElementId, EventHub, MediaElement, MediaEvent, SampleSource},
    MusicStreamError, Result,
};

#[derive(Default)]
struct Voice {
    audio: Option<Arc<DecodedAudio>>,
    /// Read head in source samples.
    position: f64,
    paused: bool,
    ended: bool,
    last_time_update: f64,
}

impl Voice {
    fn reset(&mut self) {
        *self = Voice {
            paused: true,
            ..Voice::default()
        };
    }

    fn current_time(&self) -> f64 {
        match &self.audio {
            Some(audio) if audio.sample_rate > 0 => self.position / audio.sample_rate as f64,
            _ => 0.0,
        }
    }

    /// Resamples into `out` with linear interpolation and collects the
    /// events the advance produced.
    fn render(
        &mut self,
        out: &mut [f32],
        out_rate: u32,
        interval: f64,
        events: &mut Vec<MediaEvent>,
    ) -> usize {
        if self.paused || self.ended || out_rate == 0 {
            return 0;
        }
        let Some(audio) = self.audio.clone() else {
            return 0;
        };

        let samples = &audio.samples;
        let step = audio.sample_rate as f64 / out_rate as f64;
        let mut produced = 0;
        for slot in out.iter_mut() {
            let index = self.position as usize;
            let Some(&current) = samples.get(index) else {
                break;
            };
            let next = samples.get(index + 1).copied().unwrap_or(current);
            let frac = (self.position - index as f64) as f32;
            *slot = current + (next - current) * frac;
            self.position += step;
            produced += 1;
        }

        if self.position as usize >= samples.len() {
            self.position = samples.len() as f64;
            self.ended = true;
            self.paused = true;
            events.push(MediaEvent::TimeUpdate {
                current_time: audio.duration(),
            });
            events.push(MediaEvent::Ended);
        } else {
            let now = self.current_time();
            if now - self.last_time_update >= interval {
                self.last_time_update = now;
                events.push(MediaEvent::TimeUpdate { current_time: now });
            }
        }
        produced
    }
}

/// Media element backed by a local audio file.
///
/// Locators are URLs (`file://` or relative to a base directory). Setting a
/// source starts decoding on a background thread; metadata and readiness are
/// announced through the element's [`EventHub`] once the whole file has been
/// decoded. Sound only flows after the element has been captured into a
/// graph.
pub struct FileMediaElement {
    id: ElementId,
    source: Option<String>,
    base: Option<Url>,
    hub: EventHub,
    voice: Arc<Mutex<Voice>>,
    generation: Arc<AtomicU64>,
    captured: bool,
    time_update_interval: Duration,
}

impl FileMediaElement {
    /// Relative locators resolve against the current working directory.
    pub fn new(time_update_interval: Duration) -> Self {
        Self {
            id: ElementId::next(),
            source: None,
            base: working_dir_base(),
            hub: EventHub::new(),
            voice: Arc::new(Mutex::new(Voice {
                paused: true,
                ..Voice::default()
            })),
            generation: Arc::new(AtomicU64::new(0)),
            captured: false,
            time_update_interval,
        }
    }

    /// Resolves relative locators against `base` instead.
    pub fn with_base(mut self, base: Url) -> Self {
        self.base = Some(base);
        self
    }

    fn lock_voice(&self) -> Result<MutexGuard<'_, Voice>> {
        self.voice
            .lock()
            .map_err(|_| MusicStreamError::msg("media element voice has been poisoned"))
    }
}

/// The current working directory as a base URL for relative locators.
pub fn working_dir_base() -> Option<Url> {
    std::env::current_dir()
        .ok()
        .and_then(|dir| Url::from_directory_path(dir).ok())
}

/// Turns a locator into a path on disk. Only `file` URLs can be played.
pub fn resolve_locator(base: Option<&Url>, locator: &str) -> Result<PathBuf> {
    let url = match Url::parse(locator) {
        Ok(url) => url,
        Err(url::ParseError::RelativeUrlWithoutBase) => match base {
            Some(base) => base
                .join(locator)
                .map_err(|err| MusicStreamError::load_failure(locator, err.to_string()))?,
            None => return Ok(PathBuf::from(locator)),
        },
        Err(err) => return Err(MusicStreamError::load_failure(locator, err.to_string())),
    };

    if url.scheme() != "file" {
        return Err(MusicStreamError::load_failure(
            locator,
            format!("unsupported scheme '{}'", url.scheme()),
        ));
    }
    url.to_file_path()
        .map_err(|_| MusicStreamError::load_failure(locator, "not a local file"))
}

/// The session names the track itself, so load failures carry only their
/// reason.
fn error_reason(err: MusicStreamError) -> String {
    match err {
        MusicStreamError::ResourceLoadFailure { reason, .. } => reason,
        other => other.to_string(),
    }
}

impl MediaElement for FileMediaElement {
    fn id(&self) -> ElementId {
        self.id
    }

    fn set_source(&mut self, locator: &str) {
        self.source = Some(locator.to_string());
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        match self.lock_voice() {
            Ok(mut voice) => voice.reset(),
            Err(err) => {
                self.hub.emit(MediaEvent::Error(err.to_string()));
                return;
            }
        }

        let path = resolve_locator(self.base.as_ref(), locator);
        let voice = self.voice.clone();
        let current = self.generation.clone();
        let hub = self.hub.clone();
        let spawned = thread::Builder::new()
            .name(format!("decode-{}", self.id.get()))
            .spawn(move || {
                let decoded = path.and_then(|path| decode_file(&path));
                let Ok(mut voice) = voice.lock() else {
                    return;
                };
                if current.load(Ordering::SeqCst) != generation {
                    tracing::debug!("discarding decode of a replaced source");
                    return;
                }
                match decoded {
                    Ok(audio) => {
                        let duration = audio.duration();
                        voice.audio = Some(Arc::new(audio));
                        drop(voice);
                        hub.emit(MediaEvent::LoadedMetadata { duration });
                        hub.emit(MediaEvent::CanPlayThrough);
                    }
                    Err(err) => {
                        drop(voice);
                        hub.emit(MediaEvent::Error(error_reason(err)));
                    }
                }
            });
        if let Err(err) = spawned {
            self.hub
                .emit(MediaEvent::Error(format!("cannot start decoder: {err}")));
        }
    }

    fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }

    fn play(&mut self) -> Result<()> {
        let mut voice = self.lock_voice()?;
        if voice.audio.is_none() {
            return Err(MusicStreamError::msg("no playable source has loaded"));
        }
        if voice.ended {
            voice.position = 0.0;
            voice.last_time_update = 0.0;
            voice.ended = false;
        }
        voice.paused = false;
        Ok(())
    }

    fn pause(&mut self) {
        match self.lock_voice() {
            Ok(mut voice) => voice.paused = true,
            Err(err) => tracing::error!(element = %self.id, error = %err, "cannot pause"),
        }
    }

    fn capture(&mut self) -> Result<Box<dyn SampleSource>> {
        if self.captured {
            return Err(MusicStreamError::WiringConflict {
                track: self.source.clone().unwrap_or_default(),
            });
        }
        self.captured = true;
        Ok(Box::new(VoiceSource {
            voice: self.voice.clone(),
            hub: self.hub.clone(),
            interval: self.time_update_interval.as_secs_f64(),
            events: Vec::new(),
        }))
    }

    fn events(&self) -> &EventHub {
        &self.hub
    }
}

impl Drop for FileMediaElement {
    fn drop(&mut self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
    }
}

impl fmt::Debug for FileMediaElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileMediaElement")
            .field("id", &self.id)
            .field("source", &self.source)
            .field("captured", &self.captured)
            .finish()
    }
}

/// The captured output of a [`FileMediaElement`].
struct VoiceSource {
    voice: Arc<Mutex<Voice>>,
    hub: EventHub,
    interval: f64,
    events: Vec<MediaEvent>,
}

impl SampleSource for VoiceSource {
    fn render(&mut self, out: &mut [f32], sample_rate: u32) -> usize {
        out.fill(0.0);
        let produced = match self.voice.lock() {
            Ok(mut voice) => voice.render(out, sample_rate, self.interval, &mut self.events),
            Err(_) => 0,
        };
        for event in self.events.drain(..) {
            self.hub.emit(event);
        }
        produced
    }
}
