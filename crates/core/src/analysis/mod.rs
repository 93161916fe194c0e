use std::{
    f32::consts::PI,
    fmt,
    sync::{Arc, Mutex, MutexGuard},
};

use realfft::{num_complex::Complex32, RealFftPlanner, RealToComplex};

use crate::{AudioConfig, MusicStreamError, Result};

const BLACKMAN_ALPHA: f32 = 0.16;

/// Real-time frequency analyser fed with mono samples.
///
/// Mirrors the behaviour of an analyser node: the most recent `fft_size`
/// samples are windowed, transformed, smoothed over time and mapped onto a
/// byte range spanning `[min_decibels, max_decibels]`. Clones share the same
/// underlying state, which is how the audio graph hands out "the" analyser
/// of a track.
#[derive(Clone)]
pub struct Analyser {
    shared: Arc<Mutex<AnalyserCore>>,
}

impl Analyser {
    /// Builds an analyser with the FFT size, smoothing and decibel range of
    /// `config`.
    pub fn new(config: &AudioConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            shared: Arc::new(Mutex::new(AnalyserCore::new(config))),
        })
    }

    /// Returns `true` when both handles point at the same analyser.
    pub fn same(a: &Analyser, b: &Analyser) -> bool {
        Arc::ptr_eq(&a.shared, &b.shared)
    }

    pub fn fft_size(&self) -> Result<usize> {
        Ok(self.lock()?.fft_size)
    }

    /// Number of frequency bins, half the FFT size.
    pub fn frequency_bin_count(&self) -> Result<usize> {
        Ok(self.lock()?.fft_size / 2)
    }

    /// Appends freshly rendered samples to the analysis window.
    pub fn push_samples(&self, samples: &[f32]) -> Result<()> {
        if samples.is_empty() {
            return Ok(());
        }
        self.lock()?.push(samples);
        Ok(())
    }

    /// Writes the current byte magnitudes into `out`. Only the first
    /// `min(out.len(), frequency_bin_count)` entries are touched.
    pub fn byte_frequency_data(&self, out: &mut [u8]) -> Result<()> {
        let mut core = self.lock()?;
        core.analyse()?;
        let scale = 255.0 / (core.max_db - core.min_db);
        for (byte, magnitude) in out.iter_mut().zip(core.smoothed.iter()) {
            let db = linear_to_db(*magnitude);
            *byte = (scale * (db - core.min_db)).clamp(0.0, 255.0).floor() as u8;
        }
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, AnalyserCore>> {
        self.shared
            .lock()
            .map_err(|_| MusicStreamError::msg("analyser has been poisoned"))
    }
}

impl fmt::Debug for Analyser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.shared.lock() {
            Ok(core) => f
                .debug_struct("Analyser")
                .field("fft_size", &core.fft_size)
                .field("smoothing", &core.smoothing)
                .finish(),
            Err(_) => f.debug_struct("Analyser").finish_non_exhaustive(),
        }
    }
}

struct AnalyserCore {
    fft_size: usize,
    smoothing: f32,
    min_db: f32,
    max_db: f32,
    history: Vec<f32>,
    write_pos: usize,
    window: Vec<f32>,
    smoothed: Vec<f32>,
    fft: FftResources,
}

impl AnalyserCore {
    fn new(config: &AudioConfig) -> Self {
        let size = config.fft_size;
        let mut planner = RealFftPlanner::<f32>::new();
        let plan = planner.plan_fft_forward(size);
        let fft = FftResources {
            scratch: plan.make_scratch_vec(),
            spectrum: plan.make_output_vec(),
            input: plan.make_input_vec(),
            plan,
        };

        Self {
            fft_size: size,
            smoothing: config.smoothing_time_constant,
            min_db: config.min_decibels,
            max_db: config.max_decibels,
            history: vec![0.0; size],
            write_pos: 0,
            window: blackman_window(size),
            smoothed: vec![0.0; size / 2],
            fft,
        }
    }

    fn push(&mut self, samples: &[f32]) {
        let size = self.fft_size;
        let samples = if samples.len() > size {
            &samples[samples.len() - size..]
        } else {
            samples
        };
        for sample in samples {
            self.history[self.write_pos] = *sample;
            self.write_pos = (self.write_pos + 1) % size;
        }
    }

    fn analyse(&mut self) -> Result<()> {
        let size = self.fft_size;
        for (index, slot) in self.fft.input.iter_mut().enumerate() {
            let sample = self.history[(self.write_pos + index) % size];
            *slot = sample * self.window[index];
        }

        self.fft
            .plan
            .process_with_scratch(&mut self.fft.input, &mut self.fft.spectrum, &mut self.fft.scratch)
            .map_err(|err| MusicStreamError::msg(format!("fft failed: {err}")))?;

        let tau = self.smoothing;
        let norm = 1.0 / size as f32;
        for (previous, bin) in self.smoothed.iter_mut().zip(self.fft.spectrum.iter()) {
            let magnitude = bin.norm() * norm;
            let value = tau * *previous + (1.0 - tau) * magnitude;
            *previous = if value.is_finite() { value } else { 0.0 };
        }
        Ok(())
    }
}

struct FftResources {
    plan: Arc<dyn RealToComplex<f32>>,
    scratch: Vec<Complex32>,
    spectrum: Vec<Complex32>,
    input: Vec<f32>,
}

fn blackman_window(len: usize) -> Vec<f32> {
    let a0 = 0.5 * (1.0 - BLACKMAN_ALPHA);
    let a1 = 0.5;
    let a2 = 0.5 * BLACKMAN_ALPHA;
    (0..len)
        .map(|index| {
            let phase = 2.0 * PI * index as f32 / len as f32;
            a0 - a1 * phase.cos() + a2 * (2.0 * phase).cos()
        })
        .collect()
}

fn linear_to_db(value: f32) -> f32 {
    if value <= 0.0 {
        f32::NEG_INFINITY
    } else {
        20.0 * value.log10()
    }
}
