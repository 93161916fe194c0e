use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{MusicStreamError, Result, Theme};

/// Top-level configuration structure for the application.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub audio: AudioConfig,
    pub visualizer: VisualizerConfig,
    pub playback: PlaybackConfig,
    pub theme: Theme,
}

impl AppConfig {
    /// Reads a JSON configuration file. Missing fields take their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        tracing::debug!(path = %path.display(), "loaded configuration");
        Ok(config)
    }

    /// Checks every section, stopping at the first invalid one.
    pub fn validate(&self) -> Result<()> {
        self.audio.validate()?;
        self.visualizer.validate()
    }

    /// Initial policy and theme surface derived from the configuration.
    pub fn settings(&self) -> Settings {
        Settings {
            exclusive_playback: self.playback.exclusive,
            theme: self.theme,
        }
    }
}

/// Configuration specific to the audio graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Analyser window length. High resolution keeps the bars smooth.
    pub fft_size: usize,
    pub smoothing_time_constant: f32,
    pub min_decibels: f32,
    pub max_decibels: f32,
    /// Rate of the software output when no device drives the mixer.
    pub sample_rate: u32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            fft_size: 32_768,
            smoothing_time_constant: 0.8,
            min_decibels: -100.0,
            max_decibels: -30.0,
            sample_rate: 48_000,
        }
    }
}

impl AudioConfig {
    pub const MIN_FFT_SIZE: usize = 32;
    pub const MAX_FFT_SIZE: usize = 32_768;

    /// Rejects analyser settings the FFT or the byte mapping cannot use.
    pub fn validate(&self) -> Result<()> {
        if !self.fft_size.is_power_of_two()
            || !(Self::MIN_FFT_SIZE..=Self::MAX_FFT_SIZE).contains(&self.fft_size)
        {
            return Err(MusicStreamError::InvalidInput(
                "fft size must be a power of two between 32 and 32768",
            ));
        }
        if !(0.0..=1.0).contains(&self.smoothing_time_constant) {
            return Err(MusicStreamError::InvalidInput(
                "smoothing time constant must lie in [0, 1]",
            ));
        }
        if !self.min_decibels.is_finite() || !self.max_decibels.is_finite() {
            return Err(MusicStreamError::InvalidInput("decibel range must be finite"));
        }
        if self.min_decibels >= self.max_decibels {
            return Err(MusicStreamError::InvalidInput(
                "min decibels must be below max decibels",
            ));
        }
        if self.sample_rate == 0 {
            return Err(MusicStreamError::InvalidInput("sample rate must be positive"));
        }
        Ok(())
    }
}

/// Geometry of the frequency bar canvas.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VisualizerConfig {
    pub width: f32,
    pub height: f32,
    /// Multiplier applied to `width / bin_count` for each bar.
    pub bar_width_scale: f32,
    pub bar_gap: f32,
    /// Magnitudes are divided by this before becoming bar heights.
    pub height_divisor: f32,
    pub frame_rate: u32,
}

impl Default for VisualizerConfig {
    fn default() -> Self {
        Self {
            width: 600.0,
            height: 50.0,
            bar_width_scale: 2.5,
            bar_gap: 1.0,
            height_divisor: 5.0,
            frame_rate: 60,
        }
    }
}

impl VisualizerConfig {
    /// Rejects geometry that cannot produce finite, visible bars.
    pub fn validate(&self) -> Result<()> {
        if self.frame_rate == 0 {
            return Err(MusicStreamError::InvalidInput("frame rate must be positive"));
        }
        let positive = |value: f32| value.is_finite() && value > 0.0;
        if !positive(self.width) || !positive(self.height) {
            return Err(MusicStreamError::InvalidInput("canvas size must be positive"));
        }
        if !positive(self.bar_width_scale) {
            return Err(MusicStreamError::InvalidInput("bar width scale must be positive"));
        }
        if !positive(self.height_divisor) {
            return Err(MusicStreamError::InvalidInput(
                "bar height divisor must be positive",
            ));
        }
        if !self.bar_gap.is_finite() || self.bar_gap < 0.0 {
            return Err(MusicStreamError::InvalidInput("bar gap must not be negative"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    /// Only one track audible at a time.
    pub exclusive: bool,
    pub time_update_interval_ms: u64,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            exclusive: true,
            time_update_interval_ms: 250,
        }
    }
}

/// Externally mutable policy and theme switches. The core only reads these
/// and reacts when they change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    pub exclusive_playback: bool,
    pub theme: Theme,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            exclusive_playback: true,
            theme: Theme::Light,
        }
    }
}

impl Settings {
    pub fn toggle_theme(&mut self) {
        self.theme = self.theme.toggled();
    }

    pub fn toggle_exclusive(&mut self) {
        self.exclusive_playback = !self.exclusive_playback;
    }
}
