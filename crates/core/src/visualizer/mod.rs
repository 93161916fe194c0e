use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::{Analyser, MusicStreamError, Result, VisualizerConfig};

/// Colour scheme of the view.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    #[default]
    Light,
    Dark,
}

impl Theme {
    pub fn toggled(self) -> Self {
        match self {
            Theme::Light => Theme::Dark,
            Theme::Dark => Theme::Light,
        }
    }

    pub fn is_dark(self) -> bool {
        self == Theme::Dark
    }
}

impl fmt::Display for Theme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Theme::Light => "light",
            Theme::Dark => "dark",
        })
    }
}

impl FromStr for Theme {
    type Err = MusicStreamError;

    fn from_str(value: &str) -> Result<Self> {
        match value {
            "light" => Ok(Theme::Light),
            "dark" => Ok(Theme::Dark),
            _ => Err(MusicStreamError::InvalidInput(
                "theme must be either 'light' or 'dark'",
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rgb(pub u8, pub u8, pub u8);

/// One frequency bar in canvas coordinates. `y` is the top edge.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bar {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub color: Rgb,
}

/// Drawing surface the loop paints onto.
pub trait Painter: Send {
    /// Canvas width and height.
    fn size(&self) -> (f32, f32);

    fn paint(&mut self, snapshot: &[u8], bars: &[Bar]);

    fn clear(&mut self);
}

/// Bar colour for a sampled magnitude. Dark mode uses a flat light colour,
/// light mode shifts the red channel with the magnitude.
pub fn bar_color(theme: Theme, magnitude: u8) -> Rgb {
    match theme {
        Theme::Dark => Rgb(255, 255, 255),
        Theme::Light => Rgb(magnitude.saturating_add(100), 15, 117),
    }
}

/// Lays out one bar per bin from left to right. Bars that would start past
/// the right edge of the canvas are dropped.
pub fn bar_layout(
    snapshot: &[u8],
    width: f32,
    height: f32,
    theme: Theme,
    config: &VisualizerConfig,
    bars: &mut Vec<Bar>,
) {
    bars.clear();
    if snapshot.is_empty() || width <= 0.0 {
        return;
    }

    let bar_width = (width / snapshot.len() as f32) * config.bar_width_scale;
    let mut x = 0.0;
    for magnitude in snapshot {
        if x >= width {
            break;
        }
        let bar_height = *magnitude as f32 / config.height_divisor;
        bars.push(Bar {
            x,
            y: height - bar_height,
            width: bar_width,
            height: bar_height,
            color: bar_color(theme, *magnitude),
        });
        x += bar_width + config.bar_gap;
    }
}

/// Outcome of a single frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopStatus {
    Painted,
    Stopped,
}

/// Frame-driven sampling loop for one playing session.
///
/// Each call to [`VisualizationLoop::frame`] samples the analyser and paints
/// the bars. The loop asks `still_playing` first and halts itself as soon
/// as the owning session stops playing; a halted loop clears the canvas and
/// frees its sample buffer.
pub struct VisualizationLoop {
    analyser: Analyser,
    painter: Option<Box<dyn Painter>>,
    still_playing: Box<dyn Fn() -> bool + Send>,
    config: VisualizerConfig,
    buffer: Option<Vec<u8>>,
    bars: Vec<Bar>,
    frames: u64,
}

impl VisualizationLoop {
    /// Starts a loop for one session. `still_playing` is consulted before
    /// every frame.
    pub fn start(
        analyser: Analyser,
        painter: Box<dyn Painter>,
        config: VisualizerConfig,
        still_playing: impl Fn() -> bool + Send + 'static,
    ) -> Result<Self> {
        let bins = analyser.frequency_bin_count()?;
        tracing::debug!(bins, "visualisation loop started");
        Ok(Self {
            analyser,
            painter: Some(painter),
            still_playing: Box::new(still_playing),
            config,
            buffer: Some(vec![0; bins]),
            bars: Vec::new(),
            frames: 0,
        })
    }

    /// Samples the analyser and paints one frame, or halts the loop when
    /// `still_playing` reports the session stopped.
    pub fn frame(&mut self, theme: Theme) -> Result<LoopStatus> {
        if self.buffer.is_none() {
            return Ok(LoopStatus::Stopped);
        }
        if !(self.still_playing)() {
            self.stop();
            return Ok(LoopStatus::Stopped);
        }

        let (Some(buffer), Some(painter)) = (self.buffer.as_mut(), self.painter.as_mut()) else {
            return Ok(LoopStatus::Stopped);
        };
        self.analyser.byte_frequency_data(buffer)?;

        let (width, height) = painter.size();
        bar_layout(buffer, width, height, theme, &self.config, &mut self.bars);
        painter.clear();
        painter.paint(buffer, &self.bars);
        self.frames += 1;
        Ok(LoopStatus::Painted)
    }

    /// Halts scheduling, clears the canvas and releases the sample buffer.
    pub fn stop(&mut self) {
        if self.buffer.take().is_some() {
            self.bars = Vec::new();
            if let Some(painter) = self.painter.as_mut() {
                painter.clear();
            }
            tracing::debug!(frames = self.frames, "visualisation loop stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.buffer.is_some()
    }

    /// Frames painted since the loop started.
    pub fn frames_painted(&self) -> u64 {
        self.frames
    }

    /// Stops the loop and hands the canvas back.
    pub fn into_painter(mut self) -> Option<Box<dyn Painter>> {
        self.stop();
        self.painter.take()
    }
}

impl Drop for VisualizationLoop {
    fn drop(&mut self) {
        self.stop();
    }
}

impl fmt::Debug for VisualizationLoop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VisualizationLoop")
            .field("running", &self.is_running())
            .field("frames", &self.frames)
            .finish()
    }
}
