use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc, Arc,
    },
    thread::{self, JoinHandle},
};

use cpal::{
    traits::{DeviceTrait, HostTrait, StreamTrait},
    FromSample, SizedSample, Stream, StreamConfig,
};

use super::Mixer;
use crate::{MusicStreamError, Result};

/// Default output device pulling from a [`Mixer`].
///
/// The stream lives on its own thread because it cannot be moved between
/// threads; dropping the handle stops it.
pub struct DeviceOutput {
    stop: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
    sample_rate: u32,
}

impl DeviceOutput {
    /// Opens the default device and switches the mixer to its sample rate.
    /// Call before the audio context is created.
    pub fn open(mixer: Mixer) -> Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let (ready_tx, ready_rx) = mpsc::channel::<Result<u32>>();
        let flag = stop.clone();

        let worker = thread::Builder::new()
            .name("audio-output".to_string())
            .spawn(move || {
                let stream = match build_stream(mixer) {
                    Ok((stream, rate)) => {
                        let _ = ready_tx.send(Ok(rate));
                        stream
                    }
                    Err(err) => {
                        let _ = ready_tx.send(Err(err));
                        return;
                    }
                };
                while !flag.load(Ordering::SeqCst) {
                    thread::park();
                }
                drop(stream);
            })?;

        let sample_rate = ready_rx
            .recv()
            .map_err(|_| MusicStreamError::AudioUnavailable("output thread exited".to_string()))??;
        tracing::info!(sample_rate, "opened audio output device");
        Ok(Self {
            stop,
            worker: Some(worker),
            sample_rate,
        })
    }

    /// Rate negotiated with the device.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

impl Drop for DeviceOutput {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(worker) = self.worker.take() {
            worker.thread().unpark();
            if worker.join().is_err() {
                tracing::error!("audio output thread panicked");
            }
        }
    }
}

fn build_stream(mixer: Mixer) -> Result<(Stream, u32)> {
    let unavailable = |reason: String| MusicStreamError::AudioUnavailable(reason);

    let device = cpal::default_host()
        .default_output_device()
        .ok_or_else(|| unavailable("no output device available".to_string()))?;
    let supported = device
        .default_output_config()
        .map_err(|err| unavailable(format!("no default output config: {err}")))?;
    let sample_rate = supported.sample_rate().0;
    mixer.set_sample_rate(sample_rate)?;

    let format = supported.sample_format();
    let config: StreamConfig = supported.into();
    let stream = match format {
        cpal::SampleFormat::F32 => open_stream::<f32>(&device, &config, mixer),
        cpal::SampleFormat::I16 => open_stream::<i16>(&device, &config, mixer),
        cpal::SampleFormat::U16 => open_stream::<u16>(&device, &config, mixer),
        other => Err(unavailable(format!("unsupported sample format {other:?}"))),
    }?;
    stream
        .play()
        .map_err(|err| unavailable(format!("failed to start stream: {err}")))?;
    Ok((stream, sample_rate))
}

fn open_stream<T>(device: &cpal::Device, config: &StreamConfig, mixer: Mixer) -> Result<Stream>
where
    T: SizedSample + FromSample<f32>,
{
    let channels = usize::from(config.channels).max(1);
    let mut mono = Vec::new();
    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                mono.resize(data.len() / channels, 0.0);
                if mixer.render(&mut mono).is_err() {
                    mono.fill(0.0);
                }
                for (frame, sample) in data.chunks_mut(channels).zip(&mono) {
                    for slot in frame {
                        *slot = T::from_sample(*sample);
                    }
                }
            },
            |err| tracing::error!(error = %err, "audio output stream error"),
            None,
        )
        .map_err(|err| MusicStreamError::AudioUnavailable(format!("failed to build stream: {err}")))
}
