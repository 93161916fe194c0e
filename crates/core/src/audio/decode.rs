use std::{fs::File, path::Path};

use symphonia::core::{
    audio::SampleBuffer,
    codecs::{DecoderOptions, CODEC_TYPE_NULL},
    errors::Error as SymphoniaError,
    formats::FormatOptions,
    io::MediaSourceStream,
    meta::MetadataOptions,
    probe::Hint,
};

use crate::{MusicStreamError, Result};

/// A fully decoded track, downmixed to mono.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedAudio {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl DecodedAudio {
    /// Length in seconds.
    pub fn duration(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

/// Decodes an audio file to mono `f32` samples at its native rate.
pub fn decode_file(path: &Path) -> Result<DecodedAudio> {
    let shown = path.display().to_string();
    let fail = |reason: String| MusicStreamError::Decode {
        path: shown.clone(),
        reason,
    };

    let file = File::open(path).map_err(|err| fail(err.to_string()))?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());
    let mut hint = Hint::new();
    if let Some(extension) = path.extension().and_then(|ext| ext.to_str()) {
        hint.with_extension(extension);
    }

    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .map_err(|err| fail(format!("unrecognised format: {err}")))?;
    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL && t.codec_params.sample_rate.is_some())
        .ok_or_else(|| fail("no playable audio track".to_string()))?;
    let track_id = track.id;
    let sample_rate = track
        .codec_params
        .sample_rate
        .ok_or_else(|| fail("sample rate missing".to_string()))?;
    let channels = track
        .codec_params
        .channels
        .map(|channels| channels.count())
        .unwrap_or(1)
        .max(1);

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|err| fail(format!("no decoder: {err}")))?;

    let mut samples = Vec::with_capacity(1024 * 256);
    let mut buffer: Option<SampleBuffer<f32>> = None;

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(err)) if err.kind() == std::io::ErrorKind::UnexpectedEof => {
                break;
            }
            Err(SymphoniaError::ResetRequired) => {
                tracing::warn!(path = %shown, "decoder reset required, stopping early");
                break;
            }
            Err(err) => return Err(fail(format!("read error: {err}"))),
        };
        if packet.track_id() != track_id {
            continue;
        }

        match decoder.decode(&packet) {
            Ok(decoded) => {
                let buffer = buffer.get_or_insert_with(|| {
                    SampleBuffer::<f32>::new(decoded.capacity() as u64, *decoded.spec())
                });
                buffer.copy_interleaved_ref(decoded);
                let raw = buffer.samples();
                if channels > 1 {
                    samples.extend(
                        raw.chunks_exact(channels)
                            .map(|frame| frame.iter().sum::<f32>() / channels as f32),
                    );
                } else {
                    samples.extend_from_slice(raw);
                }
            }
            Err(SymphoniaError::DecodeError(reason)) => {
                tracing::warn!(path = %shown, reason, "skipping undecodable packet");
            }
            Err(err) => return Err(fail(format!("fatal decode error: {err}"))),
        }
    }

    if samples.is_empty() {
        return Err(fail("no samples decoded".to_string()));
    }
    tracing::debug!(path = %shown, samples = samples.len(), sample_rate, "decoded track");
    Ok(DecodedAudio {
        samples,
        sample_rate,
    })
}
