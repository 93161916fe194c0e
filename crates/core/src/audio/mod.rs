//! Native playback: file decoding, file-backed media elements and the
//! software mixer that implements [`AudioBackend`](crate::graph::AudioBackend).
//! [`download_track`] copies a track's file out under its title.
//!
//! Without the `device-output` feature the mixer is headless and is advanced
//! by the frame loop; with it, a `cpal` stream pulls from the mixer.

mod decode;
#[cfg(feature = "device-output")]
mod device;
mod element;
mod export;
mod mixer;

pub use decode::{decode_file, DecodedAudio};
#[cfg(feature = "device-output")]
pub use device::DeviceOutput;
pub use element::{resolve_locator, working_dir_base, FileMediaElement};
pub use export::download_track;
pub use mixer::{Mixer, SoftwareBackend};
