//! Streaming playback core for volumetric video.
//!
//! A stream is a glTF-style manifest, a set of binary buffers holding
//! quantized mesh frames, and a timeline of video segments whose frames
//! carry the mesh frame index as a 16-bit watermark. [`HoloPlayer`] loads
//! both progressively, reads the watermark back from the video on screen
//! and decodes the matching mesh frame.
//!
//! ```no_run
//! use std::sync::Arc;
//! use holovideo::{FileFetcher, HoloPlayer, OpenOptions, PlayerConfig, VideoBackend};
//!
//! fn run(videos: Box<dyn VideoBackend>) -> holovideo::PlayerResult<()> {
//!     let mut player = HoloPlayer::new(PlayerConfig::default(), Arc::new(FileFetcher), videos)?;
//!     player.open("streams/capture.gltf", OpenOptions::default());
//!     loop {
//!         if player.tick()? {
//!             let _info = player.current_frame_info();
//!             // upload and draw
//!         }
//!     }
//! }
//! ```

pub mod codec;
pub mod config;
pub mod constants;
pub mod error;
pub mod manifest;
pub mod mesh;
pub mod playback;
pub mod streaming;
pub mod sync;

pub use codec::DecodeBounds;
pub use config::{
    ConfigError, DecodeBackendKind, OpenOptions, PlayerConfig, PreloadStrategy, VideoFormat,
    WatermarkLayoutKind,
};
pub use error::{PlayerError, PlayerResult};
pub use manifest::{FileInfo, ManifestError, StreamLayout};
pub use mesh::{DecodeError, DecodedFrame, FallbackFrame, MeshDecoder};
pub use playback::{CurrentFrame, FrameInfo, HoloPlayer, PlaybackState, PlayerEvent};
pub use streaming::{
    FetchError, FetchHandle, Fetcher, FileFetcher, PlayError, ReadyState, VideoBackend,
    VideoDecoder, VideoEvent, VideoImage,
};
#[cfg(feature = "native")]
pub use streaming::HttpFetcher;
pub use sync::WatermarkLayout;
