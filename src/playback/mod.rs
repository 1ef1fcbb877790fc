//! Playback state machine tying loading, decoding and synchronization together.

pub mod controller;
pub mod state;

pub use controller::{CurrentFrame, FrameInfo, HoloPlayer, PlayerEvent};
pub use state::PlaybackState;
