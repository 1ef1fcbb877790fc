//! Crate-level error taxonomy.
//!
//! Each subsystem owns its error enum; `PlayerError` wraps them for the
//! public player API.

use crate::config::ConfigError;
use crate::manifest::ManifestError;
use crate::mesh::{ComputeError, DecodeError};
use crate::playback::PlaybackState;
use crate::streaming::{FetchError, PlayError};
use crate::sync::ReadbackError;

#[derive(Debug, thiserror::Error)]
pub enum PlayerError {
    #[error("fetch failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("invalid manifest: {0}")]
    Manifest(#[from] ManifestError),

    #[error("mesh decode failed: {0}")]
    Decode(#[from] DecodeError),

    #[error("GPU error: {0}")]
    Compute(#[from] ComputeError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("watermark readback failed: {0}")]
    Readback(#[from] ReadbackError),

    #[error(transparent)]
    Play(#[from] PlayError),

    #[error("{operation} is not valid while {state:?}")]
    InvalidState {
        operation: &'static str,
        state: PlaybackState,
    },
}

impl PlayerError {
    /// Errors that clear up by themselves on a later tick.
    pub fn is_transient(&self) -> bool {
        match self {
            PlayerError::Decode(e) => e.is_transient(),
            PlayerError::Readback(ReadbackError::Busy { .. }) => true,
            _ => false,
        }
    }
}

pub type PlayerResult<T> = Result<T, PlayerError>;
