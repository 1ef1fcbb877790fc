//! Mesh stream decoding
//!
//! Turns quantized keyframes and motion-compensated delta frames into
//! renderer-ready positions and normals. Two interchangeable execution paths
//! exist behind [`DecodeBackend`]: CPU (scalar or rayon-parallel) and a wgpu
//! compute path; all of them implement the formulas in
//! [`crate::codec::quantization`].

pub mod backend;
pub mod decoder;
pub mod fallback;
pub mod frame;
pub mod gpu;

pub use backend::{create_backend, DecodeBackend, ParallelBackend, ScalarBackend};
pub use decoder::{FrameBytes, MeshDecoder};
pub use fallback::{FallbackFrame, FallbackImage, FallbackLayout};
pub use frame::{
    run_start, Accessor, ComponentType, DecodedFrame, DeltaFrame, FrameKind, Keyframe, MeshFrame,
    NormalEncoding, QuantizedAttribute, Topology,
};
pub use gpu::{ComputeError, GpuBackend};

/// Errors produced while decoding a mesh frame.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// Backing bytes are not resident yet. Retry once the buffer loads.
    #[error("frame {frame} not ready: buffer {buffer} is not resident")]
    NotReady { frame: usize, buffer: usize },

    #[error("frame {frame} is malformed: {reason}")]
    Malformed { frame: usize, reason: String },

    #[error("delta frame {frame} has no decoded keyframe to predict from")]
    MissingKeyframe { frame: usize },

    #[error("delta frame {frame} does not follow the last decoded frame {previous}")]
    OutOfSequence { frame: usize, previous: usize },

    #[error("frame {frame} has {actual} vertices, its keyframe run has {expected}")]
    VertexCountMismatch {
        frame: usize,
        expected: usize,
        actual: usize,
    },

    #[error("frame index {frame} is outside the stream ({count} frames)")]
    OutOfRange { frame: usize, count: usize },

    #[error("accelerated decode failed: {0}")]
    Compute(#[from] ComputeError),
}

impl DecodeError {
    /// Transient errors resolve by themselves once more data arrives.
    pub fn is_transient(&self) -> bool {
        matches!(self, DecodeError::NotReady { .. })
    }

    /// Attach the frame index to errors raised below the frame level.
    pub(crate) fn at_frame(self, index: usize) -> Self {
        match self {
            DecodeError::NotReady { buffer, .. } => DecodeError::NotReady { frame: index, buffer },
            DecodeError::Malformed { reason, .. } => DecodeError::Malformed { frame: index, reason },
            DecodeError::MissingKeyframe { .. } => DecodeError::MissingKeyframe { frame: index },
            DecodeError::OutOfSequence { previous, .. } => DecodeError::OutOfSequence { frame: index, previous },
            DecodeError::VertexCountMismatch {
                expected, actual, ..
            } => DecodeError::VertexCountMismatch {
                frame: index,
                expected,
                actual,
            },
            other => other,
        }
    }
}
