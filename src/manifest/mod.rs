//! Stream manifest
//!
//! A glTF document whose `HCAP_holovideo` extension carries the video
//! timeline, and whose meshes are the frames of the geometry stream.

pub mod gltf;
pub mod layout;

pub use gltf::Manifest;
pub use layout::{resolve, BufferSpec, FileInfo, Segment, StreamLayout};

#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("manifest is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("manifest has no HCAP_holovideo extension")]
    MissingExtension,

    #[error("manifest timeline is empty")]
    EmptyTimeline,

    #[error("manifest has no mesh frames")]
    NoFrames,

    #[error("manifest needs a fallback buffer and at least one stream buffer, found {count}")]
    NoStreamBuffers { count: usize },

    #[error("{context} is missing required field {field}")]
    MissingField { context: String, field: &'static str },

    #[error("{kind} index {index} does not exist")]
    BadIndex { kind: &'static str, index: usize },

    #[error("unsupported {attribute} accessor: {reason}")]
    UnsupportedAccessor {
        attribute: &'static str,
        reason: String,
    },

    #[error("accessor {accessor} reads past the end of its buffer view")]
    AccessorOutOfBounds { accessor: usize },

    #[error("buffer view {view} reaches past the addressable range")]
    BufferViewOutOfBounds { view: usize },

    #[error("first mesh frame must be a keyframe")]
    FirstFrameNotKeyframe,

    #[error("frame {frame} has {actual} vertices, its keyframe has {expected}")]
    VertexCountMismatch {
        frame: usize,
        expected: usize,
        actual: usize,
    },

    #[error("frame {frame} streams from the fallback buffer")]
    FallbackReference { frame: usize },

    #[error("fallback frame data must live in buffer 0")]
    FallbackOutsideBuffer,
}
