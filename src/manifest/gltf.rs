//! Serde model of the stream manifest.
//!
//! Only the subset of glTF the player reads is modelled. Unknown fields are
//! ignored so manifests written by newer capture tools still load.

use std::collections::HashMap;

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    #[serde(default)]
    pub buffers: Vec<BufferDef>,
    #[serde(default)]
    pub buffer_views: Vec<BufferViewDef>,
    #[serde(default)]
    pub accessors: Vec<AccessorDef>,
    #[serde(default)]
    pub meshes: Vec<MeshDef>,
    #[serde(default)]
    pub images: Vec<ImageDef>,
    #[serde(default)]
    pub extensions: RootExtensions,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BufferDef {
    pub uri: String,
    pub byte_length: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BufferViewDef {
    pub buffer: usize,
    #[serde(default)]
    pub byte_offset: usize,
    pub byte_length: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessorDef {
    pub buffer_view: usize,
    /// Relative to the buffer view, not the buffer
    #[serde(default)]
    pub byte_offset: usize,
    pub component_type: u32,
    pub count: usize,
    #[serde(rename = "type")]
    pub element_type: String,
    #[serde(default)]
    pub extensions: AccessorExtensions,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AccessorExtensions {
    #[serde(rename = "HCAP_holovideo")]
    pub holovideo: Option<DecodeRange>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecodeRange {
    pub decode_min: [f32; 3],
    pub decode_max: [f32; 3],
}

#[derive(Debug, Clone, Deserialize)]
pub struct MeshDef {
    #[serde(default)]
    pub primitives: Vec<PrimitiveDef>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PrimitiveDef {
    /// Plain glTF attributes; only the fallback mesh uses these
    #[serde(default)]
    pub attributes: HashMap<String, usize>,
    pub indices: Option<usize>,
    #[serde(default)]
    pub extensions: PrimitiveExtensions,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PrimitiveExtensions {
    #[serde(rename = "HCAP_holovideo")]
    pub holovideo: Option<StreamPrimitive>,
}

/// Streamed attributes of a frame.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StreamPrimitive {
    #[serde(default)]
    pub attributes: HashMap<String, usize>,
    pub indices: Option<usize>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageDef {
    pub uri: Option<String>,
    pub buffer_view: Option<usize>,
    #[serde(default)]
    pub extensions: ImageExtensions,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ImageExtensions {
    #[serde(rename = "HCAP_holovideo")]
    pub holovideo: Option<VideoImage>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoImage {
    pub width: u32,
    pub height: u32,
    /// Watermark block edge in pixels
    #[serde(default = "default_block_size")]
    pub block_size: u32,
    pub hls_uri: Option<String>,
    pub dash_uri: Option<String>,
}

fn default_block_size() -> u32 {
    1
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RootExtensions {
    #[serde(rename = "HCAP_holovideo")]
    pub holovideo: Option<StreamExtension>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamExtension {
    #[serde(default)]
    pub timeline: Vec<TimelineEntry>,
    #[serde(default)]
    pub max_vertex_count: usize,
    #[serde(default)]
    pub max_index_count: usize,
    #[serde(default)]
    pub bounding_min: [f32; 3],
    #[serde(default)]
    pub bounding_max: [f32; 3],
}

#[derive(Debug, Clone, Deserialize)]
pub struct TimelineEntry {
    /// Index into `images`
    pub image: usize,
}

impl Manifest {
    pub fn from_slice(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}
