//! Still frame shown before streaming starts.
//!
//! Lives in buffer descriptor 0 as plain float geometry plus an encoded
//! still image. Once captured it is owned outside the buffer ring and kept
//! across rewinds.

use std::ops::Range;

use glam::Vec3;

use super::frame::{read_f32s, read_u16s, Accessor, ComponentType, Topology};
use super::DecodeError;
use crate::codec::DecodeBounds;

/// Where the fallback frame's pieces sit inside descriptor 0.
#[derive(Debug, Clone, PartialEq)]
pub struct FallbackLayout {
    pub positions: Accessor,
    pub normals: Option<Accessor>,
    pub uvs: Accessor,
    pub indices: Accessor,
    /// Byte range of the encoded (JPEG) still image
    pub image: Option<Range<usize>>,
    pub bounds: DecodeBounds,
}

/// Decoded RGBA8 still image.
#[derive(Debug, Clone)]
pub struct FallbackImage {
    pub width: u32,
    pub height: u32,
    pub rgba: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct FallbackFrame {
    pub positions: Vec<Vec3>,
    pub normals: Option<Vec<Vec3>>,
    pub topology: Topology,
    pub image: Option<FallbackImage>,
    pub bounds: DecodeBounds,
}

impl FallbackFrame {
    /// Build the still frame from the bytes of descriptor 0.
    ///
    /// A still image that fails to decode is logged and dropped; the mesh is
    /// still usable without it.
    pub fn from_bytes(layout: &FallbackLayout, bytes: &[u8]) -> Result<Self, DecodeError> {
        layout.positions.expect_layout(0, ComponentType::F32, 3)?;
        layout.uvs.expect_layout(0, ComponentType::U16, 2)?;
        layout.indices.expect_layout(0, ComponentType::U16, 1)?;

        let positions = read_vec3s(layout.positions.slice(0, bytes)?);

        let normals = match &layout.normals {
            Some(accessor) => {
                accessor.expect_layout(0, ComponentType::F32, 3)?;
                Some(read_vec3s(accessor.slice(0, bytes)?))
            }
            None => None,
        };

        let uv_values: Vec<u16> = read_u16s(layout.uvs.slice(0, bytes)?).collect();
        let uvs = uv_values.chunks_exact(2).map(|c| [c[0], c[1]]).collect();
        let indices = read_u16s(layout.indices.slice(0, bytes)?).collect();

        let image = layout
            .image
            .as_ref()
            .and_then(|range| bytes.get(range.clone()))
            .and_then(|encoded| match image::load_from_memory(encoded) {
                Ok(img) => {
                    let rgba = img.to_rgba8();
                    Some(FallbackImage {
                        width: rgba.width(),
                        height: rgba.height(),
                        rgba: rgba.into_raw(),
                    })
                }
                Err(e) => {
                    log::warn!("[Fallback] Could not decode still image: {}", e);
                    None
                }
            });

        log::debug!(
            "[Fallback] Captured {} vertices, {} indices, image: {}",
            positions.len(),
            uv_values.len() / 2,
            image.is_some()
        );

        Ok(Self {
            positions,
            normals,
            topology: Topology { indices, uvs },
            image,
            bounds: layout.bounds,
        })
    }

    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }

    pub fn index_count(&self) -> usize {
        self.topology.indices.len()
    }
}

fn read_vec3s(bytes: &[u8]) -> Vec<Vec3> {
    let values: Vec<f32> = read_f32s(bytes).collect();
    values
        .chunks_exact(3)
        .map(|c| Vec3::new(c[0], c[1], c[2]))
        .collect()
}
