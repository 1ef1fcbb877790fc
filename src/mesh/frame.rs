//! Mesh frame records and decoded output.
//!
//! Frames reference their bytes by buffer descriptor index plus byte range,
//! never by owning pointers: the buffer ring decides where (and whether) those
//! bytes currently live.

use std::sync::Arc;

use glam::Vec3;

use super::DecodeError;
use crate::codec::DecodeBounds;

/// Scalar storage type of an accessor component.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentType {
    U8,
    U16,
    F32,
}

impl ComponentType {
    pub fn size(self) -> usize {
        match self {
            ComponentType::U8 => 1,
            ComponentType::U16 => 2,
            ComponentType::F32 => 4,
        }
    }
}

/// Typed view into one buffer descriptor's bytes.
#[derive(Debug, Clone, PartialEq)]
pub struct Accessor {
    /// Buffer descriptor index the bytes live in
    pub buffer: usize,
    /// Absolute offset from the start of the buffer
    pub byte_offset: usize,
    /// Element count (vertices, indices, ...)
    pub count: usize,
    /// Components per element (1 for scalars, 2 for VEC2, 3 for VEC3)
    pub components: usize,
    pub component_type: ComponentType,
}

impl Accessor {
    /// `None` when the size overflows `usize`.
    pub fn byte_len(&self) -> Option<usize> {
        self.count
            .checked_mul(self.components)?
            .checked_mul(self.component_type.size())
    }

    /// Borrow this accessor's byte range out of its buffer.
    pub fn slice<'a>(&self, frame: usize, bytes: &'a [u8]) -> Result<&'a [u8], DecodeError> {
        let end = self
            .byte_len()
            .and_then(|len| self.byte_offset.checked_add(len));
        end.and_then(|end| bytes.get(self.byte_offset..end))
            .ok_or_else(|| DecodeError::Malformed {
                frame,
                reason: format!(
                    "accessor of {} x {} elements at offset {} exceeds buffer {} ({} bytes)",
                    self.count,
                    self.components,
                    self.byte_offset,
                    self.buffer,
                    bytes.len()
                ),
            })
    }

    pub(crate) fn expect_layout(
        &self,
        frame: usize,
        component_type: ComponentType,
        components: usize,
    ) -> Result<(), DecodeError> {
        if self.component_type != component_type || self.components != components {
            return Err(DecodeError::Malformed {
                frame,
                reason: format!(
                    "expected {}x{:?}, found {}x{:?}",
                    components, component_type, self.components, self.component_type
                ),
            });
        }
        Ok(())
    }
}

/// Quantized attribute together with the domain it was quantized against.
#[derive(Debug, Clone, PartialEq)]
pub struct QuantizedAttribute {
    pub accessor: Accessor,
    pub bounds: DecodeBounds,
}

/// Normal storage variants.
#[derive(Debug, Clone, PartialEq)]
pub enum NormalEncoding {
    /// Unsigned 16-bit XYZ
    Quantized16(Accessor),
    /// Octahedral, two unsigned 8-bit channels
    Oct8(Accessor),
}

impl NormalEncoding {
    pub fn accessor(&self) -> &Accessor {
        match self {
            NormalEncoding::Quantized16(a) | NormalEncoding::Oct8(a) => a,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Keyframe {
    /// 16-bit quantized positions
    pub positions: QuantizedAttribute,
    /// 16-bit normalized texture coordinates
    pub uvs: Accessor,
    /// 16-bit triangle indices
    pub indices: Accessor,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeltaFrame {
    /// 8-bit quantized per-vertex correction
    pub deltas: QuantizedAttribute,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FrameKind {
    Keyframe(Keyframe),
    Delta(DeltaFrame),
}

/// One frame of the geometry stream.
#[derive(Debug, Clone, PartialEq)]
pub struct MeshFrame {
    pub index: usize,
    pub kind: FrameKind,
    pub normals: Option<NormalEncoding>,
}

impl MeshFrame {
    pub fn is_keyframe(&self) -> bool {
        matches!(self.kind, FrameKind::Keyframe(_))
    }

    pub fn vertex_count(&self) -> usize {
        match &self.kind {
            FrameKind::Keyframe(k) => k.positions.accessor.count,
            FrameKind::Delta(d) => d.deltas.accessor.count,
        }
    }

    /// Descriptor whose residency gates playback of this frame.
    pub fn primary_buffer(&self) -> usize {
        match &self.kind {
            FrameKind::Keyframe(k) => k.indices.buffer,
            FrameKind::Delta(d) => d.deltas.accessor.buffer,
        }
    }

    /// Every descriptor this frame reads from.
    pub fn buffers(&self) -> Vec<usize> {
        let mut out = match &self.kind {
            FrameKind::Keyframe(k) => vec![k.indices.buffer, k.positions.accessor.buffer, k.uvs.buffer],
            FrameKind::Delta(d) => vec![d.deltas.accessor.buffer],
        };
        if let Some(n) = &self.normals {
            out.push(n.accessor().buffer);
        }
        out.sort_unstable();
        out.dedup();
        out
    }

    /// Bounding box of the frame's own quantization domain.
    pub fn bounds(&self) -> DecodeBounds {
        match &self.kind {
            FrameKind::Keyframe(k) => k.positions.bounds,
            FrameKind::Delta(d) => d.deltas.bounds,
        }
    }
}

/// Index of the keyframe that starts the run containing `target`.
pub fn run_start(frames: &[MeshFrame], target: usize) -> usize {
    let end = target.min(frames.len().saturating_sub(1));
    (0..=end).rev().find(|&i| frames[i].is_keyframe()).unwrap_or(0)
}

/// Topology shared by every frame of a keyframe run.
#[derive(Debug, Clone, PartialEq)]
pub struct Topology {
    pub indices: Vec<u16>,
    pub uvs: Vec<[u16; 2]>,
}

/// Materialized frame ready for the renderer.
#[derive(Debug, Clone)]
pub struct DecodedFrame {
    pub frame_index: usize,
    pub positions: Arc<Vec<Vec3>>,
    pub normals: Option<Vec<Vec3>>,
    pub topology: Arc<Topology>,
    pub bounds: DecodeBounds,
}

impl DecodedFrame {
    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }

    pub fn index_count(&self) -> usize {
        self.topology.indices.len()
    }

    /// Position data as bytes, for copying into a renderer vertex buffer.
    pub fn position_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(self.positions.as_slice())
    }

    pub fn normal_bytes(&self) -> Option<&[u8]> {
        self.normals.as_deref().map(bytemuck::cast_slice)
    }

    pub fn index_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(self.topology.indices.as_slice())
    }

    pub fn uv_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(self.topology.uvs.as_slice())
    }
}

pub(crate) fn read_u16s(bytes: &[u8]) -> impl Iterator<Item = u16> + '_ {
    bytes.chunks_exact(2).map(|c| u16::from_le_bytes([c[0], c[1]]))
}

pub(crate) fn read_f32s(bytes: &[u8]) -> impl Iterator<Item = f32> + '_ {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
}
