use std::sync::Arc;

use glam::Vec3;

use super::backend::DecodeBackend;
use super::frame::{
    read_u16s, run_start, ComponentType, DecodedFrame, FrameKind, MeshFrame, NormalEncoding,
    Topology,
};
use super::DecodeError;
use crate::codec;

/// Read access to resident stream buffers, keyed by descriptor index.
pub trait FrameBytes {
    fn buffer_bytes(&self, buffer: usize) -> Option<&[u8]>;
}

/// Stateful decoder for one playback session.
///
/// Holds the decoded frame handed to the renderer plus the positions of the
/// frame before it; together these are the "previous" and
/// "previous-previous" inputs of delta prediction. Nothing older is kept.
pub struct MeshDecoder {
    backend: Box<dyn DecodeBackend>,

    /// Last successfully decoded frame
    current: Option<DecodedFrame>,

    /// Positions of the frame decoded before `current`
    previous: Option<Arc<Vec<Vec3>>>,

    /// Index of the last decoded frame in stream order, `None` before the first
    cursor: Option<usize>,
}

impl MeshDecoder {
    pub fn new(backend: Box<dyn DecodeBackend>) -> Self {
        Self {
            backend,
            current: None,
            previous: None,
            cursor: None,
        }
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub fn current(&self) -> Option<&DecodedFrame> {
        self.current.as_ref()
    }

    pub fn cursor(&self) -> Option<usize> {
        self.cursor
    }

    /// Drop all decoded state; the next frame decoded must be a keyframe.
    pub fn reset(&mut self) {
        self.current = None;
        self.previous = None;
        self.cursor = None;
    }

    /// Rewind the cursor so the next [`advance`](Self::advance) decodes the
    /// keyframe starting `target`'s run.
    pub fn rewind_to_run(&mut self, frames: &[MeshFrame], target: usize) {
        let start = run_start(frames, target);
        self.cursor = start.checked_sub(1);
        log::debug!("[MeshDecoder] Cursor reset to run start {} for target {}", start, target);
    }

    /// Check every buffer the frame reads is resident.
    pub fn ensure_ready(frame: &MeshFrame, bytes: &impl FrameBytes) -> Result<(), DecodeError> {
        for buffer in frame.buffers() {
            if bytes.buffer_bytes(buffer).is_none() {
                log::debug!(
                    "[MeshDecoder] Buffer {} for frame {} not downloaded yet",
                    buffer,
                    frame.index
                );
                return Err(DecodeError::NotReady {
                    frame: frame.index,
                    buffer,
                });
            }
        }
        Ok(())
    }

    /// Decode the frame after the cursor (wrapping at the end of the stream).
    /// The cursor only moves when decoding succeeds.
    pub fn advance(
        &mut self,
        frames: &[MeshFrame],
        bytes: &impl FrameBytes,
    ) -> Result<&DecodedFrame, DecodeError> {
        if frames.is_empty() {
            return Err(DecodeError::OutOfRange { frame: 0, count: 0 });
        }
        let next = self.cursor.map_or(0, |c| (c + 1) % frames.len());
        self.decode(&frames[next], bytes)
    }

    /// Decode one frame. Keyframes reset prediction history; delta frames
    /// must directly follow the last decoded frame.
    pub fn decode(
        &mut self,
        frame: &MeshFrame,
        bytes: &impl FrameBytes,
    ) -> Result<&DecodedFrame, DecodeError> {
        Self::ensure_ready(frame, bytes)?;

        let (positions, topology, previous) = match &frame.kind {
            FrameKind::Keyframe(key) => {
                let idx = frame.index;
                key.positions.accessor.expect_layout(idx, ComponentType::U16, 3)?;
                key.uvs.expect_layout(idx, ComponentType::U16, 2)?;
                key.indices.expect_layout(idx, ComponentType::U16, 1)?;

                let quantized = key
                    .positions
                    .accessor
                    .slice(idx, resident(bytes, key.positions.accessor.buffer, idx)?)?;
                let positions = self
                    .backend
                    .dequantize_positions(quantized, &key.positions.bounds)
                    .map_err(|e| e.at_frame(idx))?;

                let uv_bytes = key.uvs.slice(idx, resident(bytes, key.uvs.buffer, idx)?)?;
                let uv_values: Vec<u16> = read_u16s(uv_bytes).collect();
                let uvs = uv_values.chunks_exact(2).map(|c| [c[0], c[1]]).collect();

                let index_bytes = key.indices.slice(idx, resident(bytes, key.indices.buffer, idx)?)?;
                let indices = read_u16s(index_bytes).collect();

                (positions, Arc::new(Topology { indices, uvs }), None)
            }
            FrameKind::Delta(delta) => {
                let idx = frame.index;
                let current = self
                    .current
                    .as_ref()
                    .ok_or(DecodeError::MissingKeyframe { frame: idx })?;
                if current.frame_index + 1 != idx {
                    return Err(DecodeError::OutOfSequence {
                        frame: idx,
                        previous: current.frame_index,
                    });
                }
                if current.vertex_count() != delta.deltas.accessor.count {
                    return Err(DecodeError::VertexCountMismatch {
                        frame: idx,
                        expected: current.vertex_count(),
                        actual: delta.deltas.accessor.count,
                    });
                }
                delta.deltas.accessor.expect_layout(idx, ComponentType::U8, 3)?;

                let quantized = delta
                    .deltas
                    .accessor
                    .slice(idx, resident(bytes, delta.deltas.accessor.buffer, idx)?)?;
                let positions = self
                    .backend
                    .decode_deltas(
                        quantized,
                        &delta.deltas.bounds,
                        &current.positions,
                        self.previous.as_deref().map(|p| p.as_slice()),
                    )
                    .map_err(|e| e.at_frame(idx))?;

                (
                    positions,
                    current.topology.clone(),
                    Some(current.positions.clone()),
                )
            }
        };

        let normals = match &frame.normals {
            Some(encoding) => Some(self.decode_normals(frame, encoding, bytes, positions.len())?),
            None => None,
        };

        self.previous = previous;
        self.cursor = Some(frame.index);
        Ok(self.current.insert(DecodedFrame {
            frame_index: frame.index,
            positions: Arc::new(positions),
            normals,
            topology,
            bounds: frame.bounds(),
        }))
    }

    fn decode_normals(
        &mut self,
        frame: &MeshFrame,
        encoding: &NormalEncoding,
        bytes: &impl FrameBytes,
        vertex_count: usize,
    ) -> Result<Vec<Vec3>, DecodeError> {
        let idx = frame.index;
        let accessor = encoding.accessor();
        if accessor.count != vertex_count {
            return Err(DecodeError::Malformed {
                frame: idx,
                reason: format!("{} normals for {} vertices", accessor.count, vertex_count),
            });
        }

        let raw = accessor.slice(idx, resident(bytes, accessor.buffer, idx)?)?;
        match encoding {
            NormalEncoding::Oct8(a) => {
                a.expect_layout(idx, ComponentType::U8, 2)?;
                self.backend.decode_oct_normals(raw).map_err(|e| e.at_frame(idx))
            }
            NormalEncoding::Quantized16(a) => {
                a.expect_layout(idx, ComponentType::U16, 3)?;
                let values: Vec<u16> = read_u16s(raw).collect();
                Ok(values
                    .chunks_exact(3)
                    .map(|c| codec::unpack_normal16([c[0], c[1], c[2]]))
                    .collect())
            }
        }
    }
}

fn resident<'a>(
    bytes: &'a impl FrameBytes,
    buffer: usize,
    frame: usize,
) -> Result<&'a [u8], DecodeError> {
    bytes
        .buffer_bytes(buffer)
        .ok_or(DecodeError::NotReady { frame, buffer })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::DecodeBounds;
    use crate::mesh::backend::ScalarBackend;
    use crate::mesh::frame::{Accessor, DeltaFrame, Keyframe, QuantizedAttribute};
    use std::collections::HashMap;

    struct Buffers(HashMap<usize, Vec<u8>>);

    impl FrameBytes for Buffers {
        fn buffer_bytes(&self, buffer: usize) -> Option<&[u8]> {
            self.0.get(&buffer).map(|b| b.as_slice())
        }
    }

    fn accessor(offset: usize, count: usize, components: usize, ty: ComponentType) -> Accessor {
        Accessor {
            buffer: 1,
            byte_offset: offset,
            count,
            components,
            component_type: ty,
        }
    }

    /// One triangle keyframe at offset 0 followed by two delta frames.
    fn stream() -> (Vec<MeshFrame>, Buffers) {
        let mut bytes = Vec::new();
        for q in [0u16, 0, 0, 65535, 0, 0, 0, 65535, 0] {
            bytes.extend_from_slice(&q.to_le_bytes());
        }
        let uv_offset = bytes.len();
        for q in [0u16, 0, 65535, 0, 0, 65535] {
            bytes.extend_from_slice(&q.to_le_bytes());
        }
        let index_offset = bytes.len();
        for q in [0u16, 1, 2] {
            bytes.extend_from_slice(&q.to_le_bytes());
        }
        let delta_offset = bytes.len();
        bytes.extend_from_slice(&[255u8; 9]);
        bytes.extend_from_slice(&[0u8; 9]);

        let unit = DecodeBounds::new(Vec3::ZERO, Vec3::ONE);
        let shift = DecodeBounds::new(Vec3::ZERO, Vec3::splat(0.1));
        let frames = vec![
            MeshFrame {
                index: 0,
                kind: FrameKind::Keyframe(Keyframe {
                    positions: QuantizedAttribute {
                        accessor: accessor(0, 3, 3, ComponentType::U16),
                        bounds: unit,
                    },
                    uvs: accessor(uv_offset, 3, 2, ComponentType::U16),
                    indices: accessor(index_offset, 3, 1, ComponentType::U16),
                }),
                normals: None,
            },
            MeshFrame {
                index: 1,
                kind: FrameKind::Delta(DeltaFrame {
                    deltas: QuantizedAttribute {
                        accessor: accessor(delta_offset, 3, 3, ComponentType::U8),
                        bounds: shift,
                    },
                }),
                normals: None,
            },
            MeshFrame {
                index: 2,
                kind: FrameKind::Delta(DeltaFrame {
                    deltas: QuantizedAttribute {
                        accessor: accessor(delta_offset + 9, 3, 3, ComponentType::U8),
                        bounds: shift,
                    },
                }),
                normals: None,
            },
        ];

        (frames, Buffers(HashMap::from([(1, bytes)])))
    }

    #[test]
    fn test_keyframe_then_deltas() {
        let (frames, bytes) = stream();
        let mut decoder = MeshDecoder::new(Box::new(ScalarBackend));

        let key = decoder.advance(&frames, &bytes).unwrap();
        assert_eq!(key.positions[1], Vec3::X);
        assert_eq!(key.index_count(), 3);

        // No velocity yet: previous + delta(0.1)
        let d1 = decoder.advance(&frames, &bytes).unwrap();
        assert!((d1.positions[1] - Vec3::new(1.1, 0.1, 0.1)).length() < 1e-5);
        assert_eq!(d1.index_count(), 3);

        // Constant velocity prediction, zero correction
        let d2 = decoder.advance(&frames, &bytes).unwrap();
        assert!((d2.positions[1] - Vec3::new(1.2, 0.2, 0.2)).length() < 1e-5);
        assert_eq!(decoder.cursor(), Some(2));
    }

    #[test]
    fn test_not_ready_keeps_cursor() {
        let (frames, bytes) = stream();
        let empty = Buffers(HashMap::new());
        let mut decoder = MeshDecoder::new(Box::new(ScalarBackend));

        let err = decoder.advance(&frames, &empty).unwrap_err();
        assert!(err.is_transient());
        assert_eq!(decoder.cursor(), None);

        assert!(decoder.advance(&frames, &bytes).is_ok());
        assert_eq!(decoder.cursor(), Some(0));
    }

    #[test]
    fn test_delta_without_keyframe() {
        let (frames, bytes) = stream();
        let mut decoder = MeshDecoder::new(Box::new(ScalarBackend));
        assert!(matches!(
            decoder.decode(&frames[1], &bytes),
            Err(DecodeError::MissingKeyframe { frame: 1 })
        ));
    }

    #[test]
    fn test_rewind_to_run() {
        let (frames, bytes) = stream();
        let mut decoder = MeshDecoder::new(Box::new(ScalarBackend));
        for _ in 0..3 {
            decoder.advance(&frames, &bytes).unwrap();
        }
        decoder.rewind_to_run(&frames, 2);
        assert_eq!(decoder.cursor(), None);
        assert_eq!(decoder.advance(&frames, &bytes).unwrap().frame_index, 0);
    }
}
