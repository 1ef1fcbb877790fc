use glam::Vec3;
use rayon::prelude::*;

use super::frame::read_u16s;
use super::gpu::GpuBackend;
use super::DecodeError;
use crate::codec::{self, DecodeBounds};
use crate::config::DecodeBackendKind;

/// Execution path for the per-vertex decode transforms.
///
/// Inputs are the raw little-endian attribute bytes exactly as they sit in
/// the stream buffer; implementations must agree with the scalar path up to
/// floating-point rounding.
pub trait DecodeBackend {
    fn name(&self) -> &'static str;

    /// Keyframe: 16-bit quantized XYZ triples to positions.
    fn dequantize_positions(
        &mut self,
        quantized: &[u8],
        bounds: &DecodeBounds,
    ) -> Result<Vec<Vec3>, DecodeError>;

    /// Delta frame: predict from history, then add the 8-bit correction.
    fn decode_deltas(
        &mut self,
        deltas: &[u8],
        bounds: &DecodeBounds,
        previous: &[Vec3],
        previous_previous: Option<&[Vec3]>,
    ) -> Result<Vec<Vec3>, DecodeError>;

    /// Oct-encoded 8-bit pairs to unit normals.
    fn decode_oct_normals(&mut self, encoded: &[u8]) -> Result<Vec<Vec3>, DecodeError>;
}

/// Build the configured backend, falling back to the scalar path when the
/// accelerated one cannot be created.
pub fn create_backend(kind: DecodeBackendKind) -> Box<dyn DecodeBackend> {
    match kind {
        DecodeBackendKind::Scalar => Box::new(ScalarBackend),
        DecodeBackendKind::Parallel => Box::new(ParallelBackend),
        DecodeBackendKind::Gpu => match GpuBackend::new_headless() {
            Ok(gpu) => Box::new(gpu),
            Err(e) => {
                log::warn!("[DecodeBackend] GPU decode unavailable ({}), using scalar path", e);
                Box::new(ScalarBackend)
            }
        },
    }
}

fn position_triples(quantized: &[u8]) -> Vec<[u16; 3]> {
    let values: Vec<u16> = read_u16s(quantized).collect();
    values.chunks_exact(3).map(|c| [c[0], c[1], c[2]]).collect()
}

fn check_history(
    deltas: &[u8],
    previous: &[Vec3],
    previous_previous: Option<&[Vec3]>,
) -> Result<(), DecodeError> {
    let count = deltas.len() / 3;
    let pp_ok = previous_previous.map_or(true, |pp| pp.len() == count);
    if previous.len() != count || !pp_ok {
        return Err(DecodeError::VertexCountMismatch {
            frame: 0,
            expected: previous.len(),
            actual: count,
        });
    }
    Ok(())
}

/// Single-threaded reference implementation.
#[derive(Debug, Default, Clone, Copy)]
pub struct ScalarBackend;

impl DecodeBackend for ScalarBackend {
    fn name(&self) -> &'static str {
        "scalar"
    }

    fn dequantize_positions(
        &mut self,
        quantized: &[u8],
        bounds: &DecodeBounds,
    ) -> Result<Vec<Vec3>, DecodeError> {
        let mut out = Vec::with_capacity(quantized.len() / 6);
        for q in position_triples(quantized) {
            out.push(codec::dequantize_position(q, bounds));
        }
        Ok(out)
    }

    fn decode_deltas(
        &mut self,
        deltas: &[u8],
        bounds: &DecodeBounds,
        previous: &[Vec3],
        previous_previous: Option<&[Vec3]>,
    ) -> Result<Vec<Vec3>, DecodeError> {
        check_history(deltas, previous, previous_previous)?;

        let mut out = Vec::with_capacity(previous.len());
        for (i, d) in deltas.chunks_exact(3).enumerate() {
            let pp = previous_previous.map(|pp| pp[i]);
            out.push(codec::decode_delta_vertex([d[0], d[1], d[2]], bounds, previous[i], pp));
        }
        Ok(out)
    }

    fn decode_oct_normals(&mut self, encoded: &[u8]) -> Result<Vec<Vec3>, DecodeError> {
        Ok(encoded
            .chunks_exact(2)
            .map(|c| codec::oct_decode(c[0], c[1]))
            .collect())
    }
}

/// Data-parallel CPU path; splits vertices across the rayon pool.
#[derive(Debug, Default, Clone, Copy)]
pub struct ParallelBackend;

impl DecodeBackend for ParallelBackend {
    fn name(&self) -> &'static str {
        "parallel"
    }

    fn dequantize_positions(
        &mut self,
        quantized: &[u8],
        bounds: &DecodeBounds,
    ) -> Result<Vec<Vec3>, DecodeError> {
        let bounds = *bounds;
        Ok(quantized
            .par_chunks_exact(6)
            .map(|c| {
                let q = [
                    u16::from_le_bytes([c[0], c[1]]),
                    u16::from_le_bytes([c[2], c[3]]),
                    u16::from_le_bytes([c[4], c[5]]),
                ];
                codec::dequantize_position(q, &bounds)
            })
            .collect())
    }

    fn decode_deltas(
        &mut self,
        deltas: &[u8],
        bounds: &DecodeBounds,
        previous: &[Vec3],
        previous_previous: Option<&[Vec3]>,
    ) -> Result<Vec<Vec3>, DecodeError> {
        check_history(deltas, previous, previous_previous)?;

        let bounds = *bounds;
        Ok(deltas
            .par_chunks_exact(3)
            .zip(previous.par_iter())
            .enumerate()
            .map(|(i, (d, &prev))| {
                let pp = previous_previous.map(|pp| pp[i]);
                codec::decode_delta_vertex([d[0], d[1], d[2]], &bounds, prev, pp)
            })
            .collect())
    }

    fn decode_oct_normals(&mut self, encoded: &[u8]) -> Result<Vec<Vec3>, DecodeError> {
        Ok(encoded
            .par_chunks_exact(2)
            .map(|c| codec::oct_decode(c[0], c[1]))
            .collect())
    }
}
