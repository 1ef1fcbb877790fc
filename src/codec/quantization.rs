//! Quantization codec
//!
//! Pure dequantization math for stream attributes. Every accelerated decode
//! path must reproduce these formulas; the WGSL kernels in
//! `mesh/shaders/` are line-for-line ports of the functions below.

use glam::Vec3;

use crate::constants::quant::{DELTA_DOMAIN, OCT_DOMAIN, POSITION_DOMAIN};

/// Axis-aligned domain a quantized attribute was encoded against.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecodeBounds {
    pub min: Vec3,
    pub max: Vec3,
}

impl DecodeBounds {
    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    /// Size of one quantization step for the given domain.
    #[inline]
    pub fn step(&self, domain: f32) -> Vec3 {
        (self.max - self.min) / domain
    }

    pub fn contains(&self, v: Vec3) -> bool {
        v.cmpge(self.min).all() && v.cmple(self.max).all()
    }
}

/// Dequantize one triple: `q * (max - min) / domain + min`.
#[inline]
pub fn dequantize(q: [u32; 3], bounds: &DecodeBounds, domain: f32) -> Vec3 {
    let step = bounds.step(domain);
    Vec3::new(q[0] as f32, q[1] as f32, q[2] as f32) * step + bounds.min
}

/// Keyframe position from its 16-bit quantized components.
#[inline]
pub fn dequantize_position(q: [u16; 3], bounds: &DecodeBounds) -> Vec3 {
    dequantize([q[0] as u32, q[1] as u32, q[2] as u32], bounds, POSITION_DOMAIN)
}

/// Delta offset from its 8-bit quantized components.
#[inline]
pub fn dequantize_delta(q: [u8; 3], bounds: &DecodeBounds) -> Vec3 {
    dequantize([q[0] as u32, q[1] as u32, q[2] as u32], bounds, DELTA_DOMAIN)
}

/// Motion-compensated prediction for a delta frame.
///
/// With two prior frames the vertex is extrapolated at constant velocity,
/// with only one it stays where it was.
#[inline]
pub fn predict(previous: Vec3, previous_previous: Option<Vec3>) -> Vec3 {
    match previous_previous {
        Some(pp) => previous + (previous - pp),
        None => previous,
    }
}

/// Full delta decode for one vertex: prediction plus dequantized correction.
#[inline]
pub fn decode_delta_vertex(
    q: [u8; 3],
    bounds: &DecodeBounds,
    previous: Vec3,
    previous_previous: Option<Vec3>,
) -> Vec3 {
    predict(previous, previous_previous) + dequantize_delta(q, bounds)
}

/// Octahedral normal decode from two 8-bit channels.
#[inline]
pub fn oct_decode(x: u8, y: u8) -> Vec3 {
    let mut fx = x as f32 / OCT_DOMAIN * 2.0 - 1.0;
    let mut fy = y as f32 / OCT_DOMAIN * 2.0 - 1.0;
    let z = 1.0 - fx.abs() - fy.abs();
    let t = (-z).clamp(0.0, 1.0);
    fx += if fx >= 0.0 { -t } else { t };
    fy += if fy >= 0.0 { -t } else { t };
    Vec3::new(fx, fy, z).normalize_or_zero()
}

/// Raw 16-bit normal components are stored as unsigned normalized values.
#[inline]
pub fn unpack_normal16(q: [u16; 3]) -> Vec3 {
    let v = Vec3::new(q[0] as f32, q[1] as f32, q[2] as f32) / POSITION_DOMAIN;
    (v * 2.0 - Vec3::ONE).normalize_or_zero()
}

/// Quantize a value into `domain` steps of `bounds`. Used by stream authoring
/// tools and tests; the player itself only dequantizes.
pub fn quantize(v: Vec3, bounds: &DecodeBounds, domain: f32) -> [u32; 3] {
    let extent = bounds.max - bounds.min;
    let mut out = [0u32; 3];
    for axis in 0..3 {
        let span = extent[axis];
        let n = if span > 0.0 {
            ((v[axis] - bounds.min[axis]) / span * domain).round()
        } else {
            0.0
        };
        out[axis] = n.clamp(0.0, domain) as u32;
    }
    out
}

/// Octahedral encode, inverse of [`oct_decode`] up to 8-bit precision.
pub fn oct_encode(n: Vec3) -> [u8; 2] {
    let n = n / (n.x.abs() + n.y.abs() + n.z.abs());
    let (mut x, mut y) = (n.x, n.y);
    if n.z < 0.0 {
        let ox = (1.0 - y.abs()) * if x >= 0.0 { 1.0 } else { -1.0 };
        let oy = (1.0 - x.abs()) * if y >= 0.0 { 1.0 } else { -1.0 };
        x = ox;
        y = oy;
    }
    let to_byte = |c: f32| ((c * 0.5 + 0.5) * OCT_DOMAIN).round().clamp(0.0, OCT_DOMAIN) as u8;
    [to_byte(x), to_byte(y)]
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn bounds() -> DecodeBounds {
        DecodeBounds::new(Vec3::new(-1.5, 0.0, -2.0), Vec3::new(1.5, 2.0, 2.0))
    }

    #[test]
    fn test_position_roundtrip_within_one_step() {
        let b = bounds();
        let step = b.step(POSITION_DOMAIN);
        let samples = [
            Vec3::new(-1.5, 0.0, -2.0),
            Vec3::new(1.5, 2.0, 2.0),
            Vec3::new(0.123, 1.777, -0.5),
            Vec3::new(-0.9999, 0.0001, 1.9),
        ];

        for v in samples {
            let q = quantize(v, &b, POSITION_DOMAIN);
            let d = dequantize_position([q[0] as u16, q[1] as u16, q[2] as u16], &b);
            let err = (d - v).abs();
            assert!(err.cmple(step).all(), "{v:?} -> {d:?} exceeds step {step:?}");
        }
    }

    #[test]
    fn test_domain_edges() {
        let b = bounds();
        assert_eq!(dequantize_position([0, 0, 0], &b), b.min);
        let top = dequantize_position([65535, 65535, 65535], &b);
        assert_relative_eq!(top.x, b.max.x, epsilon = 1e-5);
        assert_relative_eq!(top.y, b.max.y, epsilon = 1e-5);
        assert_relative_eq!(top.z, b.max.z, epsilon = 1e-5);

        let top = dequantize_delta([255, 255, 255], &b);
        assert_relative_eq!(top.z, b.max.z, epsilon = 1e-5);
    }

    #[test]
    fn test_prediction() {
        let prev = Vec3::new(1.0, 2.0, 3.0);
        let prev_prev = Vec3::new(0.5, 2.0, 4.0);
        assert_eq!(predict(prev, None), prev);
        assert_eq!(predict(prev, Some(prev_prev)), Vec3::new(1.5, 2.0, 2.0));
    }

    #[test]
    fn test_oct_normals_are_unit_length() {
        for x in (0..=255u16).step_by(15) {
            for y in (0..=255u16).step_by(15) {
                let n = oct_decode(x as u8, y as u8);
                assert_relative_eq!(n.length(), 1.0, epsilon = 1e-5);
            }
        }
    }

    #[test]
    fn test_normal16_maps_to_unit_vectors() {
        assert_relative_eq!(unpack_normal16([65535, 32768, 32768]).x, 1.0, epsilon = 1e-4);
        assert_relative_eq!(unpack_normal16([32768, 0, 32768]).y, -1.0, epsilon = 1e-4);

        let n = unpack_normal16([60000, 40000, 1000]);
        assert_relative_eq!(n.length(), 1.0, epsilon = 1e-5);
        assert!(n.x > 0.0 && n.z < 0.0);
    }

    #[test]
    fn test_oct_encode_decode() {
        let normals = [
            Vec3::Z,
            Vec3::NEG_Z,
            Vec3::X,
            Vec3::new(0.3, -0.4, 0.866).normalize(),
            Vec3::new(-0.6, 0.2, -0.77).normalize(),
        ];
        for n in normals {
            let [x, y] = oct_encode(n);
            let d = oct_decode(x, y);
            assert!(d.dot(n) > 0.99, "{n:?} decoded to {d:?}");
        }
    }
}
