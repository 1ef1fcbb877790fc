//! Frame-index watermark
//!
//! 16 square blocks baked into every video frame at capture time, one per
//! bit of the mesh frame index. Bit *i* is set when the red channel of
//! either of the first two pixels of block *i* exceeds the threshold.

use crate::config::WatermarkLayoutKind;
use crate::constants::watermark::{BLOCK_COUNT, BYTES_PER_PIXEL, DEFAULT_THRESHOLD};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatermarkLayout {
    pub kind: WatermarkLayoutKind,
    /// Block edge in pixels
    pub block_size: u32,
    pub threshold: u8,
}

impl WatermarkLayout {
    pub fn new(kind: WatermarkLayoutKind, block_size: u32) -> Self {
        Self {
            kind,
            block_size: block_size.max(1),
            threshold: DEFAULT_THRESHOLD,
        }
    }

    pub fn with_threshold(mut self, threshold: u8) -> Self {
        self.threshold = threshold;
        self
    }

    /// Top-left pixel of block `bit`.
    pub fn block_origin(&self, bit: usize) -> (u32, u32) {
        let bs = self.block_size;
        match self.kind {
            WatermarkLayoutKind::Strip => (bit as u32 * bs, 0),
            WatermarkLayoutKind::Grid4x4 => ((bit % 4) as u32 * bs, (bit / 4) as u32 * bs),
        }
    }

    /// The two redundant sample pixels of block `bit`.
    pub fn sample_points(&self, bit: usize) -> [(u32, u32); 2] {
        let (x, y) = self.block_origin(bit);
        [(x, y), (x + 1, y)]
    }

    /// Smallest top-left image region containing every sample pixel.
    pub fn region(&self) -> (u32, u32) {
        let (x, y) = self.block_origin(BLOCK_COUNT - 1);
        (x + self.block_size.max(2), y + 1)
    }

    /// Recover the frame index from RGBA8 pixels whose rows are `stride`
    /// pixels wide. `None` if the pixels do not cover the layout.
    pub fn decode(&self, pixels: &[u8], stride: u32) -> Option<u16> {
        let mut index = 0u16;
        for bit in 0..BLOCK_COUNT {
            let mut set = false;
            for (x, y) in self.sample_points(bit) {
                if x >= stride {
                    return None;
                }
                let offset = (y as usize * stride as usize + x as usize) * BYTES_PER_PIXEL;
                set |= *pixels.get(offset)? > self.threshold;
            }
            if set {
                index |= 1 << bit;
            }
        }
        Some(index)
    }

    /// Paint `index` into an RGBA8 image `width` pixels wide.
    pub fn stamp(&self, index: u16, pixels: &mut [u8], width: u32) {
        let height = (pixels.len() / BYTES_PER_PIXEL) as u32 / width.max(1);
        for bit in 0..BLOCK_COUNT {
            let value = if index & (1 << bit) != 0 { 255 } else { 0 };
            let (bx, by) = self.block_origin(bit);
            for y in by..(by + self.block_size).min(height) {
                for x in bx..(bx + self.block_size).min(width) {
                    let offset = (y as usize * width as usize + x as usize) * BYTES_PER_PIXEL;
                    pixels[offset..offset + 3].fill(value);
                    pixels[offset + 3] = 255;
                }
            }
        }
    }

    /// A new RGBA8 image of the given size carrying `index`.
    pub fn encode(&self, index: u16, width: u32, height: u32) -> Vec<u8> {
        let mut pixels = vec![0u8; width as usize * height as usize * BYTES_PER_PIXEL];
        self.stamp(index, &mut pixels, width);
        pixels
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_region() {
        assert_eq!(WatermarkLayout::new(WatermarkLayoutKind::Strip, 8).region(), (128, 1));
        assert_eq!(WatermarkLayout::new(WatermarkLayoutKind::Strip, 1).region(), (17, 1));
        assert_eq!(WatermarkLayout::new(WatermarkLayoutKind::Grid4x4, 4).region(), (16, 13));
    }

    #[test]
    fn test_every_index_round_trips() {
        for kind in [WatermarkLayoutKind::Strip, WatermarkLayoutKind::Grid4x4] {
            let layout = WatermarkLayout::new(kind, 2);
            let (w, h) = layout.region();
            let mut pixels = vec![0u8; (w * h) as usize * BYTES_PER_PIXEL];
            for index in 0..=u16::MAX {
                layout.stamp(index, &mut pixels, w);
                assert_eq!(layout.decode(&pixels, w), Some(index), "{:?} {}", kind, index);
            }
        }
    }

    #[test]
    fn test_single_pixel_dropout_per_block() {
        let layout = WatermarkLayout::new(WatermarkLayoutKind::Strip, 4);
        let (w, h) = layout.region();
        let mut pixels = vec![0u8; (w * h) as usize * BYTES_PER_PIXEL];
        for index in 0..=u16::MAX {
            layout.stamp(index, &mut pixels, w);
            for bit in 0..BLOCK_COUNT {
                // Knock one of the two sample pixels down to black
                let (x, y) = layout.sample_points(bit)[(index as usize + bit) % 2];
                let offset = (y * w + x) as usize * BYTES_PER_PIXEL;
                pixels[offset] = 0;
            }
            assert_eq!(layout.decode(&pixels, w), Some(index));
        }
    }

    #[test]
    fn test_threshold_is_exclusive() {
        let layout = WatermarkLayout::new(WatermarkLayoutKind::Strip, 2);
        let (w, _) = layout.region();
        let mut pixels = vec![0u8; w as usize * BYTES_PER_PIXEL];
        pixels[0] = 128;
        assert_eq!(layout.decode(&pixels, w), Some(0));
        pixels[0] = 129;
        assert_eq!(layout.decode(&pixels, w), Some(1));
    }

    #[test]
    fn test_short_row_is_rejected() {
        let layout = WatermarkLayout::new(WatermarkLayoutKind::Strip, 8);
        assert_eq!(layout.decode(&[0u8; 64], 16), None);
    }
}
