//! Frame Synchronizer
//!
//! Recovers the mesh frame index the video is currently showing by reading
//! its watermark back through a k-slot pipeline. Tick *N* submits the
//! current image into slot `next` and polls the oldest slot in flight,
//! `(next + 1) mod k`. An unfinished transfer makes the whole tick a no-op.

use super::readback::{PixelReadback, ReadbackError, ReadbackStatus};
use super::watermark::WatermarkLayout;
use crate::streaming::VideoImage;

/// A decoded watermark.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncSample {
    pub frame_index: usize,
    /// Readback slot holding the image this index was read from
    pub slot: usize,
    /// The index went backwards since the previous sample (loop wraparound)
    pub wrapped: bool,
}

pub struct FrameSynchronizer {
    readback: Box<dyn PixelReadback>,
    layout: WatermarkLayout,
    next: usize,
    last_sample: Option<usize>,
}

impl FrameSynchronizer {
    pub fn new(readback: Box<dyn PixelReadback>, layout: WatermarkLayout) -> Self {
        Self {
            readback,
            layout,
            next: 0,
            last_sample: None,
        }
    }

    pub fn layout(&self) -> WatermarkLayout {
        self.layout
    }

    /// Segments may use different block sizes.
    pub fn set_layout(&mut self, layout: WatermarkLayout) {
        self.layout = layout;
    }

    pub fn last_sample(&self) -> Option<usize> {
        self.last_sample
    }

    pub fn readback(&self) -> &dyn PixelReadback {
        self.readback.as_ref()
    }

    /// Feed the image on screen; yields a sample once an older submission
    /// has been read back.
    pub fn sample(&mut self, image: VideoImage<'_>) -> Result<Option<SyncSample>, ReadbackError> {
        let depth = self.readback.depth();
        let read = (self.next + 1) % depth;

        let index = match self.readback.poll(read) {
            ReadbackStatus::Pending => return Ok(None),
            ReadbackStatus::Idle => None,
            ReadbackStatus::Ready(pixels) => {
                let index = self.layout.decode(&pixels, self.readback.region().0);
                if index.is_none() {
                    log::warn!("[FrameSync] Readback region does not cover the watermark");
                }
                index
            }
        };

        self.readback.submit(self.next, image)?;
        self.next = (self.next + 1) % depth;

        let Some(index) = index.map(usize::from) else {
            return Ok(None);
        };
        let wrapped = self.last_sample.is_some_and(|last| index < last);
        if wrapped {
            log::debug!(
                "[FrameSync] Backward jump {:?} -> {}",
                self.last_sample,
                index
            );
        }
        self.last_sample = Some(index);

        Ok(Some(SyncSample {
            frame_index: index,
            slot: read,
            wrapped,
        }))
    }

    pub fn reset(&mut self) {
        self.readback.reset();
        self.next = 0;
        self.last_sample = None;
    }
}
