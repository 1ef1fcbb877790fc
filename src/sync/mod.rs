//! Video/mesh synchronization through the frame-index watermark.

pub mod readback;
pub mod synchronizer;
pub mod watermark;

pub use readback::{CpuReadback, GpuReadback, PixelReadback, ReadbackError, ReadbackStatus};
pub use synchronizer::{FrameSynchronizer, SyncSample};
pub use watermark::WatermarkLayout;
