// Progressive loading of stream buffers and video segments.
// Both pools are fixed-capacity and owned by exactly one player.

pub mod buffer_ring;
pub mod fetch;
pub mod video_pool;

pub use buffer_ring::{BufferRing, RingEvent};
pub use fetch::{url_root, FetchError, FetchHandle, FetchResult, Fetcher, FileFetcher};
#[cfg(feature = "native")]
pub use fetch::HttpFetcher;
pub use video_pool::{
    PlayError, PoolEvent, ReadyState, SegmentStatus, VideoBackend, VideoDecoder, VideoEvent,
    VideoImage, VideoPool,
};
