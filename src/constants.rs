// Holovideo constants - single source of truth for stream format values.
//
// These are bit-exact contract elements shared by the CPU decode paths and
// the WGSL kernels. Changing any of them breaks compatibility with encoded
// streams.

/// Quantization domains
pub mod quant {
    /// Keyframe positions are 16-bit unsigned.
    pub const POSITION_DOMAIN: f32 = 65535.0;
    /// Delta offsets are 8-bit unsigned.
    pub const DELTA_DOMAIN: f32 = 255.0;
    /// Oct-encoded normal channels are 8-bit unsigned.
    pub const OCT_DOMAIN: f32 = 255.0;
}

/// Watermark layout
pub mod watermark {
    /// Number of blocks (and bits) in a frame watermark.
    pub const BLOCK_COUNT: usize = 16;
    /// A block bit is set when the sampled red channel exceeds this.
    pub const DEFAULT_THRESHOLD: u8 = 128;
    /// Bytes per RGBA8 pixel.
    pub const BYTES_PER_PIXEL: usize = 4;
}

/// Pool sizes
pub mod pools {
    /// Resident streaming buffers. The fallback buffer is held outside the ring.
    pub const BUFFER_RING_SLOTS: usize = 3;
    /// Buffers that must be resident before a stream counts as opened.
    pub const MIN_OPEN_BUFFERS: usize = 2;
    /// Segments that must be preloaded before a stream counts as opened.
    pub const MIN_OPEN_SEGMENTS: usize = 2;
}

/// glTF accessor component types used by the stream format
pub mod gltf {
    pub const UNSIGNED_BYTE: u32 = 5121;
    pub const UNSIGNED_SHORT: u32 = 5123;
    pub const FLOAT: u32 = 5126;
}

/// GPU compute limits
pub mod gpu_limits {
    pub const WORKGROUP_SIZE: u32 = 64;
    /// Row pitch alignment required by texture-to-buffer copies.
    pub const COPY_ROW_ALIGNMENT: u32 = 256;
}
