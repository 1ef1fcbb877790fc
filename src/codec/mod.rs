//! Stream attribute codecs

pub mod quantization;

pub use quantization::{
    decode_delta_vertex, dequantize, dequantize_delta, dequantize_position, oct_decode, oct_encode,
    predict, quantize, unpack_normal16, DecodeBounds,
};
