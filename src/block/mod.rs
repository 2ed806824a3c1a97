//! LZ4 block compression engine, ported from lz4.c v1.10.0.
//!
//! Only the one-shot encoder is kept here: the Blosc-family [`crate::compressor`]
//! only ever compresses one chunk buffer at a time, so the streaming/dictionary
//! and decompression halves of the original port (this crate never reads Zarr
//! data back) are not carried forward.

pub mod compress;
pub mod types;

// Re-export the most important public API items at the module level.
pub use compress::{
    compress_bound, compress_default, compress_fast, Lz4Error, LZ4_ACCELERATION_DEFAULT,
    LZ4_ACCELERATION_MAX, LZ4_MAX_INPUT_SIZE,
};
