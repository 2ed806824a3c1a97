//! Streaming writer for the Zarr v2/v3 chunked array storage formats.
//!
//! Ported from `acquire-driver-zarr`'s C++ writer stack, keeping its overall
//! shape — a shared `ArrayWriter` lifecycle wrapping version-specific sink
//! layout, a thread pool shared across flush/compression/sink-creation work,
//! and an optional S3 connection pool — while trading the original's
//! inheritance-based dispatch for a trait object (see [`writer`]).
//!
//! The acquire-driver-zarr codebase this crate grew out of ported the LZ4
//! block compressor from `lz4.c`; that encoder is still used here, now as
//! one of two codecs behind the Blosc-style chunk compressor in
//! [`compressor`], alongside `zstd`.

pub mod block;
pub mod compressor;
pub mod dimension;
pub mod dtype;
pub mod error;
pub mod metadata;
pub mod multiscale;
pub mod s3;
pub mod settings;
pub mod shuffle;
pub mod sink;
pub mod sink_factory;
pub mod stream;
pub mod threadpool;
pub mod util;
pub mod writer;

pub use compressor::{BloscParams, Codec, Shuffle};
pub use dimension::{Dimension, DimensionKind};
pub use dtype::DataType;
pub use error::{Result, ZarrError};
pub use s3::S3ConnectionPool;
pub use settings::{S3Settings, StreamSettings, ZarrVersion};
pub use stream::Stream;

/// Default LZ4 acceleration factor used when no Blosc compression level maps
/// to a more aggressive setting. Equivalent to the original `lz4.h`'s
/// `LZ4_ACCELERATION_DEFAULT`; re-exported at the crate root because
/// [`compressor::compress`] reaches for it directly rather than threading it
/// through as a parameter.
pub use block::LZ4_ACCELERATION_DEFAULT;
