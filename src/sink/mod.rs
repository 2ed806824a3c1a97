//! Offset-addressed write sink abstraction (component C4, the `Sink` half).
//!
//! Grounded on `acquire::sink::zarr::Sink` (`src/writers/sink.hh`): a single
//! `write(offset, bytes) -> bool` contract implemented by both a local file
//! ([`file::FileSink`]) and an S3 object ([`s3::S3Sink`]). A chunk writer
//! doesn't know or care which backend it's talking to — it only knows the
//! byte range it's placing.

pub mod file;
pub mod s3;

/// A destination for chunk or shard bytes, addressed by absolute offset.
///
/// `write` returns `false` (not an `Err`) on failure, mirroring the C++
/// `[[nodiscard]] bool write(...)` contract: a failed write is not
/// exceptional, it's routine I/O fallout that the caller folds into the
/// writer's failure state (spec §7 — "any sink `write` returning false ...
/// marks the writer failed").
pub trait Sink: Send {
    fn write(&mut self, offset: u64, bytes: &[u8]) -> bool;
}
