//! S3 object sink: single `PutObject` for small objects, multipart upload
//! for anything spanning more than one 5 MiB part.
//!
//! Grounded on `zarr::S3Sink` (`src/internal/s3.sink.cpp`). `write` ignores
//! its offset argument (matching the original, which also discards it —
//! `S3Sink::write(size_t _, ...)`): object bodies are always appended in
//! the order the writer produces them, since neither a single `PutObject`
//! nor `UploadPart` supports writing into the middle of an existing S3
//! object. The shard writer only seeks backward on filesystem sinks, never
//! S3 ones — an S3-backed v3 array writer instead buffers a whole shard in
//! memory and closes the sink once, in order (see [`crate::writer::v3`]).

use std::sync::Arc;

use crate::error::{Result, ZarrError};
use crate::s3::S3ConnectionPool;

/// Minimum size of an S3 multipart part, and the size of this sink's
/// internal buffer.
pub const PART_SIZE: usize = 5 * 1024 * 1024;

pub struct S3Sink {
    bucket_name: String,
    object_key: String,
    pool: Arc<S3ConnectionPool>,
    buffer: Vec<u8>,
    upload_id: Option<String>,
    parts: Vec<(i32, String)>,
    failed: bool,
}

impl S3Sink {
    pub fn new(bucket_name: impl Into<String>, object_key: impl Into<String>, pool: Arc<S3ConnectionPool>) -> Result<Self> {
        let bucket_name = bucket_name.into();
        let object_key = object_key.into();
        if bucket_name.is_empty() || object_key.is_empty() {
            return Err(ZarrError::InvalidArgument(
                "S3 sink requires a non-empty bucket name and object key".into(),
            ));
        }
        Ok(S3Sink {
            bucket_name,
            object_key,
            pool,
            buffer: Vec::with_capacity(PART_SIZE),
            upload_id: None,
            parts: Vec::new(),
            failed: false,
        })
    }

    fn is_multipart(&self) -> bool {
        self.upload_id.is_some()
    }

    fn multipart_upload_id(&mut self) -> Result<String> {
        if let Some(id) = &self.upload_id {
            return Ok(id.clone());
        }
        let conn = self
            .pool
            .get_connection()
            .ok_or_else(|| ZarrError::IoError("S3 connection pool is shut down".into()))?;
        let id = conn.create_multipart_object(&self.bucket_name, &self.object_key);
        self.pool.return_connection(conn);
        let id = id?;
        self.upload_id = Some(id.clone());
        Ok(id)
    }

    fn flush_part(&mut self) -> bool {
        if self.buffer.is_empty() {
            return true;
        }
        let upload_id = match self.multipart_upload_id() {
            Ok(id) => id,
            Err(e) => {
                log::error!("failed to start multipart upload for '{}': {e}", self.object_key);
                self.buffer.clear();
                return false;
            }
        };

        let conn = match self.pool.get_connection() {
            Some(c) => c,
            None => {
                log::error!("S3 connection pool is shut down, cannot flush part for '{}'", self.object_key);
                return false;
            }
        };
        let part_number = self.parts.len() as i32 + 1;
        let result = conn.upload_multipart_object_part(
            &self.bucket_name,
            &self.object_key,
            &upload_id,
            &self.buffer,
            part_number,
        );
        self.pool.return_connection(conn);

        match result {
            Ok(etag) => {
                self.parts.push((part_number, etag));
                self.buffer.clear();
                true
            }
            Err(e) => {
                log::error!(
                    "failed to upload part {part_number} of object '{}': {e}",
                    self.object_key
                );
                self.buffer.clear();
                false
            }
        }
    }

    fn put_object(&mut self) -> bool {
        if self.buffer.is_empty() {
            return true;
        }
        let conn = match self.pool.get_connection() {
            Some(c) => c,
            None => {
                log::error!("S3 connection pool is shut down, cannot put object '{}'", self.object_key);
                return false;
            }
        };
        let result = conn.put_object(&self.bucket_name, &self.object_key, &self.buffer);
        self.pool.return_connection(conn);

        match result {
            Ok(_) => {
                self.buffer.clear();
                true
            }
            Err(e) => {
                log::error!("failed to upload object '{}': {e}", self.object_key);
                self.buffer.clear();
                false
            }
        }
    }

    fn finalize_multipart(&mut self) -> bool {
        let Some(upload_id) = self.upload_id.take() else {
            return true;
        };
        let conn = match self.pool.get_connection() {
            Some(c) => c,
            None => {
                log::error!("S3 connection pool is shut down, cannot complete upload of '{}'", self.object_key);
                return false;
            }
        };
        let result = conn.complete_multipart_object(&self.bucket_name, &self.object_key, &upload_id, &self.parts);
        self.pool.return_connection(conn);

        if let Err(e) = result {
            log::error!("failed to complete multipart upload of '{}': {e}", self.object_key);
            return false;
        }
        true
    }

    /// Flush any buffered bytes and finalize the object (single PUT or
    /// multipart completion, whichever this sink ended up using). Idempotent
    /// after the first call returns.
    pub fn close(&mut self) -> bool {
        let ok = if self.is_multipart() {
            let flushed = self.flush_part();
            let completed = self.finalize_multipart();
            flushed && completed
        } else {
            self.put_object()
        };
        self.failed |= !ok;
        ok
    }
}

impl super::Sink for S3Sink {
    fn write(&mut self, _offset: u64, mut bytes: &[u8]) -> bool {
        if bytes.is_empty() {
            return true;
        }
        while !bytes.is_empty() {
            let space = PART_SIZE - self.buffer.len();
            let take = space.min(bytes.len());
            self.buffer.extend_from_slice(&bytes[..take]);
            bytes = &bytes[take..];

            if self.buffer.len() == PART_SIZE && !self.flush_part() {
                self.failed = true;
                return false;
            }
        }
        true
    }
}

impl Drop for S3Sink {
    fn drop(&mut self) {
        if self.failed {
            return;
        }
        if !self.close() {
            log::error!("S3Sink for '{}' failed to finalize on drop", self.object_key);
        }
    }
}
