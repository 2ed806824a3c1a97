//! Local filesystem sink.
//!
//! Grounded on `zarr::FileSink` (`src/writers/file.sink.cpp`): opened once
//! per chunk/shard/metadata file, truncated on creation, and written to at
//! arbitrary offsets for the lifetime of the sink (the v3 shard writer seeks
//! backward to patch the index table trailer after all chunks in a shard
//! have been appended).

use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::Path;

use crate::error::Result;

pub struct FileSink {
    file: File,
    path: String,
}

impl FileSink {
    /// Create (or truncate) the file at `path`. Parent directories are
    /// assumed to already exist — the sink factory pre-creates the
    /// directory tree before any sink is opened.
    pub fn create(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        Ok(FileSink {
            file,
            path: path.display().to_string(),
        })
    }
}

impl super::Sink for FileSink {
    fn write(&mut self, offset: u64, bytes: &[u8]) -> bool {
        if bytes.is_empty() {
            return true;
        }
        let result = self
            .file
            .seek(SeekFrom::Start(offset))
            .and_then(|_| self.file.write_all(bytes));
        if let Err(e) = result {
            log::error!("failed to write {} bytes at offset {offset} to '{}': {e}", bytes.len(), self.path);
            return false;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::Sink as _;
    use std::io::Read;

    #[test]
    fn write_then_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chunk.bin");
        let mut sink = FileSink::create(&path).unwrap();
        assert!(sink.write(0, b"hello "));
        assert!(sink.write(6, b"world"));
        drop(sink);

        let mut contents = Vec::new();
        File::open(&path).unwrap().read_to_end(&mut contents).unwrap();
        assert_eq!(contents, b"hello world");
    }

    #[test]
    fn create_truncates_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chunk.bin");
        std::fs::write(&path, b"stale contents are long").unwrap();

        let mut sink = FileSink::create(&path).unwrap();
        assert!(sink.write(0, b"new"));
        drop(sink);

        let contents = std::fs::read(&path).unwrap();
        assert_eq!(contents, b"new");
    }

    #[test]
    fn out_of_order_writes_land_at_correct_offsets() {
        // The v3 shard writer appends chunks in order, then seeks back to
        // patch the index table at offset 0.
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shard.bin");
        let mut sink = FileSink::create(&path).unwrap();
        assert!(sink.write(8, b"BODY"));
        assert!(sink.write(0, b"HEAD0000"));
        drop(sink);

        let contents = std::fs::read(&path).unwrap();
        assert_eq!(contents, b"HEAD0000BODY");
    }

    #[test]
    fn empty_write_is_a_no_op_success() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.bin");
        let mut sink = FileSink::create(&path).unwrap();
        assert!(sink.write(0, b""));
    }
}
