//! Top-level streaming entry point (component C11): validates settings,
//! builds the pool of writers (one per pyramid level when multiscale is
//! on), routes each incoming frame through the multiscale cascade, and
//! finalizes every writer in order on close.
//!
//! Grounded on `zarr::Zarr` (`src/zarr.storage.cpp`/`.hh`): construction
//! validates settings then creates directories or verifies the S3 bucket
//! before any writer exists; `append` slices the incoming buffer into
//! frame-sized pieces and feeds them to the level-0 writer one at a time,
//! cascading each accepted frame down through `downsample()`-derived levels
//! the way the original's `Zarr::append_` walks its scaled-frame writers.

use std::sync::Arc;

use crate::dimension::Dimension;
use crate::dtype::DataType;
use crate::error::{Result, ZarrError};
use crate::metadata;
use crate::multiscale::{self, PyramidLevelBuffer};
use crate::s3::S3ConnectionPool;
use crate::settings::{StreamSettings, ZarrVersion};
use crate::sink_factory::SinkFactory;
use crate::threadpool::ThreadPool;
use crate::writer::v2::V2Backend;
use crate::writer::v3::V3Backend;
use crate::writer::{ArrayWriter, ArrayWriterConfig};

/// One pyramid level's writer, version-erased so [`Stream`] can hold a
/// uniform `Vec` across levels regardless of `ZarrVersion`.
enum LevelWriter {
    V2(ArrayWriter<V2Backend>),
    V3(ArrayWriter<V3Backend>),
}

impl LevelWriter {
    fn write(&mut self, frame: &[u8]) -> Result<usize> {
        match self {
            LevelWriter::V2(w) => w.write(frame),
            LevelWriter::V3(w) => w.write(frame),
        }
    }

    fn finalize(&mut self) -> bool {
        match self {
            LevelWriter::V2(w) => w.finalize(),
            LevelWriter::V3(w) => w.finalize(),
        }
    }

    fn config(&self) -> &ArrayWriterConfig {
        match self {
            LevelWriter::V2(w) => w.config(),
            LevelWriter::V3(w) => w.config(),
        }
    }
}

/// A single open Zarr dataset. Owns the writer for every pyramid level, the
/// shared thread pool and (if configured) S3 connection pool, and the
/// pending-frame buffers that drive pairwise-average downsampling.
pub struct Stream {
    writers: Vec<LevelWriter>,
    /// One pending-frame buffer per level above 0 (`pyramid_buffers[i]`
    /// feeds `writers[i + 1]`).
    pyramid_buffers: Vec<PyramidLevelBuffer>,
    frame_bytes: usize,
    data_type: DataType,
    failed: bool,
    finalized: bool,
    _thread_pool: Arc<ThreadPool>,
    _s3_pool: Option<Arc<S3ConnectionPool>>,
}

impl Stream {
    /// Validate `settings`, build the thread pool and (if configured) S3
    /// connection pool, build every pyramid level's writer, create
    /// filesystem directories (or verify the S3 bucket), and write
    /// group-level metadata.
    pub fn new(settings: StreamSettings) -> Result<Self> {
        let store_path = settings.validate()?;

        let thread_pool = Arc::new(ThreadPool::new(settings.max_threads, |e| {
            log::error!("zarrite worker job failed: {e}");
        }));

        let s3_pool = match &settings.s3 {
            Some(s3) => Some(Arc::new(S3ConnectionPool::new(
                settings.max_threads.max(1),
                &s3.endpoint,
                &s3.access_key_id,
                &s3.secret_access_key,
            )?)),
            None => None,
        };
        let sink_factory = Arc::new(SinkFactory::new(Arc::clone(&thread_pool), s3_pool.clone()));

        let s3_bucket = settings.s3.as_ref().map(|s| s.bucket.clone());
        if let Some(bucket) = &s3_bucket {
            if !sink_factory.bucket_exists(bucket)? {
                return Err(ZarrError::InvalidSettings(format!(
                    "S3 bucket '{bucket}' does not exist"
                )));
            }
        }

        let configs = build_level_configs(&settings, &store_path, s3_bucket.as_deref());
        let n_levels = configs.len() as u32;

        let writers: Vec<LevelWriter> = configs
            .into_iter()
            .map(|config| match settings.version {
                ZarrVersion::V2 => {
                    let backend = V2Backend::new(&config);
                    LevelWriter::V2(ArrayWriter::new(
                        config,
                        Arc::clone(&thread_pool),
                        Arc::clone(&sink_factory),
                        backend,
                    ))
                }
                ZarrVersion::V3 => {
                    let backend = V3Backend::new(&config);
                    LevelWriter::V3(ArrayWriter::new(
                        config,
                        Arc::clone(&thread_pool),
                        Arc::clone(&sink_factory),
                        backend,
                    ))
                }
            })
            .collect();

        let pyramid_buffers = if settings.multiscale {
            (1..writers.len())
                .map(|_| PyramidLevelBuffer::new(settings.data_type))
                .collect()
        } else {
            Vec::new()
        };

        let frame_bytes = settings.frame_height as usize
            * settings.frame_width as usize
            * settings.data_type.bytes_per_sample();

        write_group_metadata(
            &sink_factory,
            &store_path,
            s3_bucket.as_deref(),
            settings.version,
            settings.multiscale,
            &settings.dimensions,
            n_levels,
            &settings.custom_metadata,
        )?;

        Ok(Stream {
            writers,
            pyramid_buffers,
            frame_bytes,
            data_type: settings.data_type,
            failed: false,
            finalized: false,
            _thread_pool: thread_pool,
            _s3_pool: s3_pool,
        })
    }

    /// Feed frame-sized slices of `buffer` to the level-0 writer, cascading
    /// every accepted frame through the multiscale pyramid. Returns the
    /// number of bytes consumed; a short count (including `0`) means the
    /// stream has failed and no further frames should be appended.
    pub fn append(&mut self, buffer: &[u8]) -> Result<usize> {
        if self.failed {
            return Ok(0);
        }
        if self.frame_bytes == 0 || buffer.len() % self.frame_bytes != 0 {
            return Err(ZarrError::InvalidArgument(format!(
                "buffer of {} bytes is not a whole number of {}-byte frames",
                buffer.len(),
                self.frame_bytes
            )));
        }

        let mut consumed = 0usize;
        for frame in buffer.chunks(self.frame_bytes) {
            let n = self.write_one_frame(frame)?;
            if n == 0 {
                self.failed = true;
                break;
            }
            consumed += n;
        }
        Ok(consumed)
    }

    /// Write one frame to level 0, then cascade it through the pyramid:
    /// downsample it into level 1's pending-frame buffer, and whenever that
    /// buffer completes a pair, write the averaged frame to level 1 and feed
    /// it onward into level 2, and so on.
    fn write_one_frame(&mut self, frame: &[u8]) -> Result<usize> {
        let n = self.writers[0].write(frame)?;
        if n == 0 {
            return Ok(0);
        }

        let mut current = frame.to_vec();
        for level in 1..self.writers.len() {
            let (height, width) = y_x_extent(self.writers[level - 1].config());
            let (downsampled, _, _) =
                multiscale::downsample_frame(&current, height, width, self.data_type);

            match self.pyramid_buffers[level - 1].push(downsampled) {
                Some(averaged) => {
                    if self.writers[level].write(&averaged)? == 0 {
                        return Ok(0);
                    }
                    current = averaged;
                }
                None => break,
            }
        }

        Ok(n)
    }

    /// Flush every level's trailing partial chunk, write final array
    /// metadata, and close every sink (S3 sinks complete their multipart
    /// upload on close). Idempotent.
    pub fn finalize(&mut self) -> bool {
        if self.finalized {
            return !self.failed;
        }
        self.finalized = true;

        let mut ok = !self.failed;
        for writer in &mut self.writers {
            if !writer.finalize() {
                ok = false;
            }
        }
        ok
    }
}

impl Drop for Stream {
    fn drop(&mut self) {
        if !self.finalize() {
            log::error!("zarrite stream: finalize on drop reported one or more failures");
        }
    }
}

fn y_x_extent(config: &ArrayWriterConfig) -> (u32, u32) {
    let n = config.dimensions.len();
    (
        config.dimensions[n - 2].array_size_px,
        config.dimensions[n - 1].array_size_px,
    )
}

/// Level 0's config plus, when multiscale is on, one downsampled config per
/// additional pyramid level. Recursion runs through [`multiscale::downsample_config`]
/// until it reports no further level is possible; a level is always added
/// once computed, even if it's the last one the recursion allows.
fn build_level_configs(
    settings: &StreamSettings,
    store_path: &str,
    s3_bucket: Option<&str>,
) -> Vec<ArrayWriterConfig> {
    let mut configs = vec![ArrayWriterConfig {
        dimensions: settings.dimensions.clone(),
        level_of_detail: 0,
        dataset_root: store_path.to_string(),
        s3_bucket: s3_bucket.map(str::to_string),
        data_type: settings.data_type,
        compression: settings.compression,
    }];

    if settings.multiscale {
        // A dimension list has at most 32 axes, so no legitimate geometry
        // downsamples more than 32 times; this bound only guards against a
        // malformed config that would otherwise loop forever.
        for _ in 0..32 {
            let (next, can_continue) = multiscale::downsample_config(configs.last().unwrap());
            configs.push(next);
            if !can_continue {
                break;
            }
        }
    }

    configs
}

#[allow(clippy::too_many_arguments)]
fn write_group_metadata(
    sink_factory: &SinkFactory,
    store_path: &str,
    s3_bucket: Option<&str>,
    version: ZarrVersion,
    multiscale: bool,
    dims: &[Dimension],
    n_levels: u32,
    custom_metadata: &serde_json::Value,
) -> Result<()> {
    let attrs = if multiscale {
        metadata::multiscales_block(dims, n_levels)
    } else {
        serde_json::json!({})
    };
    let attrs = metadata::with_custom_metadata(attrs, custom_metadata);

    match version {
        ZarrVersion::V2 => {
            let mut sinks = sink_factory.make_metadata_sinks(
                store_path,
                s3_bucket,
                &[".zgroup".to_string(), ".zattrs".to_string()],
            )?;
            write_json(&mut sinks, ".zgroup", &serde_json::json!({ "zarr_format": 2 }))?;
            write_json(&mut sinks, ".zattrs", &attrs)?;
        }
        ZarrVersion::V3 => {
            let mut sinks = sink_factory.make_metadata_sinks(
                store_path,
                s3_bucket,
                &["zarr.json".to_string(), "meta/root.group.json".to_string()],
            )?;
            let marker = serde_json::json!({
                "zarr_format": 3,
                "metadata_encoding": "https://purl.org/zarr/spec/protocol/core/3.0",
                "metadata_key_suffix": ".json",
                "extensions": [],
            });
            write_json(&mut sinks, "zarr.json", &marker)?;
            write_json(
                &mut sinks,
                "meta/root.group.json",
                &serde_json::json!({ "attributes": attrs }),
            )?;
        }
    }

    Ok(())
}

fn write_json(
    sinks: &mut std::collections::HashMap<String, Box<dyn crate::sink::Sink>>,
    key: &str,
    value: &serde_json::Value,
) -> Result<()> {
    let Some(mut sink) = sinks.remove(key) else {
        return Ok(());
    };
    let bytes = serde_json::to_vec_pretty(value)?;
    if sink.write(0, &bytes) {
        Ok(())
    } else {
        Err(ZarrError::IoError(format!("failed to write '{key}'")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compressor::BloscParams;
    use crate::dimension::DimensionKind;
    use crate::settings::ZarrVersion;

    fn dims(array_sizes: &[(u32, u32)], kinds: &[DimensionKind]) -> Vec<Dimension> {
        array_sizes
            .iter()
            .zip(kinds)
            .enumerate()
            .map(|(i, (&(array, chunk), &kind))| {
                Dimension::new(format!("d{i}"), kind, array, chunk, 1).unwrap()
            })
            .collect()
    }

    fn base_settings(root: &str) -> StreamSettings {
        StreamSettings {
            store_path: root.to_string(),
            s3: None,
            custom_metadata: serde_json::Value::Null,
            data_type: DataType::U8,
            compression: None,
            dimensions: dims(
                &[(0, 2), (4, 4), (4, 4)],
                &[DimensionKind::Time, DimensionKind::Space, DimensionKind::Space],
            ),
            multiscale: false,
            version: ZarrVersion::V2,
            frame_height: 4,
            frame_width: 4,
            max_threads: 2,
        }
    }

    #[test]
    fn append_short_writes_zero_on_malformed_buffer_length() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_str().unwrap().to_string();
        let mut stream = Stream::new(base_settings(&root)).unwrap();
        // 4x4 u8 frame is 16 bytes; 17 is not a whole number of frames.
        assert!(stream.append(&vec![0u8; 17]).is_err());
    }

    #[test]
    fn append_writes_frames_and_group_metadata_appears() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_str().unwrap().to_string();
        let mut stream = Stream::new(base_settings(&root)).unwrap();

        let frame = vec![0u8; 16];
        let n = stream.append(&frame).unwrap();
        assert_eq!(n, 16);
        assert!(stream.finalize());

        assert!(std::path::Path::new(&root).join(".zgroup").is_file());
        assert!(std::path::Path::new(&root).join(".zattrs").is_file());
    }

    #[test]
    fn multiscale_stream_builds_one_writer_per_pyramid_level() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_str().unwrap().to_string();

        let mut settings = base_settings(&root);
        settings.dimensions = dims(
            &[(0, 1), (135, 135), (240, 240)],
            &[DimensionKind::Time, DimensionKind::Space, DimensionKind::Space],
        );
        settings.frame_height = 135;
        settings.frame_width = 240;
        settings.multiscale = true;
        settings.data_type = DataType::U16;
        settings.compression = Some(BloscParams {
            codec: crate::compressor::Codec::Lz4,
            level: 1,
            shuffle: crate::compressor::Shuffle::Byte,
        });

        let stream = Stream::new(settings).unwrap();
        // 135x240 -> level1 68x120 (below its own chunk size of 135x240) ->
        // recursion stops: exactly 2 levels.
        assert_eq!(stream.writers.len(), 2);
        assert_eq!(stream.pyramid_buffers.len(), 1);
    }
}
