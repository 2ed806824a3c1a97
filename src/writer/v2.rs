//! Zarr v2 array writer: one file per chunk, `.zarray`/`.zattrs` metadata.
//!
//! Grounded on `zarr::ZarrV2ArrayWriter` (`src/writers/zarrv2.array.writer.
//! cpp`): `data_root_`/`meta_root_` are both `<dataset_root>/<level>`;
//! `flush_impl_` asserts `data_sinks_` is empty (a fresh chunk-file row is
//! created on every flush, since `should_rollover_` is unconditionally
//! `true`) and dispatches one write job per chunk at offset 0.
//!
//! `write_array_metadata` emits both files spec §6 lists under the level
//! directory: `.zarray` (the array's own shape/chunking/compressor
//! document) and `.zattrs` (an empty object here — this level has no
//! per-array attributes of its own; group-level attributes live at the
//! dataset root, written by [`crate::stream`]).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::dimension;
use crate::sink::Sink;

use super::{ArrayWriterBackend, ArrayWriterConfig, WriterState};

pub struct V2Backend {
    data_root: String,
}

impl V2Backend {
    pub fn new(config: &ArrayWriterConfig) -> Self {
        V2Backend {
            data_root: format!("{}/{}", config.dataset_root, config.level_of_detail),
        }
    }
}

impl ArrayWriterBackend for V2Backend {
    fn flush_impl(&mut self, state: &mut WriterState, encoded: &[Vec<u8>]) -> bool {
        if state.data_sinks.is_empty() {
            let row = state.append_chunk_index.to_string();
            let dims = state.config.dimensions.clone();
            let n_units = dimension::chunks_in_memory(&dims);
            match state.sink_factory.make_data_sinks(
                &self.data_root,
                state.config.s3_bucket.as_deref(),
                &row,
                n_units,
                |i| dimension::chunk_lattice_coords(i, &dims),
            ) {
                Ok(sinks) => state.data_sinks = sinks,
                Err(e) => {
                    log::error!(
                        "v2 writer: failed to create chunk sinks under '{}/{row}': {}",
                        self.data_root,
                        e
                    );
                    return false;
                }
            }
        }

        if state.data_sinks.len() != encoded.len() {
            log::error!(
                "v2 writer: {} chunk sinks but {} chunk buffers",
                state.data_sinks.len(),
                encoded.len()
            );
            return false;
        }

        let slots: Vec<Mutex<Option<Box<dyn Sink>>>> = state
            .data_sinks
            .drain(..)
            .map(|s| Mutex::new(Some(s)))
            .collect();
        let slots = Arc::new(slots);
        let all_ok = Arc::new(AtomicBool::new(true));

        for (i, bytes) in encoded.iter().cloned().enumerate() {
            let slots = Arc::clone(&slots);
            let all_ok = Arc::clone(&all_ok);
            state.thread_pool.submit(Box::new(move || {
                let mut slot = slots[i].lock().unwrap();
                let sink = slot.as_mut().expect("chunk sink missing");
                let ok = sink.write(0, &bytes);
                drop(slot);
                if ok {
                    Ok(())
                } else {
                    all_ok.store(false, Ordering::SeqCst);
                    Err(format!("failed to write chunk {i}"))
                }
            }));
        }
        state.thread_pool.await_completion();

        let slots = Arc::try_unwrap(slots)
            .unwrap_or_else(|_| panic!("chunk sink slots still shared after barrier"));
        state.data_sinks = slots
            .into_iter()
            .map(|m| m.into_inner().unwrap().expect("chunk sink missing after flush"))
            .collect();

        all_ok.load(Ordering::SeqCst)
    }

    fn write_array_metadata(&mut self, state: &mut WriterState) -> bool {
        let mut zattrs_sink = match state.sink_factory.make_metadata_sinks(
            &self.data_root,
            state.config.s3_bucket.as_deref(),
            &[".zattrs".to_string()],
        ) {
            Ok(mut sinks) => sinks.remove(".zattrs"),
            Err(e) => {
                log::error!("v2 writer: failed to create '.zattrs' sink: {e}");
                return false;
            }
        };
        let zattrs_ok = match zattrs_sink.as_mut() {
            Some(sink) => sink.write(0, b"{}"),
            None => false,
        };
        if !zattrs_ok {
            return false;
        }

        if state.metadata_sink.is_none() {
            match state.sink_factory.make_metadata_sinks(
                &self.data_root,
                state.config.s3_bucket.as_deref(),
                &[".zarray".to_string()],
            ) {
                Ok(mut sinks) => {
                    state.metadata_sink = sinks.remove(".zarray");
                }
                Err(e) => {
                    log::error!("v2 writer: failed to create '.zarray' sink: {e}");
                    return false;
                }
            }
        }

        let dims = &state.config.dimensions;
        let n = dims.len();
        let interior_product: u64 = dims[1..n - 2]
            .iter()
            .map(|d| d.array_size_px as u64)
            .product::<u64>()
            .max(1);
        let append_extent = ((state.frames_written as u64) + interior_product - 1) / interior_product;

        let mut shape = vec![append_extent];
        let mut chunks = vec![dims[0].chunk_size_px as u64];
        for d in &dims[1..] {
            shape.push(d.array_size_px as u64);
            chunks.push(d.chunk_size_px as u64);
        }

        let metadata = serde_json::json!({
            "zarr_format": 2,
            "shape": shape,
            "chunks": chunks,
            "dtype": state.config.data_type.v2_dtype(),
            "fill_value": 0,
            "order": "C",
            "filters": serde_json::Value::Null,
            "dimension_separator": "/",
            "compressor": state.config.compression.map(|p| p.metadata_json()),
        });
        let bytes = serde_json::to_vec_pretty(&metadata).unwrap_or_default();

        match state.metadata_sink.as_mut() {
            Some(sink) => sink.write(0, &bytes),
            None => false,
        }
    }

    fn should_rollover(&self, _state: &WriterState) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dimension::DimensionKind;
    use crate::dtype::DataType;
    use crate::sink_factory::SinkFactory;
    use crate::threadpool::ThreadPool;
    use crate::writer::ArrayWriter;

    fn dim(name: &str, kind: DimensionKind, array: u32, chunk: u32) -> crate::dimension::Dimension {
        crate::dimension::Dimension::new(name, kind, array, chunk, 0).unwrap()
    }

    #[test]
    fn writes_one_file_per_chunk_per_row_and_zarray_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_str().unwrap().to_string();

        let dims = vec![
            dim("t", DimensionKind::Time, 0, 2),
            dim("y", DimensionKind::Space, 4, 4),
            dim("x", DimensionKind::Space, 4, 4),
        ];
        let config = ArrayWriterConfig {
            dimensions: dims,
            level_of_detail: 0,
            dataset_root: root.clone(),
            s3_bucket: None,
            data_type: DataType::U8,
            compression: None,
        };

        let thread_pool = Arc::new(ThreadPool::new(2, |_| {}));
        let sink_factory = Arc::new(SinkFactory::new(Arc::clone(&thread_pool), None));
        let backend = V2Backend::new(&config);
        let mut writer = ArrayWriter::new(config, thread_pool, sink_factory, backend);

        let frame = vec![0u8; 16];
        for _ in 0..4 {
            assert_eq!(writer.write(&frame).unwrap(), 16);
        }
        assert!(writer.finalize());

        // 4 frames / chunk_size(2) = 2 append rows -> dirs "0" and "1", each
        // with exactly one chunk file (single y/x chunk).
        assert!(std::path::Path::new(&root).join("0/0/0").is_file());
        assert!(std::path::Path::new(&root).join("0/1/0").is_file());
        assert!(std::path::Path::new(&root).join("0/.zarray").is_file());
        assert!(std::path::Path::new(&root).join("0/.zattrs").is_file());

        let zarray: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(std::path::Path::new(&root).join("0/.zarray")).unwrap())
                .unwrap();
        assert_eq!(zarray["shape"], serde_json::json!([4, 4, 4]));
        assert_eq!(zarray["chunks"], serde_json::json!([2, 4, 4]));
    }

    #[test]
    fn ragged_append_dim_still_flushes_partial_row_on_finalize() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_str().unwrap().to_string();

        let dims = vec![
            dim("t", DimensionKind::Time, 0, 2),
            dim("y", DimensionKind::Space, 4, 4),
            dim("x", DimensionKind::Space, 4, 4),
        ];
        let config = ArrayWriterConfig {
            dimensions: dims,
            level_of_detail: 0,
            dataset_root: root.clone(),
            s3_bucket: None,
            data_type: DataType::U8,
            compression: None,
        };

        let thread_pool = Arc::new(ThreadPool::new(2, |_| {}));
        let sink_factory = Arc::new(SinkFactory::new(Arc::clone(&thread_pool), None));
        let backend = V2Backend::new(&config);
        let mut writer = ArrayWriter::new(config, thread_pool, sink_factory, backend);

        let frame = vec![0u8; 16];
        for _ in 0..3 {
            assert_eq!(writer.write(&frame).unwrap(), 16);
        }
        assert!(writer.finalize());

        // row "0" flushed mid-stream (2 frames), row "1" flushed at finalize
        // with only 1 frame (the other half of the buffer stays zero-filled).
        assert!(std::path::Path::new(&root).join("0/0/0").is_file());
        assert!(std::path::Path::new(&root).join("0/1/0").is_file());
    }
}
