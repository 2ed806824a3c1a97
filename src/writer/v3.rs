//! Zarr v3 array writer: chunks grouped into shards, each shard a single
//! file with a trailing sharding index, `zarr.json`-per-level metadata.
//!
//! Grounded on `zarr::ZarrV3ArrayWriter` (`src/writers/zarrv3.array.writer.
//! cpp`): `data_root_` is `<dataset_root>/data/root/<level>`, `meta_root_` is
//! `<dataset_root>/meta/root`; `flush_impl_` buckets encoded chunks by shard
//! (`shard_index_for_chunk`), appends each to its shard file at a
//! self-tracked running offset, and — only on a rollover boundary or during
//! `finalize` — appends the shard's index table (2 × u64 per chunk slot:
//! offset, length; `U64_MAX` sentinel for chunk slots never written because
//! the append dimension ran out before filling the shard) and resets the
//! table/offset for the next row of shards. A shard's chunk slots are keyed
//! by non-append lattice position *and* position along the append axis
//! within the shard (see `append_slot_multiplier`), since one shard file can
//! span several append-chunks when `shard_size_chunks[0] > 1`.
//!
//! The per-shard running offset and index table are backend-local state (no
//! counterpart in the shared `WriterState`, since v2 has nothing like them);
//! they move into the parallel flush jobs through the same
//! `Arc<Vec<Mutex<_>>>` "slots" pattern `SinkFactory` already uses to hand
//! freshly created sinks across the thread pool.

use std::sync::{Arc, Mutex};

use crate::dimension;

use super::{ArrayWriterBackend, ArrayWriterConfig, WriterState};

const U64_SENTINEL: u64 = u64::MAX;

pub struct V3Backend {
    data_root: String,
    meta_root: String,
    /// One running write offset per shard.
    shard_file_offsets: Vec<u64>,
    /// One index table per shard: `2 * chunks_per_shard` entries, pairs of
    /// `(offset, length)` keyed by `shard_internal_index` combined with the
    /// append-chunk's position within the shard (see
    /// [`append_slot_multiplier`]).
    shard_tables: Vec<Vec<u64>>,
}

/// A shard spans `shard_size_chunks` chunks along the append axis as well as
/// along the non-append dims, but [`dimension::chunks_per_shard`] and
/// [`dimension::shard_internal_index`] only cover the non-append lattice
/// (shard *files* are only split along those dims; the append axis is
/// folded into the same file across several flushes instead). This factor
/// is the number of non-append chunk slots one append-chunk occupies in the
/// table, so a chunk's full table slot is
/// `append_slot * append_slot_multiplier(dims) + shard_internal_index(...)`.
fn append_slot_multiplier(dims: &[dimension::Dimension]) -> u64 {
    dimension::chunks_per_shard(dims)
}

impl V3Backend {
    pub fn new(config: &ArrayWriterConfig) -> Self {
        let dims = &config.dimensions;
        let n_shards = dimension::number_of_shards(dims) as usize;
        let t_shard_size = (dims[0].shard_size_chunks as u64).max(1);
        let chunks_per_shard = t_shard_size * append_slot_multiplier(dims);
        V3Backend {
            data_root: format!("{}/data/root/{}", config.dataset_root, config.level_of_detail),
            meta_root: format!("{}/meta/root", config.dataset_root),
            shard_file_offsets: vec![0u64; n_shards],
            shard_tables: (0..n_shards)
                .map(|_| vec![U64_SENTINEL; 2 * chunks_per_shard as usize])
                .collect(),
        }
    }
}

impl ArrayWriterBackend for V3Backend {
    fn flush_impl(&mut self, state: &mut WriterState, encoded: &[Vec<u8>]) -> bool {
        let dims = state.config.dimensions.clone();

        if state.data_sinks.is_empty() {
            let row = format!("c{}", state.append_chunk_index);
            let n_shards = dimension::number_of_shards(&dims);
            match state.sink_factory.make_data_sinks(
                &self.data_root,
                state.config.s3_bucket.as_deref(),
                &row,
                n_shards,
                |i| dimension::shard_lattice_coords(i, &dims),
            ) {
                Ok(sinks) => state.data_sinks = sinks,
                Err(e) => {
                    log::error!(
                        "v3 writer: failed to create shard sinks under '{}/{row}': {}",
                        self.data_root,
                        e
                    );
                    return false;
                }
            }
        }

        let n_shards = dimension::number_of_shards(&dims) as usize;
        if state.data_sinks.len() != n_shards {
            log::error!(
                "v3 writer: {} shard sinks but {n_shards} shards expected",
                state.data_sinks.len()
            );
            return false;
        }

        let mut chunks_in_shard: Vec<Vec<usize>> = vec![Vec::new(); n_shards];
        for (chunk_idx, _) in encoded.iter().enumerate() {
            let shard = dimension::shard_index_for_chunk(chunk_idx as u64, &dims) as usize;
            chunks_in_shard[shard].push(chunk_idx);
        }

        let write_table = state.is_finalizing || self.should_rollover(state);
        let append_slot = state.flushes_since_rollover as u64;
        let non_append_multiplier = append_slot_multiplier(&dims);

        let sinks: Vec<Mutex<Option<Box<dyn crate::sink::Sink>>>> = state
            .data_sinks
            .drain(..)
            .map(|s| Mutex::new(Some(s)))
            .collect();
        let sinks = Arc::new(sinks);

        let offsets = std::mem::take(&mut self.shard_file_offsets);
        let tables = std::mem::take(&mut self.shard_tables);
        let slots: Vec<Mutex<(u64, Vec<u64>)>> = offsets
            .into_iter()
            .zip(tables)
            .map(|pair| Mutex::new(pair))
            .collect();
        let slots = Arc::new(slots);
        let all_ok = Arc::new(std::sync::atomic::AtomicBool::new(true));

        for (shard_idx, chunk_indices) in chunks_in_shard.into_iter().enumerate() {
            let sinks = Arc::clone(&sinks);
            let slots = Arc::clone(&slots);
            let all_ok = Arc::clone(&all_ok);
            let chunks: Vec<(usize, Vec<u8>)> = chunk_indices
                .iter()
                .map(|&i| (i, encoded[i].clone()))
                .collect();
            let dims = dims.clone();

            state.thread_pool.submit(Box::new(move || {
                let mut sink_slot = sinks[shard_idx].lock().unwrap();
                let sink = sink_slot.as_mut().expect("shard sink missing");
                let mut slot = slots[shard_idx].lock().unwrap();
                let (offset, table) = &mut *slot;

                let mut success = true;
                for (chunk_idx, bytes) in &chunks {
                    if !sink.write(*offset, bytes) {
                        success = false;
                        break;
                    }
                    let internal = (append_slot * non_append_multiplier
                        + dimension::shard_internal_index(*chunk_idx as u64, &dims))
                        as usize;
                    table[2 * internal] = *offset;
                    table[2 * internal + 1] = bytes.len() as u64;
                    *offset += bytes.len() as u64;
                }

                if success && write_table {
                    let mut table_bytes = Vec::with_capacity(table.len() * 8);
                    for entry in table.iter() {
                        table_bytes.extend_from_slice(&entry.to_le_bytes());
                    }
                    success = sink.write(*offset, &table_bytes);
                }

                if write_table {
                    table.iter_mut().for_each(|v| *v = U64_SENTINEL);
                    *offset = 0;
                }

                if success {
                    Ok(())
                } else {
                    all_ok.store(false, std::sync::atomic::Ordering::SeqCst);
                    Err(format!("failed to write shard {shard_idx}"))
                }
            }));
        }
        state.thread_pool.await_completion();

        let sinks = Arc::try_unwrap(sinks)
            .unwrap_or_else(|_| panic!("shard sink slots still shared after barrier"));
        state.data_sinks = sinks
            .into_iter()
            .map(|m| m.into_inner().unwrap().expect("shard sink missing after flush"))
            .collect();

        let slots = Arc::try_unwrap(slots)
            .unwrap_or_else(|_| panic!("shard state slots still shared after barrier"));
        let (offsets, tables): (Vec<u64>, Vec<Vec<u64>>) =
            slots.into_iter().map(|m| m.into_inner().unwrap()).unzip();
        self.shard_file_offsets = offsets;
        self.shard_tables = tables;

        all_ok.load(std::sync::atomic::Ordering::SeqCst)
    }

    fn write_array_metadata(&mut self, state: &mut WriterState) -> bool {
        if state.metadata_sink.is_none() {
            let filename = format!("{}.array.json", state.config.level_of_detail);
            match state
                .sink_factory
                .make_metadata_sinks(&self.meta_root, state.config.s3_bucket.as_deref(), &[filename.clone()])
            {
                Ok(mut sinks) => state.metadata_sink = sinks.remove(&filename),
                Err(e) => {
                    log::error!("v3 writer: failed to create '{filename}' sink: {e}");
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
        let mut chunk_shape = vec![dims[0].chunk_size_px as u64];
        let mut shard_shape = vec![dims[0].shard_size_chunks as u64];
        for d in &dims[1..] {
            shape.push(d.array_size_px as u64);
            chunk_shape.push(d.chunk_size_px as u64);
            shard_shape.push(d.shard_size_chunks as u64);
        }

        let mut metadata = serde_json::json!({
            "attributes": {},
            "chunk_grid": {
                "chunk_shape": chunk_shape,
                "separator": "/",
                "type": "regular",
            },
            "chunk_memory_layout": "C",
            "data_type": state.config.data_type.v3_dtype(),
            "extensions": [],
            "fill_value": 0,
            "shape": shape,
            "storage_transformers": [
                {
                    "type": "indexed",
                    "extension": "https://purl.org/zarr/spec/storage_transformers/sharding/1.0",
                    "configuration": { "chunks_per_shard": shard_shape },
                }
            ],
        });

        if let Some(params) = state.config.compression {
            metadata["compressor"] = serde_json::json!({
                "codec": "https://purl.org/zarr/spec/codec/blosc/1.0",
                "configuration": {
                    "blocksize": 0,
                    "clevel": params.level,
                    "cname": params.codec.as_str(),
                    "shuffle": match params.shuffle {
                        crate::compressor::Shuffle::None => 0,
                        crate::compressor::Shuffle::Byte => 1,
                        crate::compressor::Shuffle::Bit => 2,
                    },
                },
            });
        }

        let bytes = serde_json::to_vec_pretty(&metadata).unwrap_or_default();
        match state.metadata_sink.as_mut() {
            Some(sink) => sink.write(0, &bytes),
            None => false,
        }
    }

    fn should_rollover(&self, state: &WriterState) -> bool {
        let dims = &state.config.dimensions;
        let n = dims.len();
        let mut frames_before_flush =
            dims[0].chunk_size_px as u64 * dims[0].shard_size_chunks as u64;
        for d in &dims[1..n - 2] {
            frames_before_flush *= d.array_size_px as u64;
        }
        frames_before_flush = frames_before_flush.max(1);
        state.frames_written as u64 % frames_before_flush == 0
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

    fn dim(name: &str, kind: DimensionKind, array: u32, chunk: u32, shard: u32) -> crate::dimension::Dimension {
        crate::dimension::Dimension::new(name, kind, array, chunk, shard).unwrap()
    }

    #[test]
    fn shards_chunks_into_single_file_per_shard_with_trailing_index() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_str().unwrap().to_string();

        // t: chunk=2, shard=1 -> rollover every 2 frames.
        // y: 4px/chunk4/shard1 -> 1 chunk, 1 shard.
        // x: 8px/chunk4/shard2 -> 2 chunks, 1 shard (2 chunks per shard).
        let dims = vec![
            dim("t", DimensionKind::Time, 0, 2, 1),
            dim("y", DimensionKind::Space, 4, 4, 1),
            dim("x", DimensionKind::Space, 8, 4, 2),
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
        let backend = V3Backend::new(&config);
        let mut writer = ArrayWriter::new(config, thread_pool, sink_factory, backend);

        let frame = vec![7u8; 32];
        for _ in 0..2 {
            assert_eq!(writer.write(&frame).unwrap(), 32);
        }
        assert!(writer.finalize());

        let shard_file = std::path::Path::new(&root)
            .join("data/root/0/c0/0/0");
        assert!(shard_file.is_file());

        let chunk_bytes = 2 * 4 * 4; // t_chunk * y_chunk * x_chunk
        let index_bytes = 2 * 2 * 8; // 2 chunks/shard * 2 u64 entries * 8 bytes
        let expected = 2 * chunk_bytes + index_bytes;
        assert_eq!(std::fs::metadata(&shard_file).unwrap().len() as usize, expected);

        let meta_file = std::path::Path::new(&root).join("meta/root/0.array.json");
        assert!(meta_file.is_file());
        let metadata: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&meta_file).unwrap()).unwrap();
        assert_eq!(metadata["shape"], serde_json::json!([2, 4, 8]));
        assert_eq!(metadata["chunk_grid"]["chunk_shape"], serde_json::json!([2, 4, 4]));
    }

    #[test]
    fn should_rollover_fires_on_shard_boundary_not_every_row() {
        let dims = vec![
            dim("t", DimensionKind::Time, 0, 2, 2),
            dim("y", DimensionKind::Space, 4, 4, 1),
            dim("x", DimensionKind::Space, 4, 4, 1),
        ];
        let config = ArrayWriterConfig {
            dimensions: dims,
            level_of_detail: 0,
            dataset_root: "/tmp/x".into(),
            s3_bucket: None,
            data_type: DataType::U8,
            compression: None,
        };
        let backend = V3Backend::new(&config);

        let thread_pool = Arc::new(ThreadPool::new(1, |_| {}));
        let sink_factory = Arc::new(SinkFactory::new(Arc::clone(&thread_pool), None));
        let mut state = WriterState {
            chunk_buffers: super_make_buffers(&config),
            config,
            data_sinks: Vec::new(),
            metadata_sink: None,
            thread_pool,
            sink_factory,
            bytes_to_flush: 0,
            frames_written: 0,
            append_chunk_index: 0,
            flushes_since_rollover: 0,
            is_finalizing: false,
            failed: false,
        };

        // frames_before_flush = chunk(2) * shard(2) = 4
        for (frames_written, expected) in [(2u32, false), (4, true), (6, false), (8, true)] {
            state.frames_written = frames_written;
            assert_eq!(backend.should_rollover(&state), expected);
        }
    }

    fn super_make_buffers(config: &ArrayWriterConfig) -> Vec<Vec<u8>> {
        let n = dimension::chunks_in_memory(&config.dimensions);
        let elems: u64 = config.dimensions.iter().map(|d| d.chunk_size_px as u64).product();
        let bytes = (elems * config.data_type.bytes_per_sample() as u64) as usize;
        (0..n).map(|_| vec![0u8; bytes]).collect()
    }
}
