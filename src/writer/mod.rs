//! Common `ArrayWriter` state and lifecycle (component C7): one per
//! resolution level, shared by the v2 and v3 variants.
//!
//! Grounded on `zarr::ArrayWriter` (`src/internal/array.writer.hh`). The
//! original uses inheritance — a pure-virtual base with `flush_impl_`,
//! `write_array_metadata_`, `should_rollover_` overridden by
//! `ZarrV2ArrayWriter`/`ZarrV3ArrayWriter`. Rust has no implementation
//! inheritance, so the redesign flag in spec §9 applies: shared state lives
//! in [`WriterState`], version-specific behavior lives behind the
//! [`ArrayWriterBackend`] trait, and [`ArrayWriter`] composes the two and
//! runs the shared lifecycle (`write`, `flush`, `finalize`) exactly once for
//! both variants.

pub mod v2;
pub mod v3;

use std::sync::Arc;

use crate::compressor::{self, BloscParams};
use crate::dimension::{self, Dimension};
use crate::dtype::DataType;
use crate::error::{Result, ZarrError};
use crate::sink::Sink;
use crate::sink_factory::SinkFactory;
use crate::threadpool::ThreadPool;

/// Per-resolution-level configuration. Immutable after writer construction,
/// mirroring `zarr::ArrayWriterConfig`.
#[derive(Clone)]
pub struct ArrayWriterConfig {
    pub dimensions: Vec<Dimension>,
    pub level_of_detail: u32,
    pub dataset_root: String,
    pub s3_bucket: Option<String>,
    pub data_type: DataType,
    pub compression: Option<BloscParams>,
}

/// Version-specific behavior an `ArrayWriter` delegates to. The three
/// methods mirror `flush_impl_`/`write_array_metadata_`/`should_rollover_`
/// in the original base class exactly; everything else (buffer lifecycle,
/// frame scattering, the finalize sequence) is shared and lives on
/// `ArrayWriter` itself.
pub trait ArrayWriterBackend {
    /// Write this append row's (v2) or shard slab's (v3) chunk bytes,
    /// creating data sinks first if this is the first flush since the last
    /// rollover. `encoded` holds one already-compressed-or-raw buffer per
    /// chunk, indexed the same way as `state.chunk_buffers`.
    fn flush_impl(&mut self, state: &mut WriterState, encoded: &[Vec<u8>]) -> bool;
    /// (Re)write this level's array metadata document (`.zarray` /
    /// `<level>.array.json`).
    fn write_array_metadata(&mut self, state: &mut WriterState) -> bool;
    /// Whether the flush just performed completes a rollover boundary: v2 is
    /// unconditionally `true` (fresh chunk files every append row); v3 is
    /// true only when a whole shard slab along the append axis is done.
    fn should_rollover(&self, state: &WriterState) -> bool;
}

/// Shared mutable state threaded through every `ArrayWriterBackend` call.
pub struct WriterState {
    pub config: ArrayWriterConfig,
    pub chunk_buffers: Vec<Vec<u8>>,
    pub data_sinks: Vec<Box<dyn Sink>>,
    pub metadata_sink: Option<Box<dyn Sink>>,
    pub thread_pool: Arc<ThreadPool>,
    pub sink_factory: Arc<SinkFactory>,
    /// Sum of the byte lengths of the chunk buffers awaiting their next
    /// flush; bookkeeping only, mirrors `bytes_to_flush_`.
    pub bytes_to_flush: u64,
    pub frames_written: u32,
    pub append_chunk_index: u32,
    /// Append-chunks flushed since the last rollover (or since the writer
    /// started). v3 shards spanning more than one append-chunk
    /// (`shard_size_chunks[0] > 1`) use this as the chunk's position along
    /// the append axis within the shard's index table; v2 ignores it.
    pub flushes_since_rollover: u32,
    pub is_finalizing: bool,
    pub failed: bool,
}

/// One resolution level of a Zarr array: owns its chunk buffers and sinks,
/// and runs the shared write/flush/finalize lifecycle against a
/// version-specific `backend`.
pub struct ArrayWriter<B: ArrayWriterBackend> {
    state: WriterState,
    backend: B,
}

impl<B: ArrayWriterBackend> ArrayWriter<B> {
    pub fn new(
        config: ArrayWriterConfig,
        thread_pool: Arc<ThreadPool>,
        sink_factory: Arc<SinkFactory>,
        backend: B,
    ) -> Self {
        let chunk_buffers = make_buffers(&config);
        let bytes_to_flush = chunk_buffers.iter().map(|b| b.len() as u64).sum();
        ArrayWriter {
            state: WriterState {
                config,
                chunk_buffers,
                data_sinks: Vec::new(),
                metadata_sink: None,
                thread_pool,
                sink_factory,
                bytes_to_flush,
                frames_written: 0,
                append_chunk_index: 0,
                flushes_since_rollover: 0,
                is_finalizing: false,
                failed: false,
            },
            backend,
        }
    }

    pub fn config(&self) -> &ArrayWriterConfig {
        &self.state.config
    }

    pub fn level_of_detail(&self) -> u32 {
        self.state.config.level_of_detail
    }

    pub fn frames_written(&self) -> u32 {
        self.state.frames_written
    }

    pub fn has_failed(&self) -> bool {
        self.state.failed
    }

    /// Scatter one frame into its chunk buffers and flush if this completes
    /// an append-chunk row. Returns the number of bytes consumed — `0`
    /// signals the writer has failed (spec §7: "a failed stream ... returns
    /// a short count").
    pub fn write(&mut self, frame: &[u8]) -> Result<usize> {
        if self.state.failed {
            return Ok(0);
        }

        let n = write_frame_to_chunks(&mut self.state, frame)?;
        self.state.frames_written += 1;

        if should_flush(&self.state) && !self.flush() {
            return Ok(0);
        }

        Ok(n)
    }

    fn flush(&mut self) -> bool {
        let encoded = match compress_buffers(&self.state) {
            Ok(v) => v,
            Err(e) => {
                log::error!(
                    "level {}: chunk compression failed: {e}",
                    self.state.config.level_of_detail
                );
                self.state.failed = true;
                return false;
            }
        };

        log::debug!(
            "level {}: flushing append row {} ({} frames written)",
            self.state.config.level_of_detail,
            self.state.append_chunk_index,
            self.state.frames_written
        );

        if !self.backend.flush_impl(&mut self.state, &encoded) {
            self.state.failed = true;
            return false;
        }

        if self.backend.should_rollover(&self.state) {
            self.state.data_sinks.clear();
            self.state.append_chunk_index += 1;
            self.state.flushes_since_rollover = 0;
        } else {
            self.state.flushes_since_rollover += 1;
        }

        // The chunk-lattice buffers are reused for the next append row
        // regardless of whether this flush also rolled the sinks over.
        for buf in &mut self.state.chunk_buffers {
            buf.iter_mut().for_each(|b| *b = 0);
        }

        true
    }

    /// Flush any partially-filled final append row, write array metadata,
    /// and close every sink (S3 sinks complete their multipart upload on
    /// drop). Idempotent.
    pub fn finalize(&mut self) -> bool {
        self.state.is_finalizing = true;
        let mut ok = !self.state.failed;

        let frames_per_chunk = self.state.config.dimensions[0].chunk_size_px.max(1);
        if self.state.frames_written % frames_per_chunk != 0 && !self.flush() {
            ok = false;
        }

        if !self.backend.write_array_metadata(&mut self.state) {
            ok = false;
        }

        self.state.data_sinks.clear();
        self.state.metadata_sink = None;

        ok && !self.state.failed
    }
}

/// Allocate one fixed-size buffer per chunk in the non-append cross-section,
/// each sized `product(chunk_size_px over every dimension) × bytes_per_
/// sample` — including the append dimension's own chunk size, since a
/// buffer holds `chunk_size_px[0]` stacked frames before it's flushed.
fn make_buffers(config: &ArrayWriterConfig) -> Vec<Vec<u8>> {
    let dims = &config.dimensions;
    let n_buffers = dimension::chunks_in_memory(dims);
    let bytes_per_sample = config.data_type.bytes_per_sample() as u64;
    let buffer_elems: u64 = dims.iter().map(|d| d.chunk_size_px as u64).product();
    let buffer_bytes = (buffer_elems * bytes_per_sample) as usize;
    (0..n_buffers).map(|_| vec![0u8; buffer_bytes]).collect()
}

fn should_flush(state: &WriterState) -> bool {
    let frames_per_chunk = state.config.dimensions[0].chunk_size_px.max(1);
    state.frames_written % frames_per_chunk == 0
}

/// Compress (or, absent compression, clone) every chunk buffer in parallel
/// jobs on the shared thread pool, mirroring `compress_buffers_()`.
fn compress_buffers(state: &WriterState) -> Result<Vec<Vec<u8>>> {
    let Some(params) = state.config.compression else {
        return Ok(state.chunk_buffers.clone());
    };

    let bytes_per_sample = state.config.data_type.bytes_per_sample();
    let slots: Vec<std::sync::Mutex<Option<Result<Vec<u8>>>>> = (0..state.chunk_buffers.len())
        .map(|_| std::sync::Mutex::new(None))
        .collect();
    let slots = Arc::new(slots);

    for (i, buf) in state.chunk_buffers.iter().enumerate() {
        let buf = buf.clone();
        let slots = Arc::clone(&slots);
        state.thread_pool.submit(Box::new(move || {
            let result = compressor::compress(&buf, bytes_per_sample, &params);
            let is_err = result.is_err();
            *slots[i].lock().unwrap() = Some(result);
            if is_err {
                Err(format!("chunk {i} compression failed"))
            } else {
                Ok(())
            }
        }));
    }
    state.thread_pool.await_completion();

    let slots = Arc::try_unwrap(slots)
        .unwrap_or_else(|_| panic!("compression slots still shared after barrier"));
    let mut out = Vec::with_capacity(slots.len());
    for slot in slots {
        let result = slot
            .into_inner()
            .unwrap()
            .expect("compression slot never filled");
        out.push(result?);
    }
    Ok(out)
}

/// Validate frame size and scatter it into every chunk buffer it touches.
/// One frame is a full Y×X plane at a single coordinate along every other
/// dimension; since a chunk may span only part of Y or X, a single frame
/// can land in `chunks_along(Y) × chunks_along(X)` distinct buffers.
fn write_frame_to_chunks(state: &mut WriterState, frame: &[u8]) -> Result<usize> {
    let dims = state.config.dimensions.clone();
    let bytes_per_sample = state.config.data_type.bytes_per_sample();
    let n = dims.len();
    let y_dim = &dims[n - 2];
    let x_dim = &dims[n - 1];

    let expected = y_dim.array_size_px as usize * x_dim.array_size_px as usize * bytes_per_sample;
    if frame.len() != expected {
        return Err(ZarrError::InvalidArgument(format!(
            "frame is {} bytes, expected {expected} ({}x{}x{bytes_per_sample})",
            frame.len(),
            y_dim.array_size_px,
            x_dim.array_size_px
        )));
    }

    scatter_frame_into_buffers(
        frame,
        &dims,
        bytes_per_sample,
        state.frames_written as u64,
        &mut state.chunk_buffers,
    );

    Ok(frame.len())
}

/// Decompose `frame_index` into its interior-dimension coordinate and
/// append-axis chunk offset, then copy the frame's bytes into every
/// (y-chunk, x-chunk) buffer it overlaps.
fn scatter_frame_into_buffers(
    frame: &[u8],
    dims: &[Dimension],
    bytes_per_sample: usize,
    frame_index: u64,
    buffers: &mut [Vec<u8>],
) {
    let n = dims.len();
    let interior = &dims[1..n - 2];
    let y_dim = &dims[n - 2];
    let x_dim = &dims[n - 1];

    let interior_sizes: Vec<u64> = interior.iter().map(|d| d.array_size_px as u64).collect();
    let product_interior: u64 = interior_sizes.iter().product::<u64>().max(1);

    let interior_flat = frame_index % product_interior;
    let interior_coords = decompose_row_major(interior_flat, &interior_sizes);

    let mut interior_chunk_idx = Vec::with_capacity(interior.len());
    let mut interior_offset = Vec::with_capacity(interior.len());
    let mut interior_chunk_sizes = Vec::with_capacity(interior.len());
    for (dim, coord) in interior.iter().zip(interior_coords.iter()) {
        let chunk_size = dim.chunk_size_px as u64;
        interior_chunk_idx.push(coord / chunk_size);
        interior_offset.push(coord % chunk_size);
        interior_chunk_sizes.push(chunk_size);
    }

    let t_chunk_size = dims[0].chunk_size_px as u64;
    let t_pos = (frame_index / product_interior) % t_chunk_size;

    let chunk_h = y_dim.chunk_size_px as u64;
    let chunk_w = x_dim.chunk_size_px as u64;
    let array_h = y_dim.array_size_px as u64;
    let array_w = x_dim.array_size_px as u64;
    let chunks_in_y = y_dim.chunks_along().max(1);
    let chunks_in_x = x_dim.chunks_along().max(1);

    let interior_chunk_elems: u64 = interior_chunk_sizes.iter().product();
    let t_slice_elems = interior_chunk_elems * chunk_h * chunk_w;
    let interior_local_offset = recompose_row_major(&interior_offset, &interior_chunk_sizes);
    let base_offset_elems = t_pos * t_slice_elems + interior_local_offset * chunk_h * chunk_w;

    for y_chunk in 0..chunks_in_y {
        let y_start = y_chunk * chunk_h;
        let y_end = (y_start + chunk_h).min(array_h);
        if y_start >= y_end {
            continue;
        }
        for x_chunk in 0..chunks_in_x {
            let x_start = x_chunk * chunk_w;
            let x_end = (x_start + chunk_w).min(array_w);
            if x_start >= x_end {
                continue;
            }

            let mut chunk_coords = interior_chunk_idx.clone();
            chunk_coords.push(y_chunk);
            chunk_coords.push(x_chunk);
            let flat_idx = dimension::flat_chunk_index(&chunk_coords, dims) as usize;
            let buffer = &mut buffers[flat_idx];

            let cols = (x_end - x_start) as usize;
            let row_bytes = cols * bytes_per_sample;
            for row in y_start..y_end {
                let y_local = row - y_start;
                let dest_offset =
                    ((base_offset_elems + y_local * chunk_w + x_start) as usize) * bytes_per_sample;
                let src_offset = (row * array_w + x_start) as usize * bytes_per_sample;
                buffer[dest_offset..dest_offset + row_bytes]
                    .copy_from_slice(&frame[src_offset..src_offset + row_bytes]);
            }
        }
    }
}

fn decompose_row_major(mut flat: u64, counts: &[u64]) -> Vec<u64> {
    let mut coords = vec![0u64; counts.len()];
    for i in (0..counts.len()).rev() {
        let c = counts[i].max(1);
        coords[i] = flat % c;
        flat /= c;
    }
    coords
}

fn recompose_row_major(coords: &[u64], counts: &[u64]) -> u64 {
    let mut flat = 0u64;
    for i in 0..counts.len() {
        flat = flat * counts[i].max(1) + coords[i];
    }
    flat
}
