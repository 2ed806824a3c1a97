//! Dimension list and chunk/shard geometry.
//!
//! Ported from `src/common/dimension.hh`/`.cpp` and `src/internal/zarr.common.
//! {hh,cpp}` in the original acquire-driver-zarr sources: `chunks_along_
//! dimension`, `shards_along_dimension`, and the row-major chunk-lattice /
//! shard-index decomposition that `zarrv3.array.writer.cpp::flush_impl_`
//! relies on. All functions here are pure — no I/O, no locking — so they are
//! tested directly rather than through a writer.

use crate::error::{Result, ZarrError};

/// The semantic role of a dimension, carried through into OME axis metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DimensionKind {
    Space,
    Time,
    Channel,
    Other,
}

impl DimensionKind {
    /// OME `axes[].type` string.
    pub fn ome_type(self) -> &'static str {
        match self {
            DimensionKind::Space => "space",
            DimensionKind::Time => "time",
            DimensionKind::Channel => "channel",
            DimensionKind::Other => "other",
        }
    }
}

/// One axis of the logical array.
///
/// Index 0 in a dimension list is always the append (slowest-varying) axis;
/// index `n-1` is the fastest-varying (X) axis. See [`validate_dimensions`].
#[derive(Debug, Clone)]
pub struct Dimension {
    pub name: String,
    pub kind: DimensionKind,
    /// 0 for the append dimension, meaning "grows indefinitely".
    pub array_size_px: u32,
    pub chunk_size_px: u32,
    /// Only meaningful for Zarr v3; ignored by the v2 writer.
    pub shard_size_chunks: u32,
}

impl Dimension {
    pub fn new(
        name: impl Into<String>,
        kind: DimensionKind,
        array_size_px: u32,
        chunk_size_px: u32,
        shard_size_chunks: u32,
    ) -> Result<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(ZarrError::InvalidArgument(
                "dimension name must not be empty".into(),
            ));
        }
        if chunk_size_px == 0 {
            return Err(ZarrError::InvalidArgument(format!(
                "dimension '{name}': chunk_size_px must be > 0"
            )));
        }
        Ok(Dimension {
            name,
            kind,
            array_size_px,
            chunk_size_px,
            shard_size_chunks,
        })
    }

    /// `ceil(array_size_px / chunk_size_px)`, with the append-dimension
    /// convention `ceil(0 / c) = 0` (the append dimension has no declared
    /// extent; the cross-section it contributes is computed separately from
    /// `frames_written`, never from `array_size_px`).
    pub fn chunks_along(&self) -> u64 {
        if self.array_size_px == 0 {
            return 0;
        }
        ceil_div(self.array_size_px as u64, self.chunk_size_px as u64)
    }

    /// `ceil(chunks_along / shard_size_chunks)`, or 0 if `shard_size_chunks
    /// == 0` (v2 dimensions never set shard sizes).
    pub fn shards_along(&self) -> u64 {
        if self.shard_size_chunks == 0 {
            return 0;
        }
        ceil_div(self.chunks_along(), self.shard_size_chunks as u64)
    }
}

fn ceil_div(a: u64, b: u64) -> u64 {
    (a + b - 1) / b
}

/// Validate the whole dimension list against spec invariants (§3):
/// 3–32 dimensions, index 0 is the append axis, the final two are spatial
/// and match `(frame_height, frame_width)`, and (for v3) every
/// `shard_size_chunks > 0`.
pub fn validate_dimensions(
    dims: &[Dimension],
    frame_height: u32,
    frame_width: u32,
    is_v3: bool,
) -> Result<()> {
    if dims.len() < 3 || dims.len() > 32 {
        return Err(ZarrError::InvalidSettings(format!(
            "expected 3..=32 dimensions, got {}",
            dims.len()
        )));
    }

    for (i, dim) in dims.iter().enumerate() {
        if i > 0 && dim.array_size_px == 0 {
            return Err(ZarrError::InvalidSettings(format!(
                "dimension '{}' (index {i}): only the append dimension (index 0) may have array_size_px == 0",
                dim.name
            )));
        }
        if is_v3 && dim.shard_size_chunks == 0 {
            return Err(ZarrError::InvalidSettings(format!(
                "dimension '{}' (index {i}): shard_size_chunks must be > 0 for Zarr v3",
                dim.name
            )));
        }
    }

    let n = dims.len();
    let y = &dims[n - 2];
    let x = &dims[n - 1];
    if y.kind != DimensionKind::Space || x.kind != DimensionKind::Space {
        return Err(ZarrError::InvalidSettings(
            "the final two dimensions must be of kind Space (Y, X)".into(),
        ));
    }
    if y.array_size_px != frame_height {
        return Err(ZarrError::InvalidSettings(format!(
            "Y dimension array_size_px ({}) must equal frame height ({frame_height})",
            y.array_size_px
        )));
    }
    if x.array_size_px != frame_width {
        return Err(ZarrError::InvalidSettings(format!(
            "X dimension array_size_px ({}) must equal frame width ({frame_width})",
            x.array_size_px
        )));
    }

    Ok(())
}

/// Per-dimension chunk counts for every dimension except the append axis
/// (index 0), slowest (index 1) to fastest (index n-1).
pub fn non_append_chunk_counts(dims: &[Dimension]) -> Vec<u64> {
    dims[1..].iter().map(Dimension::chunks_along).collect()
}

/// `product(chunks_along(d) for d in non-append dims)` — the number of
/// concurrently buffered chunks (one ChunkBuffer per chunk index in the
/// cross-section, reused across successive append positions).
pub fn chunks_in_memory(dims: &[Dimension]) -> u64 {
    non_append_chunk_counts(dims).into_iter().product()
}

/// Per-dimension shard counts for every dimension except the append axis.
pub fn non_append_shard_counts(dims: &[Dimension]) -> Vec<u64> {
    dims[1..].iter().map(Dimension::shards_along).collect()
}

/// `product(shard_size_chunks(d) for d in non-append dims)` — chunks per shard.
pub fn chunks_per_shard(dims: &[Dimension]) -> u64 {
    dims[1..]
        .iter()
        .map(|d| d.shard_size_chunks as u64)
        .product()
}

/// `product(shards_along(d) for d in non-append dims)` — total shard count.
pub fn number_of_shards(dims: &[Dimension]) -> u64 {
    non_append_shard_counts(dims).into_iter().product()
}

/// Decompose a flat, row-major chunk-lattice index into per-dimension chunk
/// coordinates over the non-append dimensions (slowest to fastest).
///
/// Row-major over `counts` means the last entry of `counts` varies fastest,
/// mirroring the final two (Y, X) dimensions being the fastest-varying axes.
fn decompose_row_major(mut flat: u64, counts: &[u64]) -> Vec<u64> {
    let mut coords = vec![0u64; counts.len()];
    for i in (0..counts.len()).rev() {
        let c = counts[i].max(1);
        coords[i] = flat % c;
        flat /= c;
    }
    coords
}

/// Reassemble per-dimension coordinates into a flat row-major index.
fn recompose_row_major(coords: &[u64], counts: &[u64]) -> u64 {
    let mut flat = 0u64;
    for i in 0..counts.len() {
        flat = flat * counts[i].max(1) + coords[i];
    }
    flat
}

/// `shard_index_for_chunk`: which shard (flat, row-major over shard counts)
/// a given chunk-lattice index belongs to.
pub fn shard_index_for_chunk(chunk_idx: u64, dims: &[Dimension]) -> u64 {
    let chunk_counts = non_append_chunk_counts(dims);
    let shard_sizes: Vec<u64> = dims[1..]
        .iter()
        .map(|d| d.shard_size_chunks as u64)
        .collect();
    let shard_counts = non_append_shard_counts(dims);

    let chunk_coords = decompose_row_major(chunk_idx, &chunk_counts);
    let shard_coords: Vec<u64> = chunk_coords
        .iter()
        .zip(shard_sizes.iter())
        .map(|(c, s)| if *s == 0 { 0 } else { c / s })
        .collect();

    recompose_row_major(&shard_coords, &shard_counts)
}

/// `shard_internal_index`: position of a chunk within its own shard, row-major
/// over `shard_size_chunks`.
pub fn shard_internal_index(chunk_idx: u64, dims: &[Dimension]) -> u64 {
    let chunk_counts = non_append_chunk_counts(dims);
    let shard_sizes: Vec<u64> = dims[1..]
        .iter()
        .map(|d| d.shard_size_chunks as u64)
        .collect();

    let chunk_coords = decompose_row_major(chunk_idx, &chunk_counts);
    let internal_coords: Vec<u64> = chunk_coords
        .iter()
        .zip(shard_sizes.iter())
        .map(|(c, s)| if *s == 0 { 0 } else { c % s })
        .collect();

    recompose_row_major(&internal_coords, &shard_sizes)
}

/// Per-dimension chunk coordinates for a flat chunk-lattice index, exposed
/// for sink-path construction (`<t>/<c>/<z>/<y>/<x>`-style nesting).
pub fn chunk_lattice_coords(chunk_idx: u64, dims: &[Dimension]) -> Vec<u64> {
    decompose_row_major(chunk_idx, &non_append_chunk_counts(dims))
}

/// Per-dimension shard coordinates for a flat shard index.
pub fn shard_lattice_coords(shard_idx: u64, dims: &[Dimension]) -> Vec<u64> {
    decompose_row_major(shard_idx, &non_append_shard_counts(dims))
}

/// Inverse of [`chunk_lattice_coords`]: reassemble per-dimension chunk
/// coordinates (over the non-append dims) into the flat chunk-lattice index
/// used to key `chunk_buffers`/`data_sinks`. Exposed for frame scattering,
/// which computes a chunk's coordinates directly rather than starting from
/// a flat index.
pub fn flat_chunk_index(chunk_coords: &[u64], dims: &[Dimension]) -> u64 {
    recompose_row_major(chunk_coords, &non_append_chunk_counts(dims))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dim(name: &str, kind: DimensionKind, array: u32, chunk: u32, shard: u32) -> Dimension {
        Dimension::new(name, kind, array, chunk, shard).unwrap()
    }

    fn sample_dims() -> Vec<Dimension> {
        vec![
            dim("t", DimensionKind::Time, 0, 1, 1),
            dim("c", DimensionKind::Channel, 8, 4, 2),
            dim("z", DimensionKind::Space, 6, 2, 1),
            dim("y", DimensionKind::Space, 48, 16, 1),
            dim("x", DimensionKind::Space, 64, 16, 2),
        ]
    }

    #[test]
    fn chunks_along_ceils() {
        let d = dim("x", DimensionKind::Space, 64, 16, 2);
        assert_eq!(d.chunks_along(), 4);
        let d = dim("x", DimensionKind::Space, 65, 16, 2);
        assert_eq!(d.chunks_along(), 5);
    }

    #[test]
    fn append_dim_chunks_along_is_zero() {
        let d = dim("t", DimensionKind::Time, 0, 5, 1);
        assert_eq!(d.chunks_along(), 0);
    }

    #[test]
    fn chunks_in_memory_matches_product() {
        let dims = sample_dims();
        // c: ceil(8/4)=2, z: ceil(6/2)=3, y: ceil(48/16)=3, x: ceil(64/16)=4
        assert_eq!(chunks_in_memory(&dims), 2 * 3 * 3 * 4);
    }

    #[test]
    fn number_of_shards_matches_product() {
        let dims = sample_dims();
        // c: ceil(2/2)=1, z: ceil(3/1)=3, y: ceil(3/1)=3, x: ceil(4/2)=2
        assert_eq!(number_of_shards(&dims), 1 * 3 * 3 * 2);
    }

    #[test]
    fn shard_round_trip_is_identity() {
        let dims = sample_dims();
        let n_chunks = chunks_in_memory(&dims);
        for chunk_idx in 0..n_chunks {
            let shard = shard_index_for_chunk(chunk_idx, &dims);
            let internal = shard_internal_index(chunk_idx, &dims);

            let shard_coords = shard_lattice_coords(shard, &dims);
            let shard_sizes: Vec<u64> = dims[1..]
                .iter()
                .map(|d| d.shard_size_chunks as u64)
                .collect();
            let internal_coords = decompose_row_major(internal, &shard_sizes);

            let reconstructed: Vec<u64> = shard_coords
                .iter()
                .zip(shard_sizes.iter())
                .zip(internal_coords.iter())
                .map(|((s, sz), i)| s * sz + i)
                .collect();

            let chunk_counts = non_append_chunk_counts(&dims);
            assert_eq!(recompose_row_major(&reconstructed, &chunk_counts), chunk_idx);
        }
    }

    #[test]
    fn validate_dimensions_rejects_too_few() {
        let dims = vec![
            dim("y", DimensionKind::Space, 4, 4, 1),
            dim("x", DimensionKind::Space, 4, 4, 1),
        ];
        assert!(validate_dimensions(&dims, 4, 4, false).is_err());
    }

    #[test]
    fn validate_dimensions_rejects_mismatched_frame_size() {
        let dims = sample_dims();
        assert!(validate_dimensions(&dims, 999, 64, false).is_err());
    }

    #[test]
    fn validate_dimensions_accepts_matching_frame_size() {
        let dims = sample_dims();
        assert!(validate_dimensions(&dims, 48, 64, true).is_ok());
    }
}
