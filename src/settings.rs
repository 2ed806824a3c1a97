//! Stream configuration.
//!
//! `StreamSettings` is the Rust analogue of the field set the original
//! driver accepts through `ZarrStreamSettings` / its C ABI setters
//! (`zarr.h`): store location, optional S3 target, data type, per-chunk
//! compression, the dimension list, multiscale toggle, and Zarr version.
//! Unlike the original, which validates fields piecemeal as each setter is
//! called, this crate validates everything in one pass at `Stream`
//! construction — there is no partially-configured, partially-valid state
//! to reason about.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::compressor::BloscParams;
use crate::dimension::{validate_dimensions, Dimension, DimensionKind};
use crate::dtype::DataType;
use crate::error::{Result, ZarrError};

/// Zarr on-disk format version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ZarrVersion {
    V2,
    V3,
}

/// S3-compatible object store target. When present, `store_path` on
/// [`StreamSettings`] is used as the key prefix rather than a filesystem
/// directory.
#[derive(Debug, Clone)]
pub struct S3Settings {
    pub endpoint: String,
    pub bucket: String,
    pub access_key_id: String,
    pub secret_access_key: String,
}

/// Everything needed to construct a [`crate::stream::Stream`].
#[derive(Debug, Clone)]
pub struct StreamSettings {
    pub store_path: String,
    pub s3: Option<S3Settings>,
    pub custom_metadata: serde_json::Value,
    pub data_type: DataType,
    pub compression: Option<BloscParams>,
    pub dimensions: Vec<Dimension>,
    pub multiscale: bool,
    pub version: ZarrVersion,
    /// Frame height/width, used to validate the final two (Y, X)
    /// dimensions. Not itself a stored field of the dataset.
    pub frame_height: u32,
    pub frame_width: u32,
    /// Worker count requested for the shared `ThreadPool`; clamped to
    /// available parallelism by the pool itself.
    pub max_threads: usize,
}

impl StreamSettings {
    /// Run every cross-field validation the spec names, in one pass:
    /// dimension geometry, multiscale eligibility, and the `store_path`
    /// `file://` strip. Returns the normalized `store_path` so callers don't
    /// have to re-derive it.
    pub fn validate(&self) -> Result<String> {
        validate_dimensions(
            &self.dimensions,
            self.frame_height,
            self.frame_width,
            self.version == ZarrVersion::V3,
        )?;

        if self.multiscale {
            let n = self.dimensions.len();
            let last_two_spatial = self.dimensions[n - 2].kind == DimensionKind::Space
                && self.dimensions[n - 1].kind == DimensionKind::Space;
            let interior_is_singleton = self.dimensions[1..n - 2]
                .iter()
                .all(|d| d.array_size_px == 1);
            if !last_two_spatial || !interior_is_singleton {
                return Err(ZarrError::InvalidSettings(
                    "multiscale requires the final two dimensions to be spatial and every interior dimension to have array_size_px == 1".into(),
                ));
            }
        }

        if let Some(s3) = &self.s3 {
            if s3.bucket.trim().is_empty() {
                return Err(ZarrError::InvalidSettings(
                    "s3.bucket must not be empty".into(),
                ));
            }
            if s3.endpoint.trim().is_empty() {
                return Err(ZarrError::InvalidSettings(
                    "s3.endpoint must not be empty".into(),
                ));
            }
        }

        if !self.custom_metadata.is_null()
            && !self.custom_metadata.is_object()
            && self.custom_metadata != serde_json::json!({})
        {
            return Err(ZarrError::InvalidSettings(
                "custom_metadata must be a JSON object".into(),
            ));
        }

        Ok(strip_store_path(&self.store_path))
    }

    /// `store_path` as a filesystem path, `file://`-stripped. Meaningless
    /// when `s3` is set (the S3 key prefix is built from the same stripped
    /// string instead).
    pub fn store_dir(&self) -> PathBuf {
        PathBuf::from(strip_store_path(&self.store_path))
    }
}

/// Strip a leading `file://` and any trailing path separators, matching
/// `SinkCreator::make_sink`'s URI handling in the original driver.
fn strip_store_path(path: &str) -> String {
    let stripped = path.strip_prefix("file://").unwrap_or(path);
    stripped.trim_end_matches(['/', '\\']).to_string()
}
