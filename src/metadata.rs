//! Shared JSON metadata builders: OME-style axes/multiscales blocks and
//! custom-metadata embedding, used by both the v2 and v3 group metadata
//! writers in [`crate::stream`].
//!
//! Grounded on the `multiscales` block asserted against in
//! `tests/write-zarr-v2-raw-multiscale-with-trivial-tile-size.cpp` (axes
//! carry `name`/`type`, space axes additionally carry `unit: "micrometer"`;
//! `datasets[]` has one entry per pyramid level with a `coordinateTransformations`
//! scale vector; the block's `type` is `"local_mean"`, matching the 2×2
//! unweighted-average downsample in [`crate::multiscale`]). The scale-vector
//! convention — `2^level` on downsampled spatial axes, `1` elsewhere — is the
//! spec's resolution of an ambiguity in the original source (some call sites
//! there scale every axis, including non-spatial ones, by `2^level`).

use serde_json::{json, Value};

use crate::dimension::{Dimension, DimensionKind};

/// One `axes[]` entry: `name` + OME `type`, plus `unit: "micrometer"` for
/// spatial axes.
fn axis_json(dim: &Dimension) -> Value {
    let mut axis = json!({
        "name": dim.name,
        "type": dim.kind.ome_type(),
    });
    if dim.kind == DimensionKind::Space {
        axis["unit"] = json!("micrometer");
    }
    axis
}

/// Per-level scale vector: `2^level` on every spatial axis, `1` elsewhere.
fn scale_vector(dims: &[Dimension], level: u32) -> Vec<f32> {
    let factor = 2f32.powi(level as i32);
    dims.iter()
        .map(|d| if d.kind == DimensionKind::Space { factor } else { 1.0 })
        .collect()
}

/// The `multiscales` OME block: one `axes` entry per dimension, one
/// `datasets` entry per pyramid level (`"0"`, `"1"`, …, path-relative to the
/// group), and `type: "local_mean"` (the averaging strategy in
/// [`crate::multiscale`]).
pub fn multiscales_block(dims: &[Dimension], n_levels: u32) -> Value {
    let axes: Vec<Value> = dims.iter().map(axis_json).collect();
    let datasets: Vec<Value> = (0..n_levels)
        .map(|level| {
            json!({
                "path": level.to_string(),
                "coordinateTransformations": [
                    { "type": "scale", "scale": scale_vector(dims, level) }
                ],
            })
        })
        .collect();

    json!({
        "multiscales": [
            {
                "version": "0.4",
                "axes": axes,
                "datasets": datasets,
                "type": "local_mean",
            }
        ]
    })
}

/// Merge `custom_metadata` (already validated as a JSON object or null) into
/// an attributes block under the reserved `"custom_metadata"` key, leaving
/// the block untouched if there's nothing to embed.
pub fn with_custom_metadata(mut attrs: Value, custom_metadata: &Value) -> Value {
    if !custom_metadata.is_null() && custom_metadata != &json!({}) {
        attrs["custom_metadata"] = custom_metadata.clone();
    }
    attrs
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dims() -> Vec<Dimension> {
        vec![
            Dimension::new("t", DimensionKind::Time, 0, 5, 1).unwrap(),
            Dimension::new("c", DimensionKind::Channel, 1, 1, 1).unwrap(),
            Dimension::new("y", DimensionKind::Space, 135, 135, 1).unwrap(),
            Dimension::new("x", DimensionKind::Space, 240, 240, 1).unwrap(),
        ]
    }

    #[test]
    fn axes_carry_name_type_and_space_unit() {
        let block = multiscales_block(&dims(), 2);
        let axes = &block["multiscales"][0]["axes"];
        assert_eq!(axes[0]["name"], "t");
        assert_eq!(axes[0]["type"], "time");
        assert!(axes[0].get("unit").is_none());
        assert_eq!(axes[2]["type"], "space");
        assert_eq!(axes[2]["unit"], "micrometer");
    }

    #[test]
    fn scale_vectors_are_2_pow_level_on_spatial_axes_only() {
        let block = multiscales_block(&dims(), 2);
        let datasets = &block["multiscales"][0]["datasets"];
        let scale1 = &datasets[1]["coordinateTransformations"][0]["scale"];
        assert_eq!(scale1, &json!([1.0, 1.0, 2.0, 2.0]));
        let scale0 = &datasets[0]["coordinateTransformations"][0]["scale"];
        assert_eq!(scale0, &json!([1.0, 1.0, 1.0, 1.0]));
    }

    #[test]
    fn custom_metadata_embeds_under_reserved_key() {
        let attrs = with_custom_metadata(json!({"multiscales": []}), &json!({"experimenter": "rig-3"}));
        assert_eq!(attrs["custom_metadata"]["experimenter"], "rig-3");
    }

    #[test]
    fn empty_custom_metadata_leaves_attrs_untouched() {
        let attrs = with_custom_metadata(json!({"a": 1}), &Value::Null);
        assert!(attrs.get("custom_metadata").is_none());
    }
}
