//! Multiscale pyramid engine (component C10): 2×2 downsampling of the final
//! two (spatial) dimensions plus the running pairwise-average that feeds
//! each level's writer only every other completed frame.
//!
//! Grounded on `downsample()` in `src/internal/array.writer.hh`: given a
//! level's `ArrayWriterConfig`, produce the next level's config and report
//! whether a further level remains possible. The original halves array
//! extents and leaves chunk extents untouched; recursion stops the moment a
//! downsampled extent would fall below its own chunk size — this crate's
//! [`downsample_config`] applies that rule to the final two (Y, X)
//! dimensions only, since interior dimensions are required to stay singleton
//! for a valid multiscale configuration.

use crate::dtype::DataType;
use crate::writer::ArrayWriterConfig;

/// Produce the next pyramid level's config from this one: halves the Y and
/// X array extents (odd extents are rounded up first, mirroring the
/// edge-replication padding applied to the pixel data itself), leaves chunk
/// and shard geometry untouched. The returned `bool` is `true` iff the
/// result can still be downsampled again — `false` once Y or X would drop
/// below its own chunk size at the next level.
pub fn downsample_config(config: &ArrayWriterConfig) -> (ArrayWriterConfig, bool) {
    let mut dims = config.dimensions.clone();
    let n = dims.len();
    for d in &mut dims[n - 2..] {
        let padded = d.array_size_px + (d.array_size_px % 2);
        d.array_size_px = (padded / 2).max(1);
    }

    let can_continue = dims[n - 2..]
        .iter()
        .all(|d| d.array_size_px >= d.chunk_size_px);

    let downsampled = ArrayWriterConfig {
        dimensions: dims,
        level_of_detail: config.level_of_detail + 1,
        dataset_root: config.dataset_root.clone(),
        s3_bucket: config.s3_bucket.clone(),
        data_type: config.data_type,
        compression: config.compression,
    };

    (downsampled, can_continue)
}

/// Downsample one Y×X frame 2× in each spatial dimension. Odd extents are
/// padded by replicating the final row/column so both become even before
/// averaging; each output pixel is the unweighted mean of its 2×2 source
/// cell, computed in `f32` and cast back to `dtype`.
pub fn downsample_frame(frame: &[u8], height: u32, width: u32, dtype: DataType) -> (Vec<u8>, u32, u32) {
    let bps = dtype.bytes_per_sample();
    let out_h = (height + 1) / 2;
    let out_w = (width + 1) / 2;

    let sample = |y: u32, x: u32| -> f32 {
        let y = y.min(height - 1);
        let x = x.min(width - 1);
        let idx = ((y * width + x) as usize) * bps;
        read_sample(&frame[idx..idx + bps], dtype)
    };

    let mut out = vec![0u8; (out_h as usize) * (out_w as usize) * bps];
    for oy in 0..out_h {
        for ox in 0..out_w {
            let y0 = oy * 2;
            let x0 = ox * 2;
            let mean = (sample(y0, x0) + sample(y0, x0 + 1) + sample(y0 + 1, x0) + sample(y0 + 1, x0 + 1)) / 4.0;
            let out_idx = ((oy * out_w + ox) as usize) * bps;
            write_sample(mean, dtype, &mut out[out_idx..out_idx + bps]);
        }
    }

    (out, out_h, out_w)
}

/// Pixel-wise mean of two equally-sized frames of the same dtype, rounding
/// back to the sample type the way [`downsample_frame`] does.
fn average_frames(a: &[u8], b: &[u8], dtype: DataType) -> Vec<u8> {
    let bps = dtype.bytes_per_sample();
    debug_assert_eq!(a.len(), b.len());
    let mut out = vec![0u8; a.len()];
    for (chunk_idx, out_chunk) in out.chunks_mut(bps).enumerate() {
        let off = chunk_idx * bps;
        let va = read_sample(&a[off..off + bps], dtype);
        let vb = read_sample(&b[off..off + bps], dtype);
        write_sample((va + vb) / 2.0, dtype, out_chunk);
    }
    out
}

/// Holds at most one pending downsampled frame per pyramid level. The first
/// frame fed in is buffered with nothing written; the second is averaged
/// against it and returned as the frame this level should write, and the
/// level goes back to empty.
pub struct PyramidLevelBuffer {
    dtype: DataType,
    pending: Option<Vec<u8>>,
}

impl PyramidLevelBuffer {
    pub fn new(dtype: DataType) -> Self {
        PyramidLevelBuffer {
            dtype,
            pending: None,
        }
    }

    /// Feed one downsampled frame. Returns `Some(frame)` when this completes
    /// a pair — the frame to hand to this level's writer — or `None` while
    /// still waiting on the pair's second half.
    pub fn push(&mut self, frame: Vec<u8>) -> Option<Vec<u8>> {
        match self.pending.take() {
            None => {
                self.pending = Some(frame);
                None
            }
            Some(prev) => Some(average_frames(&prev, &frame, self.dtype)),
        }
    }
}

fn read_sample(bytes: &[u8], dtype: DataType) -> f32 {
    match dtype {
        DataType::U8 => bytes[0] as f32,
        DataType::I8 => bytes[0] as i8 as f32,
        DataType::U16 => u16::from_le_bytes([bytes[0], bytes[1]]) as f32,
        DataType::I16 => i16::from_le_bytes([bytes[0], bytes[1]]) as f32,
        DataType::F16 => f16_to_f32(u16::from_le_bytes([bytes[0], bytes[1]])),
        DataType::U32 => u32::from_le_bytes(bytes[..4].try_into().unwrap()) as f32,
        DataType::I32 => i32::from_le_bytes(bytes[..4].try_into().unwrap()) as f32,
        DataType::F32 => f32::from_le_bytes(bytes[..4].try_into().unwrap()),
        DataType::U64 => u64::from_le_bytes(bytes[..8].try_into().unwrap()) as f32,
        DataType::I64 => i64::from_le_bytes(bytes[..8].try_into().unwrap()) as f32,
        DataType::F64 => f64::from_le_bytes(bytes[..8].try_into().unwrap()) as f32,
    }
}

fn write_sample(value: f32, dtype: DataType, out: &mut [u8]) {
    match dtype {
        DataType::U8 => out[0] = value.round().clamp(0.0, u8::MAX as f32) as u8,
        DataType::I8 => out[0] = value.round().clamp(i8::MIN as f32, i8::MAX as f32) as i8 as u8,
        DataType::U16 => out[..2].copy_from_slice(&(value.round().clamp(0.0, u16::MAX as f32) as u16).to_le_bytes()),
        DataType::I16 => {
            out[..2].copy_from_slice(&(value.round().clamp(i16::MIN as f32, i16::MAX as f32) as i16).to_le_bytes())
        }
        DataType::F16 => out[..2].copy_from_slice(&f32_to_f16(value).to_le_bytes()),
        DataType::U32 => out[..4].copy_from_slice(&(value.round().clamp(0.0, u32::MAX as f32) as u32).to_le_bytes()),
        DataType::I32 => {
            out[..4].copy_from_slice(&(value.round().clamp(i32::MIN as f32, i32::MAX as f32) as i32).to_le_bytes())
        }
        DataType::F32 => out[..4].copy_from_slice(&value.to_le_bytes()),
        DataType::U64 => out[..8].copy_from_slice(&(value.round().max(0.0) as u64).to_le_bytes()),
        DataType::I64 => out[..8].copy_from_slice(&(value.round() as i64).to_le_bytes()),
        DataType::F64 => out[..8].copy_from_slice(&(value as f64).to_le_bytes()),
    }
}

/// IEEE 754 binary16 -> binary32, flushing subnormals and infinities/NaNs
/// through their defined bit patterns. No `half` dependency; frames carrying
/// `f16` samples are the rare case and this path runs once per output pixel.
fn f16_to_f32(bits: u16) -> f32 {
    let sign = (bits >> 15) as u32;
    let exp = ((bits >> 10) & 0x1f) as u32;
    let frac = (bits & 0x3ff) as u32;

    let (exp_out, frac_out) = if exp == 0 {
        if frac == 0 {
            (0u32, 0u32)
        } else {
            let mut e = -1i32;
            let mut f = frac;
            while f & 0x400 == 0 {
                f <<= 1;
                e -= 1;
            }
            f &= 0x3ff;
            (((127 - 15 + e + 1) as u32) & 0xff, f << 13)
        }
    } else if exp == 0x1f {
        (0xff, frac << 13)
    } else {
        (exp - 15 + 127, frac << 13)
    };

    f32::from_bits((sign << 31) | (exp_out << 23) | frac_out)
}

fn f32_to_f16(value: f32) -> u16 {
    let bits = value.to_bits();
    let sign = ((bits >> 31) & 1) as u16;
    let exp = ((bits >> 23) & 0xff) as i32;
    let frac = bits & 0x7f_ffff;

    if exp == 0xff {
        let payload = if frac != 0 { 0x200 } else { 0 };
        return (sign << 15) | 0x7c00 | payload;
    }

    let half_exp = exp - 127 + 15;
    if half_exp >= 0x1f {
        return (sign << 15) | 0x7c00;
    }
    if half_exp <= 0 {
        if half_exp < -10 {
            return sign << 15;
        }
        let frac_full = frac | 0x80_0000;
        let shift = 14 - half_exp;
        return (sign << 15) | ((frac_full >> shift) as u16);
    }

    (sign << 15) | ((half_exp as u16) << 10) | ((frac >> 13) as u16)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dimension::{Dimension, DimensionKind};

    fn config(dims: Vec<Dimension>) -> ArrayWriterConfig {
        ArrayWriterConfig {
            dimensions: dims,
            level_of_detail: 0,
            dataset_root: "root".into(),
            s3_bucket: None,
            data_type: DataType::U16,
            compression: None,
        }
    }

    #[test]
    fn downsample_config_halves_spatial_extents_and_stops_below_chunk_size() {
        let dims = vec![
            Dimension::new("t", DimensionKind::Time, 0, 1, 1).unwrap(),
            Dimension::new("c", DimensionKind::Channel, 1, 1, 1).unwrap(),
            Dimension::new("y", DimensionKind::Space, 135, 135, 1).unwrap(),
            Dimension::new("x", DimensionKind::Space, 240, 240, 1).unwrap(),
        ];
        let (level1, can_continue) = downsample_config(&config(dims));
        assert_eq!(level1.dimensions[2].array_size_px, 68);
        assert_eq!(level1.dimensions[3].array_size_px, 120);
        assert_eq!(level1.level_of_detail, 1);
        // 68 < chunk(135), 120 < chunk(240): no further level.
        assert!(!can_continue);
    }

    #[test]
    fn downsample_frame_averages_2x2_cells_and_pads_odd_extents() {
        // 2x3 frame (h=2, w=3), row-major u8 samples:
        // row0: 0 4 8
        // row1: 0 4 80
        let frame: Vec<u8> = vec![0, 4, 8, 0, 4, 80];
        let (out, out_h, out_w) = downsample_frame(&frame, 2, 3, DataType::U8);
        assert_eq!((out_h, out_w), (1, 2));
        // cell0 = mean(0,4,0,4) = 2; cell1 (padded, replicates column 2) = mean(8,8,80,80) = 44
        assert_eq!(out, vec![2, 44]);
    }

    #[test]
    fn pyramid_level_buffer_averages_every_other_frame() {
        let mut buf = PyramidLevelBuffer::new(DataType::U8);
        assert!(buf.push(vec![10]).is_none());
        let averaged = buf.push(vec![20]).unwrap();
        assert_eq!(averaged, vec![15]);
        assert!(buf.push(vec![0]).is_none());
    }

    #[test]
    fn f16_roundtrips_common_values() {
        for v in [0.0f32, 1.0, -1.0, 0.5, 100.25, -2048.0] {
            let bits = f32_to_f16(v);
            let back = f16_to_f32(bits);
            assert!((back - v).abs() < 0.5, "{v} -> {bits:#06x} -> {back}");
        }
    }
}
