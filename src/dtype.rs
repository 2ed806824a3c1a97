//! Sample data types: byte width and the dtype strings each Zarr version
//! expects in its array metadata.
//!
//! Grounded on `sample_type_to_dtype` in `src/writers/zarrv3.array.writer.
//! cpp` (v3, endian-less codes) and the `.zarray` `dtype` convention used by
//! `zarrv2.array.writer.cpp` (endianness-prefixed, e.g. `<u2`).

use crate::error::{Result, ZarrError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
    U8,
    U16,
    U32,
    U64,
    I8,
    I16,
    I32,
    I64,
    F16,
    F32,
    F64,
}

impl DataType {
    pub fn bytes_per_sample(self) -> usize {
        match self {
            DataType::U8 | DataType::I8 => 1,
            DataType::U16 | DataType::I16 | DataType::F16 => 2,
            DataType::U32 | DataType::I32 | DataType::F32 => 4,
            DataType::U64 | DataType::I64 | DataType::F64 => 8,
        }
    }

    /// v3 `data_type` string: endian-less type codes (`uint16`, `float32`, ...).
    pub fn v3_dtype(self) -> &'static str {
        match self {
            DataType::U8 => "uint8",
            DataType::U16 => "uint16",
            DataType::U32 => "uint32",
            DataType::U64 => "uint64",
            DataType::I8 => "int8",
            DataType::I16 => "int16",
            DataType::I32 => "int32",
            DataType::I64 => "int64",
            DataType::F16 => "float16",
            DataType::F32 => "float32",
            DataType::F64 => "float64",
        }
    }

    /// v2 `.zarray` `dtype` string: `<` (little-endian) or `>` (big-endian,
    /// only reachable on a BE host) followed by a one-letter kind code and
    /// the byte width, e.g. `<u2`. Single-byte types have no endianness
    /// prefix per the Zarr v2 / NumPy convention (`|u1`).
    pub fn v2_dtype(self) -> String {
        let nbytes = self.bytes_per_sample();
        let kind = match self {
            DataType::U8 | DataType::U16 | DataType::U32 | DataType::U64 => 'u',
            DataType::I8 | DataType::I16 | DataType::I32 | DataType::I64 => 'i',
            DataType::F16 | DataType::F32 | DataType::F64 => 'f',
        };
        if nbytes == 1 {
            format!("|{kind}1")
        } else {
            let endian = if cfg!(target_endian = "big") { '>' } else { '<' };
            format!("{endian}{kind}{nbytes}")
        }
    }

    pub fn parse(name: &str) -> Result<Self> {
        Ok(match name {
            "u8" => DataType::U8,
            "u16" => DataType::U16,
            "u32" => DataType::U32,
            "u64" => DataType::U64,
            "i8" => DataType::I8,
            "i16" => DataType::I16,
            "i32" => DataType::I32,
            "i64" => DataType::I64,
            "f16" => DataType::F16,
            "f32" => DataType::F32,
            "f64" => DataType::F64,
            other => {
                return Err(ZarrError::InvalidSettings(format!(
                    "unrecognized data type '{other}'"
                )))
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn v2_dtype_single_byte_has_no_endian_prefix() {
        assert_eq!(DataType::U8.v2_dtype(), "|u1");
        assert_eq!(DataType::I8.v2_dtype(), "|i1");
    }

    #[test]
    fn v2_dtype_multi_byte_is_little_endian_on_this_host() {
        if cfg!(target_endian = "little") {
            assert_eq!(DataType::U16.v2_dtype(), "<u2");
            assert_eq!(DataType::F32.v2_dtype(), "<f4");
        }
    }

    #[test]
    fn v3_dtype_strings() {
        assert_eq!(DataType::U16.v3_dtype(), "uint16");
        assert_eq!(DataType::F32.v3_dtype(), "float32");
    }

    #[test]
    fn bytes_per_sample_matches_width() {
        assert_eq!(DataType::U64.bytes_per_sample(), 8);
        assert_eq!(DataType::U8.bytes_per_sample(), 1);
    }
}
