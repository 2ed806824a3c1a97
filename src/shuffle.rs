//! Byte- and bit-shuffle filters applied before Blosc block compression.
//!
//! These are the same filters `c-blosc` applies ahead of its codecs: byte
//! shuffle transposes the bytes of same-offset samples so that same-magnitude
//! bytes across a chunk become contiguous (good for scientific imagery, where
//! high-order bytes repeat far more than low-order ones); bit shuffle does
//! the same at bit granularity. Both are lossless, invertible, and operate in
//! fixed-size "typesize" elements — they don't know or care what the bytes
//! mean, only how wide one sample is.

/// Byte-shuffle `typesize`-wide elements across `data`. `data.len()` must be
/// a multiple of `typesize`; a ragged remainder (not expected for whole chunk
/// buffers, since `typesize` always divides the chunk size) is left
/// untouched after the shuffled region.
pub fn byte_shuffle(data: &[u8], typesize: usize) -> Vec<u8> {
    if typesize <= 1 || data.is_empty() {
        return data.to_vec();
    }
    let n_elements = data.len() / typesize;
    let remainder = &data[n_elements * typesize..];

    let mut out = Vec::with_capacity(data.len());
    for byte_offset in 0..typesize {
        for elem in 0..n_elements {
            out.push(data[elem * typesize + byte_offset]);
        }
    }
    out.extend_from_slice(remainder);
    out
}

/// Inverse of [`byte_shuffle`].
pub fn byte_unshuffle(data: &[u8], typesize: usize) -> Vec<u8> {
    if typesize <= 1 || data.is_empty() {
        return data.to_vec();
    }
    let n_elements = data.len() / typesize;
    let remainder = &data[n_elements * typesize..];

    let mut out = vec![0u8; n_elements * typesize];
    let mut src = 0;
    for byte_offset in 0..typesize {
        for elem in 0..n_elements {
            out[elem * typesize + byte_offset] = data[src];
            src += 1;
        }
    }
    out.extend_from_slice(remainder);
    out
}

/// Bit-shuffle `typesize`-wide elements across `data`: transposes bit planes
/// so that bit `b` of every element becomes contiguous. Requires
/// `data.len()` to be a multiple of `typesize`.
pub fn bit_shuffle(data: &[u8], typesize: usize) -> Vec<u8> {
    if typesize == 0 || data.is_empty() {
        return data.to_vec();
    }
    let n_elements = data.len() / typesize;
    let remainder = &data[n_elements * typesize..];
    let n_bits = typesize * 8;

    let mut out = vec![0u8; n_elements * typesize];
    for bit in 0..n_bits {
        let src_byte = bit / 8;
        let src_bit = bit % 8;
        for elem in 0..n_elements {
            let byte = data[elem * typesize + src_byte];
            let bit_val = (byte >> src_bit) & 1;

            let dst_bit_index = bit * n_elements + elem;
            let dst_byte = dst_bit_index / 8;
            let dst_bit = dst_bit_index % 8;
            out[dst_byte] |= bit_val << dst_bit;
        }
    }
    out.extend_from_slice(remainder);
    out
}

/// Inverse of [`bit_shuffle`]. `n_elements` (the original `data.len() /
/// typesize` at shuffle time) must be supplied by the caller: the shuffled
/// byte length alone (`ceil(n_bits * n_elements / 8)`) does not determine it
/// uniquely.
pub fn bit_unshuffle(data: &[u8], typesize: usize, n_elements: usize) -> Vec<u8> {
    if typesize == 0 || n_elements == 0 {
        return data.to_vec();
    }
    let n_bits = typesize * 8;
    let shuffled_len = (n_bits * n_elements + 7) / 8;
    let remainder = &data[shuffled_len..];

    let mut out = vec![0u8; n_elements * typesize];
    for bit in 0..n_bits {
        let dst_byte = bit / 8;
        let dst_bit = bit % 8;
        for elem in 0..n_elements {
            let src_bit_index = bit * n_elements + elem;
            let src_byte = src_bit_index / 8;
            let src_bit = src_bit_index % 8;
            let bit_val = (data[src_byte] >> src_bit) & 1;
            out[elem * typesize + dst_byte] |= bit_val << dst_bit;
        }
    }
    out.extend_from_slice(remainder);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_shuffle_round_trips() {
        let data: Vec<u8> = (0..64u8).collect();
        for typesize in [1, 2, 4, 8] {
            let shuffled = byte_shuffle(&data, typesize);
            let restored = byte_unshuffle(&shuffled, typesize);
            assert_eq!(restored, data, "typesize={typesize}");
        }
    }

    #[test]
    fn byte_shuffle_groups_same_offset_bytes() {
        // Four u16 little-endian samples: low bytes then high bytes.
        let data: Vec<u8> = vec![0x01, 0xAA, 0x02, 0xAA, 0x03, 0xAA, 0x04, 0xAA];
        let shuffled = byte_shuffle(&data, 2);
        assert_eq!(shuffled, vec![0x01, 0x02, 0x03, 0x04, 0xAA, 0xAA, 0xAA, 0xAA]);
    }

    #[test]
    fn bit_shuffle_round_trips() {
        let data: Vec<u8> = (0..32u8).map(|x| x.wrapping_mul(37)).collect();
        for typesize in [1, 2, 4] {
            let n_elements = data.len() / typesize;
            let shuffled = bit_shuffle(&data, typesize);
            let restored = bit_unshuffle(&shuffled, typesize, n_elements);
            assert_eq!(restored, data, "typesize={typesize}");
        }
    }

    #[test]
    fn bit_unshuffle_preserves_trailing_remainder() {
        // 5 bytes isn't a multiple of typesize=2: the last byte is left as a
        // tail rather than shuffled.
        let data: Vec<u8> = vec![0x11, 0x22, 0x33, 0x44, 0x99];
        let shuffled = bit_shuffle(&data, 2);
        assert_eq!(shuffled.last(), Some(&0x99));
        let restored = bit_unshuffle(&shuffled, 2, data.len() / 2);
        assert_eq!(restored, data);
    }
}
