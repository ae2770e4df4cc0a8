//! Wire sample codec.
//!
//! Samples are addressed by their index inside one channel block. Decoding
//! strips the LSB offset and masks to the pixel depth; encoding does the
//! reverse and exists for the simulated camera and for tests.

use flipro_core::geometry::SampleEncoding;

/// Mask keeping the low `depth` bits of a sample.
#[must_use]
pub fn depth_mask(depth: u32) -> u16 {
    if depth >= 16 {
        u16::MAX
    } else {
        (1u16 << depth) - 1
    }
}

/// Read the raw container value of sample `index`. Out-of-range reads yield 0.
#[inline]
#[must_use]
pub fn read_container(block: &[u8], encoding: SampleEncoding, index: usize) -> u16 {
    match encoding {
        SampleEncoding::Byte => block.get(index).copied().map_or(0, u16::from),
        SampleEncoding::Word => {
            let at = index * 2;
            match block.get(at..at + 2) {
                Some(pair) => u16::from_le_bytes([pair[0], pair[1]]),
                None => 0,
            }
        }
        SampleEncoding::Packed12 => {
            let base = (index / 2) * 3;
            let byte = |offset: usize| block.get(base + offset).copied().map_or(0, u16::from);
            if index % 2 == 0 {
                (byte(0) << 4) | (byte(1) >> 4)
            } else {
                ((byte(1) & 0x0F) << 8) | byte(2)
            }
        }
    }
}

/// Decode sample `index` to a pixel value.
#[inline]
#[must_use]
pub fn decode_sample(
    block: &[u8],
    encoding: SampleEncoding,
    index: usize,
    lsb_offset: u32,
    mask: u16,
) -> u16 {
    (read_container(block, encoding, index) >> lsb_offset) & mask
}

/// Encode `samples` into their wire form, appending to `out`.
pub fn pack_samples(
    samples: &[u16],
    encoding: SampleEncoding,
    depth: u32,
    lsb_offset: u32,
    out: &mut Vec<u8>,
) {
    let mask = depth_mask(depth);
    let container = |value: u16| (value & mask) << lsb_offset;

    match encoding {
        SampleEncoding::Byte => {
            out.extend(samples.iter().map(|&s| container(s) as u8));
        }
        SampleEncoding::Word => {
            for &s in samples {
                out.extend_from_slice(&container(s).to_le_bytes());
            }
        }
        SampleEncoding::Packed12 => {
            for pair in samples.chunks(2) {
                let p0 = container(pair[0]) & 0x0FFF;
                match pair.get(1) {
                    Some(&second) => {
                        let p1 = container(second) & 0x0FFF;
                        out.push((p0 >> 4) as u8);
                        out.push((((p0 & 0x0F) << 4) | (p1 >> 8)) as u8);
                        out.push((p1 & 0xFF) as u8);
                    }
                    None => {
                        out.push((p0 >> 4) as u8);
                        out.push(((p0 & 0x0F) << 4) as u8);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packed12_bit_layout() {
        let mut out = Vec::new();
        pack_samples(&[0xABC, 0x123], SampleEncoding::Packed12, 12, 0, &mut out);
        assert_eq!(out, vec![0xAB, 0xC1, 0x23]);
        assert_eq!(read_container(&out, SampleEncoding::Packed12, 0), 0xABC);
        assert_eq!(read_container(&out, SampleEncoding::Packed12, 1), 0x123);
    }

    #[test]
    fn test_packed12_odd_tail_uses_two_bytes() {
        let mut out = Vec::new();
        pack_samples(&[1, 2, 0xFFF], SampleEncoding::Packed12, 12, 0, &mut out);
        assert_eq!(out.len(), 5);
        assert_eq!(read_container(&out, SampleEncoding::Packed12, 2), 0xFFF);
    }

    #[test]
    fn test_word_is_little_endian() {
        let mut out = Vec::new();
        pack_samples(&[0x1234], SampleEncoding::Word, 16, 0, &mut out);
        assert_eq!(out, vec![0x34, 0x12]);
    }

    #[test]
    fn test_lsb_offset_is_stripped() {
        let mut out = Vec::new();
        pack_samples(&[0x3FF], SampleEncoding::Word, 10, 4, &mut out);
        assert_eq!(read_container(&out, SampleEncoding::Word, 0), 0x3FF0);
        assert_eq!(
            decode_sample(&out, SampleEncoding::Word, 0, 4, depth_mask(10)),
            0x3FF
        );
    }

    #[test]
    fn test_out_of_range_reads_zero() {
        assert_eq!(read_container(&[7], SampleEncoding::Byte, 3), 0);
        assert_eq!(read_container(&[7], SampleEncoding::Word, 0), 0);
    }

    #[test]
    fn test_depth_mask() {
        assert_eq!(depth_mask(8), 0xFF);
        assert_eq!(depth_mask(12), 0x0FFF);
        assert_eq!(depth_mask(16), 0xFFFF);
    }
}
