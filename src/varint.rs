//! SQLite variable-length integers.
//!
//! A varint is between 1 and 9 bytes long. It consists of zero or more bytes
//! with the high-order bit set followed by a single byte with the high-order
//! bit clear, or nine bytes, whichever is shorter. The lower seven bits of each
//! of the first eight bytes and all 8 bits of the ninth byte are used to
//! reconstruct the 64-bit twos-complement integer. Varints are big-endian.
//!
//! <https://www.sqlite.org/fileformat2.html#varint>

/// Longest possible encoding, in bytes.
pub const MAX_LEN: usize = 9;

/// Decodes a varint from the front of `buf`, returning the value and the
/// number of bytes consumed. Returns `None` if `buf` ends before the varint
/// does.
pub fn decode(buf: &[u8]) -> Option<(u64, usize)> {
  let mut value = 0u64;
  for (i, &byte) in buf.iter().take(MAX_LEN).enumerate() {
    if i == MAX_LEN - 1 {
      value = (value << 8) | byte as u64;
      return Some((value, MAX_LEN));
    }
    value = (value << 7) | (byte & 0x7f) as u64;
    if byte & 0x80 == 0 {
      return Some((value, i + 1));
    }
  }
  None
}

/// Number of bytes `encode` will produce for `value`.
pub fn encoded_len(value: u64) -> usize {
  if value > 0x00ff_ffff_ffff_ffff {
    return MAX_LEN;
  }
  let bits = 64 - value.leading_zeros() as usize;
  bits.div_ceil(7).max(1)
}

pub fn encode(value: u64) -> Vec<u8> {
  let len = encoded_len(value);
  let mut out = vec![0u8; len];
  if len == MAX_LEN {
    out[8] = value as u8;
    let mut rest = value >> 8;
    for byte in out[..8].iter_mut().rev() {
      *byte = (rest & 0x7f) as u8 | 0x80;
      rest >>= 7;
    }
    return out;
  }

  let mut rest = value;
  for (i, byte) in out.iter_mut().rev().enumerate() {
    *byte = (rest & 0x7f) as u8;
    if i > 0 {
      *byte |= 0x80;
    }
    rest >>= 7;
  }
  out
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn decodes_single_byte() {
    assert_eq!(decode(&[0x00]), Some((0, 1)));
    assert_eq!(decode(&[0x7f, 0xff]), Some((127, 1)));
  }

  #[test]
  fn decodes_multi_byte() {
    assert_eq!(decode(&[0x81, 0x00]), Some((128, 2)));
    assert_eq!(decode(&[0x81, 0x80, 0x00]), Some((16384, 3)));
  }

  #[test]
  fn ninth_byte_contributes_all_eight_bits() {
    let buf = [0xff; 9];
    assert_eq!(decode(&buf), Some((u64::MAX, 9)));
  }

  #[test]
  fn truncated_input_is_rejected() {
    assert_eq!(decode(&[]), None);
    assert_eq!(decode(&[0x81, 0x81]), None);
  }

  #[test]
  fn width_table() {
    let cases = [
      (0u64, 1),
      (127, 1),
      (128, 2),
      (16_383, 2),
      (16_384, 3),
      (2_097_151, 3),
      (2_097_152, 4),
      (268_435_455, 4),
      (268_435_456, 5),
      ((1 << 35) - 1, 5),
      (1 << 35, 6),
      ((1 << 42) - 1, 6),
      (1 << 42, 7),
      ((1 << 49) - 1, 7),
      (1 << 49, 8),
      ((1 << 56) - 1, 8),
      (1 << 56, 9),
      (i64::MAX as u64, 9),
    ];
    for (value, width) in cases {
      let bytes = encode(value);
      assert_eq!(bytes.len(), width, "width of {value}");
      assert_eq!(decode(&bytes), Some((value, width)), "round trip of {value}");
    }
  }

  #[test]
  fn round_trips_across_the_positive_range() {
    let mut value = 1u64;
    while value < i64::MAX as u64 {
      for v in [value - 1, value, value + 1] {
        let bytes = encode(v);
        assert_eq!(decode(&bytes), Some((v, bytes.len())));
      }
      value = value.saturating_mul(3);
    }
  }
}
