use tinyvec::ArrayVec;

/// Three items of information are packed into a Block1 or Block2
/// option value:
/// * the relative number of the block within the transfer ([`Block::num`], 20 bits)
/// * whether more blocks follow ([`Block::more`], 1 bit)
/// * the block size exponent ([`Block::szx`], 3 bits; size = `2^(szx + 4)`)
///
/// ```text
///  0               1               2
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |         num (if 3 bytes)              |M| szx |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Block {
  /// Relative block number within the transfer
  pub num: u32,
  /// Whether more blocks follow this one
  pub more: bool,
  /// Size exponent; the block holds `2^(szx + 4)` bytes
  pub szx: u8,
}

impl Block {
  /// Create a block descriptor. `num` is masked to 20 bits and
  /// `szx` to 3.
  pub fn new(num: u32, more: bool, szx: u8) -> Self {
    Self { num: num & 0x000F_FFFF,
           more,
           szx: szx & 0b111 }
  }

  /// The block size in bytes this descriptor announces.
  pub fn size(&self) -> usize {
    1 << (self.szx as usize + 4)
  }

  /// Byte offset of this block within the full body.
  pub fn offset(&self) -> usize {
    self.num as usize * self.size()
  }

  /// Pack into the option value's native u32 layout.
  pub fn value(&self) -> u32 {
    self.num << 4 | u32::from(self.more) << 3 | self.szx as u32
  }

  /// Encode into the minimum number of value bytes:
  /// 1 for `num < 16`, 2 for `num < 4096`, 3 otherwise.
  pub fn to_bytes(&self) -> ArrayVec<[u8; 3]> {
    let v = self.value();
    let mut out = ArrayVec::new();
    if self.num >= 4096 {
      out.push((v >> 16) as u8);
    }
    if self.num >= 16 {
      out.push((v >> 8) as u8);
    }
    out.push(v as u8);
    out
  }

  /// Decode from 0-3 value bytes (the empty value is block 0,
  /// no-more, szx 0).
  pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
    if bytes.len() > 3 {
      return None;
    }

    let v = bytes.iter().fold(0u32, |acc, &b| acc << 8 | b as u32);
    Some(Self { num: v >> 4,
                more: v & 0b1000 != 0,
                szx: (v & 0b111) as u8 })
  }
}

impl From<Block> for crate::OptValue {
  fn from(b: Block) -> Self {
    crate::OptValue(b.to_bytes().to_vec())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn block() {
    let b = Block::from_bytes(&[33]).unwrap();
    assert_eq!(b.size(), 32);
    assert_eq!(b.num, 2);
    assert_eq!(b.more, false);

    let b = Block::from_bytes(&[59]).unwrap();
    assert_eq!(b.size(), 128);
    assert_eq!(b.num, 3);
    assert_eq!(b.more, true);

    assert_eq!(Block::new(2, false, 1).to_bytes().as_slice(), &[33]);
    assert_eq!(Block::new(3, true, 3).to_bytes().as_slice(), &[59]);
  }

  #[test]
  fn minimum_byte_counts() {
    let cases: [(u32, usize); 5] = [(0, 1), (15, 1), (16, 2), (4095, 2), (4096, 3)];

    for (num, expected_len) in cases {
      for szx in 0..=7u8 {
        for more in [false, true] {
          let b = Block::new(num, more, szx);
          let bytes = b.to_bytes();
          assert_eq!(bytes.len(), expected_len, "num {} szx {}", num, szx);
          assert_eq!(Block::from_bytes(&bytes), Some(b));
        }
      }
    }
  }

  #[test]
  fn empty_value_is_block_zero() {
    assert_eq!(Block::from_bytes(&[]),
               Some(Block { num: 0,
                            more: false,
                            szx: 0 }));
  }

  #[test]
  fn oversize_value_rejected() {
    assert_eq!(Block::from_bytes(&[1, 2, 3, 4]), None);
  }
}
