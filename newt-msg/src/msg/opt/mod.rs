use tinyvec::ArrayVec;

use crate::cursor::Cursor;

/// Errors encounterable while parsing options
pub mod parse_error;
pub use parse_error::*;

/// Well-known option numbers
pub mod known;

pub use known::{Block, ContentFormat};

/// # Option Number
///
/// Identifies which option is being set (e.g. Uri-Path has number 11).
///
/// On the wire options carry a *delta* from the previous option's
/// number; this crate resolves deltas while parsing, so an `OptNumber`
/// is always absolute.
#[derive(Copy, Clone, Hash, PartialEq, Eq, PartialOrd, Ord, Debug, Default)]
pub struct OptNumber(pub u16);

/// An option's opaque value. Interpretation depends on the
/// [`OptNumber`]; several well-known options are uints
/// ([`OptValue::uint`]).
#[derive(Clone, Hash, PartialEq, Eq, PartialOrd, Ord, Debug, Default)]
pub struct OptValue(pub Vec<u8>);

impl OptValue {
  /// Interpret the value as a variable-length big-endian uint.
  ///
  /// An empty value is `0`; values longer than 8 bytes keep the
  /// least-significant 8.
  pub fn uint(&self) -> u64 {
    self.0
        .iter()
        .fold(0u64, |acc, &b| acc.wrapping_shl(8) | b as u64)
  }

  /// The minimal-length big-endian uint encoding of `value`
  /// (`0` encodes as the empty value).
  pub fn from_uint(value: u64) -> Self {
    let bytes = value.to_be_bytes();
    let skip = bytes.iter().take_while(|&&b| b == 0).count();
    Self(bytes[skip..].to_vec())
  }

  /// Borrow the value as a str, if it is utf8.
  pub fn as_str(&self) -> Option<&str> {
    core::str::from_utf8(&self.0).ok()
  }
}

/// A single option: absolute number plus opaque value.
#[derive(Clone, Hash, PartialEq, Eq, PartialOrd, Ord, Debug, Default)]
pub struct Opt {
  /// See [`OptNumber`]
  pub number: OptNumber,
  /// See [`OptValue`]
  pub value: OptValue,
}

/// Resolve a delta/length nibble into its absolute value, consuming
/// extension bytes as needed.
///
/// `13` and `14` pull one and two extension bytes; `15` is reserved
/// and yields `reserved_err`.
pub(crate) fn parse_ext(head: u8,
                        bytes: &mut Cursor<impl AsRef<[u8]>>,
                        reserved_err: OptParseError)
                        -> Result<u32, OptParseError> {
  match head {
    | 13 => {
      let n = bytes.next().ok_or(OptParseError::UnexpectedEndOfStream)?;
      Ok((n as u32) + 13)
    },
    | 14 => match bytes.take_exact(2) {
      | Some(&[a, b]) => Ok(u16::from_be_bytes([a, b]) as u32 + 269),
      | _ => Err(OptParseError::UnexpectedEndOfStream),
    },
    | 15 => Err(reserved_err),
    | _ => Ok(head as u32),
  }
}

/// Split a delta or length into its header nibble and 0-2 extension
/// bytes.
pub(crate) fn ext_nibble(val: u16) -> (u8, ArrayVec<[u8; 2]>) {
  match val {
    | n if n >= 269 => {
      let mut bytes = ArrayVec::new();
      bytes.extend((n - 269).to_be_bytes());
      (14, bytes)
    },
    | n if n >= 13 => {
      let mut bytes = ArrayVec::new();
      bytes.push((n as u8) - 13);
      (13, bytes)
    },
    | n => (n as u8, ArrayVec::new()),
  }
}

/// Walk the option section of a message, accumulating deltas into
/// absolute numbers, stopping at the payload marker (consumed) or the
/// end of the buffer.
pub(crate) fn parse_opts(bytes: &mut Cursor<impl AsRef<[u8]>>) -> Result<Vec<Opt>, OptParseError> {
  let mut opts = Vec::new();
  let mut number = 0u32;

  loop {
    let byte1 = match bytes.next() {
      | None | Some(0b1111_1111) => return Ok(opts),
      | Some(b) => b,
    };

    // NOTE: delta must be consumed before the length extension bytes
    let delta = parse_ext(byte1 >> 4, bytes, OptParseError::OptionDeltaReservedValue(15))?;
    let len = parse_ext(byte1 & 0b0000_1111,
                        bytes,
                        OptParseError::ValueLengthReservedValue(15))? as usize;

    number += delta;
    if number > u16::MAX as u32 {
      return Err(OptParseError::NumberOverflow(number));
    }

    let value = bytes.take_exact(len)
                     .ok_or(OptParseError::UnexpectedEndOfStream)?;

    opts.push(Opt { number: OptNumber(number as u16),
                    value: OptValue(value.to_vec()) });
  }
}

/// Serialize one option given the previous option's number,
/// appending to `out`.
pub(crate) fn extend_bytes(opt: &Opt, prev_number: u16, out: &mut Vec<u8>) {
  let (delta, delta_ext) = ext_nibble(opt.number.0 - prev_number);
  let (len, len_ext) = ext_nibble(opt.value.0.len() as u16);

  out.push(delta << 4 | len);
  out.extend(delta_ext);
  out.extend(len_ext);
  out.extend(&opt.value.0);
}

/// Wire size of one option given the previous option's number.
pub(crate) fn wire_size(opt: &Opt, prev_number: u16) -> usize {
  let ext_size = |v: u16| match v {
    | n if n >= 269 => 2,
    | n if n >= 13 => 1,
    | _ => 0,
  };

  1 + ext_size(opt.number.0 - prev_number) + ext_size(opt.value.0.len() as u16) + opt.value.0.len()
}

#[cfg(test)]
mod tests {
  use super::*;

  fn parse_one(bytes: &[u8]) -> Opt {
    let mut opts = parse_opts(&mut Cursor::new(bytes)).unwrap();
    assert_eq!(opts.len(), 1);
    opts.remove(0)
  }

  #[test]
  fn parse_opt() {
    assert_eq!(parse_one(&[0b00010001, 0b00000001]),
               Opt { number: OptNumber(1),
                     value: OptValue(vec![1]) });

    assert_eq!(parse_one(&[0b11010001, 0b00000001, 0b00000001]),
               Opt { number: OptNumber(14),
                     value: OptValue(vec![1]) });

    assert_eq!(parse_one(&[0b11100001, 0b00000000, 0b00000001, 0b00000001]),
               Opt { number: OptNumber(270),
                     value: OptValue(vec![1]) });

    let mut cur = Cursor::new([0b00110001u8, 0b00000001, 0b00010001, 0b00000011, 0b11111111]);
    let opts = parse_opts(&mut cur).unwrap();
    assert_eq!(opts,
               vec![Opt { number: OptNumber(3),
                          value: OptValue(vec![1]) },
                    Opt { number: OptNumber(4),
                          value: OptValue(vec![3]) }]);
    // payload marker consumed
    assert_eq!(cur.remaining(), 0);
  }

  #[test]
  fn reserved_nibbles() {
    let mut cur = Cursor::new([0b11110001u8, 1]);
    assert_eq!(parse_opts(&mut cur),
               Err(OptParseError::OptionDeltaReservedValue(15)));

    let mut cur = Cursor::new([0b00011111u8, 1]);
    assert_eq!(parse_opts(&mut cur),
               Err(OptParseError::ValueLengthReservedValue(15)));
  }

  #[test]
  fn truncated_value() {
    let mut cur = Cursor::new([0b00010010u8, 1]);
    assert_eq!(parse_opts(&mut cur),
               Err(OptParseError::UnexpectedEndOfStream));
  }

  #[test]
  fn nibble_boundaries_round_trip() {
    // 12 | 13 | 14 sit on the no-extension / 1-byte boundary,
    // 268 | 269 | 270 on the 1-byte / 2-byte boundary.
    for delta in [12u16, 13, 14, 268, 269, 270] {
      let opt = Opt { number: OptNumber(delta),
                      value: OptValue(vec![0xAB]) };
      let mut bytes = Vec::new();
      extend_bytes(&opt, 0, &mut bytes);
      assert_eq!(bytes.len(), wire_size(&opt, 0));
      assert_eq!(parse_one(&bytes), opt, "delta {}", delta);
    }

    for len in [12usize, 13, 14, 268, 269, 270] {
      let opt = Opt { number: OptNumber(1),
                      value: OptValue(vec![0x42; len]) };
      let mut bytes = Vec::new();
      extend_bytes(&opt, 0, &mut bytes);
      assert_eq!(bytes.len(), wire_size(&opt, 0));
      assert_eq!(parse_one(&bytes), opt, "len {}", len);
    }
  }

  #[test]
  fn uint_values() {
    assert_eq!(OptValue::from_uint(0).0, Vec::<u8>::new());
    assert_eq!(OptValue::from_uint(60).0, vec![60]);
    assert_eq!(OptValue::from_uint(0x1234).0, vec![0x12, 0x34]);
    assert_eq!(OptValue(vec![]).uint(), 0);
    assert_eq!(OptValue(vec![0x12, 0x34]).uint(), 0x1234);
  }
}
