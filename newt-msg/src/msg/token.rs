use tinyvec::ArrayVec;

/// # Message Token
///
/// An opaque 0-8 byte value chosen by the client, echoed verbatim by
/// the server so responses can be correlated to the request that
/// caused them, independently of [`Id`](crate::Id) (which only
/// correlates ACK/RST to CON/NON).
#[derive(Copy, Clone, Hash, PartialEq, Eq, PartialOrd, Ord, Debug, Default)]
pub struct Token(pub ArrayVec<[u8; 8]>);

impl Token {
  /// Create a token from up to 8 bytes of opaque data.
  ///
  /// Bytes past the 8th are discarded.
  pub fn opaque(data: &[u8]) -> Token {
    Token(data.iter().copied().take(8).collect())
  }

  /// The token's length on the wire, in bytes.
  pub fn len(&self) -> usize {
    self.0.len()
  }

  /// Whether this is the zero-length token.
  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn opaque_truncates() {
    let t = Token::opaque(&[1, 2, 3, 4, 5, 6, 7, 8, 9, 10]);
    assert_eq!(t.len(), 8);
    assert_eq!(t.0.as_ref(), &[1, 2, 3, 4, 5, 6, 7, 8]);
  }
}
