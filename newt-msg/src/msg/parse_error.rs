/// Errors encounterable while parsing a message from bytes
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum MessageParseError {
  /// Fewer than the 4 fixed header bytes were available
  HeaderTooShort,

  /// The version field was not 1
  VersionUnsupported(u8),

  /// Token length nibble was > 8
  InvalidTokenLength(u8),

  /// The header advertised more token bytes than the datagram held
  #[allow(missing_docs)]
  TokenTooShort { expected: u8, actual: usize },

  /// Error parsing an option
  Opt(super::opt::parse_error::OptParseError),
}
