/// Trait for fallibly converting a buffer of bytes
/// into a structured value, consuming the whole buffer.
pub trait TryFromBytes<Bytes>: Sized {
  /// Error yielded when conversion fails
  type Error;

  /// Try to convert from raw bytes
  fn try_from_bytes(bytes: Bytes) -> Result<Self, Self::Error>;
}
