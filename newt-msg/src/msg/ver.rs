/// Version of the CoAP protocol that the message adheres to.
///
/// Right now, this will always be 1; parsing rejects anything else
/// with [`MessageParseError::VersionUnsupported`](crate::MessageParseError::VersionUnsupported).
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub struct Version(pub u8);

impl Default for Version {
  fn default() -> Self {
    Version(1)
  }
}
