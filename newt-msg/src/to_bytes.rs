use crate::msg::opt;
use crate::{Byte1, Message};

/// Trait allowing fallible conversion into bytes
pub trait TryIntoBytes {
  /// Error yielded when serialization fails
  type Error;

  /// Try to convert into a heap-allocated collection of bytes
  fn try_into_bytes(self) -> Result<Vec<u8>, Self::Error>;
}

/// Errors encounterable serializing to bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum MessageToBytesError {
  /// The provided buffer was too small for the message
  #[allow(missing_docs)]
  BufferTooSmall { capacity: usize, size: usize },
}

impl Message {
  /// Number of bytes [`Message::encode`] will write.
  pub fn wire_size(&self) -> usize {
    let header_size = 4;
    let token_size = self.token.len();
    let (opts_size, _) = self.opts.iter().fold((0usize, 0u16), |(size, prev), o| {
                                            (size + opt::wire_size(o, prev), o.number.0)
                                          });
    let payload_size = if self.payload.0.is_empty() {
      0
    } else {
      1 + self.payload.0.len()
    };

    header_size + token_size + opts_size + payload_size
  }

  /// Serialize into `buf`, returning the number of bytes written.
  ///
  /// Options must already be sorted by number (the invariant the
  /// [`Message::set`]/[`Message::add`] helpers maintain); each is
  /// emitted as its delta from the previous option.
  pub fn encode(&self, buf: &mut [u8]) -> Result<usize, MessageToBytesError> {
    let size = self.wire_size();
    if buf.len() < size {
      return Err(MessageToBytesError::BufferTooSmall { capacity: buf.len(),
                                                       size });
    }

    let mut bytes = Vec::with_capacity(size);

    bytes.push(Byte1 { tkl: self.token.len() as u8,
                       ver: self.ver,
                       ty: self.ty }.into());
    bytes.push(self.code.into());
    bytes.extend(<[u8; 2]>::from(self.id));
    bytes.extend(self.token.0.as_ref());

    let mut prev = 0u16;
    for o in &self.opts {
      opt::extend_bytes(o, prev, &mut bytes);
      prev = o.number.0;
    }

    if !self.payload.0.is_empty() {
      bytes.push(0b1111_1111);
      bytes.extend(&self.payload.0);
    }

    buf[..bytes.len()].copy_from_slice(&bytes);
    Ok(bytes.len())
  }
}

impl TryIntoBytes for Message {
  type Error = MessageToBytesError;

  fn try_into_bytes(self) -> Result<Vec<u8>, Self::Error> {
    let mut buf = vec![0u8; self.wire_size()];
    let n = self.encode(&mut buf)?;
    buf.truncate(n);
    Ok(buf)
  }
}

impl From<Byte1> for u8 {
  fn from(b: Byte1) -> u8 {
    let ver = b.ver.0 << 6;
    let ty = u8::from(b.ty) << 4;
    let tkl = b.tkl;

    ver | ty | tkl
  }
}
