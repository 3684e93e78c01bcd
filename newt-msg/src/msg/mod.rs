/// Message Code
pub mod code;

/// Message parsing errors
pub mod parse_error;

/// Message ID
pub mod id;

/// Message Options
pub mod opt;

/// Message Type
pub mod ty;

/// Message Token
pub mod token;

/// Message Version
pub mod ver;

pub use code::*;
pub use id::*;
pub use opt::*;
pub use parse_error::*;
pub use token::*;
pub use ty::*;
pub use ver::*;

use crate::cursor::Cursor;
use crate::TryFromBytes;

/// Message body; raw bytes whose interpretation is up to
/// [`opt::known::CONTENT_FORMAT`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Payload(pub Vec<u8>);

/// Struct representing the first byte of a message.
///
/// ```text
/// CoAP version
/// |
/// |  Message type (CON, NON, ACK, RST)
/// |  |
/// |  |  Length of token, in bytes. (4-bit integer)
/// |  |  |
/// vv vv vvvv
/// 01 00 0000
/// ```
#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) struct Byte1 {
  pub(crate) ver: Version,
  pub(crate) ty: Type,
  pub(crate) tkl: u8,
}

impl From<u8> for Byte1 {
  fn from(b: u8) -> Self {
    let ver = b >> 6; // bits 0 & 1
    let ty = b >> 4 & 0b11; // bits 2 & 3
    let tkl = b & 0b1111u8; // last 4 bits

    Byte1 { ver: Version(ver),
            ty: Type::from(ty),
            tkl }
  }
}

/// # `Message` struct
/// Low-level representation of a message that has been parsed from
/// (or will be serialized into) the raw binary format.
///
/// Options are stored with their absolute [`OptNumber`] and the
/// collection invariant is that they are sorted by number; the
/// delta encoding on the wire is an artifact of
/// [serialization](crate::TryIntoBytes) only.
///
/// ```
/// use newt_msg::{Message, TryFromBytes, TryIntoBytes, Type};
///
/// let msg = Message::new(Type::Con, newt_msg::Code::new(0, 1), newt_msg::Id(1), newt_msg::Token::default());
/// let bytes: Vec<u8> = msg.clone().try_into_bytes().unwrap();
/// assert_eq!(Message::try_from_bytes(&bytes).unwrap(), msg);
/// ```
#[derive(Clone, Debug, PartialEq)]
pub struct Message {
  /// see [`Id`] for details
  pub id: Id,
  /// see [`Type`] for details
  pub ty: Type,
  /// see [`Version`] for details
  pub ver: Version,
  /// see [`Token`] for details
  pub token: Token,
  /// see [`Code`] for details
  pub code: Code,
  /// see [`opt::Opt`] for details. Sorted by [`OptNumber`].
  pub opts: Vec<Opt>,
  /// see [`Payload`]
  pub payload: Payload,
}

impl Message {
  /// Create an empty message with no options or payload.
  pub fn new(ty: Type, code: Code, id: Id, token: Token) -> Self {
    Self { id,
           ty,
           code,
           token,
           ver: Version::default(),
           opts: Vec::new(),
           payload: Payload(Vec::new()) }
  }

  /// Create a new message that ACKs this one.
  ///
  /// Empty ACKs echo the message id of the CON they acknowledge
  /// and carry no token, options or payload.
  pub fn ack(&self) -> Self {
    Self::new(Type::Ack, Code::new(0, 0), self.id, Token::default())
  }

  /// Create a new empty RST for this message.
  pub fn reset(&self) -> Self {
    Self::new(Type::Reset, Code::new(0, 0), self.id, Token::default())
  }

  /// Insert `value` for option `number`, replacing any values
  /// previously set for that number.
  pub fn set(&mut self, number: OptNumber, value: OptValue) {
    self.remove(number);
    self.add(number, value);
  }

  /// Insert an additional `value` for (repeatable) option `number`,
  /// after any values already present, keeping `opts` sorted.
  pub fn add(&mut self, number: OptNumber, value: OptValue) {
    let ix = self.opts.iter().take_while(|o| o.number <= number).count();
    self.opts.insert(ix, Opt { number, value });
  }

  /// First value set for option `number`, if any.
  pub fn get(&self, number: OptNumber) -> Option<&OptValue> {
    self.opts
        .iter()
        .find(|o| o.number == number)
        .map(|o| &o.value)
  }

  /// All values set for (repeatable) option `number`, in order.
  pub fn get_all(&self, number: OptNumber) -> impl Iterator<Item = &OptValue> {
    self.opts
        .iter()
        .filter(move |o| o.number == number)
        .map(|o| &o.value)
  }

  /// First value for `number` interpreted as a CoAP uint.
  pub fn get_uint(&self, number: OptNumber) -> Option<u64> {
    self.get(number).map(OptValue::uint)
  }

  /// Set `number` to the minimal-length uint encoding of `value`.
  pub fn set_uint(&mut self, number: OptNumber, value: u64) {
    self.set(number, OptValue::from_uint(value));
  }

  /// Drop every value set for option `number`.
  pub fn remove(&mut self, number: OptNumber) {
    self.opts.retain(|o| o.number != number);
  }
}

impl<Bytes: AsRef<[u8]>> TryFromBytes<Bytes> for Message {
  type Error = MessageParseError;

  fn try_from_bytes(bytes: Bytes) -> Result<Self, Self::Error> {
    let mut bytes = Cursor::new(bytes);

    let header = match bytes.take_exact(4) {
      | Some(&[b1, code, id_a, id_b]) => (Byte1::from(b1), Code::from(code), Id::from_be_bytes([id_a, id_b])),
      | _ => return Err(MessageParseError::HeaderTooShort),
    };

    let (Byte1 { ver, ty, tkl }, code, id) = header;

    if ver != Version(1) {
      return Err(MessageParseError::VersionUnsupported(ver.0));
    }

    if tkl > 8 {
      return Err(MessageParseError::InvalidTokenLength(tkl));
    }

    let token = match bytes.take_exact(tkl as usize) {
      | Some(bs) => Token(bs.iter().copied().collect()),
      | None => {
        return Err(MessageParseError::TokenTooShort { expected: tkl,
                                                      actual: bytes.remaining() })
      },
    };

    let opts = opt::parse_opts(&mut bytes).map_err(MessageParseError::Opt)?;
    let payload = Payload(bytes.take_until_end().to_vec());

    Ok(Message { id,
                 ty,
                 ver,
                 code,
                 token,
                 opts,
                 payload })
  }
}
