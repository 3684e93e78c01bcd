use newt_msg::opt::known;
use newt_msg::opt::known::observe::Action;
use newt_msg::{Block, Code, ContentFormat, Id, Message, OptValue, Payload, Token, Type};

use crate::req::Req;

/// Response codes
pub mod code;

/// A CoAP response; a [`Message`] whose code is a status.
#[derive(Debug, Clone, PartialEq)]
pub struct Resp(pub(crate) Message);

impl Resp {
  /// Create a response for a request.
  ///
  /// A confirmable request gets a piggybacked ACK (same message id);
  /// a non-confirmable request gets a NON with an id of the server's
  /// choosing (set it with [`Resp::set_msg_id`]).
  ///
  /// ACK and RST messages cannot be responded to; those yield `None`.
  pub fn for_request(req: &Req) -> Option<Self> {
    let (ty, id) = match req.msg_type() {
      | Type::Con => (Type::Ack, req.msg_id()),
      | Type::Non => (Type::Non, Id(0)),
      | Type::Ack | Type::Reset => return None,
    };

    Some(Self(Message::new(ty, code::CONTENT, id, req.msg_token())))
  }

  /// A separate (non-piggybacked) response to a confirmable request:
  /// sent as a fresh CON exchange that happens to reuse the
  /// request's token.
  pub fn separate_for_request(req: &Req, id: Id) -> Self {
    Self(Message::new(Type::Con, code::CONTENT, id, req.msg_token()))
  }

  /// Get the response status code
  pub fn code(&self) -> Code {
    self.0.code
  }

  /// Set the response status code
  pub fn set_code(&mut self, code: Code) {
    self.0.code = code;
  }

  /// Get a copy of the message id
  pub fn msg_id(&self) -> Id {
    self.0.id
  }

  /// Update the message id
  pub fn set_msg_id(&mut self, id: Id) {
    self.0.id = id;
  }

  /// Get a copy of the message token
  pub fn msg_token(&self) -> Token {
    self.0.token
  }

  /// Get the response type
  pub fn msg_type(&self) -> Type {
    self.0.ty
  }

  /// Add a payload to this response
  pub fn set_payload(&mut self, payload: impl Into<Vec<u8>>) {
    self.0.payload = Payload(payload.into());
  }

  /// Get the payload's raw bytes
  pub fn payload(&self) -> &[u8] {
    &self.0.payload.0
  }

  /// Copy the payload's bytes into a string, if utf8
  pub fn payload_string(&self) -> Result<String, core::str::Utf8Error> {
    core::str::from_utf8(self.payload()).map(String::from)
  }

  /// Set the Content-Format of the payload
  pub fn set_content_format(&mut self, format: ContentFormat) {
    self.0
        .set(known::CONTENT_FORMAT, OptValue(format.bytes().to_vec()));
  }

  /// The payload's Content-Format, if declared
  pub fn content_format(&self) -> Option<ContentFormat> {
    self.0
        .get_uint(known::CONTENT_FORMAT)
        .map(|n| ContentFormat::from(n as u16))
  }

  /// Max-Age in seconds; how long this representation stays fresh
  pub fn max_age(&self) -> Option<u64> {
    self.0.get_uint(known::MAX_AGE)
  }

  /// The Observe option (notification sequence number), if present
  pub fn observe(&self) -> Option<Action> {
    self.0
        .get_uint(known::OBSERVE)
        .map(|n| Action::from(n as u32))
  }

  /// The response-body block descriptor, if present
  pub fn block2(&self) -> Option<Block> {
    self.0
        .get(known::BLOCK2)
        .and_then(|v| Block::from_bytes(&v.0))
  }

  /// The request-body block acknowledgement, if present
  pub fn block1(&self) -> Option<Block> {
    self.0
        .get(known::BLOCK1)
        .and_then(|v| Block::from_bytes(&v.0))
  }

  /// Borrow the message behind this response
  pub fn msg(&self) -> &Message {
    &self.0
  }
}

impl From<Message> for Resp {
  fn from(msg: Message) -> Self {
    Self(msg)
  }
}

impl From<Resp> for Message {
  fn from(resp: Resp) -> Self {
    resp.0
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::req::Uri;

  fn req() -> Req {
    Req::get(&Uri::parse("coap://h/x").unwrap())
  }

  #[test]
  fn piggyback_for_con() {
    let mut r = req();
    r.set_msg_id(Id(7));
    r.set_msg_token(Token::opaque(&[1, 2]));

    let resp = Resp::for_request(&r).unwrap();
    assert_eq!(resp.msg_type(), Type::Ack);
    assert_eq!(resp.msg_id(), Id(7));
    assert_eq!(resp.msg_token(), Token::opaque(&[1, 2]));
  }

  #[test]
  fn non_for_non() {
    let mut r = req();
    r.non();
    assert_eq!(Resp::for_request(&r).unwrap().msg_type(), Type::Non);
  }

  #[test]
  fn nothing_for_ack() {
    let mut r = req();
    r.0.ty = Type::Ack;
    assert!(Resp::for_request(&r).is_none());
  }

  #[test]
  fn separate_reuses_token_only() {
    let mut r = req();
    r.set_msg_id(Id(7));
    r.set_msg_token(Token::opaque(&[9]));

    let resp = Resp::separate_for_request(&r, Id(40));
    assert_eq!(resp.msg_type(), Type::Con);
    assert_eq!(resp.msg_id(), Id(40));
    assert_eq!(resp.msg_token(), Token::opaque(&[9]));
  }
}
