use newt_msg::opt::known;
use newt_msg::opt::known::observe::Action;
use newt_msg::{Block, Code, Id, Message, OptValue, Payload, Token, Type};

/// Request methods
pub mod method;

#[doc(inline)]
pub use method::Method;

/// Target URIs
pub mod uri;

#[doc(inline)]
pub use uri::Uri;

/// A CoAP request; a [`Message`] whose code is a method and whose
/// options describe a target resource.
///
/// ```
/// use newt::req::{Req, Uri};
///
/// let uri = Uri::parse("coap://device.local/sensor/temp").unwrap();
/// let mut req = Req::get(&uri);
/// req.non();
///
/// assert_eq!(req.path_segments(), vec!["sensor", "temp"]);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Req(pub(crate) Message);

impl Req {
  /// Create a request targeting `uri`
  pub fn new(method: Method, uri: &Uri) -> Self {
    let mut msg = Message::new(Type::Con, method.code(), Id(0), Token::default());

    msg.set(known::HOST, OptValue(uri.host.clone().into_bytes()));
    msg.set_uint(known::PORT, uri.port as u64);
    for seg in &uri.path {
      msg.add(known::PATH, OptValue(seg.clone().into_bytes()));
    }
    for q in &uri.query {
      msg.add(known::QUERY, OptValue(q.clone().into_bytes()));
    }

    Self(msg)
  }

  /// Create a request carrying `proxy_uri` for a forward-proxy to
  /// dereference, instead of a host/port/path target.
  pub fn proxy(method: Method, proxy_uri: impl AsRef<str>) -> Self {
    let mut msg = Message::new(Type::Con, method.code(), Id(0), Token::default());
    msg.set(known::PROXY_URI,
            OptValue(proxy_uri.as_ref().as_bytes().to_vec()));
    Self(msg)
  }

  /// Creates a new GET request
  pub fn get(uri: &Uri) -> Self {
    Self::new(Method::GET, uri)
  }

  /// Creates a new POST request
  pub fn post(uri: &Uri) -> Self {
    Self::new(Method::POST, uri)
  }

  /// Creates a new PUT request
  pub fn put(uri: &Uri) -> Self {
    Self::new(Method::PUT, uri)
  }

  /// Creates a new DELETE request
  pub fn delete(uri: &Uri) -> Self {
    Self::new(Method::DELETE, uri)
  }

  /// Set this request to be non-confirmable.
  ///
  /// Some messages do not require an acknowledgement. This is
  /// particularly true for messages that are repeated regularly for
  /// application requirements, such as repeated readings from a
  /// sensor.
  pub fn non(&mut self) -> () {
    self.0.ty = Type::Non;
  }

  /// Get the request method.
  ///
  /// `None` if the message's code is not a known method
  /// (e.g. on a server decoding junk).
  pub fn method(&self) -> Option<Method> {
    Method::from_code(self.0.code)
  }

  /// Get the request type (confirmable, non-confirmable)
  pub fn msg_type(&self) -> Type {
    self.0.ty
  }

  /// Get a copy of the message id for this request
  pub fn msg_id(&self) -> Id {
    self.0.id
  }

  /// Get a copy of the message token for this request
  pub fn msg_token(&self) -> Token {
    self.0.token
  }

  /// Updates the Message ID for this request
  pub fn set_msg_id(&mut self, id: Id) {
    self.0.id = id;
  }

  /// Updates the Message Token for this request
  pub fn set_msg_token(&mut self, token: Token) {
    self.0.token = token;
  }

  /// The Uri-Path segments, in order.
  pub fn path_segments(&self) -> Vec<&str> {
    self.0
        .get_all(known::PATH)
        .filter_map(OptValue::as_str)
        .collect()
  }

  /// The Uri-Query parameters, in order.
  pub fn queries(&self) -> Vec<&str> {
    self.0
        .get_all(known::QUERY)
        .filter_map(OptValue::as_str)
        .collect()
  }

  /// Ask the server to add (or remove) us from the target
  /// resource's observer list.
  pub fn set_observe(&mut self, action: Action) {
    self.0.set_uint(known::OBSERVE, u32::from(action) as u64);
  }

  /// The Observe option, if present.
  pub fn observe(&self) -> Option<Action> {
    self.0
        .get_uint(known::OBSERVE)
        .map(|n| Action::from(n as u32))
  }

  /// Describe the request-body block this message carries.
  pub fn set_block1(&mut self, block: Block) {
    self.0.set(known::BLOCK1, block.into());
  }

  /// The request-body block descriptor, if present.
  pub fn block1(&self) -> Option<Block> {
    self.0
        .get(known::BLOCK1)
        .and_then(|v| Block::from_bytes(&v.0))
  }

  /// Ask for a specific block of the response body.
  pub fn set_block2(&mut self, block: Block) {
    self.0.set(known::BLOCK2, block.into());
  }

  /// The response-body block control, if present.
  pub fn block2(&self) -> Option<Block> {
    self.0
        .get(known::BLOCK2)
        .and_then(|v| Block::from_bytes(&v.0))
  }

  /// Add a payload to this request
  pub fn set_payload(&mut self, payload: impl Into<Vec<u8>>) {
    self.0.payload = Payload(payload.into());
  }

  /// Get the payload's raw bytes
  pub fn payload(&self) -> &[u8] {
    &self.0.payload.0
  }

  /// Get the payload and attempt to interpret it as utf8
  pub fn payload_str(&self) -> Result<&str, core::str::Utf8Error> {
    core::str::from_utf8(self.payload())
  }

  /// The request's raw code (method or junk)
  pub fn code(&self) -> Code {
    self.0.code
  }

  /// Borrow the message behind this request
  pub fn msg(&self) -> &Message {
    &self.0
  }
}

impl From<Message> for Req {
  fn from(msg: Message) -> Self {
    Self(msg)
  }
}

impl From<Req> for Message {
  fn from(req: Req) -> Self {
    req.0
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn uri() -> Uri {
    Uri::parse("coap://dev:5683/a/b?q=1").unwrap()
  }

  #[test]
  fn target_options() {
    let req = Req::get(&uri());
    assert_eq!(req.method(), Some(Method::GET));
    assert_eq!(req.msg().get(known::HOST).unwrap().as_str(), Some("dev"));
    assert_eq!(req.msg().get_uint(known::PORT), Some(5683));
    assert_eq!(req.path_segments(), vec!["a", "b"]);
    assert_eq!(req.queries(), vec!["q=1"]);
  }

  #[test]
  fn proxy_request_has_no_target_options() {
    let req = Req::proxy(Method::GET, "coap://far.away/thing");
    assert!(req.msg().get(known::HOST).is_none());
    assert_eq!(req.msg().get(known::PROXY_URI).unwrap().as_str(),
               Some("coap://far.away/thing"));
  }

  #[test]
  fn observe_flag() {
    let mut req = Req::get(&uri());
    assert_eq!(req.observe(), None);
    req.set_observe(Action::Register);
    assert_eq!(req.observe(), Some(Action::Register));
  }

  #[test]
  fn block_options() {
    let mut req = Req::put(&uri());
    req.set_block1(Block::new(3, true, 6));
    assert_eq!(req.block1(), Some(Block::new(3, true, 6)));
    assert_eq!(req.block2(), None);
  }
}
