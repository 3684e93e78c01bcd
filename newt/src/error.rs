use newt_msg::to_bytes::MessageToBytesError;
use newt_msg::{Code, MessageParseError};

/// The context that an error occurred in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum When {
  /// Opening a socket / connecting to a peer
  Opening,
  /// Driving a DTLS handshake
  Handshaking,
  /// Building a request from user input
  Building,
  /// Sending a message
  Sending,
  /// Polling for an inbound message
  Polling,
  /// Running an Observe relation
  Observing,
  /// Routing an inbound request to an endpoint
  Routing,
  /// Talking to the suspend/resume store
  Persisting,
  /// No context recorded
  None,
}

impl When {
  /// Construct a specific error from the context the error occurred in
  pub fn what<E>(self, what: What<E>) -> Error<E> {
    Error { when: self, what }
  }
}

/// An error encounterable from within the engine.
///
/// Generic over the socket's error type, like everything else that
/// touches the transport.
#[derive(Debug)]
pub struct Error<E> {
  /// What happened?
  pub what: What<E>,
  /// What were we doing when it happened?
  pub when: When,
}

impl<E> Error<E> {
  /// Did we time out waiting for a packet?
  pub fn is_timeout(&self) -> bool {
    matches!(self.what, What::NoPacket)
  }

  /// The 4.xx/5.xx code, if this is an error response from the peer.
  pub fn response_code(&self) -> Option<Code> {
    match self.what {
      | What::Response(code) => Some(code),
      | _ => None,
    }
  }
}

/// A contextless error with some additional debug data attached.
#[derive(Debug)]
pub enum What<E> {
  /// Configuration was rejected before any I/O happened
  Param(&'static str),
  /// A fixed-capacity table (relations, peers) is full
  CapacityExhausted(&'static str),
  /// Some socket operation (e.g. binding, sending) failed
  Sock(E),
  /// A target URI could not be understood
  UriInvalid(&'static str),
  /// A hostname did not resolve to any address
  HostUnresolved,
  /// Parsing a message from bytes failed
  FromBytes(MessageParseError),
  /// Serializing a message to bytes failed
  ToBytes(MessageToBytesError),
  /// We waited as long as we were allowed to and nothing arrived
  NoPacket,
  /// The peer sent RST for our exchange
  PeerReset,
  /// The peer closed the secure session
  PeerClosed,
  /// The peer answered with a 4.xx or 5.xx code
  Response(Code),
  /// There is already a request in flight on this engine
  InProgress,
  /// The DTLS handshake's retry budget ran out
  HandshakeTimedOut,
  /// The DTLS record layer reported a fatal error
  #[cfg(feature = "secure")]
  Dtls(openssl::ssl::Error),
  /// Key/certificate material was rejected
  #[cfg(feature = "secure")]
  Crypto(openssl::error::ErrorStack),
  /// The suspend/resume store failed
  Store(crate::store::StoreError),
  /// The clock failed to provide timing
  ClockError,
}

/// Helper methods on client call Results
pub trait ResultExt<T, E> {
  /// If we timed out waiting for a response, consider that `Ok(None)`.
  ///
  /// Usually used to handle sending non-confirmable requests that
  /// the server may have received but not responded to.
  fn timeout_ok(self) -> Result<Option<T>, Error<E>>;
}

impl<T, E> ResultExt<T, E> for Result<T, Error<E>> {
  fn timeout_ok(self) -> Result<Option<T>, Error<E>> {
    match self {
      | Ok(t) => Ok(Some(t)),
      | Err(Error { what: What::NoPacket, .. }) => Ok(None),
      | Err(e) => Err(e),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn timeout_ok() {
    let timed_out: Result<(), Error<()>> = Err(When::Polling.what(What::NoPacket));
    assert!(matches!(timed_out.timeout_ok(), Ok(None)));

    let reset: Result<(), Error<()>> = Err(When::Polling.what(What::PeerReset));
    assert!(reset.timeout_ok().is_err());

    let fine: Result<(), Error<()>> = Ok(());
    assert!(matches!(fine.timeout_ok(), Ok(Some(()))));
  }

  #[test]
  fn response_code() {
    let e: Error<()> = When::Polling.what(What::Response(Code::new(4, 4)));
    assert_eq!(e.response_code(), Some(Code::new(4, 4)));
    assert!(!e.is_timeout());
  }
}
