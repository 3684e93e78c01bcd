//! One peer conversation: a socket, the peer's address, and (for
//! `coaps`) the DTLS state riding on top.

use std::sync::Arc;

use no_std_net::SocketAddr;

use crate::error::{Error, What, When};
use crate::net::{Addrd, Socket};
use crate::time::{millis_between, Clock, Timeout};

#[cfg(feature = "secure")]
use crate::secure::{self, SecurityConfig, UdpStream};
#[cfg(feature = "secure")]
use crate::store::Store;
#[cfg(feature = "secure")]
use openssl::ssl::{ErrorCode, SslContext, SslSession, SslStream};

/// Which half of the DTLS handshake we drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
  /// We initiate
  Client,
  /// We answer (and run the cookie exchange)
  Server,
}

/// What a bounded [`Session::recv`] produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recv {
  /// A datagram of this many bytes landed in the buffer
  Data(usize),
  /// The timeout passed without anything arriving
  NoData,
  /// The peer closed the secure session (close-notify)
  PeerClosed,
  /// The conversation was reset under us (e.g. ICMP unreachable)
  Reset,
}

/// A transport session with a single peer.
///
/// Plain sessions talk straight to the datagram socket; secure ones
/// delegate to the DTLS record layer once
/// [`negotiate`](Session::negotiate) has run.
#[allow(missing_debug_implementations)]
pub struct Session<S: Socket> {
  sock: Arc<S>,
  peer: SocketAddr,
  #[cfg(feature = "secure")]
  link: Option<SslStream<UdpStream<S>>>,
  #[cfg(feature = "secure")]
  restored: Option<SslSession>,
}

impl<S: Socket> Session<S> {
  /// Bind a fresh local socket (ephemeral port unless `local_port`
  /// is given) for a conversation with `peer`.
  pub fn open(local_port: Option<u16>, peer: SocketAddr) -> Result<Self, Error<S::Error>> {
    let local = SocketAddr::new(no_std_net::IpAddr::V4(no_std_net::Ipv4Addr::new(0, 0, 0, 0)),
                                local_port.unwrap_or(0));

    S::bind(local).map(|sock| Self::from_shared(Arc::new(sock), peer))
                  .map_err(|e| When::Opening.what(What::Sock(e)))
  }

  /// Wrap an existing (possibly shared) socket; how the server
  /// builds a session per admitted peer off its listening socket.
  pub fn from_shared(sock: Arc<S>, peer: SocketAddr) -> Self {
    Self { sock,
           peer,
           #[cfg(feature = "secure")]
           link: None,
           #[cfg(feature = "secure")]
           restored: None }
  }

  /// The remote end of this conversation
  pub fn peer(&self) -> SocketAddr {
    self.peer
  }

  /// The local end of this conversation
  pub fn local_addr(&self) -> SocketAddr {
    self.sock.local_addr()
  }

  /// Has a DTLS session been negotiated (or staged for resumption)?
  pub fn is_secure(&self) -> bool {
    #[cfg(feature = "secure")]
    {
      self.link.is_some()
    }
    #[cfg(not(feature = "secure"))]
    {
      false
    }
  }

  /// Run the DTLS handshake for this conversation, building a
  /// one-off context from `cfg`.
  ///
  /// If [`Session::restore`] staged a previous session, this is an
  /// abbreviated resumption handshake rather than a full one.
  #[cfg(feature = "secure")]
  pub fn negotiate<C: Clock>(&mut self,
                             role: Role,
                             cfg: &SecurityConfig,
                             clock: &C)
                             -> Result<(), Error<S::Error>> {
    let ctx = match role {
      | Role::Client => secure::client_ctx(cfg),
      | Role::Server => secure::server_ctx(cfg),
    }.map_err(|e| When::Handshaking.what(What::Crypto(e)))?;

    self.negotiate_with(&ctx, role, cfg, clock)
  }

  /// Like [`Session::negotiate`] with a caller-owned context
  /// (the server reuses one context, and one cookie secret, for
  /// every peer).
  #[cfg(feature = "secure")]
  pub(crate) fn negotiate_with<C: Clock>(&mut self,
                                         ctx: &SslContext,
                                         role: Role,
                                         cfg: &SecurityConfig,
                                         clock: &C)
                                         -> Result<(), Error<S::Error>> {
    let stream = secure::handshake(self.sock.clone(),
                                   self.peer,
                                   ctx,
                                   role,
                                   cfg,
                                   clock,
                                   self.restored.as_ref())?;
    self.link = Some(stream);
    Ok(())
  }

  /// Send one datagram (or DTLS record) to the peer.
  pub fn send(&mut self, bytes: &[u8]) -> Result<(), Error<S::Error>> {
    #[cfg(feature = "secure")]
    if let Some(link) = &mut self.link {
      use std::io::Write;

      return loop {
        match link.write(bytes) {
          | Ok(_) => break Ok(()),
          | Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
            std::thread::sleep(std::time::Duration::from_millis(1));
          },
          | Err(_) => break Err(When::Sending.what(What::PeerClosed)),
        }
      };
    }

    nb::block!(self.sock.send(Addrd(bytes, self.peer)))
      .map_err(|e| When::Sending.what(What::Sock(e)))
  }

  /// Try to pull one inbound datagram without waiting.
  ///
  /// `Ok(None)` means nothing is there (or the head of the queue
  /// belongs to someone else's conversation).
  pub(crate) fn try_recv(&mut self, buf: &mut [u8]) -> Result<Option<Recv>, Error<S::Error>> {
    #[cfg(feature = "secure")]
    if let Some(link) = &mut self.link {
      return match link.ssl_read(buf) {
        | Ok(0) => Ok(Some(Recv::PeerClosed)),
        | Ok(n) => Ok(Some(Recv::Data(n))),
        | Err(e) if e.code() == ErrorCode::ZERO_RETURN => Ok(Some(Recv::PeerClosed)),
        | Err(e) if e.code() == ErrorCode::WANT_READ || e.code() == ErrorCode::WANT_WRITE => {
          Ok(None)
        },
        | Err(e) => {
          match e.io_error() {
            | Some(io) if io.kind() == std::io::ErrorKind::ConnectionReset => {
              Ok(Some(Recv::Reset))
            },
            | _ => Err(When::Polling.what(What::Dtls(e))),
          }
        },
      };
    }

    match self.sock.recv(buf) {
      | Ok(Addrd(n, addr)) if addr == self.peer => Ok(Some(Recv::Data(n))),
      // someone else's datagram; this conversation saw nothing
      | Ok(_) => Ok(None),
      | Err(nb::Error::WouldBlock) => Ok(None),
      | Err(nb::Error::Other(e)) if S::is_reset(&e) => Ok(Some(Recv::Reset)),
      | Err(nb::Error::Other(e)) => Err(When::Polling.what(What::Sock(e))),
    }
  }

  /// Wait up to `timeout` for one inbound datagram.
  pub fn recv<C: Clock>(&mut self,
                        clock: &C,
                        timeout: Timeout,
                        buf: &mut [u8])
                        -> Result<Recv, Error<S::Error>> {
    let start = clock.try_now()
                     .map_err(|_| When::Polling.what(What::ClockError))?;

    loop {
      if let Some(recvd) = self.try_recv(buf)? {
        return Ok(recvd);
      }

      let now = clock.try_now()
                     .map_err(|_| When::Polling.what(What::ClockError))?;
      if timeout.expired(millis_between(start, now)) {
        return Ok(Recv::NoData);
      }

      std::thread::sleep(std::time::Duration::from_millis(1));
    }
  }

  /// Stash the negotiated DTLS session in the store so suspend/
  /// resume skips the full handshake. Best-effort: failures are
  /// logged and swallowed.
  #[cfg(feature = "secure")]
  pub fn save(&self, store: &dyn Store, key: &str) {
    let der = match self.link.as_ref().and_then(secure::session_to_der) {
      | Some(der) => der,
      | None => return,
    };

    if let Err(e) = store.put(key, &der) {
      log::warn!("failed to persist dtls session: {}", e);
    }
  }

  /// Stage a previously [`save`](Session::save)d DTLS session for
  /// the next [`negotiate`](Session::negotiate). A missing or
  /// corrupt blob degrades to a full handshake.
  #[cfg(feature = "secure")]
  pub fn restore(&mut self, store: &dyn Store, key: &str) {
    let der = match store.get(key) {
      | Ok(Some(der)) => der,
      | Ok(None) => return,
      | Err(e) => {
        log::warn!("failed to read persisted dtls session: {}", e);
        return;
      },
    };

    match secure::session_from_der(&der) {
      | Ok(sess) => self.restored = Some(sess),
      | Err(e) => log::warn!("persisted dtls session did not parse: {:?}", e),
    }
  }

  /// Forget any persisted DTLS session under `key`.
  #[cfg(feature = "secure")]
  pub fn clear(store: &dyn Store, key: &str) {
    if let Err(e) = store.remove(key) {
      log::warn!("failed to clear persisted dtls session: {}", e);
    }
  }

  /// Tell the peer we're going away (DTLS close-notify). No-op on
  /// plain sessions.
  #[cfg(feature = "secure")]
  pub fn close_notify(&mut self) {
    if let Some(link) = &mut self.link {
      let _ = link.shutdown();
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::test::{ClockMock, SockMock};

  fn addr(s: &str) -> SocketAddr {
    s.parse().unwrap()
  }

  #[test]
  fn recv_filters_foreign_datagrams() {
    let sock = SockMock::new();
    let peer = addr("10.0.0.1:5683");
    let stranger = addr("10.0.0.9:5683");

    sock.push_rx(Addrd(vec![0xAA], stranger));
    sock.push_rx(Addrd(vec![0xBB, 0xCC], peer));

    let clock = ClockMock::new();
    let mut session = Session::from_shared(Arc::new(sock), peer);
    let mut buf = [0u8; 16];

    // the stranger's datagram is consumed and discarded, ours lands
    assert_eq!(session.try_recv(&mut buf).unwrap(), None);
    assert_eq!(session.recv(&clock, Timeout::Millis(50), &mut buf).unwrap(),
               Recv::Data(2));
    assert_eq!(&buf[..2], &[0xBB, 0xCC]);
  }

  #[test]
  fn recv_times_out_with_no_data() {
    let sock = SockMock::new();
    let peer = addr("10.0.0.1:5683");
    let clock = crate::time::SystemClock::new();
    let mut session = Session::from_shared(Arc::new(sock), peer);
    let mut buf = [0u8; 16];

    assert_eq!(session.recv(&clock, Timeout::Millis(5), &mut buf).unwrap(),
               Recv::NoData);
  }

  #[test]
  fn send_lands_on_the_peer_addr() {
    let sock = SockMock::new();
    let tx = sock.tx.clone();
    let peer = addr("10.0.0.1:5683");
    let mut session = Session::from_shared(Arc::new(sock), peer);

    session.send(&[1, 2, 3]).unwrap();

    let sent = tx.lock().unwrap();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0], Addrd(vec![1, 2, 3], peer));
  }
}
