//! DTLS record layer glue over `openssl`.
//!
//! A [`UdpStream`] narrows a shared datagram socket down to one peer
//! conversation and wears an `io::Read + io::Write` costume so an
//! [`SslStream`] can drive DTLS records over it. Handshakes are
//! re-invoked on `WANT_READ`/`WANT_WRITE`, paced by a
//! [`HandshakeTimer`] and bounded by the configured retry budget
//! (each spent attempt throws the half-built session away and starts
//! over).
//!
//! Servers run the stateless cookie exchange
//! (`SslOptions::COOKIE_EXCHANGE`) so a half-open handshake costs no
//! per-peer state until the cookie round-trip succeeds.

use std::io;
use std::sync::Arc;

use no_std_net::SocketAddr;
use openssl::error::ErrorStack;
use openssl::pkey::PKey;
use openssl::ssl::{ErrorCode,
                   Ssl,
                   SslContext,
                   SslContextBuilder,
                   SslMethod,
                   SslOptions,
                   SslSession,
                   SslStream,
                   SslVerifyMode};
use openssl::x509::X509;
use rand::RngCore;

use crate::error::{Error, What, When};
use crate::net::{Addrd, Socket};
use crate::retry::{Attempts, ExpiryStatus, HandshakeTimer};
use crate::session::Role;
use crate::time::{Clock, Millis};

/// A pre-shared key and the identity it belongs to.
#[derive(Clone)]
pub struct Psk {
  /// Identity hint presented to the peer
  pub identity: Vec<u8>,
  /// The key itself
  pub key: Vec<u8>,
}

impl core::fmt::Debug for Psk {
  fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
    f.debug_struct("Psk")
     .field("identity", &String::from_utf8_lossy(&self.identity))
     .field("key", &"<redacted>")
     .finish()
  }
}

/// Certificate / key material, all PEM-encoded, loaded by the
/// surrounding system's material loader.
#[derive(Clone, Default)]
pub struct Material {
  /// Trust anchor for verifying the peer
  pub ca_pem: Option<Vec<u8>>,
  /// Our own certificate
  pub cert_pem: Option<Vec<u8>>,
  /// The private key for `cert_pem`
  pub key_pem: Option<Vec<u8>>,
  /// Pre-shared key mode instead of (or alongside) certificates
  pub psk: Option<Psk>,
}

impl core::fmt::Debug for Material {
  fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
    f.debug_struct("Material")
     .field("ca", &self.ca_pem.is_some())
     .field("cert", &self.cert_pem.is_some())
     .field("key", &self.key_pem.is_some())
     .field("psk", &self.psk.is_some())
     .finish()
  }
}

/// How strictly the peer must prove who it is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMode {
  /// Handshake fails unless the peer presents a verifiable identity
  Required,
  /// Verify the peer if it presents something, proceed either way
  Optional,
  /// Don't ask
  None,
}

/// Everything the engine needs to run DTLS on a session.
#[derive(Debug, Clone)]
pub struct SecurityConfig {
  /// See [`Material`]
  pub material: Material,
  /// See [`AuthMode`]
  pub auth_mode: AuthMode,
  /// Cap the DTLS record/fragment size (sets the link MTU openssl
  /// assumes); `None` leaves openssl's default
  pub max_fragment_len: Option<u16>,
  /// Initial handshake retransmission timeout
  pub handshake_timeout_min: Millis,
  /// Final handshake deadline; one attempt may not outlive this
  pub handshake_timeout_max: Millis,
  /// Full-handshake attempts before giving up with
  /// [`What::HandshakeTimedOut`]
  pub max_handshake_retransmit: Attempts,
}

impl SecurityConfig {
  /// Pre-shared-key mode with default handshake timing.
  ///
  /// PSK suites carry no certificates, so peer verification is
  /// implied by knowing the key and `auth_mode` is `None`.
  pub fn psk(identity: impl Into<Vec<u8>>, key: impl Into<Vec<u8>>) -> Self {
    Self { material: Material { psk: Some(Psk { identity: identity.into(),
                                                key: key.into() }),
                                ..Material::default() },
           auth_mode: AuthMode::None,
           ..Self::certificate(Material::default()) }
  }

  /// Certificate mode with default handshake timing.
  pub fn certificate(material: Material) -> Self {
    Self { material,
           auth_mode: AuthMode::Required,
           max_fragment_len: None,
           handshake_timeout_min: embedded_time::duration::Milliseconds(1_000),
           handshake_timeout_max: embedded_time::duration::Milliseconds(60_000),
           max_handshake_retransmit: Attempts(4) }
  }
}

/// One peer conversation over a shared datagram socket, shaped like
/// a byte stream so the DTLS record layer can read and write it.
///
/// Datagrams from anyone other than `peer` surface as
/// [`io::ErrorKind::WouldBlock`] ("nothing for you yet"), which the
/// record layer reports as `WANT_READ`.
pub(crate) struct UdpStream<S: Socket> {
  sock: Arc<S>,
  peer: SocketAddr,
}

impl<S: Socket> UdpStream<S> {
  pub(crate) fn new(sock: Arc<S>, peer: SocketAddr) -> Self {
    Self { sock, peer }
  }
}

fn debug_to_io<E: core::fmt::Debug>(e: E) -> io::Error {
  io::Error::new(io::ErrorKind::Other, format!("{:?}", e))
}

fn nb_to_io<E: core::fmt::Debug>(e: nb::Error<E>) -> io::Error {
  match e {
    | nb::Error::WouldBlock => io::ErrorKind::WouldBlock.into(),
    | nb::Error::Other(e) => debug_to_io(e),
  }
}

impl<S: Socket> io::Read for UdpStream<S> {
  fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
    match self.sock.peek_addr() {
      | Ok(addr) if addr == self.peer => {
        self.sock
            .recv(buf)
            .map(|Addrd(n, _)| n)
            .map_err(nb_to_io)
      },
      | Ok(_) => Err(io::ErrorKind::WouldBlock.into()),
      | Err(e) => Err(nb_to_io(e)),
    }
  }
}

impl<S: Socket> io::Write for UdpStream<S> {
  fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
    self.sock
        .send(Addrd(buf, self.peer))
        .map(|()| buf.len())
        .map_err(nb_to_io)
  }

  fn flush(&mut self) -> io::Result<()> {
    Ok(())
  }
}

fn apply_material(b: &mut SslContextBuilder, cfg: &SecurityConfig) -> Result<(), ErrorStack> {
  if let Some(ca) = &cfg.material.ca_pem {
    let ca = X509::from_pem(ca)?;
    b.cert_store_mut().add_cert(ca)?;
  }

  if let Some(cert) = &cfg.material.cert_pem {
    let cert = X509::from_pem(cert)?;
    b.set_certificate(&cert)?;
  }

  if let Some(key) = &cfg.material.key_pem {
    let key = PKey::private_key_from_pem(key)?;
    b.set_private_key(&key)?;
    b.check_private_key()?;
  }

  Ok(())
}

fn verify_mode(auth: AuthMode, role: Role) -> SslVerifyMode {
  match (auth, role) {
    | (AuthMode::None, _) => SslVerifyMode::NONE,
    | (AuthMode::Optional, _) | (AuthMode::Required, Role::Client) => SslVerifyMode::PEER,
    | (AuthMode::Required, Role::Server) => {
      SslVerifyMode::PEER | SslVerifyMode::FAIL_IF_NO_PEER_CERT
    },
  }
}

pub(crate) fn client_ctx(cfg: &SecurityConfig) -> Result<SslContext, ErrorStack> {
  let mut b = SslContext::builder(SslMethod::dtls())?;
  apply_material(&mut b, cfg)?;
  b.set_verify(verify_mode(cfg.auth_mode, Role::Client));
  b.set_options(SslOptions::NO_QUERY_MTU);

  if let Some(psk) = cfg.material.psk.clone() {
    b.set_psk_client_callback(move |_, _, identity, key| {
       if psk.identity.len() + 1 > identity.len() || psk.key.len() > key.len() {
         return Ok(0);
       }
       identity[..psk.identity.len()].copy_from_slice(&psk.identity);
       identity[psk.identity.len()] = 0;
       key[..psk.key.len()].copy_from_slice(&psk.key);
       Ok(psk.key.len())
     });
  }

  Ok(b.build())
}

pub(crate) fn server_ctx(cfg: &SecurityConfig) -> Result<SslContext, ErrorStack> {
  let mut b = SslContext::builder(SslMethod::dtls())?;
  apply_material(&mut b, cfg)?;
  b.set_verify(verify_mode(cfg.auth_mode, Role::Server));
  b.set_options(SslOptions::NO_QUERY_MTU | SslOptions::COOKIE_EXCHANGE);

  // HelloVerifyRequest cookie derived from a per-server secret, so
  // verification needs no per-peer state
  let mut secret = [0u8; 16];
  rand::thread_rng().fill_bytes(&mut secret);
  let gen_secret = secret;

  b.set_cookie_generate_cb(move |_, buf| {
     let n = gen_secret.len().min(buf.len());
     buf[..n].copy_from_slice(&gen_secret[..n]);
     Ok(n)
   });
  b.set_cookie_verify_cb(move |_, cookie| cookie == &secret[..]);

  if let Some(psk) = cfg.material.psk.clone() {
    b.set_psk_server_callback(move |_, identity, key| {
       let presented = identity.unwrap_or(&[]);
       if presented != psk.identity.as_slice() {
         log::warn!("rejecting unknown psk identity");
         return Ok(0);
       }
       if psk.key.len() > key.len() {
         return Ok(0);
       }
       key[..psk.key.len()].copy_from_slice(&psk.key);
       Ok(psk.key.len())
     });
  }

  Ok(b.build())
}

/// Drive a full DTLS handshake on a fresh session, retrying whole
/// attempts per `cfg.max_handshake_retransmit`.
pub(crate) fn handshake<S, C>(sock: Arc<S>,
                              peer: SocketAddr,
                              ctx: &SslContext,
                              role: Role,
                              cfg: &SecurityConfig,
                              clock: &C,
                              resume: Option<&SslSession>)
                              -> Result<SslStream<UdpStream<S>>, Error<S::Error>>
  where S: Socket,
        C: Clock
{
  let when = When::Handshaking;
  let crypto = |e: ErrorStack| when.what(What::Crypto(e));

  let mut attempts = Attempts(0);
  loop {
    let mut ssl = Ssl::new(ctx).map_err(crypto)?;

    match role {
      | Role::Client => ssl.set_connect_state(),
      | Role::Server => ssl.set_accept_state(),
    }

    if let Some(sess) = resume {
      // SAFETY: the session handle stays alive for the duration of
      // this call and openssl takes its own reference to it.
      #[allow(unsafe_code)]
      unsafe { ssl.set_session(sess) }.map_err(crypto)?;
    }

    if let Some(mtu) = cfg.max_fragment_len {
      ssl.set_mtu(mtu as u32).map_err(crypto)?;
    }

    let mut stream =
      SslStream::new(ssl, UdpStream::new(sock.clone(), peer)).map_err(crypto)?;

    let start = clock.try_now().map_err(|_| when.what(What::ClockError))?;
    let mut timer =
      HandshakeTimer::new(start, cfg.handshake_timeout_min, cfg.handshake_timeout_max);

    loop {
      match stream.do_handshake() {
        | Ok(()) => return Ok(stream),
        | Err(e) if e.code() == ErrorCode::WANT_READ || e.code() == ErrorCode::WANT_WRITE => {
          let now = clock.try_now().map_err(|_| when.what(What::ClockError))?;
          match timer.status(now) {
            | ExpiryStatus::NoExpiry => std::thread::sleep(std::time::Duration::from_millis(2)),
            | ExpiryStatus::IntExpiry => timer.bump(),
            | ExpiryStatus::FinExpiry | ExpiryStatus::Cancelled => break,
          }
        },
        // fatal for this attempt (bad record, failed verification,
        // a cookie re-challenge); the outer budget decides whether
        // we start over
        | Err(e) => {
          log::warn!("handshake attempt died: {:?}", e);
          break;
        },
      }
    }

    attempts.0 += 1;
    if attempts >= cfg.max_handshake_retransmit {
      return Err(when.what(What::HandshakeTimedOut));
    }

    log::debug!("resetting dtls session for handshake attempt {}", attempts.0 + 1);
  }
}

/// The negotiated session state, DER-encoded, for stashing in the
/// persistence store.
pub(crate) fn session_to_der<S: Socket>(stream: &SslStream<UdpStream<S>>) -> Option<Vec<u8>> {
  stream.ssl().session().and_then(|s| s.to_der().ok())
}

pub(crate) fn session_from_der(der: &[u8]) -> Result<SslSession, ErrorStack> {
  SslSession::from_der(der)
}
