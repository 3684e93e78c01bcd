//! The server half of the engine: a single-threaded cooperative
//! loop over a bounded peer table, decoding requests off each peer's
//! reassembly buffer and dispatching them through an ordered
//! endpoint scan.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use newt_msg::opt::known;
use newt_msg::{Block, CodeKind, ContentFormat, Id, Message, MessageParseError, OptParseError, TryFromBytes, Type};

use crate::config::ServerConfig;
use crate::error::{Error, What, When};
use crate::logging;
use crate::net::{Addrd, Socket};
use crate::req::Req;
use crate::resp::{code, Resp};
use crate::session::Recv;
use crate::time::{Clock, SystemClock};

/// Route table entries
pub mod endpoint;

#[doc(inline)]
pub use endpoint::{Endpoint, Handler};

mod peer;

use peer::{Peer, PeerTable};

#[cfg(feature = "secure")]
use crate::secure::{self, SecurityConfig};
#[cfg(feature = "secure")]
use crate::session::Role;
#[cfg(feature = "secure")]
use openssl::ssl::SslContext;

/// A multi-peer CoAP server.
///
/// ```no_run
/// use newt::config::ServerConfig;
/// use newt::req::Method;
/// use newt::resp::code;
/// use newt::server::{Endpoint, Server};
///
/// let mut server = Server::try_new(ServerConfig::default(), 5683).unwrap();
/// server.endpoint(Endpoint::new(Method::GET, "/sensor/temp", |_req| {
///                   (code::CONTENT, b"23".to_vec())
///                 }));
/// server.run().unwrap();
/// ```
#[allow(missing_debug_implementations)]
pub struct Server<S: Socket, C: Clock> {
  cfg: ServerConfig,
  sock: Arc<S>,
  clock: C,
  endpoints: Vec<Endpoint>,
  peers: PeerTable<S>,
  next_id: Id,
  stop: Arc<AtomicBool>,
  #[cfg(feature = "secure")]
  secure: Option<(SslContext, SecurityConfig)>,
}

impl Server<std::net::UdpSocket, SystemClock> {
  /// Bind a plain UDP server on `0.0.0.0:port`.
  pub fn try_new(cfg: ServerConfig, port: u16) -> Result<Self, Error<std::io::Error>> {
    let addr = no_std_net::SocketAddr::new(no_std_net::IpAddr::V4(no_std_net::Ipv4Addr::new(0, 0, 0, 0)),
                                           port);

    <std::net::UdpSocket as Socket>::bind(addr).map_err(|e| When::Opening.what(What::Sock(e)))
                                               .and_then(|sock| {
                                                 Self::new(cfg, sock, SystemClock::new())
                                               })
  }
}

impl<S: Socket, C: Clock> Server<S, C> {
  /// Create a server over an already-bound socket.
  pub fn new(cfg: ServerConfig, sock: S, clock: C) -> Result<Self, Error<S::Error>> {
    #[cfg(feature = "secure")]
    let secure = match &cfg.security {
      | Some(sec) => {
        let ctx = secure::server_ctx(sec).map_err(|e| When::Opening.what(What::Crypto(e)))?;
        Some((ctx, sec.clone()))
      },
      | None => None,
    };

    let peers = PeerTable::new(cfg.max_peers);

    Ok(Self { cfg,
              sock: Arc::new(sock),
              clock,
              endpoints: Vec::new(),
              peers,
              next_id: Id(1),
              stop: Arc::new(AtomicBool::new(false)),
              #[cfg(feature = "secure")]
              secure })
  }

  /// Register an endpoint. Endpoints are scanned in registration
  /// order.
  pub fn endpoint(&mut self, endpoint: Endpoint) {
    self.endpoints.push(endpoint);
  }

  /// A flag that makes [`Server::run`] wind down at its next
  /// iteration when set from another task.
  pub fn stop_handle(&self) -> Arc<AtomicBool> {
    self.stop.clone()
  }

  /// The cooperative serve loop: admit, read, decode, route,
  /// respond, account idleness, evict. Returns once the
  /// [`stop_handle`](Server::stop_handle) flag is raised.
  pub fn run(&mut self) -> Result<(), Error<S::Error>> {
    log::info!("listening on {}", self.sock.local_addr());

    while !self.stop.load(Ordering::SeqCst) {
      let worked = self.iteration();
      self.sweep_idle();

      if !worked {
        std::thread::sleep(std::time::Duration::from_millis(self.cfg.poll_interval.0));
      }
    }

    log::info!("stop requested, releasing {} peer(s)", self.peers.len());
    let occupied: Vec<usize> = self.peers.occupied().map(|(ix, _)| ix).collect();
    for ix in occupied {
      self.drop_peer(ix);
    }

    Ok(())
  }

  /// One pass: look (without consuming) at who's knocking, admit or
  /// dispatch, and service that peer. `false` means there was
  /// nothing to do.
  pub(crate) fn iteration(&mut self) -> bool {
    let addr = match self.sock.peek_addr() {
      | Ok(addr) => addr,
      | Err(nb::Error::WouldBlock) => return false,
      | Err(nb::Error::Other(e)) => {
        log::error!("listening socket: {:?}", e);
        return false;
      },
    };

    let ix = match self.peers.find(addr) {
      | Some(ix) => ix,
      | None => match self.admit(addr) {
        | Some(ix) => ix,
        | None => return true,
      },
    };

    self.service(ix);
    true
  }

  /// First contact from a new address: claim a slot (or turn the
  /// datagram away), and for secure servers run the cookie-validated
  /// handshake before the peer costs anything else.
  fn admit(&mut self, addr: no_std_net::SocketAddr) -> Option<usize> {
    if !self.peers.has_vacancy() {
      // drain the datagram so the queue keeps moving
      let mut scratch = [0u8; 1152];
      let _ = self.sock.recv(&mut scratch);
      log::warn!("peer table full, rejecting {}", addr);
      return None;
    }

    #[allow(unused_mut)]
    let mut peer = Peer::new(self.sock.clone(), addr);

    #[cfg(feature = "secure")]
    if let Some((ctx, sec)) = &self.secure {
      // a cookie re-challenge kills the first attempt; the
      // handshake's own retry budget covers starting over
      if let Err(e) = peer.session.negotiate_with(ctx, Role::Server, sec, &self.clock) {
        log::warn!("dtls admission failed for {}: {:?}", addr, e.what);
        return None;
      }
    }

    match self.peers.insert(peer) {
      | Ok(ix) => {
        log::info!("admitted peer {}", addr);
        Some(ix)
      },
      | Err(_) => None,
    }
  }

  fn service(&mut self, ix: usize) {
    enum Outcome {
      Nothing,
      Drop,
      Msg(Message),
    }

    let mut scratch = [0u8; 1152];
    let outcome = {
      let peer = match self.peers.get_mut(ix) {
        | Some(peer) => peer,
        | None => return,
      };

      match peer.session.try_recv(&mut scratch) {
        | Ok(None) | Ok(Some(Recv::NoData)) => Outcome::Nothing,
        | Ok(Some(Recv::Data(n))) => {
          peer.idle_ms = 0;
          peer.buf.extend_from_slice(&scratch[..n]);

          match Message::try_from_bytes(&peer.buf[peer.consumed..]) {
            | Ok(msg) => {
              peer.buf.clear();
              peer.consumed = 0;
              Outcome::Msg(msg)
            },
            | Err(e) if needs_more_data(&e) => {
              log::trace!("partial message from {}, waiting for the rest", peer.addr());
              Outcome::Nothing
            },
            // a truly bad datagram never crashes the loop; the peer
            // is dropped and everyone else keeps being served
            | Err(e) => {
              log::warn!("undecodable data from {}: {:?}", peer.addr(), e);
              Outcome::Drop
            },
          }
        },
        | Ok(Some(Recv::PeerClosed)) | Ok(Some(Recv::Reset)) => Outcome::Drop,
        | Err(e) => {
          log::warn!("transport error servicing peer: {:?}", e.what);
          Outcome::Drop
        },
      }
    };

    match outcome {
      | Outcome::Nothing => {},
      | Outcome::Drop => self.drop_peer(ix),
      | Outcome::Msg(msg) => self.handle_msg(ix, msg),
    }
  }

  fn handle_msg(&mut self, ix: usize, msg: Message) {
    log::trace!("recvd {}", logging::msg_summary(&msg));

    match (msg.ty, msg.code.kind()) {
      // CoAP ping: an empty CON answered by RST
      | (Type::Con, CodeKind::Empty) => {
        let rst = msg.reset();
        self.send_to_peer(ix, &rst);
      },
      | (_, CodeKind::Request) => {
        let addr = match self.peers.get_mut(ix) {
          | Some(peer) => peer.addr(),
          | None => return,
        };
        self.respond(ix, Addrd(Req::from(msg), addr));
      },
      // ACKs for our separate responses, stray RSTs
      | _ => {},
    }
  }

  fn respond(&mut self, ix: usize, req: Addrd<Req>) {
    let (status, payload, content_format, separate) = route(&mut self.endpoints, &req);

    let mut resp = if separate && req.data().msg_type() == Type::Con {
      // "I heard you" right away; the substantive response becomes
      // its own confirmable exchange
      let ack = req.data().msg().ack();
      self.send_to_peer(ix, &ack);

      let id = self.next_msg_id();
      Resp::separate_for_request(req.data(), id)
    } else {
      match Resp::for_request(req.data()) {
        | Some(resp) => resp,
        | None => return,
      }
    };

    if resp.msg_type() == Type::Non {
      let id = self.next_msg_id();
      resp.set_msg_id(id);
    }

    resp.set_code(status);
    if let Some(format) = content_format {
      resp.set_content_format(format);
    }

    // Block2 is recomputed per request from the full payload; no
    // per-block state survives between requests
    let requested = req.data().block2();
    let szx = requested.map(|b| b.szx.min(self.cfg.block_szx))
                       .unwrap_or(self.cfg.block_szx);
    let size = 1usize << (szx as usize + 4);
    let num = requested.map(|b| b.num as usize).unwrap_or(0);

    if payload.len() > size || num > 0 {
      let offset = num * size;
      let chunk = payload.get(offset..).unwrap_or(&[]);
      let chunk = &chunk[..chunk.len().min(size)];
      let more = offset + size < payload.len();

      resp.0
          .set(known::BLOCK2, Block::new(num as u32, more, szx).into());
      resp.set_payload(chunk.to_vec());
    } else {
      resp.set_payload(payload);
    }

    let msg = Message::from(resp);
    log::trace!("sending {}", logging::msg_summary(&msg));
    self.send_to_peer(ix, &msg);
  }

  fn send_to_peer(&mut self, ix: usize, msg: &Message) {
    let mut buf = [0u8; 1152];
    let n = match msg.encode(&mut buf) {
      | Ok(n) => n,
      | Err(e) => {
        log::error!("response did not fit a datagram: {:?}", e);
        return;
      },
    };

    let failed = match self.peers.get_mut(ix) {
      | Some(peer) => peer.session.send(&buf[..n]).is_err(),
      | None => return,
    };

    if failed {
      log::warn!("send failed, dropping peer");
      self.drop_peer(ix);
    }
  }

  fn drop_peer(&mut self, ix: usize) {
    #[allow(unused_mut)]
    if let Some(mut peer) = self.peers.remove(ix) {
      #[cfg(feature = "secure")]
      peer.session.close_notify();
      log::info!("dropped peer {}", peer.addr());
    }
  }

  /// Idle accounting: every iteration costs each peer one poll
  /// interval; peers quiet past the activity timeout are evicted
  /// (secure ones get a close-notify on the way out, inside
  /// [`Server::drop_peer`]).
  fn sweep_idle(&mut self) {
    let step = self.cfg.poll_interval.0;
    let timeout = self.cfg.max_peer_activity_timeout.0;

    let evict: Vec<usize> = self.peers
                                .occupied()
                                .filter_map(|(ix, peer)| {
                                  peer.idle_ms += step;
                                  (peer.idle_ms > timeout).then_some(ix)
                                })
                                .collect();

    for ix in evict {
      log::info!("evicting idle peer");
      self.drop_peer(ix);
    }
  }

  fn next_msg_id(&mut self) -> Id {
    let id = self.next_id;
    self.next_id = self.next_id.next();
    id
  }

  #[cfg(test)]
  pub(crate) fn peer_count(&self) -> usize {
    self.peers.len()
  }
}

/// Scan the endpoint table in order for an exact path match carrying
/// the request's method.
///
/// A path match with the wrong method keeps scanning rather than
/// failing fast with 4.05; after a full scan, a path that matched
/// somewhere yields 5.01 and a path that never matched yields 4.04.
fn route(endpoints: &mut [Endpoint],
         req: &Addrd<Req>)
         -> (newt_msg::Code, Vec<u8>, Option<ContentFormat>, bool) {
  let segments = req.data().path_segments();
  let method = req.data().method();
  let mut path_matched = false;

  for ep in endpoints.iter_mut() {
    if !ep.matches_path(&segments) {
      continue;
    }

    path_matched = true;

    if method == Some(ep.method) {
      let (status, payload) = (ep.handler)(req);
      return (status, payload, ep.content_format, ep.separate);
    }
  }

  if path_matched {
    (code::NOT_IMPLEMENTED, Vec::new(), None, false)
  } else {
    (code::NOT_FOUND, Vec::new(), None, false)
  }
}

fn needs_more_data(e: &MessageParseError) -> bool {
  matches!(e,
           MessageParseError::HeaderTooShort
           | MessageParseError::TokenTooShort { .. }
           | MessageParseError::Opt(OptParseError::UnexpectedEndOfStream))
}
