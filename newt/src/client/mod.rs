//! The client half of the engine: one blocking request at a time,
//! plus a bounded set of fully independent Observe relations.

use std::sync::Arc;

use rand::{Rng, RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;

use newt_msg::opt::known;
use newt_msg::{Block, Code, CodeKind, Id, Message, OptValue, Payload, Token, TryFromBytes, Type};

use crate::config::Config;
use crate::error::{Error, What, When};
use crate::logging;
use crate::net::{Resolve, Socket, StdResolver};
use crate::req::{Method, Req, Uri};
use crate::resp::{code, Resp};
use crate::retry::{RetryTimer, YouShould};
use crate::session::{Recv, Session};
use crate::store::{key, CallbackId, CallbackTable, EngineRecord, RelationRecord, Store, URI_MAX};
use crate::time::{Clock, SystemClock, Timeout};

/// Observe relation lifecycle & background loop
pub mod observe;

#[doc(inline)]
pub use observe::{Relation, RelationStatus};

use observe::{run_loop, LoopEnv, Shared};

#[cfg(feature = "secure")]
use crate::session::Role;

/// The engine's token mint: a big-endian counter with carry,
/// reseeded from a deterministic stream when it wraps all the way
/// around.
#[derive(Debug)]
struct TokenSequence {
  bytes: [u8; 8],
  rng: ChaCha8Rng,
}

impl TokenSequence {
  fn new(seed: u16) -> Self {
    let mut rng = ChaCha8Rng::seed_from_u64(seed as u64);
    let mut bytes = [0u8; 8];
    rng.fill_bytes(&mut bytes);
    Self { bytes, rng }
  }

  fn resume(bytes: [u8; 8], seed: u16) -> Self {
    Self { bytes,
           rng: ChaCha8Rng::seed_from_u64(seed as u64) }
  }

  fn next(&mut self) -> Token {
    for ix in (0..8).rev() {
      let (byte, carry) = self.bytes[ix].overflowing_add(1);
      self.bytes[ix] = byte;
      if !carry {
        return Token::opaque(&self.bytes);
      }
    }

    // the counter wrapped all 8 bytes; start a fresh run
    self.rng.fill_bytes(&mut self.bytes);
    Token::opaque(&self.bytes)
  }
}

/// A blocking CoAP client.
///
/// One request may be in flight at a time
/// ([`What::InProgress`](crate::error::What::InProgress) otherwise);
/// Observe relations run on their own sessions and tasks and never
/// occupy that slot.
#[allow(missing_debug_implementations)]
pub struct Client<S: Socket, C: Clock> {
  cfg: Config,
  clock: C,
  session: Session<S>,
  resolver: Box<dyn Resolve + Send>,
  callbacks: Arc<CallbackTable>,
  store: Option<Arc<dyn Store>>,
  tokens: TokenSequence,
  next_id: Id,
  last_seen_id: Option<Id>,
  in_flight: bool,
  relations: Vec<Option<Relation>>,
}

impl Client<std::net::UdpSocket, SystemClock> {
  /// Create a client over a plain UDP socket and the system clock.
  pub fn try_new(cfg: Config) -> Result<Self, Error<std::io::Error>> {
    Self::try_new_with(cfg,
                       SystemClock::new(),
                       StdResolver,
                       Arc::new(CallbackTable::new()),
                       None)
  }
}

impl<S, C> Client<S, C>
  where S: Socket,
        C: Clock + Clone + Send + 'static
{
  /// Create a client with explicit collaborators: clock, resolver,
  /// Observe callback table, and (optionally) the suspend/resume
  /// store.
  pub fn try_new_with(cfg: Config,
                      clock: C,
                      resolver: impl Resolve + Send + 'static,
                      callbacks: Arc<CallbackTable>,
                      store: Option<Arc<dyn Store>>)
                      -> Result<Self, Error<S::Error>> {
    cfg.validate()
       .map_err(|msg| When::Building.what(What::Param(msg)))?;

    let uri = Uri::parse(&cfg.uri).map_err(|msg| When::Building.what(What::UriInvalid(msg)))?;
    let session = Self::connect(&cfg, &clock, resolver.resolve(&uri.host, uri.port), &uri, None)?;

    #[cfg(feature = "secure")]
    if let Some(store) = &store {
      session.save(store.as_ref(), key::DTLS_MAIN);
    }

    Ok(Self::assemble(cfg, clock, session, Box::new(resolver), callbacks, store, None))
  }

  /// Rebuild a client after a power cycle: engine counters come back
  /// from the store, every persisted-active Observe relation is
  /// re-derived (session re-opened, DTLS resumed, task re-spawned)
  /// without re-subscribing.
  pub fn resume_with(cfg: Config,
                     clock: C,
                     resolver: impl Resolve + Send + 'static,
                     callbacks: Arc<CallbackTable>,
                     store: Arc<dyn Store>)
                     -> Result<Self, Error<S::Error>> {
    cfg.validate()
       .map_err(|msg| When::Building.what(What::Param(msg)))?;

    // a restore failure means starting fresh, never failing startup
    let counters = store.get(key::ENGINE)
                        .ok()
                        .flatten()
                        .and_then(|bytes| EngineRecord::decode(&bytes));

    let uri = Uri::parse(&cfg.uri).map_err(|msg| When::Building.what(What::UriInvalid(msg)))?;
    let session = Self::connect(&cfg,
                                &clock,
                                resolver.resolve(&uri.host, uri.port),
                                &uri,
                                Some(store.as_ref()))?;

    let mut client = Self::assemble(cfg,
                                    clock,
                                    session,
                                    Box::new(resolver),
                                    callbacks,
                                    Some(store.clone()),
                                    counters);

    let mut restored = 0usize;
    for slot in 0..client.cfg.max_observe {
      if client.resume_relation(slot, store.as_ref()) {
        restored += 1;
      }
    }

    log::info!("wakeup complete; {} observe relation(s) restored", restored);
    Ok(client)
  }

  fn connect(cfg: &Config,
             clock: &C,
             resolved: Result<Vec<no_std_net::SocketAddr>, &'static str>,
             uri: &Uri,
             store: Option<&dyn Store>)
             -> Result<Session<S>, Error<S::Error>> {
    let addrs = resolved.map_err(|_| When::Opening.what(What::HostUnresolved))?;
    let peer = *addrs.first()
                     .ok_or_else(|| When::Opening.what(What::HostUnresolved))?;

    #[allow(unused_mut)]
    let mut session = Session::open(None, peer)?;

    #[cfg(feature = "secure")]
    if uri.secure {
      let sec = cfg.security
                   .as_ref()
                   .ok_or_else(|| When::Building.what(What::Param("coaps target without security config")))?;

      if let Some(store) = store {
        session.restore(store, key::DTLS_MAIN);
      }

      session.negotiate(Role::Client, sec, clock)?;
    }

    #[cfg(not(feature = "secure"))]
    {
      let _ = (cfg, clock, store);
      if uri.secure {
        return Err(When::Building.what(What::Param("coaps target but the secure feature is disabled")));
      }
    }

    Ok(session)
  }

  pub(crate) fn assemble(cfg: Config,
                         clock: C,
                         session: Session<S>,
                         resolver: Box<dyn Resolve + Send>,
                         callbacks: Arc<CallbackTable>,
                         store: Option<Arc<dyn Store>>,
                         counters: Option<EngineRecord>)
                         -> Self {
    let (tokens, next_id) = match counters {
      | Some(rec) => (TokenSequence::resume(rec.token, cfg.token_seed), Id(rec.msg_id)),
      | None => {
        let mut rng = ChaCha8Rng::seed_from_u64(cfg.token_seed as u64);
        (TokenSequence::new(cfg.token_seed), Id(rng.gen_range(0..=255)))
      },
    };

    let relations = (0..cfg.max_observe).map(|_| None).collect();

    Self { cfg,
           clock,
           session,
           resolver,
           callbacks,
           store,
           tokens,
           next_id,
           last_seen_id: None,
           in_flight: false,
           relations }
  }

  fn next_msg_id(&mut self) -> Id {
    let id = self.next_id;
    self.next_id = self.next_id.next();
    id
  }

  fn persist_counters(&self) {
    if let Some(store) = &self.store {
      let rec = EngineRecord { token: self.tokens.bytes,
                               msg_id: self.next_id.0 };

      if let Err(e) = store.put(key::ENGINE, &rec.encode()) {
        log::warn!("failed to persist engine counters: {}", e);
      }
    }
  }

  /// Send a request and block until its response (or failure).
  pub fn send(&mut self, req: Req) -> Result<Resp, Error<S::Error>> {
    if self.in_flight {
      return Err(When::Building.what(What::InProgress));
    }

    self.in_flight = true;
    let out = self.send_inner(req);
    self.in_flight = false;
    out
  }

  fn send_inner(&mut self, mut req: Req) -> Result<Resp, Error<S::Error>> {
    if let Some(proxy) = &self.cfg.proxy_uri {
      if req.msg().get(known::PROXY_URI).is_none() {
        req.0.set(known::PROXY_URI, OptValue(proxy.as_bytes().to_vec()));
      }
    }

    if !self.cfg.confirmable {
      req.non();
    }

    req.set_msg_token(self.tokens.next());
    self.persist_counters();

    let size = self.cfg.block_size();
    let full = req.payload().to_vec();

    let resp = if full.len() > size {
      self.upload_blockwise(&req, &full)?
    } else {
      let mut msg: Message = req.msg().clone();
      msg.id = self.next_msg_id();
      self.exchange(msg)?
    };

    self.download_blockwise(&req, resp)
  }

  /// Block1: carve the outbound body into `2^(szx+4)`-byte blocks
  /// and feed them to the server one exchange at a time.
  fn upload_blockwise(&mut self, req: &Req, full: &[u8]) -> Result<Resp, Error<S::Error>> {
    let szx = self.cfg.block_szx;
    let size = self.cfg.block_size();
    let count = full.chunks(size).count();
    let mut num = 0usize;

    loop {
      let more = num + 1 < count;
      let chunk = &full[num * size..(num * size + size).min(full.len())];

      let mut msg: Message = req.msg().clone();
      msg.id = self.next_msg_id();
      msg.set(known::BLOCK1, Block::new(num as u32, more, szx).into());
      msg.set_uint(known::SIZE1, full.len() as u64);
      msg.payload = Payload(chunk.to_vec());

      let resp = self.exchange(msg)?;

      if !more {
        break Ok(resp);
      }

      // an echoed block number that did not advance is a duplicate
      // of an earlier ack; ignore it and offer this block again
      if let Some(b1) = resp.block1() {
        if (b1.num as usize) < num {
          log::debug!("stale block1 ack for {} ignored", b1.num);
          continue;
        }
      }

      if resp.code() != code::CONTINUE {
        log::warn!("server answered {} mid-transfer, stopping early", resp.code());
        break Ok(resp);
      }

      num += 1;
    }
  }

  /// Block2: while the response says "more", keep asking for the
  /// next block and splice the payloads together.
  fn download_blockwise(&mut self, req: &Req, first: Resp) -> Result<Resp, Error<S::Error>> {
    let mut body = first.payload().to_vec();
    let mut last = first;

    loop {
      let block = match last.block2() {
        | Some(b) if b.more => b,
        | _ => break,
      };

      let wanted = block.num + 1;
      let mut msg: Message = req.msg().clone();
      msg.id = self.next_msg_id();
      msg.payload = Payload(Vec::new());
      msg.set(known::BLOCK2, Block::new(wanted, false, block.szx).into());

      let next = self.exchange(msg)?;

      match next.block2() {
        | Some(b) if b.num == wanted => {
          body.extend_from_slice(next.payload());
          last = next;
        },
        | Some(b) if b.num < wanted => {
          // did not advance; a duplicate to be skipped
          log::debug!("duplicate block2 {} ignored", b.num);
        },
        | _ => {
          body.extend_from_slice(next.payload());
          last = next;
          break;
        },
      }
    }

    last.set_payload(body);
    Ok(last)
  }

  fn exchange(&mut self, msg: Message) -> Result<Resp, Error<S::Error>> {
    exchange_on(&mut self.session,
                &self.clock,
                &self.cfg,
                &mut self.last_seen_id,
                msg)
  }

  /// An inexpensive liveness check: an empty CON that a live peer
  /// answers with RST.
  pub fn ping(&mut self) -> Result<(), Error<S::Error>> {
    if self.in_flight {
      return Err(When::Building.what(What::InProgress));
    }
    self.in_flight = true;
    let out = self.ping_inner();
    self.in_flight = false;
    out
  }

  fn ping_inner(&mut self) -> Result<(), Error<S::Error>> {
    let when = When::Polling;
    let id = self.next_msg_id();
    let msg = Message::new(Type::Con, Code::new(0, 0), id, Token::default());

    let mut out = [0u8; 16];
    let n = msg.encode(&mut out)
               .map_err(|e| When::Sending.what(What::ToBytes(e)))?;
    self.session.send(&out[..n])?;

    let start = self.clock
                    .try_now()
                    .map_err(|_| when.what(What::ClockError))?;
    let mut retry = RetryTimer::new(start, self.cfg.con_strategy(), self.cfg.max_retransmit);
    let mut buf = [0u8; 64];

    loop {
      match self.session.recv(&self.clock, Timeout::Millis(10), &mut buf)? {
        | Recv::Data(len) => match Message::try_from_bytes(&buf[..len]) {
          | Ok(rmsg) if rmsg.id == id && matches!(rmsg.ty, Type::Reset | Type::Ack) => {
            return Ok(())
          },
          | Ok(_) => continue,
          | Err(e) => {
            log::warn!("dropping malformed datagram: {:?}", e);
            continue;
          },
        },
        | Recv::NoData => {
          let now = self.clock
                        .try_now()
                        .map_err(|_| when.what(What::ClockError))?;
          match retry.what_should_i_do(now) {
            | Ok(YouShould::Retry) => self.session.send(&out[..n])?,
            | Ok(YouShould::Cry) => return Err(when.what(What::NoPacket)),
            | Err(nb::Error::WouldBlock) => {},
          }
        },
        | Recv::PeerClosed => return Err(when.what(What::PeerClosed)),
        | Recv::Reset => return Err(when.what(What::PeerReset)),
      }
    }
  }

  /// Subscribe to `uri`, delivering notifications through the
  /// callback pair registered under `callback_id`.
  ///
  /// The relation gets its own socket (bound to `local_port` if
  /// given), its own session (including its own DTLS handshake for
  /// `coaps`), and its own background task. Returns the relation's
  /// slot index.
  pub fn register_observe(&mut self,
                          uri: &str,
                          callback_id: CallbackId,
                          local_port: Option<u16>)
                          -> Result<usize, Error<S::Error>> {
    if uri.len() > URI_MAX {
      return Err(When::Building.what(What::Param("observe uri too long")));
    }

    let parsed = Uri::parse(uri).map_err(|msg| When::Building.what(What::UriInvalid(msg)))?;

    let addrs = self.resolver
                    .resolve(&parsed.host, parsed.port)
                    .map_err(|_| When::Opening.what(What::HostUnresolved))?;
    let peer = *addrs.first()
                     .ok_or_else(|| When::Opening.what(What::HostUnresolved))?;

    #[allow(unused_mut)]
    let mut session = Session::open(local_port, peer)?;

    #[cfg(feature = "secure")]
    if parsed.secure {
      let sec = self.cfg
                    .security
                    .as_ref()
                    .ok_or_else(|| When::Building.what(What::Param("coaps target without security config")))?
                    .clone();
      session.negotiate(Role::Client, &sec, &self.clock)?;
    }

    self.observe_on(session, parsed, callback_id)
  }

  /// Register an Observe relation over an already-open session.
  pub(crate) fn observe_on(&mut self,
                           mut session: Session<S>,
                           uri: Uri,
                           callback_id: CallbackId)
                           -> Result<usize, Error<S::Error>> {
    let slot = self.relations
                   .iter()
                   .position(Option::is_none)
                   .ok_or_else(|| When::Building.what(What::CapacityExhausted("observe relations")))?;

    let (notify, close) = self.callbacks
                              .get(callback_id)
                              .ok_or_else(|| When::Building.what(What::Param("callback id not registered")))?;

    let token = self.tokens.next();
    let id = self.next_msg_id();
    self.persist_counters();

    let mut req = Req::get(&uri);
    req.set_observe(newt_msg::opt::known::observe::Action::Register);
    req.set_msg_token(token);
    req.set_msg_id(id);

    // the registration exchange runs on the relation's session and
    // never occupies the engine's in-flight slot
    let mut last_seen = None;
    let _initial = exchange_on(&mut session, &self.clock, &self.cfg, &mut last_seen, req.into())?;

    let shared = Arc::new(Shared::new(RelationStatus::Active, last_seen));
    let record = RelationRecord { state: RelationStatus::Active as u8,
                                  local_port: session.local_addr().port(),
                                  token,
                                  msg_id: last_seen.map(|id| id.0).unwrap_or(0),
                                  uri: uri.to_string(),
                                  proxy_uri: None,
                                  notify_cb: callback_id.0,
                                  close_cb: callback_id.0 };

    log::info!("observe[{}]: registered for {}", slot, record.uri);
    self.spawn_relation(slot, session, shared, notify, close, record)?;
    Ok(slot)
  }

  fn resume_relation(&mut self, slot: usize, store: &dyn Store) -> bool {
    let rec = match store.get(&key::relation(slot))
                         .ok()
                         .flatten()
                         .and_then(|bytes| RelationRecord::decode(&bytes))
    {
      | Some(rec) if rec.state == RelationStatus::Active as u8 => rec,
      | _ => return false,
    };

    let parsed = match Uri::parse(&rec.uri) {
      | Ok(parsed) => parsed,
      | Err(_) => {
        log::warn!("observe[{}]: persisted uri did not parse, dropping slot", slot);
        let _ = store.remove(&key::relation(slot));
        return false;
      },
    };

    let addrs = match self.resolver.resolve(&parsed.host, parsed.port) {
      | Ok(addrs) if !addrs.is_empty() => addrs,
      | _ => {
        log::warn!("observe[{}]: host no longer resolves, dropping slot", slot);
        return false;
      },
    };

    // the recorded port may be gone (0 means ephemeral); fall back
    // rather than refusing to wake up
    let session = Session::open(Some(rec.local_port).filter(|p| *p != 0), addrs[0])
      .or_else(|_| Session::open(None, addrs[0]));
    #[allow(unused_mut)]
    let mut session = match session {
      | Ok(session) => session,
      | Err(e) => {
        log::warn!("observe[{}]: could not re-open session: {:?}", slot, e.what);
        return false;
      },
    };

    #[cfg(feature = "secure")]
    if parsed.secure {
      let sec = match self.cfg.security.as_ref() {
        | Some(sec) => sec.clone(),
        | None => {
          log::warn!("observe[{}]: secure slot but no security config", slot);
          return false;
        },
      };

      session.restore(store, &key::relation_dtls(slot));
      if let Err(e) = session.negotiate(Role::Client, &sec, &self.clock) {
        log::warn!("observe[{}]: dtls resumption failed: {:?}", slot, e.what);
        return false;
      }
    }

    let (notify, close) = match self.callbacks.get(CallbackId(rec.notify_cb)) {
      | Some(cbs) => cbs,
      | None => {
        log::warn!("observe[{}]: callback {} not registered on resume", slot, rec.notify_cb);
        return false;
      },
    };

    // prior token and session state remain valid server-side; no
    // re-subscription
    let shared = Arc::new(Shared::new(RelationStatus::Active, Some(Id(rec.msg_id))));
    self.spawn_relation(slot, session, shared, notify, close, rec)
        .is_ok()
  }

  fn spawn_relation(&mut self,
                    slot: usize,
                    session: Session<S>,
                    shared: Arc<Shared>,
                    notify: crate::store::NotifyFn,
                    close: crate::store::CloseFn,
                    record: RelationRecord)
                    -> Result<(), Error<S::Error>> {
    let env = LoopEnv { session,
                        clock: self.clock.clone(),
                        shared: shared.clone(),
                        notify,
                        close,
                        store: self.store.clone(),
                        slot,
                        record };

    let task = std::thread::Builder::new().name(format!("observe-{}", slot))
                                          .spawn(move || run_loop(env))
                                          .map_err(|_| {
                                            When::Building.what(What::CapacityExhausted("tasks"))
                                          })?;

    self.relations[slot] = Some(Relation { shared,
                                           task: Some(task) });
    Ok(())
  }

  /// Status of the relation in `slot`, if one lives there.
  pub fn relation_status(&self, slot: usize) -> Option<RelationStatus> {
    self.relations
        .get(slot)
        .and_then(|r| r.as_ref())
        .map(Relation::status)
  }

  /// Signal TERMINATE to every active relation, wait for each task
  /// to wind down (each sends its parting RST), then release the
  /// slots.
  pub fn teardown(&mut self) {
    for relation in self.relations.iter_mut().flatten() {
      if relation.status() != RelationStatus::Terminated {
        relation.shared.set_status(RelationStatus::TerminateRequested);
      }
    }

    for relation in self.relations.iter_mut().flatten() {
      relation.terminate_and_join();
    }

    for slot in self.relations.iter_mut() {
      *slot = None;
    }

    log::debug!("all observe relations terminated");
  }
}

/// One request/response exchange on `session`: send, wait, apply
/// retransmission policy, duplicate suppression, empty-ACK handling
/// and status-code mapping.
pub(crate) fn exchange_on<S, C>(session: &mut Session<S>,
                                clock: &C,
                                cfg: &Config,
                                last_seen: &mut Option<Id>,
                                msg: Message)
                                -> Result<Resp, Error<S::Error>>
  where S: Socket,
        C: Clock
{
  let when = When::Polling;
  let (id, token, ty) = (msg.id, msg.token, msg.ty);
  let is_get = msg.code == Method::GET.code();

  let mut out = [0u8; 1152];
  let n = msg.encode(&mut out)
             .map_err(|e| When::Sending.what(What::ToBytes(e)))?;

  log::trace!("sending {} -> {}", logging::msg_summary(&msg), session.peer());
  session.send(&out[..n])?;

  // CON requests retransmit; NON only retries for GET so blockwise
  // reads can make progress
  let retransmit = match ty {
    | Type::Con => true,
    | Type::Non => is_get,
    | _ => false,
  };
  let strategy = if ty == Type::Con {
    cfg.con_strategy()
  } else {
    cfg.non_strategy()
  };

  let start = clock.try_now().map_err(|_| when.what(What::ClockError))?;
  let mut retry = RetryTimer::new(start, strategy, cfg.max_retransmit);
  let mut acked = false;
  let mut buf = [0u8; 1152];

  loop {
    match session.recv(clock, Timeout::Millis(10), &mut buf)? {
      | Recv::Data(len) => {
        let rmsg = match Message::try_from_bytes(&buf[..len]) {
          | Ok(rmsg) => rmsg,
          // a bad datagram never kills the exchange; it just never
          // happened as far as the retry policy is concerned
          | Err(e) => {
            log::warn!("dropping malformed datagram: {:?}", e);
            continue;
          },
        };

        log::trace!("recvd {} <- {}", logging::msg_summary(&rmsg), session.peer());

        // single-slot duplicate suppression
        if *last_seen == Some(rmsg.id) {
          log::trace!("duplicate {:?} ignored", rmsg.id);
          continue;
        }

        if rmsg.ty == Type::Reset && rmsg.id == id {
          return Err(when.what(What::PeerReset));
        }

        if rmsg.ty == Type::Ack && rmsg.code.kind() == CodeKind::Empty {
          if rmsg.id == id {
            log::trace!("{:?} acked, awaiting separate response", id);
            acked = true;
          }
          continue;
        }

        if rmsg.code.kind() != CodeKind::Response {
          continue;
        }

        if rmsg.token != token {
          log::trace!("response for another token ignored");
          continue;
        }

        // a separate response delivered confirmably gets its empty
        // ACK before we do anything else with it
        if rmsg.ty == Type::Con {
          let mut abuf = [0u8; 16];
          if let Ok(an) = rmsg.ack().encode(&mut abuf) {
            session.send(&abuf[..an])?;
          }
        }

        *last_seen = Some(rmsg.id);

        return match rmsg.code.class {
          | 2 => Ok(Resp::from(rmsg)),
          | _ => Err(when.what(What::Response(rmsg.code))),
        };
      },

      | Recv::NoData => {
        let now = clock.try_now().map_err(|_| when.what(What::ClockError))?;
        match retry.what_should_i_do(now) {
          | Ok(YouShould::Retry) if !retransmit => return Err(when.what(What::NoPacket)),
          | Ok(YouShould::Retry) => {
            if !acked {
              log::debug!("retransmitting {:?}", id);
              session.send(&out[..n])?;
            }
          },
          | Ok(YouShould::Cry) => return Err(when.what(What::NoPacket)),
          | Err(nb::Error::WouldBlock) => {},
        }
      },

      | Recv::PeerClosed => return Err(when.what(What::PeerClosed)),
      | Recv::Reset => return Err(when.what(What::PeerReset)),
    }
  }
}

#[cfg(test)]
mod tests {
  use std::sync::atomic::{AtomicUsize, Ordering};
  use std::time::Duration;

  use embedded_time::duration::Milliseconds;

  use super::*;
  use crate::error::ResultExt;
  use crate::net::Addrd;
  use crate::store::MemStore;
  use crate::test::SockMock;

  fn peer() -> no_std_net::SocketAddr {
    "10.0.0.1:5683".parse().unwrap()
  }

  fn quick_cfg(uri: &str) -> Config {
    let mut cfg = Config::new(uri);
    cfg.ack_timeout = Milliseconds(30);
    cfg
  }

  fn client_on(sock: SockMock, cfg: Config) -> Client<SockMock, SystemClock> {
    Client::assemble(cfg,
                     SystemClock::new(),
                     Session::from_shared(Arc::new(sock), peer()),
                     Box::new(StdResolver),
                     Arc::new(CallbackTable::new()),
                     None,
                     None)
  }

  fn reply(harness: &SockMock, resp: Resp) {
    use newt_msg::TryIntoBytes;
    harness.push_rx(Addrd(Message::from(resp).try_into_bytes().unwrap(), peer()));
  }

  fn next_request(harness: &SockMock) -> Req {
    let Addrd(bytes, _) = harness.await_tx(Duration::from_secs(2)).expect("request sent");
    Req::from(Message::try_from_bytes(&bytes).unwrap())
  }

  #[test]
  fn con_get_round_trip() {
    let sock = SockMock::new();
    let harness = sock.clone();
    let mut client = client_on(sock, quick_cfg("coap://10.0.0.1/temp"));

    let server = std::thread::spawn(move || {
      let req = next_request(&harness);
      assert_eq!(req.method(), Some(Method::GET));
      assert_eq!(req.path_segments(), vec!["temp"]);
      assert_eq!(req.msg_type(), Type::Con);

      let mut resp = Resp::for_request(&req).unwrap();
      resp.set_code(code::CONTENT);
      resp.set_payload("23");
      reply(&harness, resp);
    });

    let uri = Uri::parse("coap://10.0.0.1/temp").unwrap();
    let resp = client.send(Req::get(&uri)).unwrap();

    assert_eq!(resp.code(), code::CONTENT);
    assert_eq!(resp.payload_string().unwrap(), "23");
    server.join().unwrap();
  }

  #[test]
  fn error_response_maps_to_response_error() {
    let sock = SockMock::new();
    let harness = sock.clone();
    let mut client = client_on(sock, quick_cfg("coap://10.0.0.1/nope"));

    let server = std::thread::spawn(move || {
      let req = next_request(&harness);
      let mut resp = Resp::for_request(&req).unwrap();
      resp.set_code(code::NOT_FOUND);
      reply(&harness, resp);
    });

    let uri = Uri::parse("coap://10.0.0.1/nope").unwrap();
    let err = client.send(Req::get(&uri)).unwrap_err();
    assert_eq!(err.response_code(), Some(code::NOT_FOUND));
    server.join().unwrap();
  }

  #[test]
  fn con_retransmits_exactly_max_retransmit_times() {
    let sock = SockMock::new();
    let tx = sock.tx.clone();
    let mut cfg = quick_cfg("coap://10.0.0.1/quiet");
    cfg.ack_timeout = Milliseconds(20);
    let mut client = client_on(sock, cfg);

    let uri = Uri::parse("coap://10.0.0.1/quiet").unwrap();
    let err = client.send(Req::get(&uri)).unwrap_err();

    assert!(err.is_timeout());
    // initial transmission + 4 retransmissions
    assert_eq!(tx.lock().unwrap().len(), 5);
  }

  #[test]
  fn non_post_is_single_shot() {
    let sock = SockMock::new();
    let tx = sock.tx.clone();
    let mut cfg = quick_cfg("coap://10.0.0.1/fling");
    cfg.confirmable = false;
    let mut client = client_on(sock, cfg);

    let uri = Uri::parse("coap://10.0.0.1/fling").unwrap();
    let mut req = Req::post(&uri);
    req.set_payload("hi");

    assert!(matches!(client.send(req).timeout_ok(), Ok(None)));
    assert_eq!(tx.lock().unwrap().len(), 1);
  }

  #[test]
  fn separate_response_gets_empty_ack() {
    let sock = SockMock::new();
    let harness = sock.clone();
    let mut client = client_on(sock, quick_cfg("coap://10.0.0.1/slow"));

    let server = std::thread::spawn(move || {
      use newt_msg::TryIntoBytes;

      let req = next_request(&harness);

      // "I heard you, thinking" then the real response as CON
      let empty_ack = req.msg().ack();
      harness.push_rx(Addrd(empty_ack.try_into_bytes().unwrap(), peer()));

      let mut resp = Resp::separate_for_request(&req, Id(4242));
      resp.set_code(code::CONTENT);
      resp.set_payload("eventually");
      reply(&harness, resp);

      // the client should immediately ACK the CON response
      let Addrd(bytes, _) = harness.await_tx(Duration::from_secs(2)).expect("client ack");
      let ack = Message::try_from_bytes(&bytes).unwrap();
      assert_eq!(ack.ty, Type::Ack);
      assert_eq!(ack.id, Id(4242));
      assert_eq!(ack.code.kind(), CodeKind::Empty);
    });

    let uri = Uri::parse("coap://10.0.0.1/slow").unwrap();
    let resp = client.send(Req::get(&uri)).unwrap();
    assert_eq!(resp.payload_string().unwrap(), "eventually");
    server.join().unwrap();
  }

  #[test]
  fn blockwise_put_slices_into_five_blocks() {
    let sock = SockMock::new();
    let harness = sock.clone();
    let mut client = client_on(sock, quick_cfg("coap://10.0.0.1/firmware"));

    let server = std::thread::spawn(move || {
      let mut seen = Vec::new();

      loop {
        let req = next_request(&harness);
        let b1 = req.block1().expect("block1 on every upload request");
        seen.push((b1.num, b1.more, req.payload().len()));

        let mut resp = Resp::for_request(&req).unwrap();
        if b1.more {
          resp.set_code(code::CONTINUE);
          resp.0.set(known::BLOCK1, Block::new(b1.num, true, b1.szx).into());
        } else {
          resp.set_code(code::CHANGED);
        }
        let done = !b1.more;
        reply(&harness, resp);

        if done {
          break seen;
        }
      }
    });

    let uri = Uri::parse("coap://10.0.0.1/firmware").unwrap();
    let mut req = Req::put(&uri);
    req.set_payload(vec![0x42u8; 5000]);

    let resp = client.send(req).unwrap();
    assert_eq!(resp.code(), code::CHANGED);

    let seen = server.join().unwrap();
    assert_eq!(seen,
               vec![(0, true, 1024),
                    (1, true, 1024),
                    (2, true, 1024),
                    (3, true, 1024),
                    (4, false, 904)]);
  }

  #[test]
  fn blockwise_get_reassembles_response() {
    let sock = SockMock::new();
    let harness = sock.clone();
    let mut client = client_on(sock, quick_cfg("coap://10.0.0.1/log"));

    let server = std::thread::spawn(move || {
      let body = [vec![b'a'; 64], vec![b'b'; 10]];

      for wanted in 0..2u32 {
        let req = next_request(&harness);
        if wanted > 0 {
          assert_eq!(req.block2().map(|b| b.num), Some(wanted));
        }

        let mut resp = Resp::for_request(&req).unwrap();
        resp.set_code(code::CONTENT);
        resp.set_payload(body[wanted as usize].clone());
        resp.0.set(known::BLOCK2, Block::new(wanted, wanted == 0, 2).into());
        reply(&harness, resp);
      }
    });

    let uri = Uri::parse("coap://10.0.0.1/log").unwrap();
    let resp = client.send(Req::get(&uri)).unwrap();

    let mut expected = vec![b'a'; 64];
    expected.extend(vec![b'b'; 10]);
    assert_eq!(resp.payload(), &expected[..]);
    server.join().unwrap();
  }

  #[test]
  fn ping_pongs() {
    let sock = SockMock::new();
    let harness = sock.clone();
    let mut client = client_on(sock, quick_cfg("coap://10.0.0.1/"));

    let server = std::thread::spawn(move || {
      use newt_msg::TryIntoBytes;

      let Addrd(bytes, _) = harness.await_tx(Duration::from_secs(2)).expect("ping sent");
      let msg = Message::try_from_bytes(&bytes).unwrap();
      assert_eq!(msg.ty, Type::Con);
      assert_eq!(msg.code.kind(), CodeKind::Empty);

      harness.push_rx(Addrd(msg.reset().try_into_bytes().unwrap(), peer()));
    });

    client.ping().unwrap();
    server.join().unwrap();
  }

  fn observe_callbacks() -> (Arc<CallbackTable>, Arc<AtomicUsize>, Arc<AtomicUsize>) {
    let notified = Arc::new(AtomicUsize::new(0));
    let closed = Arc::new(AtomicUsize::new(0));

    let mut table = CallbackTable::new();
    let n = notified.clone();
    let c = closed.clone();
    table.register(CallbackId(1),
                   Arc::new(move |_| {
                     n.fetch_add(1, Ordering::SeqCst);
                   }),
                   Arc::new(move || {
                     c.fetch_add(1, Ordering::SeqCst);
                   }));

    (Arc::new(table), notified, closed)
  }

  fn wait_for(pred: impl Fn() -> bool) {
    let deadline = std::time::Instant::now() + Duration::from_secs(3);
    while !pred() {
      assert!(std::time::Instant::now() < deadline, "timed out waiting");
      std::thread::sleep(Duration::from_millis(5));
    }
  }

  #[test]
  fn observe_notifies_dedupes_and_tears_down() {
    use newt_msg::TryIntoBytes;

    let (callbacks, notified, closed) = observe_callbacks();

    let main_sock = SockMock::new();
    let mut client = Client::<SockMock, SystemClock>::assemble(
      quick_cfg("coap://10.0.0.1/"),
      SystemClock::new(),
      Session::from_shared(Arc::new(main_sock), peer()),
      Box::new(StdResolver),
      callbacks,
      None,
      None,
    );

    let rel_sock = SockMock::new();
    let harness = rel_sock.clone();

    let server = std::thread::spawn(move || {
      let req = next_request(&harness);
      assert_eq!(req.observe(),
                 Some(newt_msg::opt::known::observe::Action::Register));
      let token = req.msg_token();

      let mut resp = Resp::for_request(&req).unwrap();
      resp.set_code(code::CONTENT);
      resp.set_payload("s0");
      reply(&harness, resp);

      let notification = |id: u16, seq: u32, body: &str| {
        let mut msg = Message::new(Type::Non, code::CONTENT, Id(id), token);
        msg.set_uint(known::OBSERVE, seq as u64);
        msg.set_uint(known::MAX_AGE, 60);
        msg.payload = newt_msg::Payload(body.as_bytes().to_vec());
        Addrd(msg.try_into_bytes().unwrap(), peer())
      };

      // two notifications, one duplicated message id
      harness.push_rx(notification(30_000, 2, "v1"));
      harness.push_rx(notification(30_000, 2, "v1"));
      harness.push_rx(notification(30_001, 3, "v2"));
    });

    let uri = Uri::parse("coap://10.0.0.1/sensor").unwrap();
    let session = Session::from_shared(Arc::new(rel_sock.clone()), peer());
    let slot = client.observe_on(session, uri, CallbackId(1)).unwrap();
    assert_eq!(client.relation_status(slot), Some(RelationStatus::Active));
    server.join().unwrap();

    wait_for(|| notified.load(Ordering::SeqCst) == 2);

    client.teardown();
    assert_eq!(client.relation_status(slot), None);
    assert_eq!(closed.load(Ordering::SeqCst), 1);

    // a third notification after teardown reaches nobody
    let mut late = Message::new(Type::Non, code::CONTENT, Id(30_002), Token::default());
    late.set_uint(known::OBSERVE, 4);
    rel_sock.push_rx(Addrd(late.try_into_bytes().unwrap(), peer()));
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(notified.load(Ordering::SeqCst), 2);

    // the task said goodbye with an RST
    let goodbyes: Vec<_> = rel_sock.tx
                                   .lock()
                                   .unwrap()
                                   .iter()
                                   .filter_map(|Addrd(bytes, _)| Message::try_from_bytes(bytes).ok())
                                   .filter(|m| m.ty == Type::Reset)
                                   .collect();
    assert_eq!(goodbyes.len(), 1);
  }

  #[test]
  fn resume_restores_persisted_relations() {
    let (callbacks, _notified, _closed) = observe_callbacks();
    let store: Arc<dyn Store> = Arc::new(MemStore::new());

    let rec = RelationRecord { state: RelationStatus::Active as u8,
                               local_port: 0,
                               token: Token::opaque(&[7, 7]),
                               msg_id: 41,
                               uri: "coap://10.0.0.5/sensor".to_string(),
                               proxy_uri: None,
                               notify_cb: 1,
                               close_cb: 1 };
    store.put(&key::relation(0), &rec.encode()).unwrap();

    let counters = EngineRecord { token: [9, 9, 9, 9, 9, 9, 9, 9],
                                  msg_id: 1234 };
    store.put(key::ENGINE, &counters.encode()).unwrap();

    let mut client =
      Client::<SockMock, SystemClock>::resume_with(quick_cfg("coap://10.0.0.5/"),
                                                   SystemClock::new(),
                                                   StdResolver,
                                                   callbacks,
                                                   store.clone()).unwrap();

    // counters picked up where they left off, no re-subscription
    assert_eq!(client.next_id, Id(1234));
    assert_eq!(client.relation_status(0), Some(RelationStatus::Active));

    client.teardown();
    assert_eq!(store.get(&key::relation(0)).unwrap(), None);
  }

  #[test]
  fn token_counter_carries() {
    let mut tokens = TokenSequence::resume([0, 0, 0, 0, 0, 0, 0, 0xFF], 0);
    assert_eq!(tokens.next(), Token::opaque(&[0, 0, 0, 0, 0, 0, 1, 0]));
    assert_eq!(tokens.next(), Token::opaque(&[0, 0, 0, 0, 0, 0, 1, 1]));
  }

  #[test]
  fn token_counter_reseeds_on_overflow() {
    let mut tokens = TokenSequence::resume([0xFF; 8], 0);
    let reseeded = tokens.next();
    assert_ne!(reseeded, Token::opaque(&[0; 8]));
    assert_eq!(reseeded.len(), 8);
  }
}
