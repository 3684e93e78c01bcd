//! The per-relation background loop of the Observe extension.
//!
//! Every registered relation owns its own [`Session`] and runs on
//! its own task; relations never touch the engine's single
//! in-flight-request slot and never synchronize with each other
//! (each persists into its own store slot).

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use embedded_time::duration::Milliseconds;
use embedded_time::Instant;

use newt_msg::{CodeKind, Id, Message, TryFromBytes, Type};

use crate::logging;
use crate::resp::Resp;
use crate::session::{Recv, Session};
use crate::store::{key, CloseFn, NotifyFn, RelationRecord, Store};
use crate::time::{millis_between, Clock, Millis, Timeout};

/// How long one loop pass waits for a notification before checking
/// the termination flag and the staleness deadline again.
const RECV_SLICE: Timeout = Timeout::Millis(500);

/// Slack added to Max-Age before a quiet relation is declared stale.
const CLOSE_MARGIN: Millis = Milliseconds(5_000);

/// Fallback freshness window when a notification carries no Max-Age.
const DEFAULT_MAX_AGE_SECS: u64 = 60;

/// Lifecycle of one Observe relation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RelationStatus {
  /// Initial GET sent, no confirmation yet
  Requested = 0,
  /// The server accepted the registration; notifications flow
  Active = 1,
  /// Someone asked the relation to die; its task will notice at the
  /// top of its next loop pass
  TerminateRequested = 2,
  /// The task has exited and sent its parting RST (if it could)
  Terminated = 3,
}

impl RelationStatus {
  pub(crate) fn from_u8(n: u8) -> Self {
    match n {
      | 0 => RelationStatus::Requested,
      | 1 => RelationStatus::Active,
      | 2 => RelationStatus::TerminateRequested,
      | _ => RelationStatus::Terminated,
    }
  }
}

/// State shared between a relation's task and the engine that owns
/// it.
#[derive(Debug)]
pub(crate) struct Shared {
  status: AtomicU8,
  last_id: Mutex<Option<Id>>,
}

impl Shared {
  pub(crate) fn new(status: RelationStatus, last_id: Option<Id>) -> Self {
    Self { status: AtomicU8::new(status as u8),
           last_id: Mutex::new(last_id) }
  }

  pub(crate) fn status(&self) -> RelationStatus {
    RelationStatus::from_u8(self.status.load(Ordering::SeqCst))
  }

  pub(crate) fn set_status(&self, status: RelationStatus) {
    self.status.store(status as u8, Ordering::SeqCst);
  }

  fn last_id(&self) -> Option<Id> {
    *self.last_id.lock().unwrap_or_else(|e| e.into_inner())
  }

  fn set_last_id(&self, id: Id) {
    *self.last_id.lock().unwrap_or_else(|e| e.into_inner()) = Some(id);
  }
}

/// An Observe relation's engine-side handle.
#[allow(missing_debug_implementations)]
pub struct Relation {
  pub(crate) shared: Arc<Shared>,
  pub(crate) task: Option<JoinHandle<()>>,
}

impl Relation {
  /// Where the relation currently is in its lifecycle
  pub fn status(&self) -> RelationStatus {
    self.shared.status()
  }

  /// Flag the relation for termination and wait for its task to
  /// reach [`RelationStatus::Terminated`]. Bounded by the task's
  /// in-flight recv timeout.
  pub(crate) fn terminate_and_join(&mut self) {
    if self.shared.status() != RelationStatus::Terminated {
      self.shared.set_status(RelationStatus::TerminateRequested);
    }

    if let Some(task) = self.task.take() {
      let _ = task.join();
    }
  }
}

/// Everything a relation's task needs, moved onto it at spawn.
pub(crate) struct LoopEnv<S: crate::net::Socket, C: Clock> {
  pub(crate) session: Session<S>,
  pub(crate) clock: C,
  pub(crate) shared: Arc<Shared>,
  pub(crate) notify: NotifyFn,
  pub(crate) close: CloseFn,
  pub(crate) store: Option<Arc<dyn Store>>,
  pub(crate) slot: usize,
  pub(crate) record: RelationRecord,
}

impl<S: crate::net::Socket, C: Clock> LoopEnv<S, C> {
  fn persist(&mut self) {
    let store = match &self.store {
      | Some(store) => store,
      | None => return,
    };

    self.record.state = RelationStatus::Active as u8;
    self.record.msg_id = self.shared.last_id().map(|id| id.0).unwrap_or(0);

    if let Err(e) = store.put(&key::relation(self.slot), &self.record.encode()) {
      log::warn!("observe[{}]: failed to persist slot: {}", self.slot, e);
    }

    #[cfg(feature = "secure")]
    self.session.save(store.as_ref(), &key::relation_dtls(self.slot));
  }

  fn forget(&self) {
    if let Some(store) = &self.store {
      let _ = store.remove(&key::relation(self.slot));
      let _ = store.remove(&key::relation_dtls(self.slot));
    }
  }
}

/// The background loop of one relation. Runs until the status flag
/// says `TerminateRequested`, the server cancels us, or the relation
/// goes stale past its freshness window.
pub(crate) fn run_loop<S, C>(mut env: LoopEnv<S, C>)
  where S: crate::net::Socket,
        C: Clock
{
  let mut buf = [0u8; 1152];
  let mut max_age: Option<u64> = None;
  // (armed at, freshness window in milliseconds)
  let mut staleness: Option<(Instant<C>, u64)> = None;
  let slot = env.slot;

  // the relation survives a power cycle from whatever we last wrote
  env.persist();

  loop {
    if env.shared.status() == RelationStatus::TerminateRequested {
      let id = env.shared.last_id().unwrap_or(Id(0));
      let rst = Message::new(Type::Reset, newt_msg::Code::new(0, 0), id, newt_msg::Token::default());
      send_msg(&mut env.session, &rst);

      env.shared.set_status(RelationStatus::Terminated);
      env.forget();
      log::debug!("observe[{}]: terminated on request", slot);
      (env.close)();
      return;
    }

    let recvd = match env.session.recv(&env.clock, RECV_SLICE, &mut buf) {
      | Ok(recvd) => recvd,
      | Err(e) => {
        log::error!("observe[{}]: transport died: {:?}", slot, e.what);
        finish(&mut env, slot);
        return;
      },
    };

    match recvd {
      | Recv::NoData => {
        let now = match env.clock.try_now() {
          | Ok(now) => now,
          | Err(_) => continue,
        };

        if let Some((armed_at, window)) = staleness {
          if millis_between(armed_at, now).0 > window {
            log::info!("observe[{}]: no notification within max-age, closing", slot);
            finish(&mut env, slot);
            return;
          }
        }
      },

      | Recv::PeerClosed | Recv::Reset => {
        log::info!("observe[{}]: peer went away", slot);
        finish(&mut env, slot);
        return;
      },

      | Recv::Data(n) => {
        let msg = match Message::try_from_bytes(&buf[..n]) {
          | Ok(msg) => msg,
          | Err(e) => {
            log::warn!("observe[{}]: dropping malformed datagram: {:?}", slot, e);
            continue;
          },
        };

        // single-slot duplicate suppression
        if env.shared.last_id() == Some(msg.id) {
          log::trace!("observe[{}]: duplicate {:?} ignored", slot, msg.id);
          continue;
        }

        // an RST that carries no Observe context means the server
        // cancelled the relation
        if msg.ty == Type::Reset {
          log::info!("observe[{}]: server cancelled the relation", slot);
          finish(&mut env, slot);
          return;
        }

        if msg.code.kind() != CodeKind::Response {
          continue;
        }

        // confirmable notifications want their ACK before anything else
        if msg.ty == Type::Con {
          send_msg(&mut env.session, &msg.ack());
        }

        env.shared.set_last_id(msg.id);

        let resp = Resp::from(msg);
        log::trace!("observe[{}]: {}", slot, logging::msg_summary(resp.msg()));

        if max_age.is_none() {
          max_age = Some(resp.max_age().unwrap_or(DEFAULT_MAX_AGE_SECS));
        }

        // every accepted notification restarts the freshness window
        if let Ok(now) = env.clock.try_now() {
          let window = max_age.unwrap_or(DEFAULT_MAX_AGE_SECS) * 1_000 + CLOSE_MARGIN.0;
          staleness = Some((now, window));
        }

        (env.notify)(&resp);
        env.persist();
      },
    }
  }
}

fn finish<S: crate::net::Socket, C: Clock>(env: &mut LoopEnv<S, C>, slot: usize) {
  env.shared.set_status(RelationStatus::Terminated);
  env.forget();
  log::debug!("observe[{}]: relation closed", slot);
  (env.close)();
}

fn send_msg<S: crate::net::Socket>(session: &mut Session<S>, msg: &Message) {
  let mut buf = [0u8; 64];
  if let Ok(n) = msg.encode(&mut buf) {
    if let Err(e) = session.send(&buf[..n]) {
      log::warn!("observe: send failed: {:?}", e.what);
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn status_from_u8() {
    assert_eq!(RelationStatus::from_u8(0), RelationStatus::Requested);
    assert_eq!(RelationStatus::from_u8(1), RelationStatus::Active);
    assert_eq!(RelationStatus::from_u8(2), RelationStatus::TerminateRequested);
    assert_eq!(RelationStatus::from_u8(3), RelationStatus::Terminated);
    assert_eq!(RelationStatus::from_u8(200), RelationStatus::Terminated);
  }
}
