//! The suspend/resume persistence adapter.
//!
//! The device's low-power store is an opaque key-value blob store
//! that survives a power cycle; [`Store`] is the narrow interface
//! the engine consumes. Writes are best-effort: a failed save is
//! logged and swallowed, a failed restore degrades to starting
//! fresh.
//!
//! Callbacks are never persisted as code references; a relation
//! records a small [`CallbackId`] resolved against the
//! caller-registered [`CallbackTable`] on resume.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use newt_msg::{Cursor, Token};

use crate::resp::Resp;

/// An opaque failure inside the persistence store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreError(pub &'static str);

impl core::fmt::Display for StoreError {
  fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
    write!(f, "store error: {}", self.0)
  }
}

/// A key-value blob store surviving the device's sleep/wake or
/// reboot cycle.
///
/// Implementations must serialize concurrent writers internally;
/// every Observe relation writes its own slot key from its own task.
pub trait Store: Send + Sync {
  /// Write `value` under `key`, replacing any previous value
  fn put(&self, key: &str, value: &[u8]) -> Result<(), StoreError>;

  /// Read the value stored under `key`
  fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

  /// Forget `key`
  fn remove(&self, key: &str) -> Result<(), StoreError>;
}

/// In-memory [`Store`], for tests and hosts without real
/// persistence.
#[derive(Debug, Default)]
pub struct MemStore {
  map: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemStore {
  /// Create an empty store
  pub fn new() -> Self {
    Self::default()
  }
}

impl Store for MemStore {
  fn put(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
    self.map
        .lock()
        .map_err(|_| StoreError("poisoned"))?
        .insert(key.to_string(), value.to_vec());
    Ok(())
  }

  fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
    Ok(self.map
           .lock()
           .map_err(|_| StoreError("poisoned"))?
           .get(key)
           .cloned())
  }

  fn remove(&self, key: &str) -> Result<(), StoreError> {
    self.map
        .lock()
        .map_err(|_| StoreError("poisoned"))?
        .remove(key);
    Ok(())
  }
}

pub(crate) mod key {
  pub(crate) const ENGINE: &str = "client";
  pub(crate) const DTLS_MAIN: &str = "dtls/main";

  pub(crate) fn relation(ix: usize) -> String {
    format!("observe/{}", ix)
  }

  pub(crate) fn relation_dtls(ix: usize) -> String {
    format!("dtls/{}", ix)
  }
}

/// The engine's own counters: the token counter bytes and the next
/// message id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct EngineRecord {
  pub(crate) token: [u8; 8],
  pub(crate) msg_id: u16,
}

impl EngineRecord {
  pub(crate) fn encode(&self) -> Vec<u8> {
    let mut out = Vec::with_capacity(10);
    out.extend(self.token);
    out.extend(self.msg_id.to_be_bytes());
    out
  }

  pub(crate) fn decode(bytes: &[u8]) -> Option<Self> {
    let mut cur = Cursor::new(bytes);
    let mut token = [0u8; 8];
    token.copy_from_slice(cur.take_exact(8)?);
    let msg_id = match cur.take_exact(2)? {
      | &[a, b] => u16::from_be_bytes([a, b]),
      | _ => return None,
    };
    Some(Self { token, msg_id })
  }
}

pub(crate) const URI_MAX: usize = 128;

/// One persisted Observe slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RelationRecord {
  pub(crate) state: u8,
  pub(crate) local_port: u16,
  pub(crate) token: Token,
  pub(crate) msg_id: u16,
  pub(crate) uri: String,
  pub(crate) proxy_uri: Option<String>,
  pub(crate) notify_cb: u16,
  pub(crate) close_cb: u16,
}

impl RelationRecord {
  pub(crate) fn encode(&self) -> Vec<u8> {
    let mut out = Vec::new();
    out.push(self.state);
    out.extend(self.local_port.to_be_bytes());
    out.push(self.token.len() as u8);
    out.extend(self.token.0.as_ref());
    out.extend(self.msg_id.to_be_bytes());

    let uri = &self.uri.as_bytes()[..self.uri.len().min(URI_MAX)];
    out.push(uri.len() as u8);
    out.extend(uri);

    let proxy = self.proxy_uri.as_deref().unwrap_or("").as_bytes();
    let proxy = &proxy[..proxy.len().min(URI_MAX)];
    out.push(proxy.len() as u8);
    out.extend(proxy);

    out.extend(self.notify_cb.to_be_bytes());
    out.extend(self.close_cb.to_be_bytes());
    out
  }

  pub(crate) fn decode(bytes: &[u8]) -> Option<Self> {
    let mut cur = Cursor::new(bytes);
    let u16_of = |bs: &[u8]| match bs {
      | &[a, b] => u16::from_be_bytes([a, b]),
      | _ => 0,
    };

    let state = cur.next()?;
    let local_port = u16_of(cur.take_exact(2)?);

    let tkl = cur.next()? as usize;
    if tkl > 8 {
      return None;
    }
    let token = Token::opaque(cur.take_exact(tkl)?);

    let msg_id = u16_of(cur.take_exact(2)?);

    let uri_len = cur.next()? as usize;
    let uri = String::from_utf8(cur.take_exact(uri_len)?.to_vec()).ok()?;

    let proxy_len = cur.next()? as usize;
    let proxy = String::from_utf8(cur.take_exact(proxy_len)?.to_vec()).ok()?;

    let notify_cb = u16_of(cur.take_exact(2)?);
    let close_cb = u16_of(cur.take_exact(2)?);

    Some(Self { state,
                local_port,
                token,
                msg_id,
                uri,
                proxy_uri: if proxy.is_empty() { None } else { Some(proxy) },
                notify_cb,
                close_cb })
  }
}

/// Invoked with every accepted Observe notification.
pub type NotifyFn = Arc<dyn Fn(&Resp) + Send + Sync>;

/// Invoked exactly once when an Observe relation ends (server
/// cancelled it, it went stale past Max-Age, or it was torn down).
pub type CloseFn = Arc<dyn Fn() + Send + Sync>;

/// Selects an entry in a [`CallbackTable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallbackId(pub u16);

/// The fixed table of Observe callbacks the application registers
/// up front.
///
/// Relations persist only the [`CallbackId`]; after a power cycle
/// the same table (same ids, same code) must be handed back to
/// [`resume`](crate::client::Client::resume).
#[derive(Default)]
pub struct CallbackTable {
  entries: HashMap<u16, (NotifyFn, CloseFn)>,
}

impl core::fmt::Debug for CallbackTable {
  fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
    f.debug_struct("CallbackTable")
     .field("ids", &self.entries.keys().collect::<Vec<_>>())
     .finish()
  }
}

impl CallbackTable {
  /// Create an empty table
  pub fn new() -> Self {
    Self::default()
  }

  /// Register the callback pair for `id`, replacing any previous
  /// registration.
  pub fn register(&mut self, id: CallbackId, notify: NotifyFn, close: CloseFn) {
    self.entries.insert(id.0, (notify, close));
  }

  pub(crate) fn get(&self, id: CallbackId) -> Option<(NotifyFn, CloseFn)> {
    self.entries.get(&id.0).cloned()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn mem_store_round_trips() {
    let store = MemStore::new();
    store.put("k", &[1, 2, 3]).unwrap();
    assert_eq!(store.get("k").unwrap(), Some(vec![1, 2, 3]));
    store.remove("k").unwrap();
    assert_eq!(store.get("k").unwrap(), None);
  }

  #[test]
  fn engine_record_round_trips() {
    let rec = EngineRecord { token: [1, 2, 3, 4, 5, 6, 7, 8],
                             msg_id: 777 };
    assert_eq!(EngineRecord::decode(&rec.encode()), Some(rec));
    assert_eq!(EngineRecord::decode(&[1, 2]), None);
  }

  #[test]
  fn relation_record_round_trips() {
    let rec = RelationRecord { state: 1,
                               local_port: 4444,
                               token: Token::opaque(&[9, 8, 7]),
                               msg_id: 42,
                               uri: "coap://dev.local/sensor".to_string(),
                               proxy_uri: None,
                               notify_cb: 1,
                               close_cb: 2 };
    assert_eq!(RelationRecord::decode(&rec.encode()), Some(rec.clone()));

    let with_proxy = RelationRecord { proxy_uri: Some("coap://far/x".to_string()),
                                      ..rec };
    assert_eq!(RelationRecord::decode(&with_proxy.encode()),
               Some(with_proxy));
  }

  #[test]
  fn oversize_uri_is_truncated_not_fatal() {
    let rec = RelationRecord { state: 1,
                               local_port: 0,
                               token: Token::opaque(&[1]),
                               msg_id: 0,
                               uri: format!("coap://h/{}", "a".repeat(200)),
                               proxy_uri: None,
                               notify_cb: 0,
                               close_cb: 0 };

    let decoded = RelationRecord::decode(&rec.encode()).unwrap();
    assert_eq!(decoded.uri.len(), URI_MAX);
  }
}
