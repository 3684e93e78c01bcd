use std::sync::Arc;

use no_std_net::SocketAddr;

use crate::net::Socket;
use crate::session::Session;

/// One admitted peer: its session over the shared listening socket,
/// a growable reassembly buffer with a consumed offset, and an idle
/// clock.
pub(crate) struct Peer<S: Socket> {
  pub(crate) session: Session<S>,
  pub(crate) buf: Vec<u8>,
  pub(crate) consumed: usize,
  pub(crate) idle_ms: u64,
}

impl<S: Socket> std::fmt::Debug for Peer<S> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Peer")
     .field("buf", &self.buf)
     .field("consumed", &self.consumed)
     .field("idle_ms", &self.idle_ms)
     .finish_non_exhaustive()
  }
}

impl<S: Socket> Peer<S> {
  pub(crate) fn new(sock: Arc<S>, addr: SocketAddr) -> Self {
    Self { session: Session::from_shared(sock, addr),
           buf: Vec::new(),
           consumed: 0,
           idle_ms: 0 }
  }

  pub(crate) fn addr(&self) -> SocketAddr {
    self.session.peer()
  }
}

/// Fixed-capacity slot arena for peers, indexed by slot number.
///
/// Lookup by address is a bounded linear scan; a freed slot is just
/// `None` waiting to be reused.
pub(crate) struct PeerTable<S: Socket> {
  slots: Vec<Option<Peer<S>>>,
}

impl<S: Socket> PeerTable<S> {
  pub(crate) fn new(capacity: usize) -> Self {
    Self { slots: (0..capacity).map(|_| None).collect() }
  }

  pub(crate) fn find(&self, addr: SocketAddr) -> Option<usize> {
    self.slots
        .iter()
        .position(|slot| slot.as_ref().map(|p| p.addr() == addr).unwrap_or(false))
  }

  pub(crate) fn has_vacancy(&self) -> bool {
    self.slots.iter().any(Option::is_none)
  }

  /// Claim a free slot, handing the peer back if the table is full.
  pub(crate) fn insert(&mut self, peer: Peer<S>) -> Result<usize, Peer<S>> {
    match self.slots.iter().position(Option::is_none) {
      | Some(ix) => {
        self.slots[ix] = Some(peer);
        Ok(ix)
      },
      | None => Err(peer),
    }
  }

  pub(crate) fn get_mut(&mut self, ix: usize) -> Option<&mut Peer<S>> {
    self.slots.get_mut(ix).and_then(Option::as_mut)
  }

  pub(crate) fn remove(&mut self, ix: usize) -> Option<Peer<S>> {
    self.slots.get_mut(ix).and_then(Option::take)
  }

  pub(crate) fn occupied(&mut self) -> impl Iterator<Item = (usize, &mut Peer<S>)> {
    self.slots
        .iter_mut()
        .enumerate()
        .filter_map(|(ix, slot)| slot.as_mut().map(|p| (ix, p)))
  }

  pub(crate) fn len(&self) -> usize {
    self.slots.iter().filter(|s| s.is_some()).count()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::test::SockMock;

  fn addr(n: u8) -> SocketAddr {
    format!("10.0.0.{}:5683", n).parse().unwrap()
  }

  fn peer(n: u8) -> Peer<SockMock> {
    Peer::new(Arc::new(SockMock::new()), addr(n))
  }

  #[test]
  fn bounded_insert_and_lookup() {
    let mut table = PeerTable::new(2);

    let a = table.insert(peer(1)).unwrap();
    let b = table.insert(peer(2)).unwrap();
    assert_ne!(a, b);
    assert!(table.insert(peer(3)).is_err());

    assert_eq!(table.find(addr(2)), Some(b));
    assert_eq!(table.find(addr(9)), None);
    assert_eq!(table.len(), 2);
    assert!(!table.has_vacancy());
  }

  #[test]
  fn freed_slots_are_reused() {
    let mut table = PeerTable::new(2);

    let a = table.insert(peer(1)).unwrap();
    table.insert(peer(2)).unwrap();
    table.remove(a);

    assert!(table.has_vacancy());
    let c = table.insert(peer(3)).unwrap();
    assert_eq!(c, a);
    assert_eq!(table.find(addr(3)), Some(c));
  }
}
