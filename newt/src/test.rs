#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use embedded_time::rate::Fraction;
use embedded_time::Instant;
use no_std_net::SocketAddr;

use crate::net::{Addrd, Socket};

/// A mocked socket.
///
/// `rx` holds datagrams "the network" has for us (address = sender),
/// `tx` collects whatever we send (address = destination). Clones
/// share both queues, so a test harness keeps a clone and plays the
/// other side of the conversation.
#[derive(Debug)]
pub(crate) struct SockMock {
  pub rx: Arc<Mutex<VecDeque<Addrd<Vec<u8>>>>>,
  pub tx: Arc<Mutex<Vec<Addrd<Vec<u8>>>>>,
  local: SocketAddr,
}

impl Clone for SockMock {
  fn clone(&self) -> Self {
    Self { rx: self.rx.clone(),
           tx: self.tx.clone(),
           local: self.local }
  }
}

impl SockMock {
  pub fn new() -> Self {
    Self { rx: Default::default(),
           tx: Default::default(),
           local: "127.0.0.1:5683".parse().unwrap() }
  }

  pub fn push_rx(&self, dgram: Addrd<Vec<u8>>) {
    self.rx.lock().unwrap().push_back(dgram);
  }

  /// Pop the oldest unconsumed outbound datagram, waiting up to
  /// `timeout` for one to appear.
  pub fn await_tx(&self, timeout: Duration) -> Option<Addrd<Vec<u8>>> {
    let deadline = std::time::Instant::now() + timeout;

    loop {
      {
        let mut tx = self.tx.lock().unwrap();
        if !tx.is_empty() {
          return Some(tx.remove(0));
        }
      }

      if std::time::Instant::now() >= deadline {
        return None;
      }

      std::thread::sleep(Duration::from_millis(1));
    }
  }
}

impl Socket for SockMock {
  type Error = std::io::Error;

  fn bind(addr: SocketAddr) -> Result<Self, Self::Error> {
    let mut sock = Self::new();
    sock.local = addr;
    Ok(sock)
  }

  fn local_addr(&self) -> SocketAddr {
    self.local
  }

  fn send(&self, msg: Addrd<&[u8]>) -> nb::Result<(), Self::Error> {
    self.tx
        .lock()
        .unwrap()
        .push(Addrd(msg.data().to_vec(), msg.addr()));
    Ok(())
  }

  fn recv(&self, buffer: &mut [u8]) -> nb::Result<Addrd<usize>, Self::Error> {
    let mut rx = self.rx.lock().unwrap();

    match rx.pop_front() {
      | Some(Addrd(bytes, addr)) => {
        let n = bytes.len().min(buffer.len());
        buffer[..n].copy_from_slice(&bytes[..n]);
        Ok(Addrd(n, addr))
      },
      | None => Err(nb::Error::WouldBlock),
    }
  }

  fn peek(&self, buffer: &mut [u8]) -> nb::Result<Addrd<usize>, Self::Error> {
    let rx = self.rx.lock().unwrap();

    match rx.front() {
      | Some(Addrd(bytes, addr)) => {
        let n = bytes.len().min(buffer.len());
        buffer[..n].copy_from_slice(&bytes[..n]);
        Ok(Addrd(n, *addr))
      },
      | None => Err(nb::Error::WouldBlock),
    }
  }

  fn join_multicast(&self, _addr: no_std_net::IpAddr) -> Result<(), Self::Error> {
    Ok(())
  }
}

/// A clock whose "now" is whatever the test last
/// [`set`](ClockMock::set) (in milliseconds).
#[derive(Debug, Clone, Default)]
pub(crate) struct ClockMock(Arc<AtomicU64>);

impl ClockMock {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn set(&self, millis: u64) {
    self.0.store(millis, Ordering::SeqCst);
  }
}

impl embedded_time::Clock for ClockMock {
  type T = u64;

  const SCALING_FACTOR: Fraction = Fraction::new(1, 1_000);

  fn try_now(&self) -> Result<Instant<Self>, embedded_time::clock::Error> {
    Ok(Instant::new(self.0.load(Ordering::SeqCst)))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn sockmock_queues_are_shared_between_clones() {
    let a = SockMock::new();
    let b = a.clone();
    let addr: SocketAddr = "10.0.0.1:1111".parse().unwrap();

    Socket::send(&a, Addrd(&[1, 2, 3][..], addr)).unwrap();
    assert_eq!(b.await_tx(Duration::from_millis(10)),
               Some(Addrd(vec![1, 2, 3], addr)));

    b.push_rx(Addrd(vec![9], addr));
    let mut buf = [0u8; 4];
    assert_eq!(Socket::recv(&a, &mut buf).unwrap(), Addrd(1, addr));
    assert_eq!(buf[0], 9);
  }
}
