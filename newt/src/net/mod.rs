use std::io;
use std::net::UdpSocket;

use no_std_net::SocketAddr;

pub(crate) mod convert;

/// Data that came from (or is headed to) a network socket
#[derive(PartialEq, PartialOrd, Eq, Ord, Hash, Debug, Clone, Copy)]
pub struct Addrd<T>(pub T, pub SocketAddr);

impl<T> Addrd<T> {
  /// Borrow the contents of this Addressed
  pub fn as_ref(&self) -> Addrd<&T> {
    Addrd(self.data(), self.addr())
  }

  /// Discard the socket address and get the data in this Addressed
  pub fn unwrap(self) -> T {
    self.0
  }

  /// Map the data contained in this Addressed
  pub fn map<R>(self, f: impl FnOnce(T) -> R) -> Addrd<R> {
    Addrd(f(self.0), self.1)
  }

  /// Borrow the contents of the addressed item
  pub fn data(&self) -> &T {
    &self.0
  }

  /// Copy the socket address for the data
  pub fn addr(&self) -> SocketAddr {
    self.1
  }
}

/// A CoAP network socket
///
/// This mirrors the UDP socket in `std::net` closely enough
/// that `std::net::UdpSocket` implements it directly, while staying
/// narrow enough to mock in tests.
///
/// All operations are non-blocking; "nothing there yet" is
/// [`nb::Error::WouldBlock`] and the caller owns the waiting.
pub trait Socket: Sized + Send + Sync + 'static {
  /// The error yielded by socket operations
  type Error: core::fmt::Debug;

  /// Bind a non-blocking socket to a local address.
  ///
  /// If the address is a multicast address, implementors should
  /// also join that group.
  fn bind(addr: SocketAddr) -> Result<Self, Self::Error>;

  /// Get the local address this socket was bound to
  fn local_addr(&self) -> SocketAddr;

  /// Send a datagram to a remote address
  fn send(&self, msg: Addrd<&[u8]>) -> nb::Result<(), Self::Error>;

  /// Pull a buffered datagram from the socket, along with the
  /// address of the sender, clearing it from the receive queue.
  ///
  /// Datagrams larger than `buffer` are truncated, not errors.
  fn recv(&self, buffer: &mut [u8]) -> nb::Result<Addrd<usize>, Self::Error>;

  /// Look at the datagram at the head of the receive queue without
  /// clearing it.
  fn peek(&self, buffer: &mut [u8]) -> nb::Result<Addrd<usize>, Self::Error>;

  /// Who sent the datagram at the head of the receive queue?
  fn peek_addr(&self) -> nb::Result<SocketAddr, Self::Error> {
    self.peek(&mut []).map(|Addrd(_, addr)| addr)
  }

  /// Join a multicast group
  fn join_multicast(&self, addr: no_std_net::IpAddr) -> Result<(), Self::Error>;

  /// Does this error mean the peer slammed the door on us?
  /// (e.g. an ICMP port-unreachable surfaced as a connection reset)
  fn is_reset(_e: &Self::Error) -> bool {
    false
  }
}

impl Socket for UdpSocket {
  type Error = io::Error;

  fn bind(addr: SocketAddr) -> Result<Self, Self::Error> {
    let addr = std::net::SocketAddr::from(convert::no_std::SockAddr(addr));
    let sock = UdpSocket::bind(addr)?;
    sock.set_nonblocking(true)?;

    if addr.ip().is_multicast() {
      Socket::join_multicast(&sock, convert::std::Ip(addr.ip()).into())?;
    }

    Ok(sock)
  }

  fn local_addr(&self) -> SocketAddr {
    UdpSocket::local_addr(self).map(|a| convert::std::SockAddr(a).into())
                               .unwrap_or_else(|_| {
                                 SocketAddr::new(no_std_net::IpAddr::V4(no_std_net::Ipv4Addr::new(0, 0, 0, 0)), 0)
                               })
  }

  fn send(&self, msg: Addrd<&[u8]>) -> nb::Result<(), Self::Error> {
    let addr = std::net::SocketAddr::from(convert::no_std::SockAddr(msg.addr()));
    self.send_to(msg.data(), addr)
        .map(|_| ())
        .map_err(convert::io_to_nb)
  }

  fn recv(&self, buffer: &mut [u8]) -> nb::Result<Addrd<usize>, Self::Error> {
    self.recv_from(buffer)
        .map(|(n, addr)| Addrd(n, convert::std::SockAddr(addr).into()))
        .map_err(convert::io_to_nb)
  }

  fn peek(&self, buffer: &mut [u8]) -> nb::Result<Addrd<usize>, Self::Error> {
    self.peek_from(buffer)
        .map(|(n, addr)| Addrd(n, convert::std::SockAddr(addr).into()))
        .map_err(convert::io_to_nb)
  }

  fn join_multicast(&self, addr: no_std_net::IpAddr) -> Result<(), Self::Error> {
    match std::net::IpAddr::from(convert::no_std::Ip(addr)) {
      | std::net::IpAddr::V4(addr) => {
        self.join_multicast_v4(&addr, &std::net::Ipv4Addr::UNSPECIFIED)
      },
      | std::net::IpAddr::V6(addr) => self.join_multicast_v6(&addr, 0),
    }
  }

  fn is_reset(e: &Self::Error) -> bool {
    e.kind() == io::ErrorKind::ConnectionReset
  }
}

/// Hostname-to-address resolution, as consumed by the client engine.
///
/// The surrounding system supplies the real resolver (and whatever
/// address caching it wants); [`StdResolver`] is the plain
/// `std::net` one.
pub trait Resolve {
  /// Resolve `host` to the addresses it answers on, most
  /// preferred first.
  fn resolve(&self, host: &str, port: u16) -> Result<Vec<SocketAddr>, &'static str>;
}

/// [`Resolve`] via [`std::net::ToSocketAddrs`]
#[derive(Debug, Clone, Copy, Default)]
pub struct StdResolver;

impl Resolve for StdResolver {
  fn resolve(&self, host: &str, port: u16) -> Result<Vec<SocketAddr>, &'static str> {
    use std::net::ToSocketAddrs;

    // parse literals without hitting the system resolver
    if let Ok(ip) = host.parse::<std::net::IpAddr>() {
      return Ok(vec![convert::std::SockAddr(std::net::SocketAddr::new(ip, port)).into()]);
    }

    (host, port).to_socket_addrs()
                .map_err(|_| "hostname did not resolve")
                .map(|addrs| {
                  addrs.map(|a| convert::std::SockAddr(a).into())
                       .collect()
                })
  }
}

/// Helper constants and functions for creating multicast addresses
pub mod multicast {
  use no_std_net::{Ipv4Addr, SocketAddr, SocketAddrV4};

  /// IPv4 "All CoAP devices" multicast address.
  pub const ALL_COAP_DEVICES_IP: Ipv4Addr = Ipv4Addr::new(224, 0, 1, 187);

  /// Create a SocketAddr (IP + port) with the [`ALL_COAP_DEVICES_IP`] address
  pub const fn all_coap_devices(port: u16) -> SocketAddr {
    SocketAddr::V4(SocketAddrV4::new(ALL_COAP_DEVICES_IP, port))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn resolves_ip_literals() {
    let addrs = StdResolver.resolve("127.0.0.1", 5683).unwrap();
    assert_eq!(addrs,
               vec!["127.0.0.1:5683".parse::<SocketAddr>().unwrap()]);
  }

  #[test]
  fn addrd_maps() {
    let addr: SocketAddr = "10.0.0.1:5683".parse().unwrap();
    let a = Addrd(2u8, addr).map(|n| n * 2);
    assert_eq!(a.data(), &4);
    assert_eq!(a.addr(), addr);
  }
}
