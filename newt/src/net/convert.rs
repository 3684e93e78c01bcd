//! Newtype bridges between `no_std_net` and `std::net` address types.
//!
//! Rust's orphan rules keep us from implementing `From` between two
//! foreign types directly, hence the thin wrappers.

use ::std::io;

pub(crate) fn io_to_nb(err: io::Error) -> nb::Error<io::Error> {
  match err.kind() {
    | io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => nb::Error::WouldBlock,
    | _ => nb::Error::Other(err),
  }
}

pub(crate) mod no_std {
  #[derive(Copy, Clone, Debug)]
  pub(crate) struct Ip(pub(crate) no_std_net::IpAddr);

  #[derive(Copy, Clone, Debug)]
  pub(crate) struct SockAddr(pub(crate) no_std_net::SocketAddr);

  impl From<Ip> for std::net::IpAddr {
    fn from(Ip(ip): Ip) -> Self {
      match ip {
        | no_std_net::IpAddr::V4(v4) => {
          std::net::IpAddr::V4(std::net::Ipv4Addr::from(v4.octets()))
        },
        | no_std_net::IpAddr::V6(v6) => {
          std::net::IpAddr::V6(std::net::Ipv6Addr::from(v6.segments()))
        },
      }
    }
  }

  impl From<SockAddr> for std::net::SocketAddr {
    fn from(SockAddr(addr): SockAddr) -> Self {
      std::net::SocketAddr::new(Ip(addr.ip()).into(), addr.port())
    }
  }
}

pub(crate) mod std {
  #[derive(Copy, Clone, Debug)]
  pub(crate) struct Ip(pub(crate) ::std::net::IpAddr);

  #[derive(Copy, Clone, Debug)]
  pub(crate) struct SockAddr(pub(crate) ::std::net::SocketAddr);

  impl From<Ip> for no_std_net::IpAddr {
    fn from(Ip(ip): Ip) -> Self {
      match ip {
        | ::std::net::IpAddr::V4(v4) => {
          let [a, b, c, d] = v4.octets();
          no_std_net::IpAddr::V4(no_std_net::Ipv4Addr::new(a, b, c, d))
        },
        | ::std::net::IpAddr::V6(v6) => {
          let [a, b, c, d, e, f, g, h] = v6.segments();
          no_std_net::IpAddr::V6(no_std_net::Ipv6Addr::new(a, b, c, d, e, f, g, h))
        },
      }
    }
  }

  impl From<SockAddr> for no_std_net::SocketAddr {
    fn from(SockAddr(addr): SockAddr) -> Self {
      no_std_net::SocketAddr::new(Ip(addr.ip()).into(), addr.port())
    }
  }
}

#[cfg(test)]
mod tests {
  #[test]
  fn round_trips() {
    let there: ::std::net::SocketAddr =
      super::no_std::SockAddr("10.1.2.3:5683".parse().unwrap()).into();
    assert_eq!(there, "10.1.2.3:5683".parse::<::std::net::SocketAddr>().unwrap());

    let back: no_std_net::SocketAddr = super::std::SockAddr(there).into();
    assert_eq!(back, "10.1.2.3:5683".parse::<no_std_net::SocketAddr>().unwrap());
  }
}
