use embedded_time::duration::Milliseconds;

use crate::retry::{Attempts, Strategy};
use crate::time::Millis;

/// Client engine configuration.
///
/// ```
/// use newt::config::Config;
///
/// let cfg = Config::new("coap://device.local/");
/// assert_eq!(cfg.ack_timeout, embedded_time::duration::Milliseconds(2_000));
/// assert_eq!(cfg.max_retransmit, newt::retry::Attempts(4));
/// assert_eq!(cfg.block_szx, 6);
/// ```
#[derive(Debug, Clone)]
pub struct Config {
  /// Target URI the engine talks to (`coap://` or `coaps://`)
  pub uri: String,

  /// Proxy-Uri to attach to outbound requests, passed through
  /// verbatim for a forward-proxy to dereference
  pub proxy_uri: Option<String>,

  /// Send requests confirmably (CON) by default.
  ///
  /// Non-confirmable requests are fire-and-forget except for GET,
  /// which still waits (and retries) so blockwise reads can finish.
  pub confirmable: bool,

  /// How long to wait for a response before the first
  /// retransmission. Successive waits double.
  pub ack_timeout: Millis,

  /// Number of retransmissions of a confirmable request before the
  /// exchange fails with `NoPacket`
  pub max_retransmit: Attempts,

  /// Block1/Block2 size exponent, 1-6; a block holds
  /// `2^(block_szx + 4)` bytes
  pub block_szx: u8,

  /// Seed for the engine's token counter, so two engines on the
  /// same network don't mint the same tokens
  pub token_seed: u16,

  /// Maximum number of concurrently registered Observe relations
  pub max_observe: usize,

  /// DTLS material & handshake knobs; required when `uri` is
  /// `coaps://`
  #[cfg(feature = "secure")]
  pub security: Option<crate::secure::SecurityConfig>,
}

impl Config {
  /// A config with the RFC7252 default transmission parameters,
  /// targeting `uri`.
  pub fn new(uri: impl Into<String>) -> Self {
    Self { uri: uri.into(),
           proxy_uri: None,
           confirmable: true,
           ack_timeout: Milliseconds(2_000),
           max_retransmit: Attempts(4),
           block_szx: 6,
           token_seed: 0,
           max_observe: 4,
           #[cfg(feature = "secure")]
           security: None }
  }

  pub(crate) fn validate(&self) -> Result<(), &'static str> {
    if !(1..=6).contains(&self.block_szx) {
      return Err("block_szx must be 1-6");
    }

    if self.ack_timeout.0 == 0 {
      return Err("ack_timeout must be nonzero");
    }

    if self.max_observe == 0 {
      return Err("max_observe must be nonzero");
    }

    Ok(())
  }

  /// Bytes per block at the configured size exponent.
  pub fn block_size(&self) -> usize {
    1 << (self.block_szx as usize + 4)
  }

  pub(crate) fn con_strategy(&self) -> Strategy {
    Strategy::Exponential { init: self.ack_timeout }
  }

  pub(crate) fn non_strategy(&self) -> Strategy {
    Strategy::Delay { interval: self.ack_timeout }
  }
}

/// Server engine configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
  /// Bound on simultaneously tracked peers; new peers are turned
  /// away while the table is full
  pub max_peers: usize,

  /// Evict a peer that has gone this long without sending anything
  pub max_peer_activity_timeout: Millis,

  /// How long each pass of the cooperative loop sleeps when there
  /// is nothing to do; also the granularity of idle accounting
  pub poll_interval: Millis,

  /// Block2 size exponent used when slicing large response bodies
  /// for clients that don't ask for a specific size
  pub block_szx: u8,

  /// DTLS material for `coaps` service; peers then handshake
  /// (with a stateless cookie round-trip) before being admitted
  #[cfg(feature = "secure")]
  pub security: Option<crate::secure::SecurityConfig>,
}

impl Default for ServerConfig {
  fn default() -> Self {
    Self { max_peers: 8,
           max_peer_activity_timeout: Milliseconds(60_000),
           poll_interval: Milliseconds(50),
           block_szx: 6,
           #[cfg(feature = "secure")]
           security: None }
  }
}
