//! `newt` is a CoAP protocol engine for constrained, low-power
//! devices: a blocking client with retransmission, blockwise
//! transfer and power-cycle-surviving Observe subscriptions, and a
//! bounded multi-peer server, both optionally secured with DTLS.
//!
//! ## CoAP
//! CoAP copies the semantics of HTTP onto budget hardware: the same
//! verbs (GET, POST, PUT, DELETE), options instead of headers, and
//! response status codes with familiar classes (2.xx/4.xx/5.xx),
//! all over UDP datagrams small enough for a constrained radio.
//!
//! Because UDP guarantees nothing, the engine carries the protocol
//! machinery HTTP outsources to TCP: confirmable messages with
//! exponential retransmission ([`retry`]), duplicate detection by
//! message id, and blockwise reassembly of bodies too big for one
//! datagram ([RFC 7959](https://www.rfc-editor.org/rfc/rfc7959)).
//!
//! ## Layout
//! - [`newt_msg`](../newt_msg/index.html) (separate crate): the
//!   stateless wire codec.
//! - [`net`]: the [`Socket`](net::Socket) abstraction, address
//!   types, resolution.
//! - [`session`]: one peer conversation (socket + optional DTLS +
//!   timers).
//! - [`client`]: the blocking request engine and Observe relations.
//! - [`server`]: the cooperative multi-peer serve loop.
//! - [`store`]: the suspend/resume persistence adapter.

#![allow(clippy::unused_unit)]
#![deny(missing_docs)]
#![deny(missing_debug_implementations)]
#![cfg_attr(not(test), deny(unsafe_code))]
#![cfg_attr(not(test), warn(unreachable_pub))]

#[cfg(test)]
pub(crate) mod test;

pub(crate) mod logging;

/// blocking CoAP client & Observe relations
pub mod client;

/// customizable retrying of fallible operations
pub mod retry;

/// responses
pub mod resp;

/// requests
pub mod req;

/// engine errors
pub mod error;

/// network abstractions
pub mod net;

/// one-peer transport sessions
pub mod session;

/// multi-peer server engine
pub mod server;

/// suspend/resume persistence
pub mod store;

/// DTLS glue
#[cfg(feature = "secure")]
pub mod secure;

/// time abstractions
pub mod time;

/// configuring runtime behavior
pub mod config;

pub use client::Client;
pub use config::{Config, ServerConfig};
pub use error::{Error, ResultExt, What, When};
pub use server::Server;
