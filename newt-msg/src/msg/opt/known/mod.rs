//! The subset of the IANA option-number registry this crate knows
//! how to interpret.

use crate::OptNumber;

/// Block transfer options
pub mod block;
pub use block::Block;

/// Content-Format values
pub mod content_format;
pub use content_format::*;

/// Observe option values
pub mod observe;

/// Uri-Host; the hostname of the resource being requested
pub const HOST: OptNumber = OptNumber(3);

/// Observe; registers/deregisters interest in a resource, or carries a
/// notification sequence number (see [`observe::Action`])
pub const OBSERVE: OptNumber = OptNumber(6);

/// Uri-Port; the port of the resource being requested
pub const PORT: OptNumber = OptNumber(7);

/// Uri-Path; one option per path segment
pub const PATH: OptNumber = OptNumber(11);

/// Content-Format; how the payload should be interpreted
/// (see [`ContentFormat`])
pub const CONTENT_FORMAT: OptNumber = OptNumber(12);

/// Max-Age; seconds a response may be cached, and the
/// freshness window for Observe notifications
pub const MAX_AGE: OptNumber = OptNumber(14);

/// Uri-Query; one option per query parameter
pub const QUERY: OptNumber = OptNumber(15);

/// Block2; blockwise transfer control for the response body
/// (see [`Block`])
pub const BLOCK2: OptNumber = OptNumber(23);

/// Block1; blockwise transfer control for the request body
/// (see [`Block`])
pub const BLOCK1: OptNumber = OptNumber(27);

/// Proxy-Uri; absolute URI for a forward-proxy to dereference
pub const PROXY_URI: OptNumber = OptNumber(35);

/// Size1; total size of the request body, advertised alongside Block1
pub const SIZE1: OptNumber = OptNumber(60);
