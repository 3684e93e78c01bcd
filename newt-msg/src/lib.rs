//! Low-level representation of CoAP messages.
//!
//! The most notable item in `newt_msg` is [`Message`]: a CoAP message
//! kept very close to the actual byte layout described by
//! [RFC7252 section 3](https://datatracker.ietf.org/doc/html/rfc7252#section-3).
//!
//! The codec here is fully stateless; parsing never borrows anything
//! longer than the call, and serializing writes into a caller-provided
//! buffer (or a fresh `Vec` if you don't care). This is what lets the
//! same code serve both the client and server halves of the runtime,
//! and what makes the round-trip properties easy to test in isolation.
//!
//! ## Options
//! Options are stored sorted by their [`OptNumber`]; the wire delta
//! encoding is computed at serialization time and folded back into
//! absolute numbers at parse time, so user code never sees a delta.

#![cfg_attr(not(test), forbid(unreachable_pub))]
#![cfg_attr(not(test), deny(missing_copy_implementations))]
#![deny(missing_docs)]
#![deny(missing_debug_implementations)]

mod cursor;

#[doc(hidden)]
pub mod from_bytes;

/// Message structs
pub mod msg;

#[doc(hidden)]
pub mod to_bytes;

pub use cursor::Cursor;
#[doc(inline)]
pub use from_bytes::TryFromBytes;
#[doc(inline)]
pub use msg::*;
#[doc(inline)]
pub use to_bytes::{MessageToBytesError, TryIntoBytes};

#[cfg(test)]
pub(crate) fn test_msg() -> (Message, Vec<u8>) {
  let header: [u8; 4] = 0b0100_0001_0100_0101_0000_0000_0000_0001_u32.to_be_bytes();
  let token: [u8; 1] = [254u8];
  let content_format: &[u8] = b"application/json";
  let options: [&[u8]; 2] = [&[0b_1100_1101u8, 0b00000011u8], content_format];
  let payload: [&[u8]; 2] = [&[0b1111_1111_u8], b"hello, world!"];
  let bytes = [header.as_ref(),
               token.as_ref(),
               options.concat().as_ref(),
               payload.concat().as_ref()].concat();

  let mut msg = Message { id: Id(1),
                          ty: Type::Con,
                          ver: Version(1),
                          token: Token(tinyvec::array_vec!([u8; 8] => 254)),
                          code: Code { class: 2,
                                       detail: 5 },
                          opts: Vec::new(),
                          payload: Payload(b"hello, world!".to_vec()) };
  msg.set(opt::known::CONTENT_FORMAT, OptValue(content_format.to_vec()));
  (msg, bytes)
}

#[cfg(test)]
pub(crate) mod tests {
  /// Assert two values are equal, printing both in binary on mismatch.
  #[macro_export]
  macro_rules! assert_eqb {
    ($actual:expr, $expected:expr) => {
      if $actual != $expected {
        panic!("expected {:08b} to equal {:08b}", $actual, $expected)
      }
    };
  }

  /// Assert two byte iterators are equal, printing both in binary on mismatch.
  #[macro_export]
  macro_rules! assert_eqb_iter {
    ($actual:expr, $expected:expr) => {
      if $actual.iter().ne($expected.iter()) {
        panic!("expected {:?} to equal {:?}",
               $actual.into_iter()
                      .map(|b| format!("{:08b}", b))
                      .collect::<Vec<_>>(),
               $expected.into_iter()
                        .map(|b| format!("{:08b}", b))
                        .collect::<Vec<_>>())
      }
    };
  }
}
