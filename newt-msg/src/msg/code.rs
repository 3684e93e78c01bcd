/// # Message Code
///
/// The message code splits into a 3-bit class and 5-bit detail,
/// customarily written `c.dd` (e.g. `2.05` Content, `4.04` Not Found).
///
/// ```
/// use newt_msg::Code;
/// assert_eq!(Code { class: 2, detail: 5 }.to_string(), "2.05".to_string())
/// ```
#[derive(Copy, Clone, Hash, PartialEq, Eq, PartialOrd, Ord, Debug, Default)]
pub struct Code {
  /// The "class" of message codes identify it as a request or response, and provides the class of response status:
  ///
  /// |class|meaning|
  /// |---|---|
  /// |`0`|Message is a request (or empty)|
  /// |`2`|Message is a success response|
  /// |`4`|Message is a client error response|
  /// |`5`|Message is a server error response|
  pub class: u8,

  /// 2-digit integer (range `[0, 32)`) that provides granular information about the response status.
  ///
  /// Will always be `0` for requests.
  pub detail: u8,
}

/// Whether a code identifies an empty message, a request, or a response.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum CodeKind {
  /// `0.00`; an empty CON (ping), ACK or RST
  Empty,
  /// Class 0 with nonzero detail; a method code
  Request,
  /// Class 2, 4 or 5; a status code
  Response,
}

impl Code {
  /// Create a new Code
  ///
  /// ```
  /// use newt_msg::Code;
  ///
  /// let content = Code::new(2, 05);
  /// ```
  pub const fn new(class: u8, detail: u8) -> Self {
    Self { class, detail }
  }

  /// Is this code empty, a method, or a status?
  pub fn kind(&self) -> CodeKind {
    match (self.class, self.detail) {
      | (0, 0) => CodeKind::Empty,
      | (0, _) => CodeKind::Request,
      | _ => CodeKind::Response,
    }
  }

  /// Get the human string representation of a message code
  ///
  /// ```
  /// use newt_msg::Code;
  ///
  /// let code = Code { class: 2, detail: 5 };
  /// assert_eq!(String::from_iter(code.to_human()), "2.05");
  /// ```
  pub fn to_human(&self) -> [char; 4] {
    let to_char = |d: u8| char::from_digit(d.into(), 10).unwrap_or('?');
    [to_char(self.class),
     '.',
     to_char(self.detail / 10),
     to_char(self.detail % 10)]
  }
}

impl core::fmt::Display for Code {
  fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
    let [a, b, c, d] = self.to_human();
    write!(f, "{}{}{}{}", a, b, c, d)
  }
}

impl From<u8> for Code {
  fn from(b: u8) -> Self {
    let class = b >> 5;
    let detail = b & 0b00011111;

    Code { class, detail }
  }
}

impl From<Code> for u8 {
  fn from(code: Code) -> u8 {
    let class = code.class << 5;
    let detail = code.detail;

    class | detail
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::assert_eqb;

  #[test]
  fn parse_code() {
    let byte = 0b_01_000101u8;
    let code = Code::from(byte);
    assert_eq!(code, Code { class: 2, detail: 5 })
  }

  #[test]
  fn serialize_code() {
    let code = Code { class: 2,
                      detail: 5 };
    let actual: u8 = code.into();
    let expected = 0b_010_00101u8;
    assert_eqb!(actual, expected)
  }

  #[test]
  fn kinds() {
    assert_eq!(Code::new(0, 0).kind(), CodeKind::Empty);
    assert_eq!(Code::new(0, 1).kind(), CodeKind::Request);
    assert_eq!(Code::new(2, 5).kind(), CodeKind::Response);
    assert_eq!(Code::new(4, 4).kind(), CodeKind::Response);
  }
}
