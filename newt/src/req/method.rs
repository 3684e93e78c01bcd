use newt_msg::Code;

/// A request method
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Method {
  /// 0.01
  GET,
  /// 0.02
  POST,
  /// 0.03
  PUT,
  /// 0.04
  DELETE,
}

impl Method {
  /// The method's [`Code`] on the wire
  pub fn code(&self) -> Code {
    match self {
      | Method::GET => Code::new(0, 1),
      | Method::POST => Code::new(0, 2),
      | Method::PUT => Code::new(0, 3),
      | Method::DELETE => Code::new(0, 4),
    }
  }

  /// Parse a method from a request [`Code`]
  pub fn from_code(code: Code) -> Option<Method> {
    match (code.class, code.detail) {
      | (0, 1) => Some(Method::GET),
      | (0, 2) => Some(Method::POST),
      | (0, 3) => Some(Method::PUT),
      | (0, 4) => Some(Method::DELETE),
      | _ => None,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn round_trips() {
    for m in [Method::GET, Method::POST, Method::PUT, Method::DELETE] {
      assert_eq!(Method::from_code(m.code()), Some(m));
    }

    assert_eq!(Method::from_code(Code::new(2, 5)), None);
    assert_eq!(Method::from_code(Code::new(0, 0)), None);
  }
}
