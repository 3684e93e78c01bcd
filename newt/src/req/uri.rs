/// A parsed `coap://` / `coaps://` URI.
///
/// Only the subset the engine needs: scheme, host, optional port,
/// path segments, query parameters. No userinfo, no fragments, no
/// percent-decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Uri {
  /// Was the scheme `coaps`?
  pub secure: bool,
  /// Hostname or IP literal
  pub host: String,
  /// Port; defaults to 5683 (`coap`) or 5684 (`coaps`)
  pub port: u16,
  /// Path split on `/`, no empty segments
  pub path: Vec<String>,
  /// Query split on `&`, may be empty
  pub query: Vec<String>,
}

impl Uri {
  /// Parse a target URI.
  ///
  /// ```
  /// use newt::req::Uri;
  ///
  /// let uri = Uri::parse("coap://device.local/sensor/temp?unit=c").unwrap();
  /// assert_eq!(uri.host, "device.local");
  /// assert_eq!(uri.port, 5683);
  /// assert_eq!(uri.path, vec!["sensor", "temp"]);
  /// assert_eq!(uri.query, vec!["unit=c"]);
  /// ```
  pub fn parse(s: &str) -> Result<Self, &'static str> {
    let (secure, rest) = if let Some(rest) = s.strip_prefix("coap://") {
      (false, rest)
    } else if let Some(rest) = s.strip_prefix("coaps://") {
      (true, rest)
    } else {
      return Err("scheme must be coap:// or coaps://");
    };

    let (authority, rest) = match rest.find('/') {
      | Some(ix) => (&rest[..ix], &rest[ix + 1..]),
      | None => (rest, ""),
    };

    if authority.is_empty() {
      return Err("missing host");
    }

    let (host, port) = match authority.rsplit_once(':') {
      | Some((host, port)) if !host.is_empty() => {
        (host, port.parse::<u16>().map_err(|_| "bad port")?)
      },
      | _ => (authority, if secure { 5684 } else { 5683 }),
    };

    let (path, query) = match rest.split_once('?') {
      | Some((path, query)) => (path, query),
      | None => (rest, ""),
    };

    Ok(Self { secure,
              host: host.to_string(),
              port,
              path: path.split('/')
                        .filter(|s| !s.is_empty())
                        .map(str::to_string)
                        .collect(),
              query: query.split('&')
                          .filter(|s| !s.is_empty())
                          .map(str::to_string)
                          .collect() })
  }
}

impl core::fmt::Display for Uri {
  fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
    write!(f,
           "{}://{}:{}/{}",
           if self.secure { "coaps" } else { "coap" },
           self.host,
           self.port,
           self.path.join("/"))?;

    if !self.query.is_empty() {
      write!(f, "?{}", self.query.join("&"))?;
    }

    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn parses_plain() {
    let uri = Uri::parse("coap://host/temp").unwrap();
    assert_eq!(uri.secure, false);
    assert_eq!(uri.host, "host");
    assert_eq!(uri.port, 5683);
    assert_eq!(uri.path, vec!["temp"]);
    assert!(uri.query.is_empty());
  }

  #[test]
  fn parses_secure_with_port_and_query() {
    let uri = Uri::parse("coaps://10.0.0.2:7777/a/b?x=1&y=2").unwrap();
    assert_eq!(uri.secure, true);
    assert_eq!(uri.port, 7777);
    assert_eq!(uri.path, vec!["a", "b"]);
    assert_eq!(uri.query, vec!["x=1", "y=2"]);
  }

  #[test]
  fn secure_default_port() {
    assert_eq!(Uri::parse("coaps://h/x").unwrap().port, 5684);
  }

  #[test]
  fn no_path() {
    let uri = Uri::parse("coap://h").unwrap();
    assert!(uri.path.is_empty());
  }

  #[test]
  fn rejects_garbage() {
    assert!(Uri::parse("http://h/x").is_err());
    assert!(Uri::parse("coap://").is_err());
    assert!(Uri::parse("coap://h:notaport/x").is_err());
  }

  #[test]
  fn display_round_trips() {
    let uri = Uri::parse("coap://host:1234/a/b?q=1").unwrap();
    assert_eq!(Uri::parse(&uri.to_string()).unwrap(), uri);
  }
}
