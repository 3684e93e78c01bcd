use newt_msg::{Code, ContentFormat};

use crate::net::Addrd;
use crate::req::{Method, Req};

/// What an [`Endpoint`] runs when a request reaches it: produce a
/// status code and the full (unsliced) response payload.
///
/// Handlers run on the server's own task; they must not block long.
pub type Handler = Box<dyn FnMut(&Addrd<Req>) -> (Code, Vec<u8>) + Send>;

/// One route table entry: a method, an exact path-segment sequence,
/// the handler, and response metadata.
pub struct Endpoint {
  pub(crate) method: Method,
  pub(crate) path: Vec<String>,
  pub(crate) handler: Handler,
  pub(crate) content_format: Option<ContentFormat>,
  pub(crate) separate: bool,
}

impl core::fmt::Debug for Endpoint {
  fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
    f.debug_struct("Endpoint")
     .field("method", &self.method)
     .field("path", &self.path)
     .field("content_format", &self.content_format)
     .field("separate", &self.separate)
     .finish()
  }
}

impl Endpoint {
  /// Bind `method` + `path` (e.g. `"/sensor/temp"`) to `handler`.
  pub fn new(method: Method,
             path: &str,
             handler: impl FnMut(&Addrd<Req>) -> (Code, Vec<u8>) + Send + 'static)
             -> Self {
    Self { method,
           path: path.split('/')
                     .filter(|s| !s.is_empty())
                     .map(str::to_string)
                     .collect(),
           handler: Box::new(handler),
           content_format: None,
           separate: false }
  }

  /// Declare the Content-Format of this endpoint's responses.
  pub fn with_content_format(mut self, format: ContentFormat) -> Self {
    self.content_format = Some(format);
    self
  }

  /// Answer confirmable requests with an empty ACK first and the
  /// substantive response as its own exchange (for handlers whose
  /// answer isn't immediate).
  pub fn with_separate_response(mut self) -> Self {
    self.separate = true;
    self
  }

  /// Exact segment-sequence match; `/a/b` is not `/a/b/c` and not
  /// `/a`.
  pub(crate) fn matches_path(&self, segments: &[&str]) -> bool {
    self.path.len() == segments.len() && self.path.iter().zip(segments).all(|(a, b)| a == b)
  }
}
