use embedded_time::duration::Milliseconds;
use embedded_time::rate::Fraction;
use embedded_time::Instant;

/// A duration, in milliseconds
pub type Millis = Milliseconds<u64>;

/// Supertrait of [`embedded_time::Clock`] pinning the
/// type of "ticks" to u64
pub trait Clock: embedded_time::Clock<T = u64> {}
impl<C: embedded_time::Clock<T = u64>> Clock for C {}

/// Timeout configuration allowing for "never time out" as an option
#[derive(PartialEq, Eq, PartialOrd, Ord, Debug, Clone, Copy)]
pub enum Timeout {
  /// Timeout after some number of milliseconds has elapsed
  Millis(u64),
  /// Never time out
  Never,
}

impl Timeout {
  /// Has a span starting `elapsed` ago run past this timeout?
  pub fn expired(&self, elapsed: Millis) -> bool {
    match *self {
      | Timeout::Millis(ms) => elapsed.0 >= ms,
      | Timeout::Never => false,
    }
  }
}

impl From<Millis> for Timeout {
  fn from(ms: Millis) -> Self {
    Timeout::Millis(ms.0)
  }
}

/// Milliseconds from `start` to `now`, saturating to zero if the
/// clock moved backwards or overflowed.
pub fn millis_between<C: Clock>(start: Instant<C>, now: Instant<C>) -> Millis {
  now.checked_duration_since(&start)
     .and_then(|dur| Milliseconds::<u64>::try_from(dur).ok())
     .unwrap_or(Milliseconds(0))
}

/// Implement [`embedded_time::Clock`] using [`std::time`] primitives
#[derive(Debug, Clone, Copy)]
pub struct SystemClock(std::time::Instant);

impl Default for SystemClock {
  fn default() -> Self {
    Self::new()
  }
}

impl SystemClock {
  /// Create a new clock, with "epoch" pinned to the moment of creation
  pub fn new() -> Self {
    Self(std::time::Instant::now())
  }
}

impl embedded_time::Clock for SystemClock {
  type T = u64;

  // microseconds
  const SCALING_FACTOR: Fraction = Fraction::new(1, 1_000_000);

  fn try_now(&self) -> Result<Instant<Self>, embedded_time::clock::Error> {
    let elapsed = std::time::Instant::now().duration_since(self.0);
    Ok(Instant::new(elapsed.as_micros() as u64))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn timeout_expiry() {
    assert!(Timeout::Millis(10).expired(Milliseconds(10)));
    assert!(Timeout::Millis(10).expired(Milliseconds(11)));
    assert!(!Timeout::Millis(10).expired(Milliseconds(9)));
    assert!(!Timeout::Never.expired(Milliseconds(u64::MAX)));
  }

  #[test]
  fn system_clock_monotonic() {
    use embedded_time::Clock as _;

    let clock = SystemClock::new();
    let a = clock.try_now().unwrap();
    let b = clock.try_now().unwrap();
    assert!(b >= a);
  }
}
