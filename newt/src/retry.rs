use embedded_time::duration::Milliseconds;
use embedded_time::Instant;

use crate::time::{millis_between, Clock, Millis};

/// A number of retransmissions
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Attempts(pub u16);

/// Strategy to employ when retransmitting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
  /// Double the delay before every retransmission, starting at
  /// `init`: waits of `init`, `2*init`, `4*init`, ...
  ///
  /// This is the RFC7252 pacing for unacknowledged CON requests,
  /// with `init` playing the role of ACK_TIMEOUT.
  Exponential {
    /// Delay before the first retransmission
    init: Millis,
  },
  /// Wait the same `interval` between every retransmission.
  Delay {
    /// Delay between retransmissions
    interval: Millis,
  },
}

impl Strategy {
  /// Total time from the initial transmission until retransmission
  /// number `attempt` (1-based) is due.
  fn due_at(&self, attempt: u16) -> u64 {
    match *self {
      | Strategy::Exponential { init: Milliseconds(init) } => {
        // waits of T, 2T, 4T.. accumulate to T * (2^n - 1)
        init * (2u64.pow(attempt as u32) - 1)
      },
      | Strategy::Delay { interval: Milliseconds(interval) } => interval * attempt as u64,
    }
  }

  /// The total time this strategy spans if every attempt is used.
  pub fn max_time(&self, max_attempts: Attempts) -> Millis {
    Milliseconds(self.due_at(max_attempts.0 + 1))
  }
}

/// Result of [`RetryTimer::what_should_i_do`].
#[derive(PartialEq, Eq, Debug, Clone, Copy)]
pub enum YouShould {
  /// Attempts have been exhausted and the work that is
  /// being retried should be considered poisoned.
  Cry,
  /// A retransmission should be performed now
  Retry,
}

/// A non-blocking timer pacing the retransmission of some operation
/// that lives alongside the operation's state.
///
/// The timer holds no work of its own; ask it
/// [`what_should_i_do`](RetryTimer::what_should_i_do) after each
/// failed wait and it answers `Retry`, `Cry` (budget spent), or
/// `WouldBlock` (not yet).
#[derive(Debug, Clone, Copy)]
pub struct RetryTimer<C: Clock> {
  start: Instant<C>,
  strategy: Strategy,
  attempts: Attempts,
  max_attempts: Attempts,
}

impl<C: Clock> RetryTimer<C> {
  /// Create a new retrier allowing `max_attempts` retransmissions
  /// after the initial send at `start`.
  pub fn new(start: Instant<C>, strategy: Strategy, max_attempts: Attempts) -> Self {
    Self { start,
           strategy,
           max_attempts,
           attempts: Attempts(0) }
  }

  /// Number of retransmissions performed so far.
  pub fn attempts(&self) -> Attempts {
    self.attempts
  }

  /// When the thing we keep trying fails, invoke this to
  /// tell the retrytimer "it failed again! what do I do??"
  ///
  /// Returns `nb::Error::WouldBlock` when we have not yet
  /// waited the appropriate amount of time to retry.
  pub fn what_should_i_do(&mut self,
                          now: Instant<C>)
                          -> nb::Result<YouShould, core::convert::Infallible> {
    if self.attempts >= self.max_attempts {
      Ok(YouShould::Cry)
    } else if millis_between(self.start, now).0 >= self.strategy.due_at(self.attempts.0 + 1) {
      self.attempts.0 += 1;
      Ok(YouShould::Retry)
    } else {
      Err(nb::Error::WouldBlock)
    }
  }
}

/// Status of a [`HandshakeTimer`] relative to its start tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpiryStatus {
  /// Neither expiry has been reached
  NoExpiry,
  /// The intermediate expiry passed; retransmit the flight
  IntExpiry,
  /// The final expiry passed; the handshake attempt is dead
  FinExpiry,
  /// The timer was cancelled
  Cancelled,
}

/// Paces DTLS handshake retransmission with an
/// (intermediate, final) expiry pair.
///
/// The intermediate expiry doubles every time it fires
/// ([`HandshakeTimer::bump`]) until it reaches the final expiry,
/// which kills the attempt outright.
#[derive(Debug, Clone, Copy)]
pub struct HandshakeTimer<C: Clock> {
  start: Instant<C>,
  int_expiry: Millis,
  fin_expiry: Millis,
  cancelled: bool,
}

impl<C: Clock> HandshakeTimer<C> {
  /// Create a timer whose intermediate expiry starts at `min` and
  /// whose final expiry is `max`, both measured from `start`.
  pub fn new(start: Instant<C>, min: Millis, max: Millis) -> Self {
    Self { start,
           int_expiry: min,
           fin_expiry: max,
           cancelled: false }
  }

  /// Where does `now` sit relative to the expiry pair?
  pub fn status(&self, now: Instant<C>) -> ExpiryStatus {
    if self.cancelled {
      return ExpiryStatus::Cancelled;
    }

    let elapsed = millis_between(self.start, now);
    if elapsed >= self.fin_expiry {
      ExpiryStatus::FinExpiry
    } else if elapsed >= self.int_expiry {
      ExpiryStatus::IntExpiry
    } else {
      ExpiryStatus::NoExpiry
    }
  }

  /// Double the intermediate expiry (capped at the final expiry)
  /// after acting on an [`ExpiryStatus::IntExpiry`].
  pub fn bump(&mut self) {
    self.int_expiry = Milliseconds((self.int_expiry.0 * 2).min(self.fin_expiry.0));
  }

  /// Stop the timer; all further status queries report `Cancelled`.
  pub fn cancel(&mut self) {
    self.cancelled = true;
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::test::ClockMock;

  #[test]
  fn exponential_waits_are_t_2t_4t_8t() {
    use embedded_time::Clock as _;

    let clock = ClockMock::new();
    let now = || clock.try_now().unwrap();
    let mut retry = RetryTimer::new(now(),
                                    Strategy::Exponential { init: Milliseconds(1000) },
                                    Attempts(4));

    // initial transmission happens before asking what_should_i_do

    for (retry_due, too_early) in [(1_000u64, 999u64), (3_000, 2_999), (7_000, 6_999), (15_000, 14_999)] {
      clock.set(too_early);
      assert_eq!(retry.what_should_i_do(now()).unwrap_err(),
                 nb::Error::WouldBlock);

      clock.set(retry_due);
      assert_eq!(retry.what_should_i_do(now()).unwrap(), YouShould::Retry);
    }

    // exactly 4 retransmissions, then the request is poisoned
    clock.set(1_000_000);
    assert_eq!(retry.what_should_i_do(now()).unwrap(), YouShould::Cry);
  }

  #[test]
  fn delay_waits_are_fixed() {
    use embedded_time::Clock as _;

    let clock = ClockMock::new();
    let now = || clock.try_now().unwrap();
    let mut retry = RetryTimer::new(now(),
                                    Strategy::Delay { interval: Milliseconds(500) },
                                    Attempts(2));

    clock.set(499);
    assert_eq!(retry.what_should_i_do(now()).unwrap_err(),
               nb::Error::WouldBlock);

    clock.set(500);
    assert_eq!(retry.what_should_i_do(now()).unwrap(), YouShould::Retry);

    clock.set(999);
    assert_eq!(retry.what_should_i_do(now()).unwrap_err(),
               nb::Error::WouldBlock);

    clock.set(1000);
    assert_eq!(retry.what_should_i_do(now()).unwrap(), YouShould::Retry);
    assert_eq!(retry.what_should_i_do(now()).unwrap(), YouShould::Cry);
  }

  #[test]
  fn handshake_timer_statuses() {
    use embedded_time::Clock as _;

    let clock = ClockMock::new();
    let now = || clock.try_now().unwrap();
    let mut timer = HandshakeTimer::new(now(), Milliseconds(100), Milliseconds(1000));

    assert_eq!(timer.status(now()), ExpiryStatus::NoExpiry);

    clock.set(100);
    assert_eq!(timer.status(now()), ExpiryStatus::IntExpiry);

    timer.bump(); // 100 -> 200
    assert_eq!(timer.status(now()), ExpiryStatus::NoExpiry);

    clock.set(250);
    assert_eq!(timer.status(now()), ExpiryStatus::IntExpiry);
    timer.bump(); // 200 -> 400
    timer.bump(); // 400 -> 800
    timer.bump(); // capped at 1000

    clock.set(999);
    assert_eq!(timer.status(now()), ExpiryStatus::IntExpiry);

    clock.set(1000);
    assert_eq!(timer.status(now()), ExpiryStatus::FinExpiry);

    timer.cancel();
    assert_eq!(timer.status(now()), ExpiryStatus::Cancelled);
  }

  #[test]
  fn max_time() {
    let s = Strategy::Exponential { init: Milliseconds(100) };
    // T + 2T + 4T + 8T + 16T = 31T past the initial send
    assert_eq!(s.max_time(Attempts(4)), Milliseconds(3_100u64));
  }
}
