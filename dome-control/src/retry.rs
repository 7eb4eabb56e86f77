//! Bounded retry with reconnect-on-link-loss for hardware commands.
//!
//! Every hardware round-trip goes through [`retry`]. Motion commands get a
//! small retry budget; the periodic status poll gets exactly one attempt so
//! a bad cycle never delays the next scheduled one. A
//! [`LinkLost`](crate::driver::DriverError::LinkLost) error triggers a
//! reconnect between attempts — and if the reconnect itself fails, the
//! remaining budget is abandoned, since retrying over a dead link cannot
//! succeed.

use tracing::warn;

use crate::driver::{DomeDriver, DriverError, DriverResult};

/// Retry budget for one hardware operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    attempts: u32,
}

impl RetryPolicy {
    /// Budget for motion and configuration commands: 3 attempts.
    pub const fn motion() -> Self {
        Self { attempts: 3 }
    }

    /// Budget for the periodic status poll: a single attempt.
    pub const fn poll() -> Self {
        Self { attempts: 1 }
    }

    /// Custom budget. At least one attempt is always made.
    pub const fn new(attempts: u32) -> Self {
        Self {
            attempts: if attempts == 0 { 1 } else { attempts },
        }
    }

    pub const fn attempts(self) -> u32 {
        self.attempts
    }
}

/// Run `op` against the driver until it succeeds or the budget runs out.
///
/// Returns the first success, or the last error observed. On a link-loss
/// error a reconnect is attempted before the next try; a failed reconnect
/// ends the loop immediately with the link-loss error.
pub fn retry<D, T, F>(driver: &mut D, policy: RetryPolicy, mut op: F) -> DriverResult<T>
where
    D: DomeDriver + ?Sized,
    F: FnMut(&mut D) -> DriverResult<T>,
{
    let mut last = DriverError::NoResponse;
    for attempt in 1..=policy.attempts() {
        match op(driver) {
            Ok(value) => return Ok(value),
            Err(err) if err.is_link_lost() => {
                warn!(attempt, "serial link lost, reconnecting");
                last = err;
                if driver.reconnect().is_err() {
                    warn!("reconnect failed, abandoning command");
                    return Err(err);
                }
            }
            Err(err) => {
                warn!(attempt, error = %err, "dome command failed");
                last = err;
            }
        }
    }
    Err(last)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{Direction, DomeStatus};

    /// Driver whose `ack` fails a scripted number of times.
    struct Flaky {
        failures: Vec<DriverError>,
        acks: u32,
        reconnects: u32,
        reconnect_ok: bool,
    }

    impl Flaky {
        fn new(failures: Vec<DriverError>) -> Self {
            Self {
                failures,
                acks: 0,
                reconnects: 0,
                reconnect_ok: true,
            }
        }
    }

    impl DomeDriver for Flaky {
        fn ack(&mut self) -> DriverResult<()> {
            self.acks += 1;
            if self.failures.is_empty() {
                Ok(())
            } else {
                Err(self.failures.remove(0))
            }
        }

        fn status(&mut self) -> DriverResult<DomeStatus> {
            unreachable!("not exercised")
        }

        fn goto_azimuth(&mut self, _: Direction, _: u32) -> DriverResult<()> {
            Ok(())
        }

        fn abort_azimuth(&mut self) -> DriverResult<()> {
            Ok(())
        }

        fn abort_shutter(&mut self) -> DriverResult<()> {
            Ok(())
        }

        fn home_azimuth(&mut self) -> DriverResult<()> {
            Ok(())
        }

        fn open_shutter_full(&mut self) -> DriverResult<()> {
            Ok(())
        }

        fn open_shutter_upper(&mut self) -> DriverResult<()> {
            Ok(())
        }

        fn close_shutter(&mut self) -> DriverResult<()> {
            Ok(())
        }

        fn set_operation_point(&mut self, _: bool, _: u32) -> DriverResult<()> {
            Ok(())
        }

        fn set_ticks_per_turn(&mut self, _: u32) -> DriverResult<()> {
            Ok(())
        }

        fn reconnect(&mut self) -> DriverResult<()> {
            self.reconnects += 1;
            if self.reconnect_ok {
                Ok(())
            } else {
                Err(DriverError::LinkLost)
            }
        }
    }

    #[test]
    fn first_success_stops_immediately() {
        let mut driver = Flaky::new(vec![]);
        assert!(retry(&mut driver, RetryPolicy::motion(), |d| d.ack()).is_ok());
        assert_eq!(driver.acks, 1);
    }

    #[test]
    fn transient_errors_are_retried_within_budget() {
        let mut driver = Flaky::new(vec![DriverError::NoResponse, DriverError::BadChecksum]);
        assert!(retry(&mut driver, RetryPolicy::motion(), |d| d.ack()).is_ok());
        assert_eq!(driver.acks, 3);
        assert_eq!(driver.reconnects, 0);
    }

    #[test]
    fn exhausted_budget_returns_last_error() {
        let mut driver = Flaky::new(vec![
            DriverError::NoResponse,
            DriverError::NoResponse,
            DriverError::BadChecksum,
        ]);
        let result = retry(&mut driver, RetryPolicy::motion(), |d| d.ack());
        assert_eq!(result, Err(DriverError::BadChecksum));
        assert_eq!(driver.acks, 3);
    }

    #[test]
    fn link_loss_reconnects_then_retries() {
        let mut driver = Flaky::new(vec![DriverError::LinkLost]);
        assert!(retry(&mut driver, RetryPolicy::motion(), |d| d.ack()).is_ok());
        assert_eq!(driver.reconnects, 1);
        assert_eq!(driver.acks, 2);
    }

    #[test]
    fn dead_link_abandons_remaining_attempts() {
        let mut driver = Flaky::new(vec![
            DriverError::LinkLost,
            DriverError::LinkLost,
            DriverError::LinkLost,
        ]);
        driver.reconnect_ok = false;
        let result = retry(&mut driver, RetryPolicy::motion(), |d| d.ack());
        assert_eq!(result, Err(DriverError::LinkLost));
        // one attempt, one failed reconnect, no further tries
        assert_eq!(driver.acks, 1);
        assert_eq!(driver.reconnects, 1);
    }

    #[test]
    fn poll_policy_never_retries() {
        let mut driver = Flaky::new(vec![DriverError::NoResponse]);
        let result = retry(&mut driver, RetryPolicy::poll(), |d| d.ack());
        assert_eq!(result, Err(DriverError::NoResponse));
        assert_eq!(driver.acks, 1);
    }

    #[test]
    fn zero_attempt_policy_still_runs_once() {
        let mut driver = Flaky::new(vec![]);
        assert!(retry(&mut driver, RetryPolicy::new(0), |d| d.ack()).is_ok());
        assert_eq!(driver.acks, 1);
    }
}
