//! Bounded retry for closed-loop corrections.
//
// The crystal flip check re-aligns the stage and re-measures until the
// orientation delta falls inside its threshold. The loop is driven through
// `handle_recoverable_error` so the attempt budget and back-off come from one
// configurable policy instead of being open-coded at the call site.

use std::thread::sleep;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::{AppResult, DeviceError};
use crate::settings::CompensationSettings;

/// Defines a policy for retrying an operation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// The maximum number of retry attempts.
    pub max_attempts: u32,
    /// The delay between retry attempts.
    pub backoff_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_delay: Duration::from_millis(100),
        }
    }
}

impl From<&CompensationSettings> for RetryPolicy {
    fn from(settings: &CompensationSettings) -> Self {
        Self {
            max_attempts: settings.max_attempts,
            backoff_delay: Duration::from_millis(settings.backoff_ms),
        }
    }
}

/// One correction attempt that may need repeating.
pub trait Recoverable {
    /// Runs one attempt. `Ok(())` means the target condition now holds.
    fn recover(&mut self) -> AppResult<()>;

    /// Whether another attempt may fix `err`.
    ///
    /// Only a convergence miss is retried by default. Anything else ends the
    /// loop with that error.
    fn is_retryable(&self, err: &DeviceError) -> bool {
        matches!(err, DeviceError::Convergence(_))
    }
}

/// Repeats `recoverable` until it succeeds or the policy is exhausted.
///
/// Returns `DeviceError::Convergence` carrying the last attempt's error when
/// every attempt failed. An error that is not retryable is returned as is,
/// without further attempts. A policy with `max_attempts == 0` fails
/// immediately.
pub fn handle_recoverable_error<T: Recoverable + ?Sized>(
    recoverable: &mut T,
    policy: &RetryPolicy,
) -> AppResult<()> {
    let mut last_error = None;
    for attempt in 1..=policy.max_attempts {
        match recoverable.recover() {
            Ok(()) => {
                debug!(attempt, "recovery attempt succeeded");
                return Ok(());
            }
            Err(err) if !recoverable.is_retryable(&err) => {
                warn!(attempt, error = %err, "recovery attempt aborted");
                return Err(err);
            }
            Err(err) => {
                warn!(attempt, max = policy.max_attempts, error = %err, "recovery attempt failed");
                last_error = Some(err);
            }
        }
        if attempt < policy.max_attempts && !policy.backoff_delay.is_zero() {
            sleep(policy.backoff_delay);
        }
    }
    Err(DeviceError::Convergence(match last_error {
        Some(err) => format!(
            "failed to recover after {} attempts: {err}",
            policy.max_attempts
        ),
        None => "no recovery attempts allowed".to_string(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    struct MockRecoverable {
        attempts: RefCell<u32>,
        succeed_on_attempt: u32,
    }

    impl Recoverable for MockRecoverable {
        fn recover(&mut self) -> AppResult<()> {
            let mut attempts = self.attempts.borrow_mut();
            *attempts += 1;
            if *attempts >= self.succeed_on_attempt {
                Ok(())
            } else {
                Err(DeviceError::Convergence("still outside".to_string()))
            }
        }
    }

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            backoff_delay: Duration::ZERO,
        }
    }

    #[test]
    fn test_retry_logic_succeeds() {
        let mut recoverable = MockRecoverable {
            attempts: RefCell::new(0),
            succeed_on_attempt: 2,
        };
        let result = handle_recoverable_error(&mut recoverable, &fast_policy(3));
        assert!(result.is_ok());
        assert_eq!(*recoverable.attempts.borrow(), 2);
    }

    #[test]
    fn test_retry_logic_fails() {
        let mut recoverable = MockRecoverable {
            attempts: RefCell::new(0),
            succeed_on_attempt: 4,
        };
        let result = handle_recoverable_error(&mut recoverable, &fast_policy(3));
        assert!(matches!(result, Err(DeviceError::Convergence(_))));
        assert_eq!(*recoverable.attempts.borrow(), 3);
    }

    struct FailingHardware {
        attempts: u32,
    }

    impl Recoverable for FailingHardware {
        fn recover(&mut self) -> AppResult<()> {
            self.attempts += 1;
            Err(DeviceError::Scan("scanner refused".to_string()))
        }
    }

    #[test]
    fn test_hardware_error_is_not_retried() {
        let mut recoverable = FailingHardware { attempts: 0 };
        let result = handle_recoverable_error(&mut recoverable, &fast_policy(3));
        assert!(matches!(result, Err(DeviceError::Scan(_))));
        assert_eq!(recoverable.attempts, 1);
    }

    #[test]
    fn test_zero_budget_never_calls_recover() {
        let mut recoverable = MockRecoverable {
            attempts: RefCell::new(0),
            succeed_on_attempt: 1,
        };
        let result = handle_recoverable_error(&mut recoverable, &fast_policy(0));
        assert!(result.is_err());
        assert_eq!(*recoverable.attempts.borrow(), 0);
    }

    #[test]
    fn test_policy_from_settings() {
        let settings = CompensationSettings {
            max_attempts: 5,
            backoff_ms: 250,
        };
        let policy = RetryPolicy::from(&settings);
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.backoff_delay, Duration::from_millis(250));
    }
}
