// corebridge — Bounded Retry
//
// Some IMU drivers refuse to clear a trigger while a transfer is in flight.
// Teardown is retried a fixed number of times before giving up.

use std::thread;

use crate::config::RetryPolicy;
use crate::error::{IpmError, Result};

/// Run `op` until it succeeds or `policy.max_attempts` attempts have failed.
///
/// Returns the number of attempts used on success.
pub fn retry_with_cap<T, E, F>(policy: &RetryPolicy, mut op: F) -> Result<(T, u32)>
where
    F: FnMut() -> core::result::Result<T, E>,
    E: core::fmt::Display,
{
    let attempts = policy.max_attempts.max(1);
    for attempt in 1..=attempts {
        match op() {
            Ok(value) => return Ok((value, attempt)),
            Err(e) if attempt < attempts => {
                log::debug!("attempt {}/{} failed: {}", attempt, attempts, e);
                if !policy.delay.is_zero() {
                    thread::sleep(policy.delay);
                }
            }
            Err(e) => log::error!("giving up after {} attempts: {}", attempts, e),
        }
    }
    Err(IpmError::RetryExhausted { attempts })
}
