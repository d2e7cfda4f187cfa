//! Timeout validation utilities for network and navigation operations

use std::time::Duration;
use thiserror::Error;

/// Maximum timeout for browser navigation operations (5 minutes)
pub const MAX_NAVIGATION_TIMEOUT_MS: u64 = 300_000;

/// Maximum timeout for plain HTTP operations (1 minute)
///
/// A single slow upstream must not hold a request longer than this.
pub const MAX_FETCH_TIMEOUT_MS: u64 = 60_000;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TimeoutError {
    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },

    #[error("{field} cannot exceed {max_ms}ms. Received: {ms}ms")]
    TooLong {
        field: &'static str,
        ms: u64,
        max_ms: u64,
    },
}

/// Validate timeout for navigation operations
///
/// # Arguments
/// * `field` - Config field name, used in the error message
/// * `ms` - Timeout in milliseconds
///
/// # Example
/// ```rust
/// use og_proxy::utils::validate_navigation_timeout;
/// let timeout = validate_navigation_timeout("render_timeout_ms", 15_000).unwrap();
/// assert_eq!(timeout.as_secs(), 15);
/// ```
pub fn validate_navigation_timeout(field: &'static str, ms: u64) -> Result<Duration, TimeoutError> {
    validate(field, ms, MAX_NAVIGATION_TIMEOUT_MS)
}

/// Validate timeout for plain HTTP fetches (redirect probing, OG fetch)
pub fn validate_fetch_timeout(field: &'static str, ms: u64) -> Result<Duration, TimeoutError> {
    validate(field, ms, MAX_FETCH_TIMEOUT_MS)
}

fn validate(field: &'static str, ms: u64, max_ms: u64) -> Result<Duration, TimeoutError> {
    if ms == 0 {
        return Err(TimeoutError::Zero { field });
    }
    if ms > max_ms {
        return Err(TimeoutError::TooLong { field, ms, max_ms });
    }
    Ok(Duration::from_millis(ms))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_values_within_range() {
        assert_eq!(
            validate_fetch_timeout("timeout_ms", 9_000),
            Ok(Duration::from_millis(9_000))
        );
        assert_eq!(
            validate_navigation_timeout("render_timeout_ms", MAX_NAVIGATION_TIMEOUT_MS),
            Ok(Duration::from_millis(MAX_NAVIGATION_TIMEOUT_MS))
        );
    }

    #[test]
    fn rejects_zero_and_oversized_values() {
        assert_eq!(
            validate_fetch_timeout("timeout_ms", 0),
            Err(TimeoutError::Zero { field: "timeout_ms" })
        );
        assert!(matches!(
            validate_fetch_timeout("timeout_ms", MAX_FETCH_TIMEOUT_MS + 1),
            Err(TimeoutError::TooLong { .. })
        ));
    }
}
