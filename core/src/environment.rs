//! Environment traits for dependency injection.
//!
//! All time-dependent code takes a [`Clock`] so tests can pin the time.

use chrono::{DateTime, Utc};

/// Clock trait - abstracts time operations for testability
///
/// # Examples
///
/// ```
/// use helsinki_profile_core::environment::{Clock, SystemClock};
///
/// let clock = SystemClock;
/// let earlier = clock.now();
/// assert!(clock.now() >= earlier);
/// ```
pub trait Clock: Send + Sync {
    /// Get the current time
    fn now(&self) -> DateTime<Utc>;

    /// Current time as milliseconds since the Unix epoch.
    ///
    /// This is the representation stored in `updatedAt` fields.
    fn now_millis(&self) -> i64 {
        self.now().timestamp_millis()
    }
}

/// Wall clock backed by [`Utc::now`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_now_millis_matches_now() {
        struct Pinned(DateTime<Utc>);
        impl Clock for Pinned {
            fn now(&self) -> DateTime<Utc> {
                self.0
            }
        }

        let time = DateTime::from_timestamp(1_700_000_000, 0).unwrap_or_default();
        let clock = Pinned(time);
        assert_eq!(clock.now_millis(), 1_700_000_000_000);
    }
}
