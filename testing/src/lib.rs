//! # Helsinki Profile Testing
//!
//! Testing utilities for the Helsinki profile workspace.
//!
//! This crate provides:
//! - Deterministic clocks implementing [`Clock`]
//! - A headless browser implementing every browser seam in memory
//! - Tracing initialisation for test output
//!
//! ## Example
//!
//! ```
//! use helsinki_profile_testing::browser::HeadlessBrowser;
//!
//! let browser = HeadlessBrowser::new("https://profiili.hel.fi", "https://profiili.hel.fi/");
//! let ctx = browser.context();
//! ctx.session_storage().set_item("key", "value").ok();
//! assert_eq!(ctx.session_storage().get_item("key").as_deref(), Some("value"));
//! ```

use chrono::{DateTime, Utc};
use helsinki_profile_core::environment::Clock;

pub mod browser;

/// Mock implementations of Environment traits
pub mod mocks {
    use super::{Clock, DateTime, Utc};
    use std::sync::atomic::{AtomicI64, Ordering};

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use helsinki_profile_testing::mocks::FixedClock;
    /// use helsinki_profile_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// assert_eq!(clock.now(), clock.now());
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Clock that only moves when told to.
    ///
    /// Used where a test needs distinct `updatedAt` stamps or has to age a
    /// stored entry past its time-to-live.
    #[derive(Debug)]
    pub struct ManualClock {
        millis: AtomicI64,
    }

    impl ManualClock {
        /// Start at the given time.
        #[must_use]
        pub fn new(start: DateTime<Utc>) -> Self {
            Self {
                millis: AtomicI64::new(start.timestamp_millis()),
            }
        }

        /// Move forward.
        pub fn advance(&self, by: chrono::Duration) {
            self.millis.fetch_add(by.num_milliseconds(), Ordering::SeqCst);
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            DateTime::from_timestamp_millis(self.millis.load(Ordering::SeqCst)).unwrap_or_default()
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    #[must_use]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(test_epoch())
    }

    /// 2025-01-01 00:00:00 UTC, the start time shared by the test clocks.
    #[must_use]
    pub fn test_epoch() -> DateTime<Utc> {
        DateTime::from_timestamp(1_735_689_600, 0).unwrap_or_default()
    }
}

/// Install a `fmt` subscriber honouring `RUST_LOG`, writing through the test
/// harness capture. Safe to call from every test.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// Re-export commonly used items
pub use browser::HeadlessBrowser;
pub use mocks::{FixedClock, ManualClock, test_clock};
