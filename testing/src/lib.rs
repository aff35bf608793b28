//! # Enrollment Testing
//!
//! Testing utilities and helpers for enrollment reducers and engines.
//!
//! This crate provides:
//! - Deterministic [`Clock`] implementations
//! - A Given-When-Then builder for reducers ([`ReducerTest`])
//!
//! ## Example
//!
//! ```ignore
//! use enrollment_testing::{ReducerTest, test_clock};
//!
//! ReducerTest::new(EnrollmentReducer::new())
//!     .with_env(environment(test_clock()))
//!     .given_state(EnrollmentState::new(event_id, Capacity::new(1)))
//!     .when_command(EnrollmentCommand::Enroll { user })
//!     .then_state(|state| assert_eq!(state.enrolled_count(), 1))
//!     .run();
//! ```

use chrono::{DateTime, Utc};
use enrollment_core::environment::Clock;


/// Mock implementations of Environment traits
pub mod mocks {
    use super::{Clock, DateTime, Utc};
    use std::sync::{Mutex, PoisonError};

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use enrollment_testing::mocks::FixedClock;
    /// use enrollment_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// let time1 = clock.now();
    /// let time2 = clock.now();
    /// assert_eq!(time1, time2); // Always the same!
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

    /// Clock that only moves when told to
    ///
    /// Used to give waiting users a measurable wait duration.
    ///
    /// ```
    /// use enrollment_testing::mocks::ManualClock;
    /// use enrollment_core::environment::Clock;
    ///
    /// let clock = ManualClock::starting_at(enrollment_testing::test_clock().now());
    /// let before = clock.now();
    /// clock.advance(chrono::Duration::seconds(30));
    /// assert_eq!(clock.now() - before, chrono::Duration::seconds(30));
    /// ```
    #[derive(Debug)]
    pub struct ManualClock {
        time: Mutex<DateTime<Utc>>,
    }

    impl ManualClock {
        /// Create a clock frozen at `time`
        #[must_use]
        pub const fn starting_at(time: DateTime<Utc>) -> Self {
            Self {
                time: Mutex::new(time),
            }
        }

        /// Move the clock forward (or backward, with a negative delta)
        pub fn advance(&self, by: chrono::Duration) {
            let mut time = self.time.lock().unwrap_or_else(PoisonError::into_inner);
            *time += by;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            *self.time.lock().unwrap_or_else(PoisonError::into_inner)
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    ///
    /// # Panics
    ///
    /// This function will panic if the hardcoded timestamp fails to parse,
    /// which should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(
            DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
                .expect("hardcoded timestamp should always parse")
                .with_timezone(&Utc),
        )
    }
}

// Re-export commonly used items
pub use mocks::{FixedClock, ManualClock, test_clock};
pub use reducer_test::ReducerTest;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_clock() {
        let clock = test_clock();
        let time1 = clock.now();
        let time2 = clock.now();
        assert_eq!(time1, time2);
    }

    #[test]
    fn test_manual_clock_moves_only_when_advanced() {
        let clock = ManualClock::starting_at(test_clock().now());
        let start = clock.now();
        assert_eq!(clock.now(), start);

        clock.advance(chrono::Duration::minutes(5));
        assert_eq!(clock.now() - start, chrono::Duration::minutes(5));
    }
}
