//! Time utilities and abstractions
//!
//! This module provides the time handling used by the scheduler and the
//! resilience layer:
//! - **[`clock`]**: Real and mock time for deterministic tests
//! - **[`cron`]**: Cron expression parsing and time-zone aware evaluation
//!
//! ## Usage
//!
//! ```rust
//! # #[cfg(feature = "foundation")]
//! # {
//! use std::time::Duration;
//!
//! use cadence_common::time::{Clock, CronSchedule, MockClock};
//!
//! // Every weekday at 09:30 in Berlin
//! let schedule = CronSchedule::with_timezone("30 9 * * MON-FRI", chrono_tz::Europe::Berlin)
//!     .unwrap();
//! assert!(schedule.next().is_some());
//!
//! // Mock time for testing
//! let clock = MockClock::new();
//! clock.advance(Duration::from_secs(5));
//! assert_eq!(clock.elapsed(), Duration::from_secs(5));
//! # }
//! ```

pub mod clock;
pub mod cron;

// Re-export commonly used items
pub use clock::{Clock, MockClock, SystemClock};
pub use cron::{CronExpression, CronParseError, CronSchedule};
