//! Testing utilities and helpers
//!
//! - **[`async_utils`]**: polling that respects paused tokio time
//! - **[`clock`]**: a [`Clock`](crate::time::Clock) that follows tokio's timer
//! - **[`mocks`]**: scripted operations for retry and breaker tests
//!
//! ## Usage
//!
//! ```rust
//! # #[cfg(feature = "test-utils")]
//! # {
//! use std::time::Duration;
//!
//! use cadence_common::testing::{poll_until, ScriptedOperation};
//!
//! # tokio_test::block_on(async {
//! let op = ScriptedOperation::failing_then(1, "busy", ());
//! let _ = op.call().await;
//! let done = poll_until(Duration::from_millis(50), Duration::from_millis(5), || {
//!     let op = op.clone();
//!     async move { op.call().await.is_ok() }
//! })
//! .await;
//! assert!(done);
//! # });
//! # }
//! ```

pub mod async_utils;
pub mod clock;
pub mod mocks;

pub use async_utils::poll_until;
pub use clock::TokioClock;
pub use mocks::ScriptedOperation;
