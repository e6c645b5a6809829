//! Clock driven by tokio's timer

use std::time::{Instant, SystemTime};

use chrono::{DateTime, Utc};

use crate::time::Clock;

/// Clock that follows `tokio::time`, including paused and auto-advanced time
///
/// Wall-clock readings start at a fixed instant and move with the tokio
/// timer, so code that sleeps and code that stamps records agree under
/// `#[tokio::test(start_paused = true)]`.
#[derive(Debug, Clone, Copy)]
pub struct TokioClock {
    wall_start: SystemTime,
    origin: tokio::time::Instant,
}

impl TokioClock {
    /// Must be created inside a tokio runtime
    pub fn at(wall_start: DateTime<Utc>) -> Self {
        Self { wall_start: wall_start.into(), origin: tokio::time::Instant::now() }
    }
}

impl Clock for TokioClock {
    fn now(&self) -> Instant {
        tokio::time::Instant::now().into_std()
    }

    fn system_time(&self) -> SystemTime {
        self.wall_start + self.origin.elapsed()
    }
}
