//! Per-schedule execution statistics

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::execution::{ExecutionRecord, ExecutionStatus};
use super::schedule::ScheduleId;

/// Execution counts and timings for one schedule, over retained history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleStats {
    pub schedule_id: ScheduleId,
    pub total: usize,
    pub pending: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub stopped: usize,
    /// Mean duration of terminal executions that ran
    pub average_duration: Option<Duration>,
    /// `failed / (completed + failed + stopped)`, zero with no terminal runs
    pub failure_rate: f64,
}

impl ScheduleStats {
    pub fn empty(schedule_id: ScheduleId) -> Self {
        Self {
            schedule_id,
            total: 0,
            pending: 0,
            running: 0,
            completed: 0,
            failed: 0,
            stopped: 0,
            average_duration: None,
            failure_rate: 0.0,
        }
    }

    /// Aggregate `records`, skipping those of other schedules
    pub fn from_records<'a>(
        schedule_id: ScheduleId,
        records: impl IntoIterator<Item = &'a ExecutionRecord>,
    ) -> Self {
        let mut stats = Self::empty(schedule_id);
        let mut total_duration = Duration::ZERO;
        let mut timed: u32 = 0;

        for record in records.into_iter().filter(|r| r.schedule_id == schedule_id) {
            stats.total += 1;
            match record.status {
                ExecutionStatus::Pending => stats.pending += 1,
                ExecutionStatus::Running => stats.running += 1,
                ExecutionStatus::Completed => stats.completed += 1,
                ExecutionStatus::Failed => stats.failed += 1,
                ExecutionStatus::Stopped => stats.stopped += 1,
            }
            if let (true, Some(duration)) = (record.is_terminal(), record.duration) {
                total_duration += duration;
                timed += 1;
            }
        }

        if timed > 0 {
            stats.average_duration = Some(total_duration / timed);
        }
        let terminal = stats.completed + stats.failed + stats.stopped;
        if terminal > 0 {
            stats.failure_rate = stats.failed as f64 / terminal as f64;
        }
        stats
    }
}
