//! Execution history
//!
//! Every fire produces one [`ExecutionRecord`]. The history enforces at
//! most one non-terminal record per schedule and prunes terminal records
//! by count and age. Records that are still pending or running are never
//! pruned.

use std::collections::{HashMap, VecDeque};

use cadence_domain::{
    CadenceError, ExecutionFilter, ExecutionId, ExecutionRecord, ExecutionTrigger,
    RetentionConfig, Result, ScheduleId, ScheduleStats,
};
use chrono::{DateTime, Utc};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct ExecutionHistory {
    records: HashMap<ExecutionId, ExecutionRecord>,
    /// Creation order, oldest first
    order: VecDeque<ExecutionId>,
    in_flight: HashMap<ScheduleId, ExecutionId>,
    retention: RetentionConfig,
}

impl ExecutionHistory {
    pub fn new(retention: RetentionConfig) -> Self {
        Self {
            records: HashMap::new(),
            order: VecDeque::new(),
            in_flight: HashMap::new(),
            retention,
        }
    }

    /// Create a pending record for a fire of `schedule_id`
    ///
    /// # Errors
    /// Returns `CadenceError::InvalidState` while another execution of the
    /// schedule is pending or running.
    pub fn begin(
        &mut self,
        schedule_id: ScheduleId,
        workflow_id: &str,
        trigger: ExecutionTrigger,
        now: DateTime<Utc>,
    ) -> Result<ExecutionId> {
        if let Some(running) = self.in_flight.get(&schedule_id) {
            return Err(CadenceError::InvalidState(format!(
                "schedule {schedule_id} already has execution {running} in flight"
            )));
        }
        let record = ExecutionRecord::new(schedule_id, workflow_id, trigger, now);
        let execution_id = record.execution_id;
        self.records.insert(execution_id, record);
        self.order.push_back(execution_id);
        self.in_flight.insert(schedule_id, execution_id);
        Ok(execution_id)
    }

    /// Execution of `schedule_id` that is pending or running
    pub fn in_flight(&self, schedule_id: ScheduleId) -> Option<ExecutionId> {
        self.in_flight.get(&schedule_id).copied()
    }

    pub fn in_flight_ids(&self) -> Vec<ExecutionId> {
        self.in_flight.values().copied().collect()
    }

    pub fn get(&self, id: ExecutionId) -> Option<&ExecutionRecord> {
        self.records.get(&id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn mark_running(&mut self, id: ExecutionId, now: DateTime<Utc>) -> Result<()> {
        self.record_mut(id)?.mark_running(now)
    }

    pub fn record_attempt(&mut self, id: ExecutionId, attempt: u32) -> Result<()> {
        self.record_mut(id)?.record_attempt(attempt)
    }

    pub fn complete(
        &mut self,
        id: ExecutionId,
        outputs: serde_json::Value,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.settle(id, |record| record.complete(outputs, now))
    }

    pub fn fail(&mut self, id: ExecutionId, error: impl Into<String>, now: DateTime<Utc>) -> Result<()> {
        let error = error.into();
        self.settle(id, |record| record.fail(error, now))
    }

    pub fn stop(&mut self, id: ExecutionId, now: DateTime<Utc>) -> Result<()> {
        self.settle(id, |record| record.stop(now))
    }

    /// Drop terminal records beyond the retention limits
    ///
    /// Returns the number of records removed.
    pub fn prune(&mut self, now: DateTime<Utc>) -> usize {
        let cutoff = chrono::Duration::from_std(self.retention.max_age())
            .ok()
            .and_then(|age| now.checked_sub_signed(age));
        let mut terminal = self
            .order
            .iter()
            .filter(|id| self.records.get(*id).is_some_and(ExecutionRecord::is_terminal))
            .count();

        let mut removed = Vec::new();
        for id in &self.order {
            let Some(record) = self.records.get(id) else { continue };
            if !record.is_terminal() {
                continue;
            }
            let expired = match (cutoff, record.completed_at) {
                (Some(cutoff), Some(done)) => done < cutoff,
                _ => false,
            };
            if expired || terminal > self.retention.max_records {
                removed.push(*id);
                terminal -= 1;
            }
        }

        for id in &removed {
            self.records.remove(id);
        }
        if !removed.is_empty() {
            self.order.retain(|id| self.records.contains_key(id));
            debug!(removed = removed.len(), retained = self.records.len(), "Pruned execution history");
        }
        removed.len()
    }

    /// Records matching `filter`, newest first
    pub fn query(&self, filter: &ExecutionFilter) -> Vec<ExecutionRecord> {
        self.order
            .iter()
            .rev()
            .filter_map(|id| self.records.get(id))
            .filter(|record| filter.matches(record))
            .take(filter.limit.unwrap_or(usize::MAX))
            .cloned()
            .collect()
    }

    pub fn stats(&self, schedule_id: ScheduleId) -> ScheduleStats {
        ScheduleStats::from_records(schedule_id, self.records.values())
    }

    fn settle(
        &mut self,
        id: ExecutionId,
        transition: impl FnOnce(&mut ExecutionRecord) -> Result<()>,
    ) -> Result<()> {
        let record = self.record_mut(id)?;
        transition(record)?;
        let schedule_id = record.schedule_id;
        if self.in_flight.get(&schedule_id) == Some(&id) {
            self.in_flight.remove(&schedule_id);
        }
        Ok(())
    }

    fn record_mut(&mut self, id: ExecutionId) -> Result<&mut ExecutionRecord> {
        self.records.get_mut(&id).ok_or_else(|| CadenceError::execution_not_found(id))
    }
}
