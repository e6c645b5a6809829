//! Schedule registry
//!
//! Owns every [`ScheduleEntry`] together with its compiled trigger and keeps
//! `next_fire_time` consistent with the entry's state. Pure bookkeeping:
//! the caller supplies `now` and decides what firing means.

use std::collections::BTreeMap;
use std::time::Duration;

use cadence_domain::{
    CadenceError, Result, RetryPolicy, ScheduleEntry, ScheduleId, ScheduleSpec, ScheduleState,
    ScheduleUpdate,
};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use tracing::{debug, warn};

use super::trigger::CompiledTrigger;

#[derive(Debug, Clone)]
struct Slot {
    entry: ScheduleEntry,
    trigger: CompiledTrigger,
}

/// Registered schedules, ordered by registration
#[derive(Debug, Clone)]
pub struct ScheduleRegistry {
    slots: BTreeMap<ScheduleId, Slot>,
    timezone: Tz,
    default_retry: RetryPolicy,
    default_timeout: Duration,
}

impl ScheduleRegistry {
    pub fn new(timezone: Tz, default_retry: RetryPolicy, default_timeout: Duration) -> Self {
        Self { slots: BTreeMap::new(), timezone, default_retry, default_timeout }
    }

    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    /// Register a schedule
    ///
    /// # Errors
    /// `InvalidTrigger` for a bad trigger, `Config` for a bad retry policy
    /// or a zero timeout.
    pub fn register(&mut self, spec: ScheduleSpec, now: DateTime<Utc>) -> Result<ScheduleId> {
        let trigger = CompiledTrigger::compile(&spec.trigger)?;
        let retry_policy = spec.retry_policy.unwrap_or(self.default_retry);
        retry_policy.validate()?;
        let timeout = spec.timeout.unwrap_or(self.default_timeout);
        validate_timeout(timeout)?;

        let schedule_id = ScheduleId::new();
        let next_fire_time = self.first_fire(&trigger, schedule_id, now);
        let entry = ScheduleEntry {
            schedule_id,
            name: spec.name,
            trigger_kind: spec.trigger,
            target: spec.target,
            state: ScheduleState::Active,
            next_fire_time,
            retry_policy,
            timeout,
            created_at: now,
            updated_at: now,
            last_fired_at: None,
            pending_removal: false,
        };
        debug!(%schedule_id, trigger = entry.trigger_kind.label(), ?next_fire_time, "Schedule registered");
        self.slots.insert(schedule_id, Slot { entry, trigger });
        Ok(schedule_id)
    }

    pub fn get(&self, id: ScheduleId) -> Option<&ScheduleEntry> {
        self.slots.get(&id).map(|slot| &slot.entry)
    }

    pub fn contains(&self, id: ScheduleId) -> bool {
        self.slots.contains_key(&id)
    }

    pub fn list(&self) -> Vec<ScheduleEntry> {
        self.slots.values().map(|slot| slot.entry.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Stop future fires; returns whether the state changed
    ///
    /// Pausing a paused schedule is a no-op. A disabled schedule stays
    /// disabled.
    pub fn pause(&mut self, id: ScheduleId, now: DateTime<Utc>) -> Result<bool> {
        let slot = self.slot_mut(id)?;
        if slot.entry.state != ScheduleState::Active {
            return Ok(false);
        }
        slot.entry.state = ScheduleState::Paused;
        slot.entry.next_fire_time = None;
        slot.entry.updated_at = now;
        Ok(true)
    }

    /// Disable until resumed; returns whether the state changed
    pub fn disable(&mut self, id: ScheduleId, now: DateTime<Utc>) -> Result<bool> {
        let slot = self.slot_mut(id)?;
        if slot.entry.state == ScheduleState::Disabled {
            return Ok(false);
        }
        slot.entry.state = ScheduleState::Disabled;
        slot.entry.next_fire_time = None;
        slot.entry.updated_at = now;
        Ok(true)
    }

    /// Re-activate a paused or disabled schedule
    ///
    /// `next_fire_time` is recomputed from `now`. A one-shot trigger that
    /// already fired stays without a fire time.
    pub fn resume(&mut self, id: ScheduleId, now: DateTime<Utc>) -> Result<bool> {
        let tz = self.timezone;
        let slot = self.slot_mut(id)?;
        if slot.entry.state == ScheduleState::Active {
            return Ok(false);
        }
        slot.entry.state = ScheduleState::Active;
        slot.entry.next_fire_time = match (&slot.trigger, slot.entry.last_fired_at) {
            (CompiledTrigger::Once(_), Some(_)) => None,
            (trigger, _) => trigger.first_fire(now, tz),
        };
        slot.entry.updated_at = now;
        Ok(true)
    }

    /// Apply a partial update
    ///
    /// A new trigger is validated like a registration and, for an active
    /// schedule, `next_fire_time` is recomputed from `now`.
    pub fn update(&mut self, id: ScheduleId, update: ScheduleUpdate, now: DateTime<Utc>) -> Result<()> {
        let tz = self.timezone;
        let trigger = update.trigger.as_ref().map(CompiledTrigger::compile).transpose()?;
        if let Some(policy) = &update.retry_policy {
            policy.validate()?;
        }
        if let Some(timeout) = update.timeout {
            validate_timeout(timeout)?;
        }

        let slot = self.slot_mut(id)?;
        if let Some(compiled) = trigger {
            slot.trigger = compiled;
            slot.entry.last_fired_at = None;
            if let Some(kind) = update.trigger {
                slot.entry.trigger_kind = kind;
            }
            if slot.entry.state == ScheduleState::Active {
                slot.entry.next_fire_time = slot.trigger.first_fire(now, tz);
            }
        }
        if let Some(target) = update.target {
            slot.entry.target = target;
        }
        if let Some(policy) = update.retry_policy {
            slot.entry.retry_policy = policy;
        }
        if let Some(timeout) = update.timeout {
            slot.entry.timeout = timeout;
        }
        if let Some(name) = update.name {
            slot.entry.name = Some(name);
        }
        slot.entry.updated_at = now;
        Ok(())
    }

    /// Flag the schedule for removal once its run in flight finishes
    pub fn mark_pending_removal(&mut self, id: ScheduleId, now: DateTime<Utc>) -> Result<()> {
        let slot = self.slot_mut(id)?;
        slot.entry.pending_removal = true;
        slot.entry.next_fire_time = None;
        slot.entry.updated_at = now;
        Ok(())
    }

    pub fn remove(&mut self, id: ScheduleId) -> Result<ScheduleEntry> {
        self.slots
            .remove(&id)
            .map(|slot| slot.entry)
            .ok_or_else(|| CadenceError::schedule_not_found(id))
    }

    /// Schedules due at `now`, earliest fire time first
    pub fn due(&self, now: DateTime<Utc>) -> Vec<ScheduleId> {
        let mut due: Vec<_> = self
            .slots
            .values()
            .filter(|slot| slot.entry.is_due(now))
            .filter_map(|slot| slot.entry.next_fire_time.map(|at| (at, slot.entry.schedule_id)))
            .collect();
        due.sort();
        due.into_iter().map(|(_, id)| id).collect()
    }

    /// Advance a due schedule past `now`
    ///
    /// `fired` is false when the fire was skipped because a run was still
    /// in flight; recurring triggers advance anyway, a one-shot trigger stays
    /// due. A one-shot trigger that fired disables its schedule.
    pub fn advance(&mut self, id: ScheduleId, now: DateTime<Utc>, fired: bool) -> Result<()> {
        let tz = self.timezone;
        let slot = self.slot_mut(id)?;
        let Some(due) = slot.entry.next_fire_time else {
            return Ok(());
        };

        if fired {
            slot.entry.last_fired_at = Some(now);
        }
        match (&slot.trigger, fired) {
            (CompiledTrigger::Once(_), false) => {}
            (CompiledTrigger::Once(_), true) => {
                slot.entry.state = ScheduleState::Disabled;
                slot.entry.next_fire_time = None;
                slot.entry.updated_at = now;
            }
            (trigger, _) => {
                let next = trigger.next_fire(due, now, tz);
                if next.is_none() {
                    warn!(schedule_id = %id, "No fire time within the search horizon; schedule will not fire again");
                }
                slot.entry.next_fire_time = next;
            }
        }
        Ok(())
    }

    /// Record a manual fire
    pub fn record_manual_fire(&mut self, id: ScheduleId, now: DateTime<Utc>) -> Result<()> {
        self.slot_mut(id)?.entry.last_fired_at = Some(now);
        Ok(())
    }

    fn first_fire(
        &self,
        trigger: &CompiledTrigger,
        id: ScheduleId,
        now: DateTime<Utc>,
    ) -> Option<DateTime<Utc>> {
        let next = trigger.first_fire(now, self.timezone);
        if next.is_none() && !matches!(trigger, CompiledTrigger::Manual) {
            warn!(schedule_id = %id, "No fire time within the search horizon");
        }
        next
    }

    fn slot_mut(&mut self, id: ScheduleId) -> Result<&mut Slot> {
        self.slots.get_mut(&id).ok_or_else(|| CadenceError::schedule_not_found(id))
    }
}

fn validate_timeout(timeout: Duration) -> Result<()> {
    if timeout.is_zero() {
        return Err(CadenceError::Config("timeout must be positive".into()));
    }
    Ok(())
}
