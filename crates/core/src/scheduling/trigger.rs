//! Trigger evaluation
//!
//! A [`TriggerKind`] is validated and compiled once at registration; the
//! compiled form answers "when next?" on every tick without re-parsing.

use std::time::Duration;

use cadence_common::time::CronExpression;
use cadence_domain::{CadenceError, Result, TriggerKind};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;

/// Validated, ready-to-evaluate trigger
#[derive(Debug, Clone, PartialEq)]
pub enum CompiledTrigger {
    Cron(CronExpression),
    Interval(Duration),
    Manual,
    Once(DateTime<Utc>),
}

impl CompiledTrigger {
    /// Validate and compile `kind`
    ///
    /// # Errors
    /// Returns `CadenceError::InvalidTrigger` for an unparsable cron
    /// expression or a non-positive interval.
    pub fn compile(kind: &TriggerKind) -> Result<Self> {
        match kind {
            TriggerKind::Cron { expression } => CronExpression::parse(expression)
                .map(Self::Cron)
                .map_err(|e| CadenceError::InvalidTrigger(format!("{expression}: {e}"))),
            TriggerKind::Interval { every } => {
                if every.is_zero() {
                    Err(CadenceError::InvalidTrigger("interval must be positive".into()))
                } else if chrono::Duration::from_std(*every).is_err() {
                    Err(CadenceError::InvalidTrigger(format!("interval {every:?} is too large")))
                } else {
                    Ok(Self::Interval(*every))
                }
            }
            TriggerKind::Manual => Ok(Self::Manual),
            TriggerKind::Once { at } => Ok(Self::Once(*at)),
        }
    }

    /// First fire time for a schedule (re)activated at `now`
    ///
    /// A one-shot time already in the past is returned as is, so it fires
    /// on the next tick.
    pub fn first_fire(&self, now: DateTime<Utc>, tz: Tz) -> Option<DateTime<Utc>> {
        match self {
            Self::Cron(expr) => expr.next_after_in(&now, &tz),
            Self::Interval(every) => add(now, *every),
            Self::Manual => None,
            Self::Once(at) => Some(*at),
        }
    }

    /// Fire time following a fire that was due at `due` and handled at `now`
    ///
    /// The result is always after `now`; fires missed in between are
    /// dropped rather than queued.
    pub fn next_fire(
        &self,
        due: DateTime<Utc>,
        now: DateTime<Utc>,
        tz: Tz,
    ) -> Option<DateTime<Utc>> {
        match self {
            Self::Cron(expr) => expr.next_after_in(&now.max(due), &tz),
            Self::Interval(every) => next_interval(due, now, *every),
            Self::Manual | Self::Once(_) => None,
        }
    }
}

fn add(at: DateTime<Utc>, every: Duration) -> Option<DateTime<Utc>> {
    at.checked_add_signed(chrono::Duration::from_std(every).ok()?)
}

/// Smallest `due + k * every` (k >= 1) strictly after `now`
fn next_interval(due: DateTime<Utc>, now: DateTime<Utc>, every: Duration) -> Option<DateTime<Utc>> {
    let step = chrono::Duration::from_std(every).ok()?;
    let step_nanos = step.num_nanoseconds().filter(|n| *n > 0)?;
    let behind = (now - due).num_nanoseconds().unwrap_or(i64::MAX).max(0);
    let periods = behind / step_nanos + 1;
    due.checked_add_signed(chrono::Duration::nanoseconds(step_nanos.checked_mul(periods)?))
}
