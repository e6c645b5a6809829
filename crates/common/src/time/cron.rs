//! Cron expression parsing and evaluation
//!
//! Expressions have five fields (`minute hour day-of-month month
//! day-of-week`) or six fields with a leading seconds field. Each field
//! accepts `*`, single values, ranges `a-b`, steps `*/n`, `a-b/n` and
//! `a/n`, and comma separated lists of those. Months accept `JAN`..`DEC`,
//! weekdays accept `SUN`..`SAT`, and `7` is another spelling of Sunday.
//!
//! When both day-of-month and day-of-week are restricted a day matches if
//! either field matches, as in Vixie cron. A field starting with `*` counts
//! as unrestricted for that rule.
//!
//! Evaluation happens on local wall-clock time in a [`chrono_tz::Tz`]. Local
//! times that fall into a daylight-saving gap are skipped. When the clock
//! falls back, expressions with a wildcard hour or minute match in both
//! passes of the repeated hour and fixed times of day only in the first.

use std::fmt;

use chrono::{
    DateTime, Datelike, LocalResult, NaiveDate, NaiveDateTime, TimeZone, Timelike, Utc,
};
use chrono_tz::Tz;
use thiserror::Error;

/// How far ahead `next_after` searches before giving up
const SEARCH_HORIZON_YEARS: i32 = 5;

/// Error type for cron parsing
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CronParseError {
    #[error("Invalid cron expression: {0}")]
    InvalidExpression(String),

    #[error("Invalid field: {0}")]
    InvalidField(String),

    #[error("Invalid range: {0}")]
    InvalidRange(String),

    #[error("Invalid step: {0}")]
    InvalidStep(String),

    #[error("Wrong number of fields: expected 5 or 6, got {0}")]
    WrongFieldCount(usize),
}

struct FieldSpec {
    name: &'static str,
    min: u32,
    max: u32,
    /// Symbolic names, the first of which maps to `name_base`
    names: &'static [&'static str],
    name_base: u32,
}

const SECOND: FieldSpec = FieldSpec { name: "second", min: 0, max: 59, names: &[], name_base: 0 };
const MINUTE: FieldSpec = FieldSpec { name: "minute", min: 0, max: 59, names: &[], name_base: 0 };
const HOUR: FieldSpec = FieldSpec { name: "hour", min: 0, max: 23, names: &[], name_base: 0 };
const DAY_OF_MONTH: FieldSpec =
    FieldSpec { name: "day-of-month", min: 1, max: 31, names: &[], name_base: 0 };
const MONTH: FieldSpec = FieldSpec {
    name: "month",
    min: 1,
    max: 12,
    names: &["JAN", "FEB", "MAR", "APR", "MAY", "JUN", "JUL", "AUG", "SEP", "OCT", "NOV", "DEC"],
    name_base: 1,
};
// 7 is accepted and folded onto 0 after parsing
const DAY_OF_WEEK: FieldSpec = FieldSpec {
    name: "day-of-week",
    min: 0,
    max: 7,
    names: &["SUN", "MON", "TUE", "WED", "THU", "FRI", "SAT"],
    name_base: 0,
};

/// A single cron field stored as a bitset of allowed values
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct CronField {
    bits: u64,
    /// Field text started with `*`
    star: bool,
}

impl CronField {
    fn single(value: u32) -> Self {
        Self { bits: 1 << value, star: false }
    }

    fn parse(s: &str, spec: &FieldSpec) -> Result<Self, CronParseError> {
        if s.is_empty() {
            return Err(CronParseError::InvalidField(format!("empty {} field", spec.name)));
        }

        let mut bits = 0u64;
        for part in s.split(',') {
            bits |= Self::parse_part(part, spec)?;
        }

        Ok(Self { bits, star: s.starts_with('*') })
    }

    fn parse_part(part: &str, spec: &FieldSpec) -> Result<u64, CronParseError> {
        let (base, step) = match part.split_once('/') {
            Some((base, step)) => {
                let step: u32 = step.parse().map_err(|_| {
                    CronParseError::InvalidStep(format!("{part} in {} field", spec.name))
                })?;
                if step == 0 {
                    return Err(CronParseError::InvalidStep(format!(
                        "{part}: step must be positive"
                    )));
                }
                (base, Some(step))
            }
            None => (part, None),
        };

        let (start, end) = if base == "*" {
            (spec.min, spec.max)
        } else if let Some((a, b)) = base.split_once('-') {
            let start = parse_value(a, spec)?;
            let end = parse_value(b, spec)?;
            if start > end {
                return Err(CronParseError::InvalidRange(format!(
                    "{start}-{end} is descending in {} field",
                    spec.name
                )));
            }
            (start, end)
        } else {
            let value = parse_value(base, spec)?;
            // `a/n` runs from `a` to the end of the field
            if step.is_some() {
                (value, spec.max)
            } else {
                (value, value)
            }
        };

        let step = step.unwrap_or(1);
        let mut bits = 0u64;
        let mut value = start;
        while value <= end {
            bits |= 1 << value;
            match value.checked_add(step) {
                Some(next) => value = next,
                None => break,
            }
        }
        Ok(bits)
    }

    fn contains(&self, value: u32) -> bool {
        self.bits & (1 << value) != 0
    }
}

fn parse_value(token: &str, spec: &FieldSpec) -> Result<u32, CronParseError> {
    let value = match token.parse::<u32>() {
        Ok(value) => value,
        Err(_) => {
            let upper = token.to_ascii_uppercase();
            let index = spec.names.iter().position(|name| *name == upper).ok_or_else(|| {
                CronParseError::InvalidField(format!("{token} in {} field", spec.name))
            })?;
            index as u32 + spec.name_base
        }
    };

    if value < spec.min || value > spec.max {
        return Err(CronParseError::InvalidRange(format!(
            "{value} not in range {}-{} for {} field",
            spec.min, spec.max, spec.name
        )));
    }
    Ok(value)
}

fn expand_macro(expr: &str) -> Option<&'static str> {
    match expr {
        "@yearly" | "@annually" => Some("0 0 1 1 *"),
        "@monthly" => Some("0 0 1 * *"),
        "@weekly" => Some("0 0 * * 0"),
        "@daily" | "@midnight" => Some("0 0 * * *"),
        "@hourly" => Some("0 * * * *"),
        _ => None,
    }
}

/// A parsed cron expression
///
/// # Examples
///
/// ```
/// # #[cfg(feature = "foundation")]
/// # {
/// use cadence_common::time::cron::CronExpression;
///
/// // Every day at midnight
/// let cron = CronExpression::parse("0 0 * * *").unwrap();
///
/// // Every 15 seconds
/// let cron = CronExpression::parse("*/15 * * * * *").unwrap();
///
/// // Every weekday at 9am
/// let cron = CronExpression::parse("0 9 * * MON-FRI").unwrap();
/// # }
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronExpression {
    source: String,
    second: CronField,
    minute: CronField,
    hour: CronField,
    day: CronField,
    month: CronField,
    weekday: CronField,
}

impl CronExpression {
    /// Parse a cron expression from a string
    pub fn parse(expr: &str) -> Result<Self, CronParseError> {
        let trimmed = expr.trim();
        if trimmed.is_empty() {
            return Err(CronParseError::InvalidExpression("empty expression".to_string()));
        }

        let expanded = if trimmed.starts_with('@') {
            expand_macro(trimmed)
                .ok_or_else(|| CronParseError::InvalidExpression(trimmed.to_string()))?
        } else {
            trimmed
        };

        let parts: Vec<&str> = expanded.split_whitespace().collect();
        let (second, rest) = match parts.len() {
            5 => (CronField::single(0), &parts[..]),
            6 => (CronField::parse(parts[0], &SECOND)?, &parts[1..]),
            n => return Err(CronParseError::WrongFieldCount(n)),
        };

        let mut weekday = CronField::parse(rest[4], &DAY_OF_WEEK)?;
        if weekday.contains(7) {
            weekday.bits = (weekday.bits & !(1 << 7)) | 1;
        }

        Ok(Self {
            source: trimmed.to_string(),
            second,
            minute: CronField::parse(rest[0], &MINUTE)?,
            hour: CronField::parse(rest[1], &HOUR)?,
            day: CronField::parse(rest[2], &DAY_OF_MONTH)?,
            month: CronField::parse(rest[3], &MONTH)?,
            weekday,
        })
    }

    /// Check if a datetime matches this cron expression in its own time zone
    pub fn matches<Z: TimeZone>(&self, dt: &DateTime<Z>) -> bool {
        self.second.contains(dt.second())
            && self.minute.contains(dt.minute())
            && self.hour.contains(dt.hour())
            && self.month.contains(dt.month())
            && self.day_matches(dt.date_naive())
    }

    fn day_matches(&self, date: NaiveDate) -> bool {
        let dom = self.day.contains(date.day());
        let dow = self.weekday.contains(date.weekday().num_days_from_sunday());
        if self.day.star || self.weekday.star {
            dom && dow
        } else {
            dom || dow
        }
    }

    /// Get the next occurrence strictly after the given datetime, evaluated
    /// in UTC
    pub fn next_after(&self, dt: &DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.next_after_in(dt, &Utc)
    }

    /// Get the next occurrence strictly after `after`, with the fields
    /// interpreted as wall-clock time in `tz`
    ///
    /// Returns `None` when nothing matches within the search horizon (for
    /// example `0 0 30 2 *`). Across a fall-back fold the result is the
    /// earliest matching UTC instant: expressions with a wildcard hour or
    /// minute fire in both passes of the repeated hour, while fixed times
    /// of day fire only in the first pass.
    pub fn next_after_in<Z: TimeZone>(
        &self,
        after: &DateTime<Utc>,
        tz: &Z,
    ) -> Option<DateTime<Utc>> {
        let naive = after.with_timezone(tz).naive_local().with_nanosecond(0)?;
        let horizon = naive.year() + SEARCH_HORIZON_YEARS;
        let repeats = self.repeats_in_fold();
        let mut from = naive + chrono::Duration::seconds(1);

        // In the first pass of a fold the second pass of earlier wall times
        // is still ahead, so the search starts one fold back and keeps the
        // earliest instant instead of the first wall-clock match.
        let mut fold_offset = None;
        if let LocalResult::Ambiguous(a, b) = tz.from_local_datetime(&naive) {
            let (early, late) = ordered(a, b);
            if repeats && *after < late {
                from -= late - early;
                fold_offset = Some(naive - early.naive_utc());
            }
        }

        let mut best: Option<DateTime<Utc>> = None;
        while let Some(candidate) = self.next_wall_match(from, horizon) {
            if let (Some(found), Some(offset)) = (best, fold_offset) {
                if candidate - offset >= found.naive_utc() {
                    break;
                }
            }
            if let Some(instant) = resolve_local(tz, &candidate, after, repeats) {
                if fold_offset.is_none() {
                    return Some(instant);
                }
                best = Some(best.map_or(instant, |found| found.min(instant)));
            }
            from = candidate + chrono::Duration::seconds(1);
        }

        best
    }

    /// Vixie cron reruns only jobs whose hour or minute is a wildcard when
    /// the clock falls back
    fn repeats_in_fold(&self) -> bool {
        self.hour.star || self.minute.star
    }

    /// First wall-clock time at or after `from` that matches every field
    fn next_wall_match(&self, from: NaiveDateTime, horizon: i32) -> Option<NaiveDateTime> {
        let mut naive = from;
        while naive.year() <= horizon {
            if !self.month.contains(naive.month()) {
                naive = start_of_next_month(naive)?;
                continue;
            }
            if !self.day_matches(naive.date()) {
                naive = naive.date().succ_opt()?.and_hms_opt(0, 0, 0)?;
                continue;
            }
            if !self.hour.contains(naive.hour()) {
                naive = naive.date().and_hms_opt(naive.hour(), 0, 0)? + chrono::Duration::hours(1);
                continue;
            }
            if !self.minute.contains(naive.minute()) {
                naive = naive.date().and_hms_opt(naive.hour(), naive.minute(), 0)?
                    + chrono::Duration::minutes(1);
                continue;
            }
            if !self.second.contains(naive.second()) {
                naive += chrono::Duration::seconds(1);
                continue;
            }
            return Some(naive);
        }
        None
    }
}

/// Map a local wall-clock time to a UTC instant after `after`
///
/// Times inside a DST gap map to nothing. An ambiguous time yields its
/// first pass, or its second pass too when `repeats` is set.
fn resolve_local<Z: TimeZone>(
    tz: &Z,
    naive: &NaiveDateTime,
    after: &DateTime<Utc>,
    repeats: bool,
) -> Option<DateTime<Utc>> {
    match tz.from_local_datetime(naive) {
        LocalResult::Single(dt) => Some(dt.with_timezone(&Utc)).filter(|t| t > after),
        LocalResult::Ambiguous(a, b) => {
            let (early, late) = ordered(a, b);
            let passes = if repeats { &[early, late][..] } else { &[early][..] };
            passes.iter().copied().find(|t| t > after)
        }
        LocalResult::None => None,
    }
}

fn ordered<Z: TimeZone>(a: DateTime<Z>, b: DateTime<Z>) -> (DateTime<Utc>, DateTime<Utc>) {
    let (a, b) = (a.with_timezone(&Utc), b.with_timezone(&Utc));
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

fn start_of_next_month(naive: NaiveDateTime) -> Option<NaiveDateTime> {
    let (year, month) =
        if naive.month() == 12 { (naive.year() + 1, 1) } else { (naive.year(), naive.month() + 1) };
    NaiveDate::from_ymd_opt(year, month, 1)?.and_hms_opt(0, 0, 0)
}

impl fmt::Display for CronExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

impl std::str::FromStr for CronExpression {
    type Err = CronParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// A cron expression bound to the time zone it is evaluated in
#[derive(Debug, Clone, PartialEq)]
pub struct CronSchedule {
    expression: CronExpression,
    timezone: Tz,
}

impl CronSchedule {
    /// Create a new cron schedule evaluated in UTC
    pub fn new(expr: &str) -> Result<Self, CronParseError> {
        Self::with_timezone(expr, Tz::UTC)
    }

    /// Create a cron schedule evaluated in the given IANA time zone
    pub fn with_timezone(expr: &str, timezone: Tz) -> Result<Self, CronParseError> {
        Ok(Self { expression: CronExpression::parse(expr)?, timezone })
    }

    /// The parsed expression
    pub fn expression(&self) -> &CronExpression {
        &self.expression
    }

    /// Time zone the fields are interpreted in
    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    /// Get the next occurrence after now
    pub fn next(&self) -> Option<DateTime<Utc>> {
        self.next_after(&Utc::now())
    }

    /// Get the next occurrence strictly after a specific datetime
    pub fn next_after(&self, dt: &DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.expression.next_after_in(dt, &self.timezone)
    }

    /// Check if the schedule matches the given instant
    pub fn matches(&self, dt: &DateTime<Utc>) -> bool {
        self.expression.matches(&dt.with_timezone(&self.timezone))
    }
}
