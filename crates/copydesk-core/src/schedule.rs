//! Schedules and recurrence rules.
//!
//! A schedule tells the scheduler how often to release pending work for a
//! client and how much of it to release per run. All recurrence math happens
//! in a single reference timezone; converting due times for display is left
//! to the presentation layer.

use chrono::{
    DateTime, Datelike, Duration, Months, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc,
};
use chrono_tz::Tz;
use derive_more::Display;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::{ClientId, Error, Result, ScheduleId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
pub enum Frequency {
    #[display("daily")]
    Daily,
    #[display("weekly")]
    Weekly,
    #[display("monthly")]
    Monthly,
}

impl Frequency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Frequency::Daily => "daily",
            Frequency::Weekly => "weekly",
            Frequency::Monthly => "monthly",
        }
    }
}

impl std::str::FromStr for Frequency {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "daily" => Ok(Frequency::Daily),
            "weekly" => Ok(Frequency::Weekly),
            "monthly" => Ok(Frequency::Monthly),
            _ => Err(Error::InvalidInput(format!("unknown frequency: {}", s))),
        }
    }
}

/// Lifecycle state of a schedule. `Deleted` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleState {
    #[display("active")]
    Active,
    #[display("paused")]
    Paused,
    #[display("deleted")]
    Deleted,
}

impl ScheduleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScheduleState::Active => "active",
            ScheduleState::Paused => "paused",
            ScheduleState::Deleted => "deleted",
        }
    }
}

impl std::str::FromStr for ScheduleState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "active" => Ok(ScheduleState::Active),
            "paused" => Ok(ScheduleState::Paused),
            "deleted" => Ok(ScheduleState::Deleted),
            _ => Err(Error::InvalidInput(format!("unknown schedule state: {}", s))),
        }
    }
}

/// When a schedule fires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecurrenceRule {
    pub frequency: Frequency,
    /// Fire every `interval` periods.
    #[serde(default = "default_interval")]
    pub interval: u32,
    /// Time of day in the reference timezone.
    #[serde(with = "hhmm")]
    pub start_time: NaiveTime,
    /// Weekday numbers, 0 = Sunday through 6 = Saturday. Weekly only.
    #[serde(default)]
    pub days_of_week: BTreeSet<u8>,
    /// Day of month, 1-31. Monthly only; clamped to the month's last day.
    #[serde(default)]
    pub day_of_month: Option<u8>,
}

fn default_interval() -> u32 {
    1
}

impl RecurrenceRule {
    pub fn daily(start_time: NaiveTime) -> Self {
        Self {
            frequency: Frequency::Daily,
            interval: 1,
            start_time,
            days_of_week: BTreeSet::new(),
            day_of_month: None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.interval == 0 {
            return Err(Error::InvalidInput("interval must be at least 1".to_string()));
        }
        if let Some(day) = self.days_of_week.iter().find(|d| **d > 6) {
            return Err(Error::InvalidInput(format!(
                "weekday {} is out of range 0-6",
                day
            )));
        }
        if let Some(day) = self.day_of_month {
            if !(1..=31).contains(&day) {
                return Err(Error::InvalidInput(format!(
                    "day of month {} is out of range 1-31",
                    day
                )));
            }
        }
        Ok(())
    }

    /// The earliest instant strictly after `now` at which this rule fires.
    pub fn next_run_after(&self, now: DateTime<Utc>, tz: Tz) -> DateTime<Utc> {
        let today = now.with_timezone(&tz).date_naive();
        let interval = self.interval.max(1);

        let date = match self.frequency {
            Frequency::Daily => {
                if self.fires_after(today, now, tz) {
                    today
                } else {
                    today + Duration::days(i64::from(interval))
                }
            }
            Frequency::Weekly => self.next_weekly_date(today, now, tz, interval),
            Frequency::Monthly => self.next_monthly_date(today, now, tz, interval),
        };

        self.at_start_time(date, tz)
    }

    fn next_weekly_date(
        &self,
        today: NaiveDate,
        now: DateTime<Utc>,
        tz: Tz,
        interval: u32,
    ) -> NaiveDate {
        let Some(&first_day) = self.days_of_week.iter().next() else {
            return if self.fires_after(today, now, tz) {
                today
            } else {
                today + Duration::weeks(i64::from(interval))
            };
        };

        let weekday = today.weekday().num_days_from_sunday() as u8;
        if self.days_of_week.contains(&weekday) && self.fires_after(today, now, tz) {
            return today;
        }

        if let Some(&later) = self.days_of_week.range(weekday + 1..).next() {
            return today + Duration::days(i64::from(later - weekday));
        }

        // Wrap to the first listed weekday of the next eligible week.
        let to_next_week = i64::from(7 - weekday) + i64::from(first_day);
        today + Duration::days(to_next_week) + Duration::weeks(i64::from(interval - 1))
    }

    fn next_monthly_date(
        &self,
        today: NaiveDate,
        now: DateTime<Utc>,
        tz: Tz,
        interval: u32,
    ) -> NaiveDate {
        let day = self
            .day_of_month
            .map(u32::from)
            .unwrap_or_else(|| today.day());
        let first_of_month = today - Duration::days(i64::from(today.day0()));

        let this_month = day_in_month(first_of_month, day);
        if self.fires_after(this_month, now, tz) {
            return this_month;
        }

        let later = first_of_month
            .checked_add_months(Months::new(interval))
            .unwrap_or(first_of_month);
        day_in_month(later, day)
    }

    fn fires_after(&self, date: NaiveDate, now: DateTime<Utc>, tz: Tz) -> bool {
        self.at_start_time(date, tz) > now
    }

    fn at_start_time(&self, date: NaiveDate, tz: Tz) -> DateTime<Utc> {
        resolve_local(tz, date.and_time(self.start_time))
    }
}

/// Map a wall-clock time in `tz` to UTC.
///
/// Ambiguous times (clocks going back) take the earlier instant; times that do
/// not exist (clocks going forward) are pushed past the gap.
fn resolve_local(tz: Tz, local: NaiveDateTime) -> DateTime<Utc> {
    tz.from_local_datetime(&local)
        .earliest()
        .or_else(|| tz.from_local_datetime(&(local + Duration::hours(1))).earliest())
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|| Utc.from_utc_datetime(&local))
}

/// `day` of the month starting at `first_of_month`, clamped to its last day.
fn day_in_month(first_of_month: NaiveDate, day: u32) -> NaiveDate {
    let last_day = first_of_month
        .checked_add_months(Months::new(1))
        .and_then(|next| next.pred_opt())
        .map(|last| last.day())
        .unwrap_or(28);
    first_of_month + Duration::days(i64::from(day.clamp(1, last_day) - 1))
}

/// Parse a `HH:MM` (or `HH:MM:SS`) time of day.
pub fn parse_start_time(s: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(s.trim(), "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(s.trim(), "%H:%M:%S"))
        .map_err(|_| Error::InvalidInput(format!("invalid start time '{}', expected HH:MM", s)))
}

mod hhmm {
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(time: &NaiveTime, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&time.format("%H:%M").to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveTime, D::Error> {
        let raw = String::deserialize(deserializer)?;
        super::parse_start_time(&raw).map_err(serde::de::Error::custom)
    }
}

/// A recurrence policy owned by one client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schedule {
    pub id: ScheduleId,
    pub client_id: ClientId,
    pub name: String,
    pub rule: RecurrenceRule,
    /// Ceiling on items released per execution.
    pub jobs_per_run: u32,
    pub state: ScheduleState,
    pub last_run_at: Option<DateTime<Utc>>,
    pub next_run_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Schedule {
    pub fn is_active(&self) -> bool {
        self.state == ScheduleState::Active
    }

    /// Active and its next run is at or before `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.is_active() && self.next_run_at.is_some_and(|next| next <= now)
    }
}

/// Parameters for creating a schedule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewSchedule {
    pub client_id: ClientId,
    pub name: String,
    pub rule: RecurrenceRule,
    pub jobs_per_run: u32,
}

impl NewSchedule {
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::InvalidInput("schedule name is required".to_string()));
        }
        validate_jobs_per_run(self.jobs_per_run)?;
        self.rule.validate()
    }
}

/// Parameters for editing a schedule's policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleUpdate {
    pub name: Option<String>,
    pub rule: Option<RecurrenceRule>,
    pub jobs_per_run: Option<u32>,
}

impl ScheduleUpdate {
    pub fn validate(&self) -> Result<()> {
        if let Some(name) = &self.name {
            if name.trim().is_empty() {
                return Err(Error::InvalidInput("schedule name is required".to_string()));
            }
        }
        if let Some(jobs_per_run) = self.jobs_per_run {
            validate_jobs_per_run(jobs_per_run)?;
        }
        match &self.rule {
            Some(rule) => rule.validate(),
            None => Ok(()),
        }
    }
}

fn validate_jobs_per_run(jobs_per_run: u32) -> Result<()> {
    if jobs_per_run == 0 {
        return Err(Error::InvalidInput("jobs per run must be at least 1".to_string()));
    }
    Ok(())
}
