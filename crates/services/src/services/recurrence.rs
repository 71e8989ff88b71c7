//! Next-occurrence computation for daily, weekly and monthly recurrence rules.
//!
//! All times are UTC. Weekdays are numbered 0 (Sunday) through 6 (Saturday).

use chrono::{DateTime, Datelike, Days, Months, NaiveDate, NaiveTime, Utc};
use db::models::recurring_task::{Frequency, RecurringTask};
use thiserror::Error;

/// Upper bound for [`upcoming_occurrences`]
pub const MAX_PREVIEW_OCCURRENCES: usize = 31;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecurrenceError {
    #[error("weekly rule has no days of week")]
    NoWeekdays,
    #[error("invalid day of week {0}, expected 0 (Sunday) to 6 (Saturday)")]
    InvalidWeekday(u32),
    #[error("monthly rule has no day of month")]
    MissingDayOfMonth,
    #[error("invalid day of month {0}, expected 1 to 31")]
    InvalidDayOfMonth(u32),
    #[error("invalid time of day '{0}', expected HH:MM or HH:MM:SS")]
    InvalidTimeOfDay(String),
    #[error("date out of range")]
    OutOfRange,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecurrenceRule {
    pub frequency: Frequency,
    pub time_of_day: NaiveTime,
    pub days_of_week: Vec<u32>,
    pub day_of_month: Option<u32>,
}

impl From<&RecurringTask> for RecurrenceRule {
    fn from(task: &RecurringTask) -> Self {
        Self {
            frequency: task.frequency,
            time_of_day: task.time_of_day,
            days_of_week: task.days_of_week.0.clone(),
            day_of_month: task.day_of_month,
        }
    }
}

impl RecurrenceRule {
    /// Check the fields the rule's frequency depends on
    pub fn validate(&self) -> Result<(), RecurrenceError> {
        match self.frequency {
            Frequency::Daily => Ok(()),
            Frequency::Weekly => {
                if self.days_of_week.is_empty() {
                    return Err(RecurrenceError::NoWeekdays);
                }
                match self.days_of_week.iter().find(|d| **d > 6) {
                    Some(day) => Err(RecurrenceError::InvalidWeekday(*day)),
                    None => Ok(()),
                }
            }
            Frequency::Monthly => match self.day_of_month {
                None => Err(RecurrenceError::MissingDayOfMonth),
                Some(day) if !(1..=31).contains(&day) => {
                    Err(RecurrenceError::InvalidDayOfMonth(day))
                }
                Some(_) => Ok(()),
            },
        }
    }

    /// The occurrence following a run at `after`.
    ///
    /// Daily rules land on the next calendar day, weekly rules on the first
    /// matching weekday within the next 7 days, monthly rules one calendar month
    /// later with the target day clamped to the length of that month.
    pub fn next_occurrence(&self, after: DateTime<Utc>) -> Result<DateTime<Utc>, RecurrenceError> {
        self.validate()?;
        let today = after.date_naive();

        let date = match self.frequency {
            Frequency::Daily => add_days(today, 1)?,
            Frequency::Weekly => self.next_matching_weekday(today, 1)?,
            Frequency::Monthly => {
                let next_month = today
                    .with_day(1)
                    .and_then(|first| first.checked_add_months(Months::new(1)))
                    .ok_or(RecurrenceError::OutOfRange)?;
                self.clamped_day_in_month(next_month)?
            }
        };

        Ok(self.at_time_of_day(date))
    }

    /// The first occurrence at or after `now`, counting today's slot when it
    /// has not passed yet.
    pub fn first_occurrence(&self, now: DateTime<Utc>) -> Result<DateTime<Utc>, RecurrenceError> {
        self.validate()?;
        let today = now.date_naive();
        let slot_passed = self.at_time_of_day(today) < now;

        let date = match self.frequency {
            Frequency::Daily if slot_passed => add_days(today, 1)?,
            Frequency::Daily => today,
            Frequency::Weekly => {
                self.next_matching_weekday(today, if slot_passed { 1 } else { 0 })?
            }
            Frequency::Monthly => {
                let first_of_month = today.with_day(1).ok_or(RecurrenceError::OutOfRange)?;
                let candidate = self.clamped_day_in_month(first_of_month)?;
                if self.at_time_of_day(candidate) >= now {
                    candidate
                } else {
                    return self.next_occurrence(self.at_time_of_day(candidate));
                }
            }
        };

        Ok(self.at_time_of_day(date))
    }

    /// The next `count` occurrences starting from `now`, capped at
    /// [`MAX_PREVIEW_OCCURRENCES`]
    pub fn upcoming_occurrences(
        &self,
        now: DateTime<Utc>,
        count: usize,
    ) -> Result<Vec<DateTime<Utc>>, RecurrenceError> {
        let count = count.min(MAX_PREVIEW_OCCURRENCES);
        let mut occurrences = Vec::with_capacity(count);
        if count == 0 {
            return Ok(occurrences);
        }

        let mut current = self.first_occurrence(now)?;
        occurrences.push(current);
        while occurrences.len() < count {
            current = self.next_occurrence(current)?;
            occurrences.push(current);
        }
        Ok(occurrences)
    }

    fn next_matching_weekday(
        &self,
        from: NaiveDate,
        start_offset: u64,
    ) -> Result<NaiveDate, RecurrenceError> {
        // Scan at most one week; validate() guarantees a match exists
        for offset in start_offset..start_offset + 7 {
            let candidate = add_days(from, offset)?;
            if self
                .days_of_week
                .contains(&candidate.weekday().num_days_from_sunday())
            {
                return Ok(candidate);
            }
        }
        Err(RecurrenceError::NoWeekdays)
    }

    fn clamped_day_in_month(&self, first_of_month: NaiveDate) -> Result<NaiveDate, RecurrenceError> {
        let target = self.day_of_month.ok_or(RecurrenceError::MissingDayOfMonth)?;
        let day = target.min(days_in_month(first_of_month)?);
        first_of_month
            .with_day(day)
            .ok_or(RecurrenceError::OutOfRange)
    }

    fn at_time_of_day(&self, date: NaiveDate) -> DateTime<Utc> {
        date.and_time(self.time_of_day).and_utc()
    }
}

/// Accepts `HH:MM` and `HH:MM:SS`
pub fn parse_time_of_day(value: &str) -> Result<NaiveTime, RecurrenceError> {
    let trimmed = value.trim();
    NaiveTime::parse_from_str(trimmed, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(trimmed, "%H:%M"))
        .map_err(|_| RecurrenceError::InvalidTimeOfDay(value.to_string()))
}

fn add_days(date: NaiveDate, days: u64) -> Result<NaiveDate, RecurrenceError> {
    date.checked_add_days(Days::new(days))
        .ok_or(RecurrenceError::OutOfRange)
}

fn days_in_month(first_of_month: NaiveDate) -> Result<u32, RecurrenceError> {
    let next = first_of_month
        .checked_add_months(Months::new(1))
        .ok_or(RecurrenceError::OutOfRange)?;
    Ok(next.signed_duration_since(first_of_month).num_days() as u32)
}
