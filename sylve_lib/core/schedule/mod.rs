use std::str::FromStr;

use chrono::{DateTime, Datelike, Duration, Timelike, Utc};
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ScheduleError {
    #[error("expected 5 cron fields, got {0}")]
    FieldCount(usize),
    #[error("invalid cron field \"{0}\"")]
    InvalidField(String),
    #[error("cron value {0} out of range {1}-{2}")]
    OutOfRange(u32, u32, u32),
}

/// Allowed values of one cron field, as a bitmask
#[derive(Debug, Clone, Copy)]
struct Field {
    mask: u64,
    /// False only for a bare `*`, used for the day-of-month/day-of-week rule
    restricted: bool,
}

impl Field {
    fn contains(self, value: u32) -> bool {
        self.mask >> value & 1 == 1
    }
}

fn parse_value(token: &str, min: u32, max: u32) -> Result<u32, ScheduleError> {
    let value = token
        .parse::<u32>()
        .map_err(|_| ScheduleError::InvalidField(token.to_string()))?;

    if value < min || value > max {
        Err(ScheduleError::OutOfRange(value, min, max))
    } else {
        Ok(value)
    }
}

fn parse_field(field: &str, min: u32, max: u32) -> Result<Field, ScheduleError> {
    let mut mask = 0u64;

    for part in field.split(',') {
        let (range, step) = match part.split_once('/') {
            Some((range, step)) => (range, parse_value(step, 1, max)?),
            None => (part, 1),
        };

        let (start, end) = if range == "*" {
            (min, max)
        } else {
            match range.split_once('-') {
                Some((start, end)) => (parse_value(start, min, max)?, parse_value(end, min, max)?),
                // A single value with a step ("5/15") acts as "5-max/15"
                None if part.contains('/') => (parse_value(range, min, max)?, max),
                None => {
                    let value = parse_value(range, min, max)?;
                    (value, value)
                }
            }
        };

        if start > end {
            return Err(ScheduleError::InvalidField(part.to_string()));
        }

        let mut value = start;
        while value <= end {
            mask |= 1 << value;
            value += step;
        }
    }

    if mask == 0 {
        return Err(ScheduleError::InvalidField(field.to_string()));
    }

    Ok(Field {
        mask,
        restricted: field != "*",
    })
}

/// Parsed 5-field cron expression (minute, hour, day of month, month,
/// day of week), evaluated in UTC
#[derive(Debug, Clone, Copy)]
pub struct Schedule {
    minute: Field,
    hour: Field,
    day_of_month: Field,
    month: Field,
    day_of_week: Field,
}

impl FromStr for Schedule {
    type Err = ScheduleError;

    fn from_str(expression: &str) -> Result<Self, Self::Err> {
        let fields = expression.split_whitespace().collect::<Vec<_>>();

        if fields.len() != 5 {
            return Err(ScheduleError::FieldCount(fields.len()));
        }

        let mut day_of_week = parse_field(fields[4], 0, 7)?;

        // 7 is an alias for Sunday
        if day_of_week.contains(7) {
            day_of_week.mask |= 1;
        }

        Ok(Schedule {
            minute: parse_field(fields[0], 0, 59)?,
            hour: parse_field(fields[1], 0, 23)?,
            day_of_month: parse_field(fields[2], 1, 31)?,
            month: parse_field(fields[3], 1, 12)?,
            day_of_week,
        })
    }
}

impl Schedule {
    fn day_matches(&self, time: DateTime<Utc>) -> bool {
        if !self.month.contains(time.month()) {
            return false;
        }

        let dom = self.day_of_month.contains(time.day());
        let dow = self
            .day_of_week
            .contains(time.weekday().num_days_from_sunday());

        // Standard cron rule: restricted day fields combine with OR
        match (
            self.day_of_month.restricted,
            self.day_of_week.restricted,
        ) {
            (true, true) => dom || dow,
            (true, false) => dom,
            (false, true) => dow,
            (false, false) => true,
        }
    }

    /// First matching time strictly after `after`, or `None` if no match
    /// exists within four years (e.g. `0 0 30 2 *`)
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let mut time = (after + Duration::minutes(1))
            .with_second(0)
            .and_then(|time| time.with_nanosecond(0))?;

        let bound = after + Duration::days(365 * 4 + 1);

        while time <= bound {
            if !self.day_matches(time) {
                time = (time + Duration::days(1))
                    .with_hour(0)?
                    .with_minute(0)?;
                continue;
            }

            if !self.hour.contains(time.hour()) {
                time = (time + Duration::hours(1)).with_minute(0)?;
                continue;
            }

            if !self.minute.contains(time.minute()) {
                time = time + Duration::minutes(1);
                continue;
            }

            return Some(time);
        }

        None
    }
}
