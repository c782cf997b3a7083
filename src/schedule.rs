//! Five-field cron expressions.
//!
//! Job schedules use the classic `minute hour day-of-month month day-of-week`
//! form with Sunday as 0 or 7. They are translated into the seconds-first
//! dialect of the `cron` crate, with numeric weekdays rewritten to names.

use std::str::FromStr;

use chrono::{DateTime, TimeZone};

use crate::error::ConfigError;

const WEEKDAYS: [&str; 8] = ["SUN", "MON", "TUE", "WED", "THU", "FRI", "SAT", "SUN"];

/// A parsed job schedule.
#[derive(Debug, Clone)]
pub struct CronSchedule {
    expression: String,
    schedule: cron::Schedule,
}

impl CronSchedule {
    /// Parse a five-field cron expression.
    pub fn parse(expression: &str) -> Result<Self, ConfigError> {
        let invalid = |message: String| ConfigError::InvalidCron {
            expression: expression.to_string(),
            message,
        };

        let fields: Vec<&str> = expression.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(invalid(format!("expected 5 fields, got {}", fields.len())));
        }

        let weekday = normalize_weekday_field(fields[4]).map_err(invalid)?;
        let translated = format!(
            "0 {} {} {} {} {}",
            fields[0], fields[1], fields[2], fields[3], weekday
        );

        let schedule = cron::Schedule::from_str(&translated).map_err(|e| invalid(e.to_string()))?;

        Ok(Self {
            expression: expression.to_string(),
            schedule,
        })
    }

    /// The expression as configured.
    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// First fire time strictly after `after`.
    pub fn next_after<Z: TimeZone>(&self, after: &DateTime<Z>) -> Option<DateTime<Z>> {
        self.schedule.after(after).next()
    }
}

fn normalize_weekday_field(field: &str) -> Result<String, String> {
    field
        .split(',')
        .map(normalize_weekday_item)
        .collect::<Result<Vec<_>, _>>()
        .map(|items| items.join(","))
}

fn normalize_weekday_item(item: &str) -> Result<String, String> {
    let (range, step) = match item.split_once('/') {
        Some((range, step)) => (range, Some(step)),
        None => (item, None),
    };

    let range = if range == "*" || range == "?" {
        range.to_string()
    } else {
        range
            .split('-')
            .map(weekday_name)
            .collect::<Result<Vec<_>, _>>()?
            .join("-")
    };

    Ok(match step {
        Some(step) => format!("{range}/{step}"),
        None => range,
    })
}

fn weekday_name(token: &str) -> Result<String, String> {
    match token.parse::<usize>() {
        Ok(index) => WEEKDAYS
            .get(index)
            .map(|name| name.to_string())
            .ok_or_else(|| format!("day-of-week {index} out of range")),
        Err(_) => Ok(token.to_ascii_uppercase()),
    }
}
