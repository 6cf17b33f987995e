//! Sweep schedule configuration.
//!
//! The sweeper fires on a cron expression evaluated in a fixed timezone,
//! expressed as a UTC offset so the schedule never shifts with DST.
//!
//! # Example
//!
//! ```toml
//! [schedule]
//! cron = "0 3 * * *"     # every day at 03:00
//! utc_offset = "+09:00"  # Korea Standard Time
//! run_on_startup = false
//! ```

use chrono::FixedOffset;
use serde::{Deserialize, Serialize};

use super::ConfigError;

/// Schedule configuration for the daemon host.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScheduleConfig {
    /// Five-field cron expression (minute hour day-of-month month day-of-week).
    /// Default: "0 3 * * *"
    #[serde(default = "default_cron")]
    pub cron: String,

    /// Fixed UTC offset the cron expression is evaluated in, as `+HH:MM`/`-HH:MM`.
    /// Default: "+09:00"
    #[serde(default = "default_utc_offset")]
    pub utc_offset: String,

    /// Run one sweep immediately when the daemon starts, before waiting for
    /// the first scheduled time.
    /// Default: false
    #[serde(default)]
    pub run_on_startup: bool,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            cron: default_cron(),
            utc_offset: default_utc_offset(),
            run_on_startup: false,
        }
    }
}

fn default_cron() -> String {
    "0 3 * * *".to_string()
}

fn default_utc_offset() -> String {
    "+09:00".to_string()
}

impl ScheduleConfig {
    /// Parse `utc_offset` into a chrono offset.
    pub fn offset(&self) -> Result<FixedOffset, ConfigError> {
        parse_utc_offset(&self.utc_offset).ok_or_else(|| {
            ConfigError::Validation(format!(
                "schedule.utc_offset must look like +HH:MM or -HH:MM, got '{}'",
                self.utc_offset
            ))
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.offset()?;
        crate::retention::SweepSchedule::from_config(self)
            .map(|_| ())
            .map_err(|e| ConfigError::Validation(e.to_string()))
    }
}

/// Parse `Z`, `+HH:MM`, `-HH:MM` or `+HHMM` into a fixed offset.
fn parse_utc_offset(value: &str) -> Option<FixedOffset> {
    let value = value.trim();
    if value.eq_ignore_ascii_case("z") || value.eq_ignore_ascii_case("utc") {
        return FixedOffset::east_opt(0);
    }

    let (sign, rest) = match value.as_bytes().first()? {
        b'+' => (1, &value[1..]),
        b'-' => (-1, &value[1..]),
        _ => return None,
    };
    let (hours, minutes) = match rest.split_once(':') {
        Some((h, m)) => (h, m),
        None if rest.len() == 4 => rest.split_at(2),
        None => return None,
    };
    if hours.len() != 2 || minutes.len() != 2 {
        return None;
    }

    let hours: i32 = hours.parse().ok()?;
    let minutes: i32 = minutes.parse().ok()?;
    if hours > 14 || minutes > 59 {
        return None;
    }

    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}
