//! Cron schedule evaluated at a fixed UTC offset.

use chrono::{DateTime, FixedOffset, Utc};
use croner::Cron;

use crate::config::ScheduleConfig;

/// Errors building or evaluating a sweep schedule.
#[derive(Debug, thiserror::Error)]
pub enum ScheduleError {
    #[error("Invalid cron expression '{expression}': {reason}")]
    InvalidCron { expression: String, reason: String },

    #[error("Invalid UTC offset '{0}'")]
    InvalidOffset(String),

    #[error("Cron expression '{0}' has no upcoming occurrence")]
    NoUpcoming(String),
}

/// When the daemon fires the sweep.
#[derive(Debug, Clone)]
pub struct SweepSchedule {
    expression: String,
    cron: Cron,
    offset: FixedOffset,
}

impl SweepSchedule {
    pub fn new(expression: &str, offset: FixedOffset) -> Result<Self, ScheduleError> {
        let cron = expression
            .parse::<Cron>()
            .map_err(|e| ScheduleError::InvalidCron {
                expression: expression.to_string(),
                reason: e.to_string(),
            })?;

        Ok(Self {
            expression: expression.to_string(),
            cron,
            offset,
        })
    }

    pub fn from_config(config: &ScheduleConfig) -> Result<Self, ScheduleError> {
        let offset = config
            .offset()
            .map_err(|_| ScheduleError::InvalidOffset(config.utc_offset.clone()))?;
        Self::new(&config.cron, offset)
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    /// First fire time strictly after `now`, in the schedule's offset.
    pub fn next_after(&self, now: DateTime<Utc>) -> Result<DateTime<FixedOffset>, ScheduleError> {
        let local = now.with_timezone(&self.offset);
        self.cron
            .find_next_occurrence(&local, false)
            .map_err(|_| ScheduleError::NoUpcoming(self.expression.clone()))
    }

    /// The next `count` fire times after `now`.
    pub fn upcoming(
        &self,
        now: DateTime<Utc>,
        count: usize,
    ) -> Result<Vec<DateTime<FixedOffset>>, ScheduleError> {
        let mut times = Vec::with_capacity(count);
        let mut cursor = now;
        for _ in 0..count {
            let next = self.next_after(cursor)?;
            cursor = next.with_timezone(&Utc);
            times.push(next);
        }
        Ok(times)
    }

    /// How long to wait from `now` until the next fire time.
    pub fn until_next(
        &self,
        now: DateTime<Utc>,
    ) -> Result<(DateTime<FixedOffset>, std::time::Duration), ScheduleError> {
        let next = self.next_after(now)?;
        let wait = (next.with_timezone(&Utc) - now)
            .to_std()
            .unwrap_or_default();
        Ok((next, wait))
    }
}
