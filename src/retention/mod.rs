//! Message retention: the sweeper, its schedule and the daemon worker.

mod schedule;
mod sweeper;
mod worker;


pub use schedule::{ScheduleError, SweepSchedule};
pub use sweeper::{BatchFailure, BlobDeleteFailure, RetentionSweeper, SweepError, SweepOutcome};
pub use worker::start_retention_worker;
