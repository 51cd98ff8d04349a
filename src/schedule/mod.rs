//! Backup scheduling
//!
//! - `next_run_at`: when the next scheduled backup is due
//! - `Scheduler`: a background thread that runs scheduled backups and
//!   picks up configuration changes within a minute

mod next_run;
mod runner;

pub use next_run::next_run_at;
pub use runner::{plan, Plan, ScheduleTarget, Scheduler, SchedulerHandle, RECHECK_INTERVAL};
