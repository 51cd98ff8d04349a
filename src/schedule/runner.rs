//! Background scheduler thread

use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration as StdDuration;

use chrono::{DateTime, Local, TimeZone};
use tracing::{debug, info, warn};

use crate::config::BackupConfiguration;
use crate::error::{BackupError, BackupResult};

use super::next_run::next_run_at;

/// How long the scheduler sleeps at most before re-reading configuration
pub const RECHECK_INTERVAL: StdDuration = StdDuration::from_secs(60);

/// What the scheduler drives
pub trait ScheduleTarget: Send + Sync + 'static {
    /// The live configuration
    fn configuration(&self) -> BackupConfiguration;

    /// Run one scheduled backup
    fn run_scheduled(&self);
}

/// What the scheduler should do next
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Plan {
    /// A run is due
    RunNow,
    /// Sleep, then look again
    Sleep(StdDuration),
}

/// Decide the next step given the last run (or scheduler start) and `now`
///
/// The due time is computed from `anchor`, so a run that came due while
/// the scheduler slept is not skipped.
pub fn plan<Tz: TimeZone>(
    anchor: &DateTime<Tz>,
    now: &DateTime<Tz>,
    config: &BackupConfiguration,
) -> BackupResult<Plan> {
    match next_run_at(anchor, config)? {
        None => Ok(Plan::Sleep(RECHECK_INTERVAL)),
        Some(due) if due <= *now => Ok(Plan::RunNow),
        Some(due) => {
            let wait = (due - now.clone())
                .to_std()
                .unwrap_or(StdDuration::ZERO)
                .min(RECHECK_INTERVAL);
            Ok(Plan::Sleep(wait))
        }
    }
}

/// Spawns the scheduler thread
pub struct Scheduler;

impl Scheduler {
    /// Start scheduling backups for `target` in local time
    pub fn spawn<T: ScheduleTarget>(target: Arc<T>) -> BackupResult<SchedulerHandle> {
        let (stop_tx, stop_rx) = mpsc::channel::<()>();

        let thread = thread::Builder::new()
            .name("keepsafe-scheduler".into())
            .spawn(move || {
                info!("scheduler started");
                let mut anchor = Local::now();

                loop {
                    let now = Local::now();
                    let step = plan(&anchor, &now, &target.configuration()).unwrap_or_else(|e| {
                        warn!(error = %e, "cannot compute next scheduled run");
                        Plan::Sleep(RECHECK_INTERVAL)
                    });

                    match step {
                        Plan::RunNow => {
                            info!("scheduled backup due");
                            target.run_scheduled();
                            anchor = Local::now();
                        }
                        Plan::Sleep(wait) => {
                            debug!(seconds = wait.as_secs(), "scheduler sleeping");
                            match stop_rx.recv_timeout(wait) {
                                Err(RecvTimeoutError::Timeout) => {}
                                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                            }
                        }
                    }
                }

                info!("scheduler stopped");
            })
            .map_err(|e| BackupError::Io(format!("Failed to start scheduler: {}", e)))?;

        Ok(SchedulerHandle {
            stop: Some(stop_tx),
            thread: Some(thread),
        })
    }
}

/// Stops the scheduler when `stop` is called or the handle is dropped
pub struct SchedulerHandle {
    stop: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl SchedulerHandle {
    /// Stop the scheduler and wait for its thread
    ///
    /// A backup already running finishes first.
    pub fn stop(mut self) {
        self.shutdown();
    }

    /// Block until the scheduler thread exits
    pub fn join(mut self) {
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }

    fn shutdown(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("scheduler thread panicked");
            }
        }
    }
}

impl Drop for SchedulerHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Frequency;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn enabled_daily() -> BackupConfiguration {
        BackupConfiguration {
            enabled: true,
            frequency: Frequency::Daily,
            time: "02:00".into(),
            ..BackupConfiguration::default()
        }
    }

    #[test]
    fn test_plan_sleeps_until_due_capped() {
        let anchor = Utc.with_ymd_and_hms(2026, 5, 1, 1, 0, 0).unwrap();
        let step = plan(&anchor, &anchor, &enabled_daily()).unwrap();
        assert_eq!(step, Plan::Sleep(RECHECK_INTERVAL));

        let now = Utc.with_ymd_and_hms(2026, 5, 1, 1, 59, 30).unwrap();
        let step = plan(&anchor, &now, &enabled_daily()).unwrap();
        assert_eq!(step, Plan::Sleep(StdDuration::from_secs(30)));
    }

    #[test]
    fn test_plan_runs_when_due_passed_during_sleep() {
        let anchor = Utc.with_ymd_and_hms(2026, 5, 1, 1, 0, 0).unwrap();
        let now = Utc.with_ymd_and_hms(2026, 5, 1, 2, 0, 5).unwrap();
        assert_eq!(plan(&anchor, &now, &enabled_daily()).unwrap(), Plan::RunNow);
    }

    #[test]
    fn test_plan_disabled_just_rechecks() {
        let now = Utc::now();
        let step = plan(&now, &now, &BackupConfiguration::default()).unwrap();
        assert_eq!(step, Plan::Sleep(RECHECK_INTERVAL));
    }

    struct NeverDue {
        runs: AtomicUsize,
    }

    impl ScheduleTarget for NeverDue {
        fn configuration(&self) -> BackupConfiguration {
            BackupConfiguration::default()
        }

        fn run_scheduled(&self) {
            self.runs.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_stop_returns_promptly() {
        let target = Arc::new(NeverDue {
            runs: AtomicUsize::new(0),
        });
        let handle = Scheduler::spawn(target.clone()).unwrap();

        let started = std::time::Instant::now();
        handle.stop();

        assert!(started.elapsed() < StdDuration::from_secs(5));
        assert_eq!(target.runs.load(Ordering::SeqCst), 0);
    }
}
