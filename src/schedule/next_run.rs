//! Next-run calculation
//!
//! Pure function of the current time and the configuration. The configured
//! time of day is read in the time zone of `now`.

use chrono::{DateTime, Datelike, Duration, LocalResult, NaiveDate, NaiveDateTime, TimeZone, Weekday};

use crate::config::{BackupConfiguration, Frequency};
use crate::error::{BackupError, BackupResult};

/// Longest DST gap searched past before giving up
const MAX_GAP_MINUTES: i64 = 24 * 60;

/// When the next scheduled backup is due, strictly after `now`
///
/// `None` when scheduled backups are disabled. Daily runs at `time` every
/// day, weekly on Mondays, monthly on the 1st.
pub fn next_run_at<Tz: TimeZone>(
    now: &DateTime<Tz>,
    config: &BackupConfiguration,
) -> BackupResult<Option<DateTime<Tz>>> {
    if !config.enabled {
        return Ok(None);
    }

    let time = config.schedule_time()?;
    let tz = now.timezone();
    let today = now.date_naive();

    // Every frequency has a matching day within 32 days; one extra covers a
    // match today whose time already passed
    for offset in 0..=62 {
        let date = today + Duration::days(offset);
        if !matches_frequency(date, config.frequency) {
            continue;
        }

        let candidate = resolve_local(&tz, date.and_time(time))?;
        if candidate > *now {
            return Ok(Some(candidate));
        }
    }

    Err(BackupError::Config(format!(
        "No {} run could be scheduled after {}",
        config.frequency,
        now.naive_local()
    )))
}

fn matches_frequency(date: NaiveDate, frequency: Frequency) -> bool {
    match frequency {
        Frequency::Daily => true,
        Frequency::Weekly => date.weekday() == Weekday::Mon,
        Frequency::Monthly => date.day() == 1,
    }
}

/// Map a wall-clock time to an instant
///
/// Ambiguous times (clocks falling back) take the earlier instant; times in
/// a gap (clocks springing forward) move to the first valid minute after it.
fn resolve_local<Tz: TimeZone>(tz: &Tz, local: NaiveDateTime) -> BackupResult<DateTime<Tz>> {
    for minutes in 0..=MAX_GAP_MINUTES {
        match tz.from_local_datetime(&(local + Duration::minutes(minutes))) {
            LocalResult::Single(instant) => return Ok(instant),
            LocalResult::Ambiguous(earliest, _) => return Ok(earliest),
            LocalResult::None => continue,
        }
    }

    Err(BackupError::Config(format!(
        "Local time {} does not exist in this time zone",
        local
    )))
}
