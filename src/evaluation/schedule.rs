//! Calendar math for time-based triggers.

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, TimeZone, Timelike, Utc};

use crate::strategy::{Frequency, ScheduleDay};

/// Start of the most recent scheduled occurrence at or before `now`.
///
/// Monthly days past the end of a month clamp to its last day, so day 31
/// fires on Feb 28/29. Returns `None` only for out-of-range calendar input.
pub fn latest_occurrence(
    frequency: Frequency,
    day: Option<ScheduleDay>,
    time: NaiveTime,
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    match frequency {
        Frequency::Hourly => {
            let candidate = now
                .date_naive()
                .and_hms_opt(now.hour(), time.minute(), time.second())?
                .and_utc();
            if candidate > now {
                Some(candidate - Duration::hours(1))
            } else {
                Some(candidate)
            }
        }
        Frequency::Daily => {
            let candidate = now.date_naive().and_time(time).and_utc();
            if candidate > now {
                Some(candidate - Duration::days(1))
            } else {
                Some(candidate)
            }
        }
        Frequency::Weekly => {
            let weekday = match day {
                Some(ScheduleDay::Weekday(w)) => w,
                _ => return None,
            };
            let today = now.weekday().num_days_from_monday() as i64;
            let target = weekday.num_days_from_monday() as i64;
            let days_back = (today - target).rem_euclid(7);
            let candidate = (now.date_naive() - Duration::days(days_back))
                .and_time(time)
                .and_utc();
            if candidate > now {
                Some(candidate - Duration::weeks(1))
            } else {
                Some(candidate)
            }
        }
        Frequency::Monthly => {
            let dom = match day {
                Some(ScheduleDay::DayOfMonth(d)) => d,
                _ => return None,
            };
            let this_month = clamped_date(now.year(), now.month(), dom)?;
            let candidate = Utc.from_utc_datetime(&this_month.and_time(time));
            if candidate <= now {
                return Some(candidate);
            }
            let (year, month) = if now.month() == 1 {
                (now.year() - 1, 12)
            } else {
                (now.year(), now.month() - 1)
            };
            let previous = clamped_date(year, month, dom)?;
            Some(Utc.from_utc_datetime(&previous.and_time(time)))
        }
    }
}

/// `day` of the given month, clamped to the month's last day.
fn clamped_date(year: i32, month: u32, day: u32) -> Option<NaiveDate> {
    let first_of_next = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)?
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)?
    };
    let last_day = first_of_next.pred_opt()?.day();
    NaiveDate::from_ymd_opt(year, month, day.clamp(1, last_day))
}

/// The occurrence `now` falls into, if it is still inside its fire window.
pub fn due_occurrence(
    frequency: Frequency,
    day: Option<ScheduleDay>,
    time: NaiveTime,
    now: DateTime<Utc>,
    window: Duration,
) -> Option<DateTime<Utc>> {
    let start = latest_occurrence(frequency, day, time, now)?;
    (now < start + window).then_some(start)
}
