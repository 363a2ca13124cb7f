//! Next-run calculation for report schedules.
//!
//! Pure calendar arithmetic: callers inject "now" so results are
//! deterministic and unit-testable without clock mocking.

use std::str::FromStr;

use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Utc};
use chrono_tz::Tz;
use cron::Schedule;

use crate::models::Frequency;

/// Computes the next timestamp strictly after `now` at which a schedule
/// becomes due.
///
/// A malformed timezone or cron expression never fails the calculation: the
/// timezone falls back to UTC and a `CUSTOM` cadence degrades to `DAILY`,
/// each with a logged warning.
pub fn next_run(
    frequency: Frequency,
    cron_expression: Option<&str>,
    timezone: &str,
    now: DateTime<Utc>,
) -> DateTime<Utc> {
    let tz = parse_timezone(timezone);

    match frequency {
        Frequency::Daily => now + Duration::days(1),
        Frequency::Weekly => now + Duration::days(7),
        Frequency::Monthly => add_one_month(now, tz),
        Frequency::Custom => next_cron_occurrence(cron_expression, tz, now),
    }
}

fn parse_timezone(timezone: &str) -> Tz {
    match timezone.parse::<Tz>() {
        Ok(tz) => tz,
        Err(_) => {
            tracing::warn!(timezone, "Unknown timezone, falling back to UTC");
            Tz::UTC
        }
    }
}

/// Advances one calendar month in the schedule's timezone, clamping the
/// day-of-month to the length of the target month (Jan 31 -> Feb 28/29).
fn add_one_month(now: DateTime<Utc>, tz: Tz) -> DateTime<Utc> {
    let local = now.with_timezone(&tz);

    let (year, month) = if local.month() == 12 {
        (local.year() + 1, 1)
    } else {
        (local.year(), local.month() + 1)
    };

    let day = local.day().min(days_in_month(year, month));
    let target = NaiveDate::from_ymd_opt(year, month, day)
        .map(|d| d.and_time(local.time()))
        .unwrap_or_else(|| (local + Duration::days(31)).naive_local());

    match tz.from_local_datetime(&target).earliest() {
        Some(dt) => dt.with_timezone(&Utc),
        // Nonexistent local time (DST gap): skip forward an hour
        None => tz
            .from_local_datetime(&(target + Duration::hours(1)))
            .earliest()
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or(now + Duration::days(31)),
    }
}

fn days_in_month(year: i32, month: u32) -> u32 {
    let first = NaiveDate::from_ymd_opt(year, month, 1);
    let next_first = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)
    };

    match (first, next_first) {
        (Some(a), Some(b)) => (b - a).num_days() as u32,
        _ => 30,
    }
}

/// Next occurrence of a cron expression in the schedule's timezone.
///
/// Degrades to the daily cadence when the expression is absent, unparseable,
/// or yields no future occurrence.
fn next_cron_occurrence(
    cron_expression: Option<&str>,
    tz: Tz,
    now: DateTime<Utc>,
) -> DateTime<Utc> {
    let Some(expression) = cron_expression.filter(|e| !e.trim().is_empty()) else {
        tracing::warn!("Custom schedule has no cron expression, falling back to daily cadence");
        return now + Duration::days(1);
    };

    match Schedule::from_str(expression) {
        Ok(schedule) => match schedule.after(&now.with_timezone(&tz)).next() {
            Some(next) => next.with_timezone(&Utc),
            None => {
                tracing::warn!(
                    expression,
                    "Cron expression has no future occurrence, falling back to daily cadence"
                );
                now + Duration::days(1)
            }
        },
        Err(e) => {
            tracing::warn!(
                expression,
                error = %e,
                "Unparseable cron expression, falling back to daily cadence"
            );
            now + Duration::days(1)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    #[test]
    fn test_daily_adds_one_day() {
        let now = utc(2025, 3, 10, 8, 30, 0);
        assert_eq!(
            next_run(Frequency::Daily, None, "UTC", now),
            utc(2025, 3, 11, 8, 30, 0)
        );
    }

    #[test]
    fn test_weekly_adds_seven_days() {
        let now = utc(2025, 3, 10, 8, 30, 0);
        assert_eq!(
            next_run(Frequency::Weekly, None, "UTC", now),
            utc(2025, 3, 17, 8, 30, 0)
        );
    }

    #[test]
    fn test_monthly_keeps_day_of_month() {
        let now = utc(2025, 3, 15, 9, 0, 0);
        assert_eq!(
            next_run(Frequency::Monthly, None, "UTC", now),
            utc(2025, 4, 15, 9, 0, 0)
        );
    }

    #[test]
    fn test_monthly_clamps_to_shorter_month() {
        let now = utc(2025, 1, 31, 9, 0, 0);
        assert_eq!(
            next_run(Frequency::Monthly, None, "UTC", now),
            utc(2025, 2, 28, 9, 0, 0)
        );
    }

    #[test]
    fn test_monthly_clamps_to_leap_february() {
        let now = utc(2024, 1, 31, 9, 0, 0);
        assert_eq!(
            next_run(Frequency::Monthly, None, "UTC", now),
            utc(2024, 2, 29, 9, 0, 0)
        );
    }

    #[test]
    fn test_monthly_december_wraps_to_january() {
        let now = utc(2025, 12, 31, 9, 0, 0);
        assert_eq!(
            next_run(Frequency::Monthly, None, "UTC", now),
            utc(2026, 1, 31, 9, 0, 0)
        );
    }

    #[test]
    fn test_custom_cron_next_occurrence() {
        // Every day at 09:00:00
        let now = utc(2025, 3, 10, 10, 0, 0);
        let next = next_run(Frequency::Custom, Some("0 0 9 * * *"), "UTC", now);
        assert_eq!(next, utc(2025, 3, 11, 9, 0, 0));
    }

    #[test]
    fn test_custom_cron_respects_timezone() {
        // 09:00 in New York is 13:00 UTC during daylight saving time
        let now = utc(2025, 6, 10, 0, 0, 0);
        let next = next_run(
            Frequency::Custom,
            Some("0 0 9 * * *"),
            "America/New_York",
            now,
        );
        assert_eq!(next, utc(2025, 6, 10, 13, 0, 0));
    }

    #[test]
    fn test_custom_without_expression_degrades_to_daily() {
        let now = utc(2025, 3, 10, 8, 30, 0);
        assert_eq!(
            next_run(Frequency::Custom, None, "UTC", now),
            utc(2025, 3, 11, 8, 30, 0)
        );
    }

    #[test]
    fn test_custom_with_garbage_expression_degrades_to_daily() {
        let now = utc(2025, 3, 10, 8, 30, 0);
        assert_eq!(
            next_run(Frequency::Custom, Some("not a cron line"), "UTC", now),
            utc(2025, 3, 11, 8, 30, 0)
        );
    }

    #[test]
    fn test_unknown_timezone_falls_back_to_utc() {
        let now = utc(2025, 3, 10, 8, 30, 0);
        assert_eq!(
            next_run(Frequency::Monthly, None, "Mars/Olympus_Mons", now),
            utc(2025, 4, 10, 8, 30, 0)
        );
    }

    #[test]
    fn test_deterministic_for_identical_inputs() {
        let now = utc(2025, 5, 20, 12, 0, 0);
        let a = next_run(Frequency::Custom, Some("0 30 6 * * *"), "Asia/Tokyo", now);
        let b = next_run(Frequency::Custom, Some("0 30 6 * * *"), "Asia/Tokyo", now);
        assert_eq!(a, b);
    }

    proptest! {
        // Forward progress: the computed next run is strictly after "now"
        // for every frequency, arbitrary timestamps included.
        #[test]
        fn prop_next_run_is_strictly_future(
            secs in 0i64..4_000_000_000i64,
            freq_idx in 0usize..4,
            tz in prop_oneof![
                Just("UTC"),
                Just("America/New_York"),
                Just("Asia/Tokyo"),
                Just("Europe/Berlin"),
            ],
        ) {
            let now = DateTime::<Utc>::from_timestamp(secs, 0).unwrap();
            let frequency = [
                Frequency::Daily,
                Frequency::Weekly,
                Frequency::Monthly,
                Frequency::Custom,
            ][freq_idx];

            let next = next_run(frequency, Some("0 15 4 * * *"), tz, now);
            prop_assert!(next > now);
        }
    }
}
