use chrono::{DateTime, Duration, TimeZone, Utc};
use mutuelle_sync::models::LastRun;
use mutuelle_sync::months::{months_between, MonthKey};
use mutuelle_sync::planner::{FetchPlan, RunContext, DEFAULT_FULL_FETCH_AFTER};

fn at(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
}

fn plan(last: Option<&LastRun>, now: DateTime<Utc>) -> FetchPlan {
    let ctx = RunContext::derive(last, now, DEFAULT_FULL_FETCH_AFTER);
    FetchPlan::for_context(&ctx, now)
}

#[test]
fn no_history_always_means_full_fetch() {
    let mut now = at(2023, 1, 1, 0);
    for _ in 0..400 {
        assert_eq!(plan(None, now), FetchPlan::Full);
        now += Duration::hours(23);
    }
}

#[test]
fn recent_success_fetches_elapsed_months_plus_one() {
    let now = at(2024, 3, 2, 10);
    for days in 0..30 {
        let last = LastRun::success(now - Duration::days(days));
        let expected = months_between(
            now.with_timezone(&chrono_tz::Europe::Paris).date_naive(),
            last.at.with_timezone(&chrono_tz::Europe::Paris).date_naive(),
        ) + 1;
        assert_eq!(
            plan(Some(&last), now),
            FetchPlan::Recent { months: expected },
            "{days} days ago"
        );
        assert!(expected <= 2);
    }
}

#[test]
fn thirty_days_or_a_failure_forces_full_fetch() {
    let now = at(2024, 3, 2, 10);
    for days in [30, 31, 90, 365] {
        let last = LastRun::success(now - Duration::days(days));
        assert_eq!(plan(Some(&last), now), FetchPlan::Full, "{days} days ago");
    }
    for days in [0, 1, 29] {
        let last = LastRun::failure(now - Duration::days(days), "timed out");
        assert_eq!(plan(Some(&last), now), FetchPlan::Full, "{days} days ago");
    }
}

#[test]
fn month_boundary_follows_paris_time() {
    // 23:30 UTC on April 30th is already May 1st in Paris.
    let now = at(2023, 4, 30, 23) + Duration::minutes(30);
    let last = LastRun::success(at(2023, 4, 25, 12));
    assert_eq!(plan(Some(&last), now), FetchPlan::Recent { months: 2 });
    assert_eq!(
        MonthKey::of(now.with_timezone(&chrono_tz::Europe::Paris).date_naive()),
        MonthKey::new(2023, 5).unwrap()
    );
}

#[test]
fn months_to_fetch_never_exceed_rendered_groups() {
    for months in 1..24u32 {
        for available in 0..12usize {
            let count = FetchPlan::Recent { months }.month_count(available);
            assert_eq!(count, (months as usize).min(available));
        }
    }
    assert_eq!(FetchPlan::Full.month_count(7), 7);
}
