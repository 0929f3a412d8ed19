//! Periodic maintenance
//!
//! Two cron entries, both idempotent: an hourly per-user flow snapshot
//! feeding the dashboard time series, and a daily sweep at 00:00:05
//! local time that resets monthly counters and disables expired users
//! and grants.

use chrono::{Datelike, Local, NaiveDate, Timelike};
use tokio_cron_scheduler::{Job, JobScheduler};

use crate::error::Result;
use crate::models::{User, UserTunnel};
use crate::service::FlowService;
use crate::state::AppState;

/// Samples older than this are aged out of the dashboard series
const SAMPLE_RETENTION_HOURS: i64 = 48;

/// Register and start the cron jobs
pub async fn start(state: AppState) -> anyhow::Result<JobScheduler> {
    let scheduler = JobScheduler::new().await?;

    let snapshot_state = state.clone();
    scheduler
        .add(Job::new_async_tz("0 0 * * * *", Local, move |_id, _sched| {
            let state = snapshot_state.clone();
            Box::pin(async move {
                if let Err(e) = hourly_snapshot(&state).await {
                    tracing::error!(error = %e, "hourly flow snapshot failed");
                }
            })
        })?)
        .await?;

    let sweep_state = state.clone();
    scheduler
        .add(Job::new_async_tz("5 0 0 * * *", Local, move |_id, _sched| {
            let state = sweep_state.clone();
            Box::pin(async move {
                if let Err(e) = daily_maintenance(&state).await {
                    tracing::error!(error = %e, "daily maintenance failed");
                }
            })
        })?)
        .await?;

    scheduler.start().await?;
    tracing::info!("maintenance scheduler started");
    Ok(scheduler)
}

/// Whether a user's counters reset today.
///
/// Fires on the configured day of month, with a month-end catch-up:
/// a reset day past the month's length fires on the last day, exactly
/// once.
#[must_use]
pub fn reset_due(reset_day: i64, today: u32, last_day: u32) -> bool {
    if reset_day == 0 {
        return false;
    }
    reset_day == i64::from(today) || (today == last_day && reset_day > i64::from(last_day))
}

/// Increment since the previous sample. A negative delta indicates a
/// counter reset between samples; the cumulative value is then taken
/// as the increment, as with a first sample.
#[must_use]
pub fn snapshot_increment(cumulative: i64, prev_total: Option<i64>) -> i64 {
    match prev_total {
        Some(prev) if cumulative >= prev => cumulative - prev,
        _ => cumulative,
    }
}

#[must_use]
pub fn days_in_month(year: i32, month: u32) -> u32 {
    let (next_year, next_month) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };
    NaiveDate::from_ymd_opt(next_year, next_month, 1)
        .and_then(|d| d.pred_opt())
        .map_or(31, |d| d.day())
}

/// Top-of-hour snapshot of every user's cumulative flow
pub async fn hourly_snapshot(state: &AppState) -> Result<()> {
    let now = Local::now();
    let label = format!("{:02}:{:02}", now.hour(), now.minute());
    let now_millis = now.timestamp_millis();

    let users = state.users().find_all().await?;
    for user in users {
        let cumulative = user.in_flow + user.out_flow;
        let prev = state
            .statistics()
            .latest_for_user(user.id)
            .await?
            .map(|s| s.total_flow);
        let increment = snapshot_increment(cumulative, prev);

        state
            .statistics()
            .insert(user.id, increment, cumulative, &label, now_millis)
            .await?;
    }

    let cutoff = now_millis - SAMPLE_RETENTION_HOURS * 3600 * 1000;
    let removed = state.statistics().delete_older_than(cutoff).await?;
    if removed > 0 {
        tracing::debug!(removed, "aged out flow samples");
    }

    Ok(())
}

/// Daily monthly-reset and expiry sweeps
pub async fn daily_maintenance(state: &AppState) -> Result<()> {
    let now = Local::now();
    let today = now.day();
    let last_day = days_in_month(now.year(), now.month());

    reset_user_counters(state, today, last_day).await?;
    reset_grant_counters(state, today, last_day).await?;
    expiry_sweep(state).await?;

    Ok(())
}

async fn reset_user_counters(state: &AppState, today: u32, last_day: u32) -> Result<()> {
    let users = state.users().find_all().await?;
    for user in users {
        if reset_due(user.flow_reset_time, today, last_day) {
            state.users().reset_flow(user.id).await?;
            tracing::info!(user = %user.user, "monthly flow reset");
        }
    }
    Ok(())
}

async fn reset_grant_counters(state: &AppState, today: u32, last_day: u32) -> Result<()> {
    let grants = state.user_tunnels().find_all().await?;
    for grant in grants {
        if reset_due(grant.flow_reset_time, today, last_day) {
            state.user_tunnels().reset_flow(grant.id).await?;
        }
    }
    Ok(())
}

/// Disable expired users and grants, pausing their live forwards
async fn expiry_sweep(state: &AppState) -> Result<()> {
    let now_millis = chrono::Utc::now().timestamp_millis();
    let flow = FlowService::new(state.clone());

    let users = state.users().find_active_regular().await?;
    for user in users {
        if user.status == User::STATUS_ENABLED
            && user.exp_time > 0
            && user.exp_time < now_millis
        {
            flow.pause_user_forwards(user.id).await?;
            state.users().set_status(user.id, User::STATUS_DISABLED).await?;
            tracing::info!(user = %user.user, "user expired and disabled");
        }
    }

    let grants = state.user_tunnels().find_all().await?;
    for grant in grants {
        if grant.status == UserTunnel::STATUS_ENABLED
            && grant.exp_time > 0
            && grant.exp_time < now_millis
        {
            flow.pause_tunnel_forwards(grant.tunnel_id, grant.user_id).await?;
            state
                .user_tunnels()
                .set_status(grant.id, UserTunnel::STATUS_DISABLED)
                .await?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reset_due_on_matching_day() {
        assert!(reset_due(15, 15, 31));
        assert!(!reset_due(15, 14, 31));
        assert!(!reset_due(15, 16, 31));
    }

    #[test]
    fn test_reset_day_zero_never_fires() {
        for today in 1..=31 {
            assert!(!reset_due(0, today, 31));
        }
    }

    #[test]
    fn test_month_end_catch_up() {
        // reset day 31 in a 30-day month fires on day 30
        assert!(reset_due(31, 30, 30));
        // and in a 31-day month only on day 31
        assert!(!reset_due(31, 30, 31));
        assert!(reset_due(31, 31, 31));
        // February: day 31 fires on the 28th
        assert!(reset_due(31, 28, 28));
    }

    #[test]
    fn test_catch_up_fires_once() {
        // a 30-day month: day 31 must fire on day 30 and no other day
        let fired: Vec<u32> = (1..=30).filter(|&d| reset_due(31, d, 30)).collect();
        assert_eq!(fired, vec![30]);
    }

    #[test]
    fn test_days_in_month() {
        assert_eq!(days_in_month(2026, 1), 31);
        assert_eq!(days_in_month(2026, 2), 28);
        assert_eq!(days_in_month(2028, 2), 29);
        assert_eq!(days_in_month(2026, 4), 30);
        assert_eq!(days_in_month(2026, 12), 31);
    }

    #[test]
    fn test_snapshot_increment() {
        assert_eq!(snapshot_increment(500, Some(300)), 200);
        assert_eq!(snapshot_increment(500, None), 500);
        // a counter reset between samples shows up as a negative delta
        assert_eq!(snapshot_increment(200, Some(300)), 200);
        assert_eq!(snapshot_increment(300, Some(300)), 0);
    }
}
