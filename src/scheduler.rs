//! Component J: the daily tick. `run_daily_tick` is the body the
//! `run-daily-updates` binary calls once per day — select the clients due
//! a report today (including the month-end catch-up), submit a job for
//! each, send tomorrow's notification-eve emails, then drain the retry
//! queue.

use crate::db;
use crate::domain::Client;
use crate::email::EmailSender;
use crate::error::PipelineError;
use crate::orchestrator::Orchestrator;
use chrono::{Datelike, NaiveDate};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Default)]
pub struct DailyTickReport {
    pub submitted: Vec<Uuid>,
    pub eve_notified: Vec<Uuid>,
    pub retry_processed: usize,
    pub retry_failed: usize,
}

/// Clients whose `send_day` matches today, plus — on the last day of the
/// month — clients whose `send_day` is further in the month than it has
/// days (e.g. `send_day = 31` on a 28-day February).
pub async fn clients_due_today(
    pool: &sqlx::PgPool,
    today: NaiveDate,
) -> Result<Vec<Client>, PipelineError> {
    let day = today.day() as i16;
    let mut due = db::clients::active_with_send_day(pool, day).await?;

    if is_last_day_of_month(today) {
        let all = db::clients::all_active(pool).await?;
        for client in all {
            if client.send_day > day && !due.iter().any(|c| c.id == client.id) {
                due.push(client);
            }
        }
    }

    Ok(due)
}

/// Clients whose send-day is tomorrow — the notification-eve audience.
pub async fn clients_due_tomorrow(
    pool: &sqlx::PgPool,
    today: NaiveDate,
) -> Result<Vec<Client>, PipelineError> {
    let tomorrow = today.succ_opt().unwrap_or(today);
    // A month-end rollover (e.g. today = Jan 31) means "tomorrow" resets to
    // day 1 of the next month; clients due on day 1 still get their eve
    // notice tonight. Clients whose send-day fell inside the month that
    // just ended were already notified on their own eve.
    let day = tomorrow.day() as i16;
    db::clients::active_with_send_day(pool, day).await
}

fn is_last_day_of_month(date: NaiveDate) -> bool {
    date.succ_opt()
        .map(|next| next.month() != date.month())
        .unwrap_or(true)
}

/// Runs the full daily tick: submit today's clients, send eve notices for
/// tomorrow's clients, then drain whatever backed off and is now due.
pub async fn run_daily_tick(
    pool: &sqlx::PgPool,
    orchestrator: &Orchestrator,
    email: &Arc<dyn EmailSender>,
    today: NaiveDate,
) -> Result<DailyTickReport, PipelineError> {
    let mut report = DailyTickReport::default();

    let due = clients_due_today(pool, today).await?;
    for client in &due {
        match orchestrator.submit(client.id).await {
            Ok(job_id) => {
                info!(client_id = %client.id, %job_id, "scheduler: submitted job");
                report.submitted.push(job_id);
            }
            Err(e) => warn!(client_id = %client.id, error = %e, "scheduler: submit failed"),
        }
    }

    let eve = clients_due_tomorrow(pool, today).await?;
    for client in &eve {
        match email.send_notification_eve(client).await {
            Ok(()) => report.eve_notified.push(client.id),
            Err(e) => warn!(client_id = %client.id, error = %e, "scheduler: eve notice failed"),
        }
    }

    let (processed, failed) = orchestrator.drain_retry_queue().await?;
    report.retry_processed = processed;
    report.retry_failed = failed;

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_day_of_february_non_leap() {
        assert!(is_last_day_of_month(NaiveDate::from_ymd_opt(2026, 2, 28).unwrap()));
        assert!(!is_last_day_of_month(NaiveDate::from_ymd_opt(2026, 2, 27).unwrap()));
    }

    #[test]
    fn last_day_of_february_leap() {
        assert!(is_last_day_of_month(NaiveDate::from_ymd_opt(2028, 2, 29).unwrap()));
        assert!(!is_last_day_of_month(NaiveDate::from_ymd_opt(2028, 2, 28).unwrap()));
    }

    #[test]
    fn last_day_of_31_day_month() {
        assert!(is_last_day_of_month(NaiveDate::from_ymd_opt(2026, 1, 31).unwrap()));
        assert!(!is_last_day_of_month(NaiveDate::from_ymd_opt(2026, 1, 30).unwrap()));
    }
}
