//! Dispatch tick: wall-clock -> job selection -> dependency gate -> run.
//!
//! The external cron hits `dispatch` every 15 minutes; this module decides
//! what (if anything) runs. Job status lives in the store so a tick is
//! idempotent within its slot: a terminal status for today short-circuits.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveTime, Timelike, Weekday};
use chrono::Datelike;
use chrono_tz::Tz;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::error::AppResult;
use crate::infra::retry_db_once;
use crate::storage::Store;

/// Slot table, market-local. Each slot admits dispatch ticks for 15 minutes.
const WEEKDAY_SLOTS: &[(u32, u32, &str)] = &[
    (5, 30, "pre-market-prep"),
    (6, 0, "sentiment-scan"),
    (7, 30, "morning-digest"),
];

const SATURDAY_SLOTS: &[(u32, u32, &str)] = &[(4, 0, "weekly-backfill")];

const SLOT_WINDOW_MINUTES: u32 = 15;

/// Dependencies that must have today's status = success before a job runs.
pub fn job_dependencies(job: &str) -> &'static [&'static str] {
    match job {
        "sentiment-scan" => &["pre-market-prep"],
        "morning-digest" => &["pre-market-prep"],
        _ => &[],
    }
}

/// Which job the current wall-clock slot selects, if any.
pub fn scheduled_job_for(time: NaiveTime, weekday: Weekday) -> Option<&'static str> {
    let slots = match weekday {
        Weekday::Sat => SATURDAY_SLOTS,
        Weekday::Sun => return None,
        _ => WEEKDAY_SLOTS,
    };
    let minutes = time.hour() * 60 + time.minute();
    slots
        .iter()
        .find(|(h, m, _)| {
            let slot = h * 60 + m;
            minutes >= slot && minutes < slot + SLOT_WINDOW_MINUTES
        })
        .map(|(_, _, job)| *job)
}

#[async_trait]
pub trait JobRunner: Send + Sync {
    async fn run(&self, job: &str) -> AppResult<serde_json::Value>;
}

#[derive(Debug, Clone, Serialize)]
pub struct DispatchResponse {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Set when the terminal status write itself failed; the job outcome
    /// above is still accurate.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub status_recording_failed: bool,
}

impl DispatchResponse {
    fn bare(status: &str) -> Self {
        Self {
            status: status.to_string(),
            job: None,
            result: None,
            reason: None,
            error: None,
            status_recording_failed: false,
        }
    }

    fn for_job(status: &str, job: &str) -> Self {
        Self {
            job: Some(job.to_string()),
            ..Self::bare(status)
        }
    }
}

pub struct Dispatcher {
    store: Arc<Store>,
    runner: Arc<dyn JobRunner>,
    job_timeout: Duration,
}

impl Dispatcher {
    pub fn new(store: Arc<Store>, runner: Arc<dyn JobRunner>, job_timeout: Duration) -> Self {
        Self {
            store,
            runner,
            job_timeout,
        }
    }

    /// Record a terminal status; a failed write must not fail the dispatch.
    fn record_terminal(&self, date: chrono::NaiveDate, job: &str, status: &str, err: Option<&str>) -> bool {
        let now = chrono::Utc::now().timestamp();
        let write = retry_db_once("job_status_terminal", || {
            self.store.mark_job_terminal(date, job, status, err, now)
        });
        match write {
            Ok(_) => true,
            Err(e) => {
                error!(job, status, error = %e, "status_recording_failed");
                false
            }
        }
    }

    /// One dispatcher tick. `force` bypasses the slot table and the
    /// dependency gate (the budget gate inside jobs still applies).
    pub async fn dispatch(&self, force: Option<&str>, now: DateTime<Tz>) -> DispatchResponse {
        let today = now.date_naive();

        let job = match force {
            Some(job) => {
                info!(job, "force-running job");
                job.to_string()
            }
            None => match scheduled_job_for(now.time(), now.weekday()) {
                Some(job) => job.to_string(),
                None => {
                    info!("no job scheduled for current slot");
                    return DispatchResponse::bare("no_job");
                }
            },
        };

        if force.is_none() {
            match retry_db_once("job_status", || self.store.job_status(today, &job)) {
                Ok(Some(row)) if row.is_terminal() => {
                    info!(%job, status = %row.status, "already ran today");
                    return DispatchResponse::for_job("already_ran", &job);
                }
                Ok(_) => {}
                Err(e) => {
                    error!(%job, error = %e, "job status unreadable");
                    let mut response = DispatchResponse::for_job("error", &job);
                    response.error = Some(e.to_string());
                    return response;
                }
            }

            for dep in job_dependencies(&job) {
                let satisfied = matches!(
                    retry_db_once("job_status", || self.store.job_status(today, dep)),
                    Ok(Some(row)) if row.status == "success"
                );
                if !satisfied {
                    let reason = format!("dependency {dep} has not succeeded today");
                    warn!(%job, %reason, "skipping job");
                    let recorded = self.record_terminal(today, &job, "skipped", Some(&reason));
                    let mut response = DispatchResponse::for_job("skipped", &job);
                    response.reason = Some(reason);
                    response.status_recording_failed = !recorded;
                    return response;
                }
            }
        }

        let running = retry_db_once("job_status_running", || {
            self.store
                .mark_job_running(today, &job, chrono::Utc::now().timestamp())
        });
        if let Err(e) = running {
            error!(%job, error = %e, "could not mark job running");
        }

        info!(%job, "dispatching");
        let outcome = tokio::time::timeout(self.job_timeout, self.runner.run(&job)).await;

        match outcome {
            Ok(Ok(result)) => {
                let recorded = self.record_terminal(today, &job, "success", None);
                let mut response = DispatchResponse::for_job("success", &job);
                response.result = Some(result);
                response.status_recording_failed = !recorded;
                response
            }
            Ok(Err(e)) => {
                let message = e.to_string();
                let recorded = self.record_terminal(today, &job, "failed", Some(&message));
                let mut response = DispatchResponse::for_job("failed", &job);
                response.error = Some(message);
                response.status_recording_failed = !recorded;
                response
            }
            Err(_) => {
                let message = format!("job exceeded {}s timeout", self.job_timeout.as_secs());
                let recorded = self.record_terminal(today, &job, "failed", Some(&message));
                let mut response = DispatchResponse::for_job("failed", &job);
                response.error = Some(message);
                response.status_recording_failed = !recorded;
                response
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use crate::market;
    use chrono::NaiveDate;
    use parking_lot::Mutex;

    struct RecordingRunner {
        runs: Mutex<Vec<String>>,
        fail: bool,
        hang: bool,
    }

    impl RecordingRunner {
        fn ok() -> Self {
            Self {
                runs: Mutex::new(Vec::new()),
                fail: false,
                hang: false,
            }
        }
    }

    #[async_trait]
    impl JobRunner for RecordingRunner {
        async fn run(&self, job: &str) -> AppResult<serde_json::Value> {
            self.runs.lock().push(job.to_string());
            if self.hang {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            if self.fail {
                return Err(AppError::External("job blew up".into()));
            }
            Ok(serde_json::json!({"status": "success", "job": job}))
        }
    }

    fn dispatcher(runner: RecordingRunner) -> (Dispatcher, Arc<Store>, Arc<RecordingRunner>) {
        let store = Arc::new(Store::in_memory().unwrap());
        let runner = Arc::new(runner);
        (
            Dispatcher::new(Arc::clone(&store), runner.clone(), Duration::from_secs(5)),
            store,
            runner,
        )
    }

    fn weekday_at(h: u32, m: u32) -> chrono::DateTime<chrono_tz::Tz> {
        // Monday 2026-08-03.
        market::at_et(
            NaiveDate::from_ymd_opt(2026, 8, 3).unwrap(),
            NaiveTime::from_hms_opt(h, m, 0).unwrap(),
        )
    }

    #[test]
    fn slot_table_selects_jobs() {
        assert_eq!(
            scheduled_job_for(NaiveTime::from_hms_opt(5, 30, 0).unwrap(), Weekday::Mon),
            Some("pre-market-prep")
        );
        assert_eq!(
            scheduled_job_for(NaiveTime::from_hms_opt(5, 44, 0).unwrap(), Weekday::Wed),
            Some("pre-market-prep")
        );
        assert_eq!(
            scheduled_job_for(NaiveTime::from_hms_opt(5, 45, 0).unwrap(), Weekday::Wed),
            None
        );
        assert_eq!(
            scheduled_job_for(NaiveTime::from_hms_opt(7, 30, 0).unwrap(), Weekday::Fri),
            Some("morning-digest")
        );
        assert_eq!(
            scheduled_job_for(NaiveTime::from_hms_opt(4, 0, 0).unwrap(), Weekday::Sat),
            Some("weekly-backfill")
        );
        assert_eq!(
            scheduled_job_for(NaiveTime::from_hms_opt(4, 0, 0).unwrap(), Weekday::Sun),
            None
        );
        assert_eq!(
            scheduled_job_for(NaiveTime::from_hms_opt(3, 45, 0).unwrap(), Weekday::Mon),
            None
        );
    }

    #[tokio::test]
    async fn dispatch_runs_scheduled_job_then_idempotent() {
        let (d, _store, runner) = dispatcher(RecordingRunner::ok());

        let response = d.dispatch(None, weekday_at(5, 30)).await;
        assert_eq!(response.status, "success");
        assert_eq!(response.job.as_deref(), Some("pre-market-prep"));

        // Second tick in the same slot: no re-run.
        let response = d.dispatch(None, weekday_at(5, 35)).await;
        assert_eq!(response.status, "already_ran");
        assert_eq!(runner.runs.lock().len(), 1);
    }

    #[tokio::test]
    async fn dispatch_off_slot_returns_no_job() {
        let (d, _, runner) = dispatcher(RecordingRunner::ok());
        let response = d.dispatch(None, weekday_at(3, 45)).await;
        assert_eq!(response.status, "no_job");
        assert!(runner.runs.lock().is_empty());
    }

    #[tokio::test]
    async fn unmet_dependency_records_skipped() {
        let (d, store, runner) = dispatcher(RecordingRunner::ok());
        let response = d.dispatch(None, weekday_at(6, 0)).await;
        assert_eq!(response.status, "skipped");
        assert!(response.reason.unwrap().contains("pre-market-prep"));
        assert!(runner.runs.lock().is_empty());

        let row = store
            .job_status(weekday_at(6, 0).date_naive(), "sentiment-scan")
            .unwrap()
            .unwrap();
        assert_eq!(row.status, "skipped");
    }

    #[tokio::test]
    async fn satisfied_dependency_allows_run() {
        let (d, store, _) = dispatcher(RecordingRunner::ok());
        let date = weekday_at(6, 0).date_naive();
        store.mark_job_terminal(date, "pre-market-prep", "success", None, 1).unwrap();

        let response = d.dispatch(None, weekday_at(6, 0)).await;
        assert_eq!(response.status, "success");
        assert_eq!(response.job.as_deref(), Some("sentiment-scan"));
    }

    #[tokio::test]
    async fn force_bypasses_slot_and_dependencies() {
        let (d, _, runner) = dispatcher(RecordingRunner::ok());
        // Off-slot, dependency unmet: force still runs.
        let response = d.dispatch(Some("sentiment-scan"), weekday_at(13, 0)).await;
        assert_eq!(response.status, "success");
        assert_eq!(runner.runs.lock().as_slice(), &["sentiment-scan".to_string()]);
    }

    #[tokio::test]
    async fn failed_job_records_failed_status() {
        let (d, store, _) = dispatcher(RecordingRunner {
            runs: Mutex::new(Vec::new()),
            fail: true,
            hang: false,
        });
        let response = d.dispatch(None, weekday_at(5, 30)).await;
        assert_eq!(response.status, "failed");
        assert!(response.error.unwrap().contains("blew up"));

        let row = store
            .job_status(weekday_at(5, 30).date_naive(), "pre-market-prep")
            .unwrap()
            .unwrap();
        assert_eq!(row.status, "failed");
        assert!(row.error.unwrap().contains("blew up"));
    }

    #[tokio::test(start_paused = true)]
    async fn hung_job_times_out_as_failed() {
        let (d, store, _) = dispatcher(RecordingRunner {
            runs: Mutex::new(Vec::new()),
            fail: false,
            hang: true,
        });
        let response = d.dispatch(None, weekday_at(5, 30)).await;
        assert_eq!(response.status, "failed");
        assert!(response.error.unwrap().contains("timeout"));

        let row = store
            .job_status(weekday_at(5, 30).date_naive(), "pre-market-prep")
            .unwrap()
            .unwrap();
        assert_eq!(row.status, "failed");
    }

    #[tokio::test]
    async fn dependencies_table() {
        assert_eq!(job_dependencies("sentiment-scan"), &["pre-market-prep"]);
        assert_eq!(job_dependencies("pre-market-prep"), &[] as &[&str]);
    }
}
