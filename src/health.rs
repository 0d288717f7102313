//! Component health checks for `maintenance health` and `GET /health`.

use std::time::Duration;

use serde::Serialize;
use tracing::warn;

use crate::budget::BudgetSummary;
use crate::market;
use crate::scan::Scanner;

const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Serialize)]
pub struct ComponentHealth {
    pub name: String,
    pub healthy: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobHealth {
    pub job: String,
    pub status: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub healthy: bool,
    pub components: Vec<ComponentHealth>,
    pub budget: Vec<BudgetSummary>,
    pub jobs_today: Vec<JobHealth>,
}

pub async fn check(scanner: &Scanner) -> HealthReport {
    let mut components = Vec::new();

    components.push(match scanner.store.ping() {
        Ok(()) => ComponentHealth {
            name: "database".to_string(),
            healthy: true,
            detail: None,
        },
        Err(e) => ComponentHealth {
            name: "database".to_string(),
            healthy: false,
            detail: Some(e.to_string()),
        },
    });

    for provider in scanner.provider_list() {
        let name = provider.name().to_string();
        let result = tokio::time::timeout(PROBE_TIMEOUT, provider.health_probe()).await;
        let (healthy, detail) = match result {
            Ok(Ok(())) => (true, None),
            Ok(Err(e)) => (false, Some(e.to_string())),
            Err(_) => (false, Some("health probe timed out".to_string())),
        };
        if !healthy {
            warn!(provider = %name, detail = ?detail, "provider unhealthy");
        }
        components.push(ComponentHealth {
            name,
            healthy,
            detail,
        });
    }

    let mut budget = Vec::new();
    for service in scanner.config().budget.keys() {
        match scanner.budget.summary(service) {
            Ok(summary) => budget.push(summary),
            Err(e) => components.push(ComponentHealth {
                name: format!("budget:{service}"),
                healthy: false,
                detail: Some(e.to_string()),
            }),
        }
    }

    let jobs_today = scanner
        .store
        .day_jobs(market::today_et())
        .map(|rows| {
            rows.into_iter()
                .map(|r| JobHealth {
                    job: r.job,
                    status: r.status,
                })
                .collect()
        })
        .unwrap_or_default();

    let healthy = components.iter().all(|c| c.healthy);
    HealthReport {
        healthy,
        components,
        budget,
        jobs_today,
    }
}
