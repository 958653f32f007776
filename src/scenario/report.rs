//! Scenario reports

use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;
use tracing::{error, info};

/// Outcome of one scenario step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepRecord {
    pub name: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub passed: bool,
    /// App the failure is attributed to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub app: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Serializable record of a scenario run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScenarioReport {
    pub scenario: String,
    pub driver: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Contexts created during the run, as `app/instance`
    pub contexts: Vec<String>,
    pub steps: Vec<StepRecord>,
    pub passed: bool,
}

impl ScenarioReport {
    pub fn new(scenario: impl Into<String>, driver: impl Into<String>) -> Self {
        Self {
            scenario: scenario.into(),
            driver: driver.into(),
            started_at: Utc::now(),
            finished_at: None,
            contexts: Vec::new(),
            steps: Vec::new(),
            passed: false,
        }
    }

    /// Run `fut` as a named step and record its outcome
    pub async fn step<T, F>(&mut self, name: impl Into<String>, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let name = name.into();
        let started_at = Utc::now();
        info!("Step: {}", name);

        let res = fut.await;
        if let Err(e) = &res {
            error!("Step failed: {}: {}", name, e);
        }

        self.steps.push(StepRecord {
            name,
            started_at,
            finished_at: Utc::now(),
            passed: res.is_ok(),
            app: res.as_ref().err().and_then(|e| e.app()).map(String::from),
            error: res.as_ref().err().map(|e| e.to_string()),
        });
        res
    }

    /// First failed step, if any
    pub fn first_failure(&self) -> Option<&StepRecord> {
        self.steps.iter().find(|s| !s.passed)
    }

    /// Seal the report; it passes only if every step passed
    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
        self.passed = self.first_failure().is_none();
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
