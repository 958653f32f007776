//! Stop-scheduler scenario
//!
//! Schedules `scale_factor` instances of the selected apps, then for each
//! instance stops the scheduling service on one of the nodes running it,
//! waits for the cluster to settle and checks the app is still healthy.
//! Every context that was created is torn down, whatever the outcome.

use crate::domain::ports::{Node, ScheduleOptions, SchedulerDriverRef, WaitOptions};
use crate::error::{Error, Result};
use crate::scenario::report::ScenarioReport;
use crate::scheduler::Context;
use std::time::Duration;
use tracing::{info, warn};

/// Scenario configuration
#[derive(Debug, Clone)]
pub struct StopSchedulerConfig {
    /// Instance IDs are `{test_name}-{i}`
    pub test_name: String,
    /// Number of instances of each app
    pub scale_factor: usize,
    /// Apps to schedule; all registered apps when empty
    pub app_keys: Vec<String>,
    /// Time given to the cluster after the service stops
    pub settle: Duration,
    /// Bounds for every validation
    pub wait: WaitOptions,
}

impl Default for StopSchedulerConfig {
    fn default() -> Self {
        Self {
            test_name: "stopscheduler".to_string(),
            scale_factor: 1,
            app_keys: Vec::new(),
            settle: Duration::from_secs(360),
            wait: WaitOptions::default(),
        }
    }
}

/// Stop-scheduler fault-injection scenario
pub struct StopSchedulerScenario {
    driver: SchedulerDriverRef,
    config: StopSchedulerConfig,
}

impl StopSchedulerScenario {
    pub fn new(driver: SchedulerDriverRef, config: StopSchedulerConfig) -> Self {
        Self { driver, config }
    }

    /// Run the scenario to completion; failures are recorded in the report
    pub async fn run(&self) -> ScenarioReport {
        let mut report = ScenarioReport::new(&self.config.test_name, self.driver.name());
        let mut contexts = Vec::new();

        if let Err(e) = self.exercise(&mut contexts, &mut report).await {
            warn!("Scenario {} aborted: {}", self.config.test_name, e);
        }

        report.contexts = contexts.iter().map(|c| c.to_string()).collect();
        self.teardown(&contexts, &mut report).await;
        report.finish();

        info!(
            "Scenario {} {}",
            self.config.test_name,
            if report.passed { "passed" } else { "failed" }
        );
        report
    }

    async fn exercise(&self, contexts: &mut Vec<Context>, report: &mut ScenarioReport) -> Result<()> {
        let options = ScheduleOptions::with_apps(self.config.app_keys.iter().cloned());

        for i in 0..self.config.scale_factor {
            let instance_id = format!("{}-{}", self.config.test_name, i);
            report
                .step(
                    format!("schedule apps for {}", instance_id),
                    self.driver.schedule_into(&instance_id, &options, contexts),
                )
                .await?;
        }

        if contexts.is_empty() {
            return report
                .step("check apps were scheduled", async {
                    Err(Error::Configuration(format!(
                        "no app instances scheduled (scale factor {}, apps {:?})",
                        self.config.scale_factor, self.config.app_keys
                    )))
                })
                .await;
        }

        self.validate_all(contexts, report).await?;

        for ctx in contexts.iter() {
            let nodes = report
                .step(
                    format!("get nodes where {} is running", ctx),
                    self.nodes_for(ctx),
                )
                .await?;
            let node = &nodes[pick(&ctx.uid, nodes.len())];

            report
                .step(
                    format!("stop scheduler service on {}", node.name),
                    self.driver.stop_sched_on_node(node),
                )
                .await?;

            info!("Waiting {:?} for the cluster to settle", self.config.settle);
            tokio::time::sleep(self.config.settle).await;

            let validated = report
                .step(format!("check {} is running", ctx), self.validate(ctx))
                .await;

            report
                .step(
                    format!("start scheduler service on {}", node.name),
                    self.driver.start_sched_on_node(node),
                )
                .await?;
            validated?;
        }

        self.validate_all(contexts, report).await
    }

    async fn nodes_for(&self, ctx: &Context) -> Result<Vec<Node>> {
        let nodes = self.driver.get_nodes_for_app(ctx).await?;
        if nodes.is_empty() {
            return Err(Error::Internal(format!("{} is not running on any node", ctx)));
        }
        Ok(nodes)
    }

    async fn validate(&self, ctx: &Context) -> Result<()> {
        self.driver.inspect_volumes(ctx, &self.config.wait).await?;
        self.driver.wait_for_running(ctx, &self.config.wait).await
    }

    async fn validate_all(&self, contexts: &[Context], report: &mut ScenarioReport) -> Result<()> {
        for ctx in contexts {
            report
                .step(format!("validate {}", ctx), self.validate(ctx))
                .await?;
        }
        Ok(())
    }

    /// Destroy every context; a failure skips the rest of that context only
    async fn teardown(&self, contexts: &[Context], report: &mut ScenarioReport) {
        for ctx in contexts {
            let torn_down = async {
                report
                    .step(format!("destroy {}", ctx), self.driver.destroy(ctx))
                    .await?;
                report
                    .step(
                        format!("wait for {} to be destroyed", ctx),
                        self.driver.wait_for_destroy(ctx, &self.config.wait),
                    )
                    .await?;
                report
                    .step(
                        format!("delete volumes of {}", ctx),
                        self.driver.delete_volumes(ctx),
                    )
                    .await
            };
            if let Err(e) = torn_down.await {
                warn!("Teardown of {} incomplete: {}", ctx, e);
            }
        }
    }
}

/// Stable index into `len` nodes for an instance
fn pick(uid: &str, len: usize) -> usize {
    let hash = uid
        .bytes()
        .fold(0usize, |acc, b| acc.wrapping_mul(31).wrapping_add(b as usize));
    hash % len
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::{ClusterOperation, Fault, InMemoryCluster};
    use crate::domain::ports::SchedulerDriver;
    use crate::scheduler::K8sDriver;
    use crate::spec::{AppSpecFactory, TemplateAppSpec};
    use std::sync::Arc;

    const ECHO: &str = r#"
apiVersion: v1
kind: PersistentVolumeClaim
metadata:
  name: echo-data-${INSTANCE_ID}
---
apiVersion: apps/v1
kind: Deployment
metadata:
  name: echo-${INSTANCE_ID}
spec:
  selector:
    matchLabels:
      app: echo-${INSTANCE_ID}
  template:
    metadata:
      labels:
        app: echo-${INSTANCE_ID}
"#;

    async fn setup() -> (Arc<InMemoryCluster>, SchedulerDriverRef) {
        let cluster = Arc::new(
            InMemoryCluster::new()
                .with_master("m1", "10.0.0.1")
                .with_worker("w1", "10.0.0.2")
                .with_worker("w2", "10.0.0.3"),
        );
        let mut factory = AppSpecFactory::new();
        factory
            .register(Arc::new(TemplateAppSpec::from_yaml("echo", ECHO).unwrap()))
            .unwrap();

        let driver = K8sDriver::new(cluster.clone(), Arc::new(factory));
        driver.init().await.unwrap();
        (cluster, Arc::new(driver))
    }

    fn config(scale_factor: usize) -> StopSchedulerConfig {
        StopSchedulerConfig {
            scale_factor,
            settle: Duration::from_millis(1),
            wait: WaitOptions::with_timeout(Duration::from_secs(1)),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_app_survives_scheduler_stop() {
        let (cluster, driver) = setup().await;
        let report = StopSchedulerScenario::new(driver, config(2)).run().await;

        assert!(report.passed, "{:?}", report.first_failure());
        assert_eq!(
            report.contexts,
            vec!["echo/stopscheduler-0", "echo/stopscheduler-1"]
        );
        assert!(report
            .steps
            .iter()
            .any(|s| s.name.starts_with("stop scheduler service on w")));

        assert_eq!(cluster.object_count().await, 0);
        assert!(cluster.is_scheduling_service_running("w1").await);
        assert!(cluster.is_scheduling_service_running("w2").await);
    }

    #[tokio::test]
    async fn test_failed_validation_still_tears_down() {
        let (cluster, driver) = setup().await;
        cluster
            .inject(Fault::fail(ClusterOperation::Validate, "crashloop").on("echo-stopscheduler-0"))
            .await;

        let report = StopSchedulerScenario::new(driver, config(1)).run().await;

        assert!(!report.passed);
        let failure = report.first_failure().unwrap();
        assert_eq!(failure.name, "validate echo/stopscheduler-0");
        assert_eq!(failure.app.as_deref(), Some("echo"));
        assert!(report.steps.iter().any(|s| s.name == "destroy echo/stopscheduler-0"));
        assert_eq!(cluster.object_count().await, 0);
    }

    #[tokio::test]
    async fn test_partial_schedule_is_torn_down() {
        let (cluster, driver) = setup().await;
        cluster
            .inject(Fault::fail(ClusterOperation::Create, "quota").on("echo-stopscheduler-1"))
            .await;

        let report = StopSchedulerScenario::new(driver, config(2)).run().await;

        assert!(!report.passed);
        assert_eq!(report.contexts, vec!["echo/stopscheduler-0"]);
        // the claim of the failed instance was created before the deployment failed
        assert!(
            cluster
                .contains(crate::spec::ResourceKind::PersistentVolumeClaim, "echo-data-stopscheduler-1")
                .await
        );
        assert_eq!(cluster.object_count().await, 1);
    }

    #[tokio::test]
    async fn test_nothing_scheduled_fails() {
        let (_cluster, driver) = setup().await;
        let report = StopSchedulerScenario::new(driver, config(0)).run().await;

        assert!(!report.passed);
        assert!(report.contexts.is_empty());
        let failure = report.first_failure().unwrap();
        assert_eq!(failure.name, "check apps were scheduled");
        assert_eq!(report.steps.len(), 1);
    }

    #[tokio::test]
    async fn test_empty_factory_fails() {
        let cluster = Arc::new(InMemoryCluster::new().with_worker("w1", "10.0.0.2"));
        let driver: SchedulerDriverRef =
            Arc::new(K8sDriver::new(cluster, Arc::new(AppSpecFactory::new())));

        let report = StopSchedulerScenario::new(driver, config(1)).run().await;
        assert!(!report.passed);
        assert_eq!(
            report.first_failure().map(|s| s.name.as_str()),
            Some("check apps were scheduled")
        );
    }

    #[test]
    fn test_pick_is_stable() {
        assert_eq!(pick("run-1", 3), pick("run-1", 3));
        assert!(pick("run-1", 3) < 3);
        assert_eq!(pick("anything", 1), 0);
    }
}
