//! Kubernetes Scheduler Driver
//!
//! Schedules app specs onto a Kubernetes cluster through a
//! [`ClusterApiClient`](crate::domain::ports::ClusterApiClient). All
//! operations walk the context's resources in spec order and stop at the
//! first failure; nothing is rolled back.

use crate::domain::ports::{
    ClusterApiRef, Node, NodeType, ScheduleOptions, SchedulerDriver, WaitOptions,
};
use crate::error::{Error, Result};
use crate::scheduler::context::Context;
use crate::scheduler::dispatch::ResourceDispatcher;
use crate::spec::AppSpecFactory;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Node as KubeNode;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Registry name of the Kubernetes driver
pub const SCHED_NAME: &str = "k8s";

const MASTER_ROLE_LABELS: &[&str] = &[
    "node-role.kubernetes.io/master",
    "node-role.kubernetes.io/control-plane",
];

type AppErrorCtor = fn(String, String, Box<Error>) -> Error;

fn app_error(ctor: AppErrorCtor, app: &str, cause: String, source: Error) -> Error {
    ctor(app.to_string(), cause, Box::new(source))
}

/// Scheduler driver for Kubernetes
pub struct K8sDriver {
    client: ClusterApiRef,
    dispatcher: ResourceDispatcher,
    factory: Arc<AppSpecFactory>,
    /// Node snapshot from the last successful init
    nodes: RwLock<Vec<Node>>,
}

impl K8sDriver {
    pub fn new(client: ClusterApiRef, factory: Arc<AppSpecFactory>) -> Self {
        Self {
            dispatcher: ResourceDispatcher::new(client.clone()),
            client,
            factory,
            nodes: RwLock::new(Vec::new()),
        }
    }

    pub fn factory(&self) -> &AppSpecFactory {
        &self.factory
    }

    /// Whether a node carries a control-plane role label or taint
    pub fn is_master(node: &KubeNode) -> bool {
        let labelled = node
            .metadata
            .labels
            .as_ref()
            .map(|labels| MASTER_ROLE_LABELS.iter().any(|l| labels.contains_key(*l)))
            .unwrap_or(false);

        let tainted = node
            .spec
            .as_ref()
            .and_then(|s| s.taints.as_ref())
            .map(|taints| {
                taints.iter().any(|t| {
                    MASTER_ROLE_LABELS.contains(&t.key.as_str()) && t.effect == "NoSchedule"
                })
            })
            .unwrap_or(false);

        labelled || tainted
    }

    fn to_node(node: &KubeNode) -> Node {
        let addresses = node
            .status
            .as_ref()
            .and_then(|s| s.addresses.as_ref())
            .map(|addrs| {
                addrs
                    .iter()
                    .filter(|a| a.type_ == "ExternalIP" || a.type_ == "InternalIP")
                    .map(|a| a.address.clone())
                    .collect()
            })
            .unwrap_or_default();

        Node {
            name: node.metadata.name.clone().unwrap_or_default(),
            addresses,
            node_type: if Self::is_master(node) {
                NodeType::Master
            } else {
                NodeType::Worker
            },
        }
    }
}

#[async_trait]
impl SchedulerDriver for K8sDriver {
    fn name(&self) -> &str {
        SCHED_NAME
    }

    async fn init(&self) -> Result<()> {
        let listed = self.client.list_nodes().await?;
        let nodes: Vec<Node> = listed.iter().map(Self::to_node).collect();

        info!(
            "Discovered {} nodes ({} masters)",
            nodes.len(),
            nodes.iter().filter(|n| n.node_type == NodeType::Master).count()
        );
        *self.nodes.write() = nodes;
        Ok(())
    }

    fn nodes(&self) -> Vec<Node> {
        self.nodes.read().clone()
    }

    async fn schedule_into(
        &self,
        instance_id: &str,
        options: &ScheduleOptions,
        contexts: &mut Vec<Context>,
    ) -> Result<()> {
        let specs = self.factory.resolve(&options.app_keys)?;

        for spec in specs {
            let objs = spec
                .storage(instance_id)
                .into_iter()
                .chain(spec.core(instance_id));

            for obj in objs {
                self.dispatcher
                    .materialize(spec.key(), &obj)
                    .await
                    .map_err(|e| {
                        app_error(
                            |app, cause, source| Error::FailedToScheduleApp { app, cause, source },
                            spec.key(),
                            format!("failed to create {}", obj),
                            e,
                        )
                    })?;
            }

            info!("Scheduled app {} as instance {}", spec.key(), instance_id);
            contexts.push(Context::new(instance_id, spec));
        }

        Ok(())
    }

    async fn wait_for_running(&self, ctx: &Context, wait: &WaitOptions) -> Result<()> {
        for obj in ctx.core() {
            self.dispatcher
                .validate(ctx.app_key(), &obj, wait)
                .await
                .map_err(|e| {
                    app_error(
                        |app, cause, source| Error::FailedToValidateApp { app, cause, source },
                        ctx.app_key(),
                        format!("failed to validate {}", obj),
                        e,
                    )
                })?;
        }
        Ok(())
    }

    async fn destroy(&self, ctx: &Context) -> Result<()> {
        for obj in ctx.core() {
            self.dispatcher
                .teardown(ctx.app_key(), &obj)
                .await
                .map_err(|e| {
                    app_error(
                        |app, cause, source| Error::FailedToDestroyApp { app, cause, source },
                        ctx.app_key(),
                        format!("failed to destroy {}", obj),
                        e,
                    )
                })?;
        }
        Ok(())
    }

    async fn wait_for_destroy(&self, ctx: &Context, wait: &WaitOptions) -> Result<()> {
        for obj in ctx.core() {
            self.dispatcher
                .validate_teardown(ctx.app_key(), &obj, wait)
                .await
                .map_err(|e| {
                    app_error(
                        |app, cause, source| Error::FailedToValidateAppDestroy {
                            app,
                            cause,
                            source,
                        },
                        ctx.app_key(),
                        format!("failed to validate destroy of {}", obj),
                        e,
                    )
                })?;
        }
        Ok(())
    }

    async fn get_volumes(&self, ctx: &Context) -> Result<Vec<String>> {
        let mut volumes = Vec::new();
        for obj in ctx.storage() {
            let volume = self.dispatcher.volume(ctx.app_key(), &obj).await.map_err(|e| {
                app_error(
                    |app, cause, source| Error::FailedToGetVolumesForApp { app, cause, source },
                    ctx.app_key(),
                    format!("failed to get volume for {}", obj),
                    e,
                )
            })?;
            volumes.extend(volume);
        }
        Ok(volumes)
    }

    async fn get_volume_parameters(
        &self,
        ctx: &Context,
    ) -> Result<BTreeMap<String, BTreeMap<String, String>>> {
        let mut result = BTreeMap::new();
        for obj in ctx.storage() {
            let found = self
                .dispatcher
                .volume_parameters(ctx.app_key(), &obj)
                .await
                .map_err(|e| {
                    app_error(
                        |app, cause, source| Error::FailedToGetVolumesParameters {
                            app,
                            cause,
                            source,
                        },
                        ctx.app_key(),
                        format!("failed to get parameters for {}", obj),
                        e,
                    )
                })?;
            if let Some((volume, params)) = found {
                result.insert(volume, params);
            }
        }
        Ok(result)
    }

    async fn inspect_volumes(&self, ctx: &Context, wait: &WaitOptions) -> Result<()> {
        for obj in ctx.storage() {
            self.dispatcher
                .validate_storage(ctx.app_key(), &obj, wait)
                .await
                .map_err(|e| {
                    app_error(
                        |app, cause, source| Error::FailedToValidateStorage { app, cause, source },
                        ctx.app_key(),
                        format!("failed to validate {}", obj),
                        e,
                    )
                })?;
        }
        Ok(())
    }

    async fn delete_volumes(&self, ctx: &Context) -> Result<()> {
        for obj in ctx.storage() {
            self.dispatcher
                .teardown_storage(ctx.app_key(), &obj)
                .await
                .map_err(|e| {
                    app_error(
                        |app, cause, source| Error::FailedToDestroyStorage { app, cause, source },
                        ctx.app_key(),
                        format!("failed to destroy {}", obj),
                        e,
                    )
                })?;
        }
        Ok(())
    }

    async fn get_nodes_for_app(&self, ctx: &Context) -> Result<Vec<Node>> {
        let known = self.nodes();
        let mut nodes: Vec<Node> = Vec::new();

        for obj in ctx.core() {
            let names = self
                .dispatcher
                .hosting_nodes(ctx.app_key(), &obj)
                .await
                .map_err(|e| {
                    app_error(
                        |app, cause, source| Error::FailedToGetNodesForApp { app, cause, source },
                        ctx.app_key(),
                        format!("failed to get nodes for {}", obj),
                        e,
                    )
                })?;

            for name in names {
                if nodes.iter().any(|n| n.name == name) {
                    continue;
                }
                match known.iter().find(|n| n.name == name) {
                    Some(node) => nodes.push(node.clone()),
                    None => {
                        warn!("Node {} hosting {} is not in the init snapshot", name, ctx);
                        nodes.push(Node {
                            name,
                            addresses: Vec::new(),
                            node_type: NodeType::Worker,
                        });
                    }
                }
            }
        }

        Ok(nodes)
    }

    async fn stop_sched_on_node(&self, node: &Node) -> Result<()> {
        self.client.stop_scheduling_service(node).await?;
        info!("Stopped scheduling service on node {}", node.name);
        Ok(())
    }

    async fn start_sched_on_node(&self, node: &Node) -> Result<()> {
        self.client.start_scheduling_service(node).await?;
        info!("Started scheduling service on node {}", node.name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::{ClusterOperation, Fault, InMemoryCluster};
    use crate::spec::{register_builtin, AppSpec, ResourceKind, ResourceObject, TemplateAppSpec};
    use assert_matches::assert_matches;
    use std::time::Duration;

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
      app: echo
  template:
    metadata:
      labels:
        app: echo
"#;

    const BROKEN: &str = r#"
apiVersion: apps/v1
kind: Deployment
metadata:
  name: broken-${INSTANCE_ID}
spec:
  selector:
    matchLabels:
      app: broken
  template:
    metadata:
      labels:
        app: broken
---
apiVersion: batch/v1
kind: CronJob
metadata:
  name: broken-tick-${INSTANCE_ID}
"#;

    const PAIR: &str = r#"
apiVersion: apps/v1
kind: Deployment
metadata:
  name: front-${INSTANCE_ID}
spec:
  selector:
    matchLabels:
      app: front
  template:
    metadata:
      labels:
        app: front
---
apiVersion: apps/v1
kind: Deployment
metadata:
  name: back-${INSTANCE_ID}
spec:
  selector:
    matchLabels:
      app: back
  template:
    metadata:
      labels:
        app: back
"#;

    /// Spec that lists its core resources as storage
    struct Misplaced(TemplateAppSpec);

    impl AppSpec for Misplaced {
        fn key(&self) -> &str {
            self.0.key()
        }

        fn storage(&self, instance_id: &str) -> Vec<ResourceObject> {
            self.0.core(instance_id)
        }

        fn core(&self, _instance_id: &str) -> Vec<ResourceObject> {
            Vec::new()
        }
    }

    fn cluster() -> Arc<InMemoryCluster> {
        Arc::new(
            InMemoryCluster::new()
                .with_master("master-0", "10.0.0.10")
                .with_worker("worker-1", "10.0.0.11")
                .with_worker("worker-2", "10.0.0.12"),
        )
    }

    fn driver_with(cluster: Arc<InMemoryCluster>, manifests: &[(&str, &str)]) -> K8sDriver {
        let mut factory = AppSpecFactory::new();
        for (key, manifest) in manifests {
            factory
                .register(Arc::new(TemplateAppSpec::from_yaml(*key, manifest).unwrap()))
                .unwrap();
        }
        K8sDriver::new(cluster, Arc::new(factory))
    }

    fn wait() -> WaitOptions {
        WaitOptions::with_timeout(Duration::from_secs(5))
    }

    #[tokio::test]
    async fn test_init_classifies_nodes() {
        let driver = driver_with(cluster(), &[("echo", ECHO)]);
        driver.init().await.unwrap();

        let nodes = driver.nodes();
        assert_eq!(nodes.len(), 3);
        assert_eq!(nodes[0].name, "master-0");
        assert_eq!(nodes[0].node_type, NodeType::Master);
        assert_eq!(nodes[0].addresses, vec!["10.0.0.10".to_string()]);
        assert_eq!(nodes[1].node_type, NodeType::Worker);
    }

    #[tokio::test]
    async fn test_init_failure_keeps_previous_snapshot() {
        let cluster = cluster();
        let driver = driver_with(cluster.clone(), &[("echo", ECHO)]);
        driver.init().await.unwrap();

        cluster
            .inject(Fault::fail(ClusterOperation::ListNodes, "apiserver down"))
            .await;
        assert!(driver.init().await.is_err());
        assert_eq!(driver.nodes().len(), 3);
    }

    #[tokio::test]
    async fn test_schedule_selected_app() {
        let mut factory = AppSpecFactory::new();
        register_builtin(&mut factory).unwrap();
        let driver = K8sDriver::new(cluster(), Arc::new(factory));

        let contexts = driver
            .schedule("pg-1", &ScheduleOptions::with_apps(["postgres"]))
            .await
            .unwrap();
        assert_eq!(contexts.len(), 1);
        assert_eq!(contexts[0].app.key(), "postgres");
        assert_eq!(contexts[0].uid, "pg-1");
    }

    #[tokio::test]
    async fn test_schedule_all_in_registration_order() {
        let mut factory = AppSpecFactory::new();
        register_builtin(&mut factory).unwrap();
        let driver = K8sDriver::new(cluster(), Arc::new(factory));

        let contexts = driver.schedule("all", &ScheduleOptions::default()).await.unwrap();
        let keys: Vec<_> = contexts.iter().map(|c| c.app_key().to_string()).collect();
        assert_eq!(keys, vec!["postgres", "nginx"]);
    }

    #[tokio::test]
    async fn test_schedule_unknown_app() {
        let cluster = cluster();
        let driver = driver_with(cluster.clone(), &[("echo", ECHO)]);

        let err = driver
            .schedule("x", &ScheduleOptions::with_apps(["echo", "mysql"]))
            .await
            .unwrap_err();
        assert_matches!(err, Error::UnknownAppKind { key } if key == "mysql");
        assert_eq!(cluster.object_count().await, 0);
    }

    #[tokio::test]
    async fn test_schedule_partial_failure_keeps_prior_contexts() {
        let cluster = cluster();
        let driver = driver_with(
            cluster.clone(),
            &[("echo", ECHO), ("broken", BROKEN), ("later", ECHO)],
        );

        let mut contexts = Vec::new();
        let err = driver
            .schedule_into("run-1", &ScheduleOptions::default(), &mut contexts)
            .await
            .unwrap_err();

        assert_matches!(&err, Error::FailedToScheduleApp { app, .. } if app == "broken");
        assert_matches!(err.root(), Error::UnsupportedResourceKind { .. });
        assert_eq!(contexts.len(), 1);
        assert_eq!(contexts[0].app_key(), "echo");

        // echo stays, broken's deployment was created before the failure
        assert!(cluster.contains(ResourceKind::Deployment, "echo-run-1").await);
        assert!(cluster.contains(ResourceKind::Deployment, "broken-run-1").await);
    }

    #[tokio::test]
    async fn test_schedule_stops_at_failing_resource() {
        let cluster = cluster();
        cluster
            .inject(Fault::fail(ClusterOperation::Create, "quota exceeded").on("echo-data-a"))
            .await;
        let driver = driver_with(cluster.clone(), &[("echo", ECHO)]);

        let mut contexts = Vec::new();
        let err = driver
            .schedule_into("a", &ScheduleOptions::default(), &mut contexts)
            .await
            .unwrap_err();

        assert_matches!(
            &err,
            Error::FailedToScheduleApp { app, cause, .. }
                if app == "echo" && cause.contains("PersistentVolumeClaim/echo-data-a")
        );
        assert!(contexts.is_empty());
        assert!(!cluster.contains(ResourceKind::Deployment, "echo-a").await);
    }

    #[tokio::test]
    async fn test_validate_failure_is_app_scoped() {
        let cluster = cluster();
        let driver = driver_with(cluster.clone(), &[("echo", ECHO)]);
        let ctx = driver.schedule("v", &ScheduleOptions::default()).await.unwrap().remove(0);

        cluster
            .inject(Fault::fail(ClusterOperation::Validate, "crashloop").on("echo-v"))
            .await;
        let err = driver.wait_for_running(&ctx, &wait()).await.unwrap_err();
        assert_matches!(&err, Error::FailedToValidateApp { app, .. } if app == "echo");
        assert_eq!(err.app(), Some("echo"));
    }

    #[tokio::test]
    async fn test_validate_honours_deadline() {
        let cluster = cluster();
        let driver = driver_with(cluster.clone(), &[("echo", ECHO)]);
        let ctx = driver.schedule("h", &ScheduleOptions::default()).await.unwrap().remove(0);

        cluster.inject(Fault::hang(ClusterOperation::Validate)).await;
        let err = driver
            .wait_for_running(&ctx, &WaitOptions::with_timeout(Duration::from_millis(50)))
            .await
            .unwrap_err();
        assert_matches!(err.root(), Error::WaitTimeout { .. });
    }

    #[tokio::test]
    async fn test_volumes() {
        let cluster = cluster();
        let mut factory = AppSpecFactory::new();
        register_builtin(&mut factory).unwrap();
        let driver = K8sDriver::new(cluster.clone(), Arc::new(factory));

        let ctx = driver
            .schedule("v1", &ScheduleOptions::with_apps(["postgres"]))
            .await
            .unwrap()
            .remove(0);
        driver.inspect_volumes(&ctx, &wait()).await.unwrap();

        let volumes = driver.get_volumes(&ctx).await.unwrap();
        assert_eq!(volumes.len(), 1);

        let params = driver.get_volume_parameters(&ctx).await.unwrap();
        assert_eq!(params.len(), 1);
        assert_eq!(params[&volumes[0]]["repl"], "3");

        driver.destroy(&ctx).await.unwrap();
        driver.wait_for_destroy(&ctx, &wait()).await.unwrap();
        driver.delete_volumes(&ctx).await.unwrap();
        assert_eq!(cluster.object_count().await, 0);

        // a destroyed context has no volumes left to resolve
        let err = driver.get_volumes(&ctx).await.unwrap_err();
        assert_matches!(err, Error::FailedToGetVolumesForApp { .. });
    }

    #[tokio::test]
    async fn test_destroy_stops_at_first_failure() {
        let cluster = cluster();
        let driver = driver_with(cluster.clone(), &[("echo", ECHO)]);
        let ctx = driver.schedule("d", &ScheduleOptions::default()).await.unwrap().remove(0);

        cluster
            .inject(Fault::fail(ClusterOperation::Delete, "forbidden"))
            .await;
        let err = driver.destroy(&ctx).await.unwrap_err();
        assert_matches!(err, Error::FailedToDestroyApp { .. });
        assert!(cluster.contains(ResourceKind::Deployment, "echo-d").await);
    }

    #[tokio::test]
    async fn test_nodes_for_app_and_service_control() {
        let cluster = cluster();
        let driver = driver_with(cluster.clone(), &[("echo", ECHO)]);
        driver.init().await.unwrap();
        let ctx = driver.schedule("n", &ScheduleOptions::default()).await.unwrap().remove(0);

        let nodes = driver.get_nodes_for_app(&ctx).await.unwrap();
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].node_type, NodeType::Worker);

        driver.stop_sched_on_node(&nodes[0]).await.unwrap();
        driver.stop_sched_on_node(&nodes[0]).await.unwrap();
        assert!(!cluster.is_scheduling_service_running(&nodes[0].name).await);

        driver.wait_for_running(&ctx, &wait()).await.unwrap();

        driver.start_sched_on_node(&nodes[0]).await.unwrap();
        assert!(cluster.is_scheduling_service_running(&nodes[0].name).await);
    }

    async fn scheduled_echo(cluster: &Arc<InMemoryCluster>, id: &str) -> (K8sDriver, Context) {
        let driver = driver_with(cluster.clone(), &[("echo", ECHO)]);
        let ctx = driver
            .schedule(id, &ScheduleOptions::default())
            .await
            .unwrap()
            .remove(0);
        (driver, ctx)
    }

    #[tokio::test]
    async fn test_destroy_leaves_later_resources_in_place() {
        let cluster = cluster();
        let driver = driver_with(cluster.clone(), &[("pair", PAIR)]);
        let ctx = driver.schedule("p", &ScheduleOptions::default()).await.unwrap().remove(0);

        cluster
            .inject(Fault::fail(ClusterOperation::Delete, "forbidden").on("front-p"))
            .await;
        let err = driver.destroy(&ctx).await.unwrap_err();
        assert_matches!(
            &err,
            Error::FailedToDestroyApp { app, cause, .. }
                if app == "pair" && cause.contains("Deployment/front-p")
        );
        assert!(cluster.contains(ResourceKind::Deployment, "front-p").await);
        assert!(cluster.contains(ResourceKind::Deployment, "back-p").await);
    }

    #[tokio::test]
    async fn test_wait_for_destroy_failure_is_app_scoped() {
        let cluster = cluster();
        let (driver, ctx) = scheduled_echo(&cluster, "wd").await;
        driver.destroy(&ctx).await.unwrap();

        cluster
            .inject(Fault::fail(ClusterOperation::ValidateDeleted, "finalizer stuck").on("echo-wd"))
            .await;
        let err = driver.wait_for_destroy(&ctx, &wait()).await.unwrap_err();
        assert_matches!(&err, Error::FailedToValidateAppDestroy { app, .. } if app == "echo");
        assert_matches!(err.root(), Error::ClusterApi { reason, .. } if reason == "finalizer stuck");
    }

    #[tokio::test]
    async fn test_get_volumes_failure_is_app_scoped() {
        let cluster = cluster();
        let (driver, ctx) = scheduled_echo(&cluster, "gv").await;

        cluster
            .inject(Fault::fail(ClusterOperation::GetVolume, "unbound").on("echo-data-gv"))
            .await;
        let err = driver.get_volumes(&ctx).await.unwrap_err();
        assert_matches!(&err, Error::FailedToGetVolumesForApp { app, .. } if app == "echo");
        assert_matches!(err.root(), Error::ClusterApi { operation, .. } if operation == "get_volume");
    }

    #[tokio::test]
    async fn test_get_volume_parameters_failure_is_app_scoped() {
        let cluster = cluster();
        let (driver, ctx) = scheduled_echo(&cluster, "gp").await;

        cluster
            .inject(Fault::fail(ClusterOperation::GetParameters, "no class").on("echo-data-gp"))
            .await;
        let err = driver.get_volume_parameters(&ctx).await.unwrap_err();
        assert_matches!(&err, Error::FailedToGetVolumesParameters { app, .. } if app == "echo");
        assert_matches!(err.root(), Error::ClusterApi { operation, .. } if operation == "get_parameters");
    }

    #[tokio::test]
    async fn test_inspect_volumes_failure_is_app_scoped() {
        let cluster = cluster();
        let (driver, ctx) = scheduled_echo(&cluster, "iv").await;

        cluster
            .inject(Fault::fail(ClusterOperation::Validate, "pending").on("echo-data-iv"))
            .await;
        let err = driver.inspect_volumes(&ctx, &wait()).await.unwrap_err();
        assert_matches!(&err, Error::FailedToValidateStorage { app, .. } if app == "echo");

        // the deployment is not part of storage validation
        driver.wait_for_running(&ctx, &wait()).await.unwrap();
    }

    #[tokio::test]
    async fn test_delete_volumes_failure_is_app_scoped() {
        let cluster = cluster();
        let (driver, ctx) = scheduled_echo(&cluster, "dv").await;
        driver.destroy(&ctx).await.unwrap();

        cluster
            .inject(Fault::fail(ClusterOperation::Delete, "in use").on("echo-data-dv"))
            .await;
        let err = driver.delete_volumes(&ctx).await.unwrap_err();
        assert_matches!(&err, Error::FailedToDestroyStorage { app, .. } if app == "echo");
        assert!(cluster.contains(ResourceKind::PersistentVolumeClaim, "echo-data-dv").await);
    }

    #[tokio::test]
    async fn test_get_nodes_for_app_failure_is_app_scoped() {
        let cluster = cluster();
        let (driver, ctx) = scheduled_echo(&cluster, "gn").await;
        driver.init().await.unwrap();

        cluster
            .inject(Fault::fail(ClusterOperation::NodesForDeployment, "pods unlisted").on("echo-gn"))
            .await;
        let err = driver.get_nodes_for_app(&ctx).await.unwrap_err();
        assert_matches!(&err, Error::FailedToGetNodesForApp { app, .. } if app == "echo");
        assert_matches!(err.root(), Error::ClusterApi { operation, .. } if operation == "nodes_for_deployment");
    }

    #[tokio::test]
    async fn test_storage_calls_reject_core_kinds() {
        let cluster = cluster();
        let mut factory = AppSpecFactory::new();
        factory
            .register(Arc::new(Misplaced(TemplateAppSpec::from_yaml("odd", ECHO).unwrap())))
            .unwrap();
        let driver = K8sDriver::new(cluster.clone(), Arc::new(factory));

        // storage() yields the deployment
        let ctx = driver.schedule("m", &ScheduleOptions::default()).await.unwrap().remove(0);
        assert!(cluster.contains(ResourceKind::Deployment, "echo-m").await);

        let err = driver.inspect_volumes(&ctx, &wait()).await.unwrap_err();
        assert_matches!(&err, Error::FailedToValidateStorage { app, .. } if app == "odd");
        assert_matches!(err.root(), Error::UnsupportedResourceKind { object, .. } if object == "Deployment/echo-m");

        let err = driver.delete_volumes(&ctx).await.unwrap_err();
        assert_matches!(&err, Error::FailedToDestroyStorage { .. });
        assert_matches!(err.root(), Error::UnsupportedResourceKind { .. });
        assert!(cluster.contains(ResourceKind::Deployment, "echo-m").await);
    }
}
