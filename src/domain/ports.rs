//! Domain Ports - Core trait definitions for the harness
//!
//! These traits define the boundaries between the scheduler-driver core and
//! the cluster it drives. Adapters implement these traits to provide
//! concrete functionality.

use crate::error::{Error, Result};
use crate::scheduler::Context;
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Node as KubeNode, PersistentVolumeClaim};
use k8s_openapi::api::storage::v1::StorageClass;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

// =============================================================================
// Nodes
// =============================================================================

/// Role of a cluster node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeType {
    Master,
    Worker,
}

impl std::fmt::Display for NodeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeType::Master => write!(f, "master"),
            NodeType::Worker => write!(f, "worker"),
        }
    }
}

/// Snapshot of a cluster node taken at driver init
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    /// Node name as known to the orchestrator
    pub name: String,
    /// External and internal addresses
    pub addresses: Vec<String>,
    /// Master/worker classification
    pub node_type: NodeType,
}

impl Node {
    /// Address used to reach the node from the harness host
    pub fn primary_address(&self) -> &str {
        self.addresses.first().map(String::as_str).unwrap_or(&self.name)
    }
}

// =============================================================================
// Options
// =============================================================================

/// Options for a schedule call
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleOptions {
    /// Apps to schedule; all registered apps when empty
    #[serde(default)]
    pub app_keys: Vec<String>,
}

impl ScheduleOptions {
    pub fn with_apps<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            app_keys: keys.into_iter().map(Into::into).collect(),
        }
    }
}

/// Caller-controlled bounds for readiness and teardown validation
#[derive(Debug, Clone)]
pub struct WaitOptions {
    /// Deadline for a single validation call; unbounded when `None`
    pub timeout: Option<Duration>,
    /// Interval between readiness polls
    pub poll_interval: Duration,
    /// External cancellation
    pub cancel: Option<CancellationToken>,
}

impl Default for WaitOptions {
    fn default() -> Self {
        Self {
            timeout: None,
            poll_interval: Duration::from_secs(5),
            cancel: None,
        }
    }
}

impl WaitOptions {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
            ..Default::default()
        }
    }

    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Fill in a timeout if the caller left it unbounded
    pub fn or_timeout(&self, timeout: Duration) -> Self {
        let mut wait = self.clone();
        wait.timeout.get_or_insert(timeout);
        wait
    }

    /// Drive `fut` to completion under this deadline and cancellation token
    pub async fn run<F, T>(&self, resource: &str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let bounded = async {
            match self.timeout {
                Some(after) => match tokio::time::timeout(after, fut).await {
                    Ok(res) => res,
                    Err(_) => Err(Error::WaitTimeout {
                        resource: resource.to_string(),
                        after,
                    }),
                },
                None => fut.await,
            }
        };

        match &self.cancel {
            Some(token) => {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => Err(Error::WaitCancelled {
                        resource: resource.to_string(),
                    }),
                    res = bounded => res,
                }
            }
            None => bounded.await,
        }
    }
}

// =============================================================================
// Cluster API Client Port
// =============================================================================

/// Port for all cluster-side calls the driver core needs
#[async_trait]
pub trait ClusterApiClient: Send + Sync {
    /// List all nodes in the cluster
    async fn list_nodes(&self) -> Result<Vec<KubeNode>>;

    async fn create_storage_class(&self, obj: &StorageClass) -> Result<()>;
    async fn validate_storage_class(&self, obj: &StorageClass, wait: &WaitOptions) -> Result<()>;
    async fn delete_storage_class(&self, obj: &StorageClass) -> Result<()>;
    async fn validate_deleted_storage_class(
        &self,
        obj: &StorageClass,
        wait: &WaitOptions,
    ) -> Result<()>;

    async fn create_claim(&self, obj: &PersistentVolumeClaim) -> Result<()>;
    async fn validate_claim(&self, obj: &PersistentVolumeClaim, wait: &WaitOptions) -> Result<()>;
    async fn delete_claim(&self, obj: &PersistentVolumeClaim) -> Result<()>;
    async fn validate_deleted_claim(
        &self,
        obj: &PersistentVolumeClaim,
        wait: &WaitOptions,
    ) -> Result<()>;

    async fn create_deployment(&self, obj: &Deployment) -> Result<()>;
    async fn validate_deployment(&self, obj: &Deployment, wait: &WaitOptions) -> Result<()>;
    async fn delete_deployment(&self, obj: &Deployment) -> Result<()>;
    async fn validate_deleted_deployment(&self, obj: &Deployment, wait: &WaitOptions)
        -> Result<()>;

    /// Backend volume bound to a claim
    async fn get_volume_for_claim(&self, obj: &PersistentVolumeClaim) -> Result<String>;

    /// Provisioner parameters in effect for a claim
    async fn get_claim_parameters(
        &self,
        obj: &PersistentVolumeClaim,
    ) -> Result<BTreeMap<String, String>>;

    /// Names of the nodes running pods of a deployment
    async fn nodes_for_deployment(&self, obj: &Deployment) -> Result<Vec<String>>;

    /// Stop the orchestrator's scheduling service on a node
    async fn stop_scheduling_service(&self, node: &Node) -> Result<()>;

    /// Start the orchestrator's scheduling service on a node
    async fn start_scheduling_service(&self, node: &Node) -> Result<()>;
}

// =============================================================================
// Node Service Controller Port
// =============================================================================

/// Port for node-level service control
#[async_trait]
pub trait NodeServiceController: Send + Sync {
    async fn stop(&self, node: &Node) -> Result<()>;
    async fn start(&self, node: &Node) -> Result<()>;
}

// =============================================================================
// Scheduler Driver Port
// =============================================================================

/// A backend that can schedule application instances and inject
/// cluster-level faults.
///
/// Every call is sequential and fail-fast: the first failing resource aborts
/// the call, nothing is rolled back, and the error names the owning app.
#[async_trait]
pub trait SchedulerDriver: Send + Sync {
    /// Registry name of this driver
    fn name(&self) -> &str;

    /// Discover cluster nodes
    async fn init(&self) -> Result<()>;

    /// Node snapshot captured by the last successful `init`
    fn nodes(&self) -> Vec<Node>;

    /// Schedule apps, appending one context per fully materialised spec.
    ///
    /// On error `contexts` holds the contexts of every spec that finished
    /// before the failing one; those are not rolled back.
    async fn schedule_into(
        &self,
        instance_id: &str,
        options: &ScheduleOptions,
        contexts: &mut Vec<Context>,
    ) -> Result<()>;

    async fn schedule(&self, instance_id: &str, options: &ScheduleOptions) -> Result<Vec<Context>> {
        let mut contexts = Vec::new();
        self.schedule_into(instance_id, options, &mut contexts).await?;
        Ok(contexts)
    }

    async fn wait_for_running(&self, ctx: &Context, wait: &WaitOptions) -> Result<()>;

    async fn destroy(&self, ctx: &Context) -> Result<()>;

    async fn wait_for_destroy(&self, ctx: &Context, wait: &WaitOptions) -> Result<()>;

    /// Volume IDs of the context's claims.
    ///
    /// Calling this on a destroyed context is a caller error and fails.
    async fn get_volumes(&self, ctx: &Context) -> Result<Vec<String>>;

    async fn get_volume_parameters(
        &self,
        ctx: &Context,
    ) -> Result<BTreeMap<String, BTreeMap<String, String>>>;

    async fn inspect_volumes(&self, ctx: &Context, wait: &WaitOptions) -> Result<()>;

    async fn delete_volumes(&self, ctx: &Context) -> Result<()>;

    async fn get_nodes_for_app(&self, ctx: &Context) -> Result<Vec<Node>>;

    async fn stop_sched_on_node(&self, node: &Node) -> Result<()>;

    async fn start_sched_on_node(&self, node: &Node) -> Result<()>;
}

// =============================================================================
// Type Aliases for Arc'd Traits
// =============================================================================

pub type ClusterApiRef = Arc<dyn ClusterApiClient>;
pub type NodeServiceControllerRef = Arc<dyn NodeServiceController>;
pub type SchedulerDriverRef = Arc<dyn SchedulerDriver>;
