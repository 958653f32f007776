//! In-Memory Cluster
//!
//! A deterministic, in-process stand-in for a Kubernetes cluster. Used for
//! standalone runs, benchmarks and tests. Claims bind immediately to a
//! generated volume, deployments are placed on the least loaded worker whose
//! scheduling service is running, and faults can be injected per operation.

use crate::domain::ports::{ClusterApiClient, Node, WaitOptions};
use crate::error::{Error, Result};
use crate::spec::ResourceKind;
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{
    Node as KubeNode, NodeAddress, NodeStatus, PersistentVolumeClaim,
};
use k8s_openapi::api::storage::v1::StorageClass;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::ResourceExt;
use std::collections::{BTreeMap, BTreeSet};
use tokio::sync::RwLock;
use tracing::{debug, warn};

const DEFAULT_NAMESPACE: &str = "default";
const CONTROL_PLANE_LABEL: &str = "node-role.kubernetes.io/control-plane";
const BETA_STORAGE_CLASS_ANNOTATION: &str = "volume.beta.kubernetes.io/storage-class";

// =============================================================================
// Fault Injection
// =============================================================================

/// Cluster operations that faults can target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClusterOperation {
    ListNodes,
    Create,
    Validate,
    Delete,
    ValidateDeleted,
    GetVolume,
    GetParameters,
    NodesForDeployment,
    StopService,
    StartService,
}

impl std::fmt::Display for ClusterOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ClusterOperation::ListNodes => "list_nodes",
            ClusterOperation::Create => "create",
            ClusterOperation::Validate => "validate",
            ClusterOperation::Delete => "delete",
            ClusterOperation::ValidateDeleted => "validate_deleted",
            ClusterOperation::GetVolume => "get_volume",
            ClusterOperation::GetParameters => "get_parameters",
            ClusterOperation::NodesForDeployment => "nodes_for_deployment",
            ClusterOperation::StopService => "stop_service",
            ClusterOperation::StartService => "start_service",
        };
        write!(f, "{}", s)
    }
}

/// What an injected fault does
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FaultMode {
    /// Fail with the given reason
    Fail(String),
    /// Never complete
    Hang,
}

/// A fault armed on an operation, optionally only for one object or node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fault {
    pub operation: ClusterOperation,
    pub target: Option<String>,
    pub mode: FaultMode,
}

impl Fault {
    pub fn fail(operation: ClusterOperation, reason: impl Into<String>) -> Self {
        Self {
            operation,
            target: None,
            mode: FaultMode::Fail(reason.into()),
        }
    }

    pub fn hang(operation: ClusterOperation) -> Self {
        Self {
            operation,
            target: None,
            mode: FaultMode::Hang,
        }
    }

    /// Restrict the fault to the object or node with this name
    pub fn on(mut self, name: impl Into<String>) -> Self {
        self.target = Some(name.into());
        self
    }

    fn matches(&self, operation: ClusterOperation, name: &str) -> bool {
        self.operation == operation && self.target.as_deref().map_or(true, |t| t == name)
    }
}

// =============================================================================
// Cluster State
// =============================================================================

#[derive(Debug, Clone)]
struct ClaimRecord {
    claim: PersistentVolumeClaim,
    volume: String,
}

#[derive(Debug, Clone)]
struct DeploymentRecord {
    name: String,
    /// Empty while no node could take the pods
    node: String,
}

#[derive(Debug, Default)]
struct ClusterState {
    storage_classes: BTreeMap<String, StorageClass>,
    claims: BTreeMap<String, ClaimRecord>,
    deployments: BTreeMap<String, DeploymentRecord>,
    /// Nodes whose scheduling service is stopped
    stopped: BTreeSet<String>,
    next_volume: u64,
}

// =============================================================================
// In-Memory Cluster
// =============================================================================

/// In-process cluster implementing [`ClusterApiClient`]
#[derive(Debug, Default)]
pub struct InMemoryCluster {
    nodes: Vec<KubeNode>,
    state: RwLock<ClusterState>,
    faults: RwLock<Vec<Fault>>,
}

impl InMemoryCluster {
    /// Create an empty cluster with no nodes
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a control-plane node
    pub fn with_master(mut self, name: &str, address: &str) -> Self {
        self.nodes.push(build_node(name, address, true));
        self
    }

    /// Add a worker node
    pub fn with_worker(mut self, name: &str, address: &str) -> Self {
        self.nodes.push(build_node(name, address, false));
        self
    }

    /// Arm a fault; faults stay armed until cleared
    pub async fn inject(&self, fault: Fault) {
        debug!("Injecting fault: {:?}", fault);
        self.faults.write().await.push(fault);
    }

    pub async fn clear_faults(&self) {
        self.faults.write().await.clear();
    }

    /// Number of live storage classes, claims and deployments
    pub async fn object_count(&self) -> usize {
        let state = self.state.read().await;
        state.storage_classes.len() + state.claims.len() + state.deployments.len()
    }

    /// Whether an object of this kind and name exists in any namespace
    pub async fn contains(&self, kind: ResourceKind, name: &str) -> bool {
        let state = self.state.read().await;
        match kind {
            ResourceKind::StorageClass => state.storage_classes.contains_key(name),
            ResourceKind::PersistentVolumeClaim => {
                state.claims.values().any(|c| c.claim.name_any() == name)
            }
            ResourceKind::Deployment => state.deployments.values().any(|d| d.name == name),
            ResourceKind::Other(_) => false,
        }
    }

    pub async fn is_scheduling_service_running(&self, node: &str) -> bool {
        !self.state.read().await.stopped.contains(node)
    }

    /// Fail or hang if an armed fault matches
    async fn check(&self, operation: ClusterOperation, name: &str) -> Result<()> {
        let fault = self
            .faults
            .read()
            .await
            .iter()
            .find(|f| f.matches(operation, name))
            .cloned();

        match fault.map(|f| f.mode) {
            None => Ok(()),
            Some(FaultMode::Fail(reason)) => Err(Error::ClusterApi {
                operation: operation.to_string(),
                reason,
            }),
            Some(FaultMode::Hang) => std::future::pending().await,
        }
    }

    fn node_names(&self) -> impl Iterator<Item = String> + '_ {
        self.nodes.iter().map(|n| n.name_any())
    }

    fn is_worker(node: &KubeNode) -> bool {
        !node.labels().contains_key(CONTROL_PLANE_LABEL)
    }

    /// Least loaded worker with a running scheduling service
    fn place(&self, state: &ClusterState) -> Option<String> {
        self.nodes
            .iter()
            .filter(|n| Self::is_worker(n))
            .map(|n| n.name_any())
            .filter(|name| !state.stopped.contains(name))
            .min_by_key(|name| {
                state
                    .deployments
                    .values()
                    .filter(|d| &d.node == name)
                    .count()
            })
    }
}

fn build_node(name: &str, address: &str, master: bool) -> KubeNode {
    let mut labels = BTreeMap::new();
    labels.insert("kubernetes.io/hostname".to_string(), name.to_string());
    if master {
        labels.insert(CONTROL_PLANE_LABEL.to_string(), String::new());
    }

    KubeNode {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            labels: Some(labels),
            ..Default::default()
        },
        status: Some(NodeStatus {
            addresses: Some(vec![
                NodeAddress {
                    address: address.to_string(),
                    type_: "InternalIP".to_string(),
                },
                NodeAddress {
                    address: name.to_string(),
                    type_: "Hostname".to_string(),
                },
            ]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn namespaced_key<K: ResourceExt>(obj: &K) -> String {
    format!(
        "{}/{}",
        obj.namespace().unwrap_or_else(|| DEFAULT_NAMESPACE.to_string()),
        obj.name_any()
    )
}

fn claim_class(claim: &PersistentVolumeClaim) -> Option<String> {
    claim
        .spec
        .as_ref()
        .and_then(|s| s.storage_class_name.clone())
        .or_else(|| claim.annotations().get(BETA_STORAGE_CLASS_ANNOTATION).cloned())
}

fn not_found(kind: &str, name: String) -> Error {
    Error::ResourceNotFound {
        kind: kind.to_string(),
        name,
    }
}

fn still_present(kind: &str, name: &str) -> Error {
    Error::ResourceNotReady {
        resource: format!("{}/{}", kind, name),
        state: "still present".into(),
    }
}

#[async_trait]
impl ClusterApiClient for InMemoryCluster {
    async fn list_nodes(&self) -> Result<Vec<KubeNode>> {
        self.check(ClusterOperation::ListNodes, "").await?;
        Ok(self.nodes.clone())
    }

    // -------------------------------------------------------------------------
    // Storage classes
    // -------------------------------------------------------------------------

    async fn create_storage_class(&self, obj: &StorageClass) -> Result<()> {
        let name = obj.name_any();
        self.check(ClusterOperation::Create, &name).await?;

        let mut state = self.state.write().await;
        if state.storage_classes.contains_key(&name) {
            return Err(Error::ResourceExists {
                kind: "StorageClass".into(),
                name,
            });
        }
        state.storage_classes.insert(name, obj.clone());
        Ok(())
    }

    async fn validate_storage_class(&self, obj: &StorageClass, wait: &WaitOptions) -> Result<()> {
        let name = obj.name_any();
        wait.run(&format!("StorageClass/{}", name), async {
            self.check(ClusterOperation::Validate, &name).await?;
            if self.state.read().await.storage_classes.contains_key(&name) {
                Ok(())
            } else {
                Err(not_found("StorageClass", name.clone()))
            }
        })
        .await
    }

    async fn delete_storage_class(&self, obj: &StorageClass) -> Result<()> {
        let name = obj.name_any();
        self.check(ClusterOperation::Delete, &name).await?;

        match self.state.write().await.storage_classes.remove(&name) {
            Some(_) => Ok(()),
            None => Err(not_found("StorageClass", name)),
        }
    }

    async fn validate_deleted_storage_class(
        &self,
        obj: &StorageClass,
        wait: &WaitOptions,
    ) -> Result<()> {
        let name = obj.name_any();
        wait.run(&format!("StorageClass/{}", name), async {
            self.check(ClusterOperation::ValidateDeleted, &name).await?;
            if self.state.read().await.storage_classes.contains_key(&name) {
                Err(still_present("StorageClass", &name))
            } else {
                Ok(())
            }
        })
        .await
    }

    // -------------------------------------------------------------------------
    // Claims
    // -------------------------------------------------------------------------

    async fn create_claim(&self, obj: &PersistentVolumeClaim) -> Result<()> {
        self.check(ClusterOperation::Create, &obj.name_any()).await?;

        let key = namespaced_key(obj);
        let mut state = self.state.write().await;
        if state.claims.contains_key(&key) {
            return Err(Error::ResourceExists {
                kind: "PersistentVolumeClaim".into(),
                name: key,
            });
        }

        state.next_volume += 1;
        let volume = format!("pvc-{:08}", state.next_volume);
        state.claims.insert(
            key,
            ClaimRecord {
                claim: obj.clone(),
                volume,
            },
        );
        Ok(())
    }

    async fn validate_claim(&self, obj: &PersistentVolumeClaim, wait: &WaitOptions) -> Result<()> {
        let key = namespaced_key(obj);
        wait.run(&format!("PersistentVolumeClaim/{}", key), async {
            self.check(ClusterOperation::Validate, &obj.name_any()).await?;

            let state = self.state.read().await;
            let record = state
                .claims
                .get(&key)
                .ok_or_else(|| not_found("PersistentVolumeClaim", key.clone()))?;

            match claim_class(&record.claim) {
                Some(class) if !state.storage_classes.contains_key(&class) => {
                    Err(Error::ResourceNotReady {
                        resource: format!("PersistentVolumeClaim/{}", key),
                        state: format!("Pending: storage class {} not found", class),
                    })
                }
                _ => Ok(()),
            }
        })
        .await
    }

    async fn delete_claim(&self, obj: &PersistentVolumeClaim) -> Result<()> {
        self.check(ClusterOperation::Delete, &obj.name_any()).await?;

        let key = namespaced_key(obj);
        match self.state.write().await.claims.remove(&key) {
            Some(_) => Ok(()),
            None => Err(not_found("PersistentVolumeClaim", key)),
        }
    }

    async fn validate_deleted_claim(
        &self,
        obj: &PersistentVolumeClaim,
        wait: &WaitOptions,
    ) -> Result<()> {
        let key = namespaced_key(obj);
        wait.run(&format!("PersistentVolumeClaim/{}", key), async {
            self.check(ClusterOperation::ValidateDeleted, &obj.name_any())
                .await?;
            if self.state.read().await.claims.contains_key(&key) {
                Err(still_present("PersistentVolumeClaim", &key))
            } else {
                Ok(())
            }
        })
        .await
    }

    // -------------------------------------------------------------------------
    // Deployments
    // -------------------------------------------------------------------------

    async fn create_deployment(&self, obj: &Deployment) -> Result<()> {
        let name = obj.name_any();
        self.check(ClusterOperation::Create, &name).await?;

        let key = namespaced_key(obj);
        let mut state = self.state.write().await;
        if state.deployments.contains_key(&key) {
            return Err(Error::ResourceExists {
                kind: "Deployment".into(),
                name: key,
            });
        }

        let node = self.place(&state).unwrap_or_else(|| {
            warn!("No schedulable node for deployment {}", key);
            String::new()
        });
        state.deployments.insert(key, DeploymentRecord { name, node });
        Ok(())
    }

    async fn validate_deployment(&self, obj: &Deployment, wait: &WaitOptions) -> Result<()> {
        let key = namespaced_key(obj);
        wait.run(&format!("Deployment/{}", key), async {
            self.check(ClusterOperation::Validate, &obj.name_any()).await?;

            let state = self.state.read().await;
            let record = state
                .deployments
                .get(&key)
                .ok_or_else(|| not_found("Deployment", key.clone()))?;
            if record.node.is_empty() {
                return Err(Error::ResourceNotReady {
                    resource: format!("Deployment/{}", key),
                    state: "pods unschedulable".into(),
                });
            }
            Ok(())
        })
        .await
    }

    async fn delete_deployment(&self, obj: &Deployment) -> Result<()> {
        self.check(ClusterOperation::Delete, &obj.name_any()).await?;

        let key = namespaced_key(obj);
        match self.state.write().await.deployments.remove(&key) {
            Some(_) => Ok(()),
            None => Err(not_found("Deployment", key)),
        }
    }

    async fn validate_deleted_deployment(
        &self,
        obj: &Deployment,
        wait: &WaitOptions,
    ) -> Result<()> {
        let key = namespaced_key(obj);
        wait.run(&format!("Deployment/{}", key), async {
            self.check(ClusterOperation::ValidateDeleted, &obj.name_any())
                .await?;
            if self.state.read().await.deployments.contains_key(&key) {
                Err(still_present("Deployment", &key))
            } else {
                Ok(())
            }
        })
        .await
    }

    // -------------------------------------------------------------------------
    // Lookups
    // -------------------------------------------------------------------------

    async fn get_volume_for_claim(&self, obj: &PersistentVolumeClaim) -> Result<String> {
        self.check(ClusterOperation::GetVolume, &obj.name_any()).await?;

        let key = namespaced_key(obj);
        self.state
            .read()
            .await
            .claims
            .get(&key)
            .map(|c| c.volume.clone())
            .ok_or_else(|| not_found("PersistentVolumeClaim", key))
    }

    async fn get_claim_parameters(
        &self,
        obj: &PersistentVolumeClaim,
    ) -> Result<BTreeMap<String, String>> {
        self.check(ClusterOperation::GetParameters, &obj.name_any())
            .await?;

        let key = namespaced_key(obj);
        let state = self.state.read().await;
        let record = state
            .claims
            .get(&key)
            .ok_or_else(|| not_found("PersistentVolumeClaim", key.clone()))?;

        match claim_class(&record.claim) {
            Some(class) => state
                .storage_classes
                .get(&class)
                .map(|sc| sc.parameters.clone().unwrap_or_default())
                .ok_or_else(|| not_found("StorageClass", class)),
            None => Ok(BTreeMap::new()),
        }
    }

    async fn nodes_for_deployment(&self, obj: &Deployment) -> Result<Vec<String>> {
        self.check(ClusterOperation::NodesForDeployment, &obj.name_any())
            .await?;

        let key = namespaced_key(obj);
        let state = self.state.read().await;
        let record = state
            .deployments
            .get(&key)
            .ok_or_else(|| not_found("Deployment", key.clone()))?;

        Ok(if record.node.is_empty() {
            Vec::new()
        } else {
            vec![record.node.clone()]
        })
    }

    // -------------------------------------------------------------------------
    // Scheduling service
    // -------------------------------------------------------------------------

    async fn stop_scheduling_service(&self, node: &Node) -> Result<()> {
        self.check(ClusterOperation::StopService, &node.name).await?;
        if !self.node_names().any(|n| n == node.name) {
            return Err(not_found("Node", node.name.clone()));
        }
        self.state.write().await.stopped.insert(node.name.clone());
        Ok(())
    }

    async fn start_scheduling_service(&self, node: &Node) -> Result<()> {
        self.check(ClusterOperation::StartService, &node.name).await?;
        if !self.node_names().any(|n| n == node.name) {
            return Err(not_found("Node", node.name.clone()));
        }
        self.state.write().await.stopped.remove(&node.name);
        Ok(())
    }
}
