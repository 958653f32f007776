//! Kubernetes Cluster Client
//!
//! [`ClusterApiClient`] backed by a live API server through `kube`.
//! Readiness and teardown checks poll with exponential backoff until the
//! caller's [`WaitOptions`] deadline, falling back to the configured
//! validate timeout when the caller leaves it unbounded.

use crate::domain::ports::{ClusterApiClient, Node, NodeServiceControllerRef, WaitOptions};
use crate::error::{Error, Result};
use async_trait::async_trait;
use backoff::ExponentialBackoffBuilder;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Node as KubeNode, PersistentVolumeClaim, Pod};
use k8s_openapi::api::storage::v1::StorageClass;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use k8s_openapi::NamespaceResourceScope;
use kube::api::{Api, DeleteParams, ListParams, PostParams};
use kube::{Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Debug;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info};

const BETA_STORAGE_CLASS_ANNOTATION: &str = "volume.beta.kubernetes.io/storage-class";
const CLAIM_BOUND: &str = "Bound";

// =============================================================================
// Configuration
// =============================================================================

/// Kubernetes client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KubeClusterConfig {
    /// Namespace for objects whose manifest names none
    pub default_namespace: String,
    /// Validation deadline when the caller gives none
    pub validate_timeout: Duration,
    /// First poll interval
    pub poll_interval: Duration,
    /// Upper bound for the backed-off poll interval
    pub max_poll_interval: Duration,
}

impl Default for KubeClusterConfig {
    fn default() -> Self {
        Self {
            default_namespace: "default".to_string(),
            validate_timeout: Duration::from_secs(600),
            poll_interval: Duration::from_secs(5),
            max_poll_interval: Duration::from_secs(30),
        }
    }
}

// =============================================================================
// Client
// =============================================================================

/// Cluster client talking to a Kubernetes API server
pub struct KubeClusterClient {
    client: Client,
    config: KubeClusterConfig,
    services: NodeServiceControllerRef,
}

impl KubeClusterClient {
    pub fn new(client: Client, config: KubeClusterConfig, services: NodeServiceControllerRef) -> Self {
        Self {
            client,
            config,
            services,
        }
    }

    /// Connect using the ambient kubeconfig or in-cluster service account
    pub async fn try_default(
        config: KubeClusterConfig,
        services: NodeServiceControllerRef,
    ) -> Result<Self> {
        let client = Client::try_default().await?;
        info!(
            "Connected to Kubernetes API (default namespace {})",
            config.default_namespace
        );
        Ok(Self::new(client, config, services))
    }

    fn namespace_of<K: ResourceExt>(&self, obj: &K) -> String {
        obj.namespace()
            .unwrap_or_else(|| self.config.default_namespace.clone())
    }

    fn namespaced<K>(&self, obj: &K) -> Api<K>
    where
        K: Resource<Scope = NamespaceResourceScope>,
        <K as Resource>::DynamicType: Default,
    {
        Api::namespaced(self.client.clone(), &self.namespace_of(obj))
    }

    fn storage_classes(&self) -> Api<StorageClass> {
        Api::all(self.client.clone())
    }

    fn claim_ref(&self, obj: &PersistentVolumeClaim) -> String {
        format!("{}/{}", self.namespace_of(obj), obj.name_any())
    }

    /// Poll `check` until it succeeds, a non-transient error occurs, or the
    /// wait expires
    async fn poll<F, Fut>(&self, resource: &str, wait: &WaitOptions, check: F) -> Result<()>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let wait = wait.or_timeout(self.config.validate_timeout);
        let policy = ExponentialBackoffBuilder::new()
            .with_initial_interval(wait.poll_interval)
            .with_max_interval(self.config.max_poll_interval.max(wait.poll_interval))
            .with_max_elapsed_time(None)
            .build();

        let attempts = backoff::future::retry_notify(
            policy,
            || async {
                check().await.map_err(|err| {
                    if err.is_transient() {
                        backoff::Error::transient(err)
                    } else {
                        backoff::Error::permanent(err)
                    }
                })
            },
            |err: Error, next: Duration| {
                debug!("{} not ready ({}), next check in {:?}", resource, err, next);
            },
        );

        wait.run(resource, attempts).await
    }
}

fn map_api_error(err: kube::Error, kind: &str, name: &str) -> Error {
    match &err {
        kube::Error::Api(resp) if resp.code == 404 => Error::ResourceNotFound {
            kind: kind.to_string(),
            name: name.to_string(),
        },
        kube::Error::Api(resp) if resp.code == 409 => Error::ResourceExists {
            kind: kind.to_string(),
            name: name.to_string(),
        },
        _ => Error::Kube(err),
    }
}

async fn create_in<K>(api: &Api<K>, obj: &K, kind: &str) -> Result<()>
where
    K: Resource + Clone + DeserializeOwned + Serialize + Debug,
{
    let name = obj.name_any();
    api.create(&PostParams::default(), obj)
        .await
        .map_err(|e| map_api_error(e, kind, &name))?;
    Ok(())
}

async fn delete_in<K>(api: &Api<K>, obj: &K, kind: &str, params: &DeleteParams) -> Result<()>
where
    K: Resource + Clone + DeserializeOwned + Debug,
{
    let name = obj.name_any();
    api.delete(&name, params)
        .await
        .map_err(|e| map_api_error(e, kind, &name))?;
    Ok(())
}

/// Resolve `obj` or fail with a transient not-found
async fn fetch<K>(api: &Api<K>, name: &str, kind: &str) -> Result<K>
where
    K: Resource + Clone + DeserializeOwned + Debug,
{
    api.get_opt(name).await?.ok_or_else(|| Error::ResourceNotFound {
        kind: kind.to_string(),
        name: name.to_string(),
    })
}

/// Succeed once `name` is gone
async fn absent<K>(api: &Api<K>, name: &str, kind: &str) -> Result<()>
where
    K: Resource + Clone + DeserializeOwned + Debug,
{
    match api.get_opt(name).await? {
        None => Ok(()),
        Some(_) => Err(Error::ResourceNotReady {
            resource: format!("{}/{}", kind, name),
            state: "still present".into(),
        }),
    }
}

fn claim_class(claim: &PersistentVolumeClaim) -> Option<String> {
    claim
        .spec
        .as_ref()
        .and_then(|s| s.storage_class_name.clone())
        .or_else(|| claim.annotations().get(BETA_STORAGE_CLASS_ANNOTATION).cloned())
}

/// Deployments are deleted in the foreground so the object outlives its
/// ReplicaSets and pods
fn deployment_delete_params() -> DeleteParams {
    DeleteParams::foreground()
}

/// Label selector string for a deployment's pods
fn label_selector(deployment: &Deployment) -> Option<String> {
    deployment
        .spec
        .as_ref()
        .and_then(|s| render_selector(&s.selector))
}

/// Render match labels and match expressions in label-selector syntax;
/// `None` when the selector is empty
fn render_selector(selector: &LabelSelector) -> Option<String> {
    let mut terms: Vec<String> = selector
        .match_labels
        .iter()
        .flatten()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect();

    for expr in selector.match_expressions.iter().flatten() {
        let values = expr.values.as_deref().unwrap_or_default().join(",");
        terms.push(match expr.operator.as_str() {
            "In" => format!("{} in ({})", expr.key, values),
            "NotIn" => format!("{} notin ({})", expr.key, values),
            "DoesNotExist" => format!("!{}", expr.key),
            _ => expr.key.clone(),
        });
    }

    if terms.is_empty() {
        None
    } else {
        Some(terms.join(","))
    }
}

/// Succeed once no pod of a deleted deployment is left
fn pods_gone(resource: &str, pods: &[Pod]) -> Result<()> {
    if pods.is_empty() {
        Ok(())
    } else {
        Err(Error::ResourceNotReady {
            resource: resource.to_string(),
            state: format!("{} pods terminating", pods.len()),
        })
    }
}

fn deployment_available(deployment: &Deployment) -> bool {
    let desired = deployment
        .spec
        .as_ref()
        .and_then(|s| s.replicas)
        .unwrap_or(1);
    let available = deployment
        .status
        .as_ref()
        .and_then(|s| s.available_replicas)
        .unwrap_or(0);
    available >= desired
}

#[async_trait]
impl ClusterApiClient for KubeClusterClient {
    async fn list_nodes(&self) -> Result<Vec<KubeNode>> {
        let nodes: Api<KubeNode> = Api::all(self.client.clone());
        Ok(nodes.list(&ListParams::default()).await?.items)
    }

    async fn create_storage_class(&self, obj: &StorageClass) -> Result<()> {
        create_in(&self.storage_classes(), obj, "StorageClass").await
    }

    async fn validate_storage_class(&self, obj: &StorageClass, wait: &WaitOptions) -> Result<()> {
        let name = obj.name_any();
        let api = self.storage_classes();
        self.poll(&format!("StorageClass/{}", name), wait, || async {
            fetch(&api, &name, "StorageClass").await.map(|_| ())
        })
        .await
    }

    async fn delete_storage_class(&self, obj: &StorageClass) -> Result<()> {
        delete_in(&self.storage_classes(), obj, "StorageClass", &DeleteParams::background()).await
    }

    async fn validate_deleted_storage_class(
        &self,
        obj: &StorageClass,
        wait: &WaitOptions,
    ) -> Result<()> {
        let name = obj.name_any();
        let api = self.storage_classes();
        self.poll(&format!("StorageClass/{}", name), wait, || {
            absent(&api, &name, "StorageClass")
        })
        .await
    }

    async fn create_claim(&self, obj: &PersistentVolumeClaim) -> Result<()> {
        create_in(&self.namespaced(obj), obj, "PersistentVolumeClaim").await
    }

    async fn validate_claim(&self, obj: &PersistentVolumeClaim, wait: &WaitOptions) -> Result<()> {
        let name = obj.name_any();
        let resource = format!("PersistentVolumeClaim/{}", self.claim_ref(obj));
        let api = self.namespaced(obj);
        self.poll(&resource, wait, || async {
            let claim = fetch(&api, &name, "PersistentVolumeClaim").await?;
            let phase = claim
                .status
                .and_then(|s| s.phase)
                .unwrap_or_else(|| "Pending".to_string());
            if phase == CLAIM_BOUND {
                Ok(())
            } else {
                Err(Error::ResourceNotReady {
                    resource: resource.clone(),
                    state: phase,
                })
            }
        })
        .await
    }

    async fn delete_claim(&self, obj: &PersistentVolumeClaim) -> Result<()> {
        delete_in(
            &self.namespaced(obj),
            obj,
            "PersistentVolumeClaim",
            &DeleteParams::background(),
        )
        .await
    }

    async fn validate_deleted_claim(
        &self,
        obj: &PersistentVolumeClaim,
        wait: &WaitOptions,
    ) -> Result<()> {
        let name = obj.name_any();
        let api = self.namespaced(obj);
        self.poll(
            &format!("PersistentVolumeClaim/{}", self.claim_ref(obj)),
            wait,
            || absent(&api, &name, "PersistentVolumeClaim"),
        )
        .await
    }

    async fn create_deployment(&self, obj: &Deployment) -> Result<()> {
        create_in(&self.namespaced(obj), obj, "Deployment").await
    }

    async fn validate_deployment(&self, obj: &Deployment, wait: &WaitOptions) -> Result<()> {
        let name = obj.name_any();
        let resource = format!("Deployment/{}/{}", self.namespace_of(obj), name);
        let api = self.namespaced(obj);
        self.poll(&resource, wait, || async {
            let deployment = fetch(&api, &name, "Deployment").await?;
            if deployment_available(&deployment) {
                Ok(())
            } else {
                Err(Error::ResourceNotReady {
                    resource: resource.clone(),
                    state: "replicas unavailable".into(),
                })
            }
        })
        .await
    }

    async fn delete_deployment(&self, obj: &Deployment) -> Result<()> {
        delete_in(&self.namespaced(obj), obj, "Deployment", &deployment_delete_params()).await
    }

    async fn validate_deleted_deployment(
        &self,
        obj: &Deployment,
        wait: &WaitOptions,
    ) -> Result<()> {
        let name = obj.name_any();
        let namespace = self.namespace_of(obj);
        let resource = format!("Deployment/{}/{}", namespace, name);
        let api = self.namespaced(obj);
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), &namespace);
        let selector = label_selector(obj);

        self.poll(&resource, wait, || async {
            absent(&api, &name, "Deployment").await?;
            match &selector {
                Some(selector) => {
                    let listed = pods.list(&ListParams::default().labels(selector)).await?;
                    pods_gone(&resource, &listed.items)
                }
                None => Ok(()),
            }
        })
        .await
    }

    async fn get_volume_for_claim(&self, obj: &PersistentVolumeClaim) -> Result<String> {
        let claim = fetch(&self.namespaced(obj), &obj.name_any(), "PersistentVolumeClaim").await?;
        claim
            .spec
            .and_then(|s| s.volume_name)
            .ok_or_else(|| Error::ResourceNotReady {
                resource: format!("PersistentVolumeClaim/{}", self.claim_ref(obj)),
                state: "unbound".into(),
            })
    }

    async fn get_claim_parameters(
        &self,
        obj: &PersistentVolumeClaim,
    ) -> Result<BTreeMap<String, String>> {
        let claim = fetch(&self.namespaced(obj), &obj.name_any(), "PersistentVolumeClaim").await?;
        match claim_class(&claim) {
            Some(class) => {
                let sc = fetch(&self.storage_classes(), &class, "StorageClass").await?;
                Ok(sc.parameters.unwrap_or_default())
            }
            None => Ok(BTreeMap::new()),
        }
    }

    async fn nodes_for_deployment(&self, obj: &Deployment) -> Result<Vec<String>> {
        let namespace = self.namespace_of(obj);
        let deployment = fetch(&self.namespaced(obj), &obj.name_any(), "Deployment").await?;
        let selector = match label_selector(&deployment) {
            Some(selector) => selector,
            None => return Ok(Vec::new()),
        };

        let pods: Api<Pod> = Api::namespaced(self.client.clone(), &namespace);
        let listed = pods.list(&ListParams::default().labels(&selector)).await?;
        let nodes: BTreeSet<String> = listed
            .items
            .into_iter()
            .filter_map(|pod| pod.spec.and_then(|s| s.node_name))
            .collect();
        Ok(nodes.into_iter().collect())
    }

    async fn stop_scheduling_service(&self, node: &Node) -> Result<()> {
        self.services.stop(node).await
    }

    async fn start_scheduling_service(&self, node: &Node) -> Result<()> {
        self.services.start(node).await
    }
}
