//! Cluster Adapters
//!
//! Implementations of the cluster-facing ports:
//!
//! - [`KubeClusterClient`]: live Kubernetes API server
//! - [`InMemoryCluster`]: deterministic in-process cluster with fault injection
//! - [`SshServiceController`]: scheduling-service control over SSH

pub mod kube;
pub mod memory;
pub mod service;

pub use self::kube::{KubeClusterClient, KubeClusterConfig};
pub use memory::{ClusterOperation, Fault, FaultMode, InMemoryCluster};
pub use service::{SshServiceConfig, SshServiceController};
