//! Scheduler Driver Module
//!
//! Application lifecycle against a cluster backend:
//! - Context: handle to one scheduled app instance
//! - Dispatcher: kind-keyed routing of resources to cluster calls
//! - K8s driver: the Kubernetes backend
//! - Registry: name to driver lookup

pub mod context;
pub mod dispatch;
pub mod k8s;
pub mod registry;

pub use context::Context;
pub use dispatch::ResourceDispatcher;
pub use k8s::{K8sDriver, SCHED_NAME};
pub use registry::DriverRegistry;
