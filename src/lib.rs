//! Resilience Harness - Scheduler Driver Core
//!
//! Schedules named application templates onto an orchestrator, validates
//! them, injects cluster-level faults and tears them down again, reporting
//! every failure against the app that caused it.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                Scenario (StopSchedulerScenario, report)              │
//! ├──────────────────────────────────────────────────────────────────────┤
//! │   Driver Registry  ──►  SchedulerDriver (K8sDriver)   ──►  Context   │
//! │                              │                                       │
//! │        App Spec Factory ─────┤  (storage + core resource objects)    │
//! │                              ▼                                       │
//! │                     Resource Dispatcher                              │
//! ├──────────────────────────────────────────────────────────────────────┤
//! │                       Cluster API Client                             │
//! │  ┌──────────────────────┐  ┌──────────────────┐  ┌────────────────┐  │
//! │  │  KubeClusterClient   │  │  InMemoryCluster │  │  SSH service   │  │
//! │  │  (kube / k8s-openapi)│  │  (fault inject)  │  │  control       │  │
//! │  └──────────────────────┘  └──────────────────┘  └────────────────┘  │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`scheduler`]: driver implementation, dispatcher, context and registry
//! - [`spec`]: app specs, resource objects and the app spec factory
//! - [`cluster`]: cluster API client adapters
//! - [`scenario`]: fault-injection scenarios and reports
//! - [`domain`]: port traits and shared types
//! - [`error`]: error types and handling

pub mod cluster;
pub mod domain;
pub mod error;
pub mod scenario;
pub mod scheduler;
pub mod spec;

// Re-export commonly used types
pub use cluster::{
    ClusterOperation, Fault, InMemoryCluster, KubeClusterClient, KubeClusterConfig,
    SshServiceConfig, SshServiceController,
};

pub use domain::ports::{
    ClusterApiClient, ClusterApiRef, Node, NodeServiceController, NodeServiceControllerRef,
    NodeType, ScheduleOptions, SchedulerDriver, SchedulerDriverRef, WaitOptions,
};

pub use error::{Error, Result};

pub use scenario::{ScenarioReport, StepRecord, StopSchedulerConfig, StopSchedulerScenario};

pub use scheduler::{Context, DriverRegistry, K8sDriver, ResourceDispatcher, SCHED_NAME};

pub use spec::{
    load_dir, register_builtin, AppSpec, AppSpecFactory, AppSpecRef, ResourceKind,
    ResourceObject, TemplateAppSpec,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
