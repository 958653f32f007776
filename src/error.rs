//! Error types for the resilience harness
//!
//! Every failure that crosses a driver operation is attributed to the
//! application spec that owned the failing resource, so a scenario can
//! report exactly which app and which object broke.

use thiserror::Error;

/// Unified error type for the harness
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    // =========================================================================
    // Registry Errors
    // =========================================================================
    #[error("Unknown app kind: {key}")]
    UnknownAppKind { key: String },

    #[error("App already registered: {key}")]
    AppAlreadyRegistered { key: String },

    #[error("Unknown scheduler driver: {name}")]
    UnknownDriver { name: String },

    // =========================================================================
    // Dispatch Errors
    // =========================================================================
    #[error("App {app}: unsupported resource kind: {object}")]
    UnsupportedResourceKind { app: String, object: String },

    // =========================================================================
    // App Lifecycle Errors
    // =========================================================================
    #[error("Failed to schedule app {app}: {cause}: {source}")]
    FailedToScheduleApp {
        app: String,
        cause: String,
        source: Box<Error>,
    },

    #[error("Failed to validate app {app}: {cause}: {source}")]
    FailedToValidateApp {
        app: String,
        cause: String,
        source: Box<Error>,
    },

    #[error("Failed to destroy app {app}: {cause}: {source}")]
    FailedToDestroyApp {
        app: String,
        cause: String,
        source: Box<Error>,
    },

    #[error("Failed to validate destroy of app {app}: {cause}: {source}")]
    FailedToValidateAppDestroy {
        app: String,
        cause: String,
        source: Box<Error>,
    },

    #[error("Failed to get volumes for app {app}: {cause}: {source}")]
    FailedToGetVolumesForApp {
        app: String,
        cause: String,
        source: Box<Error>,
    },

    #[error("Failed to get volume parameters for app {app}: {cause}: {source}")]
    FailedToGetVolumesParameters {
        app: String,
        cause: String,
        source: Box<Error>,
    },

    #[error("Failed to validate storage for app {app}: {cause}: {source}")]
    FailedToValidateStorage {
        app: String,
        cause: String,
        source: Box<Error>,
    },

    #[error("Failed to destroy storage for app {app}: {cause}: {source}")]
    FailedToDestroyStorage {
        app: String,
        cause: String,
        source: Box<Error>,
    },

    #[error("Failed to get nodes for app {app}: {cause}: {source}")]
    FailedToGetNodesForApp {
        app: String,
        cause: String,
        source: Box<Error>,
    },

    // =========================================================================
    // Cluster Errors
    // =========================================================================
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("Resource not found: {kind}/{name}")]
    ResourceNotFound { kind: String, name: String },

    #[error("Resource already exists: {kind}/{name}")]
    ResourceExists { kind: String, name: String },

    #[error("Resource not ready: {resource} ({state})")]
    ResourceNotReady { resource: String, state: String },

    #[error("Cluster API error: {operation}: {reason}")]
    ClusterApi { operation: String, reason: String },

    #[error("Node service control failed: {node} - {operation}: {reason}")]
    NodeServiceControl {
        node: String,
        operation: String,
        reason: String,
    },

    #[error("Timed out after {after:?} waiting for {resource}")]
    WaitTimeout {
        resource: String,
        after: std::time::Duration,
    },

    #[error("Wait cancelled for {resource}")]
    WaitCancelled { resource: String },

    // =========================================================================
    // Parse Errors
    // =========================================================================
    #[error("Invalid manifest {path}: {reason}")]
    Manifest { path: String, reason: String },

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    // =========================================================================
    // IO Errors
    // =========================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Key of the app spec this error is attributed to, if any
    pub fn app(&self) -> Option<&str> {
        match self {
            Error::UnsupportedResourceKind { app, .. }
            | Error::FailedToScheduleApp { app, .. }
            | Error::FailedToValidateApp { app, .. }
            | Error::FailedToDestroyApp { app, .. }
            | Error::FailedToValidateAppDestroy { app, .. }
            | Error::FailedToGetVolumesForApp { app, .. }
            | Error::FailedToGetVolumesParameters { app, .. }
            | Error::FailedToValidateStorage { app, .. }
            | Error::FailedToDestroyStorage { app, .. }
            | Error::FailedToGetNodesForApp { app, .. } => Some(app),
            _ => None,
        }
    }

    /// Underlying error of an app-scoped wrapper
    pub fn root(&self) -> &Error {
        match self {
            Error::FailedToScheduleApp { source, .. }
            | Error::FailedToValidateApp { source, .. }
            | Error::FailedToDestroyApp { source, .. }
            | Error::FailedToValidateAppDestroy { source, .. }
            | Error::FailedToGetVolumesForApp { source, .. }
            | Error::FailedToGetVolumesParameters { source, .. }
            | Error::FailedToValidateStorage { source, .. }
            | Error::FailedToDestroyStorage { source, .. }
            | Error::FailedToGetNodesForApp { source, .. } => source.root(),
            other => other,
        }
    }

    /// Check if this error is transient.
    ///
    /// Cluster clients use this to decide whether a readiness poll should
    /// keep going; the driver itself never retries.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::ResourceNotReady { .. } | Error::ResourceNotFound { .. } => true,
            Error::Kube(kube::Error::Api(resp)) => resp.code == 429 || resp.code >= 500,
            Error::Kube(kube::Error::HyperError(_)) | Error::Kube(kube::Error::Service(_)) => true,
            _ => false,
        }
    }
}

/// Result type alias for the harness
pub type Result<T> = std::result::Result<T, Error>;
