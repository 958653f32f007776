//! Resource objects produced by app specs
//!
//! A resource object is a backend-specific descriptor of one cluster
//! resource. The core never looks inside; it only routes on the kind.

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::PersistentVolumeClaim;
use k8s_openapi::api::storage::v1::StorageClass;
use kube::api::DynamicObject;
use kube::ResourceExt;
use serde::Serialize;

/// Kind tag of a resource object
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    StorageClass,
    PersistentVolumeClaim,
    Deployment,
    /// Any kind this backend has no handler for
    Other(String),
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResourceKind::StorageClass => write!(f, "StorageClass"),
            ResourceKind::PersistentVolumeClaim => write!(f, "PersistentVolumeClaim"),
            ResourceKind::Deployment => write!(f, "Deployment"),
            ResourceKind::Other(kind) => write!(f, "{}", kind),
        }
    }
}

/// One cluster resource belonging to an app instance
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ResourceObject {
    StorageClass(StorageClass),
    PersistentVolumeClaim(PersistentVolumeClaim),
    Deployment(Deployment),
    Other(DynamicObject),
}

impl ResourceObject {
    pub fn kind(&self) -> ResourceKind {
        match self {
            ResourceObject::StorageClass(_) => ResourceKind::StorageClass,
            ResourceObject::PersistentVolumeClaim(_) => ResourceKind::PersistentVolumeClaim,
            ResourceObject::Deployment(_) => ResourceKind::Deployment,
            ResourceObject::Other(obj) => ResourceKind::Other(
                obj.types
                    .as_ref()
                    .map(|t| t.kind.clone())
                    .unwrap_or_else(|| "Unknown".to_string()),
            ),
        }
    }

    pub fn name(&self) -> String {
        match self {
            ResourceObject::StorageClass(obj) => obj.name_any(),
            ResourceObject::PersistentVolumeClaim(obj) => obj.name_any(),
            ResourceObject::Deployment(obj) => obj.name_any(),
            ResourceObject::Other(obj) => obj.name_any(),
        }
    }

    pub fn namespace(&self) -> Option<String> {
        match self {
            ResourceObject::StorageClass(_) => None,
            ResourceObject::PersistentVolumeClaim(obj) => obj.namespace(),
            ResourceObject::Deployment(obj) => obj.namespace(),
            ResourceObject::Other(obj) => obj.namespace(),
        }
    }

    /// `Kind/name` or `Kind/namespace/name`, used in error causes and logs
    pub fn describe(&self) -> String {
        match self.namespace() {
            Some(ns) => format!("{}/{}/{}", self.kind(), ns, self.name()),
            None => format!("{}/{}", self.kind(), self.name()),
        }
    }
}

impl std::fmt::Display for ResourceObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.describe())
    }
}

impl From<StorageClass> for ResourceObject {
    fn from(obj: StorageClass) -> Self {
        ResourceObject::StorageClass(obj)
    }
}

impl From<PersistentVolumeClaim> for ResourceObject {
    fn from(obj: PersistentVolumeClaim) -> Self {
        ResourceObject::PersistentVolumeClaim(obj)
    }
}

impl From<Deployment> for ResourceObject {
    fn from(obj: Deployment) -> Self {
        ResourceObject::Deployment(obj)
    }
}

impl From<DynamicObject> for ResourceObject {
    fn from(obj: DynamicObject) -> Self {
        ResourceObject::Other(obj)
    }
}
