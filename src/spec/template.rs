//! Manifest-backed app specs
//!
//! An app described by a multi-document YAML manifest. Every occurrence of
//! [`INSTANCE_PLACEHOLDER`] in object names, labels, selectors and
//! storage-class or claim references is replaced by the instance ID, so
//! several instances of one app can live side by side.

use crate::error::{Error, Result};
use crate::spec::factory::{AppSpec, AppSpecFactory};
use crate::spec::resource::ResourceObject;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::PersistentVolumeClaim;
use k8s_openapi::api::storage::v1::StorageClass;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::DynamicObject;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Placeholder substituted with the instance ID
pub const INSTANCE_PLACEHOLDER: &str = "${INSTANCE_ID}";

/// Annotation older clusters use instead of `spec.storageClassName`
const BETA_STORAGE_CLASS_ANNOTATION: &str = "volume.beta.kubernetes.io/storage-class";

/// App spec expanded from parsed manifest templates
#[derive(Debug, Clone)]
pub struct TemplateAppSpec {
    key: String,
    storage: Vec<ResourceObject>,
    core: Vec<ResourceObject>,
}

impl TemplateAppSpec {
    /// Parse a multi-document manifest.
    ///
    /// Storage classes and claims become storage resources; everything else
    /// is core, in document order.
    pub fn from_yaml(key: impl Into<String>, manifest: &str) -> Result<Self> {
        let key = key.into();
        let mut storage = Vec::new();
        let mut core = Vec::new();

        for doc in serde_yaml::Deserializer::from_str(manifest) {
            let value = serde_yaml::Value::deserialize(doc)?;
            if value.is_null() {
                continue;
            }

            let kind = value
                .get("kind")
                .and_then(serde_yaml::Value::as_str)
                .ok_or_else(|| Error::Manifest {
                    path: key.clone(),
                    reason: "document has no kind".into(),
                })?
                .to_string();

            match kind.as_str() {
                "StorageClass" => storage.push(ResourceObject::StorageClass(
                    serde_yaml::from_value::<StorageClass>(value)?,
                )),
                "PersistentVolumeClaim" => storage.push(ResourceObject::PersistentVolumeClaim(
                    serde_yaml::from_value::<PersistentVolumeClaim>(value)?,
                )),
                "Deployment" => core.push(ResourceObject::Deployment(
                    serde_yaml::from_value::<Deployment>(value)?,
                )),
                _ => core.push(ResourceObject::Other(serde_yaml::from_value::<
                    DynamicObject,
                >(value)?)),
            }
        }

        if storage.is_empty() && core.is_empty() {
            return Err(Error::Manifest {
                path: key,
                reason: "manifest contains no objects".into(),
            });
        }

        Ok(Self { key, storage, core })
    }

    /// Load a manifest file; the app key is the file stem
    pub fn from_file(path: &Path) -> Result<Self> {
        let key = path
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| Error::Manifest {
                path: path.display().to_string(),
                reason: "file name is not valid UTF-8".into(),
            })?;
        let text = std::fs::read_to_string(path)?;

        Self::from_yaml(key, &text).map_err(|e| match e {
            Error::Manifest { reason, .. } => Error::Manifest {
                path: path.display().to_string(),
                reason,
            },
            other => Error::Manifest {
                path: path.display().to_string(),
                reason: other.to_string(),
            },
        })
    }
}

impl AppSpec for TemplateAppSpec {
    fn key(&self) -> &str {
        &self.key
    }

    fn storage(&self, instance_id: &str) -> Vec<ResourceObject> {
        self.storage
            .iter()
            .map(|obj| instantiate(obj, instance_id))
            .collect()
    }

    fn core(&self, instance_id: &str) -> Vec<ResourceObject> {
        self.core
            .iter()
            .map(|obj| instantiate(obj, instance_id))
            .collect()
    }
}

/// Register every `*.yaml` / `*.yml` manifest in `dir`, sorted by path
pub fn load_dir(factory: &mut AppSpecFactory, dir: &Path) -> Result<usize> {
    let mut paths = Vec::new();
    for ext in ["yaml", "yml"] {
        let pattern = dir.join(format!("*.{}", ext));
        let pattern = pattern.to_str().ok_or_else(|| {
            Error::Configuration(format!("spec dir is not valid UTF-8: {}", dir.display()))
        })?;

        let entries = glob::glob(pattern)
            .map_err(|e| Error::Configuration(format!("invalid spec dir pattern: {}", e)))?;
        for entry in entries {
            paths.push(entry.map_err(|e| Error::Io(e.into_error()))?);
        }
    }
    paths.sort();

    for path in &paths {
        let spec = TemplateAppSpec::from_file(path)?;
        info!("Loaded app spec {} from {}", spec.key(), path.display());
        factory.register(Arc::new(spec))?;
    }

    Ok(paths.len())
}

// =============================================================================
// Instance Substitution
// =============================================================================

fn instantiate(obj: &ResourceObject, instance_id: &str) -> ResourceObject {
    let mut obj = obj.clone();
    match &mut obj {
        ResourceObject::StorageClass(sc) => {
            sub_meta(&mut sc.metadata, instance_id);
        }
        ResourceObject::PersistentVolumeClaim(pvc) => {
            sub_meta(&mut pvc.metadata, instance_id);
            if let Some(class) = pvc
                .metadata
                .annotations
                .as_mut()
                .and_then(|a| a.get_mut(BETA_STORAGE_CLASS_ANNOTATION))
            {
                sub(class, instance_id);
            }
            if let Some(spec) = pvc.spec.as_mut() {
                sub_opt(&mut spec.storage_class_name, instance_id);
            }
        }
        ResourceObject::Deployment(dep) => {
            sub_meta(&mut dep.metadata, instance_id);
            if let Some(spec) = dep.spec.as_mut() {
                sub_map(&mut spec.selector.match_labels, instance_id);
                if let Some(meta) = spec.template.metadata.as_mut() {
                    sub_map(&mut meta.labels, instance_id);
                }
                let volumes = spec
                    .template
                    .spec
                    .as_mut()
                    .and_then(|pod| pod.volumes.as_mut());
                for volume in volumes.into_iter().flatten() {
                    if let Some(claim) = volume.persistent_volume_claim.as_mut() {
                        sub(&mut claim.claim_name, instance_id);
                    }
                }
            }
        }
        ResourceObject::Other(other) => {
            sub_meta(&mut other.metadata, instance_id);
        }
    }
    obj
}

fn sub(value: &mut String, instance_id: &str) {
    if value.contains(INSTANCE_PLACEHOLDER) {
        *value = value.replace(INSTANCE_PLACEHOLDER, instance_id);
    }
}

fn sub_opt(value: &mut Option<String>, instance_id: &str) {
    if let Some(v) = value.as_mut() {
        sub(v, instance_id);
    }
}

fn sub_map(map: &mut Option<BTreeMap<String, String>>, instance_id: &str) {
    for v in map.iter_mut().flat_map(|m| m.values_mut()) {
        sub(v, instance_id);
    }
}

fn sub_meta(meta: &mut ObjectMeta, instance_id: &str) {
    sub_opt(&mut meta.name, instance_id);
    sub_map(&mut meta.labels, instance_id);
}
