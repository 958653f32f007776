//! Resource Dispatcher
//!
//! Routes a resource object to the cluster call for its kind. Each
//! operation is one exhaustive match over [`ResourceObject`]; adding a kind
//! means adding one arm per operation. Kinds without a handler fail with
//! `UnsupportedResourceKind`, never a silent no-op.

use crate::domain::ports::{ClusterApiRef, WaitOptions};
use crate::error::{Error, Result};
use crate::spec::ResourceObject;
use std::collections::BTreeMap;
use tracing::info;

fn unsupported(app: &str, obj: &ResourceObject) -> Error {
    Error::UnsupportedResourceKind {
        app: app.to_string(),
        object: obj.describe(),
    }
}

/// Kind-keyed dispatch onto a cluster client
#[derive(Clone)]
pub struct ResourceDispatcher {
    client: ClusterApiRef,
}

impl ResourceDispatcher {
    pub fn new(client: ClusterApiRef) -> Self {
        Self { client }
    }

    /// Create the resource
    pub async fn materialize(&self, app: &str, obj: &ResourceObject) -> Result<()> {
        match obj {
            ResourceObject::StorageClass(sc) => self.client.create_storage_class(sc).await?,
            ResourceObject::PersistentVolumeClaim(pvc) => self.client.create_claim(pvc).await?,
            ResourceObject::Deployment(dep) => self.client.create_deployment(dep).await?,
            ResourceObject::Other(_) => return Err(unsupported(app, obj)),
        }
        info!("Created {}", obj);
        Ok(())
    }

    /// Wait until the resource is ready or bound
    pub async fn validate(&self, app: &str, obj: &ResourceObject, wait: &WaitOptions) -> Result<()> {
        match obj {
            ResourceObject::StorageClass(sc) => self.client.validate_storage_class(sc, wait).await?,
            ResourceObject::PersistentVolumeClaim(pvc) => {
                self.client.validate_claim(pvc, wait).await?
            }
            ResourceObject::Deployment(dep) => self.client.validate_deployment(dep, wait).await?,
            ResourceObject::Other(_) => return Err(unsupported(app, obj)),
        }
        info!("Validated {}", obj);
        Ok(())
    }

    /// Delete the resource
    pub async fn teardown(&self, app: &str, obj: &ResourceObject) -> Result<()> {
        match obj {
            ResourceObject::StorageClass(sc) => self.client.delete_storage_class(sc).await?,
            ResourceObject::PersistentVolumeClaim(pvc) => self.client.delete_claim(pvc).await?,
            ResourceObject::Deployment(dep) => self.client.delete_deployment(dep).await?,
            ResourceObject::Other(_) => return Err(unsupported(app, obj)),
        }
        info!("Destroyed {}", obj);
        Ok(())
    }

    /// Wait until the resource is gone
    pub async fn validate_teardown(
        &self,
        app: &str,
        obj: &ResourceObject,
        wait: &WaitOptions,
    ) -> Result<()> {
        match obj {
            ResourceObject::StorageClass(sc) => {
                self.client.validate_deleted_storage_class(sc, wait).await?
            }
            ResourceObject::PersistentVolumeClaim(pvc) => {
                self.client.validate_deleted_claim(pvc, wait).await?
            }
            ResourceObject::Deployment(dep) => {
                self.client.validate_deleted_deployment(dep, wait).await?
            }
            ResourceObject::Other(_) => return Err(unsupported(app, obj)),
        }
        info!("Validated destroy of {}", obj);
        Ok(())
    }

    /// Validate a storage resource; only storage classes and claims qualify
    pub async fn validate_storage(
        &self,
        app: &str,
        obj: &ResourceObject,
        wait: &WaitOptions,
    ) -> Result<()> {
        match obj {
            ResourceObject::StorageClass(_) | ResourceObject::PersistentVolumeClaim(_) => {
                self.validate(app, obj, wait).await
            }
            ResourceObject::Deployment(_) | ResourceObject::Other(_) => {
                Err(unsupported(app, obj))
            }
        }
    }

    /// Delete a storage resource; only storage classes and claims qualify
    pub async fn teardown_storage(&self, app: &str, obj: &ResourceObject) -> Result<()> {
        match obj {
            ResourceObject::StorageClass(_) | ResourceObject::PersistentVolumeClaim(_) => {
                self.teardown(app, obj).await
            }
            ResourceObject::Deployment(_) | ResourceObject::Other(_) => {
                Err(unsupported(app, obj))
            }
        }
    }

    /// Backend volume behind a claim; `None` for kinds that carry no volume
    pub async fn volume(&self, app: &str, obj: &ResourceObject) -> Result<Option<String>> {
        match obj {
            ResourceObject::PersistentVolumeClaim(pvc) => {
                Ok(Some(self.client.get_volume_for_claim(pvc).await?))
            }
            ResourceObject::StorageClass(_) | ResourceObject::Deployment(_) => Ok(None),
            ResourceObject::Other(_) => Err(unsupported(app, obj)),
        }
    }

    /// Backend volume and its provisioner parameters
    pub async fn volume_parameters(
        &self,
        app: &str,
        obj: &ResourceObject,
    ) -> Result<Option<(String, BTreeMap<String, String>)>> {
        match obj {
            ResourceObject::PersistentVolumeClaim(pvc) => {
                let volume = self.client.get_volume_for_claim(pvc).await?;
                let params = self.client.get_claim_parameters(pvc).await?;
                Ok(Some((volume, params)))
            }
            ResourceObject::StorageClass(_) | ResourceObject::Deployment(_) => Ok(None),
            ResourceObject::Other(_) => Err(unsupported(app, obj)),
        }
    }

    /// Names of the nodes running the resource's pods
    pub async fn hosting_nodes(&self, app: &str, obj: &ResourceObject) -> Result<Vec<String>> {
        match obj {
            ResourceObject::Deployment(dep) => self.client.nodes_for_deployment(dep).await,
            ResourceObject::StorageClass(_) | ResourceObject::PersistentVolumeClaim(_) => {
                Ok(Vec::new())
            }
            ResourceObject::Other(_) => Err(unsupported(app, obj)),
        }
    }
}
