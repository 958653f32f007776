//! Scheduled app instance handle

use crate::spec::{AppSpecRef, ResourceObject};

/// One scheduled application instance.
///
/// A context holds no cluster state of its own: status is observed on
/// demand through the driver, and dropping a context does not release any
/// cluster resources.
#[derive(Clone)]
pub struct Context {
    /// Instance ID the app was scheduled with
    pub uid: String,
    /// Spec the instance was expanded from
    pub app: AppSpecRef,
}

impl Context {
    pub fn new(uid: impl Into<String>, app: AppSpecRef) -> Self {
        Self {
            uid: uid.into(),
            app,
        }
    }

    pub fn app_key(&self) -> &str {
        self.app.key()
    }

    /// Storage resources of this instance
    pub fn storage(&self) -> Vec<ResourceObject> {
        self.app.storage(&self.uid)
    }

    /// Core resources of this instance
    pub fn core(&self) -> Vec<ResourceObject> {
        self.app.core(&self.uid)
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("uid", &self.uid)
            .field("app", &self.app.key())
            .finish()
    }
}

impl std::fmt::Display for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.app.key(), self.uid)
    }
}
