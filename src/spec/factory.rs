//! App Spec Factory
//!
//! Registry of application templates keyed by app name. It is filled once by
//! the process entry point and only read while scenarios run.

use crate::error::{Error, Result};
use crate::spec::resource::ResourceObject;
use indexmap::IndexMap;
use std::sync::Arc;
use tracing::debug;

/// An application template.
///
/// `storage` and `core` must be pure functions of the instance ID: repeated
/// calls return the same objects, so teardown targets exactly what schedule
/// created. Storage objects are materialised before core objects.
pub trait AppSpec: Send + Sync {
    /// Unique app key
    fn key(&self) -> &str;

    /// Storage classes and volume claims, in creation order
    fn storage(&self, instance_id: &str) -> Vec<ResourceObject>;

    /// Workloads, in creation order
    fn core(&self, instance_id: &str) -> Vec<ResourceObject>;
}

pub type AppSpecRef = Arc<dyn AppSpec>;

/// Registry of app specs in registration order
#[derive(Default)]
pub struct AppSpecFactory {
    specs: IndexMap<String, AppSpecRef>,
}

impl AppSpecFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a spec; a key may only be registered once
    pub fn register(&mut self, spec: AppSpecRef) -> Result<()> {
        let key = spec.key().to_string();
        if self.specs.contains_key(&key) {
            return Err(Error::AppAlreadyRegistered { key });
        }

        debug!("Registered app spec: {}", key);
        self.specs.insert(key, spec);
        Ok(())
    }

    pub fn get(&self, key: &str) -> Result<AppSpecRef> {
        self.specs
            .get(key)
            .cloned()
            .ok_or_else(|| Error::UnknownAppKind {
                key: key.to_string(),
            })
    }

    /// All specs in registration order
    pub fn get_all(&self) -> Vec<AppSpecRef> {
        self.specs.values().cloned().collect()
    }

    /// Specs named by `keys`, or every spec when `keys` is empty
    pub fn resolve(&self, keys: &[String]) -> Result<Vec<AppSpecRef>> {
        if keys.is_empty() {
            return Ok(self.get_all());
        }
        keys.iter().map(|key| self.get(key)).collect()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.specs.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }
}

impl std::fmt::Debug for AppSpecFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppSpecFactory")
            .field("specs", &self.specs.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    struct Empty(&'static str);

    impl AppSpec for Empty {
        fn key(&self) -> &str {
            self.0
        }
        fn storage(&self, _instance_id: &str) -> Vec<ResourceObject> {
            vec![]
        }
        fn core(&self, _instance_id: &str) -> Vec<ResourceObject> {
            vec![]
        }
    }

    fn factory() -> AppSpecFactory {
        let mut factory = AppSpecFactory::new();
        factory.register(Arc::new(Empty("postgres"))).unwrap();
        factory.register(Arc::new(Empty("nginx"))).unwrap();
        factory.register(Arc::new(Empty("echo"))).unwrap();
        factory
    }

    #[test]
    fn test_get_returns_same_instance() {
        let factory = factory();
        let a = factory.get("nginx").unwrap();
        let b = factory.get("nginx").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_get_all_in_registration_order() {
        let keys: Vec<_> = factory()
            .get_all()
            .iter()
            .map(|s| s.key().to_string())
            .collect();
        assert_eq!(keys, vec!["postgres", "nginx", "echo"]);
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let mut factory = factory();
        let err = factory.register(Arc::new(Empty("nginx"))).unwrap_err();
        assert_matches!(err, Error::AppAlreadyRegistered { key } if key == "nginx");
        assert_eq!(factory.len(), 3);
    }

    #[test]
    fn test_resolve() {
        let factory = factory();
        assert_eq!(factory.resolve(&[]).unwrap().len(), 3);

        let specs = factory.resolve(&["echo".to_string()]).unwrap();
        assert_eq!(specs.len(), 1);
        assert_eq!(specs[0].key(), "echo");

        let err = factory
            .resolve(&["echo".to_string(), "mysql".to_string()])
            .err()
            .unwrap();
        assert_matches!(err, Error::UnknownAppKind { key } if key == "mysql");
    }
}
