//! Built-in applications
//!
//! - postgres: storage class, volume claim and a single-replica database
//! - nginx: stateless two-replica web server

use crate::error::Result;
use crate::spec::factory::AppSpecFactory;
use crate::spec::template::TemplateAppSpec;
use std::sync::Arc;

const BUILTIN: &[(&str, &str)] = &[
    ("postgres", include_str!("postgres.yaml")),
    ("nginx", include_str!("nginx.yaml")),
];

/// Register every built-in app, in a fixed order
pub fn register_builtin(factory: &mut AppSpecFactory) -> Result<()> {
    for (key, manifest) in BUILTIN {
        factory.register(Arc::new(TemplateAppSpec::from_yaml(*key, manifest)?))?;
    }
    Ok(())
}
