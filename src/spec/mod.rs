//! App Specs
//!
//! Named application templates and the registry that resolves them into
//! ordered storage and core resource lists for one instance.

pub mod apps;
pub mod factory;
pub mod resource;
pub mod template;

pub use apps::register_builtin;
pub use factory::{AppSpec, AppSpecFactory, AppSpecRef};
pub use resource::{ResourceKind, ResourceObject};
pub use template::{load_dir, TemplateAppSpec, INSTANCE_PLACEHOLDER};
