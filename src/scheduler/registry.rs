//! Driver Registry
//!
//! Name to driver map the entry point fills at startup so a scenario can
//! pick its backend by name. Registering a name twice replaces the earlier
//! driver; the last registration wins.

use crate::domain::ports::SchedulerDriverRef;
use crate::error::{Error, Result};
use std::collections::BTreeMap;
use tracing::{debug, warn};

#[derive(Default)]
pub struct DriverRegistry {
    drivers: BTreeMap<String, SchedulerDriverRef>,
}

impl DriverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a driver, returning the one it replaced
    pub fn register(
        &mut self,
        name: impl Into<String>,
        driver: SchedulerDriverRef,
    ) -> Option<SchedulerDriverRef> {
        let name = name.into();
        let previous = self.drivers.insert(name.clone(), driver);
        if previous.is_some() {
            warn!("Scheduler driver {} registered twice, keeping the latest", name);
        } else {
            debug!("Registered scheduler driver: {}", name);
        }
        previous
    }

    pub fn get(&self, name: &str) -> Result<SchedulerDriverRef> {
        self.drivers
            .get(name)
            .cloned()
            .ok_or_else(|| Error::UnknownDriver {
                name: name.to_string(),
            })
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.drivers.keys().map(String::as_str)
    }
}

impl std::fmt::Debug for DriverRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriverRegistry")
            .field("drivers", &self.drivers.keys().collect::<Vec<_>>())
            .finish()
    }
}
