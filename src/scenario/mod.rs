//! Test Scenarios
//!
//! Scenarios drive a [`SchedulerDriver`](crate::domain::ports::SchedulerDriver)
//! through a fault-injection run and record every step in a
//! [`ScenarioReport`].

pub mod report;
pub mod stop_scheduler;

pub use report::{ScenarioReport, StepRecord};
pub use stop_scheduler::{StopSchedulerConfig, StopSchedulerScenario};
