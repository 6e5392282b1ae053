//! Test harness utilities for the daemon behavioural suites.

mod config_loader;
mod process_world;

pub use config_loader::{FailingConfigLoader, TestConfigLoader};
pub use process_world::{ProcessTestWorld, StepResult};
