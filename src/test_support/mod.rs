//! Internal helpers re-exported for unit and integration tests.
//!
//! The executors here stand in for the privilege-separated fork so controller
//! logic can be exercised without root, and the fixtures lay out a throwaway
//! data and run directory owned by the current user.

mod executors;
mod fixtures;
mod logging;

pub use executors::{CrashingExecutor, InProcessExecutor};
pub use fixtures::{current_user_name, instance_config_in};
pub use logging::capture_info_logs;
