pub mod app;
pub mod config;
pub mod core;
pub mod domain;
pub mod utils;

#[cfg(feature = "cli")]
pub use config::CliArgs;

pub use app::{run, RunOptions};
pub use config::Settings;
pub use crate::core::engine::Correlator;
pub use utils::error::{MonitError, Result};
