mod config;
mod error;
mod launcher;

pub use config::LaunchConfig;
pub use error::{LaunchErr, Result};
pub use launcher::launch;
