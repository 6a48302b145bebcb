pub mod arch;
pub mod checkpoint;
pub mod data;
pub mod dataset;
pub mod error;
pub mod initialization;
pub mod optimization;

pub use error::{MlErr, Result};
