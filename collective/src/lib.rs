mod collective;
mod config;
mod error;
mod group;
mod link;

pub use collective::{Collective, CollectiveTemplate};
pub use comms::msg::ReduceOp;
pub use config::GroupConfig;
pub use error::{GroupErr, Result};
pub use group::ProcessGroup;
