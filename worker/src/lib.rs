pub mod config;
mod ddp;
mod error;
pub mod metrics;
pub mod trainer;

pub use config::{DatasetSource, TrainConfig};
pub use ddp::DistributedDataParallel;
pub use error::{Result, WorkerErr};
pub use trainer::{StepRecord, TrainReport};
