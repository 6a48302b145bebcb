mod dataloader;
mod device_loader;
mod sampler;

pub use dataloader::{Batch, BatchIter, DataLoader};
pub use device_loader::DeviceLoader;
pub use sampler::DistributedSampler;
