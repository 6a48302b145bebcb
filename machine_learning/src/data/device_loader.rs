use std::num::NonZeroUsize;

use tokio::{sync::mpsc, task::JoinHandle};

use super::{Batch, DataLoader};
use crate::{MlErr, Result};

/// Assembles one epoch of batches on the blocking pool ahead of the consumer.
///
/// At most `depth` batches are buffered, the producer waits for the consumer otherwise.
pub struct DeviceLoader {
    rx: mpsc::Receiver<Batch>,
    producer: JoinHandle<()>,
}

impl DeviceLoader {
    /// Starts producing the batches of the loader's current epoch.
    pub fn spawn(loader: DataLoader, depth: NonZeroUsize) -> Self {
        let (tx, rx) = mpsc::channel(depth.get());

        let producer = tokio::task::spawn_blocking(move || {
            for batch in loader.iter() {
                if tx.blocking_send(batch).is_err() {
                    break;
                }
            }
        });

        Self { rx, producer }
    }

    /// Waits for the next batch, `None` once the epoch is exhausted.
    pub async fn next(&mut self) -> Option<Batch> {
        self.rx.recv().await
    }

    /// Stops the producer and waits for it.
    ///
    /// # Returns
    /// An error if the producer panicked.
    pub async fn finish(self) -> Result<()> {
        let Self { rx, producer } = self;
        drop(rx);
        producer
            .await
            .map_err(|e| MlErr::Loader(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{data::DistributedSampler, dataset::ImageDataset};

    #[tokio::test]
    async fn streams_the_whole_epoch() {
        let dataset = Arc::new(ImageDataset::synthetic(50, 4, 2, 1).unwrap());
        let sampler = DistributedSampler::new(50, NonZeroUsize::MIN, 0).unwrap();
        let loader = DataLoader::new(dataset, sampler, NonZeroUsize::new(8).unwrap()).unwrap();
        let expected: Vec<_> = loader.iter().map(|b| b.x).collect();

        let mut device = DeviceLoader::spawn(loader, NonZeroUsize::new(2).unwrap());
        let mut got = Vec::new();
        while let Some(batch) = device.next().await {
            got.push(batch.x);
        }
        device.finish().await.unwrap();

        assert_eq!(got, expected);
    }

    #[tokio::test]
    async fn finishing_early_stops_the_producer() {
        let dataset = Arc::new(ImageDataset::synthetic(64, 4, 2, 1).unwrap());
        let sampler = DistributedSampler::new(64, NonZeroUsize::MIN, 0).unwrap();
        let loader = DataLoader::new(dataset, sampler, NonZeroUsize::MIN).unwrap();

        let mut device = DeviceLoader::spawn(loader, NonZeroUsize::MIN);
        assert!(device.next().await.is_some());

        device.finish().await.unwrap();
    }
}
