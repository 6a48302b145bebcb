use std::{collections::HashMap, num::NonZeroUsize, sync::Arc};

use collective::{Collective, ReduceOp};
use log::{info, warn};
use machine_learning::{
    arch::{Sequential, loss::NllLoss},
    checkpoint,
    data::{DataLoader, DeviceLoader, DistributedSampler},
    dataset::{ImageDataset, mnist},
    initialization::init_params,
    optimization::{GradientDescent, GradientDescentWithMomentum, Optimizer},
};
use tokio::task;

use crate::{
    DistributedDataParallel, Result, WorkerErr,
    config::{DatasetSource, TrainConfig},
    metrics::{EpochClock, Phase, ScalarWriter},
};

/// The ranks meet here once the dataset is available on every host.
pub const DATASET_RENDEZVOUS: &str = "dataset_download";
/// The ranks meet here once the checkpoint is on disk.
pub const CHECKPOINT_RENDEZVOUS: &str = "checkpoint_save";

/// The losses of one training iteration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepRecord {
    pub step: usize,
    /// This rank's loss over its batch.
    pub local_loss: f32,
    /// The mean of every rank's local loss.
    pub global_loss: f32,
}

/// What a finished run reports back.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainReport {
    pub steps: usize,
    pub epochs: usize,
    /// The global loss of the last iteration.
    pub final_loss: Option<f32>,
    /// Iterations per second of the last epoch.
    pub throughput: Option<f64>,
    pub history: Vec<StepRecord>,
}

/// Makes the dataset available to this rank.
///
/// The first rank of every host fetches the data while the rest of the group waits at the
/// `dataset_download` rendezvous, then every rank loads it from disk.
pub async fn acquire_dataset<C: Collective>(
    source: &DatasetSource,
    seed: u64,
    group: &mut C,
) -> Result<ImageDataset> {
    match source {
        DatasetSource::Mnist { root } => {
            if group.local_rank() == 0 && !mnist::is_present(root, true) {
                info!("downloading dataset into {}", root.display());
                mnist::download(root, true).await?;
            }
            group.rendezvous(DATASET_RENDEZVOUS).await?;

            let root = root.clone();
            let dataset = task::spawn_blocking(move || mnist::load(&root, true))
                .await
                .map_err(|e| WorkerErr::Compute(e.to_string()))??;

            Ok(dataset)
        }
        DatasetSource::Synthetic { len } => {
            group.rendezvous(DATASET_RENDEZVOUS).await?;
            let dataset =
                ImageDataset::synthetic(*len, mnist::IMAGE_SIZE, mnist::NUM_CLASSES, seed)?;
            Ok(dataset)
        }
    }
}

/// Runs the whole training on this rank.
///
/// Every rank of `group` must call this with the same configuration. Rank 0 records the loss
/// of every iteration and writes the checkpoint at the end.
///
/// # Returns
/// The report of the run along with the group, for the caller to shut it down.
pub async fn run<C: Collective>(config: &TrainConfig, mut group: C) -> Result<(TrainReport, C)> {
    config.validate()?;

    let rank = group.rank();
    let world_size = group.world_size();
    let is_master = rank == 0;

    let dataset = Arc::new(acquire_dataset(&config.dataset, config.seed, &mut group).await?);
    info!(rank = rank, samples = dataset.len(); "dataset ready");

    let model = Sequential::mlp(dataset.image_size(), &config.hidden, dataset.num_classes());
    let params = init_params(&model, config.seed)?;
    let mut ddp =
        DistributedDataParallel::new(model, params, group, non_zero(config.bucket_size)?).await?;

    let sampler = DistributedSampler::new(dataset.len(), non_zero(world_size)?, rank)?
        .with_shuffle(config.shuffle)
        .with_seed(config.seed)
        .with_drop_last(config.drop_last);
    let mut loader = DataLoader::new(dataset, sampler, non_zero(config.batch_size)?)?;

    let lr = config.learning_rate(world_size);
    let mut optimizer: Box<dyn Optimizer> = match config.momentum {
        Some(mu) => Box::new(GradientDescentWithMomentum::new(ddp.params().len(), lr, mu)),
        None => Box::new(GradientDescent::new(lr)),
    };

    let mut writer = if is_master {
        Some(ScalarWriter::create(&config.log_dir, config)?)
    } else {
        None
    };

    info!(
        rank = rank,
        world_size = world_size,
        lr = lr,
        batches = loader.num_batches();
        "training started"
    );

    let mut step = 0;
    let mut history = Vec::with_capacity(config.epochs * loader.num_batches());
    let mut throughput = None;

    for epoch in 0..config.epochs {
        loader.set_epoch(epoch as u64);

        let mut clock = EpochClock::new();
        let mut device = DeviceLoader::spawn(loader.clone(), non_zero(config.prefetch_depth)?);
        let mut idx = 0;

        while let Some(batch) = device.next().await {
            ddp.zero_grad();
            let local_loss = ddp.forward_backward(batch, NllLoss).await?;
            ddp.step(optimizer.as_mut())?;

            let mut loss = [local_loss];
            ddp.group_mut().all_reduce(&mut loss, ReduceOp::Average).await?;
            let [global_loss] = loss;

            clock.tick(Phase::of(idx, config.warmup_steps));

            if let Some(writer) = writer.as_mut() {
                writer.add_scalar("loss", step, global_loss as f64)?;
                info!(epoch = epoch, step = step; "{rank}:{global_loss}");
            }

            history.push(StepRecord {
                step,
                local_loss,
                global_loss,
            });

            idx += 1;
            step += 1;
        }

        device.finish().await?;
        throughput = clock.throughput();
    }

    let final_loss = history.last().map(|record| record.global_loss);

    if let Some(writer) = writer.as_mut() {
        writer.flush()?;

        match throughput {
            Some(throughput) => info!("Train throughput (iter/sec): {throughput}"),
            None => warn!("the last epoch had no iterations past the warmup, no throughput"),
        }
        if let Some(loss) = final_loss {
            info!("Final loss is {loss:0.4}");
        }

        let metadata = HashMap::from([
            ("step".to_string(), step.to_string()),
            ("epochs".to_string(), config.epochs.to_string()),
            ("world_size".to_string(), world_size.to_string()),
        ]);
        checkpoint::save(&config.checkpoint_path, &ddp.state_dict()?, metadata)?;
        info!("checkpoint saved to {}", config.checkpoint_path.display());
    }

    ddp.group_mut().rendezvous(CHECKPOINT_RENDEZVOUS).await?;

    let report = TrainReport {
        steps: step,
        epochs: config.epochs,
        final_loss,
        throughput,
        history,
    };

    let (_, _, group) = ddp.into_parts()?;
    Ok((report, group))
}

fn non_zero(value: usize) -> Result<NonZeroUsize> {
    NonZeroUsize::new(value).ok_or_else(|| WorkerErr::Config("expected a non-zero value".into()))
}
