use std::{mem, num::NonZeroUsize};

use collective::{Collective, ReduceOp};
use log::debug;
use machine_learning::{
    MlErr,
    arch::{Model, StateDict, loss::LossFn, state_dict},
    data::Batch,
    optimization::Optimizer,
};
use tokio::task;

use crate::{Result, WorkerErr};

/// Keeps a model replica in sync with every other rank of a group.
///
/// The parameters of rank 0 are copied to every rank on construction and every gradient is
/// averaged across the group before it's applied, so as long as all ranks step with the same
/// optimizer their parameters stay identical.
///
/// Compute is CPU-bound and runs on Tokio's blocking pool, the model and its buffers are moved
/// in and out of the task instead of being cloned.
pub struct DistributedDataParallel<M, C> {
    model: Option<M>,
    params: Vec<f32>,
    grad: Vec<f32>,
    group: C,
    bucket_size: usize,
}

impl<M, C> DistributedDataParallel<M, C>
where
    M: Model + 'static,
    C: Collective,
{
    /// Wraps `model`, broadcasting rank 0's `params` to the rest of the group.
    ///
    /// # Arguments
    /// * `model` - The local replica.
    /// * `params` - This rank's initial parameters.
    /// * `group` - The group the replicas belong to.
    /// * `bucket_size` - The amount of gradient values reduced per collective call.
    ///
    /// # Returns
    /// An error if `params` doesn't fit the model or the broadcast fails.
    pub async fn new(
        model: M,
        mut params: Vec<f32>,
        mut group: C,
        bucket_size: NonZeroUsize,
    ) -> Result<Self> {
        if params.len() != model.size() {
            return Err(MlErr::SizeMismatch {
                what: "initial parameters",
                got: params.len(),
                expected: model.size(),
            }
            .into());
        }

        group.broadcast(&mut params, 0).await?;
        debug!(rank = group.rank(), size = params.len(); "parameters synchronized");

        Ok(Self {
            grad: vec![0.; params.len()],
            model: Some(model),
            params,
            group,
            bucket_size: bucket_size.get(),
        })
    }

    pub fn zero_grad(&mut self) {
        self.grad.fill(0.);
    }

    /// Computes the gradient of `loss_fn` over `batch` and averages it across the group.
    ///
    /// # Returns
    /// This rank's loss over the batch.
    pub async fn forward_backward<L>(&mut self, batch: Batch, loss_fn: L) -> Result<f32>
    where
        L: LossFn + 'static,
    {
        let mut model = self.model.take().ok_or(WorkerErr::ModelUnavailable)?;
        let params = mem::take(&mut self.params);
        let mut grad = mem::take(&mut self.grad);

        let (model, params, grad, loss) = task::spawn_blocking(move || {
            let loss = model.compute_gradient(
                &params,
                &mut grad,
                &loss_fn,
                batch.x.view(),
                batch.y.view(),
            );
            (model, params, grad, loss)
        })
        .await
        .map_err(|e| WorkerErr::Compute(e.to_string()))?;

        self.model = Some(model);
        self.params = params;
        self.grad = grad;
        let loss = loss?;

        for bucket in self.grad.chunks_mut(self.bucket_size) {
            self.group.all_reduce(bucket, ReduceOp::Average).await?;
        }

        Ok(loss)
    }

    /// Applies the synchronized gradient to the parameters.
    pub fn step<O: Optimizer + ?Sized>(&mut self, optimizer: &mut O) -> Result<()> {
        optimizer.update_params(&self.grad, &mut self.params)?;
        Ok(())
    }

    pub fn params(&self) -> &[f32] {
        &self.params
    }

    pub fn params_mut(&mut self) -> &mut [f32] {
        &mut self.params
    }

    pub fn grad(&self) -> &[f32] {
        &self.grad
    }

    pub fn group(&self) -> &C {
        &self.group
    }

    pub fn group_mut(&mut self) -> &mut C {
        &mut self.group
    }

    /// Exports the parameters under the model's names.
    pub fn state_dict(&self) -> Result<StateDict> {
        let model = self.model.as_ref().ok_or(WorkerErr::ModelUnavailable)?;
        Ok(state_dict(model, &self.params)?)
    }

    /// Unwraps the model, its parameters and the group.
    pub fn into_parts(self) -> Result<(M, Vec<f32>, C)> {
        let model = self.model.ok_or(WorkerErr::ModelUnavailable)?;
        Ok((model, self.params, self.group))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use collective::ProcessGroup;
    use machine_learning::{
        arch::{Sequential, loss::NllLoss},
        data::{DataLoader, DistributedSampler},
        dataset::ImageDataset,
        initialization::init_params,
        optimization::GradientDescent,
    };
    use tokio::task::JoinSet;

    use super::*;

    const WORLD_SIZE: usize = 3;
    const LEN: usize = 30;

    #[tokio::test]
    async fn replicas_stay_identical() {
        let groups = ProcessGroup::local_world(WORLD_SIZE).await.unwrap();
        let dataset = Arc::new(ImageDataset::synthetic(LEN, 8, 3, 5).unwrap());
        let mut set = JoinSet::new();

        for group in groups {
            let dataset = dataset.clone();
            set.spawn(async move {
                let rank = group.rank();
                let model = Sequential::mlp(8, &[6], 3);
                // diverging seeds, the broadcast must fix them
                let params = init_params(&model, rank as u64).unwrap();
                let mut ddp = DistributedDataParallel::new(
                    model,
                    params,
                    group,
                    NonZeroUsize::new(7).unwrap(),
                )
                .await
                .unwrap();

                let sampler = DistributedSampler::new(
                    LEN,
                    NonZeroUsize::new(WORLD_SIZE).unwrap(),
                    rank,
                )
                .unwrap();
                let loader =
                    DataLoader::new(dataset, sampler, NonZeroUsize::new(4).unwrap()).unwrap();
                let mut optimizer = GradientDescent::new(0.1);

                for batch in loader.iter() {
                    ddp.zero_grad();
                    ddp.forward_backward(batch, NllLoss).await.unwrap();
                    ddp.step(&mut optimizer).unwrap();
                }

                (rank, ddp.params().to_vec())
            });
        }

        let mut results = set.join_all().await;
        results.sort_by_key(|(rank, _)| *rank);

        let expected = init_params(&Sequential::mlp(8, &[6], 3), 0).unwrap();
        assert_ne!(results[0].1, expected);
        for (_, params) in &results[1..] {
            assert_eq!(params, &results[0].1);
        }
    }

    #[tokio::test]
    async fn gradient_is_the_mean_over_ranks() {
        let groups = ProcessGroup::local_world(2).await.unwrap();
        let dataset = Arc::new(ImageDataset::synthetic(2, 4, 2, 9).unwrap());
        let mut set = JoinSet::new();

        for group in groups {
            let dataset = dataset.clone();
            set.spawn(async move {
                let rank = group.rank();
                let model = Sequential::mlp(4, &[], 2);
                let params = init_params(&model, 0).unwrap();
                let mut ddp =
                    DistributedDataParallel::new(model, params, group, NonZeroUsize::MIN)
                        .await
                        .unwrap();

                let sampler = DistributedSampler::new(2, NonZeroUsize::new(2).unwrap(), rank)
                    .unwrap()
                    .with_shuffle(false);
                let loader = DataLoader::new(dataset, sampler, NonZeroUsize::MIN).unwrap();
                let batch = loader.iter().next().unwrap();
                ddp.forward_backward(batch, NllLoss).await.unwrap();

                (rank, ddp.grad().to_vec())
            });
        }

        let results = set.join_all().await;

        // the mean over two single sample batches is the gradient of the two sample batch
        let mut model = Sequential::mlp(4, &[], 2);
        let params = init_params(&model, 0).unwrap();
        let loader = DataLoader::new(
            dataset,
            DistributedSampler::new(2, NonZeroUsize::MIN, 0)
                .unwrap()
                .with_shuffle(false),
            NonZeroUsize::new(2).unwrap(),
        )
        .unwrap();
        let batch = loader.iter().next().unwrap();
        let mut expected = vec![0.; model.size()];
        model
            .compute_gradient(&params, &mut expected, &NllLoss, batch.x.view(), batch.y.view())
            .unwrap();

        for (_, grad) in results {
            for (got, want) in grad.iter().zip(&expected) {
                assert!((got - want).abs() < 1e-6);
            }
        }
    }
}
