use std::io;

use collective::{GroupConfig, ProcessGroup};
use log::info;

use worker::{TrainConfig, WorkerErr, trainer};

#[tokio::main]
async fn main() -> io::Result<()> {
    env_logger::init();

    let group_cfg = GroupConfig::from_env().map_err(WorkerErr::from)?;
    let config = TrainConfig::from_env()?;

    info!(
        rank = group_cfg.rank,
        local_rank = group_cfg.local_rank,
        world_size = group_cfg.world_size;
        "joining process group at {}",
        group_cfg.master_endpoint()
    );

    let group = ProcessGroup::init(group_cfg)
        .await
        .map_err(WorkerErr::from)?;

    let (report, group) = trainer::run(&config, group).await?;
    info!(steps = report.steps, epochs = report.epochs; "training finished");

    group.shutdown().await.map_err(WorkerErr::from)?;
    Ok(())
}
