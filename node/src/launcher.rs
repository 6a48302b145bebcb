use std::process::Stdio;

use log::{error, info};
use tokio::{process::Command, task::JoinSet};

use crate::{LaunchConfig, LaunchErr, Result};

/// Starts one worker per local device and waits for all of them.
///
/// Every worker gets its `RANK`, `LOCAL_RANK`, `WORLD_SIZE`, `MASTER_ADDR` and `MASTER_PORT`.
/// As soon as one exits unsuccessfully the rest are killed, since the group can't make
/// progress without it.
///
/// # Returns
/// An error naming the first worker that failed.
pub async fn launch(cfg: &LaunchConfig) -> Result<()> {
    cfg.validate()?;

    let world_size = cfg.world_size();
    let mut workers = JoinSet::new();

    for local_rank in 0..cfg.nproc_per_node {
        let rank = cfg.rank_of(local_rank);

        let mut child = Command::new(&cfg.worker_bin)
            .args(&cfg.worker_args)
            .env("RANK", rank.to_string())
            .env("LOCAL_RANK", local_rank.to_string())
            .env("WORLD_SIZE", world_size.to_string())
            .env("MASTER_ADDR", &cfg.master_addr)
            .env("MASTER_PORT", cfg.master_port.to_string())
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| LaunchErr::Spawn { local_rank, source })?;

        let pid = child.id().unwrap_or_default();
        info!(rank = rank, local_rank = local_rank, pid = pid; "worker started");
        workers.spawn(async move { (local_rank, child.wait().await) });
    }

    while let Some(joined) = workers.join_next().await {
        let (local_rank, status) = joined.map_err(|e| LaunchErr::Io(e.into()))?;
        let status = status?;

        if status.success() {
            info!(local_rank = local_rank; "worker finished");
            continue;
        }

        error!(local_rank = local_rank; "worker failed with {status}, stopping the rest");
        workers.shutdown().await;
        return Err(LaunchErr::WorkerFailed { local_rank, status });
    }

    Ok(())
}
