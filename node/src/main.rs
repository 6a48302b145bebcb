use std::io;

use log::info;
use node::LaunchConfig;

#[tokio::main]
async fn main() -> io::Result<()> {
    env_logger::init();

    let cfg = LaunchConfig::from_env()?;
    info!(
        nproc_per_node = cfg.nproc_per_node,
        node_rank = cfg.node_rank,
        world_size = cfg.world_size();
        "launching {}",
        cfg.worker_bin.display()
    );

    node::launch(&cfg).await?;
    Ok(())
}
