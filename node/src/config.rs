use std::{env, path::PathBuf, str::FromStr};

use crate::{LaunchErr, Result};

const DEFAULT_MASTER_ADDR: &str = "127.0.0.1";
const DEFAULT_MASTER_PORT: u16 = 29500;

/// How many workers to start on this node and where they find the master rank.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchConfig {
    pub nproc_per_node: usize,
    pub nnodes: usize,
    pub node_rank: usize,
    pub master_addr: String,
    pub master_port: u16,
    pub worker_bin: PathBuf,
    pub worker_args: Vec<String>,
}

impl LaunchConfig {
    /// Reads `NPROC_PER_NODE`, `NNODES`, `NODE_RANK`, `MASTER_ADDR`, `MASTER_PORT` and
    /// `WORKER_BIN` from the environment. The worker binary defaults to `worker` next to the
    /// current executable.
    pub fn from_env() -> Result<Self> {
        let exe = env::current_exe()?;
        let default_bin = exe.with_file_name(format!("worker{}", env::consts::EXE_SUFFIX));
        Self::from_lookup(|key| env::var(key).ok(), default_bin)
    }

    pub fn from_lookup<F>(lookup: F, default_bin: PathBuf) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let cfg = Self {
            nproc_per_node: parse(&lookup, "NPROC_PER_NODE")?.unwrap_or(1),
            nnodes: parse(&lookup, "NNODES")?.unwrap_or(1),
            node_rank: parse(&lookup, "NODE_RANK")?.unwrap_or(0),
            master_addr: lookup("MASTER_ADDR").unwrap_or_else(|| DEFAULT_MASTER_ADDR.into()),
            master_port: parse(&lookup, "MASTER_PORT")?.unwrap_or(DEFAULT_MASTER_PORT),
            worker_bin: lookup("WORKER_BIN").map(PathBuf::from).unwrap_or(default_bin),
            worker_args: Vec::new(),
        };

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.nproc_per_node == 0 || self.nnodes == 0 {
            return Err(LaunchErr::Config(
                "NPROC_PER_NODE and NNODES must be positive".into(),
            ));
        }

        if self.node_rank >= self.nnodes {
            return Err(LaunchErr::Config(format!(
                "node rank {} is out of range for {} nodes",
                self.node_rank, self.nnodes
            )));
        }

        Ok(())
    }

    pub fn world_size(&self) -> usize {
        self.nproc_per_node * self.nnodes
    }

    /// The global rank of this node's `local_rank`th worker.
    pub fn rank_of(&self, local_rank: usize) -> usize {
        self.node_rank * self.nproc_per_node + local_rank
    }
}

fn parse<F, T>(lookup: &F, key: &str) -> Result<Option<T>>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let Some(raw) = lookup(key) else {
        return Ok(None);
    };

    raw.trim()
        .parse()
        .map(Some)
        .map_err(|e| LaunchErr::Config(format!("{key}={raw:?}: {e}")))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();

        move |key| vars.get(key).cloned()
    }

    #[test]
    fn defaults_to_a_single_worker() {
        let cfg = LaunchConfig::from_lookup(lookup(&[]), "w".into()).unwrap();

        assert_eq!(cfg.world_size(), 1);
        assert_eq!(cfg.master_port, 29500);
        assert_eq!(cfg.worker_bin, PathBuf::from("w"));
    }

    #[test]
    fn ranks_are_offset_by_node() {
        let cfg = LaunchConfig::from_lookup(
            lookup(&[("NPROC_PER_NODE", "4"), ("NNODES", "2"), ("NODE_RANK", "1")]),
            "w".into(),
        )
        .unwrap();

        assert_eq!(cfg.world_size(), 8);
        assert_eq!(cfg.rank_of(0), 4);
        assert_eq!(cfg.rank_of(3), 7);
    }

    #[test]
    fn node_rank_out_of_range() {
        let err = LaunchConfig::from_lookup(lookup(&[("NODE_RANK", "1")]), "w".into());
        assert!(matches!(err, Err(LaunchErr::Config(_))));
    }
}
