use std::{env, str::FromStr, time::Duration};

use crate::{GroupErr, Result};

const DEFAULT_MASTER_ADDR: &str = "127.0.0.1";
const DEFAULT_MASTER_PORT: u16 = 29500;
const DEFAULT_INIT_TIMEOUT: Duration = Duration::from_secs(60);

/// Where this process sits in the group and how to reach the master rank.
///
/// Launchers describe a rank through the environment: `RANK`, `LOCAL_RANK`, `WORLD_SIZE`,
/// `MASTER_ADDR`, `MASTER_PORT` and optionally `GROUP_INIT_TIMEOUT_SECS`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupConfig {
    pub rank: usize,
    pub local_rank: usize,
    pub world_size: usize,
    pub master_addr: String,
    pub master_port: u16,
    pub init_timeout: Duration,
}

impl GroupConfig {
    /// A group made of this process alone.
    pub fn single() -> Self {
        Self {
            rank: 0,
            local_rank: 0,
            world_size: 1,
            master_addr: DEFAULT_MASTER_ADDR.to_string(),
            master_port: DEFAULT_MASTER_PORT,
            init_timeout: DEFAULT_INIT_TIMEOUT,
        }
    }

    /// Reads the configuration from the process environment.
    ///
    /// # Returns
    /// The parsed configuration or an `InvalidConfig` error if a variable is malformed or the
    /// rank doesn't fit in the world.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary variable lookup.
    ///
    /// # Arguments
    /// * `lookup` - Returns the value of a variable, if set.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::single();

        let rank = parse(&lookup, "RANK")?.unwrap_or(defaults.rank);
        let cfg = Self {
            rank,
            local_rank: parse(&lookup, "LOCAL_RANK")?.unwrap_or(rank),
            world_size: parse(&lookup, "WORLD_SIZE")?.unwrap_or(defaults.world_size),
            master_addr: lookup("MASTER_ADDR").unwrap_or(defaults.master_addr),
            master_port: parse(&lookup, "MASTER_PORT")?.unwrap_or(defaults.master_port),
            init_timeout: parse(&lookup, "GROUP_INIT_TIMEOUT_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.init_timeout),
        };

        cfg.validate()?;
        Ok(cfg)
    }

    /// Checks that the rank fits in a non-empty world.
    pub fn validate(&self) -> Result<()> {
        if self.world_size == 0 {
            return Err(GroupErr::InvalidConfig("world size must be positive".into()));
        }

        if self.rank >= self.world_size {
            return Err(GroupErr::InvalidConfig(format!(
                "rank {} is out of range for a world of size {}",
                self.rank, self.world_size
            )));
        }

        Ok(())
    }

    /// The `host:port` address the master rank listens on.
    pub fn master_endpoint(&self) -> String {
        format!("{}:{}", self.master_addr, self.master_port)
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
        .map_err(|e| GroupErr::InvalidConfig(format!("{key}={raw:?}: {e}")))
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
    fn empty_env_is_a_single_rank() {
        let cfg = GroupConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(cfg, GroupConfig::single());
    }

    #[test]
    fn launcher_vars_are_parsed() {
        let cfg = GroupConfig::from_lookup(lookup(&[
            ("RANK", "3"),
            ("LOCAL_RANK", "1"),
            ("WORLD_SIZE", "4"),
            ("MASTER_ADDR", "10.0.0.7"),
            ("MASTER_PORT", "1234"),
            ("GROUP_INIT_TIMEOUT_SECS", "5"),
        ]))
        .unwrap();

        assert_eq!(cfg.rank, 3);
        assert_eq!(cfg.local_rank, 1);
        assert_eq!(cfg.world_size, 4);
        assert_eq!(cfg.master_endpoint(), "10.0.0.7:1234");
        assert_eq!(cfg.init_timeout, Duration::from_secs(5));
    }

    #[test]
    fn local_rank_defaults_to_rank() {
        let cfg = GroupConfig::from_lookup(lookup(&[("RANK", "1"), ("WORLD_SIZE", "2")])).unwrap();
        assert_eq!(cfg.local_rank, 1);
    }

    #[test]
    fn rank_out_of_range() {
        let res = GroupConfig::from_lookup(lookup(&[("RANK", "2"), ("WORLD_SIZE", "2")]));
        assert!(matches!(res, Err(GroupErr::InvalidConfig(_))));
    }

    #[test]
    fn malformed_port() {
        let res = GroupConfig::from_lookup(lookup(&[("MASTER_PORT", "http")]));
        assert!(matches!(res, Err(GroupErr::InvalidConfig(_))));
    }
}
