use std::{
    env, fs,
    path::{Path, PathBuf},
    str::FromStr,
};

use serde::{Deserialize, Serialize};

use crate::{Result, WorkerErr};

/// Where the training images come from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DatasetSource {
    /// The MNIST training split, downloaded into `root` if missing.
    Mnist { root: PathBuf },
    /// `len` generated MNIST-shaped samples, no network or disk access.
    Synthetic { len: usize },
}

impl FromStr for DatasetSource {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.split_once(':') {
            None if s == "mnist" => Ok(Self::Mnist {
                root: PathBuf::from(DEFAULT_MNIST_ROOT),
            }),
            Some(("mnist", root)) => Ok(Self::Mnist { root: root.into() }),
            Some(("synthetic", len)) => len
                .parse()
                .map(|len| Self::Synthetic { len })
                .map_err(|e| format!("invalid synthetic length: {e}")),
            _ => Err("expected `mnist`, `mnist:<root>` or `synthetic:<len>`".into()),
        }
    }
}

const DEFAULT_MNIST_ROOT: &str = "/tmp/MNIST_DATA_train";

/// The hyper parameters and paths of a training run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainConfig {
    pub epochs: usize,
    /// Iterations at the start of every epoch excluded from the throughput.
    pub warmup_steps: usize,
    pub batch_size: usize,
    /// Learning rate of a single rank, scaled by the world size.
    pub base_lr: f32,
    pub momentum: Option<f32>,
    pub seed: u64,
    pub shuffle: bool,
    pub drop_last: bool,
    pub hidden: Vec<usize>,
    /// Amount of gradient elements reduced per collective call.
    pub bucket_size: usize,
    pub prefetch_depth: usize,
    pub dataset: DatasetSource,
    pub checkpoint_path: PathBuf,
    pub log_dir: PathBuf,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            epochs: 4,
            warmup_steps: 5,
            batch_size: 32,
            base_lr: 0.01,
            momentum: None,
            seed: 0,
            shuffle: true,
            drop_last: false,
            hidden: vec![120, 84],
            bucket_size: 1 << 16,
            prefetch_depth: 4,
            dataset: DatasetSource::Mnist {
                root: PathBuf::from(DEFAULT_MNIST_ROOT),
            },
            checkpoint_path: PathBuf::from("checkpoints/checkpoint.safetensors"),
            log_dir: PathBuf::from("runs"),
        }
    }
}

impl TrainConfig {
    /// Builds the configuration from the defaults, an optional JSON file named by
    /// `TRAIN_CONFIG` and the `TRAIN_*` overrides of the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Same as [`TrainConfig::from_env`] over an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = match lookup("TRAIN_CONFIG") {
            Some(path) => Self::from_file(Path::new(&path))?,
            None => Self::default(),
        };

        override_with(&lookup, "TRAIN_EPOCHS", &mut cfg.epochs)?;
        override_with(&lookup, "TRAIN_WARMUP_STEPS", &mut cfg.warmup_steps)?;
        override_with(&lookup, "TRAIN_BATCH_SIZE", &mut cfg.batch_size)?;
        override_with(&lookup, "TRAIN_BASE_LR", &mut cfg.base_lr)?;
        override_with(&lookup, "TRAIN_SEED", &mut cfg.seed)?;
        override_with(&lookup, "TRAIN_SHUFFLE", &mut cfg.shuffle)?;
        override_with(&lookup, "TRAIN_DROP_LAST", &mut cfg.drop_last)?;
        override_with(&lookup, "TRAIN_BUCKET_SIZE", &mut cfg.bucket_size)?;
        override_with(&lookup, "TRAIN_PREFETCH_DEPTH", &mut cfg.prefetch_depth)?;
        override_with(&lookup, "TRAIN_DATASET", &mut cfg.dataset)?;
        override_with(&lookup, "TRAIN_CHECKPOINT_PATH", &mut cfg.checkpoint_path)?;
        override_with(&lookup, "TRAIN_LOG_DIR", &mut cfg.log_dir)?;

        if let Some(raw) = lookup("TRAIN_MOMENTUM") {
            cfg.momentum = Some(parse("TRAIN_MOMENTUM", &raw)?);
        }

        cfg.validate()?;
        Ok(cfg)
    }

    /// Reads a JSON configuration, missing fields take their default value.
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("epochs", self.epochs),
            ("batch_size", self.batch_size),
            ("bucket_size", self.bucket_size),
            ("prefetch_depth", self.prefetch_depth),
        ] {
            if value == 0 {
                return Err(WorkerErr::Config(format!("{name} must be non-zero")));
            }
        }

        if !(self.base_lr.is_finite() && self.base_lr > 0.) {
            return Err(WorkerErr::Config(format!(
                "base_lr must be positive, got {}",
                self.base_lr
            )));
        }

        if let Some(mu) = self.momentum.filter(|mu| !(0. ..1.).contains(mu)) {
            return Err(WorkerErr::Config(format!(
                "momentum must be in [0, 1), got {mu}"
            )));
        }

        if let DatasetSource::Synthetic { len: 0 } = self.dataset {
            return Err(WorkerErr::Config("synthetic dataset must be non-empty".into()));
        }

        Ok(())
    }

    /// The learning rate of a group of `world_size` ranks.
    pub fn learning_rate(&self, world_size: usize) -> f32 {
        self.base_lr * world_size as f32
    }
}

fn override_with<F, T>(lookup: &F, key: &str, field: &mut T) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    if let Some(raw) = lookup(key) {
        *field = parse(key, &raw)?;
    }

    Ok(())
}

fn parse<T>(key: &str, raw: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e| WorkerErr::Config(format!("{key}={raw:?}: {e}")))
}
