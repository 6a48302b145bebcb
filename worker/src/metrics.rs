use std::{
    fs::{self, File},
    io::{self, BufWriter, Write},
    path::{Path, PathBuf},
    time::{Duration, Instant, SystemTime, UNIX_EPOCH},
};

use serde::Serialize;

use crate::Result;

/// Whether an iteration counts towards the throughput.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Warmup,
    Measured,
}

impl Phase {
    /// The phase of the `idx`th iteration of an epoch.
    pub fn of(idx: usize, warmup_steps: usize) -> Self {
        if idx < warmup_steps {
            Self::Warmup
        } else {
            Self::Measured
        }
    }
}

/// Measures the iterations per second of one epoch, ignoring the warmup iterations.
///
/// Every warmup iteration restarts the clock, so the elapsed time only covers measured
/// iterations.
#[derive(Debug, Clone)]
pub struct EpochClock {
    start: Instant,
    measured: usize,
}

impl Default for EpochClock {
    fn default() -> Self {
        Self::new()
    }
}

impl EpochClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            measured: 0,
        }
    }

    /// Records a finished iteration.
    pub fn tick(&mut self, phase: Phase) {
        match phase {
            Phase::Warmup => {
                self.start = Instant::now();
                self.measured = 0;
            }
            Phase::Measured => self.measured += 1,
        }
    }

    pub fn measured(&self) -> usize {
        self.measured
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Measured iterations per second, `None` if no iteration was measured.
    pub fn throughput(&self) -> Option<f64> {
        if self.measured == 0 {
            return None;
        }

        let secs = self.elapsed().as_secs_f64().max(f64::EPSILON);
        Some(self.measured as f64 / secs)
    }
}

#[derive(Serialize)]
struct ScalarRecord<'a> {
    tag: &'a str,
    step: usize,
    value: f64,
    wall_time: f64,
}

/// Appends scalar time series of a run as JSON lines to `<log_dir>/<run>/scalars.jsonl`.
///
/// Records are buffered and only guaranteed to be on disk after [`ScalarWriter::flush`].
pub struct ScalarWriter {
    dir: PathBuf,
    out: BufWriter<File>,
}

impl ScalarWriter {
    /// Creates a fresh run directory under `log_dir` and stores `config` in it as
    /// `config.json`.
    pub fn create<T: Serialize>(log_dir: &Path, config: &T) -> Result<Self> {
        let dir = create_run_dir(log_dir)?;

        let mut config_out = BufWriter::new(File::create(dir.join("config.json"))?);
        serde_json::to_writer_pretty(&mut config_out, config)?;
        config_out.flush()?;

        let out = BufWriter::new(File::create(dir.join("scalars.jsonl"))?);
        Ok(Self { dir, out })
    }

    /// The run directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn add_scalar(&mut self, tag: &str, step: usize, value: f64) -> Result<()> {
        let record = ScalarRecord {
            tag,
            step,
            value,
            wall_time: wall_time(),
        };

        serde_json::to_writer(&mut self.out, &record)?;
        self.out.write_all(b"\n")?;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.out.flush()?;
        Ok(())
    }
}

fn wall_time() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or_default()
}

fn create_run_dir(log_dir: &Path) -> io::Result<PathBuf> {
    fs::create_dir_all(log_dir)?;

    let stamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default();

    let mut attempt = 0u32;
    loop {
        let name = match attempt {
            0 => format!("run-{stamp}"),
            n => format!("run-{stamp}-{n}"),
        };

        let dir = log_dir.join(name);
        match fs::create_dir(&dir) {
            Ok(()) => return Ok(dir),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => attempt += 1,
            Err(e) => return Err(e),
        }
    }
}
