use std::{error::Error, fmt, io, process::ExitStatus};

pub type Result<T> = std::result::Result<T, LaunchErr>;

#[derive(Debug)]
pub enum LaunchErr {
    Io(io::Error),
    Config(String),
    Spawn { local_rank: usize, source: io::Error },
    WorkerFailed { local_rank: usize, status: ExitStatus },
}

impl fmt::Display for LaunchErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LaunchErr::Io(e) => write!(f, "io error: {e}"),
            LaunchErr::Config(detail) => write!(f, "invalid launch configuration: {detail}"),
            LaunchErr::Spawn { local_rank, source } => {
                write!(f, "failed to spawn local worker {local_rank}: {source}")
            }
            LaunchErr::WorkerFailed { local_rank, status } => {
                write!(f, "local worker {local_rank} failed with {status}")
            }
        }
    }
}

impl Error for LaunchErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            LaunchErr::Io(e) | LaunchErr::Spawn { source: e, .. } => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for LaunchErr {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<LaunchErr> for io::Error {
    fn from(value: LaunchErr) -> Self {
        match value {
            LaunchErr::Io(e) => e,
            LaunchErr::Config(_) => io::Error::new(io::ErrorKind::InvalidInput, value),
            other => io::Error::other(other),
        }
    }
}
