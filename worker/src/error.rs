use std::{error::Error, fmt, io};

use collective::GroupErr;
use machine_learning::MlErr;

/// The worker module's result type.
pub type Result<T> = std::result::Result<T, WorkerErr>;

/// Training run failures.
#[derive(Debug)]
pub enum WorkerErr {
    Io(io::Error),
    Group(GroupErr),
    Ml(MlErr),
    Json(serde_json::Error),
    Config(String),
    Compute(String),
    ModelUnavailable,
}

impl fmt::Display for WorkerErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerErr::Io(e) => write!(f, "io error: {e}"),
            WorkerErr::Group(e) => write!(f, "process group error: {e}"),
            WorkerErr::Ml(e) => write!(f, "{e}"),
            WorkerErr::Json(e) => write!(f, "json error: {e}"),
            WorkerErr::Config(detail) => write!(f, "invalid training configuration: {detail}"),
            WorkerErr::Compute(detail) => write!(f, "compute task failed: {detail}"),
            WorkerErr::ModelUnavailable => {
                write!(f, "the model was lost by a previously failed compute task")
            }
        }
    }
}

impl Error for WorkerErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            WorkerErr::Io(e) => Some(e),
            WorkerErr::Group(e) => Some(e),
            WorkerErr::Ml(e) => Some(e),
            WorkerErr::Json(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for WorkerErr {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<GroupErr> for WorkerErr {
    fn from(value: GroupErr) -> Self {
        Self::Group(value)
    }
}

impl From<MlErr> for WorkerErr {
    fn from(value: MlErr) -> Self {
        Self::Ml(value)
    }
}

impl From<serde_json::Error> for WorkerErr {
    fn from(value: serde_json::Error) -> Self {
        Self::Json(value)
    }
}

/// Boundary conversion for binaries / I/O APIs.
impl From<WorkerErr> for io::Error {
    fn from(value: WorkerErr) -> Self {
        match value {
            WorkerErr::Io(e) => e,
            WorkerErr::Config(_) => io::Error::new(io::ErrorKind::InvalidInput, value),
            other => io::Error::other(other),
        }
    }
}
