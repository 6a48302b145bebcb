use std::{error::Error, fmt, io, time::Duration};

use comms::msg::OpHeader;

/// The collective module's result type.
pub type Result<T> = std::result::Result<T, GroupErr>;

/// Process group failures, every one of them is fatal for the run.
#[derive(Debug)]
pub enum GroupErr {
    Io(io::Error),
    InvalidConfig(String),
    Join(String),
    Timeout {
        what: &'static str,
        after: Duration,
    },
    Mismatch {
        rank: usize,
        expected: OpHeader,
        got: OpHeader,
    },
    LengthMismatch {
        rank: usize,
        got: usize,
        expected: usize,
    },
    UnexpectedMessage {
        rank: usize,
        got: &'static str,
    },
    Remote {
        rank: usize,
        detail: String,
    },
}

impl fmt::Display for GroupErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GroupErr::Io(e) => write!(f, "io error: {e}"),
            GroupErr::InvalidConfig(detail) => write!(f, "invalid group config: {detail}"),
            GroupErr::Join(detail) => write!(f, "failed to join the process group: {detail}"),
            GroupErr::Timeout { what, after } => {
                write!(f, "timed out after {after:?} while {what}")
            }
            GroupErr::Mismatch {
                rank,
                expected,
                got,
            } => write!(
                f,
                "collective mismatch with rank {rank}: expected #{} {}, got #{} {}",
                expected.seq, expected.kind, got.seq, got.kind
            ),
            GroupErr::LengthMismatch {
                rank,
                got,
                expected,
            } => write!(
                f,
                "tensor length mismatch with rank {rank}: got {got}, expected {expected}"
            ),
            GroupErr::UnexpectedMessage { rank, got } => {
                write!(f, "unexpected message from rank {rank}: got {got}")
            }
            GroupErr::Remote { rank, detail } => write!(f, "rank {rank} aborted: {detail}"),
        }
    }
}

impl Error for GroupErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            GroupErr::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for GroupErr {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}
