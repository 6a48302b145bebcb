use std::{
    error::Error,
    fmt::{self, Display},
    io,
};

use ndarray::ShapeError;
use safetensors::SafeTensorError;

use crate::initialization::RandErr;

/// The result type used in the entire machine learning module.
pub type Result<T> = std::result::Result<T, MlErr>;

/// The machine learning module's error type.
#[derive(Debug)]
pub enum MlErr {
    SizeMismatch {
        what: &'static str,
        got: usize,
        expected: usize,
    },
    Shape(ShapeError),
    Io(io::Error),
    Init(RandErr),
    Dataset(String),
    Download {
        file: String,
        detail: String,
    },
    StateDict(String),
    Checkpoint(String),
    Loader(String),
    InvalidConfig(String),
}

impl Display for MlErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MlErr::SizeMismatch {
                what,
                got,
                expected,
            } => write!(
                f,
                "There's a size mismatch in {what}, got {got} and expected {expected}"
            ),
            MlErr::Shape(e) => write!(f, "Invalid tensor shape: {e}"),
            MlErr::Io(e) => write!(f, "io error: {e}"),
            MlErr::Init(e) => write!(f, "Failed to initialize the parameters: {e}"),
            MlErr::Dataset(detail) => write!(f, "Invalid dataset: {detail}"),
            MlErr::Download { file, detail } => write!(f, "Failed to download {file}: {detail}"),
            MlErr::StateDict(detail) => write!(f, "Invalid state dict: {detail}"),
            MlErr::Checkpoint(detail) => write!(f, "Invalid checkpoint: {detail}"),
            MlErr::Loader(detail) => write!(f, "The data loader failed: {detail}"),
            MlErr::InvalidConfig(detail) => write!(f, "Invalid configuration: {detail}"),
        }
    }
}

impl Error for MlErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            MlErr::Shape(e) => Some(e),
            MlErr::Io(e) => Some(e),
            MlErr::Init(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ShapeError> for MlErr {
    fn from(value: ShapeError) -> Self {
        Self::Shape(value)
    }
}

impl From<io::Error> for MlErr {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<RandErr> for MlErr {
    fn from(value: RandErr) -> Self {
        Self::Init(value)
    }
}

impl From<SafeTensorError> for MlErr {
    fn from(value: SafeTensorError) -> Self {
        Self::Checkpoint(value.to_string())
    }
}
