use std::{error::Error, fmt, io, path::PathBuf};

use rand_distr::{BernoulliError, uniform::Error as UniformError};

use crate::pickle::PickleErr;

/// The result type used across the dataset adapter.
pub type Result<T> = std::result::Result<T, DatasetErr>;

/// Failures while acquiring, decoding or transforming a dataset.
#[derive(Debug)]
pub enum DatasetErr {
    Io(io::Error),
    Http(reqwest::Error),
    Pickle(PickleErr),
    Shape(ndarray::ShapeError),
    MissingField {
        path: PathBuf,
        field: &'static str,
    },
    InvalidField {
        path: PathBuf,
        field: &'static str,
        reason: String,
    },
    LengthMismatch {
        path: PathBuf,
        images: usize,
        labels: usize,
    },
    UnknownDataset(String),
    DuplicateDataset(String),
    InvalidConfig(String),
    Sampling(String),
}

impl fmt::Display for DatasetErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DatasetErr::Io(e) => write!(f, "io error: {e}"),
            DatasetErr::Http(e) => write!(f, "http error: {e}"),
            DatasetErr::Pickle(e) => write!(f, "pickle error: {e}"),
            DatasetErr::Shape(e) => write!(f, "shape error: {e}"),
            DatasetErr::MissingField { path, field } => {
                write!(f, "batch {} has no `{field}` entry", path.display())
            }
            DatasetErr::InvalidField {
                path,
                field,
                reason,
            } => write!(
                f,
                "batch {} has an invalid `{field}` entry: {reason}",
                path.display()
            ),
            DatasetErr::LengthMismatch {
                path,
                images,
                labels,
            } => write!(
                f,
                "batch {} holds {images} images but {labels} labels",
                path.display()
            ),
            DatasetErr::UnknownDataset(name) => write!(f, "unknown dataset `{name}`"),
            DatasetErr::DuplicateDataset(name) => {
                write!(f, "dataset `{name}` is already registered")
            }
            DatasetErr::InvalidConfig(msg) => write!(f, "invalid config: {msg}"),
            DatasetErr::Sampling(msg) => write!(f, "sampling error: {msg}"),
        }
    }
}

impl Error for DatasetErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            DatasetErr::Io(e) => Some(e),
            DatasetErr::Http(e) => Some(e),
            DatasetErr::Pickle(e) => Some(e),
            DatasetErr::Shape(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for DatasetErr {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<reqwest::Error> for DatasetErr {
    fn from(value: reqwest::Error) -> Self {
        Self::Http(value)
    }
}

impl From<PickleErr> for DatasetErr {
    fn from(value: PickleErr) -> Self {
        Self::Pickle(value)
    }
}

impl From<ndarray::ShapeError> for DatasetErr {
    fn from(value: ndarray::ShapeError) -> Self {
        Self::Shape(value)
    }
}

impl From<UniformError> for DatasetErr {
    fn from(value: UniformError) -> Self {
        Self::Sampling(value.to_string())
    }
}

impl From<BernoulliError> for DatasetErr {
    fn from(value: BernoulliError) -> Self {
        Self::Sampling(value.to_string())
    }
}
