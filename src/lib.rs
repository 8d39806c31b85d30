//! A CIFAR-100 dataset adapter.
//!
//! Downloads and caches the python version of the dataset, decodes its pickled
//! batches into `ndarray` arrays and turns single examples into standardized,
//! optionally augmented, model inputs. Datasets are looked up by name through a
//! [`DatasetFactory`].

pub mod config;
pub mod dataset;
pub mod error;
pub mod pickle;

pub use config::DatasetConfig;
pub use dataset::{
    Dataset, DatasetFactory, DatasetParams, Examples, Features, Labels, Mode, cifar100::Cifar100,
};
pub use error::{DatasetErr, Result};
