pub mod acquire;
pub mod batch;
pub mod cifar100;
pub mod registry;
pub mod sequence;
pub mod transform;

use std::fmt;

use ndarray::{Array3, ArrayView3};
use rand::RngCore;
use serde::Serialize;

use crate::Result;

pub use registry::DatasetFactory;
pub use sequence::Examples;

/// The execution mode a dataset is read and parsed for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mode {
    Train,
    Eval,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Train => f.write_str("train"),
            Mode::Eval => f.write_str("eval"),
        }
    }
}

/// Static properties a model needs to be built for a dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DatasetParams {
    pub image_size: usize,
    pub num_classes: usize,
}

/// The model inputs produced for one example.
#[derive(Debug, Clone, PartialEq)]
pub struct Features {
    /// A `[height, width, channels]` standardized image.
    pub image: Array3<f32>,
}

/// The targets produced for one example.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Labels {
    pub label: i64,
}

/// The contract every dataset adapter implements, so a training pipeline can
/// use any of them through a `Box<dyn Dataset>`.
#[async_trait::async_trait]
pub trait Dataset: Send + Sync {
    /// Returns the dataset's static parameters.
    fn get_params(&self) -> DatasetParams;

    /// Makes the dataset available locally, downloading and extracting it if needed.
    async fn prepare(&self) -> Result<()>;

    /// Loads every example of `mode` into memory.
    ///
    /// # Arguments
    /// * `mode` - Selects the training or the evaluation split.
    fn read(&self, mode: Mode) -> Result<Examples>;

    /// Turns one raw example into features and labels.
    ///
    /// # Arguments
    /// * `mode` - Augmentation is only applied in `Mode::Train`.
    /// * `image` - A raw `[height, width, channels]` image.
    /// * `label` - The example's class id.
    /// * `rng` - The source of randomness for augmentation.
    fn parse(
        &self,
        mode: Mode,
        image: ArrayView3<'_, u8>,
        label: i64,
        rng: &mut dyn RngCore,
    ) -> Result<(Features, Labels)>;
}
