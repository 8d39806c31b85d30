use std::sync::Arc;

use log::warn;
use ndarray::ArrayView3;
use rand::RngCore;

use super::{
    Dataset, DatasetParams, Examples, Features, Labels, Mode,
    acquire::{self, Acquisition, CacheLayout, Fetch, HttpFetcher},
    batch, transform,
};
use crate::{DatasetConfig, Result};

pub const NAME: &str = "cifar100";
pub const IMAGE_SIZE: usize = 32;
pub const CHANNELS: usize = 3;
pub const NUM_CLASSES: usize = 100;
/// Pixels added to each spatial axis before the training crop.
pub const PADDING: usize = 4;

pub const ARCHIVE_NAME: &str = "cifar-100-python.tar.gz";
pub const DATA_DIR: &str = "cifar-100-python";
pub const TRAIN_BATCHES: &[&str] = &["train"];
pub const TEST_BATCHES: &[&str] = &["test"];

/// The CIFAR-100 adapter: 32x32 RGB images in 100 fine classes.
pub struct Cifar100 {
    layout: CacheLayout,
    remote_url: String,
    fetcher: Arc<dyn Fetch>,
}

impl Cifar100 {
    /// Creates a new `Cifar100` downloading over HTTP.
    ///
    /// # Arguments
    /// * `config` - Where to cache the dataset and where to download it from.
    pub fn new(config: &DatasetConfig) -> Self {
        Self::with_fetcher(config, Arc::new(HttpFetcher::new()))
    }

    /// Creates a new `Cifar100` downloading through `fetcher`.
    pub fn with_fetcher(config: &DatasetConfig, fetcher: Arc<dyn Fetch>) -> Self {
        Self {
            layout: CacheLayout::new(config.data_dir(), ARCHIVE_NAME, DATA_DIR),
            remote_url: config.remote_url().to_string(),
            fetcher,
        }
    }

    pub fn layout(&self) -> &CacheLayout {
        &self.layout
    }

    pub fn batches(mode: Mode) -> &'static [&'static str] {
        match mode {
            Mode::Train => TRAIN_BATCHES,
            Mode::Eval => TEST_BATCHES,
        }
    }

    /// Like `prepare`, but reports which steps actually ran.
    pub async fn acquire(&self) -> Result<Acquisition> {
        acquire::acquire(&self.layout, &self.remote_url, self.fetcher.as_ref()).await
    }
}

#[async_trait::async_trait]
impl Dataset for Cifar100 {
    fn get_params(&self) -> DatasetParams {
        DatasetParams {
            image_size: IMAGE_SIZE,
            num_classes: NUM_CLASSES,
        }
    }

    async fn prepare(&self) -> Result<()> {
        self.acquire().await?;
        Ok(())
    }

    fn read(&self, mode: Mode) -> Result<Examples> {
        let paths = Self::batches(mode)
            .iter()
            .map(|batch| self.layout.batch_path(batch));
        let (images, labels) = batch::read_batches(paths, IMAGE_SIZE, CHANNELS)?;

        Ok(Examples::new(images, labels))
    }

    fn parse(
        &self,
        mode: Mode,
        image: ArrayView3<'_, u8>,
        label: i64,
        rng: &mut dyn RngCore,
    ) -> Result<(Features, Labels)> {
        if !(0..NUM_CLASSES as i64).contains(&label) {
            warn!("label {label} is outside [0, {NUM_CLASSES})");
        }

        let image = image.to_shape((IMAGE_SIZE, IMAGE_SIZE, CHANNELS))?;
        let mut image = transform::to_float(image.view());

        if mode == Mode::Train {
            let padded = IMAGE_SIZE + PADDING;
            image = transform::resize_with_crop_or_pad(image.view(), padded, padded);
            image = transform::random_crop(image.view(), IMAGE_SIZE, IMAGE_SIZE, rng)?;
            image = transform::random_flip_left_right(image, rng)?;
        }

        Ok((
            Features {
                image: transform::per_image_standardization(image),
            },
            Labels { label },
        ))
    }
}
