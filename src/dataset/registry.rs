use std::collections::BTreeMap;

use log::debug;

use super::{Dataset, cifar100::{self, Cifar100}};
use crate::{DatasetConfig, DatasetErr, Result};

/// Builds a dataset adapter from a configuration.
pub type Constructor = Box<dyn Fn(&DatasetConfig) -> Box<dyn Dataset> + Send + Sync>;

/// Maps dataset names to the constructors of their adapters.
#[derive(Default)]
pub struct DatasetFactory {
    constructors: BTreeMap<String, Constructor>,
}

impl DatasetFactory {
    /// Creates an empty `DatasetFactory`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a `DatasetFactory` knowing every dataset this crate ships.
    pub fn with_builtins() -> Self {
        let mut factory = Self::new();
        factory.insert(cifar100::NAME, |config| Box::new(Cifar100::new(config)));
        factory
    }

    /// Registers a new dataset under `name`.
    ///
    /// # Arguments
    /// * `name` - The key `create` will look the dataset up by.
    /// * `constructor` - Builds the adapter from a configuration.
    ///
    /// # Returns
    /// An error if `name` is already registered.
    pub fn register<F>(&mut self, name: &str, constructor: F) -> Result<()>
    where
        F: Fn(&DatasetConfig) -> Box<dyn Dataset> + Send + Sync + 'static,
    {
        if self.contains(name) {
            return Err(DatasetErr::DuplicateDataset(name.to_string()));
        }

        self.insert(name, constructor);
        Ok(())
    }

    fn insert<F>(&mut self, name: &str, constructor: F)
    where
        F: Fn(&DatasetConfig) -> Box<dyn Dataset> + Send + Sync + 'static,
    {
        debug!("registering dataset {name}");
        self.constructors
            .insert(name.to_string(), Box::new(constructor));
    }

    /// Builds the dataset registered under `name`.
    ///
    /// # Returns
    /// The adapter, or `DatasetErr::UnknownDataset` if nothing is registered as `name`.
    pub fn create(&self, name: &str, config: &DatasetConfig) -> Result<Box<dyn Dataset>> {
        let constructor = self
            .constructors
            .get(name)
            .ok_or_else(|| DatasetErr::UnknownDataset(name.to_string()))?;

        Ok(constructor(config))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.constructors.contains_key(name)
    }

    /// Returns the registered names in lexicographic order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.constructors.keys().map(String::as_str)
    }
}
