use std::{
    env, fs,
    path::{Path, PathBuf},
};

use rand::{SeedableRng, rngs::StdRng};
use serde::Deserialize;

use crate::{DatasetErr, Result};

pub const DEFAULT_DATA_DIR: &str = "data/cifar100";
pub const DEFAULT_REMOTE_URL: &str = "https://www.cs.toronto.edu/~kriz/cifar-100-python.tar.gz";

const CONFIG_VAR: &str = "CIFAR100_CONFIG";
const DATA_DIR_VAR: &str = "CIFAR100_DATA_DIR";
const URL_VAR: &str = "CIFAR100_URL";
const SEED_VAR: &str = "SEED";

/// Where the dataset is cached, where it comes from and how augmentation is seeded.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DatasetConfig {
    data_dir: PathBuf,
    remote_url: String,
    seed: Option<u64>,
    #[serde(skip)]
    seed_var: Option<String>,
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            remote_url: DEFAULT_REMOTE_URL.to_string(),
            seed: None,
            seed_var: None,
        }
    }
}

impl DatasetConfig {
    /// Creates a new configuration caching the dataset under `data_dir`.
    ///
    /// # Args
    /// * `data_dir` - The local cache root.
    ///
    /// # Returns
    /// A `DatasetConfig` with the default remote URL and no seed.
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Self::default()
        }
    }

    pub fn with_remote_url(mut self, url: impl Into<String>) -> Self {
        self.remote_url = url.into();
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self.seed_var = None;
        self
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn remote_url(&self) -> &str {
        &self.remote_url
    }

    /// Returns the augmentation seed, `SEED` taking precedence over the file.
    ///
    /// # Returns
    /// An error if `SEED` is set but isn't an unsigned integer. It is only parsed
    /// here, so commands that never draw random numbers don't depend on it.
    pub fn seed(&self) -> Result<Option<u64>> {
        let Some(raw) = &self.seed_var else {
            return Ok(self.seed);
        };

        raw.trim()
            .parse()
            .map(Some)
            .map_err(|e| DatasetErr::InvalidConfig(format!("{SEED_VAR}={raw}: {e}")))
    }

    /// Loads a configuration from a JSON file, missing fields take their defaults.
    ///
    /// # Args
    /// * `path` - The JSON file to read.
    ///
    /// # Returns
    /// The configuration, or an error if the file can't be read or parsed.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        serde_json::from_str(&content)
            .map_err(|e| DatasetErr::InvalidConfig(format!("{}: {e}", path.display())))
    }

    /// Builds the configuration from the process environment.
    ///
    /// `CIFAR100_CONFIG` names an optional JSON file used as the base, then
    /// `CIFAR100_DATA_DIR`, `CIFAR100_URL` and `SEED` override single fields.
    pub fn from_env() -> Result<Self> {
        Self::from_vars(|key| env::var(key).ok())
    }

    fn from_vars(var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = match var(CONFIG_VAR) {
            Some(path) => Self::from_json_file(Path::new(&path))?,
            None => Self::default(),
        };

        if let Some(dir) = var(DATA_DIR_VAR) {
            config.data_dir = PathBuf::from(dir);
        }
        if let Some(url) = var(URL_VAR) {
            config.remote_url = url;
        }
        config.seed_var = var(SEED_VAR);

        Ok(config)
    }

    /// Returns the random generator used for augmentation, reproducible when a
    /// seed is configured.
    pub fn rng(&self) -> Result<StdRng> {
        Ok(match self.seed()? {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;
    use std::collections::HashMap;

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn defaults() {
        let config = DatasetConfig::from_vars(vars(&[])).unwrap();
        assert_eq!(config, DatasetConfig::default());
        assert_eq!(config.data_dir(), Path::new(DEFAULT_DATA_DIR));
        assert_eq!(config.remote_url(), DEFAULT_REMOTE_URL);
        assert_eq!(config.seed().unwrap(), None);
    }

    #[test]
    fn env_overrides() {
        let config = DatasetConfig::from_vars(vars(&[
            (DATA_DIR_VAR, "/tmp/cache"),
            (URL_VAR, "http://localhost/c.tgz"),
            (SEED_VAR, " 7 "),
        ]))
        .unwrap();

        assert_eq!(config.data_dir(), Path::new("/tmp/cache"));
        assert_eq!(config.remote_url(), "http://localhost/c.tgz");
        assert_eq!(config.seed().unwrap(), Some(7));
    }

    #[test]
    fn bad_seed_fails_on_use() {
        let config = DatasetConfig::from_vars(vars(&[(SEED_VAR, "abc")])).unwrap();

        assert!(matches!(config.seed(), Err(DatasetErr::InvalidConfig(_))));
        assert!(config.rng().is_err());
        assert_eq!(config.with_seed(4).seed().unwrap(), Some(4));
    }

    #[test]
    fn json_file_then_env() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{ "data_dir": "/data/c100", "seed": 3 }"#).unwrap();

        let config = DatasetConfig::from_vars(vars(&[
            (CONFIG_VAR, path.to_str().unwrap()),
            (SEED_VAR, "11"),
        ]))
        .unwrap();

        assert_eq!(config.data_dir(), Path::new("/data/c100"));
        assert_eq!(config.remote_url(), DEFAULT_REMOTE_URL);
        assert_eq!(config.seed().unwrap(), Some(11));
    }

    #[test]
    fn json_unknown_field() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{ "data_dir": "x", "batch_size": 3 }"#).unwrap();

        let err = DatasetConfig::from_json_file(&path).unwrap_err();
        assert!(matches!(err, DatasetErr::InvalidConfig(_)));
    }

    #[test]
    fn seeded_rng_is_reproducible() {
        let config = DatasetConfig::default().with_seed(42);
        let a: u64 = config.rng().unwrap().random();
        let b: u64 = config.rng().unwrap().random();
        assert_eq!(a, b);
    }
}
