//! Downloading and unpacking a dataset archive into a local cache.
//!
//! Both steps are guarded by a plain existence check: an archive or directory
//! that is already there is trusted as is, nothing is verified.

use std::{
    fs::File,
    io::{self, BufReader},
    path::{Path, PathBuf},
};

use flate2::read::GzDecoder;
use log::{debug, info};
use tokio::{fs, io::AsyncWriteExt};

use crate::{DatasetErr, Result};

/// Where an archive and its extracted contents live under a cache root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheLayout {
    root: PathBuf,
    archive_name: String,
    extracted_dir: String,
}

impl CacheLayout {
    /// Creates a new `CacheLayout`.
    ///
    /// # Arguments
    /// * `root` - The cache root directory.
    /// * `archive_name` - The archive's file name inside `root`.
    /// * `extracted_dir` - The directory the archive unpacks to, inside `root`.
    pub fn new(
        root: impl Into<PathBuf>,
        archive_name: impl Into<String>,
        extracted_dir: impl Into<String>,
    ) -> Self {
        Self {
            root: root.into(),
            archive_name: archive_name.into(),
            extracted_dir: extracted_dir.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn archive_path(&self) -> PathBuf {
        self.root.join(&self.archive_name)
    }

    pub fn extracted_path(&self) -> PathBuf {
        self.root.join(&self.extracted_dir)
    }

    pub fn batch_path(&self, batch: &str) -> PathBuf {
        self.extracted_path().join(batch)
    }
}

/// What an `acquire` call actually had to do.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Acquisition {
    pub downloaded: bool,
    pub extracted: bool,
}

/// Retrieves a remote resource into a local file.
#[async_trait::async_trait]
pub trait Fetch: Send + Sync {
    /// Writes the resource at `url` to `dest`, replacing any existing file.
    async fn fetch(&self, url: &str, dest: &Path) -> Result<()>;
}

/// Fetches over HTTP(S), streaming the body to disk.
#[derive(Debug, Clone, Default)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl Fetch for HttpFetcher {
    async fn fetch(&self, url: &str, dest: &Path) -> Result<()> {
        let mut response = self.client.get(url).send().await?.error_for_status()?;
        let mut file = fs::File::create(dest).await?;

        let mut written = 0;
        while let Some(chunk) = response.chunk().await? {
            file.write_all(&chunk).await?;
            written += chunk.len();
        }
        file.flush().await?;

        debug!("wrote {written} bytes to {}", dest.display());
        Ok(())
    }
}

/// Ensures the cache root, the archive and the extracted directory exist.
///
/// # Arguments
/// * `layout` - The cache layout to fill.
/// * `url` - Where to download the archive from when it's missing.
/// * `fetcher` - The transport used for the download.
///
/// # Returns
/// Which steps had to run, or the first error. A failed download is not cleaned
/// up, a truncated archive left behind counts as present on the next call.
pub async fn acquire(
    layout: &CacheLayout,
    url: &str,
    fetcher: &dyn Fetch,
) -> Result<Acquisition> {
    let mut report = Acquisition::default();
    fs::create_dir_all(layout.root()).await?;

    let archive = layout.archive_path();
    if fs::try_exists(&archive).await? {
        debug!("{} already present, skipping download", archive.display());
    } else {
        info!("downloading {url} to {}", archive.display());
        fetcher.fetch(url, &archive).await?;
        report.downloaded = true;
    }

    let extracted = layout.extracted_path();
    if fs::try_exists(&extracted).await? {
        debug!("{} already present, skipping extraction", extracted.display());
    } else {
        info!("extracting {}", archive.display());
        extract(archive, layout.root().to_path_buf()).await?;
        report.extracted = true;
    }

    Ok(report)
}

/// Unpacks a `.tar.gz` archive into `into` on tokio's blocking pool.
pub async fn extract(archive: PathBuf, into: PathBuf) -> Result<()> {
    tokio::task::spawn_blocking(move || -> Result<()> {
        let file = File::open(&archive)?;
        let mut tarball = tar::Archive::new(GzDecoder::new(BufReader::new(file)));
        tarball.unpack(&into)?;
        Ok(())
    })
    .await
    .map_err(|e| DatasetErr::Io(io::Error::other(e)))?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_paths() {
        let layout = CacheLayout::new("data/c", "a.tar.gz", "a");

        assert_eq!(layout.root(), Path::new("data/c"));
        assert_eq!(layout.archive_path(), Path::new("data/c/a.tar.gz"));
        assert_eq!(layout.extracted_path(), Path::new("data/c/a"));
        assert_eq!(layout.batch_path("train"), Path::new("data/c/a/train"));
    }

    #[tokio::test]
    async fn corrupt_archive_fails_extraction() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("bad.tar.gz");
        std::fs::write(&archive, b"definitely not gzip").unwrap();

        let err = extract(archive, dir.path().to_path_buf()).await.unwrap_err();
        assert!(matches!(err, DatasetErr::Io(_)));
    }
}
