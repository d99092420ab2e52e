use std::path::PathBuf;
use std::time::Duration;

use reqwest::Url;

use crate::{backend::BackendError, cache::default_index_path};

pub const DEFAULT_BLOCK_SIZE: u64 = 512;

pub const DEFAULT_METRICS_INTERVAL_SECS: u64 = 5;

#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "config", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "config", serde(default))]
pub struct DeviceConfig {
    /// Locator of the origin: `http://`, `https://` or `file://`.
    pub url: String,
    /// Cache data file; no cache when absent.
    pub cache: Option<PathBuf>,
    /// Index file; `<cache>.idx` when absent.
    pub index: Option<PathBuf>,
    pub block_size: u64,
    pub log_cache_metrics: bool,
    pub metrics_interval_secs: u64,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        DeviceConfig {
            url: String::new(),
            cache: None,
            index: None,
            block_size: DEFAULT_BLOCK_SIZE,
            log_cache_metrics: false,
            metrics_interval_secs: DEFAULT_METRICS_INTERVAL_SECS,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Locator {
    Http(String),
    File(PathBuf),
}

impl DeviceConfig {
    pub fn new(url: impl Into<String>) -> Self {
        DeviceConfig {
            url: url.into(),
            ..Default::default()
        }
    }

    #[cfg(feature = "config")]
    pub fn load(path: impl AsRef<std::path::Path>) -> Result<Self, BackendError> {
        let file = std::fs::OpenOptions::new()
            .read(true)
            .open(path.as_ref())?;
        serde_json::from_reader(std::io::BufReader::new(file))
            .map_err(|err| BackendError::InvalidConfig(format!("Failed to parse {}: {}", path.as_ref().display(), err)))
    }

    pub fn locator(&self) -> Result<Locator, BackendError> {
        let url = Url::parse(&self.url)
            .map_err(|err| BackendError::InvalidConfig(format!("Invalid url {:?}: {}", self.url, err)))?;
        match url.scheme() {
            "http" | "https" => Ok(Locator::Http(self.url.clone())),
            "file" => url.to_file_path()
                .map(Locator::File)
                .map_err(|_| BackendError::InvalidConfig(format!("Invalid file url {:?}", self.url))),
            scheme => Err(BackendError::InvalidConfig(format!("Unsupported url scheme {scheme:?}"))),
        }
    }

    pub fn index_path(&self) -> Option<PathBuf> {
        let cache = self.cache.as_ref()?;
        Some(self.index.clone().unwrap_or_else(|| default_index_path(cache)))
    }

    pub fn metrics_interval(&self) -> Duration {
        Duration::from_secs(self.metrics_interval_secs)
    }

    pub fn validate(&self) -> Result<(), BackendError> {
        self.locator()?;
        if !self.block_size.is_power_of_two() {
            return Err(BackendError::InvalidConfig(format!(
                "Block size {} is not a power of two", self.block_size,
            )));
        }
        if self.log_cache_metrics && self.metrics_interval_secs == 0 {
            return Err(BackendError::InvalidConfig("Metrics interval must not be zero".to_string()));
        }
        if self.cache.is_some() && self.index_path() == self.cache {
            return Err(BackendError::InvalidConfig("Cache and index must be different files".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = DeviceConfig::new("https://example.com/disk.img");
        assert_eq!(config.block_size, 512);
        assert_eq!(config.metrics_interval(), Duration::from_secs(5));
        assert_eq!(config.index_path(), None);
        assert_eq!(config.locator().unwrap(), Locator::Http("https://example.com/disk.img".to_string()));
        config.validate().unwrap();
    }

    #[test]
    fn test_config_index_path() {
        let mut config = DeviceConfig::new("http://localhost/disk.img");
        config.cache = Some(PathBuf::from("/tmp/disk.cache"));
        assert_eq!(config.index_path(), Some(PathBuf::from("/tmp/disk.cache.idx")));

        config.index = Some(PathBuf::from("/tmp/other.idx"));
        assert_eq!(config.index_path(), Some(PathBuf::from("/tmp/other.idx")));

        config.index = Some(PathBuf::from("/tmp/disk.cache"));
        assert!(matches!(config.validate(), Err(BackendError::InvalidConfig(_))));
    }

    #[test]
    fn test_config_locator() {
        let config = DeviceConfig::new("file:///srv/images/disk.img");
        assert_eq!(config.locator().unwrap(), Locator::File(PathBuf::from("/srv/images/disk.img")));

        for url in ["", "disk.img", "ftp://example.com/disk.img"] {
            assert!(matches!(DeviceConfig::new(url).validate(), Err(BackendError::InvalidConfig(_))), "{url:?}");
        }
    }

    #[test]
    fn test_config_block_size() {
        let mut config = DeviceConfig::new("http://localhost/disk.img");
        for block_size in [0, 3, 1000] {
            config.block_size = block_size;
            assert!(matches!(config.validate(), Err(BackendError::InvalidConfig(_))));
        }
        config.block_size = 4096;
        config.validate().unwrap();
    }

    #[cfg(feature = "config")]
    #[test]
    fn test_config_load() {
        use std::io::Write;

        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"url": "http://localhost/disk.img", "cache": "/tmp/disk.cache", "log_cache_metrics": true}}"#).unwrap();
        file.flush().unwrap();

        let config = DeviceConfig::load(file.path()).unwrap();
        assert_eq!(config.url, "http://localhost/disk.img");
        assert_eq!(config.cache, Some(PathBuf::from("/tmp/disk.cache")));
        assert!(config.log_cache_metrics);
        assert_eq!(config.block_size, DEFAULT_BLOCK_SIZE);
        assert_eq!(config.metrics_interval_secs, DEFAULT_METRICS_INTERVAL_SECS);

        let mut broken = tempfile::NamedTempFile::new().unwrap();
        write!(broken, "{{").unwrap();
        broken.flush().unwrap();
        assert!(matches!(DeviceConfig::load(broken.path()), Err(BackendError::InvalidConfig(_))));
    }
}
