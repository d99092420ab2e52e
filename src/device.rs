use std::sync::Arc;

use crate::{
    backend::{Backend, BackendError, file::FileBackend, http::HttpBackend},
    cache::{BlockCache, metrics::{CacheMetrics, MetricsReporter, MetricsSnapshot}},
    config::{DeviceConfig, Locator},
};

/// Backend stack handed to the block-device protocol layer: the origin, optionally wrapped
/// in a block cache, plus the metrics reporter when enabled.
pub struct Device {
    backend: Box<dyn Backend>,
    metrics: Option<Arc<CacheMetrics>>,
    // stops the reporter thread when the device goes away
    _reporter: Option<MetricsReporter>,
}

impl Device {
    pub fn open(config: &DeviceConfig) -> Result<Self, BackendError> {
        config.validate()?;
        log::info!("serve {}", config.url);
        let origin: Box<dyn Backend> = match config.locator()? {
            Locator::Http(url) => Box::new(HttpBackend::new(url)?),
            Locator::File(path) => Box::new(FileBackend::open(path)?),
        };
        Self::with_origin(origin, config)
    }

    /// Wires an already opened origin according to `config`.
    pub fn with_origin(origin: Box<dyn Backend>, config: &DeviceConfig) -> Result<Self, BackendError> {
        let (Some(cache_path), Some(index_path)) = (&config.cache, config.index_path()) else {
            return Ok(Device {
                backend: origin,
                metrics: None,
                _reporter: None,
            });
        };

        let cache = BlockCache::open(origin, cache_path, index_path, config.block_size)?;
        let metrics = cache.metrics().clone();
        let reporter = if config.log_cache_metrics {
            Some(MetricsReporter::spawn(metrics.clone(), config.metrics_interval())?)
        } else {
            None
        };
        Ok(Device {
            backend: Box::new(cache),
            metrics: Some(metrics),
            _reporter: reporter,
        })
    }

    pub fn is_cached(&self) -> bool {
        self.metrics.is_some()
    }

    /// Current cache counters; `None` without a cache.
    pub fn metrics(&self) -> Option<MetricsSnapshot> {
        self.metrics.as_ref().map(|metrics| metrics.snapshot())
    }
}

impl Backend for Device {
    fn read_at(&self, buffer: &mut [u8], offset: u64) -> Result<usize, BackendError> {
        self.backend.read_at(buffer, offset)
    }

    fn write_at(&self, buffer: &[u8], offset: u64) -> Result<usize, BackendError> {
        self.backend.write_at(buffer, offset)
    }

    fn size(&self) -> Result<u64, BackendError> {
        self.backend.size()
    }

    fn sync(&self) -> Result<(), BackendError> {
        self.backend.sync()
    }
}
