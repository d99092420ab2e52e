use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Process-lifetime block access counters.
#[derive(Debug, Default)]
pub struct CacheMetrics {
    hits: AtomicU64,
    total: AtomicU64,
}

impl CacheMetrics {
    pub fn new() -> Self {
        CacheMetrics {
            hits: AtomicU64::new(0),
            total: AtomicU64::new(0),
        }
    }

    pub fn record_access(&self, blocks: u64) {
        self.total.fetch_add(blocks, Ordering::SeqCst);
    }

    pub fn record_hits(&self, blocks: u64) {
        self.hits.fetch_add(blocks, Ordering::SeqCst);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        // hits are counted after their access, so loading them first keeps hits <= total
        let hits = self.hits.load(Ordering::SeqCst);
        let total = self.total.load(Ordering::SeqCst);
        MetricsSnapshot { hits, total }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub hits: u64,
    pub total: u64,
}

impl MetricsSnapshot {
    /// `None` until the first access.
    pub fn hit_rate(&self) -> Option<f64> {
        if self.total == 0 {
            None
        } else {
            Some(self.hits as f64 / self.total as f64)
        }
    }

    pub fn report(&self) {
        match self.hit_rate() {
            Some(rate) => log::info!("cache metrics: hit={} total={} hit-rate: {:.2}", self.hits, self.total, rate),
            None => log::info!("cache metrics: hit={} total={} hit-rate: n/a", self.hits, self.total),
        }
    }
}

/// Background thread logging a metrics snapshot every interval until dropped.
pub struct MetricsReporter {
    stop: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl MetricsReporter {
    pub fn spawn(metrics: Arc<CacheMetrics>, interval: Duration) -> io::Result<Self> {
        let (stop, stopped) = mpsc::channel::<()>();
        let handle = thread::Builder::new()
            .name("cache-metrics".to_string())
            .spawn(move || loop {
                match stopped.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => metrics.snapshot().report(),
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            })?;
        Ok(MetricsReporter {
            stop: Some(stop),
            handle: Some(handle),
        })
    }

    pub fn stop(self) {
        drop(self)
    }
}

impl Drop for MetricsReporter {
    fn drop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
