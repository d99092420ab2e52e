pub mod backend;
pub mod cache;
pub mod config;
pub mod device;

pub use backend::{Backend, BackendError};
pub use cache::BlockCache;
pub use config::DeviceConfig;
pub use device::Device;
