pub mod manager;
pub mod models;

pub use manager::DeviceManager;
pub use models::*;

#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("Serial communication error: {0}")]
    SerialError(#[from] crate::serial::SerialError),

    #[error("Background task failed: {0}")]
    Worker(String),
}

pub type Result<T> = std::result::Result<T, DeviceError>;
