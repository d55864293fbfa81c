pub mod config;
pub mod core;
pub mod errors;
pub mod init;

// Re-export commonly used items for convenience
pub use config::ClientConfig;
pub use crate::core::*;
pub use errors::{ClientError, ClientResult};
