// Crate root library declaration and module exports.
pub mod client;
pub mod codec;
pub mod config;
pub mod context;
pub mod error;
pub mod estimator;
pub mod model;
pub mod provider;
pub mod scheduler;
pub mod storage;

pub use error::{ProviderError, SyncError};
