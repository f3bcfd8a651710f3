pub mod adapter;
pub mod error;
mod models;
mod name;

pub use crate::adapter::Platform;
pub use crate::models::{FileItem, PlatformConfig, join_name, split_name};
pub use crate::name::{MAX_NAME_BYTES, validate as validate_name};
use std::sync::Arc;

pub type PlatformHandle = Arc<dyn Platform + Send + Sync>;
