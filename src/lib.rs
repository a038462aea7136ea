pub mod config;
pub mod contexts;
pub mod data;
pub mod error;
pub mod metadata_store;
pub mod tools;

pub use error::{PipelineError, Result};
