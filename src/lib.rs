pub mod config;
pub mod error;
pub mod source;
pub mod state;
pub mod storage;

mod types;

pub use error::{Result, StorageError};
pub use types::*;
