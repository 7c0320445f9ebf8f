//! FediBGS core crate - configuration, error taxonomy, and domain types
//! shared by the ingestion and serving crates.

pub mod config;
pub mod error;
pub mod events;
pub mod identity;
pub mod types;

pub use config::FedibgsConfig;
pub use error::{FedibgsError, Result};
pub use events::{RawAttachment, RawStatus, StreamEvent};
pub use types::*;
