//! Addon and dependency package distribution for AYON/OpenPype clients.
//!
//! Resolves the addons and the dependency package the server marks as
//! production, downloads whatever is missing locally through pluggable
//! downloaders, verifies checksums and unpacks the archives.

pub mod commands;
pub mod config;
pub mod credentials;
pub mod distribution;
pub mod errors;
pub mod logger;
pub mod utils;

pub use errors::{DistributionError, Result};
