//! Common types and utilities shared across station-metadata services.

pub mod error;
pub mod fingerprint;
pub mod station;

pub use error::{MetadataError, MetadataResult};
pub use fingerprint::sha256_hex;
pub use station::StationKey;
