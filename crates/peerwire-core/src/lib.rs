//! peerwire-core — shared value types and configuration.
//! The registry and its callers depend on this one.

pub mod capability;
pub mod config;

pub use capability::{ParseCapabilityError, SubProtocolIdentifier};
pub use config::{ConfigError, IdScheme, RegistryConfig, RepositoryConfig};
