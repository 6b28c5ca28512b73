//! Core types and configuration for kiln.
//!
//! This crate defines the `kiln.toml` schema ([`KilnConfig`]), the
//! per-deployment [`StackConfig`], Docker Hub [`RegistryCredentials`],
//! port declaration normalization, and shared error types.

pub mod config;
pub mod credentials;
pub mod error;
pub mod ports;

pub use config::{BuildConfig, KilnConfig, NetworkConfig, StackConfig, StackSection, TaskConfig};
pub use credentials::RegistryCredentials;
pub use error::{Error, Result};
pub use ports::{Mode, Normalized, Port, PortConfig, Protocol};
