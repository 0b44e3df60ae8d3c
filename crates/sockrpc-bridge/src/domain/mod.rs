//! Domain layer for sockrpc-bridge.
//!
//! The domain layer holds plain data with no dependency on I/O, async
//! runtimes, or transports.  Reading a configuration *file* is the binary's
//! job; this layer only describes what a configuration looks like and how
//! file values merge with defaults.

pub mod config;

pub use config::{BridgeConfig, ConfigError, FileConfig};
