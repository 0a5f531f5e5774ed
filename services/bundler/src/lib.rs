//! Bundler service library.
//!
//! Exposes the internal modules so integration tests can drive the
//! pipeline without going through the binary.

pub mod config;
pub mod fetch;
pub mod runner;
pub mod server;
