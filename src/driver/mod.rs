//! # Driver Registry
//!
//! Lazily constructed, cached driver instances keyed by a driver kind.

pub mod registry;

pub use registry::{DriverFactory, DriverRegistry, FactoryFuture};
