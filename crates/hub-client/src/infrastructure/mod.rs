//! Infrastructure layer: concrete transports and the config file.
//!
//! **Dependency rule**: this layer may depend on `application` and `hub_core`,
//! but MUST NOT be imported by the `application` layer outside of tests.

pub mod config;
pub mod transport;
