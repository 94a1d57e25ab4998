//! Eversense Zero Library
//!
//! Data-acquisition core for a small glucose display: session handling
//! against the Eversense cloud, a rolling local store and trend derivation.

pub mod acquisition;
pub mod auth;
pub mod config;
pub mod display;
pub mod logging;
pub mod storage;
pub mod sync;
pub mod trend;
