//! Relic Core
//!
//! This crate contains the engine-agnostic building blocks used by the Relic
//! asset engine: collections, the main-thread dispatch queue, logging and
//! profiling setup.

pub mod alloc;
pub mod dispatch;
pub mod logging;
pub mod profiling;
