//! Spatial partition keys for columnar geodata and the GeoParquet metadata
//! that has to stay consistent while files are keyed, sorted, converted and
//! split into partitions.

pub mod analyze;
pub mod config;
pub mod engine;
pub mod error;
pub mod keys;
pub mod metadata;
pub mod ops;
pub mod partition;
pub mod preserve;
pub mod storage;
pub mod util;
