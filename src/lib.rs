//! tsdbinfo - cardinality statistics for Prometheus TSDB data directories
//!
//! Opens a data directory read-only, lists its blocks and reports how many
//! samples, series and distinct label values each metric holds.

pub mod commands;
pub mod config;
pub mod errors;
pub mod inspect;
pub mod output;
pub mod tsdb;

pub use config::InspectConfig;
pub use errors::{TsdbInfoError, TsdbInfoResult};
