//! Cardinality reports built on top of the block reader

pub mod blocks;
pub mod labels;
pub mod report;
pub mod scan;

pub use blocks::{list_blocks, BlockRow};
pub use labels::{label_profile, LabelProfile, LabelStat};
pub use report::{clamp_limit, top_metrics, MetricReport, ReportOptions};
pub use scan::{num_samples, series_stats, MetricStat, SeriesStat};
