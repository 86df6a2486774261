//! Text rendering for the command line

pub mod format;
pub mod progress;
pub mod table;

pub use format::{format_timestamp, group_thousands};
pub use progress::ProgressBar;
pub use table::TabWriter;
