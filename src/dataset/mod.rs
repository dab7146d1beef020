//! Dataset records and statistics

pub mod record;
pub mod stats;

pub use record::{parse_dataset, Record};
pub use stats::{dataset_statistics, FieldStats};
