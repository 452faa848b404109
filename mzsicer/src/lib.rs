mod args;
mod driver;
mod import;
mod time_range;
mod types;
mod write;

pub use args::*;
pub use driver::{MZSicer, MZSicerError};
pub use import::{ImportError, ImportSummary, ScanImporter, ScanRecord};
pub use time_range::{TimeRange, TimeRangeParseError};
pub use write::{JsonLinesWriter, OutputRecord};
