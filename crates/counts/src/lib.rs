//! Three-pass physical counts.
//!
//! Counters capture up to three integer counts per placement; only the third
//! pass is definitive. Committing the third pass is what changes stock, and
//! that happens in the store through `resize_placement`.

pub mod record;
pub mod stats;

pub use record::{CountRecord, CountSubject, Pass, PassEntry};
pub use stats::{CountFilter, CountStatistics, count_statistics};
