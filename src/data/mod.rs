//! Cycle records and their persistence.
//!
//! - [`CycleRecord`]: everything known about one sample once its cycle ends
//! - [`storage`]: result sinks (CSV log, in-memory) and the JPEG image store

pub mod storage;

pub use storage::{CsvSink, ImageKind, ImageStore, MemorySink, ResultSink, SavedImages};

use crate::experiment::CycleStatus;
use crate::protocol::MeasurementRecord;
use chrono::{DateTime, Local};
use std::path::PathBuf;

/// One recorded sample cycle.
///
/// Absent image paths and measurement fields mean "not produced" or "not
/// received"; a partial cycle is still a record.
#[derive(Debug, Clone, PartialEq)]
pub struct CycleRecord {
    /// Sample number, starting at 1
    pub index: u32,
    /// Cycle start (local time)
    pub timestamp: DateTime<Local>,
    /// Raw JPEG on disk
    pub raw_image: Option<PathBuf>,
    /// Enhanced JPEG on disk
    pub enhanced_image: Option<PathBuf>,
    /// Weight, temperature, and humidity as received
    pub measurement: MeasurementRecord,
    /// How the cycle ended
    pub status: CycleStatus,
}
