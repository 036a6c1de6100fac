//! Result sinks and the image store.
//!
//! Persistence never aborts a cycle: the sample has already moved, so a failed
//! write is logged and the run continues.

use super::CycleRecord;
use crate::config::StorageConfig;
use crate::error::{AppResult, DaqError};
use crate::imaging::CaptureResult;
use async_trait::async_trait;
use chrono::{DateTime, Local};
use image::codecs::jpeg::JpegEncoder;
use image::RgbImage;
use std::fs::{File, OpenOptions};
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// CSV header of the per-cycle log.
pub const CSV_HEADER: [&str; 8] = [
    "sample_idx",
    "timestamp",
    "raw_path",
    "enh_path",
    "weight_g",
    "temp_c",
    "humidity_pct",
    "status",
];

/// Consumer of finished cycle records.
#[async_trait]
pub trait ResultSink: Send {
    /// Persist one record.
    async fn record(&mut self, record: &CycleRecord) -> AppResult<()>;

    /// Flush and release resources. Called once at the end of a run.
    async fn shutdown(&mut self) -> AppResult<()> {
        Ok(())
    }
}

// =============================================================================
// CsvSink
// =============================================================================

/// Appends one row per cycle to a CSV file.
///
/// The header is written only when the file is new or empty, so a log survives
/// across runs.
pub struct CsvSink {
    path: PathBuf,
    writer: Option<csv::Writer<File>>,
}

impl CsvSink {
    /// Sink appending to `path`; the file is opened on the first record.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            writer: None,
        }
    }

    /// Log file location.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn writer(&mut self) -> AppResult<&mut csv::Writer<File>> {
        if self.writer.is_none() {
            if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            let is_new = std::fs::metadata(&self.path)
                .map(|m| m.len() == 0)
                .unwrap_or(true);

            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)
                .map_err(|e| {
                    DaqError::Storage(format!(
                        "Failed to open CSV log '{}': {}",
                        self.path.display(),
                        e
                    ))
                })?;

            let mut writer = csv::WriterBuilder::new()
                .has_headers(false)
                .from_writer(file);
            if is_new {
                writer.write_record(CSV_HEADER)?;
                writer.flush()?;
            }
            info!(path = %self.path.display(), new = is_new, "CSV log opened");
            self.writer = Some(writer);
        }

        self.writer
            .as_mut()
            .ok_or_else(|| DaqError::Storage("CSV writer unavailable".to_string()))
    }
}

fn csv_row(record: &CycleRecord) -> [String; 8] {
    let path = |p: &Option<PathBuf>| {
        p.as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_default()
    };
    // Debug keeps a trailing `.0` on whole numbers (`25.0`, not `25`).
    let number = |v: Option<f64>| v.map(|v| format!("{v:?}")).unwrap_or_default();

    [
        record.index.to_string(),
        record.timestamp.format("%Y-%m-%d %H:%M:%S").to_string(),
        path(&record.raw_image),
        path(&record.enhanced_image),
        number(record.measurement.weight_g),
        number(record.measurement.temperature_c),
        number(record.measurement.humidity_pct),
        record.status.as_str().to_string(),
    ]
}

#[async_trait]
impl ResultSink for CsvSink {
    async fn record(&mut self, record: &CycleRecord) -> AppResult<()> {
        let writer = self.writer()?;
        writer.write_record(csv_row(record))?;
        // One row per physical sample; flush so a crash loses nothing.
        writer.flush()?;
        debug!(index = record.index, "Cycle appended to CSV log");
        Ok(())
    }

    async fn shutdown(&mut self) -> AppResult<()> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush()?;
            info!(path = %self.path.display(), "CSV log closed");
        }
        Ok(())
    }
}

// =============================================================================
// MemorySink
// =============================================================================

/// Keeps records in memory. Clones share the same storage.
#[derive(Clone, Default)]
pub struct MemorySink {
    records: Arc<Mutex<Vec<CycleRecord>>>,
}

impl MemorySink {
    /// Empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything recorded so far.
    pub async fn records(&self) -> Vec<CycleRecord> {
        self.records.lock().await.clone()
    }
}

#[async_trait]
impl ResultSink for MemorySink {
    async fn record(&mut self, record: &CycleRecord) -> AppResult<()> {
        self.records.lock().await.push(record.clone());
        Ok(())
    }
}

// =============================================================================
// ImageStore
// =============================================================================

/// Which variant of a capture an image file holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageKind {
    /// Frame as captured (after cropping)
    Raw,
    /// Enhanced copy
    Enhanced,
}

impl ImageKind {
    fn suffix(self) -> &'static str {
        match self {
            ImageKind::Raw => "raw",
            ImageKind::Enhanced => "enh",
        }
    }
}

/// Paths of the images written for one cycle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SavedImages {
    /// Raw JPEG, if written
    pub raw: Option<PathBuf>,
    /// Enhanced JPEG, if written
    pub enhanced: Option<PathBuf>,
}

/// Writes captured frames as JPEG files.
#[derive(Debug, Clone)]
pub struct ImageStore {
    config: StorageConfig,
}

impl ImageStore {
    /// Store writing into the configured raw and enhanced directories.
    pub fn new(config: StorageConfig) -> Self {
        Self { config }
    }

    /// `sample_{index:03}_{YYYYmmdd_HHMMSS}_{raw|enh}.jpg`
    pub fn file_name(index: u32, timestamp: &DateTime<Local>, kind: ImageKind) -> String {
        format!(
            "sample_{:03}_{}_{}.jpg",
            index,
            timestamp.format("%Y%m%d_%H%M%S"),
            kind.suffix()
        )
    }

    /// Persist the enabled variants of `capture`.
    ///
    /// Failures are logged and leave the corresponding path absent.
    pub async fn save(
        &self,
        index: u32,
        timestamp: &DateTime<Local>,
        capture: &CaptureResult,
    ) -> SavedImages {
        let mut saved = SavedImages::default();

        if self.config.save_raw {
            saved.raw = self
                .save_one(index, timestamp, ImageKind::Raw, &capture.raw)
                .await;
        }
        if self.config.save_enhanced {
            if let Some(enhanced) = &capture.enhanced {
                saved.enhanced = self
                    .save_one(index, timestamp, ImageKind::Enhanced, enhanced)
                    .await;
            }
        }

        saved
    }

    async fn save_one(
        &self,
        index: u32,
        timestamp: &DateTime<Local>,
        kind: ImageKind,
        image: &Arc<RgbImage>,
    ) -> Option<PathBuf> {
        let dir = match kind {
            ImageKind::Raw => &self.config.raw_dir,
            ImageKind::Enhanced => &self.config.enhanced_dir,
        };
        let path = dir.join(Self::file_name(index, timestamp, kind));

        match write_jpeg(path.clone(), Arc::clone(image), self.config.jpeg_quality).await {
            Ok(()) => {
                info!(path = %path.display(), "Saved {} image", kind.suffix());
                Some(path)
            }
            Err(e) => {
                warn!(path = %path.display(), "Failed to save {} image: {}", kind.suffix(), e);
                None
            }
        }
    }
}

async fn write_jpeg(path: PathBuf, image: Arc<RgbImage>, quality: u8) -> AppResult<()> {
    tokio::task::spawn_blocking(move || -> AppResult<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let mut out = BufWriter::new(File::create(&path)?);
        JpegEncoder::new_with_quality(&mut out, quality.clamp(1, 100)).encode_image(&*image)?;
        Ok(())
    })
    .await
    .map_err(|e| DaqError::Storage(format!("image writer task failed: {e}")))?
}
