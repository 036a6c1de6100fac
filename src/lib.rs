//! # Conveyor DAQ Core Library
//!
//! Host-side sequencing for a conveyor sample station. A controller board moves a
//! sample between a camera station and a scale/sensor station; this crate drives
//! it over a serial link, captures and enhances an image of each sample, parses the
//! weight/temperature/humidity readings, and hands one record per cycle to a sink.
//!
//! ## Crate Structure
//!
//! - **`config`**: Immutable [`config::Settings`] loaded once at startup (Figment:
//!   defaults, TOML file, `CONVEYOR_` environment variables).
//! - **`error`**: The [`error::DaqError`] taxonomy. Only connection and configuration
//!   errors are fatal; everything else is recovered inside a cycle.
//! - **`logging`**: `tracing` subscriber setup.
//! - **`hardware`**: The serial [`hardware::LineChannel`], the camera
//!   [`hardware::FrameSource`] capability, and simulated devices.
//! - **`protocol`**: Wire commands and the pure line classifier.
//! - **`session`**: [`session::DeviceSession`], the time-bounded command/acknowledgment verbs.
//! - **`imaging`**: [`imaging::CaptureService`] and the deterministic enhancement pipeline.
//! - **`data`**: Result sinks (CSV, memory) and the JPEG image store.
//! - **`experiment`**: The per-sample cycle state machine and its orchestrator.

pub mod config;
pub mod data;
pub mod error;
pub mod experiment;
pub mod hardware;
pub mod imaging;
pub mod logging;
pub mod protocol;
pub mod session;
