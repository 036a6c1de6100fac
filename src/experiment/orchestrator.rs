//! Cycle orchestrator.
//!
//! Sequences one physical sample at a time: move to camera, capture, weigh, home,
//! record. The orchestrator exclusively owns the device session, the camera, and
//! the sink for the whole run; nothing overlaps.
//!
//! The current [`CycleState`] selects the next step; each step reports a
//! [`CycleEvent`] that moves the machine on. Only a broken serial link ends a run
//! early, and even then the interrupted cycle is recorded first with
//! [`CycleStatus::LinkLost`]. Every other anomaly is logged and folded into the
//! cycle's status.

use super::state::{CycleEvent, CycleState, CycleStatus};
use crate::config::Settings;
use crate::data::{CycleRecord, ImageStore, ResultSink, SavedImages};
use crate::error::{AppResult, DaqError};
use crate::imaging::CaptureService;
use crate::protocol::{Command, MeasurementRecord, MotionTarget};
use crate::session::DeviceSession;
use async_trait::async_trait;
use chrono::{DateTime, Local};
use std::sync::Arc;
use tracing::{debug, error, info, info_span, warn, Instrument};

/// Operator decision between cycles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatorCommand {
    /// Load the next sample and run a cycle
    Run,
    /// End the run
    Quit,
}

/// Source of operator decisions.
#[async_trait]
pub trait OperatorPrompt: Send {
    /// Ask whether to run cycle `next_index` or quit.
    async fn next_command(&mut self, next_index: u32) -> OperatorCommand;
}

/// What a cycle has gathered so far.
#[derive(Debug, Default)]
struct CycleProgress {
    images: SavedImages,
    measurement: MeasurementRecord,
    capture_aborted: bool,
    degraded: bool,
    link_error: Option<DaqError>,
}

impl CycleProgress {
    fn status(&self) -> CycleStatus {
        if self.link_error.is_some() {
            CycleStatus::LinkLost
        } else if self.capture_aborted {
            CycleStatus::CaptureAborted
        } else if self.degraded {
            CycleStatus::Degraded
        } else {
            CycleStatus::Completed
        }
    }
}

/// Drives sample cycles against the station hardware.
pub struct CycleOrchestrator {
    session: DeviceSession,
    capture: CaptureService,
    images: ImageStore,
    sink: Box<dyn ResultSink>,
    settings: Arc<Settings>,
    state: CycleState,
    next_index: u32,
    tared: bool,
}

impl CycleOrchestrator {
    /// Take ownership of the station's link, camera, and sink. Cycles start at index 1.
    pub fn new(
        session: DeviceSession,
        capture: CaptureService,
        sink: Box<dyn ResultSink>,
        settings: Arc<Settings>,
    ) -> Self {
        Self {
            session,
            capture,
            images: ImageStore::new(settings.storage.clone()),
            sink,
            settings,
            state: CycleState::Idle,
            next_index: 1,
            tared: false,
        }
    }

    /// Current cycle state; `Idle` between cycles.
    pub fn state(&self) -> CycleState {
        self.state
    }

    /// Index the next cycle will be recorded under.
    pub fn next_index(&self) -> u32 {
        self.next_index
    }

    fn advance(&mut self, event: CycleEvent) -> AppResult<()> {
        let next = self.state.apply(event)?;
        debug!(from = %self.state, to = %next, ?event, "Cycle state");
        self.state = next;
        Ok(())
    }

    /// Tare the scale. Runs once per orchestrator; later calls do nothing.
    ///
    /// A missed acknowledgment is only a warning since the board tares at boot.
    pub async fn tare_once(&mut self) -> AppResult<()> {
        if self.tared {
            return Ok(());
        }
        let timeout = self.settings.timeouts.tare();
        info!("Taring scale (tray must be empty)");
        if !self.session.tare(timeout).await? {
            warn!("Tare not confirmed, relying on the tare performed at boot");
        }
        self.tared = true;
        Ok(())
    }

    /// Run one full cycle and hand its record to the sink.
    ///
    /// Returns `Err` only for a broken serial link, after the partial cycle has
    /// been recorded.
    pub async fn run_cycle(&mut self) -> AppResult<CycleRecord> {
        let index = self.next_index;
        let span = info_span!("cycle", index);
        let result = self.cycle_body(index).instrument(span).await;
        if result.is_err() {
            self.state = CycleState::Idle;
        }
        result
    }

    async fn cycle_body(&mut self, index: u32) -> AppResult<CycleRecord> {
        let timestamp = Local::now();
        let mut progress = CycleProgress::default();

        info!("Starting cycle");
        self.advance(CycleEvent::Run)?;

        while self.state != CycleState::Recording {
            let event = match self.step(index, &timestamp, &mut progress).await {
                Ok(event) => event,
                Err(e @ DaqError::Connection(_)) => {
                    warn!(state = %self.state, "Serial link lost mid-cycle: {}", e);
                    progress.link_error = Some(e);
                    CycleEvent::LinkLost
                }
                Err(e) => return Err(e),
            };
            self.advance(event)?;
        }

        if progress.link_error.is_none() {
            let move_ack = self.settings.timeouts.move_ack();
            match self.session.move_to(MotionTarget::Home, move_ack).await {
                Ok(true) => {}
                Ok(false) => {
                    warn!("Conveyor did not confirm return home");
                    progress.degraded = true;
                }
                Err(e) => {
                    warn!("Serial link lost while homing: {}", e);
                    progress.link_error = Some(e);
                }
            }
        }

        let status = progress.status();
        let record = CycleRecord {
            index,
            timestamp,
            raw_image: progress.images.raw,
            enhanced_image: progress.images.enhanced,
            measurement: progress.measurement,
            status,
        };

        if let Err(e) = self.sink.record(&record).await {
            warn!("Failed to record cycle: {}", e);
        }
        self.advance(CycleEvent::Recorded)?;
        self.next_index += 1;

        info!(%status, measurement = %record.measurement, "Cycle finished");
        match progress.link_error {
            Some(e) => Err(e),
            None => Ok(record),
        }
    }

    /// Perform the work of the current state and report its outcome.
    async fn step(
        &mut self,
        index: u32,
        timestamp: &DateTime<Local>,
        progress: &mut CycleProgress,
    ) -> AppResult<CycleEvent> {
        match self.state {
            CycleState::AwaitCaptureAck => {
                let move_ack = self.settings.timeouts.move_ack();
                if self.session.move_to(MotionTarget::Capture, move_ack).await? {
                    Ok(CycleEvent::Acknowledged)
                } else {
                    warn!("Sample did not reach the camera, skipping capture");
                    Ok(CycleEvent::TimedOut)
                }
            }
            CycleState::Capturing => {
                self.capture_and_save(index, timestamp, progress).await;
                Ok(CycleEvent::Captured)
            }
            CycleState::AbortedCycle => {
                progress.capture_aborted = true;
                Ok(CycleEvent::Skipped)
            }
            CycleState::AwaitWeigh => {
                self.session.send(Command::MoveToWeigh).await?;
                progress.measurement = self
                    .session
                    .await_measurement(self.settings.timeouts.measurement())
                    .await?;
                if !progress.measurement.is_complete() {
                    progress.degraded = true;
                }
                Ok(CycleEvent::Measured)
            }
            CycleState::Idle | CycleState::Recording => Err(DaqError::Sequence(format!(
                "no cycle step runs in state {}",
                self.state
            ))),
        }
    }

    async fn capture_and_save(
        &mut self,
        index: u32,
        timestamp: &DateTime<Local>,
        progress: &mut CycleProgress,
    ) {
        match self.capture.capture().await {
            Ok(result) => {
                progress.images = self.images.save(index, timestamp, &result).await;
                let storage = &self.settings.storage;
                let raw_lost = storage.save_raw && progress.images.raw.is_none();
                let enhanced_lost = storage.save_enhanced
                    && result.enhanced.is_some()
                    && progress.images.enhanced.is_none();
                if raw_lost || enhanced_lost {
                    progress.degraded = true;
                }
            }
            Err(e) => {
                warn!("Capture failed, continuing without image: {}", e);
                progress.degraded = true;
            }
        }
    }

    /// Tare once, then run cycles until the operator quits.
    ///
    /// The sink is shut down and the link closed however the loop ends. Returns
    /// the number of cycles recorded.
    pub async fn run(&mut self, prompt: &mut dyn OperatorPrompt) -> AppResult<u32> {
        let result = self.operator_loop(prompt).await;
        if let Err(e) = &result {
            error!("Run aborted: {}", e);
        }
        self.shutdown().await;
        result
    }

    async fn operator_loop(&mut self, prompt: &mut dyn OperatorPrompt) -> AppResult<u32> {
        self.tare_once().await?;

        let mut cycles = 0;
        loop {
            match prompt.next_command(self.next_index).await {
                OperatorCommand::Quit => break,
                OperatorCommand::Run => {
                    self.run_cycle().await?;
                    cycles += 1;
                }
            }
        }

        info!(cycles, "Operator ended the run");
        Ok(cycles)
    }

    /// Flush the sink and close the serial link. Safe to call more than once.
    pub async fn shutdown(&mut self) {
        if let Err(e) = self.sink.shutdown().await {
            warn!("Failed to flush results: {}", e);
        }
        self.session.close().await;
    }
}
