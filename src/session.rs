//! Device session: command/acknowledgment verbs over a [`LineChannel`].
//!
//! The session turns the board's line-oriented chatter into four bounded verbs:
//! tare, move, collect measurements, and close. Every wait has an upper bound
//! because the conveyor can stall or disconnect without saying so.
//!
//! Only a broken link is an error here. An acknowledgment that does not arrive in
//! time is reported as `Ok(false)` and a measurement that never terminates comes
//! back with absent fields, so the orchestrator can keep a partial cycle.

use crate::config::{Settings, TimeoutConfig};
use crate::error::{AppResult, DaqError};
use crate::hardware::LineChannel;
use crate::protocol::{classify, Command, LineEvent, MeasurementRecord, MotionTarget, ACK_TARE};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Protocol-level access to the controller board.
pub struct DeviceSession {
    channel: LineChannel,
    timeouts: TimeoutConfig,
}

impl DeviceSession {
    /// Wrap an open channel. The board is assumed to be booted and drained.
    pub fn new(channel: LineChannel, timeouts: TimeoutConfig) -> Self {
        Self { channel, timeouts }
    }

    /// Open the configured serial port, wait for the board to boot, and drain
    /// its boot output.
    pub async fn connect(settings: &Settings) -> AppResult<Self> {
        let serial = &settings.serial;
        let channel = LineChannel::open(&serial.port, serial.baud_rate).await?;
        Self::establish(channel, settings).await
    }

    /// Settle and drain an already connected channel (simulator, tests).
    pub async fn establish(mut channel: LineChannel, settings: &Settings) -> AppResult<Self> {
        let serial = &settings.serial;
        info!(
            endpoint = channel.endpoint(),
            settle = ?serial.settle_delay(),
            "Waiting for controller to boot"
        );
        let discarded = channel
            .settle_and_drain(serial.settle_delay(), serial.drain_quiet(), serial.drain_max())
            .await?;
        debug!(discarded, "Controller ready");
        Ok(Self::new(channel, settings.timeouts.clone()))
    }

    /// Timeouts and retry policy this session was built with.
    pub fn timeouts(&self) -> &TimeoutConfig {
        &self.timeouts
    }

    /// Whether the link has not been closed yet.
    pub fn is_open(&self) -> bool {
        self.channel.is_open()
    }

    /// Write a single command byte.
    pub async fn send(&mut self, command: Command) -> AppResult<()> {
        info!(%command, "Sending command");
        self.channel.write_raw(&[command.wire_byte()]).await
    }

    /// Read lines until `expected` arrives or `timeout` elapses.
    ///
    /// Unrelated lines are logged and skipped. Returns `Ok(false)` on timeout.
    pub async fn await_ack(&mut self, expected: &str, timeout: Duration) -> AppResult<bool> {
        match self.wait_for(expected, timeout).await {
            Ok(()) => Ok(true),
            Err(e @ DaqError::AcknowledgmentTimeout { .. }) => {
                warn!("{}", e);
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    async fn wait_for(&mut self, expected: &str, timeout: Duration) -> AppResult<()> {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            let Some(line) = self.channel.read_line(remaining).await? else {
                break;
            };
            if line.is_empty() {
                continue;
            }
            info!(target: "device", "{}", line);
            if line == expected {
                debug!(expected, "Acknowledged");
                return Ok(());
            }
        }

        Err(DaqError::AcknowledgmentTimeout {
            expected: expected.to_string(),
            waited: timeout,
        })
    }

    /// Zero the scale.
    ///
    /// A timeout is not fatal: the board tares itself at boot.
    pub async fn tare(&mut self, timeout: Duration) -> AppResult<bool> {
        self.send(Command::Tare).await?;
        tokio::time::sleep(self.timeouts.tare_pause()).await;
        self.await_ack(ACK_TARE, timeout).await
    }

    /// Move the conveyor to `target` and wait for its acknowledgment.
    ///
    /// The command is re-sent up to `move_retries` times, each attempt bounded by
    /// `timeout`.
    pub async fn move_to(&mut self, target: MotionTarget, timeout: Duration) -> AppResult<bool> {
        let retries = self.timeouts.move_retries;
        for attempt in 0..=retries {
            if attempt > 0 {
                warn!(?target, attempt, retries, "Retrying move");
            }
            self.send(target.command()).await?;
            if self.await_ack(target.acknowledgment(), timeout).await? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Collect `MEASURED` lines until `WEIGH_DONE` or `timeout`.
    ///
    /// Fields accumulate across lines, the last value of a field winning. On
    /// timeout the record is all-absent unless `keep_partial_on_timeout` is set.
    pub async fn await_measurement(&mut self, timeout: Duration) -> AppResult<MeasurementRecord> {
        let deadline = Instant::now() + timeout;
        let mut record = MeasurementRecord::default();

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            let Some(line) = self.channel.read_line(remaining).await? else {
                break;
            };
            if line.is_empty() {
                continue;
            }
            info!(target: "device", "{}", line);

            match classify(&line) {
                LineEvent::Measurement(partial) => {
                    record.absorb(&partial);
                    debug!(%record, "Measurement updated");
                }
                LineEvent::Done => {
                    info!(%record, "Measurement complete");
                    return Ok(record);
                }
                LineEvent::Ack(ack) => debug!(ack, "Ignoring acknowledgment during measurement"),
                LineEvent::Log(_) => {}
            }
        }

        if self.timeouts.keep_partial_on_timeout {
            warn!(
                ?timeout,
                %record,
                "No WEIGH_DONE before timeout, keeping partial measurement"
            );
            Ok(record)
        } else {
            warn!(
                ?timeout,
                discarded = %record,
                "No WEIGH_DONE before timeout, measurement discarded"
            );
            Ok(MeasurementRecord::default())
        }
    }

    /// Close the link. Safe to call more than once.
    pub async fn close(&mut self) {
        self.channel.close().await;
    }
}
