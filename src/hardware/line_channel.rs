//! Serial line channel to the controller board
//!
//! Reference: USB-serial link to the conveyor microcontroller
//!
//! Link Overview:
//! - Baud: 115200, 8N1, no flow control
//! - The board resets when the port opens and needs ~2 s to boot
//! - Board → host: newline-terminated ASCII lines
//! - Host → board: raw bytes
//!
//! The channel interprets nothing. Every read takes an explicit timeout and a
//! timeout is `Ok(None)`, not an error; only I/O failure, end-of-stream, or use
//! after [`LineChannel::close`] produce [`DaqError::Connection`].
//!
//! # Example Usage
//!
//! ```no_run
//! use conveyor_daq::hardware::LineChannel;
//! use std::time::Duration;
//!
//! # async fn demo() -> conveyor_daq::error::AppResult<()> {
//! let mut channel = LineChannel::open("/dev/ttyACM0", 115_200).await?;
//! channel
//!     .settle_and_drain(Duration::from_secs(2), Duration::from_millis(200), Duration::from_secs(5))
//!     .await?;
//! channel.write_raw(b"Z").await?;
//! if let Some(line) = channel.read_line(Duration::from_secs(20)).await? {
//!     println!("board: {line}");
//! }
//! channel.close().await;
//! # Ok(())
//! # }
//! ```

use crate::error::{AppResult, DaqError};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::task::spawn_blocking;
use tokio::time::Instant;
use tokio_serial::SerialPortBuilderExt;
use tracing::{debug, info};

/// Any duplex byte stream usable as the board link.
pub trait SerialPortIO: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> SerialPortIO for T {}
type DynSerial = Box<dyn SerialPortIO>;

/// Newline-delimited duplex link.
pub struct LineChannel {
    /// Port path, for diagnostics
    endpoint: String,
    /// `None` once closed
    port: Option<BufReader<DynSerial>>,
    /// Bytes of a line whose terminator has not arrived yet
    pending: Vec<u8>,
}

impl LineChannel {
    /// Open a serial port (8N1, no flow control).
    ///
    /// # Errors
    /// Returns [`DaqError::Connection`] if the port cannot be opened.
    pub async fn open(endpoint: &str, baud_rate: u32) -> AppResult<Self> {
        let path = endpoint.to_string();

        let port = spawn_blocking(move || {
            tokio_serial::new(&path, baud_rate)
                .data_bits(tokio_serial::DataBits::Eight)
                .parity(tokio_serial::Parity::None)
                .stop_bits(tokio_serial::StopBits::One)
                .flow_control(tokio_serial::FlowControl::None)
                .open_native_async()
        })
        .await
        .map_err(|e| DaqError::Connection(format!("serial open task failed: {e}")))?
        .map_err(|e| {
            DaqError::Connection(format!(
                "Failed to open serial port '{}' at {} baud: {}",
                endpoint, baud_rate, e
            ))
        })?;

        info!(endpoint, baud_rate, "Serial port opened");
        Ok(Self::from_stream(endpoint, port))
    }

    /// Wrap an already connected stream (simulator, tests).
    pub fn from_stream(endpoint: impl Into<String>, stream: impl SerialPortIO + 'static) -> Self {
        Self {
            endpoint: endpoint.into(),
            port: Some(BufReader::new(Box::new(stream) as DynSerial)),
            pending: Vec::new(),
        }
    }

    /// Port path or stream label.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Whether [`close`](Self::close) has not been called yet.
    pub fn is_open(&self) -> bool {
        self.port.is_some()
    }

    /// Read one line, waiting at most `timeout`.
    ///
    /// Returns the trimmed line (possibly empty), or `None` if no complete line
    /// arrived in time. Bytes of an incomplete line are kept and completed by the
    /// next call.
    pub async fn read_line(&mut self, timeout: Duration) -> AppResult<Option<String>> {
        let endpoint = &self.endpoint;
        let Some(port) = self.port.as_mut() else {
            return Err(closed(endpoint));
        };

        match tokio::time::timeout(timeout, port.read_until(b'\n', &mut self.pending)).await {
            Err(_) => Ok(None),
            Ok(Err(e)) => Err(DaqError::Connection(format!(
                "Serial read error on '{}': {}",
                endpoint, e
            ))),
            Ok(Ok(0)) => Err(DaqError::Connection(format!(
                "Serial link '{}' closed by device",
                endpoint
            ))),
            Ok(Ok(_)) => {
                let line = String::from_utf8_lossy(&self.pending).trim().to_string();
                self.pending.clear();
                Ok(Some(line))
            }
        }
    }

    /// Write bytes and flush.
    pub async fn write_raw(&mut self, bytes: &[u8]) -> AppResult<()> {
        let endpoint = &self.endpoint;
        let Some(port) = self.port.as_mut() else {
            return Err(closed(endpoint));
        };

        let stream = port.get_mut();
        stream
            .write_all(bytes)
            .await
            .map_err(|e| DaqError::Connection(format!("Write to '{}' failed: {}", endpoint, e)))?;
        stream
            .flush()
            .await
            .map_err(|e| DaqError::Connection(format!("Flush of '{}' failed: {}", endpoint, e)))?;

        debug!(endpoint = %endpoint, bytes = ?String::from_utf8_lossy(bytes), "Sent");
        Ok(())
    }

    /// Wait for the board to boot, then discard whatever it printed.
    ///
    /// After `settle`, lines are read and dropped until none arrives for `quiet`
    /// or `max` has elapsed. Returns the number of discarded non-empty lines.
    pub async fn settle_and_drain(
        &mut self,
        settle: Duration,
        quiet: Duration,
        max: Duration,
    ) -> AppResult<usize> {
        tokio::time::sleep(settle).await;

        let deadline = Instant::now() + max;
        let mut discarded = 0;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            match self.read_line(quiet.min(remaining)).await? {
                Some(line) if line.is_empty() => {}
                Some(line) => {
                    info!(target: "device", "{}", line);
                    discarded += 1;
                }
                None => break,
            }
        }

        debug!(discarded, "Boot chatter drained");
        Ok(discarded)
    }

    /// Release the port. Safe to call more than once.
    pub async fn close(&mut self) {
        if let Some(mut port) = self.port.take() {
            if let Err(e) = port.get_mut().shutdown().await {
                debug!(endpoint = %self.endpoint, "Shutdown on close failed: {}", e);
            }
            self.pending.clear();
            info!(endpoint = %self.endpoint, "Serial port closed");
        }
    }
}

fn closed(endpoint: &str) -> DaqError {
    DaqError::Connection(format!("Serial link '{}' is closed", endpoint))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn reads_trimmed_lines() {
        let (mut board, host) = tokio::io::duplex(256);
        let mut channel = LineChannel::from_stream("test", host);

        board.write_all(b"BOOT OK\r\nAT_HOME\n").await.unwrap();

        let first = channel.read_line(Duration::from_secs(1)).await.unwrap();
        let second = channel.read_line(Duration::from_secs(1)).await.unwrap();
        assert_eq!(first.as_deref(), Some("BOOT OK"));
        assert_eq!(second.as_deref(), Some("AT_HOME"));
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_is_none_and_keeps_partial_line() {
        let (mut board, host) = tokio::io::duplex(256);
        let mut channel = LineChannel::from_stream("test", host);

        board.write_all(b"AT_CAP").await.unwrap();
        let line = channel.read_line(Duration::from_millis(100)).await.unwrap();
        assert_eq!(line, None);

        board.write_all(b"TURE\n").await.unwrap();
        let line = channel.read_line(Duration::from_millis(100)).await.unwrap();
        assert_eq!(line.as_deref(), Some("AT_CAPTURE"));
    }

    #[tokio::test]
    async fn invalid_utf8_is_decoded_lossily() {
        let (mut board, host) = tokio::io::duplex(256);
        let mut channel = LineChannel::from_stream("test", host);

        board.write_all(b"noise \xff\xfe\n").await.unwrap();
        let line = channel.read_line(Duration::from_secs(1)).await.unwrap().unwrap();
        assert!(line.starts_with("noise"));
    }

    #[tokio::test]
    async fn end_of_stream_is_connection_error() {
        let (board, host) = tokio::io::duplex(256);
        let mut channel = LineChannel::from_stream("test", host);
        drop(board);

        let err = channel.read_line(Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, DaqError::Connection(_)));
    }

    #[tokio::test]
    async fn write_raw_sends_exact_bytes() {
        let (mut board, host) = tokio::io::duplex(256);
        let mut channel = LineChannel::from_stream("test", host);

        channel.write_raw(b"C").await.unwrap();

        let mut buf = [0u8; 8];
        let n = board.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"C");
    }

    #[tokio::test]
    async fn close_is_idempotent_and_final() {
        let (_board, host) = tokio::io::duplex(256);
        let mut channel = LineChannel::from_stream("test", host);

        channel.close().await;
        channel.close().await;
        assert!(!channel.is_open());

        assert!(matches!(
            channel.write_raw(b"Z").await,
            Err(DaqError::Connection(_))
        ));
        assert!(matches!(
            channel.read_line(Duration::from_millis(10)).await,
            Err(DaqError::Connection(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn drain_discards_boot_chatter() {
        let (mut board, host) = tokio::io::duplex(256);
        let mut channel = LineChannel::from_stream("test", host);

        board
            .write_all(b"Booting...\nHX711 init\n\nServo attached\n")
            .await
            .unwrap();

        let start = Instant::now();
        let discarded = channel
            .settle_and_drain(
                Duration::from_secs(2),
                Duration::from_millis(200),
                Duration::from_secs(5),
            )
            .await
            .unwrap();
        assert_eq!(discarded, 3);
        assert!(start.elapsed() >= Duration::from_secs(2));

        board.write_all(b"ZERO_DONE\n").await.unwrap();
        let line = channel.read_line(Duration::from_secs(1)).await.unwrap();
        assert_eq!(line.as_deref(), Some("ZERO_DONE"));
    }
}
