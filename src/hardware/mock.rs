//! Mock Hardware Implementations
//!
//! Simulated devices for running the station without physical hardware.
//! All mock devices use async-safe operations (tokio::time::sleep, not std::thread::sleep).
//!
//! # Available Mocks
//!
//! - `MockConveyor` - Simulated controller board speaking the wire protocol over
//!   an in-memory duplex stream
//! - `MockCamera` - Deterministic synthetic camera
//!
//! # Performance Characteristics
//!
//! - MockConveyor: configurable reply delay per command (default 50ms)
//! - MockCamera: 33ms frame readout (30fps simulation)

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use image::{Rgb, RgbImage};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration};

use crate::hardware::FrameSource;
use crate::protocol::Command;

// =============================================================================
// MockConveyor - Simulated Controller Board
// =============================================================================

/// Simulated conveyor controller
///
/// Prints boot chatter on connect, then answers each command byte the way the
/// real board does:
/// - `Z` → `ZERO_DONE`
/// - `C` → `AT_CAPTURE`
/// - `W` → measurement lines, then `WEIGH_DONE`
/// - `H` → `AT_HOME`
///
/// Commands marked with [`silent_on`](Self::silent_on) produce a diagnostic line
/// but never their completion token, which is how a stalled motor looks from
/// the host.
///
/// # Example
///
/// ```rust,ignore
/// let (stream, board) = MockConveyor::new().spawn();
/// let channel = LineChannel::from_stream("sim", stream);
/// // ... drive the session ...
/// assert_eq!(board.commands().await, vec![Command::Tare]);
/// ```
#[derive(Debug, Clone)]
pub struct MockConveyor {
    boot_lines: Vec<String>,
    measurement_lines: Vec<String>,
    silent: HashSet<Command>,
    hang_up_after: Option<Command>,
    reply_delay: Duration,
}

impl MockConveyor {
    /// Board with stock boot chatter and one complete measurement line.
    pub fn new() -> Self {
        Self {
            boot_lines: vec![
                "Conveyor controller v1.2".to_string(),
                "HX711 ready".to_string(),
                "SHT31 ready".to_string(),
                "Tray tared at boot".to_string(),
            ],
            measurement_lines: vec!["MEASURED W=12.3g T=25.0C H=40.1%".to_string()],
            silent: HashSet::new(),
            hang_up_after: None,
            reply_delay: Duration::from_millis(50),
        }
    }

    /// Replace the boot chatter.
    pub fn with_boot_lines<I, S>(mut self, lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.boot_lines = lines.into_iter().map(Into::into).collect();
        self
    }

    /// Replace the lines printed between `W` and `WEIGH_DONE`.
    pub fn with_measurement_lines<I, S>(mut self, lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.measurement_lines = lines.into_iter().map(Into::into).collect();
        self
    }

    /// Never send the completion token for `command`.
    pub fn silent_on(mut self, command: Command) -> Self {
        self.silent.insert(command);
        self
    }

    /// Close the link right after answering `command`, like a board that resets
    /// or a cable pulled mid-run.
    pub fn hang_up_after(mut self, command: Command) -> Self {
        self.hang_up_after = Some(command);
        self
    }

    /// Delay before answering each command (simulated motion time).
    pub fn with_reply_delay(mut self, delay: Duration) -> Self {
        self.reply_delay = delay;
        self
    }

    /// Start the board task and return the host end of the link.
    pub fn spawn(self) -> (DuplexStream, MockConveyorHandle) {
        let (host, device) = tokio::io::duplex(4096);
        let commands = Arc::new(Mutex::new(Vec::new()));
        let task = tokio::spawn(self.run(device, commands.clone()));
        (host, MockConveyorHandle { commands, task })
    }

    async fn run(self, mut device: DuplexStream, commands: Arc<Mutex<Vec<Command>>>) {
        for line in &self.boot_lines {
            if write_line(&mut device, line).await.is_err() {
                return;
            }
        }

        let mut byte = [0u8; 1];
        loop {
            match device.read(&mut byte).await {
                Ok(0) | Err(_) => return,
                Ok(_) => {}
            }

            let Some(command) = Command::from_wire(byte[0]) else {
                if byte[0].is_ascii_graphic() {
                    let msg = format!("ERR unknown command '{}'", byte[0] as char);
                    if write_line(&mut device, &msg).await.is_err() {
                        return;
                    }
                }
                continue;
            };
            commands.lock().await.push(command);

            if self.respond(&mut device, command).await.is_err() {
                return;
            }
            if self.hang_up_after == Some(command) {
                return;
            }
        }
    }

    async fn respond(&self, device: &mut DuplexStream, command: Command) -> std::io::Result<()> {
        let busy = match command {
            Command::Tare => "Taring...",
            Command::MoveToCapture => "Moving to camera",
            Command::MoveToWeigh => "Moving to tray",
            Command::MoveHome => "Moving home",
        };
        write_line(device, busy).await?;
        sleep(self.reply_delay).await;

        let silent = self.silent.contains(&command);
        if command == Command::MoveToWeigh {
            for line in &self.measurement_lines {
                write_line(device, line).await?;
            }
        }
        if silent {
            return write_line(device, "Motor stalled").await;
        }
        write_line(device, command.completion()).await
    }
}

impl Default for MockConveyor {
    fn default() -> Self {
        Self::new()
    }
}

async fn write_line(device: &mut DuplexStream, line: &str) -> std::io::Result<()> {
    device.write_all(line.as_bytes()).await?;
    device.write_all(b"\r\n").await
}

/// Handle to a running [`MockConveyor`].
pub struct MockConveyorHandle {
    commands: Arc<Mutex<Vec<Command>>>,
    task: JoinHandle<()>,
}

impl MockConveyorHandle {
    /// Commands received so far, in order.
    pub async fn commands(&self) -> Vec<Command> {
        self.commands.lock().await.clone()
    }

    /// Whether the board task has exited (host closed the link).
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

// =============================================================================
// MockCamera - Simulated Camera
// =============================================================================

/// Mock camera producing a deterministic synthetic scene
///
/// Simulates a camera with:
/// - Requested vs. native resolution (the smaller of the two is negotiated)
/// - 33ms frame readout (30fps)
/// - Slight per-frame brightness drift while "auto-exposure" converges
/// - Optional failure or stall to exercise the capture error paths
///
/// # Example
///
/// ```rust,ignore
/// let mut camera = MockCamera::new(3840, 2160).with_native_resolution(1920, 1080);
/// let frame = camera.read_frame().await?;
/// assert_eq!(frame.dimensions(), (1920, 1080));
/// ```
pub struct MockCamera {
    requested: (u32, u32),
    native: (u32, u32),
    frame_count: u64,
    fail: bool,
    stall: bool,
}

impl MockCamera {
    /// Create new mock camera with the requested resolution
    ///
    /// # Arguments
    /// * `width` - Requested frame width in pixels
    /// * `height` - Requested frame height in pixels
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            requested: (width, height),
            native: (width, height),
            frame_count: 0,
            fail: false,
            stall: false,
        }
    }

    /// Limit the sensor to a native mode; frames use the smaller of requested and native.
    pub fn with_native_resolution(mut self, width: u32, height: u32) -> Self {
        self.native = (width, height);
        self
    }

    /// Every read fails as if the device were unplugged.
    pub fn disconnected(mut self) -> Self {
        self.fail = true;
        self
    }

    /// Every read hangs forever.
    pub fn stalled(mut self) -> Self {
        self.stall = true;
        self
    }

    /// Resolution frames are delivered at.
    pub fn negotiated_resolution(&self) -> (u32, u32) {
        (
            self.requested.0.min(self.native.0),
            self.requested.1.min(self.native.1),
        )
    }

    fn render(&self) -> RgbImage {
        let (width, height) = self.negotiated_resolution();
        // Exposure settles over the first few frames.
        let drift = 24u32.saturating_sub(self.frame_count as u32 * 6);
        let (cx, cy) = (width as f32 / 2.0, height as f32 / 2.0);
        let radius = width.min(height) as f32 / 4.0;

        RgbImage::from_fn(width, height, |x, y| {
            let base = 40 + (x * 120 / width.max(1)) + drift;
            let dx = x as f32 - cx;
            let dy = y as f32 - cy;
            if dx * dx + dy * dy <= radius * radius {
                // Sample: brown granules with a fine checker texture.
                let texture = if (x / 3 + y / 3) % 2 == 0 { 12 } else { 0 };
                Rgb([
                    (120 + texture + drift).min(255) as u8,
                    (80 + texture) as u8,
                    (50 + texture / 2) as u8,
                ])
            } else {
                let v = base.min(255) as u8;
                Rgb([v, v, v.saturating_add(10)])
            }
        })
    }
}

impl Default for MockCamera {
    fn default() -> Self {
        Self::new(1920, 1080)
    }
}

#[async_trait]
impl FrameSource for MockCamera {
    fn requested_resolution(&self) -> (u32, u32) {
        self.requested
    }

    async fn read_frame(&mut self) -> Result<RgbImage> {
        if self.stall {
            std::future::pending::<()>().await;
        }
        if self.fail {
            return Err(anyhow!("MockCamera: device yielded no frame"));
        }

        sleep(Duration::from_millis(33)).await;
        let frame = self.render();
        self.frame_count += 1;
        Ok(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncBufReadExt, BufReader};

    async fn next_line<R: tokio::io::AsyncBufRead + Unpin>(reader: &mut R) -> String {
        let mut line = String::new();
        reader.read_line(&mut line).await.unwrap();
        line.trim().to_string()
    }

    #[tokio::test]
    async fn conveyor_boots_and_acknowledges() {
        let (host, board) = MockConveyor::new()
            .with_boot_lines(["BOOT OK"])
            .with_reply_delay(Duration::ZERO)
            .spawn();
        let mut host = BufReader::new(host);

        assert_eq!(next_line(&mut host).await, "BOOT OK");

        host.get_mut().write_all(b"C").await.unwrap();
        assert_eq!(next_line(&mut host).await, "Moving to camera");
        assert_eq!(next_line(&mut host).await, "AT_CAPTURE");

        assert_eq!(board.commands().await, vec![Command::MoveToCapture]);
    }

    #[tokio::test]
    async fn conveyor_weigh_prints_measurements_then_done() {
        let (host, _board) = MockConveyor::new()
            .with_boot_lines(Vec::<String>::new())
            .with_measurement_lines(["MEASURED W=1g", "MEASURED T=2C"])
            .with_reply_delay(Duration::ZERO)
            .spawn();
        let mut host = BufReader::new(host);

        host.get_mut().write_all(b"W").await.unwrap();
        assert_eq!(next_line(&mut host).await, "Moving to tray");
        assert_eq!(next_line(&mut host).await, "MEASURED W=1g");
        assert_eq!(next_line(&mut host).await, "MEASURED T=2C");
        assert_eq!(next_line(&mut host).await, "WEIGH_DONE");
    }

    #[tokio::test]
    async fn conveyor_hangs_up_after_chosen_command() {
        let (host, board) = MockConveyor::new()
            .with_boot_lines(Vec::<String>::new())
            .with_reply_delay(Duration::ZERO)
            .hang_up_after(Command::MoveToCapture)
            .spawn();
        let mut host = BufReader::new(host);

        host.get_mut().write_all(b"C").await.unwrap();
        assert_eq!(next_line(&mut host).await, "Moving to camera");
        assert_eq!(next_line(&mut host).await, "AT_CAPTURE");

        let mut rest = String::new();
        assert_eq!(host.read_line(&mut rest).await.unwrap(), 0);
        assert_eq!(board.commands().await, vec![Command::MoveToCapture]);
    }

    #[tokio::test]
    async fn silent_command_never_completes() {
        let (host, _board) = MockConveyor::new()
            .with_boot_lines(Vec::<String>::new())
            .with_reply_delay(Duration::ZERO)
            .silent_on(Command::MoveHome)
            .spawn();
        let mut host = BufReader::new(host);

        host.get_mut().write_all(b"H").await.unwrap();
        assert_eq!(next_line(&mut host).await, "Moving home");
        assert_eq!(next_line(&mut host).await, "Motor stalled");
    }

    #[tokio::test]
    async fn camera_negotiates_smaller_resolution() {
        let mut camera = MockCamera::new(3840, 2160).with_native_resolution(640, 480);
        assert_eq!(camera.requested_resolution(), (3840, 2160));

        let frame = camera.read_frame().await.unwrap();
        assert_eq!(frame.dimensions(), (640, 480));
    }

    #[tokio::test]
    async fn camera_frames_are_deterministic_once_settled() {
        let mut a = MockCamera::new(64, 48);
        let mut b = MockCamera::new(64, 48);
        for _ in 0..5 {
            a.read_frame().await.unwrap();
            b.read_frame().await.unwrap();
        }
        assert_eq!(a.read_frame().await.unwrap(), b.read_frame().await.unwrap());
    }

    #[tokio::test]
    async fn disconnected_camera_fails() {
        let mut camera = MockCamera::new(64, 48).disconnected();
        assert!(camera.read_frame().await.is_err());
    }
}
