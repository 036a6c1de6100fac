//! Hardware Access
//!
//! Low-level device communication, free of protocol knowledge:
//! - [`LineChannel`]: newline-delimited serial link with bounded reads
//! - [`FrameSource`]: camera capability used by the capture service
//! - `v4l_camera`: UVC webcam over Video4Linux2 (Linux only)
//! - [`mock`]: simulated controller board and camera

pub mod capabilities;
pub mod line_channel;
pub mod mock;
#[cfg(target_os = "linux")]
pub mod v4l_camera;

pub use capabilities::FrameSource;
pub use line_channel::{LineChannel, SerialPortIO};

use crate::config::CameraConfig;
use crate::error::AppResult;

/// Open the station's physical camera.
#[cfg(target_os = "linux")]
pub async fn open_camera(config: &CameraConfig) -> AppResult<Box<dyn FrameSource>> {
    let camera = v4l_camera::V4lCamera::open(config).await?;
    Ok(Box::new(camera))
}

/// Open the station's physical camera.
#[cfg(not(target_os = "linux"))]
pub async fn open_camera(config: &CameraConfig) -> AppResult<Box<dyn FrameSource>> {
    Err(crate::error::DaqError::Capture(format!(
        "no camera backend for '{}' on this platform",
        config.device
    )))
}
