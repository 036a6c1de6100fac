//! Hardware Capabilities
//!
//! Small capability traits the station's components are written against. The
//! camera is reduced to what the capture sequence needs; resolution, focus, and
//! format negotiation happen in the device implementation, not here.

use anyhow::Result;
use async_trait::async_trait;
use image::RgbImage;

/// Capability: Frame Acquisition
///
/// Devices that deliver colour frames on demand (webcams, machine-vision cameras).
///
/// # Contract
/// - `read_frame` returns the next frame the device produces; the caller bounds
///   the wait, so implementations may block until a frame is ready
/// - Frames may differ from `requested_resolution` when the device negotiated
///   another mode
/// - An `Err` means the device yielded no frame
#[async_trait]
pub trait FrameSource: Send {
    /// Resolution asked of the device at setup.
    fn requested_resolution(&self) -> (u32, u32);

    /// Grab the next frame.
    async fn read_frame(&mut self) -> Result<RgbImage>;
}
