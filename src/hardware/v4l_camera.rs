//! V4L2 webcam backend
//!
//! Drives a UVC webcam through Video4Linux2 (`/dev/videoN`). The device asks for
//! MJPG at the configured resolution, the same mode the station has always used
//! for its 4K webcam; YUYV and RGB3 are accepted when the driver negotiates them
//! instead.
//!
//! V4L2 streaming is blocking, so the device and its mmap stream live on a
//! dedicated worker thread. [`FrameSource::read_frame`] sends a request and
//! awaits the decoded frame; dropping the camera ends the worker and releases
//! the device.

use super::FrameSource;
use crate::config::CameraConfig;
use crate::error::{AppResult, DaqError};
use anyhow::{anyhow, Context};
use async_trait::async_trait;
use image::{ImageFormat, RgbImage};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};
use v4l::buffer::Type;
use v4l::io::mmap::Stream;
use v4l::io::traits::CaptureStream;
use v4l::video::Capture;
use v4l::{Device, Format, FourCC};

const MJPG: [u8; 4] = *b"MJPG";
const YUYV: [u8; 4] = *b"YUYV";
const RGB3: [u8; 4] = *b"RGB3";

/// Streaming buffers queued in the driver
const BUFFER_COUNT: u32 = 4;

type FrameReply = oneshot::Sender<anyhow::Result<RgbImage>>;

/// Pixel layout negotiated with the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PixelLayout {
    Mjpg,
    Yuyv { stride: usize },
    Rgb3 { stride: usize },
}

impl PixelLayout {
    fn from_format(format: &Format) -> anyhow::Result<Self> {
        let stride = format.stride as usize;
        match format.fourcc.repr {
            MJPG => Ok(PixelLayout::Mjpg),
            YUYV => Ok(PixelLayout::Yuyv {
                stride: stride.max(format.width as usize * 2),
            }),
            RGB3 => Ok(PixelLayout::Rgb3 {
                stride: stride.max(format.width as usize * 3),
            }),
            _ => Err(anyhow!("unsupported pixel format {}", format.fourcc)),
        }
    }

    fn decode(&self, data: &[u8], width: u32, height: u32) -> anyhow::Result<RgbImage> {
        match *self {
            PixelLayout::Mjpg => {
                let frame = image::load_from_memory_with_format(data, ImageFormat::Jpeg)
                    .context("corrupt MJPG frame")?;
                Ok(frame.into_rgb8())
            }
            PixelLayout::Yuyv { stride } => yuyv_to_rgb(data, width, height, stride),
            PixelLayout::Rgb3 { stride } => packed_rgb(data, width, height, stride),
        }
    }
}

/// UVC webcam opened through V4L2.
pub struct V4lCamera {
    requested: (u32, u32),
    requests: mpsc::Sender<FrameReply>,
}

impl V4lCamera {
    /// Open `config.device`, negotiate the frame format, and start streaming.
    ///
    /// Fails if the device cannot be opened or offers no usable pixel format.
    pub async fn open(config: &CameraConfig) -> AppResult<Self> {
        let requested = (config.width, config.height);
        let path = config.device.clone();
        let (requests, rx) = mpsc::channel::<FrameReply>(1);
        let (ready_tx, ready_rx) = oneshot::channel();

        std::thread::Builder::new()
            .name("v4l-camera".to_string())
            .spawn(move || worker(path, requested, rx, ready_tx))
            .map_err(|e| DaqError::Capture(format!("failed to start camera thread: {e}")))?;

        match ready_rx.await {
            Ok(Ok(())) => Ok(Self {
                requested,
                requests,
            }),
            Ok(Err(e)) => Err(DaqError::Capture(format!(
                "could not open camera '{}': {:#}",
                config.device, e
            ))),
            Err(_) => Err(DaqError::Capture(format!(
                "camera thread for '{}' exited during setup",
                config.device
            ))),
        }
    }
}

#[async_trait]
impl FrameSource for V4lCamera {
    fn requested_resolution(&self) -> (u32, u32) {
        self.requested
    }

    async fn read_frame(&mut self) -> anyhow::Result<RgbImage> {
        let (tx, rx) = oneshot::channel();
        self.requests
            .send(tx)
            .await
            .map_err(|_| anyhow!("camera stream has stopped"))?;
        rx.await.map_err(|_| anyhow!("camera stream has stopped"))?
    }
}

/// Owns the device for its whole life; serves one frame per request.
fn worker(
    path: String,
    requested: (u32, u32),
    mut requests: mpsc::Receiver<FrameReply>,
    ready: oneshot::Sender<anyhow::Result<()>>,
) {
    let setup = open_device(&path, requested);
    let (device, format, layout) = match setup {
        Ok(opened) => opened,
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };

    let mut stream = match Stream::with_buffers(&device, Type::VideoCapture, BUFFER_COUNT) {
        Ok(stream) => stream,
        Err(e) => {
            let _ = ready.send(Err(anyhow!(e).context("failed to start streaming")));
            return;
        }
    };

    info!(
        device = %path,
        width = format.width,
        height = format.height,
        fourcc = %format.fourcc,
        "Camera opened"
    );
    if ready.send(Ok(())).is_err() {
        return;
    }

    while let Some(reply) = requests.blocking_recv() {
        let frame = match stream.next() {
            Ok((data, meta)) => {
                let used = match meta.bytesused as usize {
                    0 => data.len(),
                    n => n.min(data.len()),
                };
                layout.decode(&data[..used], format.width, format.height)
            }
            Err(e) => Err(anyhow!(e).context("camera read failed")),
        };
        if reply.send(frame).is_err() {
            debug!("Frame request abandoned by caller");
        }
    }

    debug!(device = %path, "Camera released");
}

fn open_device(
    path: &str,
    requested: (u32, u32),
) -> anyhow::Result<(Device, Format, PixelLayout)> {
    let device = Device::with_path(path).with_context(|| format!("cannot open {path}"))?;

    let wanted = Format::new(requested.0, requested.1, FourCC::new(&MJPG));
    let format = device
        .set_format(&wanted)
        .context("format negotiation failed")?;
    let layout = PixelLayout::from_format(&format)?;

    if (format.width, format.height) != requested {
        warn!(
            requested = ?requested,
            actual = ?(format.width, format.height),
            "Camera negotiated a different resolution"
        );
    }
    Ok((device, format, layout))
}

/// Convert packed YUYV 4:2:2 (BT.601, full range) to RGB.
fn yuyv_to_rgb(data: &[u8], width: u32, height: u32, stride: usize) -> anyhow::Result<RgbImage> {
    let row_bytes = width as usize * 2;
    if width == 0
        || height == 0
        || width % 2 != 0
        || data.len() < stride * (height as usize - 1) + row_bytes
    {
        return Err(anyhow!(
            "short YUYV frame: {} bytes for {}x{}",
            data.len(),
            width,
            height
        ));
    }

    let mut out = RgbImage::new(width, height);
    for y in 0..height as usize {
        let row = &data[y * stride..y * stride + row_bytes];
        for (pair, chunk) in row.chunks_exact(4).enumerate() {
            let (y0, u, y1, v) = (chunk[0], chunk[1], chunk[2], chunk[3]);
            let x = pair as u32 * 2;
            out.put_pixel(x, y as u32, image::Rgb(yuv_to_rgb(y0, u, v)));
            out.put_pixel(x + 1, y as u32, image::Rgb(yuv_to_rgb(y1, u, v)));
        }
    }
    Ok(out)
}

fn yuv_to_rgb(y: u8, u: u8, v: u8) -> [u8; 3] {
    let y = y as f32;
    let u = u as f32 - 128.0;
    let v = v as f32 - 128.0;
    let clamp = |c: f32| c.round().clamp(0.0, 255.0) as u8;
    [
        clamp(y + 1.402 * v),
        clamp(y - 0.344_136 * u - 0.714_136 * v),
        clamp(y + 1.772 * u),
    ]
}

fn packed_rgb(data: &[u8], width: u32, height: u32, stride: usize) -> anyhow::Result<RgbImage> {
    let row_bytes = width as usize * 3;
    if width == 0 || height == 0 || data.len() < stride * (height as usize - 1) + row_bytes
    {
        return Err(anyhow!(
            "short RGB3 frame: {} bytes for {}x{}",
            data.len(),
            width,
            height
        ));
    }

    let mut pixels = Vec::with_capacity(row_bytes * height as usize);
    for y in 0..height as usize {
        pixels.extend_from_slice(&data[y * stride..y * stride + row_bytes]);
    }
    RgbImage::from_raw(width, height, pixels).ok_or_else(|| anyhow!("RGB3 buffer size mismatch"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::codecs::jpeg::JpegEncoder;
    use image::Rgb;

    #[test]
    fn neutral_yuyv_is_grey() {
        // Two pixels per chunk, no chroma.
        let data = [100, 128, 200, 128, 0, 128, 255, 128];
        let frame = yuyv_to_rgb(&data, 2, 2, 4).unwrap();

        assert_eq!(frame.get_pixel(0, 0), &Rgb([100, 100, 100]));
        assert_eq!(frame.get_pixel(1, 0), &Rgb([200, 200, 200]));
        assert_eq!(frame.get_pixel(0, 1), &Rgb([0, 0, 0]));
        assert_eq!(frame.get_pixel(1, 1), &Rgb([255, 255, 255]));
    }

    #[test]
    fn yuyv_chroma_shifts_channels() {
        // Strong V pushes red up and green down.
        let frame = yuyv_to_rgb(&[128, 128, 128, 200], 2, 1, 4).unwrap();
        let px = frame.get_pixel(0, 0).0;
        assert!(px[0] > 200);
        assert!(px[1] < 100);
        assert_eq!(px[2], 128);
    }

    #[test]
    fn yuyv_honours_stride_padding() {
        let data = [50, 128, 50, 128, 9, 9, 60, 128, 60, 128, 9, 9];
        let frame = yuyv_to_rgb(&data, 2, 2, 6).unwrap();
        assert_eq!(frame.get_pixel(1, 1), &Rgb([60, 60, 60]));
    }

    #[test]
    fn short_buffers_are_rejected() {
        assert!(yuyv_to_rgb(&[0; 6], 2, 2, 4).is_err());
        assert!(packed_rgb(&[0; 11], 2, 2, 6).is_err());
    }

    #[test]
    fn rgb3_rows_are_unpadded() {
        let data = [1, 2, 3, 4, 5, 6, 0, 0, 7, 8, 9, 10, 11, 12, 0, 0];
        let frame = packed_rgb(&data, 2, 2, 8).unwrap();
        assert_eq!(frame.get_pixel(1, 0), &Rgb([4, 5, 6]));
        assert_eq!(frame.get_pixel(0, 1), &Rgb([7, 8, 9]));
    }

    #[test]
    fn mjpg_frames_decode_at_full_size() {
        let source = RgbImage::from_pixel(32, 16, Rgb([120, 80, 40]));
        let mut jpeg = Vec::new();
        JpegEncoder::new_with_quality(&mut jpeg, 95)
            .encode_image(&source)
            .unwrap();

        let frame = PixelLayout::Mjpg.decode(&jpeg, 32, 16).unwrap();
        assert_eq!(frame.dimensions(), (32, 16));
        let px = frame.get_pixel(10, 8).0;
        assert!((px[0] as i32 - 120).abs() <= 3);

        assert!(PixelLayout::Mjpg.decode(&[0xFF, 0xD8, 0x00], 32, 16).is_err());
    }

    #[tokio::test]
    async fn missing_device_fails_to_open() {
        let config = CameraConfig {
            device: "/dev/video-does-not-exist".to_string(),
            ..CameraConfig::default()
        };
        let err = V4lCamera::open(&config).await.err().unwrap();
        assert!(matches!(err, DaqError::Capture(_)));
        assert!(err.to_string().contains("video-does-not-exist"));
    }
}
