//! Capture service
//!
//! Owns the camera for the lifetime of the station and turns "the sample is in
//! front of the lens" into a cropped raw frame plus its enhanced counterpart.
//!
//! # Capture sequence
//!
//! 1. Wait for autofocus to settle
//! 2. Discard `warmup_frames` frames while auto-exposure converges
//! 3. Keep the next frame
//! 4. Crop (if enabled), then enhance (if enabled)
//!
//! Every camera read is bounded by `camera.frame_timeout_ms`; a device that never
//! yields a frame surfaces as [`DaqError::Capture`], never a hang.

use super::enhance::{enhance, EnhanceParams};
use super::{crop, CropRect};
use crate::config::Settings;
use crate::error::{AppResult, DaqError};
use crate::hardware::FrameSource;
use image::RgbImage;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument};

/// Images produced by one capture.
///
/// Frames are shared and immutable once produced.
#[derive(Debug, Clone)]
pub struct CaptureResult {
    /// Stable frame after cropping
    pub raw: Arc<RgbImage>,
    /// Enhanced copy of `raw`, if enhancement is enabled
    pub enhanced: Option<Arc<RgbImage>>,
    /// Resolution asked of the camera
    pub requested: (u32, u32),
    /// Resolution the camera actually delivered (before cropping)
    pub actual: (u32, u32),
}

/// Warm-up aware frame acquisition plus post-processing.
pub struct CaptureService {
    camera: Box<dyn FrameSource>,
    settings: Arc<Settings>,
    params: EnhanceParams,
}

impl CaptureService {
    /// Wrap `camera`; enhancement parameters are fixed from `settings` here.
    pub fn new(camera: Box<dyn FrameSource>, settings: Arc<Settings>) -> Self {
        let params = EnhanceParams::from(&settings.enhance);
        Self {
            camera,
            settings,
            params,
        }
    }

    /// Discard `warmup_count` frames, then return the next one.
    ///
    /// Warm-up reads that fail are ignored; only the kept frame must succeed.
    pub async fn acquire_stable_frame(&mut self, warmup_count: u32) -> AppResult<RgbImage> {
        let timeout = self.settings.camera.frame_timeout();

        for index in 0..warmup_count {
            if let Err(e) = self.read_bounded(timeout).await {
                debug!(index, "Warm-up frame failed: {}", e);
            }
        }

        self.read_bounded(timeout).await
    }

    async fn read_bounded(&mut self, timeout: Duration) -> AppResult<RgbImage> {
        match tokio::time::timeout(timeout, self.camera.read_frame()).await {
            Err(_) => Err(DaqError::Capture(format!(
                "camera yielded no frame within {:?}",
                timeout
            ))),
            Ok(Err(e)) => Err(DaqError::Capture(e.to_string())),
            Ok(Ok(frame)) if frame.width() == 0 || frame.height() == 0 => {
                Err(DaqError::Capture("camera yielded an empty frame".to_string()))
            }
            Ok(Ok(frame)) => Ok(frame),
        }
    }

    /// Apply the configured enhancement to a frame.
    pub fn enhance(&self, frame: &RgbImage) -> RgbImage {
        enhance(frame, &self.params)
    }

    /// Crop a frame to `rect`; see [`crop`](super::crop).
    pub fn crop(&self, frame: RgbImage, rect: &CropRect) -> RgbImage {
        crop(frame, rect)
    }

    /// Run the full capture sequence.
    #[instrument(skip(self))]
    pub async fn capture(&mut self) -> AppResult<CaptureResult> {
        let settings = Arc::clone(&self.settings);
        tokio::time::sleep(settings.camera.focus_settle()).await;

        let frame = self.acquire_stable_frame(settings.camera.warmup_frames).await?;
        let requested = self.camera.requested_resolution();
        let actual = frame.dimensions();
        if actual != requested {
            info!(
                requested = ?requested,
                actual = ?actual,
                "Camera delivered a different resolution than requested"
            );
        }

        let frame = match settings.crop.rect() {
            Some(rect) => self.crop(frame, &rect),
            None => frame,
        };
        let raw = Arc::new(frame);

        let enhanced = if settings.enhance.enabled {
            let source = Arc::clone(&raw);
            let params = self.params;
            let out = tokio::task::spawn_blocking(move || enhance(&source, &params))
                .await
                .map_err(|e| DaqError::Capture(format!("enhancement task failed: {e}")))?;
            Some(Arc::new(out))
        } else {
            None
        };

        debug!(
            width = raw.width(),
            height = raw.height(),
            enhanced = enhanced.is_some(),
            "Capture complete"
        );

        Ok(CaptureResult {
            raw,
            enhanced,
            requested,
            actual,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::mock::MockCamera;
    use anyhow::anyhow;
    use async_trait::async_trait;
    use image::Rgb;

    fn settings(configure: impl FnOnce(&mut Settings)) -> Arc<Settings> {
        let mut settings = Settings::default();
        settings.camera.focus_settle_ms = 10;
        settings.camera.frame_timeout_ms = 500;
        configure(&mut settings);
        Arc::new(settings)
    }

    /// Fails the first `failures` reads, then counts frames in the red channel.
    struct FlakyCamera {
        failures: u32,
        delivered: u8,
    }

    #[async_trait]
    impl FrameSource for FlakyCamera {
        fn requested_resolution(&self) -> (u32, u32) {
            (4, 4)
        }

        async fn read_frame(&mut self) -> anyhow::Result<RgbImage> {
            if self.failures > 0 {
                self.failures -= 1;
                return Err(anyhow!("not ready"));
            }
            self.delivered += 1;
            Ok(RgbImage::from_pixel(4, 4, Rgb([self.delivered, 0, 0])))
        }
    }

    #[tokio::test]
    async fn warmup_frames_are_discarded() {
        let camera = FlakyCamera { failures: 0, delivered: 0 };
        let mut service = CaptureService::new(Box::new(camera), settings(|_| {}));

        let frame = service.acquire_stable_frame(5).await.unwrap();
        assert_eq!(frame.get_pixel(0, 0).0[0], 6);
    }

    #[tokio::test]
    async fn failed_warmup_reads_are_tolerated() {
        let camera = FlakyCamera { failures: 3, delivered: 0 };
        let mut service = CaptureService::new(Box::new(camera), settings(|_| {}));

        let frame = service.acquire_stable_frame(3).await.unwrap();
        assert_eq!(frame.get_pixel(0, 0).0[0], 1);
    }

    #[tokio::test]
    async fn disconnected_camera_is_capture_error() {
        let camera = MockCamera::new(64, 48).disconnected();
        let mut service = CaptureService::new(Box::new(camera), settings(|_| {}));

        let err = service.capture().await.unwrap_err();
        assert!(matches!(err, DaqError::Capture(_)));
        assert!(!err.is_fatal());
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_camera_times_out() {
        let camera = MockCamera::new(64, 48).stalled();
        let mut service = CaptureService::new(Box::new(camera), settings(|s| {
            s.camera.warmup_frames = 2;
        }));

        let err = service.capture().await.unwrap_err();
        assert!(matches!(err, DaqError::Capture(_)));
    }

    #[tokio::test]
    async fn capture_reports_negotiated_resolution_and_crops() {
        let camera = MockCamera::new(320, 240).with_native_resolution(160, 120);
        let mut service = CaptureService::new(
            Box::new(camera),
            settings(|s| {
                s.camera.warmup_frames = 1;
                s.crop.enabled = true;
                s.crop.x = 20;
                s.crop.y = 10;
                s.crop.width = 100;
                s.crop.height = 500;
            }),
        );

        let result = service.capture().await.unwrap();
        assert_eq!(result.requested, (320, 240));
        assert_eq!(result.actual, (160, 120));
        assert_eq!(result.raw.dimensions(), (100, 110));

        let enhanced = result.enhanced.expect("enhancement enabled by default");
        assert_eq!(enhanced.dimensions(), result.raw.dimensions());
    }

    #[tokio::test]
    async fn enhancement_can_be_disabled() {
        let camera = MockCamera::new(32, 24);
        let mut service = CaptureService::new(
            Box::new(camera),
            settings(|s| {
                s.camera.warmup_frames = 0;
                s.enhance.enabled = false;
            }),
        );

        let result = service.capture().await.unwrap();
        assert!(result.enhanced.is_none());
        assert_eq!(result.raw.dimensions(), (32, 24));
    }

    #[test]
    fn service_enhance_uses_configured_params() {
        let settings = settings(|s| s.enhance.sharpen_center = 1.0);
        let service = CaptureService::new(Box::new(MockCamera::new(8, 8)), Arc::clone(&settings));
        let frame = RgbImage::from_fn(16, 12, |x, y| Rgb([(x * 15) as u8, (y * 20) as u8, 90]));

        let expected = enhance(&frame, &EnhanceParams::from(&settings.enhance));
        assert_eq!(service.enhance(&frame), expected);
    }
}
