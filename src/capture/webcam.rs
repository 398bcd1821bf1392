use super::CaptureSource;
use anyhow::{anyhow, Context, Result};
use nokhwa::pixel_format::RgbAFormat;
use nokhwa::utils::{
    CameraFormat, CameraIndex, FrameFormat, RequestedFormat, RequestedFormatType, Resolution,
};
use nokhwa::Camera;

use crate::imaging::Frame;

/// Stream formats asked for, in order of preference.
fn target_formats(width: u32, height: u32, fps: u32) -> [CameraFormat; 2] {
    [FrameFormat::MJPEG, FrameFormat::YUYV]
        .map(|format| CameraFormat::new(Resolution::new(width, height), format, fps))
}

/// Formats to try, closest to the configured capture size first.
fn requested_formats(width: u32, height: u32, fps: u32) -> [RequestedFormat<'static>; 3] {
    let [mjpeg, yuyv] = target_formats(width, height, fps);
    let closest = |format| RequestedFormat::new::<RgbAFormat>(RequestedFormatType::Closest(format));
    [
        closest(mjpeg),
        closest(yuyv),
        RequestedFormat::new::<RgbAFormat>(RequestedFormatType::AbsoluteHighestFrameRate),
    ]
}

/// nokhwa webcam decoded to RGBA at whatever size the driver negotiated.
pub struct WebcamCapture {
    camera: Camera,
    resolution: (u32, u32),
}

impl WebcamCapture {
    pub fn new(device_index: u32, width: u32, height: u32, fps: u32) -> Result<Self> {
        tracing::info!(
            "Initializing webcam {} near {}x{} @ {}fps",
            device_index,
            width,
            height,
            fps
        );

        let mut last_err = None;
        for requested in requested_formats(width, height, fps) {
            let opened = Camera::new(CameraIndex::Index(device_index), requested)
                .and_then(|mut camera| camera.open_stream().map(|()| camera));
            match opened {
                Ok(camera) => {
                    let negotiated = camera.camera_format();
                    let resolution = (negotiated.width(), negotiated.height());
                    if resolution != (width, height) {
                        tracing::warn!(
                            "Webcam offered {}x{} instead of {}x{}",
                            resolution.0,
                            resolution.1,
                            width,
                            height
                        );
                    }
                    tracing::info!("Webcam streaming {}", negotiated);
                    return Ok(Self { camera, resolution });
                }
                Err(err) => {
                    tracing::debug!("Webcam rejected format request: {err}");
                    last_err = Some(err);
                }
            }
        }

        Err(match last_err {
            Some(err) => anyhow!(err).context("Failed to open camera stream"),
            None => anyhow!("camera offered no usable format"),
        })
    }
}

impl CaptureSource for WebcamCapture {
    fn capture_frame(&mut self) -> Result<Frame> {
        let buffer = self.camera.frame().context("Failed to capture frame")?;
        buffer
            .decode_image::<RgbAFormat>()
            .context("Failed to decode frame")
    }

    fn resolution(&self) -> (u32, u32) {
        self.resolution
    }
}

impl Drop for WebcamCapture {
    fn drop(&mut self) {
        if let Err(err) = self.camera.stop_stream() {
            tracing::warn!("Failed to stop camera stream: {err}");
        }
    }
}
