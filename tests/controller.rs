use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use backdrop_fx::capture::StillCapture;
use backdrop_fx::config::{PipelineConfig, SchedulerConfig};
use backdrop_fx::imaging::Frame;
use backdrop_fx::output::{DisplaySlot, DisplayWatch};
use backdrop_fx::readiness::{Fault, ModelStatus};
use backdrop_fx::segmentation::{self, ModelFactory, RawMask, SegmentationModel};
use backdrop_fx::Controller;
use image::{GrayImage, Luma, Rgba, RgbaImage};
use tokio::time::timeout;

const FOREGROUND: [u8; 4] = [200, 100, 50, 255];
const FALLBACK: [u8; 4] = [0xD3, 0xD3, 0xD3, 255];
const WAIT: Duration = Duration::from_secs(5);

/// Marks every pixel as background.
struct Transparent;

impl SegmentationModel for Transparent {
    fn segment(&mut self, _frame: &Frame) -> anyhow::Result<Option<RawMask>> {
        Ok(Some(RawMask::Alpha(GrayImage::from_pixel(2, 2, Luma([0])))))
    }

    fn input_size(&self) -> Option<(u32, u32)> {
        Some((2, 2))
    }
}

fn transparent_factory() -> ModelFactory {
    Arc::new(|| Ok(Box::new(Transparent) as Box<dyn SegmentationModel>))
}

fn config() -> PipelineConfig {
    PipelineConfig {
        scheduler: SchedulerConfig {
            tick_interval: Duration::from_millis(5),
            ..SchedulerConfig::default()
        },
        start_running: true,
        ..PipelineConfig::default()
    }
}

fn pipeline(config: PipelineConfig) -> (Controller, DisplayWatch) {
    let (display, watch) = DisplaySlot::new();
    (Controller::new(config, Box::new(display)), watch)
}

fn start_still_camera(controller: &mut Controller) {
    let frame = RgbaImage::from_pixel(8, 6, Rgba(FOREGROUND));
    controller.start_camera(move || Ok(StillCapture::from_frame(frame, Duration::from_millis(5))));
}

/// Wait until a presented frame's first pixel equals `pixel`.
async fn wait_for_pixel(display: &mut DisplayWatch, pixel: [u8; 4]) -> Arc<Frame> {
    timeout(WAIT, async {
        loop {
            let frame = display.next_frame().await.expect("display closed");
            if frame.get_pixel(0, 0).0 == pixel {
                break frame;
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("no frame with pixel {pixel:?} was presented"))
}

#[tokio::test]
async fn passthrough_presents_camera_frames() {
    let (mut controller, mut display) = pipeline(config());
    controller.start();
    controller
        .initialize_model(segmentation::passthrough_factory())
        .await
        .unwrap();
    start_still_camera(&mut controller);

    let frame = wait_for_pixel(&mut display, FOREGROUND).await;
    assert_eq!(frame.dimensions(), (8, 6));
    assert!(frame.pixels().all(|p| p.0 == FOREGROUND));
    assert!(controller.readiness().can_run());

    controller.shutdown().await;
    controller.shutdown().await;
    assert!(controller.service().is_none());
    assert_eq!(controller.readiness().snapshot().model, ModelStatus::Idle);
    assert!(!controller.readiness().can_run());
}

#[tokio::test]
async fn background_shows_where_mask_is_clear() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("backdrop.png");
    RgbaImage::from_pixel(16, 16, Rgba([10, 20, 30, 255]))
        .save(&path)
        .unwrap();

    let (mut controller, mut display) = pipeline(config());
    controller.start();
    controller.initialize_model(transparent_factory()).await.unwrap();
    controller.select_background(Some(path)).await.unwrap();
    assert!(controller.background().is_some());
    start_still_camera(&mut controller);

    let frame = wait_for_pixel(&mut display, [10, 20, 30, 255]).await;
    assert!(frame.pixels().all(|p| p.0 == [10, 20, 30, 255]));

    controller.select_background(None).await.unwrap();
    assert!(controller.background().is_none());
    wait_for_pixel(&mut display, FALLBACK).await;

    controller.shutdown().await;
}

#[tokio::test]
async fn unreadable_background_falls_back_to_grey() {
    let dir = tempfile::tempdir().unwrap();
    let (mut controller, mut display) = pipeline(PipelineConfig {
        background: Some(dir.path().join("missing.png")),
        ..config()
    });
    controller.start();
    controller.initialize_model(transparent_factory()).await.unwrap();
    start_still_camera(&mut controller);

    wait_for_pixel(&mut display, FALLBACK).await;
    assert!(controller.background().is_none());
    // a bad backdrop is not an initialization fault
    assert!(controller.readiness().snapshot().fault.is_none());

    controller.shutdown().await;
}

#[tokio::test]
async fn model_failure_is_surfaced_and_retryable() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&attempts);
    let factory: ModelFactory = Arc::new(move || {
        if counter.fetch_add(1, Ordering::SeqCst) == 0 {
            Err(anyhow!("weights not found"))
        } else {
            Ok(Box::new(Transparent) as Box<dyn SegmentationModel>)
        }
    });

    let (mut controller, _display) = pipeline(config());
    controller.start();

    assert!(controller.initialize_model(factory).await.is_err());
    let state = controller.readiness().snapshot();
    assert_eq!(state.model, ModelStatus::Error);
    assert!(matches!(state.fault, Some(Fault::ModelInit(ref msg)) if msg.contains("weights not found")));

    controller.retry_model().await.unwrap();
    let state = controller.readiness().snapshot();
    assert_eq!(state.model, ModelStatus::Ready);
    assert_eq!(state.fault, None);
    assert_eq!(attempts.load(Ordering::SeqCst), 2);

    controller.shutdown().await;
}

#[tokio::test]
async fn camera_failure_is_surfaced() {
    let (mut controller, display) = pipeline(config());
    controller.start();
    controller
        .initialize_model(segmentation::passthrough_factory())
        .await
        .unwrap();
    let mut status = controller.status();
    controller.start_camera(|| Err::<StillCapture, _>(anyhow!("permission denied")));

    let state = timeout(WAIT, status.wait_for(|state| state.fault.is_some()))
        .await
        .unwrap()
        .unwrap()
        .clone();
    assert!(matches!(state.fault, Some(Fault::CameraAccess(ref msg)) if msg.contains("permission denied")));
    assert!(!state.camera_ready);
    assert_eq!(display.presented(), 0);

    controller.shutdown().await;
}

#[tokio::test]
async fn pausing_stops_presentation() {
    let (mut controller, mut display) = pipeline(config());
    controller.start();
    controller
        .initialize_model(segmentation::passthrough_factory())
        .await
        .unwrap();
    start_still_camera(&mut controller);
    wait_for_pixel(&mut display, FOREGROUND).await;

    controller.set_running(false);
    tokio::time::sleep(Duration::from_millis(50)).await;
    let paused_at = display.presented();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(display.presented(), paused_at);

    assert!(controller.toggle_running());
    timeout(WAIT, async {
        while display.presented() <= paused_at {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("frames did not resume");

    controller.shutdown().await;
}
