use super::platform::{AutoFocusMode, RequestTemplate, SurfaceKind};
use super::*;
use crate::config::CameraConfig;
use crate::error::CameraError;
use crate::frame::CapturedImage;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(5);

fn create_test_camera_config() -> CameraConfig {
    CameraConfig {
        platform: "synthetic".to_string(),
        device: None,
        image_resolution: (64, 48),
        preview_resolution: (16, 12),
        max_images: 2,
        preview_fps: 30,
    }
}

fn create_test_platform(capture_latency: Duration) -> SyntheticCamera {
    SyntheticCamera::new(SyntheticCameraConfig {
        device_ids: vec!["0".to_string(), "1".to_string()],
        jpeg_sizes: vec![(64, 48)],
        preview_interval: Duration::from_millis(5),
        capture_latency,
    })
}

async fn open_camera(
    platform: &SyntheticCamera,
    config: &CameraConfig,
) -> (CameraHandle, mpsc::UnboundedReceiver<CapturedImage>) {
    let (sink, images) = mpsc::unbounded_channel();
    let camera = CameraHandle::open(Arc::new(platform.clone()), config, sink, None)
        .await
        .unwrap();
    (camera, images)
}

#[tokio::test]
async fn test_open_starts_one_device_and_two_contexts() {
    let platform = create_test_platform(Duration::from_millis(10));
    let (camera, _images) = open_camera(&platform, &create_test_camera_config()).await;

    camera
        .wait_for_state(CameraState::Previewing, WAIT)
        .await
        .unwrap();
    assert_eq!(camera.device_id(), "0");
    assert_eq!(camera.background_contexts(), 2);
    assert_eq!(platform.open_device_count(), 1);

    camera.close().await;
    assert_eq!(camera.state(), CameraState::Closed);
    assert_eq!(camera.background_contexts(), 0);
    assert_eq!(platform.open_device_count(), 0);
    assert!(camera.image_pool().is_closed());

    // Closing again is a no-op
    camera.close().await;
    assert_eq!(camera.background_contexts(), 0);
    assert_eq!(platform.devices_opened(), 1);
}

#[tokio::test]
async fn test_open_selects_configured_device() {
    let platform = create_test_platform(Duration::from_millis(10));
    let mut config = create_test_camera_config();
    config.device = Some("1".to_string());

    let (camera, _images) = open_camera(&platform, &config).await;
    assert_eq!(camera.device_id(), "1");
    camera.close().await;
}

#[tokio::test]
async fn test_open_without_devices_fails() {
    let (sink, _images) = mpsc::unbounded_channel();
    let result = CameraHandle::open(
        Arc::new(SyntheticCamera::without_devices()),
        &create_test_camera_config(),
        sink,
        None,
    )
    .await;

    assert!(matches!(
        result,
        Err(CameraError::DeviceUnavailable { selector: None })
    ));
}

#[tokio::test]
async fn test_open_unknown_selector_fails() {
    let platform = create_test_platform(Duration::from_millis(10));
    let mut config = create_test_camera_config();
    config.device = Some("usb-9".to_string());
    let (sink, _images) = mpsc::unbounded_channel();

    let result = CameraHandle::open(Arc::new(platform.clone()), &config, sink, None).await;
    match result {
        Err(CameraError::DeviceUnavailable { selector }) => {
            assert_eq!(selector.as_deref(), Some("usb-9"))
        }
        Err(e) => panic!("Unexpected error: {}", e),
        Ok(_) => panic!("Expected open to fail"),
    }
    assert_eq!(platform.open_device_count(), 0);
}

#[tokio::test]
async fn test_capture_without_session_is_not_ready() {
    let platform = create_test_platform(Duration::from_millis(10));
    platform.fail_next_session();
    let (camera, mut images) = open_camera(&platform, &create_test_camera_config()).await;

    camera.wait_for_state(CameraState::Open, WAIT).await.unwrap();
    // Session failure is not retried
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(camera.state(), CameraState::Open);

    assert_eq!(camera.capture().await, Err(CameraError::NotReady));
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(images.try_recv().is_err());
    assert_eq!(platform.stills_delivered(), 0);

    camera.close().await;
}

#[tokio::test]
async fn test_capture_after_close_is_not_ready() {
    let platform = create_test_platform(Duration::from_millis(10));
    let (camera, _images) = open_camera(&platform, &create_test_camera_config()).await;
    camera.close().await;

    assert_eq!(camera.capture().await, Err(CameraError::NotReady));
}

#[tokio::test]
async fn test_captured_bytes_match_platform_buffer() {
    let platform = create_test_platform(Duration::from_millis(10));
    let (camera, mut images) = open_camera(&platform, &create_test_camera_config()).await;
    camera
        .wait_for_state(CameraState::Previewing, WAIT)
        .await
        .unwrap();

    let request_id = camera.capture().await.unwrap();
    let image = timeout(WAIT, images.recv()).await.unwrap().unwrap();

    let expected = encode_still(64, 48, request_id).unwrap();
    assert_eq!(image.capture_id, request_id);
    assert_eq!(image.len(), expected.len());
    assert_eq!(image.bytes(), expected.as_slice());
    assert!(image.is_jpeg());

    // The platform buffer went back to the pool once copied
    assert_eq!(camera.image_pool().available(), 2);

    camera.close().await;
}

#[tokio::test]
async fn test_preview_resumes_only_after_capture_completes() {
    let platform = create_test_platform(Duration::from_millis(30));
    let (camera, mut images) = open_camera(&platform, &create_test_camera_config()).await;
    camera
        .wait_for_state(CameraState::Previewing, WAIT)
        .await
        .unwrap();

    for _ in 0..3 {
        camera.capture().await.unwrap();
        assert_eq!(camera.state(), CameraState::Capturing);

        timeout(WAIT, images.recv()).await.unwrap().unwrap();
        camera
            .wait_for_state(CameraState::Previewing, WAIT)
            .await
            .unwrap();
    }

    let frames = camera.preview().frame_count();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(camera.preview().frame_count() > frames);

    let stats = camera.stats();
    assert_eq!(stats.captures_requested, 3);
    assert_eq!(stats.captures_completed, 3);
    assert_eq!(stats.preview_starts, 4);
    assert_eq!(stats.images_delivered, 3);
    assert_eq!(platform.overlap_violations(), 0);

    camera.close().await;
}

#[tokio::test]
async fn test_requests_disable_autofocus_and_target_one_surface() {
    let platform = create_test_platform(Duration::from_millis(10));
    let (camera, mut images) = open_camera(&platform, &create_test_camera_config()).await;
    camera
        .wait_for_state(CameraState::Previewing, WAIT)
        .await
        .unwrap();
    assert_eq!(
        platform.session_surfaces(),
        vec![SurfaceKind::Preview, SurfaceKind::ImageReader]
    );

    let still_id = camera.capture().await.unwrap();
    timeout(WAIT, images.recv()).await.unwrap().unwrap();
    camera
        .wait_for_state(CameraState::Previewing, WAIT)
        .await
        .unwrap();

    let requests = platform.requests();
    let templates: Vec<RequestTemplate> = requests.iter().map(|r| r.template).collect();
    assert_eq!(
        templates,
        vec![
            RequestTemplate::Preview,
            RequestTemplate::StillCapture,
            RequestTemplate::Preview
        ]
    );
    for request in &requests {
        assert_eq!(request.auto_focus, AutoFocusMode::Off);
        match request.template {
            RequestTemplate::Preview => {
                assert_eq!(request.targets, vec![SurfaceKind::Preview]);
                assert_eq!(request.resolution, (16, 12));
            }
            RequestTemplate::StillCapture => {
                assert_eq!(request.id, still_id);
                assert_eq!(request.targets, vec![SurfaceKind::ImageReader]);
                assert_eq!(request.resolution, (64, 48));
            }
        }
    }

    camera.close().await;
}

#[tokio::test]
async fn test_session_failure_after_capture_is_not_retried() {
    let platform = create_test_platform(Duration::from_millis(100));
    let (camera, mut images) = open_camera(&platform, &create_test_camera_config()).await;
    camera
        .wait_for_state(CameraState::Previewing, WAIT)
        .await
        .unwrap();

    camera.capture().await.unwrap();
    platform.fail_next_session();
    timeout(WAIT, images.recv()).await.unwrap().unwrap();

    camera.wait_for_state(CameraState::Open, WAIT).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(camera.state(), CameraState::Open);
    assert_eq!(platform.sessions_created(), 2);
    assert_eq!(camera.stats().preview_starts, 1);

    assert_eq!(camera.capture().await, Err(CameraError::NotReady));
    assert_eq!(platform.stills_delivered(), 1);

    camera.close().await;
}

#[tokio::test]
async fn test_second_capture_while_in_flight_is_busy() {
    let platform = create_test_platform(Duration::from_millis(300));
    let (camera, mut images) = open_camera(&platform, &create_test_camera_config()).await;
    camera
        .wait_for_state(CameraState::Previewing, WAIT)
        .await
        .unwrap();

    camera.capture().await.unwrap();
    assert_eq!(camera.capture().await, Err(CameraError::Busy));

    timeout(WAIT, images.recv()).await.unwrap().unwrap();
    camera
        .wait_for_state(CameraState::Previewing, WAIT)
        .await
        .unwrap();
    assert!(images.try_recv().is_err());
    assert_eq!(platform.stills_delivered(), 1);

    camera.close().await;
}

#[tokio::test]
async fn test_refused_capture_resumes_preview() {
    let platform = create_test_platform(Duration::from_millis(10));
    let (camera, mut images) = open_camera(&platform, &create_test_camera_config()).await;
    camera
        .wait_for_state(CameraState::Previewing, WAIT)
        .await
        .unwrap();

    platform.refuse_next_capture();
    let result = camera.capture().await;
    assert!(matches!(result, Err(CameraError::CaptureAccess { .. })));
    assert_eq!(camera.state(), CameraState::Previewing);
    assert_eq!(camera.stats().captures_failed, 1);

    let frames = camera.preview().frame_count();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(camera.preview().frame_count() > frames);
    assert!(images.try_recv().is_err());

    // The next capture goes through normally
    camera.capture().await.unwrap();
    timeout(WAIT, images.recv()).await.unwrap().unwrap();

    camera.close().await;
}

#[tokio::test]
async fn test_device_error_closes_camera() {
    let platform = create_test_platform(Duration::from_millis(10));
    let (camera, _images) = open_camera(&platform, &create_test_camera_config()).await;
    camera
        .wait_for_state(CameraState::Previewing, WAIT)
        .await
        .unwrap();

    platform.inject_device_error(4);
    camera.wait_for_state(CameraState::Closed, WAIT).await.unwrap();
    assert_eq!(platform.open_device_count(), 0);
    assert_eq!(camera.capture().await, Err(CameraError::NotReady));

    camera.close().await;
    assert_eq!(camera.background_contexts(), 0);
}

#[tokio::test]
async fn test_device_failures_are_published() {
    let platform = create_test_platform(Duration::from_millis(10));
    let event_bus = Arc::new(crate::events::EventBus::new(64));
    let mut errors = event_bus.subscribe_filtered(
        crate::events::EventFilter::EventTypes(vec!["system_error"]),
        "test",
    );
    let (sink, _images) = mpsc::unbounded_channel();
    let camera = CameraHandle::open(
        Arc::new(platform.clone()),
        &create_test_camera_config(),
        sink,
        Some(Arc::clone(&event_bus)),
    )
    .await
    .unwrap();
    camera
        .wait_for_state(CameraState::Previewing, WAIT)
        .await
        .unwrap();

    platform.inject_device_error(4);
    match timeout(WAIT, errors.recv()).await.unwrap().unwrap() {
        crate::events::CloudcamEvent::SystemError { component, error } => {
            assert_eq!(component, "camera");
            assert_eq!(error, CameraError::Device { code: 4 }.to_string());
        }
        other => panic!("Unexpected event: {:?}", other),
    }
    camera.wait_for_state(CameraState::Closed, WAIT).await.unwrap();

    camera.close().await;
}

#[tokio::test]
async fn test_disconnect_closes_camera() {
    let platform = create_test_platform(Duration::from_millis(10));
    let (camera, _images) = open_camera(&platform, &create_test_camera_config()).await;
    camera
        .wait_for_state(CameraState::Previewing, WAIT)
        .await
        .unwrap();

    platform.disconnect();
    camera.wait_for_state(CameraState::Closed, WAIT).await.unwrap();
    assert_eq!(platform.open_device_count(), 0);

    camera.close().await;
}

#[tokio::test]
async fn test_state_changes_are_published() {
    let platform = create_test_platform(Duration::from_millis(10));
    let event_bus = Arc::new(crate::events::EventBus::new(64));
    let mut receiver = event_bus.subscribe();
    let (sink, _images) = mpsc::unbounded_channel();

    let camera = CameraHandleBuilder::new()
        .config(create_test_camera_config())
        .platform(Arc::new(platform.clone()))
        .image_sink(sink)
        .event_bus(Arc::clone(&event_bus))
        .open()
        .await
        .unwrap();

    let mut seen = Vec::new();
    while !seen.contains(&CameraState::Previewing) {
        let event = timeout(WAIT, receiver.recv()).await.unwrap().unwrap();
        if let crate::events::CloudcamEvent::CameraStateChanged { state, .. } = event {
            seen.push(state);
        }
    }
    assert_eq!(seen, vec![CameraState::Open, CameraState::Previewing]);

    camera.close().await;
}

#[tokio::test]
async fn test_builder_requires_config() {
    let (sink, _images) = mpsc::unbounded_channel();
    let result = CameraHandleBuilder::new().image_sink(sink).open().await;

    match result {
        Err(crate::error::CloudcamError::System { message }) => {
            assert!(message.contains("Camera configuration must be specified"))
        }
        _ => panic!("Expected system error for missing configuration"),
    }
}

#[test]
fn test_unknown_platform_is_rejected() {
    let mut config = create_test_camera_config();
    config.platform = "v4l1".to_string();
    assert!(platform_from_config(&config).is_err());
}
