//! Capture state machine driven against the simulated camera.

#![cfg(feature = "mock")]

use flipro_capture::sim::{frame_number_of, SimFault, SimulatedCamera};
use flipro_capture::{CaptureError, CaptureSession, CaptureState, ControllerSettings};
use flipro_core::settings::{Binning, ExposureSettings, TriggerMode, TriggerType};
use flipro_core::{DeviceError, LogContext};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const TIMEOUT: Duration = Duration::from_secs(10);

fn open(camera: &Arc<SimulatedCamera>, exposure: Duration) -> CaptureSession {
    let mut session = CaptureSession::open(
        camera.clone(),
        ControllerSettings::default(),
        LogContext::disabled(),
    )
    .unwrap();
    session.set_exposure(ExposureSettings::new(exposure)).unwrap();
    session.configure().unwrap();
    session
}

fn small_camera() -> Arc<SimulatedCamera> {
    Arc::new(SimulatedCamera::builder().sensor(64, 48).build())
}

fn wait_for_state(session: &CaptureSession, state: CaptureState) {
    let deadline = Instant::now() + TIMEOUT;
    while session.state() != state {
        assert!(Instant::now() < deadline, "never reached {state}");
        thread::sleep(Duration::from_millis(2));
    }
}

#[test]
fn test_bounded_sequence_then_invalid_state() {
    let camera = small_camera();
    let session = open(&camera, Duration::from_millis(5));
    let mut raw = vec![0u8; session.frame_size().unwrap()];

    session.capture_start(3).unwrap();
    for expected in 0..3 {
        let received = session.get_video_frame(&mut raw, TIMEOUT).unwrap();
        assert_eq!(received, raw.len());
        assert_eq!(frame_number_of(&raw), Some(expected));
    }
    assert_eq!(session.state(), CaptureState::Idle);

    let err = session.get_video_frame(&mut raw, TIMEOUT).unwrap_err();
    assert_eq!(
        err,
        CaptureError::InvalidState {
            operation: "GetVideoFrame",
            state: CaptureState::Idle,
        }
    );
    session.capture_stop().unwrap();
}

#[test]
fn test_abort_from_other_thread_interrupts_retrieval() {
    let camera = small_camera();
    let session = open(&camera, Duration::from_secs(5));
    let mut raw = vec![0u8; session.frame_size().unwrap()];
    session.capture_start(0).unwrap();

    let controller = Arc::clone(session.controller());
    let aborter = thread::spawn(move || {
        let deadline = Instant::now() + TIMEOUT;
        while controller.state() != CaptureState::Exposing && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(2));
        }
        controller.capture_abort()
    });

    let started = Instant::now();
    let err = session.get_video_frame(&mut raw, TIMEOUT).unwrap_err();
    aborter.join().unwrap().unwrap();

    assert_eq!(err, CaptureError::Aborted);
    assert!(started.elapsed() < Duration::from_secs(4));
    assert_eq!(session.state(), CaptureState::Aborted);

    // After restart the aborted exposure is gone; ending early delivers the next one
    session.capture_start(1).unwrap();
    session.capture_end().unwrap();
    assert_eq!(session.state(), CaptureState::FrameReady);
    let started = Instant::now();
    session.get_video_frame(&mut raw, TIMEOUT).unwrap();
    assert!(started.elapsed() < Duration::from_secs(4));
    assert_eq!(frame_number_of(&raw), Some(1));
    session.capture_stop().unwrap();
}

#[test]
fn test_end_from_other_thread_completes_retrieval() {
    let camera = small_camera();
    let session = open(&camera, Duration::from_secs(5));
    let frame_bytes = session.frame_size().unwrap();
    let mut raw = vec![0u8; frame_bytes];
    session.capture_start(0).unwrap();

    let controller = Arc::clone(session.controller());
    let ender = thread::spawn(move || {
        let deadline = Instant::now() + TIMEOUT;
        while controller.state() != CaptureState::Exposing && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(2));
        }
        thread::sleep(Duration::from_millis(20));
        controller.capture_end()
    });

    let started = Instant::now();
    let received = session.get_video_frame(&mut raw, TIMEOUT).unwrap();
    ender.join().unwrap().unwrap();

    assert_eq!(received, frame_bytes);
    assert!(started.elapsed() < Duration::from_secs(4));
    assert_eq!(frame_number_of(&raw), Some(0));
    assert_eq!(session.state(), CaptureState::Armed);
    session.capture_stop().unwrap();
}

#[test]
fn test_timeout_keeps_state() {
    let camera = small_camera();
    let session = open(&camera, Duration::from_secs(5));
    let mut raw = vec![0u8; session.frame_size().unwrap()];
    session.capture_start(0).unwrap();

    let err = session
        .get_video_frame(&mut raw, Duration::from_millis(50))
        .unwrap_err();
    assert_eq!(err, CaptureError::Timeout { timeout_ms: 50 });
    assert_eq!(session.state(), CaptureState::Armed);
    assert_eq!(session.controller().frames_retrieved(), 0);

    session.capture_stop().unwrap();
    assert_eq!(session.state(), CaptureState::Idle);
}

#[test]
fn test_abort_requires_active_capture() {
    let camera = small_camera();
    let session = open(&camera, Duration::from_millis(5));
    assert!(matches!(
        session.capture_abort(),
        Err(CaptureError::InvalidState {
            state: CaptureState::Idle,
            ..
        })
    ));
    assert!(matches!(
        session.capture_end(),
        Err(CaptureError::InvalidState { .. })
    ));
}

#[test]
fn test_external_wait_forced_by_capture_start() {
    let camera = small_camera();
    let mut session = CaptureSession::open(
        camera.clone(),
        ControllerSettings::default(),
        LogContext::disabled(),
    )
    .unwrap();
    session
        .set_trigger(TriggerMode::External(TriggerType::RisingEdge))
        .unwrap();
    session
        .set_exposure(ExposureSettings::new(Duration::from_millis(5)))
        .unwrap();
    session.configure().unwrap();
    let mut raw = vec![0u8; session.frame_size().unwrap()];

    let controller = Arc::clone(session.controller());
    let forcer = thread::spawn(move || {
        let deadline = Instant::now() + TIMEOUT;
        while controller.state() != CaptureState::Exposing && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(2));
        }
        // Give the waiter time to enter its first poll slice
        thread::sleep(Duration::from_millis(20));
        controller.capture_start(1)
    });

    let received = session.get_video_frame_ext(&mut raw).unwrap();
    forcer.join().unwrap().unwrap();

    assert_eq!(received, raw.len());
    assert_eq!(camera.counters().triggers, 1);
    assert_eq!(session.state(), CaptureState::Idle);
    session.capture_stop().unwrap();
}

#[test]
fn test_external_wait_on_hardware_trigger() {
    let camera = small_camera();
    let mut session = CaptureSession::open(
        camera.clone(),
        ControllerSettings::default(),
        LogContext::disabled(),
    )
    .unwrap();
    session
        .set_trigger(TriggerMode::External(TriggerType::FallingEdge))
        .unwrap();
    session.configure().unwrap();
    let mut raw = vec![0u8; session.frame_size().unwrap()];

    let trigger = Arc::clone(&camera);
    let pulse = thread::spawn(move || {
        thread::sleep(Duration::from_millis(100));
        trigger.fire_external_trigger();
    });

    session.capture_start(1).unwrap();
    let received = session.get_video_frame_ext(&mut raw).unwrap();
    pulse.join().unwrap();
    assert_eq!(received, raw.len());
    session.capture_stop().unwrap();
}

#[test]
fn test_sequence_calls_from_other_thread_rejected() {
    let camera = small_camera();
    let session = Arc::new(open(&camera, Duration::from_millis(5)));
    let frame_size = session.frame_size().unwrap();
    session.capture_start(0).unwrap();

    let intruder = Arc::clone(&session);
    let (frame, stop) = thread::spawn(move || {
        let mut raw = vec![0u8; frame_size];
        (
            intruder.get_video_frame(&mut raw, TIMEOUT),
            intruder.capture_stop(),
        )
    })
    .join()
    .unwrap();

    assert_eq!(
        frame.unwrap_err(),
        CaptureError::WrongThread {
            operation: "GetVideoFrame"
        }
    );
    assert_eq!(
        stop.unwrap_err(),
        CaptureError::WrongThread {
            operation: "CaptureStop"
        }
    );
    assert_eq!(session.state(), CaptureState::Armed);
    session.capture_stop().unwrap();
}

#[test]
fn test_buffer_too_small() {
    let camera = small_camera();
    let session = open(&camera, Duration::from_millis(5));
    let required = session.frame_size().unwrap();
    let mut raw = vec![0u8; required - 1];
    session.capture_start(1).unwrap();

    let err = session.get_video_frame(&mut raw, TIMEOUT).unwrap_err();
    assert_eq!(
        err,
        CaptureError::BufferTooSmall {
            required,
            provided: required - 1,
        }
    );
    assert_eq!(session.state(), CaptureState::Armed);
    session.capture_stop().unwrap();
}

#[test]
fn test_settings_locked_while_capturing() {
    let camera = small_camera();
    let mut session = open(&camera, Duration::from_millis(5));
    session.capture_start(0).unwrap();

    let err = session.set_binning(Binning::new(2, 2)).unwrap_err();
    assert_eq!(
        err,
        CaptureError::InvalidState {
            operation: "SetBinning",
            state: CaptureState::Armed,
        }
    );
    assert!(session.configure().is_err());

    session.capture_stop().unwrap();
    session.set_binning(Binning::new(2, 2)).unwrap();
    assert_eq!(
        session.frame_size().unwrap_err(),
        CaptureError::GeometryNotConfigured
    );
    assert_eq!(
        session.capture_start(1).unwrap_err(),
        CaptureError::GeometryNotConfigured
    );

    let geometry = session.configure().unwrap();
    assert_eq!((geometry.width(), geometry.height()), (32, 24));
}

#[test]
fn test_short_transfer_reported() {
    let camera = small_camera();
    let session = open(&camera, Duration::from_millis(5));
    let mut raw = vec![0u8; session.frame_size().unwrap()];
    camera.inject_fault(SimFault::ShortRead);
    session.capture_start(0).unwrap();

    let err = session.get_video_frame(&mut raw, TIMEOUT).unwrap_err();
    assert_eq!(
        err,
        CaptureError::Transport(DeviceError::ShortTransfer {
            expected: raw.len(),
            received: raw.len() / 2,
        })
    );
    assert_eq!(session.state(), CaptureState::Armed);

    // The next frame arrives intact
    session.get_video_frame(&mut raw, TIMEOUT).unwrap();
    session.capture_stop().unwrap();
}

#[test]
fn test_link_error_maps_to_transport() {
    let camera = small_camera();
    let session = open(&camera, Duration::from_millis(5));
    let mut raw = vec![0u8; session.frame_size().unwrap()];
    camera.inject_fault(SimFault::Error(DeviceError::Link("endpoint stall".into())));
    session.capture_start(0).unwrap();

    let err = session.get_video_frame(&mut raw, TIMEOUT).unwrap_err();
    assert!(matches!(err, CaptureError::Transport(DeviceError::Link(_))));
    session.capture_stop().unwrap();
}

#[test]
fn test_disconnected_camera() {
    let camera = small_camera();
    let session = open(&camera, Duration::from_millis(5));
    let mut raw = vec![0u8; session.frame_size().unwrap()];
    camera.set_connected(false);

    assert_eq!(session.capture_start(1).unwrap_err(), CaptureError::NotConnected);
    assert_eq!(
        session.get_video_frame(&mut raw, TIMEOUT).unwrap_err(),
        CaptureError::NotConnected
    );
    assert_eq!(session.is_available().unwrap_err(), CaptureError::NotConnected);
}

#[test]
fn test_stop_without_capture_leaves_device_alone() {
    let camera = small_camera();
    let session = open(&camera, Duration::from_millis(5));
    session.capture_stop().unwrap();
    session.capture_stop().unwrap();
    assert_eq!(camera.counters().stops, 0);

    session.capture_start(1).unwrap();
    session.capture_stop().unwrap();
    assert_eq!(camera.counters().stops, 1);
}

#[test]
fn test_is_available_after_end() {
    let camera = small_camera();
    let session = open(&camera, Duration::from_secs(5));
    session.capture_start(1).unwrap();
    assert!(!session.is_available().unwrap());
    session.capture_end().unwrap();
    assert!(session.is_available().unwrap());
    session.capture_stop().unwrap();
}
