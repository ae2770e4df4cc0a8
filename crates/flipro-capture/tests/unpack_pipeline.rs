//! Retrieve and unpack through a session, checked against the simulator's pattern.

#![cfg(feature = "mock")]

use flipro_capture::sim::{expected_pixel, SimulatedCamera, SIM_REFERENCE_LEVEL};
use flipro_capture::{
    CaptureSession, ControllerSettings, PlaneKind, PlaneRequest, StatsRequest, UnpackedImageSet,
    UnpackedStats,
};
use flipro_core::settings::{ExposureSettings, ImageArea, PixelConfig, SamplesPerPixel};
use flipro_core::LogContext;
use std::sync::Arc;
use std::time::Duration;

const TIMEOUT: Duration = Duration::from_secs(10);

fn open(camera: SimulatedCamera) -> CaptureSession {
    let mut session = CaptureSession::open(
        Arc::new(camera),
        ControllerSettings::default(),
        LogContext::disabled(),
    )
    .unwrap();
    session
        .set_exposure(ExposureSettings::new(Duration::from_millis(2)))
        .unwrap();
    session
}

fn grab(session: &mut CaptureSession, request: PlaneRequest, set: &mut UnpackedImageSet) -> Vec<u8> {
    let mut raw = vec![0u8; session.frame_size().unwrap()];
    session.capture_start(1).unwrap();
    let outcome = session
        .get_video_frame_unpacked(&mut raw, TIMEOUT, request, set, None)
        .unwrap();
    outcome.unpack.unwrap();
    session.capture_stop().unwrap();
    raw
}

fn assert_pattern(set: &UnpackedImageSet, kind: PlaneKind, frame: u32, channel: usize, depth: u32) {
    let plane = set.plane(kind).unwrap();
    let width = set.width();
    for (i, &value) in plane.iter().enumerate() {
        let (x, y) = (i as u32 % width, i as u32 / width);
        assert_eq!(
            value,
            expected_pixel(frame, channel, x, y, depth),
            "{kind} plane at ({x}, {y})"
        );
    }
}

#[test]
fn test_twelve_bit_with_dummies_and_reference_rows() {
    let camera = SimulatedCamera::builder()
        .sensor(37, 11)
        .dummy_pixels(3, 5)
        .build();
    let mut session = open(camera);
    session.set_pixel_config(PixelConfig::new(12)).unwrap();
    session.set_dummy_pixels(true).unwrap();
    session.set_reference_rows(4, 2).unwrap();
    session.configure().unwrap();

    let mut set = UnpackedImageSet::new();
    grab(&mut session, PlaneRequest::only(PlaneKind::Low).with_metadata(), &mut set);

    assert_eq!((set.width(), set.height()), (37, 11));
    assert_pattern(&set, PlaneKind::Low, 0, 0, 12);
    assert!(set.plane(PlaneKind::High).is_none());
    assert!(set.plane(PlaneKind::Merged).is_none());

    let meta = set.processed_metadata().unwrap();
    assert!(meta.has_plane(PlaneKind::Low));
    assert!(!meta.has_plane(PlaneKind::Merged));
    assert!(!meta.hdr());
    assert_eq!((meta.pre_reference_rows, meta.post_reference_rows), (4, 2));
    assert_eq!(meta.pixel_depth, 12);
}

#[test]
fn test_multiple_samples_per_pixel_and_lsb_offset() {
    let camera = SimulatedCamera::builder()
        .sensor(16, 8)
        .pixel_depths(&[10, 12, 16])
        .build();
    let mut session = open(camera);
    session.set_samples_per_pixel(SamplesPerPixel::Two).unwrap();
    session
        .set_pixel_config(PixelConfig {
            depth: 10,
            lsb_offset: 4,
        })
        .unwrap();
    let geometry = session.configure().unwrap();
    assert_eq!(geometry.channel_bytes(), 16 * 8 * 2 * 2);

    let mut set = UnpackedImageSet::new();
    grab(&mut session, PlaneRequest::only(PlaneKind::Low), &mut set);
    assert_pattern(&set, PlaneKind::Low, 0, 0, 10);
}

#[test]
fn test_hdr_planes_and_merge() {
    let mut session = open(SimulatedCamera::builder().sensor(24, 6).build());
    session.set_sensor_mode(1).unwrap();
    let geometry = session.configure().unwrap();
    assert!(geometry.hdr());
    assert_eq!(
        geometry.total_bytes(),
        geometry.metadata_bytes() + 2 * geometry.channel_bytes()
    );

    let mut set = UnpackedImageSet::new();
    grab(&mut session, PlaneRequest::ALL, &mut set);

    assert_pattern(&set, PlaneKind::Low, 0, 0, 16);
    assert_pattern(&set, PlaneKind::High, 0, 1, 16);
    // The high channel never saturates in this pattern, so the merge keeps it
    assert_eq!(set.plane(PlaneKind::Merged), set.plane(PlaneKind::High));
    assert_eq!(set.plane_depth(PlaneKind::Merged), 16);
    assert!(set.processed_metadata().unwrap().hdr());
}

#[test]
fn test_reference_rows_do_not_leak_into_planes() {
    let mut session = open(SimulatedCamera::builder().sensor(8, 4).build());
    session.set_reference_rows(16, 16).unwrap();
    session.set_pixel_config(PixelConfig::new(12)).unwrap();
    session.configure().unwrap();

    let mut set = UnpackedImageSet::new();
    grab(&mut session, PlaneRequest::only(PlaneKind::Low), &mut set);
    let plane = set.plane(PlaneKind::Low).unwrap();
    assert_eq!(plane.len(), 32);
    // (0, 0) of frame 0 is 0, not the reference level
    assert_eq!(plane[0], 0);
    assert_ne!(plane[0], SIM_REFERENCE_LEVEL);
}

#[test]
fn test_repeated_unpack_reuses_plane_buffers() {
    let mut session = open(SimulatedCamera::builder().sensor(64, 32).build());
    session.configure().unwrap();
    let request = PlaneRequest::only(PlaneKind::Low);

    let mut set = UnpackedImageSet::new();
    grab(&mut session, request, &mut set);
    let first = set.plane_buffer(PlaneKind::Low).unwrap().as_ptr();
    let reallocations = session.unpacker_mut().plane_metrics().reallocations;
    assert_eq!(reallocations, 1);

    grab(&mut session, request, &mut set);
    assert_eq!(set.plane_buffer(PlaneKind::Low).unwrap().as_ptr(), first);
    assert_eq!(session.unpacker_mut().plane_metrics().reallocations, 1);

    // A width change forces exactly one new allocation
    session.set_image_area(ImageArea::new(32, 32)).unwrap();
    session.configure().unwrap();
    grab(&mut session, request, &mut set);
    assert_eq!(set.plane(PlaneKind::Low).unwrap().len(), 32 * 32);
    assert_eq!(session.unpacker_mut().plane_metrics().reallocations, 2);
    assert_eq!(set.plane_buffer(PlaneKind::Low).unwrap().reallocations(), 2);
}

#[test]
fn test_free_then_unpack_reuses_pooled_buffer() {
    let mut session = open(SimulatedCamera::builder().sensor(32, 16).build());
    session.configure().unwrap();
    let request = PlaneRequest::only(PlaneKind::Merged);

    let mut set = UnpackedImageSet::new();
    let mut stats = UnpackedStats::default();
    grab(&mut session, request, &mut set);
    let first = set.plane_buffer(PlaneKind::Merged).unwrap().as_ptr();

    session.free_unpacked(&mut set, &mut stats);
    assert!(set.is_empty());

    grab(&mut session, request, &mut set);
    assert_eq!(set.plane_buffer(PlaneKind::Merged).unwrap().as_ptr(), first);
}

#[test]
fn test_statistics_over_retrieved_frame() {
    let mut session = open(SimulatedCamera::builder().sensor(40, 20).build());
    session.set_pixel_config(PixelConfig::new(12)).unwrap();
    session.configure().unwrap();

    let mut raw = vec![0u8; session.frame_size().unwrap()];
    let mut set = UnpackedImageSet::new();
    let mut stats = UnpackedStats::default();
    let request = PlaneRequest::only(PlaneKind::Low).with(PlaneKind::Merged);
    let stats_request = StatsRequest::for_planes(request);

    session.capture_start(1).unwrap();
    let outcome = session
        .get_video_frame_unpacked(
            &mut raw,
            TIMEOUT,
            request,
            &mut set,
            Some((&stats_request, &mut stats)),
        )
        .unwrap();
    session.capture_stop().unwrap();
    outcome.unpack.unwrap();
    assert_eq!(outcome.bytes_received, raw.len());

    let low = stats.plane(PlaneKind::Low).unwrap();
    assert_eq!(low.pixel_count, 800);
    assert_eq!(low.histogram().len(), 1 << 12);
    assert_eq!(low.histogram().iter().sum::<u64>(), 800);
    // x + y over a 40 x 20 grid, frame 0
    assert_eq!(low.mean, 29.0);
    assert_eq!(low.dimmest.value, 0);
    assert_eq!((low.brightest.x, low.brightest.y, low.brightest.value), (39, 19, 58));

    let merged = stats.plane(PlaneKind::Merged).unwrap();
    assert_eq!(merged.histogram().len(), 1 << 16);
    assert_eq!(merged.mean, low.mean);
    assert!(stats.plane(PlaneKind::High).is_none());
}

#[test]
fn test_statistics_on_missing_plane_fails_but_frame_survives() {
    let mut session = open(SimulatedCamera::builder().sensor(16, 16).build());
    session.configure().unwrap();

    let mut raw = vec![0u8; session.frame_size().unwrap()];
    let mut set = UnpackedImageSet::new();
    let mut stats = UnpackedStats::default();
    let stats_request = StatsRequest::for_planes(PlaneRequest::only(PlaneKind::High));

    session.capture_start(1).unwrap();
    let outcome = session
        .get_video_frame_unpacked(
            &mut raw,
            TIMEOUT,
            PlaneRequest::only(PlaneKind::Low),
            &mut set,
            Some((&stats_request, &mut stats)),
        )
        .unwrap();
    session.capture_stop().unwrap();

    assert_eq!(outcome.bytes_received, raw.len());
    assert!(outcome.unpack.is_err());
    assert!(set.plane(PlaneKind::Low).is_some());
}
