//! End-to-end tests: a simulated turntable scan of a sphere, fused and meshed.
//!
//! The turntable is an in-memory transport and the camera replays synthetic
//! depth shots, so these run without hardware.

use std::time::{Duration, Instant};

use image::{Rgb, RgbImage};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use turnscan::*;

const IMAGES: u8 = 8;
const RADIUS: f32 = 0.3;
const CENTER: Vec3 = Vec3::new(0.0, 0.0, 1.0);

/// The camera-facing part of the sphere, seen from the origin.
fn visible_cap(frame_id: u64, count: usize) -> DepthShot {
    let mut rng = StdRng::seed_from_u64(frame_id);
    let mut points = Vec::with_capacity(count);
    while points.len() < count {
        let d = Vec3::new(
            rng.gen_range(-1.0..1.0),
            rng.gen_range(-1.0..1.0),
            rng.gen_range(-1.0..1.0),
        );
        let length = d.length();
        if length > 1.0 || length < 0.1 {
            continue;
        }
        let d = d / length;
        if d.z < 0.25 {
            points.push(CENTER + d * RADIUS);
        }
    }
    DepthShot {
        frame_id,
        width: 20,
        height: 20,
        color_coords: vec![Vec2::new(1.5, 1.5); points.len()],
        points,
        color: RgbImage::from_pixel(4, 4, Rgb([200, 150, 100])),
    }
}

fn scanner() -> (CaptureSession, MockTransport) {
    let controller = MockTransport::new();
    let mut link = TurntableLink::new();
    link.connect(Box::new(controller.clone())).unwrap();

    let shots = (1..=u64::from(IMAGES)).map(|id| visible_cap(id, 400));
    let config = ScanConfig::new()
        .with_images(IMAGES)
        .with_turntable_center(CENTER);
    let session = CaptureSession::new(Box::new(ReplayCamera::from_shots(shots)), link, config);
    (session, controller)
}

fn tick_until(session: &mut CaptureSession, done: impl Fn(&CaptureSession) -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !done(session) && Instant::now() < deadline {
        session.tick();
        std::thread::sleep(Duration::from_millis(1));
    }
}

fn run_scan(session: &mut CaptureSession, controller: &MockTransport) {
    session.start().unwrap();
    for taken in 2..=usize::from(IMAGES) {
        controller.inject_read(b"D");
        tick_until(session, |s| s.shots().len() == taken);
        assert_eq!(session.shots().len(), taken);
    }
    controller.inject_read(b"F");
    tick_until(session, |s| s.state() == CaptureState::Complete);
    assert_eq!(session.state(), CaptureState::Complete);
}

#[test]
fn test_scan_fuse_and_mesh_sphere() {
    init_logging();
    let (mut session, controller) = scanner();
    run_scan(&mut session, &controller);

    let written = controller.written();
    assert_eq!(&written[..3], &[b'R', b'T', IMAGES]);
    assert_eq!(written.iter().filter(|&&b| b == b'S').count(), usize::from(IMAGES));
    assert_eq!(written.last(), Some(&b'R'));

    let shot_total: usize = session.shots().iter().map(ShotCloud::len).sum();
    assert_eq!(shot_total, 400 * usize::from(IMAGES));
    let cloud = session.take_combined_cloud().unwrap();
    assert_eq!(cloud.len(), shot_total);
    for sample in cloud.samples() {
        assert!((sample.position.distance(CENTER) - RADIUS).abs() < 1e-4);
        assert_eq!(sample.color, [200, 150, 100]);
    }

    let mut config = MeshConfig::default();
    config.hierarchy_simplification.enabled = false;
    let mut stages = Vec::new();
    let output = run_pipeline(cloud, config, |s| stages.push(s)).unwrap();

    assert_eq!(stages.last(), Some(&PipelineStage::Finished));
    assert!(stages.contains(&PipelineStage::Reconstructing));
    assert!(output.reconstruction_error.is_none());
    assert!(output.points.has_normals());
    for p in output.points.points() {
        let outward = (p.position - CENTER).normalize();
        assert!(p.normal.unwrap().dot(outward) > 0.8);
    }

    let mesh = output.mesh.as_ref().unwrap();
    assert!(mesh.num_faces() > 100);
    for v in &mesh.vertices {
        assert!((v.distance(CENTER) - RADIUS).abs() < 0.03, "vertex {v:?}");
    }
}

#[test]
fn test_disconnect_keeps_partial_scan() {
    let (mut session, controller) = scanner();
    session.start().unwrap();
    controller.inject_read(b"D");
    tick_until(&mut session, |s| s.shots().len() == 2);

    controller.fail_io(true);
    controller.inject_read(b"D");
    tick_until(&mut session, |s| !s.is_running());

    assert_eq!(session.state(), CaptureState::Idle);
    assert!(!session.link().is_connected());
    assert!(session.status().contains("2 shots kept"));

    let cloud = session.take_combined_cloud().unwrap();
    assert_eq!(cloud.len(), 800);
}

#[test]
fn test_pipeline_export_round_trip() {
    let (mut session, controller) = scanner();
    run_scan(&mut session, &controller);
    let cloud = session.take_combined_cloud().unwrap();

    let output = run_pipeline(cloud.clone(), MeshConfig::passthrough(), |_| {}).unwrap();
    assert_eq!(output.points.to_cloud(), cloud);

    let path = std::env::temp_dir().join(format!("turnscan-export-{}.ply", std::process::id()));
    PlyPointWriter::new(&path)
        .write_points(&output.points)
        .unwrap();
    let read = read_ply_points(&path).unwrap();
    std::fs::remove_file(&path).ok();

    assert_eq!(read.to_cloud(), cloud);
}
