//! turnscan: turntable 3D scanning with a depth camera.
//!
//! A scan captures one depth shot per turntable step, filters each shot to
//! the object, rotates every shot into a common frame and turns the fused
//! cloud into a cleaned, oriented point set and a triangle mesh.
//!
//! # Quick Start
//!
//! ```no_run
//! use turnscan::*;
//!
//! fn main() -> Result<()> {
//!     init_logging();
//!
//!     let mut link = TurntableLink::new();
//!     link.connect(Box::new(SerialPortTransport::new("/dev/ttyACM0", DEFAULT_BAUD_RATE)))?;
//!
//!     let camera = ReplayCamera::new();
//!     let mut session = CaptureSession::new(Box::new(camera), link, ScanConfig::default());
//!     session.start()?;
//!     while session.is_running() {
//!         session.tick();
//!     }
//!
//!     let cloud = session.take_combined_cloud()?;
//!     let output = run_pipeline(cloud, MeshConfig::default(), |stage| println!("{stage}"))?;
//!     if let Some(mesh) = &output.mesh {
//!         ObjMeshWriter::default().write_mesh(mesh)?;
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Crates
//!
//! - [`turnscan_core`]: data model, configuration, fusion, marching cubes
//! - [`turnscan_capture`]: turntable link, background model, capture session
//! - [`turnscan_mesh`]: point set processing, reconstruction, export

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

pub use turnscan_core::{
    marching_cubes, BackgroundConfig, ClipBox, CloudFuser, CombinedCloud, ExportConfig,
    GridSimplificationConfig, HierarchySimplificationConfig, MeshConfig, NormalEstimationConfig,
    OutlierRemovalConfig, ReconstructionConfig, ReconstructionFailure, Result, Sample,
    ScalarGrid, ScanConfig, ScanError, ScannerSettings, ShotCloud, SmoothingConfig, TriangleMesh,
    Vec2, Vec3,
};

pub use turnscan_capture::{
    available_ports, BackgroundMask, BackgroundModel, CaptureSession, CaptureState, DepthCamera,
    DepthShot, FrameSampler, LinkEvent, LinkState, MockTransport, ReplayCamera,
    SerialPortTransport, SerialTransport, TurntableLink, DEFAULT_BAUD_RATE, FOREGROUND_THRESHOLD,
};

pub use turnscan_mesh::{
    read_ply_points, MeshPipeline, MeshWriter, ObjMeshWriter, PipelineOutput, PipelineStage,
    PlyEncoding, PlyMeshWriter, PlyPointWriter, PointCloudWriter, PointSet, SurfacePoint,
    DEFAULT_MESH_FILE, DEFAULT_POINTS_FILE,
};

/// How often [`run_pipeline`] checks the worker.
const PIPELINE_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Initializes `env_logger` once; later calls are ignored.
pub fn init_logging() {
    let _ = env_logger::try_init();
}

/// Loads settings from `path`, or returns the defaults if no path is given.
pub fn load_settings(path: Option<&Path>) -> Result<ScannerSettings> {
    match path {
        Some(path) => ScannerSettings::load(path),
        None => Ok(ScannerSettings::default()),
    }
}

/// Runs the mesh pipeline on its worker and waits for the result, calling
/// `on_stage` whenever the reported stage changes.
///
/// The returned output may carry a reconstruction failure; the point set is
/// always present.
pub fn run_pipeline(
    cloud: CombinedCloud,
    config: MeshConfig,
    mut on_stage: impl FnMut(PipelineStage),
) -> Result<Arc<PipelineOutput>> {
    let mut pipeline = MeshPipeline::new();
    pipeline.run(cloud, config)?;

    let mut last = PipelineStage::Idle;
    loop {
        let done = pipeline.poll();
        let stage = pipeline.current_stage();
        if stage != last {
            on_stage(stage);
            last = stage;
        }
        if done {
            break;
        }
        if !pipeline.is_running() {
            // The worker stopped without producing an output
            return Err(ScanError::Export("mesh pipeline stopped unexpectedly".into()));
        }
        std::thread::sleep(PIPELINE_POLL_INTERVAL);
    }

    pipeline
        .finished()
        .ok_or_else(|| ScanError::Export("mesh pipeline produced no output".into()))
}
