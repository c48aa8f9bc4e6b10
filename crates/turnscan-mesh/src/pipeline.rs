//! The mesh pipeline: cleanup, normals, smoothing and reconstruction.
//!
//! [`process`] runs the enabled stages in a fixed order on the calling thread.
//! [`MeshPipeline`] runs the same work on a named worker thread so the caller
//! can keep ticking. The current stage is readable at any time; the finished
//! output becomes available only after the last stage has completed.

use std::fmt;
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{bounded, Receiver, TryRecvError};
use parking_lot::RwLock;
use turnscan_core::{
    CombinedCloud, MeshConfig, ReconstructionFailure, Result, ScanError, TriangleMesh,
};

use crate::export::{MeshWriter, PointCloudWriter};
use crate::normals::estimate_normals;
use crate::outliers::remove_outliers;
use crate::point_set::PointSet;
use crate::reconstruct::reconstruct_surface;
use crate::simplify::{grid_simplify, hierarchy_simplify};
use crate::smoothing::smooth_points;

/// The stage a pipeline run is in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum PipelineStage {
    /// No run has started.
    #[default]
    Idle,
    /// A run was started and has not reached its first stage.
    Starting,
    /// Outlier removal.
    RemovingOutliers,
    /// Grid simplification.
    GridSimplification,
    /// Hierarchical simplification.
    HierarchicalSimplification,
    /// Normal estimation and orientation.
    EstimatingNormals,
    /// Bilateral smoothing.
    Smoothing,
    /// Surface reconstruction.
    Reconstructing,
    /// The last run completed.
    Finished,
    /// The last run completed without a surface.
    Failed,
}

impl PipelineStage {
    /// Returns the display label.
    pub fn label(self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::Starting => "Starting",
            Self::RemovingOutliers => "Removing outliers",
            Self::GridSimplification => "Grid simplification",
            Self::HierarchicalSimplification => "Hierarchical simplification",
            Self::EstimatingNormals => "Estimating normals",
            Self::Smoothing => "Smoothing",
            Self::Reconstructing => "Reconstructing surface",
            Self::Finished => "Finished",
            Self::Failed => "Failed",
        }
    }

    /// Returns true while a run is between its first and last stage.
    pub fn is_processing(self) -> bool {
        !matches!(self, Self::Idle | Self::Finished | Self::Failed)
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// The result of a pipeline run.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineOutput {
    /// The processed point set.
    pub points: PointSet,
    /// The reconstructed surface, if reconstruction ran and succeeded.
    pub mesh: Option<TriangleMesh>,
    /// Why reconstruction produced no surface, if it ran and failed.
    pub reconstruction_error: Option<ReconstructionFailure>,
    /// The configuration the run used.
    pub config: MeshConfig,
}

impl PipelineOutput {
    /// Returns the stage a run with this output ends in.
    pub fn final_stage(&self) -> PipelineStage {
        if self.reconstruction_error.is_some() {
            PipelineStage::Failed
        } else {
            PipelineStage::Finished
        }
    }
}

/// Runs every enabled stage over `cloud`, calling `report` as each one starts.
///
/// `report` is not called for the final stage; use
/// [`PipelineOutput::final_stage`].
pub fn process(
    cloud: CombinedCloud,
    config: &MeshConfig,
    report: &dyn Fn(PipelineStage),
) -> PipelineOutput {
    let mut points = PointSet::from(cloud);
    log::info!("mesh pipeline started with {} points", points.len());

    if config.outlier_removal.enabled {
        report(PipelineStage::RemovingOutliers);
        remove_outliers(&mut points, &config.outlier_removal);
    }
    if config.grid_simplification.enabled {
        report(PipelineStage::GridSimplification);
        grid_simplify(&mut points, &config.grid_simplification);
    }
    if config.hierarchy_simplification.enabled {
        report(PipelineStage::HierarchicalSimplification);
        hierarchy_simplify(&mut points, &config.hierarchy_simplification);
    }
    if config.normal_estimation.enabled {
        report(PipelineStage::EstimatingNormals);
        estimate_normals(&mut points, &config.normal_estimation);
    }
    if config.smoothing.enabled {
        report(PipelineStage::Smoothing);
        smooth_points(&mut points, &config.smoothing);
    }

    let mut mesh = None;
    let mut reconstruction_error = None;
    if config.reconstruction.enabled {
        report(PipelineStage::Reconstructing);
        match reconstruct_surface(&points, &config.reconstruction) {
            Ok(m) => mesh = Some(m),
            Err(err) => {
                log::warn!("surface reconstruction failed: {err}");
                reconstruction_error = Some(err);
            }
        }
    }

    log::info!("mesh pipeline finished with {} points", points.len());
    PipelineOutput {
        points,
        mesh,
        reconstruction_error,
        config: config.clone(),
    }
}

struct Job {
    results: Receiver<PipelineOutput>,
    handle: JoinHandle<()>,
}

/// The stage published by the worker of run `run`.
#[derive(Debug, Default)]
struct StageSlot {
    run: u64,
    stage: PipelineStage,
}

/// Runs [`process`] on a background worker.
///
/// Only one run may be in flight. Completion is observed with
/// [`MeshPipeline::poll`] (non-blocking) or [`MeshPipeline::wait`].
#[derive(Default)]
pub struct MeshPipeline {
    stage: Arc<RwLock<StageSlot>>,
    runs: u64,
    job: Option<Job>,
    finished: Option<Arc<PipelineOutput>>,
    last_error: Option<ReconstructionFailure>,
}

impl MeshPipeline {
    /// Creates an idle pipeline.
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a run over `cloud`.
    ///
    /// Fails with [`ScanError::PipelineBusy`] while another run is in flight
    /// and with [`ScanError::InvalidConfig`] if `config` does not validate.
    pub fn run(&mut self, cloud: CombinedCloud, config: MeshConfig) -> Result<()> {
        if self.poll_job() {
            return Err(ScanError::PipelineBusy);
        }
        config.validate()?;

        self.finished = None;
        self.last_error = None;

        let (result_tx, result_rx) = bounded(1);
        let slot = Arc::clone(&self.stage);
        let run = self.runs + 1;
        let handle = std::thread::Builder::new()
            .name("mesh-pipeline".into())
            .spawn(move || {
                let report = |stage: PipelineStage| {
                    log::debug!("mesh pipeline stage: {stage}");
                    *slot.write() = StageSlot { run, stage };
                };
                let output = process(cloud, &config, &report);
                report(output.final_stage());
                if result_tx.send(output).is_err() {
                    log::warn!("mesh pipeline result dropped");
                }
            })?;

        // Until the worker publishes a stage for this run, it reads as Starting
        self.runs = run;
        self.job = Some(Job {
            results: result_rx,
            handle,
        });
        Ok(())
    }

    /// Collects a completed run without blocking.
    ///
    /// Returns true if a finished output is available.
    pub fn poll(&mut self) -> bool {
        self.poll_job();
        self.finished.is_some()
    }

    /// Blocks until the in-flight run completes and returns its output.
    ///
    /// Returns the previous output if nothing is in flight.
    pub fn wait(&mut self) -> Option<Arc<PipelineOutput>> {
        if let Some(job) = self.job.take() {
            let output = job.results.recv().ok();
            self.finish(job.handle, output);
        }
        self.finished.clone()
    }

    /// Returns true while a run is in flight.
    pub fn is_running(&mut self) -> bool {
        self.poll_job()
    }

    /// Returns the stage of the current or last run.
    pub fn current_stage(&self) -> PipelineStage {
        self.stage_of(&self.stage.read())
    }

    fn stage_of(&self, slot: &StageSlot) -> PipelineStage {
        if slot.run == self.runs {
            slot.stage
        } else {
            PipelineStage::Starting
        }
    }

    /// Returns the output of the last completed run.
    pub fn finished(&self) -> Option<Arc<PipelineOutput>> {
        self.finished.clone()
    }

    /// Returns the reconstruction failure of the last completed run.
    pub fn last_error(&self) -> Option<&ReconstructionFailure> {
        self.last_error.as_ref()
    }

    /// Hands the last output to the writers enabled in its [`ExportConfig`].
    ///
    /// A writer that is `None`, or an artifact that does not exist, is skipped.
    ///
    /// [`ExportConfig`]: turnscan_core::ExportConfig
    pub fn export(
        &self,
        point_writer: Option<&mut dyn PointCloudWriter>,
        mesh_writer: Option<&mut dyn MeshWriter>,
    ) -> Result<()> {
        let output = self
            .finished
            .as_ref()
            .ok_or_else(|| ScanError::Export("no finished pipeline output".into()))?;

        if output.config.export.points {
            if let Some(writer) = point_writer {
                writer.write_points(&output.points)?;
            }
        }
        if output.config.export.mesh {
            if let (Some(writer), Some(mesh)) = (mesh_writer, output.mesh.as_ref()) {
                writer.write_mesh(mesh)?;
            }
        }
        Ok(())
    }

    /// Returns true if a job is still in flight after collecting any result.
    fn poll_job(&mut self) -> bool {
        let Some(job) = self.job.as_ref() else {
            return false;
        };
        let output = match job.results.try_recv() {
            Ok(output) => Some(output),
            Err(TryRecvError::Empty) => return true,
            Err(TryRecvError::Disconnected) => None,
        };
        if let Some(job) = self.job.take() {
            self.finish(job.handle, output);
        }
        false
    }

    fn finish(&mut self, handle: JoinHandle<()>, output: Option<PipelineOutput>) {
        if handle.join().is_err() {
            log::error!("mesh pipeline worker panicked");
        }
        match output {
            Some(output) => {
                self.last_error.clone_from(&output.reconstruction_error);
                self.finished = Some(Arc::new(output));
            }
            None => {
                *self.stage.write() = StageSlot {
                    run: self.runs,
                    stage: PipelineStage::Failed,
                };
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;
    use std::cell::RefCell;
    use turnscan_core::Sample;

    fn cloud() -> CombinedCloud {
        CombinedCloud::from_samples(
            (0..50)
                .map(|i| {
                    let t = i as f32 * 0.1;
                    Sample::new(Vec3::new(t.cos(), t * 0.01, t.sin()), [i as u8, 10, 20])
                })
                .collect(),
        )
    }

    #[derive(Default)]
    struct RecordingWriter {
        points: Vec<usize>,
        meshes: Vec<usize>,
    }

    impl PointCloudWriter for RecordingWriter {
        fn write_points(&mut self, points: &PointSet) -> Result<()> {
            self.points.push(points.len());
            Ok(())
        }
    }

    impl MeshWriter for RecordingWriter {
        fn write_mesh(&mut self, mesh: &TriangleMesh) -> Result<()> {
            self.meshes.push(mesh.num_faces());
            Ok(())
        }
    }

    #[test]
    fn test_stage_labels() {
        assert_eq!(PipelineStage::Idle.to_string(), "Idle");
        assert_eq!(PipelineStage::RemovingOutliers.to_string(), "Removing outliers");
        assert_eq!(
            PipelineStage::HierarchicalSimplification.to_string(),
            "Hierarchical simplification"
        );
        assert_eq!(PipelineStage::Reconstructing.to_string(), "Reconstructing surface");
        assert!(PipelineStage::Starting.is_processing());
        assert!(PipelineStage::Smoothing.is_processing());
        assert!(!PipelineStage::Finished.is_processing());
    }

    #[test]
    fn test_passthrough_keeps_cloud() {
        let input = cloud();
        let output = process(input.clone(), &MeshConfig::passthrough(), &|_| {});
        assert_eq!(output.points.to_cloud(), input);
        assert!(output.mesh.is_none());
        assert_eq!(output.final_stage(), PipelineStage::Finished);
    }

    #[test]
    fn test_stages_reported_in_order() {
        let mut config = MeshConfig::passthrough();
        config.outlier_removal.enabled = true;
        config.normal_estimation.enabled = true;
        config.smoothing.enabled = true;

        let seen = RefCell::new(Vec::new());
        process(cloud(), &config, &|s| seen.borrow_mut().push(s));
        assert_eq!(
            seen.into_inner(),
            vec![
                PipelineStage::RemovingOutliers,
                PipelineStage::EstimatingNormals,
                PipelineStage::Smoothing,
            ]
        );
    }

    #[test]
    fn test_worker_run() {
        let mut pipeline = MeshPipeline::new();
        assert_eq!(pipeline.current_stage(), PipelineStage::Idle);
        assert!(pipeline.finished().is_none());

        pipeline.run(cloud(), MeshConfig::passthrough()).unwrap();
        let output = pipeline.wait().unwrap();
        assert_eq!(output.points.len(), 50);
        assert_eq!(pipeline.current_stage(), PipelineStage::Finished);
        assert!(!pipeline.is_running());
        assert!(pipeline.poll());
    }

    #[test]
    fn test_second_run_is_rejected_while_busy() {
        let mut pipeline = MeshPipeline::new();
        let stage = Arc::clone(&pipeline.stage);
        // The worker cannot publish its final stage while this guard is held
        let guard = stage.write();

        pipeline.run(cloud(), MeshConfig::passthrough()).unwrap();
        assert!(matches!(
            pipeline.run(cloud(), MeshConfig::passthrough()),
            Err(ScanError::PipelineBusy)
        ));
        assert!(pipeline.is_running());
        assert!(!pipeline.poll());

        assert_eq!(pipeline.stage_of(&guard), PipelineStage::Starting);

        drop(guard);
        assert!(pipeline.wait().is_some());
        pipeline.run(cloud(), MeshConfig::passthrough()).unwrap();
        assert!(pipeline.wait().is_some());
    }

    #[test]
    fn test_new_run_does_not_show_previous_stage() {
        let mut pipeline = MeshPipeline::new();
        pipeline.run(cloud(), MeshConfig::passthrough()).unwrap();
        pipeline.wait().unwrap();
        assert_eq!(pipeline.current_stage(), PipelineStage::Finished);

        let stage = Arc::clone(&pipeline.stage);
        let guard = stage.write();
        pipeline.run(cloud(), MeshConfig::passthrough()).unwrap();
        // The held guard keeps the worker from publishing anything yet
        assert_eq!(guard.stage, PipelineStage::Finished);
        assert_eq!(pipeline.stage_of(&guard), PipelineStage::Starting);
        assert!(pipeline.stage_of(&guard).is_processing());

        drop(guard);
        pipeline.wait().unwrap();
        assert_eq!(pipeline.current_stage(), PipelineStage::Finished);
    }

    #[test]
    fn test_coincident_points_do_not_panic() {
        let samples = vec![Sample::new(Vec3::ZERO, [9, 9, 9]); 200];
        let mut config = MeshConfig::default();
        config.grid_simplification.enabled = false;
        config.hierarchy_simplification.enabled = false;

        let output = process(CombinedCloud::from_samples(samples), &config, &|_| {});
        assert!(!output.points.is_empty());
        assert!(output.points.points().iter().all(|p| p.position == Vec3::ZERO));
        assert!(output.reconstruction_error.is_some());
    }

    #[test]
    fn test_reconstruction_failure_keeps_points() {
        let mut config = MeshConfig::passthrough();
        config.reconstruction.enabled = true;

        let mut pipeline = MeshPipeline::new();
        pipeline.run(cloud(), config).unwrap();
        let output = pipeline.wait().unwrap();

        assert!(output.mesh.is_none());
        assert_eq!(output.points.len(), 50);
        assert!(matches!(
            pipeline.last_error(),
            Some(ReconstructionFailure::ImplicitFit(_))
        ));
        assert_eq!(pipeline.current_stage(), PipelineStage::Failed);

        // Still usable
        pipeline.run(cloud(), MeshConfig::passthrough()).unwrap();
        pipeline.wait().unwrap();
        assert!(pipeline.last_error().is_none());
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let mut config = MeshConfig::default();
        config.grid_simplification.enabled = true;
        config.grid_simplification.cell_size = 0.0;
        let mut pipeline = MeshPipeline::new();
        assert!(matches!(
            pipeline.run(cloud(), config),
            Err(ScanError::InvalidConfig(_))
        ));
        assert!(!pipeline.is_running());
    }

    #[test]
    fn test_export_honors_toggles() {
        let mut pipeline = MeshPipeline::new();
        let mut writer = RecordingWriter::default();
        assert!(pipeline.export(Some(&mut writer), None).is_err());

        let mut config = MeshConfig::passthrough();
        config.export.points = false;
        pipeline.run(cloud(), config).unwrap();
        pipeline.wait();

        let mut points = RecordingWriter::default();
        let mut meshes = RecordingWriter::default();
        pipeline
            .export(Some(&mut points), Some(&mut meshes))
            .unwrap();
        assert!(points.points.is_empty());
        // No mesh was reconstructed
        assert!(meshes.meshes.is_empty());

        pipeline.run(cloud(), MeshConfig::passthrough()).unwrap();
        pipeline.wait();
        pipeline.export(Some(&mut points), None).unwrap();
        assert_eq!(points.points, vec![50]);
    }
}
