//! Capture session: drives the turntable through one revolution and samples
//! a shot at every stop.
//!
//! The session is advanced by calling [`CaptureSession::tick`] once per
//! frame of the caller's loop. Ticks never block and never return errors;
//! failures are reported through [`CaptureSession::state`] and
//! [`CaptureSession::status`].
//!
//! A shot is always sampled before the command that moves the table to the
//! next stop is sent.

use turnscan_core::{CloudFuser, CombinedCloud, Result, ScanConfig, ScanError, ShotCloud};

use crate::background::BackgroundModel;
use crate::camera::{DepthCamera, DepthShot};
use crate::link::{LinkEvent, TurntableLink};
use crate::sampler::FrameSampler;

/// Where a capture session is in its cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    /// No session is running.
    Idle,
    /// Sending the configure burst to the controller.
    Configuring,
    /// Configured; waiting for a camera frame for shot 0.
    WaitingFirstSample,
    /// The table stopped; waiting for a camera frame to sample.
    Sampling,
    /// The table is moving to the next stop.
    AdvancingTurntable,
    /// All shots were taken.
    Complete,
    /// Collecting background calibration frames.
    Calibrating,
    /// The cycle ended unexpectedly; collected shots are kept.
    Error,
}

impl CaptureState {
    /// Returns true while a capture or calibration is in progress.
    pub fn is_running(self) -> bool {
        matches!(
            self,
            Self::Configuring
                | Self::WaitingFirstSample
                | Self::Sampling
                | Self::AdvancingTurntable
                | Self::Calibrating
        )
    }
}

/// One turntable capture.
pub struct CaptureSession {
    camera: Box<dyn DepthCamera>,
    link: TurntableLink,
    config: ScanConfig,
    snapshot: Option<ScanConfig>,
    state: CaptureState,
    status: String,
    shots: Vec<ShotCloud>,
    background: Option<BackgroundModel>,
    calibration_remaining: u32,
    last_frame_id: Option<u64>,
    sample_pending: bool,
    finishing: bool,
}

impl CaptureSession {
    /// Creates an idle session.
    pub fn new(camera: Box<dyn DepthCamera>, link: TurntableLink, config: ScanConfig) -> Self {
        Self {
            camera,
            link,
            config,
            snapshot: None,
            state: CaptureState::Idle,
            status: "Idle".to_string(),
            shots: Vec::new(),
            background: None,
            calibration_remaining: 0,
            last_frame_id: None,
            sample_pending: false,
            finishing: false,
        }
    }

    /// Returns the configuration the next session will use.
    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    /// Replaces the configuration. Refused while a session is running.
    pub fn set_config(&mut self, config: ScanConfig) -> Result<()> {
        if self.state.is_running() {
            return Err(ScanError::SessionActive);
        }
        config.validate()?;
        self.config = config;
        Ok(())
    }

    /// Returns the current state.
    pub fn state(&self) -> CaptureState {
        self.state
    }

    /// Returns true while a capture or calibration is in progress.
    pub fn is_running(&self) -> bool {
        self.state.is_running()
    }

    /// Returns a human-readable status line.
    pub fn status(&self) -> &str {
        &self.status
    }

    /// Returns the shots collected so far.
    pub fn shots(&self) -> &[ShotCloud] {
        &self.shots
    }

    /// Returns the background model, if one was calibrated.
    pub fn background(&self) -> Option<&BackgroundModel> {
        self.background.as_ref()
    }

    /// Returns the turntable link, e.g. to connect or step manually.
    pub fn link_mut(&mut self) -> &mut TurntableLink {
        &mut self.link
    }

    /// Returns the turntable link.
    pub fn link(&self) -> &TurntableLink {
        &self.link
    }

    /// Returns the camera.
    pub fn camera_mut(&mut self) -> &mut dyn DepthCamera {
        self.camera.as_mut()
    }

    /// Starts a capture of `number_of_images` shots.
    ///
    /// The configuration is snapshotted here and used until the session
    /// ends. Shot 0 is sampled as soon as a camera frame is available.
    pub fn start(&mut self) -> Result<()> {
        if self.state.is_running() {
            return Err(ScanError::SessionActive);
        }
        self.config.validate()?;
        let snapshot = self.config.clone();

        self.state = CaptureState::Configuring;
        self.status = "Configuring turntable".to_string();
        if let Err(err) = self.link.begin_capture(snapshot.number_of_images) {
            self.state = CaptureState::Idle;
            self.status = format!("Could not start: {err}");
            return Err(err);
        }

        self.shots.clear();
        if let Some(model) = self.background.as_mut() {
            model.invalidate_mask();
        }
        log::info!("capture started: {} images", snapshot.number_of_images);
        self.snapshot = Some(snapshot);
        self.finishing = false;
        self.sample_pending = true;
        self.state = CaptureState::WaitingFirstSample;
        self.status = "Waiting for first sample".to_string();

        self.sample_if_ready();
        Ok(())
    }

    /// Starts a background calibration over the configured number of frames.
    ///
    /// The first frame seeds a fresh model and the rest are accumulated.
    pub fn calibrate_background(&mut self) -> Result<()> {
        if self.state.is_running() {
            return Err(ScanError::SessionActive);
        }
        self.background = None;
        self.calibration_remaining = self.config.background.calibration_frames;
        self.state = CaptureState::Calibrating;
        self.status = "Calibrating background".to_string();
        self.calibrate_step();
        Ok(())
    }

    /// Drops the background model; subsequent shots are not masked.
    pub fn clear_background(&mut self) -> Result<()> {
        if self.state.is_running() {
            return Err(ScanError::SessionActive);
        }
        self.background = None;
        Ok(())
    }

    /// Advances the session by at most one sample and one link event.
    ///
    /// Calling this repeatedly without new bytes or frames does nothing.
    pub fn tick(&mut self) {
        if self.state == CaptureState::Calibrating {
            self.calibrate_step();
            return;
        }

        if self.active_images().is_some() && !self.link.is_connected() {
            self.connection_lost(&ScanError::NotConnected);
            return;
        }

        if self.sample_pending {
            self.sample_if_ready();
            if self.sample_pending {
                return;
            }
        }

        match self.link.poll() {
            Ok(Some(event)) => self.handle_event(event),
            Ok(None) => {}
            Err(err) => self.connection_lost(&err),
        }
    }

    /// Takes the collected shots, leaving the session without any.
    pub fn take_shots(&mut self) -> Result<Vec<ShotCloud>> {
        if self.state.is_running() {
            return Err(ScanError::SessionActive);
        }
        Ok(std::mem::take(&mut self.shots))
    }

    /// Takes the collected shots and fuses them into one world-frame cloud,
    /// using the configuration of the session that captured them.
    pub fn take_combined_cloud(&mut self) -> Result<CombinedCloud> {
        let (images, center) = {
            let config = self.snapshot.as_ref().unwrap_or(&self.config);
            (usize::from(config.number_of_images), config.turntable_center)
        };
        let shots = self.take_shots()?;
        CloudFuser::new(images, center).fuse(shots)
    }

    fn handle_event(&mut self, event: LinkEvent) {
        let Some(images) = self.active_images() else {
            if event == LinkEvent::StepDone {
                self.status = "Turntable step done".to_string();
            } else {
                log::debug!("ignoring {event:?} outside a capture");
            }
            return;
        };

        match event {
            LinkEvent::SampleRequested if self.shots.len() < images => {
                self.sample_pending = true;
                self.state = CaptureState::Sampling;
                self.sample_if_ready();
            }
            LinkEvent::SampleRequested => {
                // The controller keeps its own step count; keep it moving.
                self.advance();
            }
            LinkEvent::CycleComplete => {
                if self.shots.len() + 1 == images {
                    self.finishing = true;
                    self.sample_pending = true;
                    self.state = CaptureState::Sampling;
                    self.sample_if_ready();
                } else if self.shots.len() >= images {
                    self.finish();
                } else {
                    self.state = CaptureState::Error;
                    self.status = format!(
                        "Turntable finished early: {} of {} shots taken",
                        self.shots.len(),
                        images
                    );
                    log::warn!("{}", self.status);
                }
            }
            LinkEvent::StepDone => {
                log::debug!("unexpected manual step response during capture");
            }
        }
    }

    fn active_images(&self) -> Option<usize> {
        let active = matches!(
            self.state,
            CaptureState::WaitingFirstSample
                | CaptureState::Sampling
                | CaptureState::AdvancingTurntable
        );
        if !active {
            return None;
        }
        self.snapshot
            .as_ref()
            .map(|config| usize::from(config.number_of_images))
    }

    fn sample_if_ready(&mut self) {
        let Some(shot) = self.next_frame() else {
            return;
        };
        let Some(config) = self.snapshot.as_ref() else {
            self.sample_pending = false;
            return;
        };

        let index = self.shots.len();
        let sampler = FrameSampler::new(config);
        let mask = self
            .background
            .as_mut()
            .map(|model| model.apply(&shot.color, shot.frame_id));
        let cloud = sampler.sample(&shot, mask, index);
        self.shots.push(cloud);
        self.sample_pending = false;

        let images = usize::from(config.number_of_images);
        self.status = format!("Captured shot {} of {}", self.shots.len(), images);
        log::info!("{}", self.status);

        if self.finishing {
            self.finish();
        } else {
            self.advance();
        }
    }

    fn next_frame(&mut self) -> Option<DepthShot> {
        let shot = self.camera.latest_shot()?;
        if self.last_frame_id.is_some_and(|last| shot.frame_id <= last) {
            return None;
        }
        self.last_frame_id = Some(shot.frame_id);
        Some(shot)
    }

    fn advance(&mut self) {
        match self.link.advance() {
            Ok(()) => self.state = CaptureState::AdvancingTurntable,
            Err(err @ (ScanError::Connection(_) | ScanError::NotConnected)) => {
                self.connection_lost(&err);
            }
            Err(err) => {
                self.state = CaptureState::Error;
                self.status = format!("Could not advance turntable: {err}");
                log::warn!("{}", self.status);
            }
        }
    }

    fn finish(&mut self) {
        self.finishing = false;
        if let Err(err) = self.link.reset() {
            log::warn!("could not reset turntable after capture: {err}");
        }
        self.state = CaptureState::Complete;
        self.status = format!("Capture complete: {} shots", self.shots.len());
        log::info!("{}", self.status);
    }

    fn connection_lost(&mut self, err: &ScanError) {
        let was_running = self.state.is_running();
        self.sample_pending = false;
        self.finishing = false;
        if was_running {
            self.state = CaptureState::Idle;
        }
        self.status = format!(
            "Turntable connection lost ({err}); {} shots kept",
            self.shots.len()
        );
        log::error!("{}", self.status);
    }

    fn calibrate_step(&mut self) {
        if self.calibration_remaining == 0 {
            self.state = CaptureState::Idle;
            self.status = if self.background.is_some() {
                "Background calibrated".to_string()
            } else {
                "Background calibration skipped".to_string()
            };
            return;
        }

        let Some(shot) = self.next_frame() else {
            return;
        };
        match self.background.as_mut() {
            Some(model) => {
                model.accumulate(&shot.color, shot.frame_id);
            }
            None => {
                self.background = Some(BackgroundModel::create_from_frame(
                    &shot.color,
                    shot.frame_id,
                    &self.config.background,
                ));
            }
        }
        self.calibration_remaining -= 1;

        if self.calibration_remaining == 0 {
            self.state = CaptureState::Idle;
            self.status = "Background calibrated".to_string();
            log::info!("background calibrated");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::ReplayCamera;
    use crate::link::LinkState;
    use crate::transport::MockTransport;
    use glam::{Vec2, Vec3};
    use image::{Rgb, RgbImage};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::time::{Duration, Instant};

    fn frame(frame_id: u64, rng: &mut StdRng) -> DepthShot {
        let points: Vec<Vec3> = (0..100)
            .map(|_| {
                Vec3::new(
                    rng.gen_range(-1.0..1.0),
                    rng.gen_range(-1.0..1.0),
                    rng.gen_range(0.0..12.0),
                )
            })
            .collect();
        DepthShot {
            frame_id,
            width: 10,
            height: 10,
            color_coords: vec![Vec2::new(0.5, 0.5); points.len()],
            points,
            color: RgbImage::from_pixel(2, 2, Rgb([90, 60, 30])),
        }
    }

    fn frames(count: u64) -> Vec<DepthShot> {
        let mut rng = StdRng::seed_from_u64(42);
        (1..=count).map(|id| frame(id, &mut rng)).collect()
    }

    fn session(images: u8, shots: Vec<DepthShot>) -> (CaptureSession, MockTransport) {
        let controller = MockTransport::new();
        let mut link = TurntableLink::new();
        link.connect(Box::new(controller.clone())).unwrap();
        let config = ScanConfig::new()
            .with_images(images)
            .with_depth_window(1.0, 10.0);
        let session = CaptureSession::new(Box::new(ReplayCamera::from_shots(shots)), link, config);
        (session, controller)
    }

    fn tick_until(session: &mut CaptureSession, done: impl Fn(&CaptureSession) -> bool) {
        let deadline = Instant::now() + Duration::from_secs(2);
        while !done(session) && Instant::now() < deadline {
            session.tick();
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    fn count_steps(controller: &MockTransport) -> usize {
        // Skip the R, T, <n> burst
        controller.written()[3..].iter().filter(|&&b| b == b'S').count()
    }

    #[test]
    fn test_full_capture_of_four_shots() {
        let raw = frames(4);
        let expected: Vec<usize> = raw
            .iter()
            .map(|s| s.points.iter().filter(|p| p.z >= 1.0 && p.z <= 10.0).count())
            .collect();
        let (mut session, controller) = session(4, raw);

        session.start().unwrap();
        assert_eq!(session.shots().len(), 1);
        assert_eq!(session.state(), CaptureState::AdvancingTurntable);
        assert_eq!(controller.written(), vec![b'R', b'T', 4, b'S']);

        for taken in 2..=4 {
            controller.inject_read(b"D");
            tick_until(&mut session, |s| s.shots().len() == taken);
            assert_eq!(session.shots().len(), taken);
            // Every sample is followed by exactly one step command
            assert_eq!(count_steps(&controller), taken);
        }

        controller.inject_read(b"F");
        tick_until(&mut session, |s| s.state() == CaptureState::Complete);
        assert_eq!(session.state(), CaptureState::Complete);
        assert_eq!(controller.written().last(), Some(&b'R'));

        let counts: Vec<usize> = session.shots().iter().map(ShotCloud::len).collect();
        assert_eq!(counts, expected);
        for (i, shot) in session.shots().iter().enumerate() {
            assert_eq!(shot.index(), i);
        }

        let combined = session.take_combined_cloud().unwrap();
        assert_eq!(combined.len(), expected.iter().sum::<usize>());
        assert!(session.shots().is_empty());
    }

    #[test]
    fn test_final_shot_sampled_on_cycle_complete() {
        let (mut session, controller) = session(2, frames(2));
        session.start().unwrap();

        controller.inject_read(b"F");
        tick_until(&mut session, |s| s.state() == CaptureState::Complete);

        assert_eq!(session.shots().len(), 2);
        assert_eq!(session.link().state(), LinkState::Idle);
    }

    #[test]
    fn test_early_cycle_complete_is_error() {
        let (mut session, controller) = session(5, frames(5));
        session.start().unwrap();

        controller.inject_read(b"F");
        tick_until(&mut session, |s| s.state() == CaptureState::Error);

        assert_eq!(session.state(), CaptureState::Error);
        assert_eq!(session.shots().len(), 1);
        assert!(session.status().contains("1 of 5"));
    }

    #[test]
    fn test_extra_step_done_advances_without_sampling() {
        let (mut session, controller) = session(1, frames(3));
        session.start().unwrap();
        assert_eq!(session.shots().len(), 1);

        controller.inject_read(b"D");
        tick_until(&mut session, |_| count_steps(&controller) == 2);

        assert_eq!(count_steps(&controller), 2);
        assert_eq!(session.shots().len(), 1);
    }

    #[test]
    fn test_tick_without_input_is_noop() {
        let (mut session, controller) = session(3, frames(1));
        session.start().unwrap();
        let written = controller.written();

        for _ in 0..50 {
            session.tick();
        }

        assert_eq!(session.shots().len(), 1);
        assert_eq!(session.state(), CaptureState::AdvancingTurntable);
        assert_eq!(controller.written(), written);
    }

    #[test]
    fn test_same_frame_is_not_sampled_twice() {
        // Only one frame: the second request must wait for a newer frame
        let (mut session, controller) = session(3, frames(1));
        session.start().unwrap();

        controller.inject_read(b"D");
        tick_until(&mut session, |s| s.state() == CaptureState::Sampling);
        for _ in 0..20 {
            session.tick();
        }
        assert_eq!(session.state(), CaptureState::Sampling);
        assert_eq!(session.shots().len(), 1);
        assert_eq!(count_steps(&controller), 1);
    }

    #[test]
    fn test_disconnect_keeps_partial_shots() {
        let (mut session, controller) = session(4, frames(4));
        session.start().unwrap();

        controller.inject_read(b"D");
        tick_until(&mut session, |s| s.shots().len() == 2);

        controller.fail_io(true);
        tick_until(&mut session, |s| s.state() == CaptureState::Idle);

        assert_eq!(session.state(), CaptureState::Idle);
        assert_eq!(session.shots().len(), 2);
        assert!(!session.link().is_connected());
        assert!(session.status().contains("2 shots kept"));

        let combined = session.take_combined_cloud().unwrap();
        assert!(combined.len() <= 200);
    }

    #[test]
    fn test_config_is_snapshotted() {
        let (mut session, _controller) = session(4, frames(4));
        session.start().unwrap();

        assert!(matches!(
            session.set_config(ScanConfig::new().with_images(8)),
            Err(ScanError::SessionActive)
        ));
        assert!(matches!(session.start(), Err(ScanError::SessionActive)));
        assert_eq!(session.config().number_of_images, 4);
    }

    #[test]
    fn test_start_requires_connection() {
        let mut session = CaptureSession::new(
            Box::new(ReplayCamera::new()),
            TurntableLink::new(),
            ScanConfig::default(),
        );
        assert!(matches!(session.start(), Err(ScanError::NotConnected)));
        assert_eq!(session.state(), CaptureState::Idle);
    }

    #[test]
    fn test_background_calibration() {
        let (mut session, _controller) = session(4, frames(6));
        let mut config = session.config().clone();
        config.background.calibration_frames = 3;
        session.set_config(config).unwrap();

        session.calibrate_background().unwrap();
        assert_eq!(session.state(), CaptureState::Calibrating);
        assert!(matches!(session.start(), Err(ScanError::SessionActive)));

        tick_until(&mut session, |s| s.state() == CaptureState::Idle);
        assert_eq!(session.state(), CaptureState::Idle);
        assert_eq!(session.background().unwrap().last_frame_id(), 3);

        // Later frames show the same static color: everything is background
        session.start().unwrap();
        assert_eq!(session.shots().len(), 1);
        assert!(session.shots()[0].is_empty());

        session.link_mut().disconnect();
        session.tick();
        session.clear_background().unwrap();
        assert!(session.background().is_none());
    }
}
