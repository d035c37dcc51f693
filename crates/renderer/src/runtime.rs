//! The cooperative render loop and the inputs it polls.
//!
//! The host owns the clock: it asks [`RenderLoop::ready_for_frame`] whether an
//! iteration is due, runs [`RenderLoop::tick`] when it is, and otherwise sleeps
//! until [`RenderLoop::next_deadline`]. Each tick reads one [`FrameSnapshot`],
//! so parameter or source changes are only ever observed between iterations.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::error::UploadError;
use crate::gpu::DistortionUniforms;
use crate::types::{PrescriptionParameters, SourceImage, TargetSize};

/// Re-poll interval while nothing is presented (no source, skipped frame).
pub const IDLE_INTERVAL: Duration = Duration::from_millis(16);

/// Latest values published by the host, read once per iteration.
#[derive(Debug, Clone, Default)]
pub struct FrameSnapshot {
    pub parameters: PrescriptionParameters,
    pub source: Option<SourceImage>,
}

/// Thread-safe publication point between the host and the render loop.
///
/// Every publish replaces the previous value wholesale; the loop only ever sees
/// the most recent one.
#[derive(Debug, Clone, Default)]
pub struct FrameInputs {
    shared: Arc<Mutex<FrameSnapshot>>,
}

impl FrameInputs {
    pub fn new(parameters: PrescriptionParameters) -> Self {
        Self {
            shared: Arc::new(Mutex::new(FrameSnapshot {
                parameters,
                source: None,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, FrameSnapshot> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn publish_parameters(&self, parameters: PrescriptionParameters) {
        self.lock().parameters = parameters;
    }

    /// `None` withdraws the source; the loop stops drawing until a new one arrives.
    pub fn publish_source(&self, source: Option<SourceImage>) {
        self.lock().source = source;
    }

    pub fn parameters(&self) -> PrescriptionParameters {
        self.lock().parameters
    }

    pub fn has_source(&self) -> bool {
        self.lock().source.is_some()
    }

    /// Parameters and source read under a single lock.
    pub fn snapshot(&self) -> FrameSnapshot {
        self.lock().clone()
    }
}

/// GPU side of one iteration.
pub(crate) trait FrameBackend {
    /// Replaces the texture contents with `source`.
    fn upload_source(&mut self, source: &SourceImage) -> Result<(), UploadError>;
    /// Sets the viewport to `target`, pushes `uniforms` and draws the quad.
    fn draw(
        &mut self,
        target: TargetSize,
        uniforms: &DistortionUniforms,
    ) -> Result<(), wgpu::SurfaceError>;
    /// Rebuilds the swapchain at the fixed target size.
    fn reconfigure(&mut self);
}

/// What a single [`RenderLoop::tick`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// A frame was drawn and presented.
    Drawn,
    /// No source image is published; nothing was drawn.
    NoSource,
    /// The surface was not ready this time round.
    Skipped,
    /// The loop is stopped and will never draw again.
    Stopped,
}

/// Decides when the next iteration is due.
#[derive(Debug, Clone)]
pub(crate) struct FrameScheduler {
    frame_interval: Option<Duration>,
    next_due: Option<Instant>,
    active: bool,
}

impl FrameScheduler {
    pub fn new(target_fps: Option<f32>) -> Self {
        let frame_interval = target_fps
            .filter(|fps| fps.is_finite() && *fps > 0.0)
            .and_then(|fps| Duration::try_from_secs_f32(1.0 / fps).ok());
        Self {
            frame_interval,
            next_due: None,
            active: true,
        }
    }

    /// Books the next iteration after one that presented a frame.
    pub fn mark_rendered(&mut self, now: Instant) {
        self.next_due = self
            .frame_interval
            .and_then(|interval| now.checked_add(interval));
    }

    /// Books the next iteration after one that presented nothing.
    pub fn mark_idle(&mut self, now: Instant) {
        let interval = self.frame_interval.unwrap_or(IDLE_INTERVAL).max(IDLE_INTERVAL);
        self.next_due = now.checked_add(interval).or(Some(now + IDLE_INTERVAL));
    }

    /// Books an immediate retry.
    pub fn mark_retry(&mut self) {
        self.next_due = None;
    }

    pub fn ready_for_frame(&self, now: Instant) -> bool {
        self.active && self.next_due.map_or(true, |due| now >= due)
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        if self.active {
            self.next_due
        } else {
            None
        }
    }

    pub fn cancel(&mut self) {
        self.active = false;
        self.next_due = None;
    }

    pub fn is_active(&self) -> bool {
        self.active
    }
}

/// Owns a backend and drives it one iteration at a time until stopped.
pub(crate) struct RenderLoop<B: FrameBackend> {
    backend: Option<B>,
    inputs: FrameInputs,
    target: TargetSize,
    scheduler: FrameScheduler,
}

impl<B: FrameBackend> RenderLoop<B> {
    pub fn new(
        backend: B,
        inputs: FrameInputs,
        target: TargetSize,
        target_fps: Option<f32>,
    ) -> Self {
        Self {
            backend: Some(backend),
            inputs,
            target,
            scheduler: FrameScheduler::new(target_fps),
        }
    }

    #[cfg(test)]
    pub fn backend(&self) -> Option<&B> {
        self.backend.as_ref()
    }

    pub fn is_running(&self) -> bool {
        self.backend.is_some() && self.scheduler.is_active()
    }

    pub fn ready_for_frame(&self, now: Instant) -> bool {
        self.backend.is_some() && self.scheduler.ready_for_frame(now)
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.backend.as_ref().and(self.scheduler.next_deadline())
    }

    /// Runs one iteration against the latest published inputs.
    pub fn tick(&mut self, now: Instant) -> TickOutcome {
        let Some(backend) = self.backend.as_mut() else {
            return TickOutcome::Stopped;
        };

        let snapshot = self.inputs.snapshot();
        let Some(source) = snapshot.source else {
            tracing::trace!("no source image; rescheduling");
            self.scheduler.mark_idle(now);
            return TickOutcome::NoSource;
        };

        if let Err(err) = backend.upload_source(&source) {
            tracing::debug!(%err, "source upload skipped; drawing previous texture contents");
        }

        let uniforms = DistortionUniforms::from_parameters(&snapshot.parameters, self.target);
        match backend.draw(self.target, &uniforms) {
            Ok(()) => {
                self.scheduler.mark_rendered(now);
                TickOutcome::Drawn
            }
            Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                tracing::debug!(size = %self.target, "surface lost or outdated; reconfiguring");
                backend.reconfigure();
                self.scheduler.mark_retry();
                TickOutcome::Skipped
            }
            Err(wgpu::SurfaceError::OutOfMemory) => {
                tracing::error!("surface out of memory; stopping renderer");
                self.stop();
                TickOutcome::Stopped
            }
            Err(err) => {
                tracing::debug!(?err, "surface frame unavailable; skipping");
                self.scheduler.mark_idle(now);
                TickOutcome::Skipped
            }
        }
    }

    /// Cancels the pending iteration and releases the backend. Idempotent.
    pub fn stop(&mut self) {
        self.scheduler.cancel();
        if let Some(backend) = self.backend.take() {
            drop(backend);
            tracing::debug!("render loop stopped; GPU resources released");
        }
    }
}

impl<B: FrameBackend> Drop for RenderLoop<B> {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EyeOffset;
    use image::{DynamicImage, RgbaImage};
    use std::collections::VecDeque;

    #[derive(Default)]
    struct Record {
        uploads: Vec<u64>,
        draws: Vec<(TargetSize, DistortionUniforms)>,
        reconfigures: usize,
        dropped: usize,
        fail_uploads: bool,
        draw_results: VecDeque<Result<(), wgpu::SurfaceError>>,
    }

    struct RecordingBackend {
        record: Arc<Mutex<Record>>,
    }

    impl FrameBackend for RecordingBackend {
        fn upload_source(&mut self, source: &SourceImage) -> Result<(), UploadError> {
            let mut record = self.record.lock().unwrap();
            if record.fail_uploads {
                return Err(UploadError::Empty);
            }
            record.uploads.push(source.generation());
            Ok(())
        }

        fn draw(
            &mut self,
            target: TargetSize,
            uniforms: &DistortionUniforms,
        ) -> Result<(), wgpu::SurfaceError> {
            let mut record = self.record.lock().unwrap();
            let result = record.draw_results.pop_front().unwrap_or(Ok(()));
            if result.is_ok() {
                record.draws.push((target, *uniforms));
            }
            result
        }

        fn reconfigure(&mut self) {
            self.record.lock().unwrap().reconfigures += 1;
        }
    }

    impl Drop for RecordingBackend {
        fn drop(&mut self) {
            self.record.lock().unwrap().dropped += 1;
        }
    }

    type Harness = (RenderLoop<RecordingBackend>, FrameInputs, Arc<Mutex<Record>>);

    fn harness(target_fps: Option<f32>) -> Harness {
        let record = Arc::new(Mutex::new(Record::default()));
        let inputs = FrameInputs::new(PrescriptionParameters::default());
        let backend = RecordingBackend {
            record: Arc::clone(&record),
        };
        let target = TargetSize::new(640, 480);
        let render_loop = RenderLoop::new(backend, inputs.clone(), target, target_fps);
        (render_loop, inputs, record)
    }

    fn source() -> SourceImage {
        SourceImage::new(DynamicImage::ImageRgba8(RgbaImage::new(4, 4)))
    }

    #[test]
    fn stop_before_first_tick_never_draws() {
        let (mut render_loop, inputs, record) = harness(None);
        inputs.publish_source(Some(source()));
        render_loop.stop();

        assert_eq!(render_loop.tick(Instant::now()), TickOutcome::Stopped);
        assert!(!render_loop.ready_for_frame(Instant::now()));
        assert_eq!(render_loop.next_deadline(), None);
        let record = record.lock().unwrap();
        assert!(record.uploads.is_empty());
        assert!(record.draws.is_empty());
        assert_eq!(record.dropped, 1);
    }

    #[test]
    fn missing_source_skips_draw_but_keeps_scheduling() {
        let (mut render_loop, _inputs, record) = harness(None);
        let now = Instant::now();

        assert_eq!(render_loop.tick(now), TickOutcome::NoSource);
        assert!(render_loop.is_running());
        assert_eq!(render_loop.next_deadline(), Some(now + IDLE_INTERVAL));
        assert!(!render_loop.ready_for_frame(now));
        assert!(render_loop.ready_for_frame(now + IDLE_INTERVAL));
        assert!(record.lock().unwrap().draws.is_empty());
    }

    #[test]
    fn source_appearing_later_is_picked_up_without_restart() {
        let (mut render_loop, inputs, record) = harness(None);
        let now = Instant::now();
        assert_eq!(render_loop.tick(now), TickOutcome::NoSource);

        let image = source();
        inputs.publish_source(Some(image.clone()));
        assert_eq!(render_loop.tick(now + IDLE_INTERVAL), TickOutcome::Drawn);

        inputs.publish_source(None);
        assert_eq!(render_loop.tick(now + IDLE_INTERVAL * 2), TickOutcome::NoSource);

        let record = record.lock().unwrap();
        assert_eq!(record.uploads, vec![image.generation()]);
        assert_eq!(record.draws.len(), 1);
    }

    #[test]
    fn every_drawn_frame_uploads_the_current_source() {
        let (mut render_loop, inputs, record) = harness(None);
        let image = source();
        inputs.publish_source(Some(image.clone()));
        let now = Instant::now();
        for _ in 0..3 {
            assert!(render_loop.ready_for_frame(now));
            assert_eq!(render_loop.tick(now), TickOutcome::Drawn);
        }
        assert_eq!(record.lock().unwrap().uploads, vec![image.generation(); 3]);
    }

    #[test]
    fn upload_failure_still_draws() {
        let (mut render_loop, inputs, record) = harness(None);
        record.lock().unwrap().fail_uploads = true;
        inputs.publish_source(Some(source()));

        assert_eq!(render_loop.tick(Instant::now()), TickOutcome::Drawn);
        assert!(render_loop.is_running());
        let record = record.lock().unwrap();
        assert!(record.uploads.is_empty());
        assert_eq!(record.draws.len(), 1);
    }

    #[test]
    fn uniforms_carry_latest_parameters_with_axis_in_radians() {
        let (mut render_loop, inputs, record) = harness(None);
        inputs.publish_source(Some(source()));
        inputs.publish_parameters(PrescriptionParameters::new(-4.0, 0.0, 0.0, EyeOffset::CENTERED));
        inputs.publish_parameters(PrescriptionParameters::new(
            -1.0,
            -0.75,
            180.0,
            EyeOffset::new(0.25, -0.1),
        ));

        render_loop.tick(Instant::now());
        let record = record.lock().unwrap();
        let (target, uniforms) = record.draws[0];
        assert_eq!(target, TargetSize::new(640, 480));
        assert_eq!(uniforms.sphere, -1.0);
        assert_eq!(uniforms.cylinder, -0.75);
        assert!((uniforms.axis - std::f32::consts::PI).abs() < 1e-6);
        assert_eq!(uniforms.eye_offset, [0.25, -0.1]);
        assert_eq!(uniforms.resolution, [640.0, 480.0]);
    }

    #[test]
    fn stop_is_idempotent_and_releases_once() {
        let (mut render_loop, inputs, record) = harness(None);
        inputs.publish_source(Some(source()));
        assert_eq!(render_loop.tick(Instant::now()), TickOutcome::Drawn);

        render_loop.stop();
        render_loop.stop();
        assert!(!render_loop.is_running());
        assert!(render_loop.backend().is_none());
        drop(render_loop);
        assert_eq!(record.lock().unwrap().dropped, 1);
    }

    #[test]
    fn fps_cap_defers_next_frame() {
        let (mut render_loop, inputs, _record) = harness(Some(10.0));
        inputs.publish_source(Some(source()));
        let now = Instant::now();

        assert_eq!(render_loop.tick(now), TickOutcome::Drawn);
        let deadline = render_loop.next_deadline().expect("capped loop books a deadline");
        assert!(deadline > now);
        assert!(deadline - now <= Duration::from_millis(101));
        assert!(!render_loop.ready_for_frame(now + Duration::from_millis(50)));
        assert!(render_loop.ready_for_frame(deadline));
    }

    #[test]
    fn lost_surface_reconfigures_and_retries_immediately() {
        let (mut render_loop, inputs, record) = harness(None);
        record
            .lock()
            .unwrap()
            .draw_results
            .push_back(Err(wgpu::SurfaceError::Lost));
        inputs.publish_source(Some(source()));
        let now = Instant::now();

        assert_eq!(render_loop.tick(now), TickOutcome::Skipped);
        assert!(render_loop.ready_for_frame(now));
        assert_eq!(render_loop.tick(now), TickOutcome::Drawn);
        assert_eq!(record.lock().unwrap().reconfigures, 1);
    }

    #[test]
    fn out_of_memory_stops_the_loop() {
        let (mut render_loop, inputs, record) = harness(None);
        record
            .lock()
            .unwrap()
            .draw_results
            .push_back(Err(wgpu::SurfaceError::OutOfMemory));
        inputs.publish_source(Some(source()));

        assert_eq!(render_loop.tick(Instant::now()), TickOutcome::Stopped);
        assert!(!render_loop.is_running());
        assert_eq!(record.lock().unwrap().dropped, 1);
    }

    #[test]
    fn timeout_skips_frame_and_waits_idle_interval() {
        let (mut render_loop, inputs, record) = harness(None);
        record
            .lock()
            .unwrap()
            .draw_results
            .push_back(Err(wgpu::SurfaceError::Timeout));
        inputs.publish_source(Some(source()));
        let now = Instant::now();

        assert_eq!(render_loop.tick(now), TickOutcome::Skipped);
        assert!(render_loop.is_running());
        assert_eq!(render_loop.next_deadline(), Some(now + IDLE_INTERVAL));
        assert!(!render_loop.ready_for_frame(now));
        let record = record.lock().unwrap();
        assert_eq!(record.reconfigures, 0);
        assert!(record.draws.is_empty());
    }

    #[test]
    fn scheduler_treats_unrepresentable_interval_as_uncapped() {
        for fps in [1e-20, f32::MIN_POSITIVE] {
            let mut scheduler = FrameScheduler::new(Some(fps));
            let now = Instant::now();
            scheduler.mark_rendered(now);
            assert!(scheduler.ready_for_frame(now));
            scheduler.mark_idle(now);
            assert_eq!(scheduler.next_deadline(), Some(now + IDLE_INTERVAL));
        }
    }

    #[test]
    fn scheduler_ignores_non_positive_fps() {
        for fps in [Some(0.0), Some(-5.0), Some(f32::NAN), None] {
            let mut scheduler = FrameScheduler::new(fps);
            let now = Instant::now();
            scheduler.mark_rendered(now);
            assert!(scheduler.ready_for_frame(now));
            assert_eq!(scheduler.next_deadline(), None);
        }
    }
}
