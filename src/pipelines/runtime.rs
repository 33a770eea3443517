// SPDX-License-Identifier: GPL-3.0-only

//! Pipeline session
//!
//! Owns the sensor and the two background loops:
//!
//! ```text
//! sensor ──events──▶ capture loop ──▶ FrameStore ──▶ world worker
//!                        │                 │              │
//!                        ▼                 ▼              ▼
//!                  registration      BufferPublisher ◀── DoubleBuffer
//! ```
//!
//! Calibration is request-driven and runs on the caller's thread against
//! snapshots of the latest frames.

use crate::backends::sensor::{
    FieldOfView, FrameSource, LoopAction, LoopController, SensorEvent, SensorProvider,
    normalized_to_degrees, settings_from_config,
};
use crate::config::{CalibrationBoard, Config, SkeletonConfig};
use crate::constants::{DepthRange, timing};
use crate::errors::{PipelineError, PipelineResult};
use crate::pipelines::calibration::{
    CalibrationInputs, Corner, CornerDetector, CorrespondenceFinder,
};
use crate::pipelines::export::{PointColors, export_las};
use crate::pipelines::publisher::{BufferPublisher, PresentSummary, PresentationSink, Published};
use crate::pipelines::registration::RegistrationMapper;
use crate::pipelines::skeleton::{SkeletonSplit, split};
use crate::pipelines::store::{BufferKind, DepthBuffer, FrameInfo, FrameStore};
use crate::pipelines::world::WorldProjector;
use crossbeam::channel::{self, Receiver, RecvTimeoutError};
use parking_lot::Mutex;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Status reported while everything is healthy
pub const STATUS_OK: &str = "OK";

/// Latest event of each kind from one drain of the channel
#[derive(Default)]
struct PendingFrames {
    color: Option<SensorEvent>,
    depth: Option<SensorEvent>,
    skeleton: Option<SensorEvent>,
}

impl PendingFrames {
    fn push(&mut self, event: SensorEvent) {
        // Last write wins: older frames of the same kind are dropped
        match event {
            SensorEvent::Color(_) => self.color = Some(event),
            SensorEvent::Depth(_) => self.depth = Some(event),
            SensorEvent::Skeleton(_) => self.skeleton = Some(event),
        }
    }

    fn into_events(self) -> impl Iterator<Item = SensorEvent> {
        [self.color, self.depth, self.skeleton].into_iter().flatten()
    }
}

/// State owned by the capture loop thread
struct CaptureLoop {
    events: Receiver<SensorEvent>,
    store: Arc<FrameStore>,
    registration: Option<Arc<RegistrationMapper>>,
    depth_frames: u64,
    dropped: u64,
}

impl CaptureLoop {
    fn iterate(&mut self) -> LoopAction {
        let first = match self.events.recv_timeout(timing::CAPTURE_RECV_TIMEOUT) {
            Ok(event) => event,
            Err(RecvTimeoutError::Timeout) => return LoopAction::Continue,
            Err(RecvTimeoutError::Disconnected) => {
                debug!("Sensor channel closed");
                return LoopAction::Stop;
            }
        };

        let mut pending = PendingFrames::default();
        let mut received = 1u64;
        pending.push(first);
        for event in self.events.try_iter() {
            received += 1;
            pending.push(event);
        }

        let mut applied = 0u64;
        for event in pending.into_events() {
            applied += 1;
            self.apply(event);
        }
        self.dropped += received - applied;
        LoopAction::Continue
    }

    fn apply(&mut self, event: SensorEvent) {
        match event {
            SensorEvent::Color(frame) => {
                self.store.submit_color(
                    frame.format,
                    &frame.data,
                    frame.frame_number,
                    frame.timestamp_ms,
                );
            }
            SensorEvent::Depth(frame) => {
                self.store.submit_depth(
                    frame.format,
                    &frame.data,
                    frame.frame_number,
                    frame.timestamp_ms,
                );

                if let Some(registration) = &self.registration
                    && let Some(color_format) = self.store.color_format()
                {
                    let depth = DepthBuffer {
                        format: frame.format,
                        data: frame.data,
                        frame_number: frame.frame_number,
                        timestamp_ms: frame.timestamp_ms,
                    };
                    registration.update(&depth, color_format);
                }

                self.depth_frames += 1;
                if self.depth_frames % timing::FRAME_LOG_INTERVAL == 0 {
                    debug!(
                        depth_frames = self.depth_frames,
                        dropped = self.dropped,
                        "Capture progress"
                    );
                }
            }
            SensorEvent::Skeleton(frame) => {
                self.store.submit_skeletons(&frame.skeletons);
            }
        }
    }
}

/// One capture session against one sensor
pub struct Pipeline {
    config: Config,
    detector: Arc<dyn CornerDetector>,
    store: Arc<FrameStore>,
    projector: WorldProjector,
    publisher: BufferPublisher,
    sensor: Option<Box<dyn FrameSource>>,
    registration: Option<Arc<RegistrationMapper>>,
    capture: Option<LoopController>,
    status: Mutex<String>,
}

impl Pipeline {
    pub fn new(config: Config, detector: Arc<dyn CornerDetector>) -> Self {
        let store = Arc::new(FrameStore::new());
        let projector = WorldProjector::new();
        let publisher = BufferPublisher::new(
            Arc::clone(&store),
            projector.buffers(),
            config.publish_timeout(),
        );
        Self {
            config,
            detector,
            store,
            projector,
            publisher,
            sensor: None,
            registration: None,
            capture: None,
            status: Mutex::new("Not started".to_string()),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// "OK" while healthy, otherwise the last error message
    pub fn status(&self) -> String {
        self.status.lock().clone()
    }

    fn set_status(&self, status: impl Into<String>) {
        *self.status.lock() = status.into();
    }

    pub fn is_running(&self) -> bool {
        self.sensor.is_some()
    }

    pub fn store(&self) -> &Arc<FrameStore> {
        &self.store
    }

    pub fn publisher(&self) -> &BufferPublisher {
        &self.publisher
    }

    pub fn projector(&self) -> &WorldProjector {
        &self.projector
    }

    /// Open the configured sensor and start all loops.
    ///
    /// Does nothing when the configuration disables the pipeline. With no
    /// sensor attached the pipeline stays idle and reports
    /// `SensorUnavailable`.
    pub fn start(&mut self, provider: &dyn SensorProvider) -> PipelineResult<()> {
        if self.is_running() {
            return Ok(());
        }
        if let Err(e) = self.config.validate() {
            self.set_status(e.to_string());
            return Err(e);
        }
        if !self.config.enabled {
            debug!("Pipeline disabled, not opening a sensor");
            self.set_status("Disabled");
            return Ok(());
        }

        let sensors = provider.enumerate();
        if sensors.is_empty() {
            let err = PipelineError::SensorUnavailable("No sensor found.".to_string());
            warn!("{}", err);
            self.set_status(err.to_string());
            return Err(err);
        }

        let mut sensor = provider.open(self.config.sensor_index).map_err(|e| {
            let err = PipelineError::SensorUnavailable(e.to_string());
            self.set_status(err.to_string());
            err
        })?;

        let (tx, rx) = channel::bounded(timing::CAPTURE_CHANNEL_CAPACITY);
        let settings = settings_from_config(&self.config);
        if let Err(e) = sensor.start(&settings, tx) {
            let err = PipelineError::SensorUnavailable(e.to_string());
            warn!(error = %e, "Sensor failed to start");
            self.set_status(err.to_string());
            return Err(err);
        }

        info!(
            sensor = %sensor.info().name,
            serial = %sensor.info().serial,
            "Sensor started"
        );

        let (min, max) = sensor.elevation_limits();
        let degrees = normalized_to_degrees(self.config.elevation, min, max);
        if let Err(e) = sensor.set_elevation_degrees(degrees) {
            debug!(error = %e, "Elevation not applied");
        }

        let mapper = sensor.mapper();
        let registration = Arc::new(RegistrationMapper::new(Arc::clone(&mapper)));
        self.registration = Some(Arc::clone(&registration));

        self.projector.start(
            Arc::clone(&self.store),
            mapper,
            self.config.world_idle_wait(),
        );

        let mut capture = CaptureLoop {
            events: rx,
            store: Arc::clone(&self.store),
            registration: self.config.registration_enabled.then_some(registration),
            depth_frames: 0,
            dropped: 0,
        };
        self.capture = Some(LoopController::start("capture", move || capture.iterate()));

        self.sensor = Some(sensor);
        self.set_status(STATUS_OK);
        Ok(())
    }

    /// Stop the sensor and join both loops. Safe to call repeatedly.
    pub fn stop(&mut self) {
        let Some(mut sensor) = self.sensor.take() else {
            return;
        };
        sensor.stop();
        drop(sensor);

        if let Some(mut capture) = self.capture.take() {
            capture.stop();
        }
        self.projector.stop();
        self.set_status("Stopped");
        info!("Pipeline stopped");
    }

    /// Wait until color and depth frames, a registration table and a world
    /// buffer are all available
    pub fn wait_until_ready(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            let registered = !self.config.registration_enabled
                || self
                    .registration
                    .as_ref()
                    .is_some_and(|r| r.latest().is_some());
            if self.store.color_format().is_some()
                && self.store.depth_format().is_some()
                && registered
                && self.projector.buffers().generation() > 0
            {
                return true;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return false;
            }
            let seen = self.store.depth_generation();
            self.store
                .wait_for_depth(seen, remaining.min(timing::WORLD_IDLE_WAIT));
        }
    }

    /// Find board corner correspondences using the configured board
    pub fn calibrate(&self) -> PipelineResult<Vec<Corner>> {
        self.calibrate_board(self.config.board)
    }

    /// Find board corner correspondences for a specific board size.
    ///
    /// The status string reflects the outcome.
    pub fn calibrate_board(&self, board: CalibrationBoard) -> PipelineResult<Vec<Corner>> {
        let result = self.find_corners(board);
        match &result {
            Ok(_) => self.set_status(STATUS_OK),
            Err(e) => self.set_status(e.to_string()),
        }
        result
    }

    fn find_corners(&self, board: CalibrationBoard) -> PipelineResult<Vec<Corner>> {
        let sensor = self
            .sensor
            .as_ref()
            .ok_or_else(|| PipelineError::SensorUnavailable("Pipeline not started".to_string()))?;
        let registration = self
            .registration
            .as_ref()
            .ok_or_else(|| PipelineError::SensorUnavailable("Pipeline not started".to_string()))?;

        let color = self
            .store
            .snapshot_color()
            .ok_or_else(|| PipelineError::NoFrame("RGB".into()))?;
        let depth = self
            .store
            .snapshot_depth()
            .ok_or_else(|| PipelineError::NoFrame("depth".into()))?;
        let table = registration.table_for(&depth, color.format);

        let finder = CorrespondenceFinder::new(
            Arc::clone(&self.detector),
            sensor.mapper(),
            self.config.calibration_world_source,
        );
        finder.find(
            &CalibrationInputs {
                color: &color,
                depth: &depth,
                registration: &table,
                publisher: Some(&self.publisher),
            },
            board,
        )
    }

    /// Export the published world buffer as a LAS point cloud, colored
    /// from the latest color frame when one is registered
    pub fn export_las(&self, path: &Path) -> PipelineResult<usize> {
        let Published::World { buffer, generation } = self.publisher.publish(BufferKind::World)?
        else {
            return Err(PipelineError::NoFrame("world".into()));
        };
        debug!(generation, path = %path.display(), "Exporting world buffer");

        let color = self.store.snapshot_color();
        let depth = self.store.snapshot_depth();
        let table = match (&self.registration, &color, &depth) {
            (Some(registration), Some(color), Some(depth))
                if depth.format.width == buffer.width && depth.format.height == buffer.height =>
            {
                Some(registration.table_for(depth, color.format))
            }
            _ => None,
        };
        let colors = color
            .as_ref()
            .zip(table.as_deref())
            .map(|(color, registration)| PointColors {
                color,
                registration,
            });

        export_las(&buffer, colors.as_ref(), path)
    }

    /// Upload dirty buffers to a consumer
    pub fn present<S: PresentationSink>(&self, sink: &mut S, handle: &S::Handle) -> PresentSummary {
        self.publisher.present(sink, handle)
    }

    /// Release a consumer's textures
    pub fn destroy_presentation<S: PresentationSink>(&self, sink: &mut S, handle: &S::Handle) {
        self.publisher.destroy(sink, handle);
    }

    /// Frame number and timestamp of the latest frame
    pub fn frame_info(&self) -> Option<FrameInfo> {
        self.store.frame_info()
    }

    /// Latest skeletons as per-field lists
    pub fn skeletons(&self) -> SkeletonSplit {
        split(&self.store.snapshot_skeletons())
    }

    /// Nominal (color, depth) fields of view of the open sensor
    pub fn fields_of_view(&self) -> Option<(FieldOfView, FieldOfView)> {
        self.sensor.as_ref().map(|s| s.fields_of_view())
    }

    /// Change depth range; applied to the sensor immediately when running.
    ///
    /// A sensor that rejects the setting keeps streaming with its old one.
    pub fn set_depth_range(&mut self, range: DepthRange) {
        self.config.depth_range = range;
        if let Some(sensor) = self.sensor.as_mut()
            && let Err(e) = sensor.set_depth_range(range)
        {
            warn!(range = range.display_name(), error = %e, "Depth range not applied");
        }
    }

    /// Change skeleton tracking; applied to the sensor immediately when running
    pub fn set_skeleton_config(&mut self, skeleton: SkeletonConfig) {
        self.config.skeleton = skeleton;
        if let Some(sensor) = self.sensor.as_mut()
            && let Err(e) = sensor.set_skeleton_config(&skeleton)
        {
            warn!(error = %e, "Skeleton settings not applied");
        }
    }

    /// Set the normalized (0..1) elevation. Returns the applied angle in
    /// degrees when a sensor is open.
    pub fn set_elevation(&mut self, normalized: f64) -> PipelineResult<Option<i32>> {
        self.config.elevation = normalized.clamp(0.0, 1.0);
        let Some(sensor) = self.sensor.as_mut() else {
            return Ok(None);
        };
        let (min, max) = sensor.elevation_limits();
        let degrees = normalized_to_degrees(self.config.elevation, min, max);
        sensor.set_elevation_degrees(degrees)?;
        Ok(Some(degrees))
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::sensor::{
        ColorFrame, ColorImageFormat, ColorLayout, DepthFrame, DepthImageFormat, SyntheticMapper,
    };

    fn depth_event(frame_number: u32, mm: u16) -> SensorEvent {
        SensorEvent::Depth(DepthFrame {
            format: DepthImageFormat::new(4, 3),
            data: vec![mm; 12],
            frame_number,
            timestamp_ms: frame_number as i64 * 33,
        })
    }

    fn color_event(frame_number: u32) -> SensorEvent {
        SensorEvent::Color(ColorFrame {
            format: ColorImageFormat::new(4, 3, ColorLayout::Bgra),
            data: vec![frame_number as u8; 48],
            frame_number,
            timestamp_ms: frame_number as i64 * 33,
        })
    }

    fn capture_loop(
        registration: Option<Arc<RegistrationMapper>>,
    ) -> (channel::Sender<SensorEvent>, CaptureLoop) {
        let (tx, rx) = channel::bounded(8);
        let capture = CaptureLoop {
            events: rx,
            store: Arc::new(FrameStore::new()),
            registration,
            depth_frames: 0,
            dropped: 0,
        };
        (tx, capture)
    }

    #[test]
    fn test_latest_frame_of_each_kind_wins() {
        let (tx, mut capture) = capture_loop(None);
        tx.send(depth_event(1, 1000)).unwrap();
        tx.send(depth_event(2, 2000)).unwrap();
        tx.send(color_event(2)).unwrap();

        assert_eq!(capture.iterate(), LoopAction::Continue);

        let depth = capture.store.snapshot_depth().unwrap();
        assert_eq!(depth.frame_number, 2);
        assert!(depth.data.iter().all(|&mm| mm == 2000));
        assert_eq!(capture.store.snapshot_color().unwrap().frame_number, 2);
        assert_eq!(capture.store.depth_generation(), 1);
        assert_eq!(capture.depth_frames, 1);
        assert_eq!(capture.dropped, 1);
    }

    #[test]
    fn test_color_in_same_drain_feeds_registration() {
        let registration = Arc::new(RegistrationMapper::new(Arc::new(SyntheticMapper::default())));
        let (tx, mut capture) = capture_loop(Some(Arc::clone(&registration)));
        tx.send(depth_event(1, 1500)).unwrap();
        tx.send(color_event(1)).unwrap();

        capture.iterate();

        let table = registration.latest().unwrap();
        assert_eq!(table.frame_number, 1);
        assert_eq!(table.len(), 12);
        assert_eq!(capture.dropped, 0);
    }

    #[test]
    fn test_closed_channel_stops_loop() {
        let (tx, mut capture) = capture_loop(None);
        drop(tx);
        assert_eq!(capture.iterate(), LoopAction::Stop);
    }
}
