//! Capture session runner.
//!
//! One task per session owns the [`CaptureSession`] and multiplexes three
//! inputs: the sampling interval, the countdown interval (only while a
//! countdown runs) and control commands from the [`SessionHandle`]. All state
//! changes happen on that task, so a stale timer firing can never race a
//! cancel or a capture.
//!
//! Detection runs on the blocking pool. The camera and adapter travel into
//! the blocking call and come back with the result, so at most one call is
//! in flight; a sampling tick that finds one pending is dropped.

use crate::config::EngineConfig;
use crate::store::{FaceStore, RecordFilter, StoreError};
use chrono::Utc;
use facegate_core::capture::{CaptureEvent, CaptureResult, CaptureSession, CaptureState};
use facegate_core::record::StoredFaceData;
use facegate_core::{
    find_duplicates, DetectionAdapter, DetectionResult, DuplicateCandidate, DuplicateQuery,
    FaceIdentityRecord, FrameSize, NormalizingAdapter, PipelineConfig, QualityMetrics,
};
use facegate_hw::{CameraError, CameraGuard, FrameSource};
use serde::Serialize;
use std::panic::{self, AssertUnwindSafe};
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{self, Instant, Interval, MissedTickBehavior};
use tracing::Instrument;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("camera error: {0}")]
    Camera(#[from] CameraError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("sampler task failed: {0}")]
    Sampler(String),
    #[error("session task failed: {0}")]
    Task(String),
    #[error("session task exited")]
    ChannelClosed,
}

/// Who is being enrolled.
#[derive(Debug, Clone)]
pub struct EnrollRequest {
    pub owner_id: String,
}

/// Latest observable state of a session.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub session_id: Uuid,
    pub state: CaptureState,
    pub countdown_remaining: Option<u32>,
    pub quality: Option<QualityMetrics>,
    /// Samples that produced a result.
    pub samples: u64,
    /// Sampling ticks skipped because detection was still running.
    pub dropped_ticks: u64,
}

/// How a session ended.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SessionOutcome {
    /// The capture was persisted. `duplicates` lists other owners it resembles.
    Enrolled {
        record: FaceIdentityRecord,
        capture: CaptureResult,
        duplicates: Vec<DuplicateCandidate>,
    },
    /// Duplicates were found and the engine is configured to reject them.
    RejectedDuplicate {
        capture: CaptureResult,
        duplicates: Vec<DuplicateCandidate>,
    },
    /// Stopped before anything was captured.
    Stopped,
}

#[derive(Debug)]
enum SessionCommand {
    ManualCapture,
    Cancel,
    Stop,
}

/// Control surface of a running session. Dropping every handle stops it.
pub struct SessionHandle {
    session_id: Uuid,
    commands: mpsc::Sender<SessionCommand>,
    state: watch::Receiver<SessionSnapshot>,
    task: JoinHandle<Result<SessionOutcome, EngineError>>,
}

impl SessionHandle {
    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Capture now, if a face is being tracked.
    pub async fn request_manual_capture(&self) -> Result<(), EngineError> {
        self.send(SessionCommand::ManualCapture).await
    }

    /// Abandon the current attempt and keep sampling from `Idle`.
    pub async fn cancel(&self) -> Result<(), EngineError> {
        self.send(SessionCommand::Cancel).await
    }

    /// End the session without capturing.
    pub async fn stop(&self) -> Result<(), EngineError> {
        self.send(SessionCommand::Stop).await
    }

    async fn send(&self, command: SessionCommand) -> Result<(), EngineError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| EngineError::ChannelClosed)
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.state.clone()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.state.borrow().clone()
    }

    /// Wait for the session to end.
    pub async fn finish(self) -> Result<SessionOutcome, EngineError> {
        let Self { commands, task, .. } = self;
        // Keep the channel open; closing it would read as a stop.
        let result = task.await.map_err(|e| EngineError::Task(e.to_string()))?;
        drop(commands);
        result
    }
}

/// Acquire the camera and start a capture session on the current runtime.
///
/// Camera acquisition happens before this returns; its failure is the one
/// error reported here. Everything after runs on the session task.
pub fn spawn_session<S, A, St>(
    source: S,
    adapter: A,
    store: St,
    request: EnrollRequest,
    config: &EngineConfig,
) -> Result<SessionHandle, EngineError>
where
    S: FrameSource + Send + 'static,
    A: DetectionAdapter + Send + 'static,
    St: FaceStore,
{
    let camera = CameraGuard::acquire(source)?;
    let session_id = Uuid::new_v4();
    tracing::info!(
        session = %session_id,
        owner = %request.owner_id,
        width = camera.size().width,
        height = camera.size().height,
        "capture session starting"
    );

    let sampler = Sampler {
        camera,
        detector: NormalizingAdapter::new(adapter),
    };
    let (cmd_tx, cmd_rx) = mpsc::channel(8);
    let (state_tx, state_rx) = watch::channel(SessionSnapshot {
        session_id,
        state: CaptureState::Idle,
        countdown_remaining: None,
        quality: None,
        samples: 0,
        dropped_ticks: 0,
    });

    let runner = Runner {
        session: CaptureSession::new(config.pipeline.clone()),
        pipeline: config.pipeline.clone(),
        reject_duplicates: config.reject_duplicates,
        owner_id: request.owner_id.clone(),
        state_tx,
    };
    let span = tracing::info_span!("session", id = %session_id, owner = %request.owner_id);
    let task = tokio::spawn(runner.run(sampler, store, cmd_rx).instrument(span));

    Ok(SessionHandle {
        session_id,
        commands: cmd_tx,
        state: state_rx,
        task,
    })
}

/// Camera plus detector; owned by whichever side currently samples.
struct Sampler<S: FrameSource, A> {
    camera: CameraGuard<S>,
    detector: NormalizingAdapter<A>,
}

struct Sample {
    frame: FrameSize,
    detection: Option<DetectionResult>,
}

impl<S: FrameSource, A: DetectionAdapter> Sampler<S, A> {
    /// Read one frame and run detection. Every failure reads as "no face".
    fn sample(&mut self) -> Sample {
        let frame = match self.camera.next_frame() {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(error = %e, "frame read failed");
                return Sample {
                    frame: self.camera.size(),
                    detection: None,
                };
            }
        };

        let detector = &mut self.detector;
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            detector.detect(&frame.data, frame.width, frame.height)
        }));
        let detection = match outcome {
            Ok(Ok(detection)) => detection,
            Ok(Err(e)) => {
                tracing::warn!(error = %e, seq = frame.sequence, "detection failed");
                None
            }
            Err(_) => {
                tracing::error!(seq = frame.sequence, "detection adapter panicked");
                None
            }
        };

        Sample {
            frame: frame.size(),
            detection,
        }
    }
}

enum Event<T> {
    SampleTick,
    CountdownTick,
    Sampled(Result<T, JoinError>),
    Command(Option<SessionCommand>),
}

enum Exit {
    Captured(CaptureResult),
    Stopped,
}

struct Runner {
    session: CaptureSession,
    pipeline: PipelineConfig,
    reject_duplicates: bool,
    owner_id: String,
    state_tx: watch::Sender<SessionSnapshot>,
}

impl Runner {
    async fn run<S, A, St>(
        mut self,
        sampler: Sampler<S, A>,
        store: St,
        mut commands: mpsc::Receiver<SessionCommand>,
    ) -> Result<SessionOutcome, EngineError>
    where
        S: FrameSource + Send + 'static,
        A: DetectionAdapter + Send + 'static,
        St: FaceStore,
    {
        let mut sampling = time::interval(self.pipeline.capture.sample_interval());
        sampling.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut countdown: Option<Interval> = None;
        let mut idle = Some(sampler);
        let mut in_flight: Option<JoinHandle<(Sampler<S, A>, Sample)>> = None;

        let exit = loop {
            let event = tokio::select! {
                _ = sampling.tick() => Event::SampleTick,
                _ = next_countdown_tick(&mut countdown) => Event::CountdownTick,
                res = next_sample(&mut in_flight) => Event::Sampled(res),
                cmd = commands.recv() => Event::Command(cmd),
            };

            let capture_event = match event {
                Event::SampleTick => {
                    match idle.take() {
                        Some(mut sampler) => {
                            in_flight = Some(tokio::task::spawn_blocking(move || {
                                let sample = sampler.sample();
                                (sampler, sample)
                            }));
                        }
                        None => {
                            self.state_tx.send_modify(|s| s.dropped_ticks += 1);
                            tracing::debug!("detection still running; sampling tick dropped");
                        }
                    }
                    None
                }
                Event::Sampled(Ok((sampler, sample))) => {
                    idle = Some(sampler);
                    let event = self.session.advance(sample.detection.as_ref(), sample.frame);
                    self.state_tx.send_modify(|s| s.samples += 1);
                    event
                }
                Event::Sampled(Err(e)) => {
                    // The camera went down with the task; nothing left to sample.
                    tracing::error!(error = %e, "sampler task lost");
                    self.session.close();
                    self.publish();
                    return Err(EngineError::Sampler(e.to_string()));
                }
                Event::CountdownTick => self.session.countdown_tick(),
                Event::Command(Some(SessionCommand::ManualCapture)) => self
                    .session
                    .request_manual_capture()
                    .map(CaptureEvent::Finalized),
                Event::Command(Some(SessionCommand::Cancel)) => {
                    self.session.cancel();
                    countdown = None;
                    None
                }
                Event::Command(Some(SessionCommand::Stop) | None) => {
                    self.session.close();
                    break Exit::Stopped;
                }
            };

            match capture_event {
                Some(CaptureEvent::CountdownStarted { .. }) => {
                    let period = self.pipeline.capture.countdown_interval();
                    countdown = Some(time::interval_at(Instant::now() + period, period));
                }
                Some(CaptureEvent::CountdownCancelled { reason }) => {
                    tracing::info!(?reason, "countdown cancelled");
                    countdown = None;
                }
                Some(CaptureEvent::Finalized(result)) => break Exit::Captured(result),
                _ => {}
            }
            self.publish();
        };

        // Timers go first, then the camera: wait out any detection still
        // holding it so it is released before persistence starts.
        drop(countdown);
        drop(sampling);
        if let Some(handle) = in_flight.take() {
            if let Ok((sampler, _)) = handle.await {
                drop(sampler);
            }
        }
        drop(idle);
        self.publish();

        match exit {
            Exit::Stopped => {
                tracing::info!("session stopped without capture");
                Ok(SessionOutcome::Stopped)
            }
            Exit::Captured(capture) => self.complete(&store, capture).await,
        }
    }

    /// Duplicate check and persistence of a finalized capture.
    async fn complete<St: FaceStore>(
        &self,
        store: &St,
        capture: CaptureResult,
    ) -> Result<SessionOutcome, EngineError> {
        let matching = &self.pipeline.matching;
        let candidates = store.query(&RecordFilter::excluding(&self.owner_id)).await?;
        let query = DuplicateQuery::from_config(matching).excluding(&self.owner_id);
        let duplicates = find_duplicates(&capture.descriptor, &candidates, &query, matching);

        if !duplicates.is_empty() {
            tracing::warn!(
                count = duplicates.len(),
                best = %duplicates[0].owner_id,
                similarity = duplicates[0].similarity_percent,
                "capture resembles other enrolled owners"
            );
            if self.reject_duplicates {
                return Ok(SessionOutcome::RejectedDuplicate { capture, duplicates });
            }
        }

        let data = StoredFaceData {
            descriptor: capture.descriptor.clone(),
            confidence: capture.quality.confidence_percent,
            quality: capture.quality_label,
            landmarks: capture.quality.landmark_count,
            created_at: Utc::now(),
        };
        store.put(&self.owner_id, &data).await?;

        let record = FaceIdentityRecord {
            owner_id: self.owner_id.clone(),
            descriptor: Some(data.descriptor),
            quality_label: data.quality,
            captured_at: data.created_at,
        };
        Ok(SessionOutcome::Enrolled {
            record,
            capture,
            duplicates,
        })
    }

    fn publish(&self) {
        let state = self.session.state();
        let countdown_remaining = self.session.countdown_remaining();
        let quality = self.session.last_quality().cloned();
        self.state_tx.send_modify(|s| {
            s.state = state;
            s.countdown_remaining = countdown_remaining;
            s.quality = quality;
        });
    }
}

async fn next_countdown_tick(timer: &mut Option<Interval>) {
    match timer {
        Some(t) => {
            t.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn next_sample<T>(pending: &mut Option<JoinHandle<T>>) -> Result<T, JoinError> {
    match pending {
        Some(handle) => {
            let result = handle.await;
            *pending = None;
            result
        }
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;
    use facegate_core::detector::{DetectorError, RawBox, RawDetection};
    use facegate_core::{CaptureTrigger, Descriptor, Point, QualityLabel, RecordedAdapter};
    use facegate_hw::SyntheticCamera;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    const FRAME: FrameSize = FrameSize { width: 640, height: 480 };

    /// A centred face with symmetric 68-point landmarks. `side` 150 scores
    /// 100; `side` 75 scores 88.
    fn face(side: f32, value: f32) -> RawDetection {
        let mut landmarks = vec![Point::new(320.0, 240.0); 68];
        for p in &mut landmarks[36..42] {
            *p = Point::new(290.0, 220.0);
        }
        for p in &mut landmarks[42..48] {
            *p = Point::new(350.0, 220.0);
        }
        for p in &mut landmarks[27..36] {
            *p = Point::new(320.0, 250.0);
        }
        RawDetection {
            bbox: Some(RawBox {
                x: 320.0 - side / 2.0,
                y: 240.0 - side / 2.0,
                width: side,
                height: side,
            }),
            confidence: Some(1.0),
            landmarks,
            descriptor: Some(vec![value; 128]),
        }
    }

    fn excellent() -> Option<RawDetection> {
        Some(face(150.0, 0.0))
    }

    fn good() -> Option<RawDetection> {
        Some(face(75.0, 0.0))
    }

    fn config() -> EngineConfig {
        EngineConfig::default()
    }

    fn start(
        camera: SyntheticCamera,
        adapter: impl DetectionAdapter + Send + 'static,
        store: Arc<MemoryStore>,
        config: &EngineConfig,
    ) -> SessionHandle {
        spawn_session(
            camera,
            adapter,
            store,
            EnrollRequest { owner_id: "alice".into() },
            config,
        )
        .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_auto_capture_after_countdown() {
        let camera = SyntheticCamera::new(FRAME);
        let stats = camera.stats();
        let store = Arc::new(MemoryStore::default());
        let adapter = RecordedAdapter::new(std::iter::repeat_with(excellent).take(20));
        let handle = start(camera, adapter, store.clone(), &config());

        let started = Instant::now();
        match handle.finish().await.unwrap() {
            SessionOutcome::Enrolled { record, capture, duplicates } => {
                assert_eq!(record.owner_id, "alice");
                assert_eq!(record.quality_label, QualityLabel::Good);
                assert_eq!(capture.trigger, CaptureTrigger::Auto);
                assert!(duplicates.is_empty());
            }
            other => panic!("unexpected outcome {other:?}"),
        }
        // Three one-second countdown ticks after the first sample.
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(3) && elapsed < Duration::from_secs(4), "{elapsed:?}");
        assert_eq!(store.owners(), ["alice"]);
        assert!(!stats.is_streaming());
        assert_eq!(stats.stops(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_face_loss_cancels_countdown() {
        let camera = SyntheticCamera::new(FRAME);
        let stats = camera.stats();
        let store = Arc::new(MemoryStore::default());
        // Samples at 0, 0.5, 1.0 s see a face; from 1.5 s on there is none.
        let adapter = RecordedAdapter::new([excellent(), excellent(), excellent()]);
        let handle = start(camera, adapter, store.clone(), &config());

        time::sleep(Duration::from_millis(1200)).await;
        let snapshot = handle.snapshot();
        assert_eq!(snapshot.state, CaptureState::CountdownToCapture);
        assert_eq!(snapshot.countdown_remaining, Some(2));

        time::sleep(Duration::from_secs(3)).await;
        let snapshot = handle.snapshot();
        assert_eq!(snapshot.state, CaptureState::Idle);
        assert_eq!(snapshot.countdown_remaining, None);

        handle.stop().await.unwrap();
        assert!(matches!(handle.finish().await.unwrap(), SessionOutcome::Stopped));
        assert!(store.owners().is_empty());
        assert!(!stats.is_streaming());
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_capture() {
        let store = Arc::new(MemoryStore::default());
        let adapter = RecordedAdapter::new(std::iter::repeat_with(good).take(20));
        let handle = start(SyntheticCamera::new(FRAME), adapter, store.clone(), &config());

        time::sleep(Duration::from_millis(700)).await;
        assert_eq!(handle.snapshot().state, CaptureState::Tracking);
        assert!(handle.snapshot().quality.unwrap().ready_to_capture);

        handle.request_manual_capture().await.unwrap();
        match handle.finish().await.unwrap() {
            SessionOutcome::Enrolled { capture, .. } => {
                assert_eq!(capture.trigger, CaptureTrigger::Manual);
                assert_eq!(capture.quality.overall_score, 88.0);
            }
            other => panic!("unexpected outcome {other:?}"),
        }
        assert_eq!(store.owners(), ["alice"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_capture_refused_without_face() {
        let store = Arc::new(MemoryStore::default());
        let handle = start(SyntheticCamera::new(FRAME), RecordedAdapter::default(), store.clone(), &config());

        time::sleep(Duration::from_millis(600)).await;
        handle.request_manual_capture().await.unwrap();
        time::sleep(Duration::from_millis(600)).await;
        assert_eq!(handle.snapshot().state, CaptureState::Idle);

        handle.stop().await.unwrap();
        assert!(matches!(handle.finish().await.unwrap(), SessionOutcome::Stopped));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_returns_to_idle() {
        let store = Arc::new(MemoryStore::default());
        let adapter = RecordedAdapter::new([excellent()]);
        let handle = start(SyntheticCamera::new(FRAME), adapter, store.clone(), &config());

        time::sleep(Duration::from_millis(200)).await;
        assert_eq!(handle.snapshot().state, CaptureState::CountdownToCapture);
        handle.cancel().await.unwrap();
        time::sleep(Duration::from_millis(100)).await;
        assert_eq!(handle.snapshot().state, CaptureState::Idle);
        assert_eq!(handle.snapshot().countdown_remaining, None);

        // The recording is exhausted, so nothing re-arms the countdown.
        time::sleep(Duration::from_secs(5)).await;
        assert_eq!(handle.snapshot().state, CaptureState::Idle);
        handle.stop().await.unwrap();
        assert!(matches!(handle.finish().await.unwrap(), SessionOutcome::Stopped));
        assert!(store.owners().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_handle_stops_session_and_releases_camera() {
        let camera = SyntheticCamera::new(FRAME);
        let stats = camera.stats();
        let handle = start(camera, RecordedAdapter::default(), Arc::new(MemoryStore::default()), &config());
        time::sleep(Duration::from_millis(600)).await;
        assert!(stats.is_streaming());

        let SessionHandle { commands, task, .. } = handle;
        drop(commands);
        assert!(matches!(task.await.unwrap().unwrap(), SessionOutcome::Stopped));
        assert!(!stats.is_streaming());
    }

    #[tokio::test(start_paused = true)]
    async fn test_camera_acquisition_failure_is_surfaced() {
        let camera = SyntheticCamera::new(FRAME).with_acquire_error(CameraError::DeviceBusy);
        let result = spawn_session(
            camera,
            RecordedAdapter::default(),
            Arc::new(MemoryStore::default()),
            EnrollRequest { owner_id: "alice".into() },
            &config(),
        );
        assert!(matches!(result, Err(EngineError::Camera(CameraError::DeviceBusy))));
    }

    /// Fails, then panics, then reports an excellent face forever.
    struct FlakyAdapter {
        calls: u32,
    }

    impl DetectionAdapter for FlakyAdapter {
        fn detect(&mut self, _: &[u8], _: u32, _: u32) -> Result<Option<RawDetection>, DetectorError> {
            self.calls += 1;
            match self.calls {
                1 => Err(DetectorError::InferenceFailed("model not warmed up".into())),
                2 => panic!("adapter bug"),
                _ => Ok(excellent()),
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_adapter_and_camera_failures_do_not_stop_sampling() {
        // Every fourth frame read fails and cancels a running countdown, so
        // only a one-tick countdown can complete between failures.
        let camera = SyntheticCamera::new(FRAME).with_read_failures(4);
        let store = Arc::new(MemoryStore::default());
        let mut config = config();
        config.pipeline.capture.countdown_seconds = 1;
        let handle = start(camera, FlakyAdapter { calls: 0 }, store.clone(), &config);

        match handle.finish().await.unwrap() {
            SessionOutcome::Enrolled { capture, .. } => assert_eq!(capture.trigger, CaptureTrigger::Auto),
            other => panic!("unexpected outcome {other:?}"),
        }
        assert_eq!(store.owners(), ["alice"]);
    }

    fn other_owner(value: f32) -> FaceIdentityRecord {
        FaceIdentityRecord {
            owner_id: "bob".into(),
            descriptor: Some(Descriptor::new(vec![value; 128])),
            quality_label: QualityLabel::Good,
            captured_at: Utc::now(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicates_reported_and_persisted_by_default() {
        let store = Arc::new(MemoryStore::with_records(vec![other_owner(0.0)]));
        let adapter = RecordedAdapter::new(std::iter::repeat_with(good).take(20));
        let handle = start(SyntheticCamera::new(FRAME), adapter, store.clone(), &config());
        time::sleep(Duration::from_millis(100)).await;
        handle.request_manual_capture().await.unwrap();

        match handle.finish().await.unwrap() {
            SessionOutcome::Enrolled { duplicates, .. } => {
                assert_eq!(duplicates.len(), 1);
                assert_eq!(duplicates[0].owner_id, "bob");
                assert_eq!(duplicates[0].similarity_percent, 100.0);
            }
            other => panic!("unexpected outcome {other:?}"),
        }
        assert_eq!(store.owners(), ["bob", "alice"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicates_rejected_when_configured() {
        let store = Arc::new(MemoryStore::with_records(vec![other_owner(0.01)]));
        let adapter = RecordedAdapter::new(std::iter::repeat_with(good).take(20));
        let mut config = config();
        config.reject_duplicates = true;
        let handle = start(SyntheticCamera::new(FRAME), adapter, store.clone(), &config);
        time::sleep(Duration::from_millis(100)).await;
        handle.request_manual_capture().await.unwrap();

        assert!(matches!(
            handle.finish().await.unwrap(),
            SessionOutcome::RejectedDuplicate { .. }
        ));
        assert_eq!(store.owners(), ["bob"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reenrolling_same_owner_is_not_a_duplicate() {
        let mut existing = other_owner(0.0);
        existing.owner_id = "alice".into();
        let store = Arc::new(MemoryStore::with_records(vec![existing]));
        let adapter = RecordedAdapter::new(std::iter::repeat_with(good).take(20));
        let mut config = config();
        config.reject_duplicates = true;
        let handle = start(SyntheticCamera::new(FRAME), adapter, store.clone(), &config);
        time::sleep(Duration::from_millis(100)).await;
        handle.request_manual_capture().await.unwrap();

        match handle.finish().await.unwrap() {
            SessionOutcome::Enrolled { duplicates, .. } => assert!(duplicates.is_empty()),
            other => panic!("unexpected outcome {other:?}"),
        }
        assert_eq!(store.owners(), ["alice"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_store_failure_is_surfaced() {
        let store = Arc::new(MemoryStore::default());
        store.fail_puts();
        let adapter = RecordedAdapter::new(std::iter::repeat_with(excellent).take(20));
        let camera = SyntheticCamera::new(FRAME);
        let stats = camera.stats();
        let handle = start(camera, adapter, store, &config());

        assert!(matches!(handle.finish().await, Err(EngineError::Store(_))));
        assert!(!stats.is_streaming());
    }

    /// Blocks each call for `delay`, recording how many calls overlap.
    #[derive(Clone, Default)]
    struct SlowAdapter {
        delay: Duration,
        active: Arc<AtomicUsize>,
        max_active: Arc<AtomicUsize>,
        calls: Arc<AtomicUsize>,
    }

    impl DetectionAdapter for SlowAdapter {
        fn detect(&mut self, _: &[u8], _: u32, _: u32) -> Result<Option<RawDetection>, DetectorError> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active.fetch_max(now, Ordering::SeqCst);
            self.calls.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(self.delay);
            self.active.fetch_sub(1, Ordering::SeqCst);
            Ok(None)
        }
    }

    // Real time: the paused clock cannot advance past a running blocking task.
    #[tokio::test]
    async fn test_ticks_during_slow_detection_are_dropped() {
        let camera = SyntheticCamera::new(FRAME);
        let store = Arc::new(MemoryStore::default());
        let mut config = config();
        config.pipeline.capture.sample_interval_ms = 20;
        let adapter = SlowAdapter {
            delay: Duration::from_millis(70),
            ..SlowAdapter::default()
        };
        let handle = start(camera, adapter.clone(), store.clone(), &config);

        time::sleep(Duration::from_millis(600)).await;
        let snapshot = handle.snapshot();
        handle.stop().await.unwrap();
        assert!(matches!(handle.finish().await.unwrap(), SessionOutcome::Stopped));

        assert_eq!(adapter.max_active.load(Ordering::SeqCst), 1);
        assert!(snapshot.dropped_ticks > 0, "{snapshot:?}");
        // Ticks were dropped, not queued: far fewer calls than ticks elapsed.
        let calls = adapter.calls.load(Ordering::SeqCst);
        assert!((2..=10).contains(&calls), "calls={calls}");
        assert!(snapshot.samples as usize <= calls);
        assert_eq!(snapshot.state, CaptureState::Idle);
        assert!(store.owners().is_empty());
    }
}
