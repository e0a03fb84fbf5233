use super::*;
use crate::aggregator::AnalysisResult;
use crate::analysis::{AnalysisClient, RawAnalysisResponse};
use crate::camera::{CameraHandle, FrameSource, MockCamera, RawImage, VideoStream};
use crate::config::ScanConfig;
use crate::error::{AnalysisError, CameraError, CaptureError, ScanError};
use crate::events::ScanEvent;
use crate::frame::{Frame, FrameFormat};
use crate::ingredients::IngredientQuery;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, oneshot, Notify};

/// Analysis double recording the frame sequences of every batch
#[derive(Default)]
struct RecordingClient {
    batches: Mutex<Vec<Vec<usize>>>,
    fail: bool,
    gate: Mutex<Option<oneshot::Receiver<()>>>,
    submitted: Notify,
}

impl RecordingClient {
    fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    /// Hold the next batch response until the returned sender fires
    fn gated() -> (Self, oneshot::Sender<()>) {
        let (tx, rx) = oneshot::channel();
        let client = Self {
            gate: Mutex::new(Some(rx)),
            ..Default::default()
        };
        (client, tx)
    }

    fn batches(&self) -> Vec<Vec<usize>> {
        self.batches.lock().clone()
    }
}

#[async_trait]
impl AnalysisClient for RecordingClient {
    async fn analyze_frames(&self, frames: &[Frame]) -> Result<RawAnalysisResponse, AnalysisError> {
        self.batches
            .lock()
            .push(frames.iter().map(|f| f.sequence).collect());
        self.submitted.notify_one();

        let gate = self.gate.lock().take();
        if let Some(gate) = gate {
            let _ = gate.await;
        }

        if self.fail {
            return Err(AnalysisError::Service {
                details: "recognizer offline".to_string(),
            });
        }
        Ok(RawAnalysisResponse::new(
            ["Soy", "soy", " Peanut"],
            Some("contains soy and peanut"),
        ))
    }

    async fn analyze_image(
        &self,
        _image: Vec<u8>,
        _file_name: &str,
        _format: FrameFormat,
    ) -> Result<RawAnalysisResponse, AnalysisError> {
        Ok(RawAnalysisResponse::default())
    }

    async fn add_ingredient(&self, _query: &IngredientQuery) -> Result<(), AnalysisError> {
        Ok(())
    }

    async fn list_ingredients(&self) -> Result<Vec<String>, AnalysisError> {
        Ok(Vec::new())
    }
}

/// Holds the first caller until opened, signalling when it arrives
struct Gate {
    arrived: Notify,
    open: Mutex<Option<oneshot::Receiver<()>>>,
}

impl Gate {
    fn closed() -> (Self, oneshot::Sender<()>) {
        let (tx, rx) = oneshot::channel();
        let gate = Self {
            arrived: Notify::new(),
            open: Mutex::new(Some(rx)),
        };
        (gate, tx)
    }

    async fn pass(&self) {
        self.arrived.notify_one();
        let open = self.open.lock().take();
        if let Some(open) = open {
            let _ = open.await;
        }
    }
}

/// Mock camera whose first acquisition waits on a gate
struct GatedSource {
    camera: Arc<MockCamera>,
    gate: Gate,
}

#[async_trait]
impl FrameSource for GatedSource {
    async fn acquire(&self) -> Result<CameraHandle, CameraError> {
        self.gate.pass().await;
        self.camera.acquire().await
    }

    async fn release(&self, handle: &CameraHandle) {
        self.camera.release(handle).await;
    }

    fn name(&self) -> &str {
        "gated"
    }
}

/// Stream whose first grab waits on a gate
struct GatedStream {
    gate: Gate,
    active: AtomicBool,
}

#[async_trait]
impl VideoStream for GatedStream {
    fn is_active(&self) -> bool {
        self.active.load(Ordering::Relaxed)
    }

    async fn grab(&self) -> Result<RawImage, CaptureError> {
        self.gate.pass().await;
        Ok(RawImage::new(8, 8, vec![128; 8 * 8 * 3]))
    }
}

struct GatedStreamSource {
    stream: Arc<GatedStream>,
}

impl GatedStreamSource {
    fn new(gate: Gate) -> Self {
        Self {
            stream: Arc::new(GatedStream {
                gate,
                active: AtomicBool::new(true),
            }),
        }
    }
}

#[async_trait]
impl FrameSource for GatedStreamSource {
    async fn acquire(&self) -> Result<CameraHandle, CameraError> {
        self.stream.active.store(true, Ordering::Relaxed);
        Ok(CameraHandle::new(Arc::clone(&self.stream) as Arc<dyn VideoStream>))
    }

    async fn release(&self, _handle: &CameraHandle) {
        self.stream.active.store(false, Ordering::Relaxed);
    }

    fn name(&self) -> &str {
        "gated-stream"
    }
}

fn create_session_with_source(source: Arc<dyn FrameSource>) -> ScanSession {
    ScanSession::builder()
        .config(create_test_config())
        .frame_source(source)
        .analysis_client(Arc::new(RecordingClient::default()) as Arc<dyn AnalysisClient>)
        .build()
        .unwrap()
}

fn create_test_config() -> ScanConfig {
    ScanConfig {
        surface_width: 64,
        surface_height: 48,
        ..ScanConfig::default()
    }
}

fn create_test_session(
    camera: Arc<MockCamera>,
    client: Arc<RecordingClient>,
) -> ScanSession {
    ScanSession::builder()
        .config(create_test_config())
        .frame_source(camera as Arc<dyn FrameSource>)
        .analysis_client(client as Arc<dyn AnalysisClient>)
        .build()
        .unwrap()
}

fn drain_events(receiver: &mut broadcast::Receiver<ScanEvent>) -> Vec<ScanEvent> {
    let mut events = Vec::new();
    while let Ok(event) = receiver.try_recv() {
        events.push(event);
    }
    events
}

fn count_events(events: &[ScanEvent], event_type: &str) -> usize {
    events.iter().filter(|e| e.event_type() == event_type).count()
}

fn expected_result() -> AnalysisResult {
    AnalysisResult {
        recognized_text: "contains soy and peanut".to_string(),
        flagged_ingredients: vec!["Soy".to_string(), "Peanut".to_string()],
    }
}

#[tokio::test]
async fn test_full_buffer_finalizes_automatically() {
    let camera = Arc::new(MockCamera::new((80, 60)));
    let client = Arc::new(RecordingClient::default());
    let session = create_test_session(Arc::clone(&camera), Arc::clone(&client));

    session.start().await.unwrap();
    assert_eq!(session.state(), ScanState::Scanning);

    for expected in 0..14 {
        let outcome = session.tick().await.unwrap();
        assert_eq!(outcome, TickOutcome::Captured { sequence: expected });
    }
    assert_eq!(session.buffered_frames(), 14);

    let outcome = session.tick().await.unwrap();
    assert_eq!(
        outcome,
        TickOutcome::CapturedAndStopped {
            sequence: 14,
            result: Some(expected_result()),
        }
    );

    assert_eq!(client.batches(), vec![(0..15).collect::<Vec<_>>()]);
    assert_eq!(session.state(), ScanState::Idle);
    assert_eq!(session.last_result(), Some(expected_result()));
    assert!(!camera.is_held());

    // Further ticks after finalization are inert
    assert_eq!(session.tick().await.unwrap(), TickOutcome::Ignored);
    assert_eq!(client.batches().len(), 1);
}

#[tokio::test]
async fn test_manual_stop_submits_buffered_frames() {
    let camera = Arc::new(MockCamera::new((80, 60)));
    let client = Arc::new(RecordingClient::default());
    let session = create_test_session(Arc::clone(&camera), Arc::clone(&client));
    let mut events = session.subscribe();

    let generation = session.start().await.unwrap();
    for _ in 0..3 {
        session.tick().await.unwrap();
    }
    let result = session.stop().await.unwrap();

    assert_eq!(result, Some(expected_result()));
    assert_eq!(client.batches(), vec![vec![0, 1, 2]]);
    assert_eq!(session.buffered_frames(), 0);
    assert_eq!(camera.releases(), 1);

    let events = drain_events(&mut events);
    assert_eq!(count_events(&events, "frame_captured"), 3);
    assert_eq!(count_events(&events, "analysis_completed"), 1);
    assert!(events.iter().any(|e| matches!(
        e,
        ScanEvent::ScanStopped { generation: g, frame_count: 3 } if *g == generation
    )));
}

#[tokio::test]
async fn test_stop_with_empty_buffer_skips_analysis() {
    let camera = Arc::new(MockCamera::new((80, 60)));
    let client = Arc::new(RecordingClient::default());
    let session = create_test_session(Arc::clone(&camera), Arc::clone(&client));

    session.start().await.unwrap();
    let result = session.stop().await.unwrap();

    assert_eq!(result, None);
    assert!(client.batches().is_empty());
    assert_eq!(session.state(), ScanState::Idle);
    assert!(!camera.is_held());
}

#[tokio::test]
async fn test_stop_and_tick_are_noops_when_idle() {
    let camera = Arc::new(MockCamera::new((80, 60)));
    let client = Arc::new(RecordingClient::default());
    let session = create_test_session(camera, Arc::clone(&client));

    assert_eq!(session.stop().await.unwrap(), None);
    assert_eq!(session.tick().await.unwrap(), TickOutcome::Ignored);
    assert!(client.batches().is_empty());
}

#[tokio::test]
async fn test_start_while_scanning_is_rejected() {
    let camera = Arc::new(MockCamera::new((80, 60)));
    let session = create_test_session(camera, Arc::new(RecordingClient::default()));

    session.start().await.unwrap();
    let result = session.start().await;

    assert_eq!(
        result,
        Err(ScanError::InvalidState {
            state: "scanning".to_string()
        })
    );
}

#[tokio::test]
async fn test_denied_camera_reports_once_and_stays_idle() {
    let camera = Arc::new(MockCamera::new((80, 60)).deny_permission());
    let session = create_test_session(camera, Arc::new(RecordingClient::default()));
    let mut events = session.subscribe();

    let result = session.start().await;

    assert!(matches!(
        result,
        Err(ScanError::CameraUnavailable(CameraError::PermissionDenied { .. }))
    ));
    assert_eq!(session.state(), ScanState::Idle);
    assert_eq!(session.stats().camera_failures, 1);

    let events = drain_events(&mut events);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event_type(), "camera_unavailable");

    // A failed start leaves the session ready for another attempt
    assert!(matches!(
        session.start().await,
        Err(ScanError::CameraUnavailable(_))
    ));
}

#[tokio::test]
async fn test_analysis_failure_reports_once() {
    let camera = Arc::new(MockCamera::new((80, 60)));
    let client = Arc::new(RecordingClient::failing());
    let session = create_test_session(camera, Arc::clone(&client));
    let mut events = session.subscribe();

    session.start().await.unwrap();
    session.tick().await.unwrap();
    session.tick().await.unwrap();
    let result = session.stop().await;

    assert!(matches!(result, Err(ScanError::AnalysisFailed { .. })));
    assert_eq!(session.state(), ScanState::Idle);
    assert_eq!(session.last_result(), None);
    assert_eq!(session.stats().analyses_failed, 1);

    let events = drain_events(&mut events);
    assert_eq!(count_events(&events, "analysis_failed"), 1);
    assert_eq!(count_events(&events, "analysis_completed"), 0);
}

#[tokio::test]
async fn test_reset_discards_in_flight_analysis() {
    let camera = Arc::new(MockCamera::new((80, 60)));
    let (client, release) = RecordingClient::gated();
    let client = Arc::new(client);
    let session = create_test_session(camera, Arc::clone(&client));
    let mut events = session.subscribe();

    let generation = session.start().await.unwrap();
    session.tick().await.unwrap();

    let finalizing = session.clone();
    let pending = tokio::spawn(async move { finalizing.stop().await });

    client.submitted.notified().await;
    assert_eq!(session.state(), ScanState::Finalizing);

    session.reset().await;
    release.send(()).unwrap();

    let result = pending.await.unwrap();
    assert_eq!(result, Err(ScanError::StaleResponse { generation }));
    assert_eq!(session.state(), ScanState::Idle);
    assert_eq!(session.last_result(), None);
    assert_eq!(session.stats().stale_discarded, 1);

    let events = drain_events(&mut events);
    assert_eq!(count_events(&events, "analysis_completed"), 0);
    assert_eq!(count_events(&events, "analysis_failed"), 0);
    assert_eq!(count_events(&events, "session_reset"), 1);
}

#[tokio::test]
async fn test_reset_while_scanning_releases_camera() {
    let camera = Arc::new(MockCamera::new((80, 60)));
    let client = Arc::new(RecordingClient::default());
    let session = create_test_session(Arc::clone(&camera), Arc::clone(&client));

    let generation = session.start().await.unwrap();
    session.tick().await.unwrap();
    session.reset().await;

    assert_eq!(session.state(), ScanState::Idle);
    assert!(session.generation() > generation);
    assert_eq!(session.buffered_frames(), 0);
    assert!(!camera.is_held());
    assert_eq!(session.tick().await.unwrap(), TickOutcome::Ignored);
    assert!(client.batches().is_empty());
}

#[tokio::test]
async fn test_reset_clears_previous_result() {
    let camera = Arc::new(MockCamera::new((80, 60)));
    let session = create_test_session(camera, Arc::new(RecordingClient::default()));

    session.start().await.unwrap();
    session.tick().await.unwrap();
    session.stop().await.unwrap();
    assert!(session.last_result().is_some());

    session.reset().await;
    assert_eq!(session.last_result(), None);
}

#[tokio::test]
async fn test_transient_capture_failure_is_skipped() {
    let camera = Arc::new(MockCamera::new((80, 60)).fail_grab(1));
    let client = Arc::new(RecordingClient::default());
    let session = create_test_session(camera, Arc::clone(&client));

    session.start().await.unwrap();

    assert_eq!(session.tick().await.unwrap(), TickOutcome::Captured { sequence: 0 });
    assert!(matches!(
        session.tick().await.unwrap(),
        TickOutcome::Skipped {
            reason: CaptureError::Grab { .. }
        }
    ));
    assert_eq!(session.tick().await.unwrap(), TickOutcome::Captured { sequence: 1 });
    assert_eq!(session.state(), ScanState::Scanning);

    session.stop().await.unwrap();
    assert_eq!(client.batches(), vec![vec![0, 1]]);
    assert_eq!(session.stats().captures_skipped, 1);
}

#[tokio::test]
async fn test_stream_end_finalizes_scan() {
    let camera = Arc::new(MockCamera::new((80, 60)).end_stream_after(2));
    let client = Arc::new(RecordingClient::default());
    let session = create_test_session(Arc::clone(&camera), Arc::clone(&client));

    session.start().await.unwrap();
    session.tick().await.unwrap();
    session.tick().await.unwrap();
    let outcome = session.tick().await.unwrap();

    assert_eq!(
        outcome,
        TickOutcome::Stopped {
            result: Some(expected_result())
        }
    );
    assert_eq!(client.batches(), vec![vec![0, 1]]);
    assert!(!camera.is_held());
}

#[tokio::test]
async fn test_surface_locked_while_scanning() {
    let camera = Arc::new(MockCamera::new((80, 60)));
    let session = create_test_session(camera, Arc::new(RecordingClient::default()));
    let sampler = session.sampler();

    session.start().await.unwrap();
    assert_eq!(
        sampler.set_surface(100, 100),
        Err(CaptureError::SurfaceLocked)
    );

    session.stop().await.unwrap();
    assert!(sampler.set_surface(100, 100).is_ok());
}

#[tokio::test(start_paused = true)]
async fn test_analysis_timeout_fails_batch() {
    let camera = Arc::new(MockCamera::new((80, 60)));
    let (client, _release) = RecordingClient::gated();
    let session = ScanSession::builder()
        .config(ScanConfig {
            analysis_timeout_secs: 1,
            ..create_test_config()
        })
        .frame_source(camera as Arc<dyn FrameSource>)
        .analysis_client(Arc::new(client) as Arc<dyn AnalysisClient>)
        .build()
        .unwrap();

    session.start().await.unwrap();
    session.tick().await.unwrap();
    let result = session.stop().await;

    assert!(matches!(result, Err(ScanError::AnalysisFailed { .. })));
    assert_eq!(session.state(), ScanState::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_tick_driver_samples_until_full() {
    let camera = Arc::new(MockCamera::new((80, 60)));
    let client = Arc::new(RecordingClient::default());
    let config = create_test_config();
    let session = ScanSession::builder()
        .tick_source(Arc::new(IntervalTickSource::new(config.tick_interval())))
        .config(config)
        .frame_source(Arc::clone(&camera) as Arc<dyn FrameSource>)
        .analysis_client(Arc::clone(&client) as Arc<dyn AnalysisClient>)
        .build()
        .unwrap();
    let mut events = session.subscribe();
    let started = tokio::time::Instant::now();

    session.start().await.unwrap();

    let result = tokio::time::timeout(Duration::from_secs(30), async {
        loop {
            if let ScanEvent::AnalysisCompleted { result, .. } = events.recv().await.unwrap() {
                return result;
            }
        }
    })
    .await
    .unwrap();

    assert_eq!(result, expected_result());
    assert_eq!(client.batches(), vec![(0..15).collect::<Vec<_>>()]);
    assert!(started.elapsed() >= Duration::from_millis(15 * 300));
    assert_eq!(session.state(), ScanState::Idle);
    assert!(!camera.is_held());
}

#[tokio::test(start_paused = true)]
async fn test_tick_driver_stops_on_manual_stop() {
    let camera = Arc::new(MockCamera::new((80, 60)));
    let client = Arc::new(RecordingClient::default());
    let session = ScanSession::builder()
        .tick_source(Arc::new(IntervalTickSource::new(Duration::from_millis(300))))
        .config(create_test_config())
        .frame_source(camera as Arc<dyn FrameSource>)
        .analysis_client(Arc::clone(&client) as Arc<dyn AnalysisClient>)
        .build()
        .unwrap();

    session.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(1000)).await;
    session.stop().await.unwrap();
    let captured = session.stats().frames_captured;

    tokio::time::sleep(Duration::from_secs(5)).await;

    assert_eq!(captured, 3);
    assert_eq!(session.stats().frames_captured, captured);
    assert_eq!(client.batches(), vec![vec![0, 1, 2]]);
}

#[tokio::test]
async fn test_reset_during_camera_acquisition_releases_handle() {
    let camera = Arc::new(MockCamera::new((80, 60)));
    let (gate, open) = Gate::closed();
    let source = Arc::new(GatedSource {
        camera: Arc::clone(&camera),
        gate,
    });
    let session = create_session_with_source(Arc::clone(&source) as Arc<dyn FrameSource>);

    let starting = session.clone();
    let pending = tokio::spawn(async move { starting.start().await });
    source.gate.arrived.notified().await;

    session.reset().await;
    open.send(()).unwrap();

    assert_eq!(
        pending.await.unwrap(),
        Err(ScanError::StaleResponse { generation: 1 })
    );
    assert_eq!(session.state(), ScanState::Idle);
    assert!(!camera.is_held());
    assert_eq!(camera.releases(), 1);

    // The session is usable again afterwards
    session.start().await.unwrap();
    assert_eq!(session.state(), ScanState::Scanning);
    assert!(camera.is_held());
}

#[tokio::test]
async fn test_stop_during_camera_acquisition_releases_handle() {
    let camera = Arc::new(MockCamera::new((80, 60)));
    let (gate, open) = Gate::closed();
    let source = Arc::new(GatedSource {
        camera: Arc::clone(&camera),
        gate,
    });
    let session = create_session_with_source(Arc::clone(&source) as Arc<dyn FrameSource>);

    let starting = session.clone();
    let pending = tokio::spawn(async move { starting.start().await });
    source.gate.arrived.notified().await;

    assert_eq!(session.stop().await.unwrap(), None);
    open.send(()).unwrap();

    assert_eq!(
        pending.await.unwrap(),
        Err(ScanError::StaleResponse { generation: 1 })
    );
    assert_eq!(session.state(), ScanState::Idle);
    assert!(!camera.is_held());
    assert!(!session.sampler().is_locked());
}

#[tokio::test]
async fn test_tick_during_capture_is_busy() {
    let (gate, open) = Gate::closed();
    let source = Arc::new(GatedStreamSource::new(gate));
    let session = create_session_with_source(Arc::clone(&source) as Arc<dyn FrameSource>);

    session.start().await.unwrap();

    let ticking = session.clone();
    let pending = tokio::spawn(async move { ticking.tick().await });
    source.stream.gate.arrived.notified().await;

    assert_eq!(session.tick().await.unwrap(), TickOutcome::Busy);
    assert_eq!(session.buffered_frames(), 0);

    open.send(()).unwrap();
    assert_eq!(
        pending.await.unwrap().unwrap(),
        TickOutcome::Captured { sequence: 0 }
    );
    assert_eq!(
        session.tick().await.unwrap(),
        TickOutcome::Captured { sequence: 1 }
    );
}

#[tokio::test]
async fn test_capture_finishing_after_reset_is_discarded() {
    let (gate, open) = Gate::closed();
    let source = Arc::new(GatedStreamSource::new(gate));
    let session = create_session_with_source(Arc::clone(&source) as Arc<dyn FrameSource>);

    session.start().await.unwrap();

    let ticking = session.clone();
    let pending = tokio::spawn(async move { ticking.tick().await });
    source.stream.gate.arrived.notified().await;

    session.reset().await;
    open.send(()).unwrap();

    assert_eq!(pending.await.unwrap().unwrap(), TickOutcome::Discarded);
    assert_eq!(session.buffered_frames(), 0);
    assert_eq!(session.state(), ScanState::Idle);
}
