use super::state::{ScanState, SessionStats};
use super::ticker::{Ticker, TickSource};
use crate::aggregator::{AnalysisResult, ResultAggregator};
use crate::analysis::AnalysisClient;
use crate::camera::{CameraHandle, FrameSource};
use crate::config::ScanConfig;
use crate::error::{AllerlensError, AnalysisError, CaptureError, Result as CrateResult, ScanError};
use crate::events::{EventBus, ScanEvent};
use crate::frame::Frame;
use crate::frame_buffer::FrameBuffer;
use crate::sampler::FrameSampler;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::SystemTime;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// What a single sampling tick did
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    /// A frame was appended
    Captured { sequence: usize },
    /// A frame was appended and filled the buffer, so the session finalized
    CapturedAndStopped {
        sequence: usize,
        result: Option<AnalysisResult>,
    },
    /// The buffer was already full or the stream ended; the session finalized
    Stopped { result: Option<AnalysisResult> },
    /// Capture failed transiently; the session keeps scanning
    Skipped { reason: CaptureError },
    /// Not scanning (or the camera is still being acquired)
    Ignored,
    /// The previous tick is still capturing
    Busy,
    /// The session stopped or was reset while this tick was capturing
    Discarded,
}

struct SessionInner {
    state: ScanState,
    generation: u64,
    buffer: FrameBuffer,
    camera: Option<CameraHandle>,
    ticker: Option<CancellationToken>,
    capturing: bool,
    last_result: Option<AnalysisResult>,
    stats: SessionStats,
}

struct SessionShared {
    config: ScanConfig,
    source: Arc<dyn FrameSource>,
    sampler: Arc<FrameSampler>,
    client: Arc<dyn AnalysisClient>,
    ticks: Option<Arc<dyn TickSource>>,
    events: EventBus,
    inner: Mutex<SessionInner>,
}

/// Live-scan state machine: `Idle -> Scanning -> Finalizing -> Idle`
///
/// Cloning yields another handle to the same session. Every asynchronous
/// step (camera acquisition, capture, batch analysis) runs without the
/// session lock held and is tagged with the generation it started in; a
/// continuation whose generation is no longer current is dropped on arrival.
#[derive(Clone)]
pub struct ScanSession {
    shared: Arc<SessionShared>,
}

impl ScanSession {
    pub fn builder() -> ScanSessionBuilder {
        ScanSessionBuilder::new()
    }

    pub fn state(&self) -> ScanState {
        self.shared.inner.lock().state
    }

    pub fn generation(&self) -> u64 {
        self.shared.inner.lock().generation
    }

    /// Number of frames buffered for the current scan
    pub fn buffered_frames(&self) -> usize {
        self.shared.inner.lock().buffer.len()
    }

    /// Most recent published result, cleared by `reset`
    pub fn last_result(&self) -> Option<AnalysisResult> {
        self.shared.inner.lock().last_result.clone()
    }

    pub fn stats(&self) -> SessionStats {
        self.shared.inner.lock().stats.clone()
    }

    pub fn max_frames(&self) -> usize {
        self.shared.config.max_frames
    }

    pub fn sampler(&self) -> Arc<FrameSampler> {
        Arc::clone(&self.shared.sampler)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ScanEvent> {
        self.shared.events.subscribe()
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.shared.events
    }

    /// Begin a scan: acquire the camera and start sampling
    ///
    /// Returns the generation of the new scan.
    pub async fn start(&self) -> Result<u64, ScanError> {
        let generation = {
            let mut inner = self.shared.inner.lock();
            if inner.state != ScanState::Idle {
                return Err(ScanError::InvalidState {
                    state: inner.state.to_string(),
                });
            }
            inner.generation += 1;
            inner.state = ScanState::Scanning;
            inner.buffer.clear();
            inner.capturing = false;
            inner.generation
        };

        debug!(
            "Scan {} acquiring camera from {} source",
            generation,
            self.shared.source.name()
        );

        let acquired = self.shared.source.acquire().await;

        let handle = {
            let mut inner = self.shared.inner.lock();
            let current = inner.generation == generation && inner.state == ScanState::Scanning;

            match acquired {
                Ok(handle) if current => {
                    inner.camera = Some(handle.clone());
                    inner.stats.sessions_started += 1;
                    if let Some(ticks) = &self.shared.ticks {
                        let cancel = CancellationToken::new();
                        inner.ticker = Some(cancel.clone());
                        self.spawn_tick_driver(ticks.subscribe(), cancel, generation);
                    }
                    self.shared.sampler.lock_surface();
                    None
                }
                Ok(handle) => Some(handle),
                Err(e) if current => {
                    inner.state = ScanState::Idle;
                    inner.stats.camera_failures += 1;
                    drop(inner);
                    self.shared.events.publish(ScanEvent::CameraUnavailable {
                        reason: e.to_string(),
                        timestamp: SystemTime::now(),
                    });
                    return Err(ScanError::CameraUnavailable(e));
                }
                Err(e) => {
                    debug!("Camera failure for superseded scan {}: {}", generation, e);
                    return Err(ScanError::StaleResponse { generation });
                }
            }
        };

        if let Some(orphan) = handle {
            debug!(
                "Scan {} was stopped or reset during camera acquisition; releasing",
                generation
            );
            self.shared.source.release(&orphan).await;
            return Err(ScanError::StaleResponse { generation });
        }

        self.shared.events.publish(ScanEvent::ScanStarted {
            generation,
            timestamp: SystemTime::now(),
        });

        Ok(generation)
    }

    /// Run one sampling step
    pub async fn tick(&self) -> Result<TickOutcome, ScanError> {
        let pending = {
            let mut inner = self.shared.inner.lock();
            if inner.state != ScanState::Scanning {
                return Ok(TickOutcome::Ignored);
            }
            let Some(stream) = inner.camera.as_ref().map(CameraHandle::stream) else {
                return Ok(TickOutcome::Ignored);
            };
            if inner.capturing {
                return Ok(TickOutcome::Busy);
            }
            if inner.buffer.is_full() {
                None
            } else {
                inner.capturing = true;
                Some((inner.generation, stream, inner.buffer.len()))
            }
        };

        let Some((generation, stream, sequence)) = pending else {
            debug!("Frame buffer full; stopping instead of capturing");
            let result = self.stop().await?;
            return Ok(TickOutcome::Stopped { result });
        };

        let captured = self
            .shared
            .sampler
            .capture(stream.as_ref(), sequence)
            .await;

        let mut stream_ended = false;
        let outcome = {
            let mut inner = self.shared.inner.lock();
            if inner.generation != generation || inner.state != ScanState::Scanning {
                trace!("Dropping capture from scan {} after it ended", generation);
                return Ok(TickOutcome::Discarded);
            }
            inner.capturing = false;

            match captured {
                Ok(frame) => {
                    let bytes = frame.len();
                    match inner.buffer.push(frame) {
                        Ok(sequence) => {
                            inner.stats.frames_captured += 1;
                            let full = inner.buffer.is_full();
                            drop(inner);
                            self.shared.events.publish(ScanEvent::FrameCaptured {
                                generation,
                                sequence,
                                bytes,
                            });
                            Ok((sequence, full))
                        }
                        Err(_) => Err(None),
                    }
                }
                Err(CaptureError::StreamEnded) | Err(CaptureError::StreamInactive) => {
                    stream_ended = true;
                    Err(None)
                }
                Err(reason) => {
                    inner.stats.captures_skipped += 1;
                    Err(Some(reason))
                }
            }
        };

        match outcome {
            Ok((sequence, false)) => Ok(TickOutcome::Captured { sequence }),
            Ok((sequence, true)) => {
                info!(
                    "Captured {} frames; finalizing scan {}",
                    self.shared.config.max_frames, generation
                );
                let result = self.stop().await?;
                Ok(TickOutcome::CapturedAndStopped { sequence, result })
            }
            Err(Some(reason)) => {
                self.shared.events.publish(ScanEvent::CaptureSkipped {
                    generation,
                    reason: reason.to_string(),
                });
                Ok(TickOutcome::Skipped { reason })
            }
            Err(None) => {
                if stream_ended {
                    warn!("Camera stream ended during scan {}; finalizing", generation);
                }
                let result = self.stop().await?;
                Ok(TickOutcome::Stopped { result })
            }
        }
    }

    /// Stop sampling and analyse the buffered batch
    ///
    /// A no-op outside `Scanning`. With an empty buffer the session returns to
    /// `Idle` without contacting the analysis service.
    pub async fn stop(&self) -> Result<Option<AnalysisResult>, ScanError> {
        let (generation, camera, frames) = {
            let mut inner = self.shared.inner.lock();
            if inner.state != ScanState::Scanning {
                debug!("Ignoring stop in state {}", inner.state);
                return Ok(None);
            }
            inner.state = ScanState::Finalizing;
            inner.capturing = false;
            if let Some(cancel) = inner.ticker.take() {
                cancel.cancel();
            }
            self.shared.sampler.unlock_surface();
            (inner.generation, inner.camera.take(), inner.buffer.drain())
        };

        if let Some(camera) = camera {
            self.shared.source.release(&camera).await;
        }

        self.shared.events.publish(ScanEvent::ScanStopped {
            generation,
            frame_count: frames.len(),
        });

        if frames.is_empty() {
            let mut inner = self.shared.inner.lock();
            if inner.generation == generation && inner.state == ScanState::Finalizing {
                inner.state = ScanState::Idle;
            }
            debug!("Scan {} stopped with no frames; nothing to analyse", generation);
            return Ok(None);
        }

        self.finalize(generation, frames).await
    }

    async fn finalize(
        &self,
        generation: u64,
        frames: Vec<Frame>,
    ) -> Result<Option<AnalysisResult>, ScanError> {
        info!(
            "Submitting {} frames from scan {} for analysis",
            frames.len(),
            generation
        );

        {
            self.shared.inner.lock().stats.batches_submitted += 1;
        }

        let timeout = self.shared.config.analysis_timeout();
        let response =
            match tokio::time::timeout(timeout, self.shared.client.analyze_frames(&frames)).await {
                Ok(response) => response,
                Err(_) => Err(AnalysisError::Timeout {
                    seconds: timeout.as_secs(),
                }),
            };
        drop(frames);

        let mut inner = self.shared.inner.lock();
        if inner.generation != generation || inner.state != ScanState::Finalizing {
            inner.stats.stale_discarded += 1;
            debug!(
                "Discarding analysis response for superseded scan {}",
                generation
            );
            return Err(ScanError::StaleResponse { generation });
        }
        inner.state = ScanState::Idle;

        match response {
            Ok(raw) => {
                let result = ResultAggregator::merge(std::slice::from_ref(&raw));
                inner.last_result = Some(result.clone());
                drop(inner);
                self.shared.events.publish(ScanEvent::AnalysisCompleted {
                    generation,
                    result: result.clone(),
                });
                Ok(Some(result))
            }
            Err(e) => {
                inner.stats.analyses_failed += 1;
                drop(inner);
                let details = e.to_string();
                self.shared.events.publish(ScanEvent::AnalysisFailed {
                    generation,
                    error: details.clone(),
                });
                Err(ScanError::AnalysisFailed { details })
            }
        }
    }

    /// Abandon whatever the session is doing and return to `Idle`
    ///
    /// In-flight captures and analysis responses of the abandoned scan are
    /// discarded when they arrive.
    pub async fn reset(&self) {
        let (generation, camera) = {
            let mut inner = self.shared.inner.lock();
            inner.generation += 1;
            inner.state = ScanState::Idle;
            inner.capturing = false;
            inner.last_result = None;
            if let Some(cancel) = inner.ticker.take() {
                cancel.cancel();
            }
            inner.buffer.clear();
            self.shared.sampler.unlock_surface();
            (inner.generation, inner.camera.take())
        };

        if let Some(camera) = camera {
            self.shared.source.release(&camera).await;
        }

        self.shared
            .events
            .publish(ScanEvent::SessionReset { generation });
    }

    fn spawn_tick_driver(
        &self,
        mut ticker: Box<dyn Ticker>,
        cancel: CancellationToken,
        generation: u64,
    ) {
        let session = self.clone();
        tokio::spawn(async move {
            debug!("Tick driver for scan {} started", generation);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        match session.tick().await {
                            Ok(TickOutcome::Captured { .. })
                            | Ok(TickOutcome::Skipped { .. })
                            | Ok(TickOutcome::Busy) => {}
                            Ok(_) => break,
                            Err(e) => {
                                debug!("Tick driver for scan {} ending: {}", generation, e);
                                break;
                            }
                        }
                    }
                }
            }
            debug!("Tick driver for scan {} stopped", generation);
        });
    }
}

/// Builder wiring a [`ScanSession`] to its collaborators
pub struct ScanSessionBuilder {
    config: ScanConfig,
    source: Option<Arc<dyn FrameSource>>,
    sampler: Option<Arc<FrameSampler>>,
    client: Option<Arc<dyn AnalysisClient>>,
    ticks: Option<Arc<dyn TickSource>>,
    events: Option<EventBus>,
}

impl ScanSessionBuilder {
    pub fn new() -> Self {
        Self {
            config: ScanConfig::default(),
            source: None,
            sampler: None,
            client: None,
            ticks: None,
            events: None,
        }
    }

    pub fn config(mut self, config: ScanConfig) -> Self {
        self.config = config;
        self
    }

    pub fn frame_source(mut self, source: Arc<dyn FrameSource>) -> Self {
        self.source = Some(source);
        self
    }

    /// Defaults to a sampler built from the scan configuration
    pub fn sampler(mut self, sampler: Arc<FrameSampler>) -> Self {
        self.sampler = Some(sampler);
        self
    }

    pub fn analysis_client(mut self, client: Arc<dyn AnalysisClient>) -> Self {
        self.client = Some(client);
        self
    }

    /// Without a tick source the caller drives sampling through `tick()`
    pub fn tick_source(mut self, ticks: Arc<dyn TickSource>) -> Self {
        self.ticks = Some(ticks);
        self
    }

    pub fn event_bus(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    pub fn build(self) -> CrateResult<ScanSession> {
        let source = self
            .source
            .ok_or_else(|| AllerlensError::system("Frame source must be specified"))?;
        let client = self
            .client
            .ok_or_else(|| AllerlensError::system("Analysis client must be specified"))?;
        let sampler = match self.sampler {
            Some(sampler) => sampler,
            None => Arc::new(FrameSampler::from_config(&self.config)?),
        };
        let events = self
            .events
            .unwrap_or_else(|| EventBus::new(self.config.event_bus_capacity));
        let buffer = FrameBuffer::new(self.config.max_frames)?;

        Ok(ScanSession {
            shared: Arc::new(SessionShared {
                config: self.config,
                source,
                sampler,
                client,
                ticks: self.ticks,
                events,
                inner: Mutex::new(SessionInner {
                    state: ScanState::Idle,
                    generation: 0,
                    buffer,
                    camera: None,
                    ticker: None,
                    capturing: false,
                    last_result: None,
                    stats: SessionStats::default(),
                }),
            }),
        })
    }
}

impl Default for ScanSessionBuilder {
    fn default() -> Self {
        Self::new()
    }
}
