use crate::aggregator::AnalysisResult;
use crate::error::EventBusError;
use serde::{Deserialize, Serialize};
use std::time::SystemTime;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// Notifications emitted by a scanning session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ScanEvent {
    /// Camera acquired, sampling begins
    ScanStarted { generation: u64, timestamp: SystemTime },
    /// A frame was appended to the session buffer
    FrameCaptured {
        generation: u64,
        sequence: usize,
        bytes: usize,
    },
    /// A tick failed to capture and was skipped
    CaptureSkipped { generation: u64, reason: String },
    /// Sampling stopped and the batch was handed to finalization
    ScanStopped { generation: u64, frame_count: usize },
    /// The camera could not be acquired; the start attempt is over
    CameraUnavailable { reason: String, timestamp: SystemTime },
    /// The batch analysis succeeded
    AnalysisCompleted {
        generation: u64,
        result: AnalysisResult,
    },
    /// The batch analysis failed; no result was published
    AnalysisFailed { generation: u64, error: String },
    /// The session was reset to idle
    SessionReset { generation: u64 },
}

impl ScanEvent {
    /// Get a human-readable description of the event
    pub fn description(&self) -> String {
        match self {
            ScanEvent::ScanStarted { generation, .. } => {
                format!("Scan {} started", generation)
            }
            ScanEvent::FrameCaptured {
                sequence, bytes, ..
            } => {
                format!("Frame {} captured ({} bytes)", sequence, bytes)
            }
            ScanEvent::CaptureSkipped { reason, .. } => {
                format!("Capture skipped: {}", reason)
            }
            ScanEvent::ScanStopped {
                generation,
                frame_count,
            } => {
                format!("Scan {} stopped with {} frames", generation, frame_count)
            }
            ScanEvent::CameraUnavailable { reason, .. } => {
                format!("Camera unavailable: {}", reason)
            }
            ScanEvent::AnalysisCompleted { result, .. } => format!(
                "Analysis completed: {} flagged ingredients",
                result.flagged_ingredients.len()
            ),
            ScanEvent::AnalysisFailed { error, .. } => {
                format!("Analysis failed: {}", error)
            }
            ScanEvent::SessionReset { generation } => {
                format!("Session reset (generation {})", generation)
            }
        }
    }

    /// Get the event type as a string for filtering
    pub fn event_type(&self) -> &'static str {
        match self {
            ScanEvent::ScanStarted { .. } => "scan_started",
            ScanEvent::FrameCaptured { .. } => "frame_captured",
            ScanEvent::CaptureSkipped { .. } => "capture_skipped",
            ScanEvent::ScanStopped { .. } => "scan_stopped",
            ScanEvent::CameraUnavailable { .. } => "camera_unavailable",
            ScanEvent::AnalysisCompleted { .. } => "analysis_completed",
            ScanEvent::AnalysisFailed { .. } => "analysis_failed",
            ScanEvent::SessionReset { .. } => "session_reset",
        }
    }
}

/// Async event bus for session notifications using broadcast channels
pub struct EventBus {
    sender: broadcast::Sender<ScanEvent>,
}

impl EventBus {
    /// Create a new event bus with the specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Subscribe to events and get a receiver
    pub fn subscribe(&self) -> broadcast::Receiver<ScanEvent> {
        self.sender.subscribe()
    }

    /// Subscribe to a subset of events
    pub fn subscribe_filtered(&self, filter: EventFilter, name: &str) -> EventReceiver {
        EventReceiver::new(self.sender.subscribe(), filter, name.to_string())
    }

    /// Publish an event to all subscribers
    ///
    /// Having no subscribers is not an error; the event is simply dropped.
    pub fn publish(&self, event: ScanEvent) -> usize {
        match &event {
            ScanEvent::CameraUnavailable { reason, .. } => {
                error!("Camera unavailable: {}", reason);
            }
            ScanEvent::AnalysisFailed { generation, error } => {
                error!("Analysis for scan {} failed: {}", generation, error);
            }
            ScanEvent::CaptureSkipped { reason, .. } => {
                warn!("Capture skipped: {}", reason);
            }
            ScanEvent::ScanStarted { .. }
            | ScanEvent::ScanStopped { .. }
            | ScanEvent::AnalysisCompleted { .. } => {
                info!("{}", event.description());
            }
            _ => {
                debug!("Event: {}", event.description());
            }
        }

        self.sender.send(event).unwrap_or(0)
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Clone for EventBus {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

/// Event filter for selective event handling
#[derive(Debug, Clone)]
pub enum EventFilter {
    /// Accept all events
    All,
    /// Accept only specific event types
    EventTypes(Vec<&'static str>),
    /// Accept events of one session generation
    Generation(u64),
}

impl EventFilter {
    /// Check if an event passes this filter
    pub fn matches(&self, event: &ScanEvent) -> bool {
        match self {
            EventFilter::All => true,
            EventFilter::EventTypes(types) => types.contains(&event.event_type()),
            EventFilter::Generation(wanted) => match event {
                ScanEvent::ScanStarted { generation, .. }
                | ScanEvent::FrameCaptured { generation, .. }
                | ScanEvent::CaptureSkipped { generation, .. }
                | ScanEvent::ScanStopped { generation, .. }
                | ScanEvent::AnalysisCompleted { generation, .. }
                | ScanEvent::AnalysisFailed { generation, .. }
                | ScanEvent::SessionReset { generation } => generation == wanted,
                ScanEvent::CameraUnavailable { .. } => false,
            },
        }
    }
}

/// Event receiver with filtering
pub struct EventReceiver {
    receiver: broadcast::Receiver<ScanEvent>,
    filter: EventFilter,
    name: String,
}

impl EventReceiver {
    pub fn new(receiver: broadcast::Receiver<ScanEvent>, filter: EventFilter, name: String) -> Self {
        Self {
            receiver,
            filter,
            name,
        }
    }

    /// Receive the next filtered event
    pub async fn recv(&mut self) -> Result<ScanEvent, EventBusError> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => {
                    if self.filter.matches(&event) {
                        debug!(
                            "Receiver '{}' received event: {}",
                            self.name,
                            event.description()
                        );
                        return Ok(event);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Receiver '{}' lagged behind by {} events", self.name, n);
                    return Err(EventBusError::PublishFailed {
                        details: format!("Receiver lagged behind by {} events", n),
                    });
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("Event bus closed for receiver '{}'", self.name);
                    return Err(EventBusError::ChannelClosed);
                }
            }
        }
    }

    /// Try to receive an event without blocking
    pub fn try_recv(&mut self) -> Result<Option<ScanEvent>, EventBusError> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => {
                    if self.filter.matches(&event) {
                        return Ok(Some(event));
                    }
                }
                Err(broadcast::error::TryRecvError::Empty) => {
                    return Ok(None);
                }
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    warn!("Receiver '{}' lagged behind by {} events", self.name, n);
                    return Err(EventBusError::PublishFailed {
                        details: format!("Receiver lagged behind by {} events", n),
                    });
                }
                Err(broadcast::error::TryRecvError::Closed) => {
                    return Err(EventBusError::ChannelClosed);
                }
            }
        }
    }
}
