use thiserror::Error;

/// Top-level error type for the AllerLens crate
#[derive(Error, Debug)]
pub enum AllerlensError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("Camera error: {0}")]
    Camera(#[from] CameraError),

    #[error("Capture error: {0}")]
    Capture(#[from] CaptureError),

    #[error("Analysis error: {0}")]
    Analysis(#[from] AnalysisError),

    #[error("Scan error: {0}")]
    Scan(#[from] ScanError),

    #[error("Ingredient error: {0}")]
    Ingredient(#[from] IngredientError),

    #[error("Event bus error: {0}")]
    EventBus(#[from] EventBusError),

    #[error("System error: {message}")]
    System { message: String },
}

impl AllerlensError {
    pub fn system<S: Into<String>>(message: S) -> Self {
        Self::System {
            message: message.into(),
        }
    }
}

/// Failures acquiring or driving a camera device
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CameraError {
    #[error("Camera permission denied: {details}")]
    PermissionDenied { details: String },

    #[error("No camera device found: {details}")]
    NotFound { details: String },

    #[error("Camera is already in use")]
    Busy,

    #[error("Camera configuration error: {details}")]
    Configuration { details: String },
}

/// Per-frame capture failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CaptureError {
    #[error("Video stream is not active")]
    StreamInactive,

    #[error("Video stream ended")]
    StreamEnded,

    #[error("Capture surface is locked by an active session")]
    SurfaceLocked,

    #[error("Invalid capture surface {width}x{height}")]
    InvalidSurface { width: u32, height: u32 },

    #[error("Failed to grab frame: {details}")]
    Grab { details: String },

    #[error("Failed to encode frame: {details}")]
    Encode { details: String },
}

/// Failures talking to the remote analysis service
#[derive(Error, Debug)]
pub enum AnalysisError {
    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Analysis service returned status {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Failed to decode analysis response: {details}")]
    Decode { details: String },

    #[error("Analysis did not complete within {seconds}s")]
    Timeout { seconds: u64 },

    #[error("Nothing to analyse")]
    EmptyBatch,

    #[error("Analysis service error: {details}")]
    Service { details: String },
}

/// Lifecycle errors surfaced by the scan session
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScanError {
    #[error("Camera unavailable: {0}")]
    CameraUnavailable(CameraError),

    #[error("Analysis failed: {details}")]
    AnalysisFailed { details: String },

    #[error("Response from superseded session generation {generation} discarded")]
    StaleResponse { generation: u64 },

    #[error("Operation not valid in state {state}")]
    InvalidState { state: String },
}

/// Ingredient list input errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IngredientError {
    #[error("Ingredient term is empty")]
    Empty,

    #[error("No ingredient terms given")]
    NoTerms,
}

#[derive(Error, Debug, Clone)]
pub enum EventBusError {
    #[error("Failed to publish event: {details}")]
    PublishFailed { details: String },

    #[error("Event channel closed")]
    ChannelClosed,
}

pub type Result<T> = std::result::Result<T, AllerlensError>;
