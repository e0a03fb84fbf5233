pub mod aggregator;
pub mod analysis;
pub mod camera;
pub mod config;
pub mod error;
pub mod events;
pub mod frame;
pub mod frame_buffer;
pub mod ingredients;
pub mod sampler;
pub mod session;

pub use aggregator::{AnalysisResult, ResultAggregator};
pub use analysis::{AnalysisClient, HttpAnalysisClient, RawAnalysisResponse, RecognizedText};
pub use camera::{CameraHandle, FrameSource, FrameSourceBuilder, MockCamera, VideoStream};
pub use config::AllerlensConfig;
pub use error::{AllerlensError, Result};
pub use events::{EventBus, EventFilter, EventReceiver, ScanEvent};
pub use frame::{Frame, FrameFormat};
pub use frame_buffer::{FrameBuffer, FrameBufferStats};
pub use ingredients::{add_ingredients, AddIngredientsReport, IngredientQuery};
pub use sampler::{CaptureSurface, FrameSampler, SamplerStats};
pub use session::{IntervalTickSource, ScanSession, ScanState, TickOutcome, TickSource};
