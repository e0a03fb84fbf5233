mod builder;
#[cfg(all(feature = "camera", target_os = "linux"))]
mod gstreamer;
mod interface;
mod mock;

pub use builder::FrameSourceBuilder;
#[cfg(all(feature = "camera", target_os = "linux"))]
pub use gstreamer::GstCamera;
pub use interface::{CameraHandle, FrameSource, RawImage, VideoStream};
pub use mock::{MockCamera, MockFailure};
