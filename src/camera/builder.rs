use super::interface::FrameSource;
use super::mock::MockCamera;
use crate::config::CameraConfig;
use crate::error::{AllerlensError, Result};
use std::sync::Arc;
use tracing::info;

/// Builder selecting the camera backend for a scan
pub struct FrameSourceBuilder {
    config: Option<CameraConfig>,
    mock: bool,
}

impl FrameSourceBuilder {
    pub fn new() -> Self {
        Self {
            config: None,
            mock: false,
        }
    }

    pub fn config(mut self, config: CameraConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Use the synthetic camera instead of a real device
    pub fn mock(mut self, mock: bool) -> Self {
        self.mock = mock;
        self
    }

    pub fn build(self) -> Result<Arc<dyn FrameSource>> {
        let config = self
            .config
            .ok_or_else(|| AllerlensError::system("Camera configuration must be specified"))?;

        if self.mock {
            info!("Using mock camera source");
            return Ok(Arc::new(MockCamera::new(config.resolution)));
        }

        Self::build_device(config)
    }

    #[cfg(all(feature = "camera", target_os = "linux"))]
    fn build_device(config: CameraConfig) -> Result<Arc<dyn FrameSource>> {
        let camera = super::gstreamer::GstCamera::new(config)?;
        Ok(Arc::new(camera))
    }

    #[cfg(not(all(feature = "camera", target_os = "linux")))]
    fn build_device(_config: CameraConfig) -> Result<Arc<dyn FrameSource>> {
        Err(AllerlensError::system(
            "Built without the `camera` feature; rebuild with --features camera or use --mock",
        ))
    }
}

impl Default for FrameSourceBuilder {
    fn default() -> Self {
        Self::new()
    }
}
