use super::interface::{CameraHandle, FrameSource, RawImage, VideoStream};
use crate::config::CameraConfig;
use crate::error::{CameraError, CaptureError};
use async_trait::async_trait;
use gstreamer::prelude::*;
use gstreamer::{MessageView, Pipeline};
use gstreamer_app::AppSink;
use gstreamer_video::VideoInfo;
use parking_lot::Mutex;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, trace, warn};

/// How long a single grab waits for the appsink before giving up
const GRAB_TIMEOUT_MS: u64 = 500;

/// V4L2 camera driven through a GStreamer pipeline
pub struct GstCamera {
    config: CameraConfig,
    held: Mutex<Option<(u64, Arc<GstStream>)>>,
}

impl GstCamera {
    pub fn new(config: CameraConfig) -> Result<Self, CameraError> {
        info!(
            "Initializing GStreamer camera for device {} ({}x{} @ {}fps)",
            config.index, config.resolution.0, config.resolution.1, config.fps
        );

        gstreamer::init().map_err(|e| CameraError::Configuration {
            details: format!("Failed to initialize GStreamer: {}", e),
        })?;

        Ok(Self {
            config,
            held: Mutex::new(None),
        })
    }

    fn device_path(&self) -> String {
        format!("/dev/video{}", self.config.index)
    }

    /// Build GStreamer pipeline string producing packed RGB stills
    fn build_pipeline_string(&self) -> String {
        let (width, height) = self.config.resolution;
        let decode = if self.config.format.eq_ignore_ascii_case("MJPG") {
            format!(
                "image/jpeg,width={},height={},framerate={}/1 ! jpegdec",
                width, height, self.config.fps
            )
        } else {
            format!(
                "video/x-raw,width={},height={},framerate={}/1",
                width, height, self.config.fps
            )
        };

        format!(
            "v4l2src device={} io-mode=mmap ! {} ! videoconvert ! \
             video/x-raw,format=RGB ! \
             appsink name=sink sync=false max-buffers=1 drop=true enable-last-sample=false emit-signals=false",
            self.device_path(),
            decode
        )
    }

    fn classify_start_failure(&self, details: String) -> CameraError {
        let device = self.device_path();
        match std::fs::OpenOptions::new().read(true).open(&device) {
            Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
                CameraError::PermissionDenied {
                    details: format!("{}: {}", device, e),
                }
            }
            _ => CameraError::Configuration { details },
        }
    }
}

#[async_trait]
impl FrameSource for GstCamera {
    async fn acquire(&self) -> Result<CameraHandle, CameraError> {
        if self.held.lock().is_some() {
            return Err(CameraError::Busy);
        }

        let device = self.device_path();
        if !Path::new(&device).exists() {
            return Err(CameraError::NotFound { details: device });
        }

        let pipeline_desc = self.build_pipeline_string();
        info!("Creating GStreamer pipeline: {}", pipeline_desc);

        let pipeline = gstreamer::parse::launch(&pipeline_desc)
            .map_err(|e| CameraError::Configuration {
                details: format!("Failed to create pipeline: {}", e),
            })?
            .downcast::<Pipeline>()
            .map_err(|_| CameraError::Configuration {
                details: "Failed to downcast to Pipeline".to_string(),
            })?;

        let appsink = pipeline
            .by_name("sink")
            .ok_or_else(|| CameraError::Configuration {
                details: "Pipeline has no appsink".to_string(),
            })?
            .downcast::<AppSink>()
            .map_err(|_| CameraError::Configuration {
                details: "Failed to downcast to AppSink".to_string(),
            })?;

        if let Err(e) = pipeline.set_state(gstreamer::State::Playing) {
            let _ = pipeline.set_state(gstreamer::State::Null);
            error!("Failed to start GStreamer pipeline: {}", e);
            return Err(self.classify_start_failure(e.to_string()));
        }

        let stream = Arc::new(GstStream {
            inner: Arc::new(GstPipelineState {
                pipeline,
                appsink,
                active: AtomicBool::new(true),
            }),
        });

        let mut held = self.held.lock();
        if held.is_some() {
            stream.inner.shutdown();
            return Err(CameraError::Busy);
        }
        let handle = CameraHandle::new(Arc::clone(&stream) as Arc<dyn VideoStream>);
        *held = Some((handle.id(), stream));

        info!("GStreamer camera {} acquired (handle {})", device, handle.id());
        Ok(handle)
    }

    async fn release(&self, handle: &CameraHandle) {
        let stream = {
            let mut held = self.held.lock();
            match held.as_ref() {
                Some((id, _)) if *id == handle.id() => held.take().map(|(_, s)| s),
                _ => None,
            }
        };

        match stream {
            Some(stream) => {
                stream.inner.shutdown();
                info!("GStreamer camera released (handle {})", handle.id());
            }
            None => debug!("Ignoring release of stale camera handle {}", handle.id()),
        }
    }

    fn name(&self) -> &str {
        "gstreamer"
    }
}

struct GstStream {
    inner: Arc<GstPipelineState>,
}

struct GstPipelineState {
    pipeline: Pipeline,
    appsink: AppSink,
    active: AtomicBool,
}

impl GstPipelineState {
    fn shutdown(&self) {
        self.active.store(false, Ordering::Relaxed);
        if let Err(e) = self.pipeline.set_state(gstreamer::State::Null) {
            warn!("Failed to stop GStreamer pipeline: {}", e);
        }
    }

    /// Drain the bus; true once the pipeline reported EOS or an error
    fn check_terminated(&self) -> bool {
        let Some(bus) = self.pipeline.bus() else {
            return false;
        };

        let mut terminated = false;
        while let Some(msg) = bus.pop_filtered(&[
            gstreamer::MessageType::Eos,
            gstreamer::MessageType::Error,
        ]) {
            match msg.view() {
                MessageView::Eos(..) => {
                    warn!("Camera stream reached end of stream");
                    terminated = true;
                }
                MessageView::Error(err) => {
                    error!("Camera pipeline error: {}", err.error());
                    terminated = true;
                }
                _ => {}
            }
        }
        terminated
    }

    fn pull_image(&self) -> Result<RawImage, CaptureError> {
        if self.check_terminated() {
            self.active.store(false, Ordering::Relaxed);
            return Err(CaptureError::StreamEnded);
        }

        let sample = match self
            .appsink
            .try_pull_sample(gstreamer::ClockTime::from_mseconds(GRAB_TIMEOUT_MS))
        {
            Some(sample) => sample,
            None if self.appsink.is_eos() => {
                self.active.store(false, Ordering::Relaxed);
                return Err(CaptureError::StreamEnded);
            }
            None => {
                return Err(CaptureError::Grab {
                    details: format!("No sample within {}ms", GRAB_TIMEOUT_MS),
                });
            }
        };

        let buffer = sample.buffer().ok_or_else(|| CaptureError::Grab {
            details: "No buffer in sample".to_string(),
        })?;
        let caps = sample.caps().ok_or_else(|| CaptureError::Grab {
            details: "No caps in sample".to_string(),
        })?;
        let video_info = VideoInfo::from_caps(caps).map_err(|e| CaptureError::Grab {
            details: format!("Failed to get video info: {}", e),
        })?;
        let map = buffer.map_readable().map_err(|e| CaptureError::Grab {
            details: format!("Failed to map buffer: {}", e),
        })?;

        let width = video_info.width();
        let height = video_info.height();
        if width == 0 || height == 0 {
            return Err(CaptureError::Grab {
                details: format!("Empty video frame {}x{}", width, height),
            });
        }
        let row_bytes = width as usize * 3;
        let stride = video_info.stride()[0] as usize;
        let data = map.as_slice();

        if stride < row_bytes || data.len() < stride * (height as usize - 1) + row_bytes {
            return Err(CaptureError::Grab {
                details: format!("Short RGB buffer ({} bytes for {}x{})", data.len(), width, height),
            });
        }

        let mut pixels = Vec::with_capacity(row_bytes * height as usize);
        for row in 0..height as usize {
            let start = row * stride;
            pixels.extend_from_slice(&data[start..start + row_bytes]);
        }

        trace!("Grabbed RGB image {}x{}", width, height);
        Ok(RawImage::new(width, height, pixels))
    }
}

#[async_trait]
impl VideoStream for GstStream {
    fn is_active(&self) -> bool {
        self.inner.active.load(Ordering::Relaxed)
    }

    async fn grab(&self) -> Result<RawImage, CaptureError> {
        if !self.is_active() {
            return Err(CaptureError::StreamInactive);
        }

        // try_pull_sample blocks for up to GRAB_TIMEOUT_MS
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || inner.pull_image())
            .await
            .map_err(|e| CaptureError::Grab {
                details: format!("Grab task failed: {}", e),
            })?
    }
}
