use crate::error::{CameraError, CaptureError};
use async_trait::async_trait;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

// Shared by every source so a handle id never repeats within the process
static NEXT_HANDLE_ID: AtomicU64 = AtomicU64::new(1);

/// Uncompressed RGB8 image grabbed from a live stream
#[derive(Debug, Clone)]
pub struct RawImage {
    pub width: u32,
    pub height: u32,
    /// Tightly packed RGB triplets, `width * height * 3` bytes
    pub pixels: Vec<u8>,
}

impl RawImage {
    pub fn new(width: u32, height: u32, pixels: Vec<u8>) -> Self {
        Self {
            width,
            height,
            pixels,
        }
    }

    /// Whether `pixels` holds exactly one RGB triplet per pixel
    pub fn is_well_formed(&self) -> bool {
        self.width > 0
            && self.height > 0
            && self.pixels.len() == self.width as usize * self.height as usize * 3
    }
}

/// A running video stream that stills can be grabbed from
#[async_trait]
pub trait VideoStream: Send + Sync {
    /// Whether the stream is currently delivering frames
    fn is_active(&self) -> bool;

    /// Grab the most recent image from the stream
    ///
    /// Returns `CaptureError::StreamEnded` once the underlying track has
    /// terminated; any other error is transient.
    async fn grab(&self) -> Result<RawImage, CaptureError>;
}

/// Exclusive lease on a camera device, returned by [`FrameSource::acquire`]
#[derive(Clone)]
pub struct CameraHandle {
    id: u64,
    stream: Arc<dyn VideoStream>,
}

impl CameraHandle {
    /// Wrap `stream` in a handle with a process-unique id
    pub fn new(stream: Arc<dyn VideoStream>) -> Self {
        let id = NEXT_HANDLE_ID.fetch_add(1, Ordering::Relaxed);
        Self { id, stream }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn stream(&self) -> Arc<dyn VideoStream> {
        Arc::clone(&self.stream)
    }
}

impl fmt::Debug for CameraHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CameraHandle")
            .field("id", &self.id)
            .field("active", &self.stream.is_active())
            .finish()
    }
}

/// Live camera device owning start/stop of the media stream
#[async_trait]
pub trait FrameSource: Send + Sync {
    /// Request exclusive access to the device and start streaming
    async fn acquire(&self) -> Result<CameraHandle, CameraError>;

    /// Stop streaming and give the device back
    ///
    /// Must be a no-op for handles that were already released or that this
    /// source never handed out.
    async fn release(&self, handle: &CameraHandle);

    /// Short name used in logs
    fn name(&self) -> &str;
}
