use super::interface::{CameraHandle, FrameSource, RawImage, VideoStream};
use crate::error::{CameraError, CaptureError};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, trace};

/// Why a mock camera refuses to start
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockFailure {
    PermissionDenied,
    NoDevice,
}

/// Synthetic camera producing gradient frames, usable without hardware
pub struct MockCamera {
    resolution: (u32, u32),
    failure: Option<MockFailure>,
    transient_failures: HashSet<u64>,
    end_after: Option<u64>,
    held: Mutex<Option<(u64, Arc<MockStream>)>>,
    acquisitions: AtomicU64,
    releases: AtomicU64,
}

impl MockCamera {
    pub fn new(resolution: (u32, u32)) -> Self {
        Self {
            resolution,
            failure: None,
            transient_failures: HashSet::new(),
            end_after: None,
            held: Mutex::new(None),
            acquisitions: AtomicU64::new(0),
            releases: AtomicU64::new(0),
        }
    }

    /// Refuse every `acquire` as if the user denied camera permission
    pub fn deny_permission(mut self) -> Self {
        self.failure = Some(MockFailure::PermissionDenied);
        self
    }

    /// Refuse every `acquire` as if no device were attached
    pub fn without_device(mut self) -> Self {
        self.failure = Some(MockFailure::NoDevice);
        self
    }

    /// Make the grab with the given 0-based index fail transiently
    pub fn fail_grab(mut self, index: u64) -> Self {
        self.transient_failures.insert(index);
        self
    }

    /// End the stream once `grabs` grabs have been attempted
    pub fn end_stream_after(mut self, grabs: u64) -> Self {
        self.end_after = Some(grabs);
        self
    }

    /// Whether a handle is currently outstanding
    pub fn is_held(&self) -> bool {
        self.held.lock().is_some()
    }

    pub fn acquisitions(&self) -> u64 {
        self.acquisitions.load(Ordering::Relaxed)
    }

    pub fn releases(&self) -> u64 {
        self.releases.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl FrameSource for MockCamera {
    async fn acquire(&self) -> Result<CameraHandle, CameraError> {
        match self.failure {
            Some(MockFailure::PermissionDenied) => {
                return Err(CameraError::PermissionDenied {
                    details: "mock camera configured to deny access".to_string(),
                });
            }
            Some(MockFailure::NoDevice) => {
                return Err(CameraError::NotFound {
                    details: "mock camera configured without device".to_string(),
                });
            }
            None => {}
        }

        let mut held = self.held.lock();
        if held.is_some() {
            return Err(CameraError::Busy);
        }

        let stream = Arc::new(MockStream {
            resolution: self.resolution,
            active: AtomicBool::new(true),
            grabs: AtomicU64::new(0),
            transient_failures: self.transient_failures.clone(),
            end_after: self.end_after,
        });
        let handle = CameraHandle::new(Arc::clone(&stream) as Arc<dyn VideoStream>);
        *held = Some((handle.id(), stream));
        self.acquisitions.fetch_add(1, Ordering::Relaxed);

        info!(
            "Mock camera acquired ({}x{}, handle {})",
            self.resolution.0,
            self.resolution.1,
            handle.id()
        );

        Ok(handle)
    }

    async fn release(&self, handle: &CameraHandle) {
        let mut held = self.held.lock();
        match held.as_ref() {
            Some((id, stream)) if *id == handle.id() => {
                stream.active.store(false, Ordering::Relaxed);
                *held = None;
                self.releases.fetch_add(1, Ordering::Relaxed);
                info!("Mock camera released (handle {})", handle.id());
            }
            _ => {
                debug!("Ignoring release of stale mock camera handle {}", handle.id());
            }
        }
    }

    fn name(&self) -> &str {
        "mock"
    }
}

struct MockStream {
    resolution: (u32, u32),
    active: AtomicBool,
    grabs: AtomicU64,
    transient_failures: HashSet<u64>,
    end_after: Option<u64>,
}

#[async_trait]
impl VideoStream for MockStream {
    fn is_active(&self) -> bool {
        self.active.load(Ordering::Relaxed)
    }

    async fn grab(&self) -> Result<RawImage, CaptureError> {
        if !self.is_active() {
            return Err(CaptureError::StreamInactive);
        }

        let index = self.grabs.fetch_add(1, Ordering::Relaxed);

        if let Some(limit) = self.end_after {
            if index >= limit {
                self.active.store(false, Ordering::Relaxed);
                return Err(CaptureError::StreamEnded);
            }
        }

        if self.transient_failures.contains(&index) {
            return Err(CaptureError::Grab {
                details: format!("mock grab {} failed", index),
            });
        }

        let (width, height) = self.resolution;
        let shade = (index % 256) as u8;
        let mut pixels = Vec::with_capacity(width as usize * height as usize * 3);
        for y in 0..height {
            for x in 0..width {
                pixels.push((x * 255 / width.max(1)) as u8);
                pixels.push((y * 255 / height.max(1)) as u8);
                pixels.push(shade);
            }
        }

        trace!("Generated mock image {} ({}x{})", index, width, height);

        Ok(RawImage::new(width, height, pixels))
    }
}
