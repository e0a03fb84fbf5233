use crate::camera::{RawImage, VideoStream};
use crate::config::ScanConfig;
use crate::error::CaptureError;
use crate::frame::{Frame, FrameFormat};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use image::{ColorType, RgbImage};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::{debug, trace, warn};

/// Fixed-size drawing target that live images are scaled onto before encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureSurface {
    pub width: u32,
    pub height: u32,
}

impl CaptureSurface {
    pub fn new(width: u32, height: u32) -> Result<Self, CaptureError> {
        if width == 0 || height == 0 {
            return Err(CaptureError::InvalidSurface { width, height });
        }
        Ok(Self { width, height })
    }
}

/// Snapshot of sampler counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SamplerStats {
    pub captures: u64,
    pub failures: u64,
}

/// Grabs stills from an active stream and encodes them as JPEG frames
///
/// The capture surface may only be changed while no session holds it; a
/// scanning session locks it for its whole lifetime so every frame of a batch
/// has identical dimensions.
pub struct FrameSampler {
    surface: Mutex<CaptureSurface>,
    locked: AtomicBool,
    jpeg_quality: u8,
    captures: AtomicU64,
    failures: AtomicU64,
}

impl FrameSampler {
    pub fn new(surface: CaptureSurface, jpeg_quality: u8) -> Self {
        Self {
            surface: Mutex::new(surface),
            locked: AtomicBool::new(false),
            jpeg_quality: jpeg_quality.clamp(1, 100),
            captures: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        }
    }

    pub fn from_config(config: &ScanConfig) -> Result<Self, CaptureError> {
        let surface = CaptureSurface::new(config.surface_width, config.surface_height)?;
        Ok(Self::new(surface, config.jpeg_quality))
    }

    pub fn surface(&self) -> CaptureSurface {
        *self.surface.lock()
    }

    /// Change the capture surface; refused while a session holds it
    pub fn set_surface(&self, width: u32, height: u32) -> Result<(), CaptureError> {
        if self.is_locked() {
            warn!(
                "Rejecting capture surface change to {}x{} during an active scan",
                width, height
            );
            return Err(CaptureError::SurfaceLocked);
        }

        let surface = CaptureSurface::new(width, height)?;
        *self.surface.lock() = surface;
        debug!("Capture surface set to {}x{}", width, height);
        Ok(())
    }

    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Acquire)
    }

    pub(crate) fn lock_surface(&self) {
        self.locked.store(true, Ordering::Release);
    }

    pub(crate) fn unlock_surface(&self) {
        self.locked.store(false, Ordering::Release);
    }

    pub fn stats(&self) -> SamplerStats {
        SamplerStats {
            captures: self.captures.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
        }
    }

    /// Capture one still from `stream` as frame `sequence`
    pub async fn capture(
        &self,
        stream: &dyn VideoStream,
        sequence: usize,
    ) -> Result<Frame, CaptureError> {
        if !stream.is_active() {
            self.failures.fetch_add(1, Ordering::Relaxed);
            return Err(CaptureError::StreamInactive);
        }

        let surface = self.surface();
        let result = match stream.grab().await {
            Ok(raw) => self.encode(raw, surface),
            Err(e) => Err(e),
        };

        match result {
            Ok(data) => {
                self.captures.fetch_add(1, Ordering::Relaxed);
                trace!(
                    "Captured frame {} ({}x{}, {} bytes)",
                    sequence,
                    surface.width,
                    surface.height,
                    data.len()
                );
                Ok(Frame::new(
                    sequence,
                    data,
                    surface.width,
                    surface.height,
                    FrameFormat::Jpeg,
                ))
            }
            Err(e) => {
                self.failures.fetch_add(1, Ordering::Relaxed);
                Err(e)
            }
        }
    }

    fn encode(&self, raw: RawImage, surface: CaptureSurface) -> Result<Vec<u8>, CaptureError> {
        if !raw.is_well_formed() {
            return Err(CaptureError::Grab {
                details: format!(
                    "Malformed image: {} bytes for {}x{}",
                    raw.pixels.len(),
                    raw.width,
                    raw.height
                ),
            });
        }

        let (src_width, src_height) = (raw.width, raw.height);
        let image = RgbImage::from_raw(src_width, src_height, raw.pixels).ok_or_else(|| {
            CaptureError::Grab {
                details: "Image buffer does not match its dimensions".to_string(),
            }
        })?;

        let scaled = if (src_width, src_height) == (surface.width, surface.height) {
            image
        } else {
            imageops::resize(&image, surface.width, surface.height, FilterType::Triangle)
        };

        let mut encoded = Vec::new();
        JpegEncoder::new_with_quality(&mut encoded, self.jpeg_quality)
            .encode(
                scaled.as_raw(),
                surface.width,
                surface.height,
                ColorType::Rgb8,
            )
            .map_err(|e| CaptureError::Encode {
                details: e.to_string(),
            })?;

        Ok(encoded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::{FrameSource, MockCamera};

    fn create_test_sampler() -> FrameSampler {
        FrameSampler::new(CaptureSurface::new(30, 20).unwrap(), 75)
    }

    #[tokio::test]
    async fn test_capture_scales_to_surface_and_encodes_jpeg() {
        let camera = MockCamera::new((64, 48));
        let handle = camera.acquire().await.unwrap();
        let sampler = create_test_sampler();

        let frame = sampler.capture(handle.stream().as_ref(), 3).await.unwrap();

        assert_eq!(frame.sequence, 3);
        assert_eq!((frame.width, frame.height), (30, 20));
        assert_eq!(frame.format, FrameFormat::Jpeg);
        assert_eq!(&frame.data[..2], &[0xFF, 0xD8]);

        let decoded = image::load_from_memory(&frame.data).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (30, 20));
    }

    #[tokio::test]
    async fn test_capture_requires_active_stream() {
        let camera = MockCamera::new((8, 8));
        let handle = camera.acquire().await.unwrap();
        camera.release(&handle).await;
        let sampler = create_test_sampler();

        let result = sampler.capture(handle.stream().as_ref(), 0).await;

        assert_eq!(result.unwrap_err(), CaptureError::StreamInactive);
        assert_eq!(sampler.stats().failures, 1);
    }

    #[tokio::test]
    async fn test_repeated_captures_do_not_grow_state() {
        let camera = MockCamera::new((16, 16));
        let handle = camera.acquire().await.unwrap();
        let sampler = create_test_sampler();

        for sequence in 0..50 {
            sampler
                .capture(handle.stream().as_ref(), sequence)
                .await
                .unwrap();
        }

        assert_eq!(sampler.stats().captures, 50);
        assert_eq!(sampler.surface(), CaptureSurface::new(30, 20).unwrap());
    }

    #[test]
    fn test_surface_locked_while_scanning() {
        let sampler = create_test_sampler();

        sampler.lock_surface();
        assert_eq!(
            sampler.set_surface(640, 480).unwrap_err(),
            CaptureError::SurfaceLocked
        );
        assert_eq!(sampler.surface().width, 30);

        sampler.unlock_surface();
        sampler.set_surface(640, 480).unwrap();
        assert_eq!(sampler.surface().width, 640);
    }

    #[test]
    fn test_zero_surface_rejected() {
        let sampler = create_test_sampler();

        assert!(matches!(
            sampler.set_surface(0, 10),
            Err(CaptureError::InvalidSurface { .. })
        ));
    }
}
