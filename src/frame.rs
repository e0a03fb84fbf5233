use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Encoding of a captured still image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FrameFormat {
    /// Baseline JPEG
    Jpeg,
    /// Lossless PNG
    Png,
}

impl FrameFormat {
    /// MIME type used when the frame travels as a data URL or multipart part
    pub fn mime_type(&self) -> &'static str {
        match self {
            FrameFormat::Jpeg => "image/jpeg",
            FrameFormat::Png => "image/png",
        }
    }

    /// Guess the format from a file extension
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "jpg" | "jpeg" => Some(FrameFormat::Jpeg),
            "png" => Some(FrameFormat::Png),
            _ => None,
        }
    }
}

/// One still image captured during a scanning session
#[derive(Debug, Clone)]
pub struct Frame {
    /// 0-based capture index within the session
    pub sequence: usize,
    /// Wall-clock capture time
    pub captured_at: DateTime<Utc>,
    /// Encoded image bytes (shared, never mutated)
    pub data: Arc<Vec<u8>>,
    /// Frame width in pixels
    pub width: u32,
    /// Frame height in pixels
    pub height: u32,
    /// Encoding of `data`
    pub format: FrameFormat,
}

impl Frame {
    pub fn new(sequence: usize, data: Vec<u8>, width: u32, height: u32, format: FrameFormat) -> Self {
        Self {
            sequence,
            captured_at: Utc::now(),
            data: Arc::new(data),
            width,
            height,
            format,
        }
    }

    /// Same image with a different capture index
    pub fn with_sequence(mut self, sequence: usize) -> Self {
        self.sequence = sequence;
        self
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Encode as a self-describing `data:<mime>;base64,<payload>` string
    pub fn to_data_url(&self) -> String {
        format!(
            "data:{};base64,{}",
            self.format.mime_type(),
            base64::engine::general_purpose::STANDARD.encode(self.data.as_slice())
        )
    }
}
