use crate::error::{AllerlensError, Result};
use crate::frame::Frame;
use tracing::{debug, trace};

/// Capacity-bounded, capture-ordered frame storage for one scanning session
///
/// Unlike a ring buffer this never overwrites: once `capacity` frames are held
/// further pushes are refused, so a batch always contains the first
/// `capacity` frames of the session in capture order.
#[derive(Debug)]
pub struct FrameBuffer {
    frames: Vec<Frame>,
    capacity: usize,
    stats: FrameBufferStats,
}

/// Counters kept across clears for diagnostics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrameBufferStats {
    /// Frames accepted into the buffer
    pub frames_pushed: u64,
    /// Pushes refused because the buffer was full
    pub frames_rejected: u64,
    /// Frames handed out by `drain`
    pub frames_drained: u64,
    /// Frames dropped by `clear`
    pub frames_discarded: u64,
}

impl FrameBuffer {
    /// Create an empty buffer holding at most `capacity` frames
    ///
    /// # Example
    /// ```
    /// use allerlens::frame_buffer::FrameBuffer;
    ///
    /// let buffer = FrameBuffer::new(15).unwrap();
    /// assert!(buffer.is_empty());
    /// ```
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(AllerlensError::system(
                "Frame buffer capacity must be greater than 0",
            ));
        }

        debug!("Created frame buffer with capacity {}", capacity);

        Ok(Self {
            frames: Vec::with_capacity(capacity),
            capacity,
            stats: FrameBufferStats::default(),
        })
    }

    /// Append a frame, assigning it the next sequence number
    ///
    /// Returns the assigned sequence, or gives the frame back when full.
    pub fn push(&mut self, frame: Frame) -> std::result::Result<usize, Frame> {
        if self.is_full() {
            self.stats.frames_rejected += 1;
            trace!("Frame buffer full ({}), rejecting frame", self.capacity);
            return Err(frame);
        }

        let sequence = self.frames.len();
        self.frames.push(frame.with_sequence(sequence));
        self.stats.frames_pushed += 1;

        trace!(
            "Buffered frame {} ({}/{})",
            sequence,
            self.frames.len(),
            self.capacity
        );

        Ok(sequence)
    }

    /// Take every buffered frame in capture order, leaving the buffer empty
    pub fn drain(&mut self) -> Vec<Frame> {
        let frames = std::mem::take(&mut self.frames);
        self.frames.reserve(self.capacity);
        self.stats.frames_drained += frames.len() as u64;
        debug!("Drained {} frames from buffer", frames.len());
        frames
    }

    /// Drop every buffered frame
    pub fn clear(&mut self) {
        if !self.frames.is_empty() {
            debug!("Discarding {} buffered frames", self.frames.len());
        }
        self.stats.frames_discarded += self.frames.len() as u64;
        self.frames.clear();
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.frames.len() >= self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Sequence numbers currently held, in order
    pub fn sequences(&self) -> Vec<usize> {
        self.frames.iter().map(|f| f.sequence).collect()
    }

    pub fn stats(&self) -> FrameBufferStats {
        self.stats.clone()
    }
}
