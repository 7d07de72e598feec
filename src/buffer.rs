//! Pre-allocated block assembly buffer.
//!
//! One contiguous `f32` store sized for exactly one delivery block, allocated
//! at initialization and reused for every block after that. The write cursor
//! advances in whole frames (one value per channel) and is reset, not
//! reallocated, when a completed block has been handed to the consumer.

use crate::error::ResourceError;

/// Fixed-capacity sample store for one block, frame-major interleaved.
#[derive(Debug)]
pub struct BlockBuffer {
    samples: Vec<f32>,
    channel_count: usize,
    frames_per_block: usize,
    cursor: usize,
}

impl BlockBuffer {
    /// Allocate a buffer holding `samples_per_block x channel_count` values.
    ///
    /// Fails with [`ResourceError::InvalidSize`] when either dimension is
    /// zero. This is the only allocation the buffer ever performs.
    pub fn new(samples_per_block: u32, channel_count: u32) -> Result<Self, ResourceError> {
        if samples_per_block == 0 || channel_count == 0 {
            return Err(ResourceError::InvalidSize { samples_per_block, channel_count });
        }

        let frames_per_block = samples_per_block as usize;
        let channel_count = channel_count as usize;

        Ok(BlockBuffer {
            samples: vec![0.0; frames_per_block * channel_count],
            channel_count,
            frames_per_block,
            cursor: 0,
        })
    }

    /// Total capacity in values.
    pub fn capacity(&self) -> usize {
        self.samples.len()
    }

    /// Number of channels per frame.
    pub fn channel_count(&self) -> usize {
        self.channel_count
    }

    /// Frames in one complete block.
    pub fn frames_per_block(&self) -> usize {
        self.frames_per_block
    }

    /// Frames written since the last reset.
    pub fn frames_written(&self) -> usize {
        self.cursor
    }

    /// Frames still missing before the block is complete.
    pub fn remaining_frames(&self) -> usize {
        self.frames_per_block - self.cursor
    }

    /// Whether a full block is assembled.
    pub fn is_full(&self) -> bool {
        self.cursor == self.frames_per_block
    }

    /// Copy whole interleaved frames at the cursor.
    ///
    /// Callers size their fetches by [`remaining_frames`](Self::remaining_frames),
    /// so a write past capacity or a ragged frame is a programming error, not
    /// a recoverable condition.
    pub fn write_frames(&mut self, frames: &[f32]) {
        assert_eq!(frames.len() % self.channel_count, 0, "write is not whole frames");
        let count = frames.len() / self.channel_count;
        assert!(count <= self.remaining_frames(), "write exceeds block capacity");

        let start = self.cursor * self.channel_count;
        self.samples[start..start + frames.len()].copy_from_slice(frames);
        self.cursor += count;
    }

    /// The values written so far, in frame-major order.
    pub fn as_slice(&self) -> &[f32] {
        &self.samples[..self.cursor * self.channel_count]
    }

    /// Rewind the cursor for the next block. Storage is reused as-is.
    pub fn reset(&mut self) {
        self.cursor = 0;
    }
}
