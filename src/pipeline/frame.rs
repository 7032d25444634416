//! Reference-counted media frames.
//!
//! A [`Frame`] is produced once by the camera and shared read-only by every
//! consumer that was attached to its channel at publication time. Sharing
//! goes through [`FrameRef`] (an `Arc`), so the payload is released exactly
//! once, by whichever consumer drops the last handle.
//!
//! Payloads come in two flavours: heap copies (encoded video, audio, crops)
//! and hardware buffers owned by a pool in the video subsystem. Dropping a
//! hardware buffer hands it back to its pool.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Range;
use std::sync::Arc;
use std::time::Instant;

use super::error::NodeError;

/// Shared handle to a published frame.
pub type FrameRef = Arc<Frame>;

/// Camera output channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Raw = 0,
    Jpeg = 1,
    H264 = 2,
    Audio = 3,
}

impl Channel {
    pub const COUNT: usize = 4;
    pub const ALL: [Channel; Channel::COUNT] =
        [Channel::Raw, Channel::Jpeg, Channel::H264, Channel::Audio];

    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            Channel::Raw => "raw",
            Channel::Jpeg => "jpeg",
            Channel::H264 => "h264",
            Channel::Audio => "audio",
        }
    }
}

impl TryFrom<u32> for Channel {
    type Error = NodeError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Channel::ALL
            .get(value as usize)
            .copied()
            .ok_or_else(|| NodeError::InvalidArgument(format!("channel {value} out of range")))
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Pixel or sample layout of a frame payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    Rgb888,
    Yuv420,
    Jpeg,
    H264,
    H265,
    Pcm16,
}

impl PixelFormat {
    /// Bytes per pixel for uncompressed formats.
    pub fn bytes_per_pixel(self) -> Option<usize> {
        match self {
            PixelFormat::Rgb888 => Some(3),
            _ => None,
        }
    }
}

/// Receives hardware buffers back once the last reference is gone.
pub trait BufferPool: Send + Sync {
    fn recycle(&self, handle: u64);
}

/// A buffer owned by the video subsystem.
///
/// `mapping` is the CPU-visible view of the buffer. The physical address is
/// what inference engines consume directly.
pub struct HwBuffer {
    handle: u64,
    phys_addr: u64,
    mapping: Box<[u8]>,
    pool: Arc<dyn BufferPool>,
}

impl HwBuffer {
    pub fn new(
        handle: u64,
        phys_addr: u64,
        mapping: impl Into<Box<[u8]>>,
        pool: Arc<dyn BufferPool>,
    ) -> Self {
        Self {
            handle,
            phys_addr,
            mapping: mapping.into(),
            pool,
        }
    }

    #[inline]
    pub fn handle(&self) -> u64 {
        self.handle
    }

    #[inline]
    pub fn phys_addr(&self) -> u64 {
        self.phys_addr
    }

    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.mapping
    }
}

impl Drop for HwBuffer {
    fn drop(&mut self) {
        self.pool.recycle(self.handle);
    }
}

impl fmt::Debug for HwBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HwBuffer")
            .field("handle", &self.handle)
            .field("phys_addr", &format_args!("0x{:08X}", self.phys_addr))
            .field("len", &self.mapping.len())
            .finish()
    }
}

/// Frame payload storage.
#[derive(Debug)]
pub enum FrameBuffer {
    Heap(Box<[u8]>),
    Hardware(HwBuffer),
}

impl FrameBuffer {
    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        match self {
            FrameBuffer::Heap(data) => data,
            FrameBuffer::Hardware(buf) => buf.as_slice(),
        }
    }

    #[inline]
    pub fn is_physical(&self) -> bool {
        matches!(self, FrameBuffer::Hardware(_))
    }
}

/// Frame metadata that travels alongside the payload.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameInfo {
    pub channel: Channel,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub fps: u32,
    pub key: bool,
    /// Sample count for audio frames, zero otherwise.
    pub samples: u32,
    /// Per-channel publication sequence number.
    pub seq: u64,
}

impl FrameInfo {
    pub fn new(channel: Channel, width: u32, height: u32, format: PixelFormat) -> Self {
        Self {
            channel,
            width,
            height,
            format,
            fps: 0,
            key: false,
            samples: 0,
            seq: 0,
        }
    }

    pub fn with_fps(mut self, fps: u32) -> Self {
        self.fps = fps;
        self
    }

    pub fn with_key(mut self, key: bool) -> Self {
        self.key = key;
        self
    }

    pub fn with_seq(mut self, seq: u64) -> Self {
        self.seq = seq;
        self
    }
}

/// One published unit of media.
#[derive(Debug)]
pub struct Frame {
    info: FrameInfo,
    timestamp: Instant,
    blocks: Vec<Range<usize>>,
    buffer: FrameBuffer,
}

impl Frame {
    /// Frame over a heap copy. The whole payload is a single block.
    pub fn heap(info: FrameInfo, data: impl Into<Box<[u8]>>) -> Self {
        let data = data.into();
        let blocks = vec![0..data.len()];
        Self {
            info,
            timestamp: Instant::now(),
            blocks,
            buffer: FrameBuffer::Heap(data),
        }
    }

    /// Frame over a heap copy made of several concatenated units.
    pub fn with_blocks(info: FrameInfo, data: Vec<u8>, blocks: Vec<Range<usize>>) -> Self {
        debug_assert!(blocks.iter().all(|b| b.end <= data.len()));
        Self {
            info,
            timestamp: Instant::now(),
            blocks,
            buffer: FrameBuffer::Heap(data.into_boxed_slice()),
        }
    }

    /// Frame over a hardware buffer.
    pub fn hardware(info: FrameInfo, buffer: HwBuffer) -> Self {
        let len = buffer.as_slice().len();
        Self {
            info,
            timestamp: Instant::now(),
            blocks: vec![0..len],
            buffer: FrameBuffer::Hardware(buffer),
        }
    }

    pub fn with_timestamp(mut self, timestamp: Instant) -> Self {
        self.timestamp = timestamp;
        self
    }

    #[inline]
    pub fn info(&self) -> &FrameInfo {
        &self.info
    }

    #[inline]
    pub fn channel(&self) -> Channel {
        self.info.channel
    }

    #[inline]
    pub fn width(&self) -> u32 {
        self.info.width
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.info.height
    }

    #[inline]
    pub fn format(&self) -> PixelFormat {
        self.info.format
    }

    #[inline]
    pub fn is_key(&self) -> bool {
        self.info.key
    }

    #[inline]
    pub fn seq(&self) -> u64 {
        self.info.seq
    }

    #[inline]
    pub fn timestamp(&self) -> Instant {
        self.timestamp
    }

    #[inline]
    pub fn data(&self) -> &[u8] {
        self.buffer.as_slice()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.data().len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data().is_empty()
    }

    #[inline]
    pub fn is_physical(&self) -> bool {
        self.buffer.is_physical()
    }

    pub fn phys_addr(&self) -> Option<u64> {
        match &self.buffer {
            FrameBuffer::Hardware(buf) => Some(buf.phys_addr()),
            FrameBuffer::Heap(_) => None,
        }
    }

    /// Iterate over the NAL units (or the single payload) in order.
    pub fn blocks(&self) -> impl Iterator<Item = &[u8]> + '_ {
        let data = self.data();
        self.blocks.iter().map(move |range| &data[range.clone()])
    }
}

/// Share one frame between `consumers` holders.
///
/// Returns exactly `consumers` handles. With zero consumers the frame is
/// released immediately.
pub fn fan_out(frame: Frame, consumers: usize) -> Vec<FrameRef> {
    let mut handles = Vec::with_capacity(consumers);
    if consumers == 0 {
        return handles;
    }
    let shared = Arc::new(frame);
    for _ in 1..consumers {
        handles.push(Arc::clone(&shared));
    }
    handles.push(shared);
    handles
}
