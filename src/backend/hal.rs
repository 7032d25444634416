//! Video hardware abstraction.
//!
//! The camera node drives a [`VideoHal`] and receives captured data through
//! the [`CaptureSink`] it hands over on start. Encoded packets arrive as
//! borrowed slices that are only valid for the duration of the callback;
//! raw frames arrive as owned [`HwBuffer`]s that go back to their pool when
//! dropped.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::pipeline::error::NodeResult;
use crate::pipeline::frame::{Channel, HwBuffer, PixelFormat};

/// Output parameters for one camera channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelParams {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub format: PixelFormat,
}

impl ChannelParams {
    pub const fn new(width: u32, height: u32, fps: u32, format: PixelFormat) -> Self {
        Self {
            width,
            height,
            fps,
            format,
        }
    }
}

/// NAL unit classification reported by the encoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NaluKind {
    Sps,
    Pps,
    Sei,
    Idr,
    ISlice,
    PSlice,
    BSlice,
    /// Anything else (including whole JPEG images).
    Other,
}

impl NaluKind {
    /// Parameter sets and intra slices make up a key unit.
    pub fn is_key(self) -> bool {
        matches!(
            self,
            NaluKind::Sps | NaluKind::Pps | NaluKind::Sei | NaluKind::Idr | NaluKind::ISlice
        )
    }
}

/// One encoder output packet, borrowed from the encoder's buffer.
#[derive(Debug, Clone, Copy)]
pub struct EncodedPacket<'a> {
    pub kind: NaluKind,
    pub data: &'a [u8],
}

impl<'a> EncodedPacket<'a> {
    pub fn new(kind: NaluKind, data: &'a [u8]) -> Self {
        Self { kind, data }
    }
}

/// Receives captured data from the hardware driver threads.
pub trait CaptureSink: Send + Sync {
    /// A batch of encoder packets for `channel`. Slices are only valid
    /// during the call.
    fn on_encoded(&self, channel: Channel, packets: &[EncodedPacket<'_>]);

    /// An uncompressed frame. Dropping the buffer returns it to the driver.
    fn on_raw(&self, channel: Channel, buffer: HwBuffer, params: ChannelParams);

    /// A block of interleaved 16-bit PCM.
    fn on_audio(&self, pcm: &[u8]);
}

/// The video subsystem as seen by the camera node.
pub trait VideoHal: Send + Sync {
    fn init(&self) -> NodeResult<()>;

    fn deinit(&self);

    /// Push channel parameters to the hardware. May be called while
    /// capturing.
    fn configure_channel(&self, channel: Channel, params: &ChannelParams) -> NodeResult<()>;

    fn start(&self, sink: Arc<dyn CaptureSink>) -> NodeResult<()>;

    fn stop(&self) -> NodeResult<()>;

    fn set_mirror(&self, mirror: bool) -> NodeResult<()>;

    fn set_flip(&self, flip: bool) -> NodeResult<()>;

    fn set_light(&self, on: bool) -> NodeResult<()>;

    /// Microphone volume, 0..=100. Zero mutes capture.
    fn set_volume(&self, volume: u8) -> NodeResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_nalu_kinds() {
        let keys: Vec<NaluKind> = [
            NaluKind::Sps,
            NaluKind::Pps,
            NaluKind::Sei,
            NaluKind::Idr,
            NaluKind::ISlice,
            NaluKind::PSlice,
            NaluKind::BSlice,
            NaluKind::Other,
        ]
        .into_iter()
        .filter(|k| k.is_key())
        .collect();
        assert_eq!(keys.len(), 5);
        assert!(!NaluKind::PSlice.is_key());
    }
}
