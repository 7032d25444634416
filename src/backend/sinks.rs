//! Downstream collaborators for the stream and QR code nodes.
//!
//! The streaming transport lives outside this crate; [`CountingStreamSink`]
//! stands in when nothing else is plugged in. QR codes are decoded with
//! `rqrr` unless another [`QrDecoder`] is supplied.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::pipeline::error::NodeResult;

/// Receives H.264 NAL units for one streaming session.
pub trait StreamSink: Send + Sync {
    /// Announce a session before the first unit is sent.
    fn open(&self, session: &str) -> NodeResult<()>;

    fn send(&self, session: &str, unit: &[u8], key: bool) -> NodeResult<()>;

    fn close(&self, session: &str);
}

/// Stream sink that only counts what it is given.
#[derive(Debug, Default)]
pub struct CountingStreamSink {
    units: AtomicU64,
    bytes: AtomicU64,
}

impl CountingStreamSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn units(&self) -> u64 {
        self.units.load(Ordering::Relaxed)
    }

    pub fn bytes(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }
}

impl StreamSink for CountingStreamSink {
    fn open(&self, session: &str) -> NodeResult<()> {
        tracing::debug!("stream session {} opened", session);
        Ok(())
    }

    fn send(&self, _session: &str, unit: &[u8], _key: bool) -> NodeResult<()> {
        self.units.fetch_add(1, Ordering::Relaxed);
        self.bytes.fetch_add(unit.len() as u64, Ordering::Relaxed);
        Ok(())
    }

    fn close(&self, session: &str) {
        tracing::debug!(
            "stream session {} closed after {} units",
            session,
            self.units()
        );
    }
}

/// A decoded QR code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QrCode {
    pub payload: String,
    pub version: u8,
    pub ecc_level: u8,
    pub mask: u8,
    /// Corner points in source pixels, clockwise from top-left.
    pub corners: [[i32; 2]; 4],
}

/// Finds QR codes in an 8-bit grayscale image.
pub trait QrDecoder: Send + Sync {
    fn decode(&self, gray: &[u8], width: u32, height: u32) -> Vec<QrCode>;
}

/// QR decoder backed by `rqrr`.
#[derive(Debug, Default, Clone, Copy)]
pub struct RqrrDecoder;

impl QrDecoder for RqrrDecoder {
    fn decode(&self, gray: &[u8], width: u32, height: u32) -> Vec<QrCode> {
        let (w, h) = (width as usize, height as usize);
        if w == 0 || h == 0 || gray.len() < w * h {
            return Vec::new();
        }
        let mut image = rqrr::PreparedImage::prepare_from_greyscale(w, h, |x, y| gray[y * w + x]);
        let grids = image.detect_grids();
        let mut codes = Vec::with_capacity(grids.len());
        for grid in grids {
            let b = &grid.bounds;
            let corners = [[b[0].x, b[0].y], [b[1].x, b[1].y], [b[2].x, b[2].y], [b[3].x, b[3].y]];
            match grid.decode() {
                Ok((meta, payload)) => codes.push(QrCode {
                    payload,
                    version: meta.version.0 as u8,
                    ecc_level: meta.ecc_level as u8,
                    mask: meta.mask as u8,
                    corners,
                }),
                Err(e) => tracing::debug!("qr grid at {:?} not decoded: {:?}", corners[0], e),
            }
        }
        codes
    }
}
