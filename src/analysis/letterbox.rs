//! Mapping between a model's letterboxed input and the source frame.
//!
//! The source image is scaled by `min(dst_w / src_w, dst_h / src_h)` and
//! centred in the model input; the rest is padding.

use super::PixelBox;
use crate::backend::engine::BBox;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Letterbox {
    pub scale: f32,
    pub pad_x: f32,
    pub pad_y: f32,
    src: (f32, f32),
    dst: (f32, f32),
}

impl Letterbox {
    /// `src` = frame size, `dst` = model input size, both `(w, h)`.
    pub fn new(src: (u32, u32), dst: (u32, u32)) -> Self {
        let (sw, sh) = (src.0.max(1) as f32, src.1.max(1) as f32);
        let (dw, dh) = (dst.0.max(1) as f32, dst.1.max(1) as f32);
        let scale = (dw / sw).min(dh / sh);
        Self {
            scale,
            pad_x: (dw - sw * scale) / 2.0,
            pad_y: (dh - sh * scale) / 2.0,
            src: (sw, sh),
            dst: (dw, dh),
        }
    }

    /// Map a normalised model-space point to clamped source pixels.
    pub fn to_source(&self, x: f32, y: f32) -> (f32, f32) {
        let sx = (x * self.dst.0 - self.pad_x) / self.scale;
        let sy = (y * self.dst.1 - self.pad_y) / self.scale;
        (sx.clamp(0.0, self.src.0), sy.clamp(0.0, self.src.1))
    }

    /// Map a normalised model-space box to source pixels.
    pub fn map_box(&self, b: &BBox) -> PixelBox {
        let (cx, cy) = self.to_source(b.x, b.y);
        PixelBox {
            cx,
            cy,
            w: (b.w * self.dst.0 / self.scale).min(self.src.0),
            h: (b.h * self.dst.1 / self.scale).min(self.src.1),
            score: b.score,
            target: b.target,
        }
    }

    pub fn source_size(&self) -> (f32, f32) {
        self.src
    }
}
