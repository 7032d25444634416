//! Detection post-processing
//!
//! This module turns model-space results into camera-space results:
//! - Letterbox mapping from model input coordinates to source pixels
//! - Greedy IoU multi-object tracking
//! - Line-crossing counting over tracked centres
//! - Crop + resize of the best detection for chained models

pub mod counter;
pub mod crop;
pub mod letterbox;
pub mod tracker;

pub use counter::LineCounter;
pub use crop::crop_resize;
pub use letterbox::Letterbox;
pub use tracker::Tracker;

/// Axis-aligned box in source pixels, centre + size.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PixelBox {
    pub cx: f32,
    pub cy: f32,
    pub w: f32,
    pub h: f32,
    pub score: f32,
    pub target: u32,
}

impl PixelBox {
    #[inline]
    pub fn x1(&self) -> f32 {
        self.cx - self.w / 2.0
    }

    #[inline]
    pub fn y1(&self) -> f32 {
        self.cy - self.h / 2.0
    }

    #[inline]
    pub fn x2(&self) -> f32 {
        self.cx + self.w / 2.0
    }

    #[inline]
    pub fn y2(&self) -> f32 {
        self.cy + self.h / 2.0
    }

    pub fn area(&self) -> f32 {
        self.w.max(0.0) * self.h.max(0.0)
    }

    pub fn intersection_area(&self, other: &PixelBox) -> f32 {
        let l = self.x1().max(other.x1());
        let r = self.x2().min(other.x2());
        let t = self.y1().max(other.y1());
        let b = self.y2().min(other.y2());
        (r - l).max(0.0) * (b - t).max(0.0)
    }

    pub fn iou(&self, other: &PixelBox) -> f32 {
        let union = self.area() + other.area() - self.intersection_area(other);
        if union <= 0.0 {
            0.0
        } else {
            self.intersection_area(other) / union
        }
    }
}
