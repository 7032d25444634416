//! Crop a detection out of an RGB888 frame for the next model in a chain.

use super::PixelBox;
use crate::pipeline::frame::{Frame, FrameInfo, PixelFormat};

/// Cut `region` out of `frame` and resize it (nearest neighbour) to
/// `out = (w, h)`. Returns `None` for non-RGB888 frames, short payloads
/// or empty regions. The crop keeps the source's channel and sequence.
pub fn crop_resize(frame: &Frame, region: &PixelBox, out: (u32, u32)) -> Option<Frame> {
    if frame.format() != PixelFormat::Rgb888 || out.0 == 0 || out.1 == 0 {
        return None;
    }
    let (fw, fh) = (frame.width() as usize, frame.height() as usize);
    let data = frame.data();
    if fw == 0 || fh == 0 || data.len() < fw * fh * 3 {
        return None;
    }

    let x1 = region.x1().floor().clamp(0.0, fw as f32) as usize;
    let y1 = region.y1().floor().clamp(0.0, fh as f32) as usize;
    let x2 = region.x2().ceil().clamp(0.0, fw as f32) as usize;
    let y2 = region.y2().ceil().clamp(0.0, fh as f32) as usize;
    if x2 <= x1 || y2 <= y1 {
        return None;
    }
    let (cw, ch) = (x2 - x1, y2 - y1);
    let (ow, oh) = (out.0 as usize, out.1 as usize);

    let mut pixels = vec![0u8; ow * oh * 3];
    for oy in 0..oh {
        let sy = y1 + oy * ch / oh;
        let src_row = sy * fw;
        let dst_row = oy * ow;
        for ox in 0..ow {
            let sx = x1 + ox * cw / ow;
            let s = (src_row + sx) * 3;
            let d = (dst_row + ox) * 3;
            pixels[d..d + 3].copy_from_slice(&data[s..s + 3]);
        }
    }

    let info = FrameInfo {
        width: out.0,
        height: out.1,
        format: PixelFormat::Rgb888,
        key: true,
        samples: 0,
        ..*frame.info()
    };
    Some(Frame::heap(info, pixels).with_timestamp(frame.timestamp()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::frame::Channel;

    /// 4x4 frame whose pixel (x, y) is `[x, y, 0]`.
    fn grid() -> Frame {
        let mut data = Vec::new();
        for y in 0..4u8 {
            for x in 0..4u8 {
                data.extend_from_slice(&[x, y, 0]);
            }
        }
        Frame::heap(
            FrameInfo::new(Channel::Raw, 4, 4, PixelFormat::Rgb888).with_seq(5),
            data,
        )
    }

    fn region(cx: f32, cy: f32, w: f32, h: f32) -> PixelBox {
        PixelBox {
            cx,
            cy,
            w,
            h,
            score: 1.0,
            target: 0,
        }
    }

    #[test]
    fn test_crop_bottom_right_quadrant() {
        let crop = crop_resize(&grid(), &region(3.0, 3.0, 2.0, 2.0), (2, 2)).unwrap();
        assert_eq!((crop.width(), crop.height()), (2, 2));
        assert_eq!(crop.seq(), 5);
        assert_eq!(&crop.data()[..3], &[2, 2, 0]);
        assert_eq!(&crop.data()[9..12], &[3, 3, 0]);
    }

    #[test]
    fn test_upscale_repeats_pixels() {
        let crop = crop_resize(&grid(), &region(0.5, 0.5, 1.0, 1.0), (3, 3)).unwrap();
        assert!(crop.data().chunks(3).all(|px| px == [0, 0, 0]));
    }

    #[test]
    fn test_rejects_non_rgb_and_empty_region() {
        let jpeg = Frame::heap(FrameInfo::new(Channel::Jpeg, 4, 4, PixelFormat::Jpeg), vec![0u8; 8]);
        assert!(crop_resize(&jpeg, &region(2.0, 2.0, 2.0, 2.0), (2, 2)).is_none());
        assert!(crop_resize(&grid(), &region(10.0, 10.0, 2.0, 2.0), (2, 2)).is_none());
    }
}
