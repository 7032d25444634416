//! Greedy IoU multi-object tracker.
//!
//! Each update matches new detections to live tracks by descending IoU.
//! Unmatched detections open new tracks; tracks unmatched for more than
//! `max_lost` updates are dropped.

use super::PixelBox;

#[derive(Debug, Clone)]
struct Track {
    id: u32,
    bbox: PixelBox,
    frames_lost: u32,
}

#[derive(Debug, Clone)]
pub struct Tracker {
    tracks: Vec<Track>,
    next_id: u32,
    iou_threshold: f32,
    max_lost: u32,
}

impl Default for Tracker {
    fn default() -> Self {
        Self::new(0.3, 30)
    }
}

impl Tracker {
    pub fn new(iou_threshold: f32, max_lost: u32) -> Self {
        Self {
            tracks: Vec::new(),
            next_id: 1,
            iou_threshold,
            max_lost,
        }
    }

    /// Assign a track id to every detection, in input order.
    pub fn update(&mut self, detections: &[PixelBox]) -> Vec<u32> {
        let mut pairs: Vec<(f32, usize, usize)> = Vec::new();
        for (di, det) in detections.iter().enumerate() {
            for (ti, track) in self.tracks.iter().enumerate() {
                if track.bbox.target != det.target {
                    continue;
                }
                let iou = track.bbox.iou(det);
                if iou >= self.iou_threshold {
                    pairs.push((iou, di, ti));
                }
            }
        }
        pairs.sort_by(|a, b| b.0.total_cmp(&a.0));

        let mut ids = vec![0u32; detections.len()];
        let mut det_used = vec![false; detections.len()];
        let mut track_used = vec![false; self.tracks.len()];
        for (_, di, ti) in pairs {
            if det_used[di] || track_used[ti] {
                continue;
            }
            det_used[di] = true;
            track_used[ti] = true;
            let track = &mut self.tracks[ti];
            track.bbox = detections[di];
            track.frames_lost = 0;
            ids[di] = track.id;
        }

        for (ti, track) in self.tracks.iter_mut().enumerate() {
            if !track_used[ti] {
                track.frames_lost += 1;
            }
        }
        let max_lost = self.max_lost;
        self.tracks.retain(|t| t.frames_lost <= max_lost);

        for (di, det) in detections.iter().enumerate() {
            if det_used[di] {
                continue;
            }
            let id = self.next_id;
            self.next_id = self.next_id.wrapping_add(1).max(1);
            self.tracks.push(Track {
                id,
                bbox: *det,
                frames_lost: 0,
            });
            ids[di] = id;
        }
        ids
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn clear(&mut self) {
        self.tracks.clear();
    }
}
