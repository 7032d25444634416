//! Line-crossing counter over tracked object centres.
//!
//! The splitter is a segment `[x1, y1, x2, y2]` in percent of the frame.
//! A track counts once each time its centre moves from one side of the
//! segment to the other while within the segment's span.

use std::collections::HashMap;

use crate::pipeline::error::{NodeError, NodeResult};

/// Tracks not seen for this many updates are forgotten.
const STALE_AFTER: u32 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Left,
    Right,
}

#[derive(Debug, Clone)]
struct TrackSide {
    side: Side,
    unseen: u32,
}

#[derive(Debug, Clone)]
pub struct LineCounter {
    splitter: [i16; 4],
    sides: HashMap<u32, TrackSide>,
    /// `[left→right, right→left]`
    counts: [u32; 2],
}

impl Default for LineCounter {
    fn default() -> Self {
        Self {
            splitter: [50, 0, 50, 100],
            sides: HashMap::new(),
            counts: [0; 2],
        }
    }
}

impl LineCounter {
    pub fn new(splitter: [i16; 4]) -> Self {
        Self {
            splitter,
            ..Self::default()
        }
    }

    /// Replace the splitter. Exactly four values in `0..=100` are required.
    pub fn set_splitter(&mut self, values: &[i16]) -> NodeResult<()> {
        let splitter: [i16; 4] = values.try_into().map_err(|_| {
            NodeError::InvalidArgument(format!("splitter needs 4 values, got {}", values.len()))
        })?;
        if splitter.iter().any(|v| !(0..=100).contains(v)) {
            return Err(NodeError::InvalidArgument(format!(
                "splitter out of range: {splitter:?}"
            )));
        }
        if splitter[0] == splitter[2] && splitter[1] == splitter[3] {
            return Err(NodeError::InvalidArgument("splitter is a point".into()));
        }
        self.splitter = splitter;
        self.clear();
        Ok(())
    }

    pub fn splitter(&self) -> [i16; 4] {
        self.splitter
    }

    pub fn counts(&self) -> [u32; 2] {
        self.counts
    }

    pub fn clear(&mut self) {
        self.sides.clear();
        self.counts = [0; 2];
    }

    /// Classify a point, `None` if it lies outside the segment's span.
    fn side_of(&self, x: f32, y: f32) -> Option<Side> {
        let [x1, y1, x2, y2] = self.splitter.map(f32::from);
        let (dx, dy) = (x2 - x1, y2 - y1);
        let len2 = dx * dx + dy * dy;
        let t = ((x - x1) * dx + (y - y1) * dy) / len2;
        if !(0.0..=1.0).contains(&t) {
            return None;
        }
        let cross = dx * (y - y1) - dy * (x - x1);
        if cross > 0.0 {
            Some(Side::Left)
        } else if cross < 0.0 {
            Some(Side::Right)
        } else {
            None
        }
    }

    /// Feed the centres seen this frame, as `(track id, x%, y%)`.
    pub fn update(&mut self, observations: &[(u32, f32, f32)]) {
        for entry in self.sides.values_mut() {
            entry.unseen += 1;
        }
        for &(track, x, y) in observations {
            let Some(side) = self.side_of(x, y) else {
                continue;
            };
            match self.sides.get_mut(&track) {
                Some(prev) => {
                    if prev.side != side {
                        match side {
                            Side::Right => self.counts[0] += 1,
                            Side::Left => self.counts[1] += 1,
                        }
                        prev.side = side;
                    }
                    prev.unseen = 0;
                }
                None => {
                    self.sides.insert(track, TrackSide { side, unseen: 0 });
                }
            }
        }
        self.sides.retain(|_, s| s.unseen <= STALE_AFTER);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crossing_counts_each_direction() {
        let mut counter = LineCounter::default();
        counter.update(&[(1, 30.0, 50.0)]);
        counter.update(&[(1, 70.0, 50.0)]);
        assert_eq!(counter.counts(), [1, 0]);
        counter.update(&[(1, 20.0, 40.0)]);
        assert_eq!(counter.counts(), [1, 1]);
    }

    #[test]
    fn test_same_side_does_not_count() {
        let mut counter = LineCounter::default();
        counter.update(&[(1, 10.0, 50.0), (2, 80.0, 50.0)]);
        counter.update(&[(1, 20.0, 50.0), (2, 90.0, 50.0)]);
        assert_eq!(counter.counts(), [0, 0]);
    }

    #[test]
    fn test_outside_segment_span_is_ignored() {
        let mut counter = LineCounter::new([0, 50, 50, 50]);
        counter.update(&[(1, 80.0, 40.0)]);
        counter.update(&[(1, 80.0, 60.0)]);
        assert_eq!(counter.counts(), [0, 0]);
    }

    #[test]
    fn test_set_splitter_validates() {
        let mut counter = LineCounter::default();
        assert!(counter.set_splitter(&[0, 0, 100]).is_err());
        assert!(counter.set_splitter(&[0, 0, 100, 101]).is_err());
        assert!(counter.set_splitter(&[5, 5, 5, 5]).is_err());
        counter.set_splitter(&[0, 50, 100, 50]).unwrap();
        assert_eq!(counter.splitter(), [0, 50, 100, 50]);
    }
}
