//! Local event tracking
//!
//! Scans a threshold map region by region. Every on-pixel grows a square ROI;
//! ROIs that overlap the painted area of existing events join them (merging
//! events when they bridge several), otherwise they seed a new event.

use crate::geometry::{Roi, Scale};
use crate::local_event::LocalEvent;
use crate::palette::{ColorPool, ColorTag};
use crate::threshold::ThresholdMap;
use camera_capture::Frame;
use ndarray::Array2;
use tracing::debug;

/// Groups the changed pixels of one cycle into local events
#[derive(Debug, Clone)]
pub struct LocalEventTracker {
    grid_rows: usize,
    grid_cols: usize,
    roi_size: usize,
    max_local_events: usize,
}

impl LocalEventTracker {
    /// `roi_size` is in processing-scale pixels
    pub fn new(grid_rows: usize, grid_cols: usize, roi_size: usize, max_local_events: usize) -> Self {
        Self {
            grid_rows: grid_rows.max(1),
            grid_cols: grid_cols.max(1),
            roi_size: roi_size.max(1),
            max_local_events,
        }
    }

    /// Tracker for a full-resolution ROI size at the given processing scale
    pub fn for_scale(
        grid_rows: usize,
        grid_cols: usize,
        roi_size_full: usize,
        max_local_events: usize,
        scale: Scale,
    ) -> Self {
        Self::new(grid_rows, grid_cols, scale.reduce_len(roi_size_full), max_local_events)
    }

    pub fn roi_size(&self) -> usize {
        self.roi_size
    }

    /// Half-open `(rows, cols)` bounds of each grid region, row-major
    pub fn regions(&self, (rows, cols): (usize, usize)) -> Vec<(std::ops::Range<usize>, std::ops::Range<usize>)> {
        let mut regions = Vec::with_capacity(self.grid_rows * self.grid_cols);
        for r in 0..self.grid_rows {
            let y = (r * rows / self.grid_rows)..((r + 1) * rows / self.grid_rows);
            for c in 0..self.grid_cols {
                let x = (c * cols / self.grid_cols)..((c + 1) * cols / self.grid_cols);
                regions.push((y.clone(), x));
            }
        }
        regions
    }

    /// Local events of `map`, stamped with `frame`'s number
    pub fn track(&self, map: &ThresholdMap, frame: &Frame) -> Vec<LocalEvent> {
        let dim = map.dim();
        let mut working = map.pixels.clone();
        let mut tags: Array2<Option<ColorTag>> = Array2::from_elem(dim, None);
        let mut pool = ColorPool::new(self.max_local_events);
        let mut events: Vec<LocalEvent> = Vec::new();
        let mut budget_hit = false;

        for (rows, cols) in self.regions(dim) {
            for y in rows.clone() {
                for x in cols.clone() {
                    if !working[(y, x)] {
                        continue;
                    }
                    let Some(roi) = Roi::centered(x, y, self.roi_size, dim) else {
                        continue;
                    };

                    let mut present: Vec<ColorTag> = Vec::new();
                    for tag in tags.slice(roi.slice()).iter().flatten() {
                        if !present.contains(tag) {
                            present.push(*tag);
                        }
                    }
                    let mut matched: Vec<usize> = events
                        .iter()
                        .enumerate()
                        .filter(|(_, le)| present.contains(&le.color))
                        .map(|(i, _)| i)
                        .collect();

                    let target = match matched.first().copied() {
                        None => match pool.acquire() {
                            Some(color) => {
                                events.push(LocalEvent::new(color, frame.number, dim, map.scale));
                                events.len() - 1
                            }
                            None => {
                                budget_hit = true;
                                continue;
                            }
                        },
                        Some(first) => {
                            // Merge every other matching event into the first one
                            matched.remove(0);
                            for &index in matched.iter().rev() {
                                let other = events.remove(index);
                                pool.release(other.color);
                                events[first].absorb(other);
                            }
                            first
                        }
                    };

                    let event = &mut events[target];
                    event.add_roi(roi, &working, frame);
                    working.slice_mut(roi.slice()).fill(false);
                    let color = event.color;
                    for painted in event.rois() {
                        tags.slice_mut(painted.slice()).fill(Some(color));
                    }
                }
            }
        }

        if budget_hit {
            debug!(
                "Frame {}: local event budget of {} exhausted",
                frame.number, self.max_local_events
            );
            metrics::counter!("detection_local_budget_exhausted_total").increment(1);
        }
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use camera_capture::BitDepth;
    use std::collections::HashSet;

    fn map_with(points: &[(usize, usize)], dim: (usize, usize)) -> ThresholdMap {
        let mut map = ThresholdMap::empty(dim, Scale::Full);
        for &(x, y) in points {
            map.pixels[(y, x)] = true;
        }
        map
    }

    fn frame(dim: (usize, usize)) -> Frame {
        let mut f = Frame::new(Array2::zeros(dim), BitDepth::Mono8);
        f.number = 7;
        f
    }

    #[test]
    fn test_empty_map_gives_no_events() {
        let tracker = LocalEventTracker::new(8, 8, 10, 20);
        let map = ThresholdMap::empty((100, 100), Scale::Full);
        assert!(tracker.track(&map, &frame((100, 100))).is_empty());
    }

    #[test]
    fn test_close_pixels_share_one_event() {
        let tracker = LocalEventTracker::new(8, 8, 10, 20);
        let map = map_with(&[(30, 30), (31, 30), (32, 31), (36, 33)], (100, 100));
        let events = tracker.track(&map, &frame((100, 100)));
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].pixels().len(), 4);
        assert_eq!(events[0].frame_number, 7);
    }

    #[test]
    fn test_distant_pixels_split() {
        let tracker = LocalEventTracker::new(8, 8, 10, 20);
        let map = map_with(&[(20, 20), (70, 70)], (100, 100));
        let events = tracker.track(&map, &frame((100, 100)));
        assert_eq!(events.len(), 2);
        assert_ne!(events[0].color, events[1].color);
    }

    #[test]
    fn test_bridging_roi_merges_events() {
        let tracker = LocalEventTracker::new(1, 1, 10, 20);
        // Row-major scan: (20,20) and (32,20) seed two events, then (26,25)
        // overlaps both painted areas.
        let map = map_with(&[(20, 20), (32, 20), (26, 25)], (100, 100));
        let events = tracker.track(&map, &frame((100, 100)));
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].pixels().len(), 3);
        assert_eq!(events[0].rois().len(), 3);
    }

    #[test]
    fn test_border_pixels_skipped() {
        let tracker = LocalEventTracker::new(8, 8, 10, 20);
        let map = map_with(&[(1, 1), (98, 50)], (100, 100));
        assert!(tracker.track(&map, &frame((100, 100))).is_empty());
    }

    #[test]
    fn test_budget_caps_events() {
        let tracker = LocalEventTracker::new(4, 4, 4, 3);
        let points: Vec<(usize, usize)> = (0..6).map(|i| (10 + i * 15, 50)).collect();
        let map = map_with(&points, (100, 100));
        let events = tracker.track(&map, &frame((100, 100)));
        assert_eq!(events.len(), 3);
        let colors: HashSet<_> = events.iter().map(|e| e.color).collect();
        assert_eq!(colors.len(), 3);
    }

    #[test]
    fn test_regions_cover_frame() {
        let tracker = LocalEventTracker::new(8, 8, 10, 20);
        let regions = tracker.regions((101, 67));
        assert_eq!(regions.len(), 64);
        let covered: usize = regions.iter().map(|(r, c)| r.len() * c.len()).sum();
        assert_eq!(covered, 101 * 67);
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn event_colors_unique_within_budget(
                points in prop::collection::vec((0usize..100, 0usize..100), 0..80),
                budget in 1usize..8,
            ) {
                let tracker = LocalEventTracker::new(8, 8, 10, budget);
                let map = map_with(&points, (100, 100));
                let events = tracker.track(&map, &frame((100, 100)));

                prop_assert!(events.len() <= budget);
                let colors: HashSet<_> = events.iter().map(|e| e.color).collect();
                prop_assert_eq!(colors.len(), events.len());
            }
        }
    }
}
