//! Global events: tracks of local events across cycles

use crate::geometry::Position;
use crate::image_ops;
use crate::local_event::LocalEvent;
use crate::palette::ColorTag;
use camera_capture::Frame;
use chrono::{DateTime, Utc};
use image::{Rgb, RgbImage};
use ndarray::Array2;
use std::collections::VecDeque;

/// Trajectory tolerances applied as local events are attached
#[derive(Debug, Clone, Copy)]
pub struct TrackHeuristics {
    pub static_tolerance_px: f64,
    pub linear_tolerance_px: f64,
    pub min_step_px: f64,
    pub max_angle_deg: f64,
}

impl Default for TrackHeuristics {
    fn default() -> Self {
        Self {
            static_tolerance_px: 3.0,
            linear_tolerance_px: 3.0,
            min_step_px: 0.5,
            max_angle_deg: 60.0,
        }
    }
}

/// A candidate meteor built from local events across cycles
#[derive(Debug, Clone)]
pub struct GlobalEvent {
    pub id: u64,
    pub color: ColorTag,
    /// Date of the frame that spawned the track
    pub created: DateTime<Utc>,
    le_list: Vec<LocalEvent>,
    mask: Array2<bool>,
    first_frame: u64,
    last_frame: u64,
    age: u32,
    age_last_elem: u32,
    new_le_status: bool,
    is_static: bool,
    is_linear: bool,
    positions: Vec<Position>,
    validity: Vec<bool>,
    previews: VecDeque<RgbImage>,
    preview_capacity: usize,
    heuristics: TrackHeuristics,
}

impl GlobalEvent {
    /// Spawn a track from its first local event
    pub fn new(
        id: u64,
        color: ColorTag,
        first: LocalEvent,
        frame: &Frame,
        heuristics: TrackHeuristics,
        preview_capacity: usize,
    ) -> Self {
        let mut event = Self {
            id,
            color,
            created: frame.timestamp,
            le_list: Vec::new(),
            mask: Array2::from_elem(first.dim(), false),
            first_frame: first.frame_number,
            last_frame: first.frame_number,
            age: 0,
            age_last_elem: 0,
            new_le_status: true,
            is_static: false,
            is_linear: true,
            positions: Vec::new(),
            validity: Vec::new(),
            previews: VecDeque::with_capacity(preview_capacity),
            preview_capacity,
            heuristics,
        };
        event.attach(first);
        event
    }

    /// Append a local event and update the trajectory flags
    pub fn attach(&mut self, le: LocalEvent) {
        let position = le.position();
        let valid = match self.positions.last() {
            None => true,
            Some(last) => self.is_continuous_step(last, &position),
        };
        self.positions.push(position);
        self.validity.push(valid);

        image_ops::or_assign(&mut self.mask, &le.mask());
        self.first_frame = self.first_frame.min(le.frame_number);
        self.last_frame = self.last_frame.max(le.frame_number);
        self.le_list.push(le);

        self.age_last_elem = 0;
        self.new_le_status = true;
        self.is_static = self.compute_static();
        self.is_linear = self.compute_linear();
    }

    /// A step is continuous when it moves and keeps to the track's heading
    fn is_continuous_step(&self, last: &Position, next: &Position) -> bool {
        let (sx, sy) = next.sub(last);
        let step = (sx * sx + sy * sy).sqrt();
        if step < self.heuristics.min_step_px {
            return false;
        }
        let first = &self.positions[0];
        let (dx, dy) = last.sub(first);
        let heading = (dx * dx + dy * dy).sqrt();
        if heading < f64::EPSILON {
            return true;
        }
        let cos = (sx * dx + sy * dy) / (step * heading);
        cos >= self.heuristics.max_angle_deg.to_radians().cos()
    }

    fn compute_static(&self) -> bool {
        let Some(first) = self.positions.first() else {
            return false;
        };
        self.positions.len() > 1
            && self
                .positions
                .iter()
                .all(|p| p.distance(first) <= self.heuristics.static_tolerance_px)
    }

    /// Orthogonal least-squares line fit over all positions
    fn compute_linear(&self) -> bool {
        let n = self.positions.len();
        if n < 3 {
            return true;
        }
        let nf = n as f64;
        let cx = self.positions.iter().map(|p| p.x).sum::<f64>() / nf;
        let cy = self.positions.iter().map(|p| p.y).sum::<f64>() / nf;
        let (mut sxx, mut syy, mut sxy) = (0.0, 0.0, 0.0);
        for p in &self.positions {
            let (dx, dy) = (p.x - cx, p.y - cy);
            sxx += dx * dx;
            syy += dy * dy;
            sxy += dx * dy;
        }
        let theta = 0.5 * (2.0 * sxy).atan2(sxx - syy);
        let (nx, ny) = (-theta.sin(), theta.cos());
        self.positions
            .iter()
            .map(|p| ((p.x - cx) * nx + (p.y - cy) * ny).abs())
            .fold(0.0, f64::max)
            <= self.heuristics.linear_tolerance_px
    }

    /// Advance one cycle. Renders a preview when a local event arrived since
    /// the last call, otherwise counts one more silent cycle.
    pub fn age_one_cycle(&mut self, frame: &Frame) {
        self.age += 1;
        if self.new_le_status {
            self.new_le_status = false;
            self.render_preview(frame);
        } else {
            self.age_last_elem += 1;
        }
    }

    fn render_preview(&mut self, frame: &Frame) {
        if self.preview_capacity == 0 {
            return;
        }
        let mut preview = image::DynamicImage::ImageLuma8(frame.to_gray8()).to_rgb8();
        if let Some(p) = self.positions.last() {
            imageproc::drawing::draw_hollow_circle_mut(
                &mut preview,
                (p.x.round() as i32, p.y.round() as i32),
                5,
                Rgb(self.color.rgb()),
            );
        }
        if self.previews.len() == self.preview_capacity {
            self.previews.pop_front();
        }
        self.previews.push_back(preview);
    }

    /// Whether the trailing `window` steps were all continuous
    pub fn continuous_good(&self, window: usize) -> bool {
        self.validity.len() >= window && self.validity[self.validity.len() - window..].iter().all(|v| *v)
    }

    /// Confirmation test applied to silent or end-of-stream tracks
    pub fn is_confirmable(&self, min_track_length: usize, continuity_window: usize) -> bool {
        self.le_list.len() >= min_track_length
            && !self.is_static
            && (self.is_linear || self.continuous_good(continuity_window))
    }

    pub fn le_list(&self) -> &[LocalEvent] {
        &self.le_list
    }

    pub fn le_count(&self) -> usize {
        self.le_list.len()
    }

    /// Cumulative mask of all attached local events, processing scale
    pub fn mask(&self) -> &Array2<bool> {
        &self.mask
    }

    pub fn first_frame(&self) -> u64 {
        self.first_frame
    }

    pub fn last_frame(&self) -> u64 {
        self.last_frame
    }

    pub fn age(&self) -> u32 {
        self.age
    }

    pub fn age_last_elem(&self) -> u32 {
        self.age_last_elem
    }

    pub fn new_le_status(&self) -> bool {
        self.new_le_status
    }

    pub fn is_static(&self) -> bool {
        self.is_static
    }

    pub fn is_linear(&self) -> bool {
        self.is_linear
    }

    /// Full-resolution positions, one per attached local event
    pub fn positions(&self) -> &[Position] {
        &self.positions
    }

    pub fn validity(&self) -> &[bool] {
        &self.validity
    }

    pub fn previews(&self) -> impl Iterator<Item = &RgbImage> {
        self.previews.iter()
    }

    pub fn preview_count(&self) -> usize {
        self.previews.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{Roi, Scale};
    use camera_capture::BitDepth;

    const DIM: (usize, usize) = (100, 100);

    fn le_at(x: usize, y: usize, frame_number: u64) -> LocalEvent {
        let mut map = Array2::from_elem(DIM, false);
        map[(y, x)] = true;
        let frame = Frame::new(Array2::zeros(DIM), BitDepth::Mono8);
        let mut le = LocalEvent::new(ColorTag(0), frame_number, DIM, Scale::Full);
        le.add_roi(Roi::centered(x, y, 6, DIM).unwrap(), &map, &frame);
        le
    }

    fn frame() -> Frame {
        Frame::new(Array2::zeros(DIM), BitDepth::Mono8)
    }

    fn track(points: &[(usize, usize)]) -> GlobalEvent {
        let mut ge = GlobalEvent::new(
            0,
            ColorTag(0),
            le_at(points[0].0, points[0].1, 0),
            &frame(),
            TrackHeuristics::default(),
            3,
        );
        for (i, &(x, y)) in points.iter().enumerate().skip(1) {
            ge.attach(le_at(x, y, i as u64));
        }
        ge
    }

    #[test]
    fn test_straight_track_is_linear_and_moving() {
        let points: Vec<_> = (0..10).map(|i| (10 + 5 * i, 10 + 5 * i)).collect();
        let ge = track(&points);
        assert_eq!(ge.le_count(), 10);
        assert!(ge.is_linear());
        assert!(!ge.is_static());
        assert!(ge.continuous_good(9));
        assert!(ge.is_confirmable(10, 10));
        assert_eq!((ge.first_frame(), ge.last_frame()), (0, 9));
    }

    #[test]
    fn test_nine_elements_not_confirmable() {
        let points: Vec<_> = (0..9).map(|i| (10 + 5 * i, 10 + 5 * i)).collect();
        assert!(!track(&points).is_confirmable(10, 10));
    }

    #[test]
    fn test_static_track() {
        let points = vec![(50, 50), (51, 50), (50, 51), (51, 51)];
        let ge = track(&points);
        assert!(ge.is_static());
        assert!(!ge.is_confirmable(1, 1));
    }

    #[test]
    fn test_static_needs_two_positions() {
        assert!(!track(&[(50, 50)]).is_static());
        assert!(track(&[(50, 50), (50, 50)]).is_static());
    }

    #[test]
    fn test_zigzag_is_not_linear() {
        let points = vec![(10, 10), (20, 40), (30, 10), (40, 40), (50, 10)];
        let ge = track(&points);
        assert!(!ge.is_linear());
        assert!(!ge.continuous_good(3));
    }

    #[test]
    fn test_mask_is_union_of_local_masks() {
        let a = le_at(20, 20, 0);
        let b = le_at(60, 60, 1);
        let mut expected = a.mask();
        image_ops::or_assign(&mut expected, &b.mask());

        let mut ge = GlobalEvent::new(0, ColorTag(2), a, &frame(), TrackHeuristics::default(), 3);
        ge.attach(b);
        assert_eq!(ge.mask(), &expected);
    }

    #[test]
    fn test_aging_and_previews() {
        let mut ge = track(&[(20, 20)]);
        assert!(ge.new_le_status());

        ge.age_one_cycle(&frame());
        assert_eq!((ge.age(), ge.age_last_elem()), (1, 0));
        assert_eq!(ge.preview_count(), 1);

        ge.age_one_cycle(&frame());
        assert_eq!((ge.age(), ge.age_last_elem()), (2, 1));
        assert_eq!(ge.preview_count(), 1);

        for i in 0..5 {
            ge.attach(le_at(25 + i, 25 + i, 2 + i as u64));
            ge.age_one_cycle(&frame());
            assert_eq!(ge.age_last_elem(), 0);
        }
        // Rolling window of three
        assert_eq!(ge.preview_count(), 3);
        assert!(ge.age() >= ge.age_last_elem());
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn mask_equals_or_of_attached(points in prop::collection::vec((5usize..95, 5usize..95), 1..15)) {
                let les: Vec<_> = points
                    .iter()
                    .enumerate()
                    .map(|(i, &(x, y))| le_at(x, y, i as u64))
                    .collect();
                let mut expected = Array2::from_elem(DIM, false);
                for le in &les {
                    image_ops::or_assign(&mut expected, &le.mask());
                }

                let mut iter = les.into_iter();
                let mut ge = GlobalEvent::new(0, ColorTag(0), iter.next().unwrap(), &frame(), TrackHeuristics::default(), 0);
                for le in iter {
                    ge.attach(le);
                }
                prop_assert_eq!(ge.mask(), &expected);
                prop_assert_eq!(ge.le_count(), points.len());
                prop_assert!(ge.first_frame() <= ge.last_frame());
            }
        }
    }
}
