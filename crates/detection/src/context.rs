//! Detection context and the per-cycle entry point

use crate::config::DetectionConfig;
use crate::global_event::GlobalEvent;
use crate::lifecycle::GlobalEventLifecycleManager;
use crate::threshold::RegionThresholder;
use crate::tracker::LocalEventTracker;
use crate::DetectionError;
use camera_capture::Frame;
use ndarray::Array2;
use std::path::Path;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Frame range to record around a confirmed event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameWindow {
    pub first: u64,
    pub last: u64,
}

impl FrameWindow {
    pub fn len(&self) -> u64 {
        self.last.saturating_sub(self.first) + 1
    }

    pub fn is_empty(&self) -> bool {
        self.last < self.first
    }

    pub fn contains(&self, number: u64) -> bool {
        (self.first..=self.last).contains(&number)
    }
}

/// A track that passed confirmation, with the frames to record
#[derive(Debug, Clone)]
pub struct ConfirmedEvent {
    pub event: GlobalEvent,
    pub window: FrameWindow,
}

/// Per-cycle counters of the last run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleStats {
    pub cycles: u64,
    pub gaps: u64,
    pub changed_pixels: usize,
    pub local_events: usize,
    pub live_tracks: usize,
}

/// State carried by the detection thread across cycles
pub struct DetectionContext {
    config: DetectionConfig,
    thresholder: RegionThresholder,
    tracker: LocalEventTracker,
    lifecycle: GlobalEventLifecycleManager,
    last_current: Option<u64>,
    stats: CycleStats,
}

impl DetectionContext {
    /// Build a context for frames of `frame_dim` (rows, cols).
    ///
    /// Loads the static mask from `config.mask_path` when set; otherwise
    /// every pixel is processed.
    pub fn new(config: DetectionConfig, frame_dim: (usize, usize)) -> Result<Self, DetectionError> {
        let mask = match &config.mask_path {
            Some(path) => {
                let mask = load_mask(path)?;
                if mask.dim() != frame_dim {
                    return Err(DetectionError::MaskSizeMismatch {
                        mask: mask.dim(),
                        frame: frame_dim,
                    });
                }
                mask
            }
            None => Array2::from_elem(frame_dim, true),
        };
        Self::with_mask(config, mask)
    }

    /// Build a context around an explicit full-resolution mask
    pub fn with_mask(config: DetectionConfig, mask: Array2<bool>) -> Result<Self, DetectionError> {
        config.validate()?;
        let thresholder = RegionThresholder::new(mask, config.downsample);
        let tracker = LocalEventTracker::for_scale(
            config.grid_rows,
            config.grid_cols,
            config.roi_size,
            config.max_local_events,
            thresholder.scale(),
        );
        let lifecycle = GlobalEventLifecycleManager::new(config.clone());
        info!(
            "Detection ready: mask {:?}, scale {:?}, roi {} px",
            thresholder.mask().dim(),
            thresholder.scale(),
            tracker.roi_size()
        );
        Ok(Self {
            config,
            thresholder,
            tracker,
            lifecycle,
            last_current: None,
            stats: CycleStats::default(),
        })
    }

    pub fn config(&self) -> &DetectionConfig {
        &self.config
    }

    pub fn stats(&self) -> CycleStats {
        self.stats
    }

    pub fn lifecycle(&self) -> &GlobalEventLifecycleManager {
        &self.lifecycle
    }

    /// Forget thresholding history and every live track
    pub fn reset(&mut self) {
        self.thresholder.reset();
        self.lifecycle.clear();
        self.last_current = None;
    }

    fn window_for(&self, event: &GlobalEvent) -> FrameWindow {
        FrameWindow {
            first: event.first_frame().saturating_sub(self.config.time_before_frames),
            last: event.last_frame() + self.config.time_after_frames,
        }
    }
}

/// Load a static mask image; non-zero pixels are processed
pub fn load_mask(path: &Path) -> Result<Array2<bool>, DetectionError> {
    let img = image::open(path)
        .map_err(|e| DetectionError::MaskLoad(format!("{}: {}", path.display(), e)))?
        .to_luma8();
    let (width, height) = img.dimensions();
    Ok(Array2::from_shape_fn((height as usize, width as usize), |(y, x)| {
        img.get_pixel(x as u32, y as u32).0[0] > 0
    }))
}

/// Run one detection cycle on `current` against `previous`.
///
/// Returns at most one confirmed event. A frame-number gap, either between
/// the two frames or since the last cycle, restarts thresholding so that
/// change confirmation never spans missing frames.
pub fn run_detection_cycle(
    ctx: &mut DetectionContext,
    current: &Frame,
    previous: &Frame,
) -> Result<Option<ConfirmedEvent>, DetectionError> {
    if current.dim() != previous.dim() {
        return Err(DetectionError::FrameSizeMismatch {
            current: current.dim(),
            previous: previous.dim(),
        });
    }

    let contiguous = previous.number + 1 == current.number;
    let continues = ctx.last_current.map_or(true, |last| last == previous.number);
    if !contiguous || !continues {
        warn!(
            "Frame gap before {} (previous {}, last processed {:?}), restarting thresholding",
            current.number, previous.number, ctx.last_current
        );
        ctx.thresholder.reset();
        ctx.stats.gaps += 1;
        metrics::counter!("detection_frame_gaps_total").increment(1);
    }

    let started = Instant::now();
    let map = ctx.thresholder.apply(current, previous)?;
    let local_events = ctx.tracker.track(&map, current);

    ctx.stats.cycles += 1;
    ctx.stats.changed_pixels = map.count_on();
    ctx.stats.local_events = local_events.len();
    ctx.last_current = Some(current.number);

    if !local_events.is_empty() {
        debug!(
            "Frame {}: {} changed pixels, {} local events",
            current.number,
            ctx.stats.changed_pixels,
            local_events.len()
        );
    }

    let confirmed = ctx.lifecycle.update(local_events, current);
    ctx.stats.live_tracks = ctx.lifecycle.live_count();

    metrics::counter!("detection_cycles_total").increment(1);
    metrics::histogram!("detection_cycle_seconds").record(started.elapsed().as_secs_f64());

    Ok(confirmed.map(|event| {
        let window = ctx.window_for(&event);
        ConfirmedEvent { event, window }
    }))
}
