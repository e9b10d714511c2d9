//! Colour tags
//!
//! Local events and tracks are told apart by a colour index. Indices come
//! from a bounded pool, so the pool size is also the per-cycle budget.

use serde::{Deserialize, Serialize};

/// Distinct RGB colours, used for tags and preview overlays
pub const PALETTE: [[u8; 3]; 24] = [
    [255, 0, 0],
    [0, 255, 0],
    [0, 0, 255],
    [255, 255, 0],
    [255, 0, 255],
    [0, 255, 255],
    [255, 128, 0],
    [128, 0, 255],
    [0, 255, 128],
    [255, 0, 128],
    [128, 255, 0],
    [0, 128, 255],
    [192, 64, 64],
    [64, 192, 64],
    [64, 64, 192],
    [192, 192, 64],
    [192, 64, 192],
    [64, 192, 192],
    [255, 192, 128],
    [128, 192, 255],
    [192, 128, 255],
    [255, 255, 255],
    [128, 128, 128],
    [255, 160, 160],
];

/// Index into [`PALETTE`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ColorTag(pub u8);

impl ColorTag {
    pub fn rgb(self) -> [u8; 3] {
        PALETTE[self.0 as usize % PALETTE.len()]
    }
}

/// Bounded pool handing out the lowest free tag
#[derive(Debug, Clone)]
pub struct ColorPool {
    in_use: Vec<bool>,
}

impl ColorPool {
    /// Pool of `capacity` tags, capped at the palette size
    pub fn new(capacity: usize) -> Self {
        Self {
            in_use: vec![false; capacity.min(PALETTE.len())],
        }
    }

    pub fn acquire(&mut self) -> Option<ColorTag> {
        let index = self.in_use.iter().position(|used| !used)?;
        self.in_use[index] = true;
        Some(ColorTag(index as u8))
    }

    pub fn release(&mut self, tag: ColorTag) {
        if let Some(slot) = self.in_use.get_mut(tag.0 as usize) {
            *slot = false;
        }
    }

    pub fn in_use(&self) -> usize {
        self.in_use.iter().filter(|used| **used).count()
    }

    pub fn capacity(&self) -> usize {
        self.in_use.len()
    }

    pub fn is_exhausted(&self) -> bool {
        self.in_use() == self.capacity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_palette_colors_are_distinct() {
        let set: HashSet<_> = PALETTE.iter().collect();
        assert_eq!(set.len(), PALETTE.len());
    }

    #[test]
    fn test_lowest_free_tag_is_reused() {
        let mut pool = ColorPool::new(3);
        let a = pool.acquire().unwrap();
        let b = pool.acquire().unwrap();
        let c = pool.acquire().unwrap();
        assert_eq!((a.0, b.0, c.0), (0, 1, 2));
        assert!(pool.acquire().is_none());
        assert!(pool.is_exhausted());

        pool.release(b);
        assert_eq!(pool.acquire(), Some(ColorTag(1)));
    }

    #[test]
    fn test_capacity_capped_at_palette() {
        let pool = ColorPool::new(1000);
        assert_eq!(pool.capacity(), PALETTE.len());
    }
}
