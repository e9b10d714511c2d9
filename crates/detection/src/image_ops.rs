//! Pixel-level operations on frames, difference images and binary maps

use ndarray::{Array2, Zip};

/// Zero every sample outside `mask`
pub fn apply_mask(pixels: &Array2<u16>, mask: &Array2<bool>) -> Array2<u16> {
    let mut out = pixels.clone();
    Zip::from(&mut out).and(mask).for_each(|px, &keep| {
        if !keep {
            *px = 0;
        }
    });
    out
}

/// Halve both axes by averaging 2x2 blocks; an odd trailing row/column is dropped
pub fn downsample(pixels: &Array2<u16>) -> Array2<u16> {
    let (rows, cols) = pixels.dim();
    Array2::from_shape_fn((rows / 2, cols / 2), |(y, x)| {
        let sum = pixels[(2 * y, 2 * x)] as u32
            + pixels[(2 * y, 2 * x + 1)] as u32
            + pixels[(2 * y + 1, 2 * x)] as u32
            + pixels[(2 * y + 1, 2 * x + 1)] as u32;
        ((sum + 2) / 4) as u16
    })
}

/// Halve a mask; a cell stays active only if its whole 2x2 block is active
pub fn downsample_mask(mask: &Array2<bool>) -> Array2<bool> {
    let (rows, cols) = mask.dim();
    Array2::from_shape_fn((rows / 2, cols / 2), |(y, x)| {
        mask[(2 * y, 2 * x)]
            && mask[(2 * y, 2 * x + 1)]
            && mask[(2 * y + 1, 2 * x)]
            && mask[(2 * y + 1, 2 * x + 1)]
    })
}

/// Absolute difference of two equally sized images
pub fn absdiff(a: &Array2<u16>, b: &Array2<u16>) -> Array2<u16> {
    let mut out = Array2::zeros(a.dim());
    Zip::from(&mut out)
        .and(a)
        .and(b)
        .for_each(|o, &x, &y| *o = x.abs_diff(y));
    out
}

/// Bring a difference image into the 0..=255 range.
///
/// Wide samples are min/max stretched over the whole image; 8-bit samples
/// are taken as is.
pub fn to_u8_range(diff: &Array2<u16>, wide: bool) -> Array2<u8> {
    if !wide {
        return diff.mapv(|v| v.min(u8::MAX as u16) as u8);
    }
    let min = diff.iter().copied().min().unwrap_or(0);
    let max = diff.iter().copied().max().unwrap_or(0);
    if max == min {
        return Array2::zeros(diff.dim());
    }
    let span = (max - min) as f64;
    diff.mapv(|v| (((v - min) as f64 / span) * 255.0).round() as u8)
}

/// Population mean and standard deviation of the samples inside `mask`.
///
/// Returns `(0.0, 0.0)` for an empty mask.
pub fn masked_mean_std(values: &Array2<u8>, mask: &Array2<bool>) -> (f64, f64) {
    let mut count = 0u64;
    let mut sum = 0.0;
    let mut sum_sq = 0.0;
    Zip::from(values).and(mask).for_each(|&v, &keep| {
        if keep {
            let v = v as f64;
            count += 1;
            sum += v;
            sum_sq += v * v;
        }
    });
    if count == 0 {
        return (0.0, 0.0);
    }
    let mean = sum / count as f64;
    let variance = (sum_sq / count as f64 - mean * mean).max(0.0);
    (mean, variance.sqrt())
}

/// Binary map of samples strictly above `threshold`
pub fn threshold(values: &Array2<u8>, threshold: u32) -> Array2<bool> {
    values.mapv(|v| v as u32 > threshold)
}

/// Remove on-pixels without any on-neighbour under `local_mask`.
///
/// `local_mask` is a 3x3 neighbourhood centred on the tested pixel. An
/// isolated pixel has its whole 3x3 block cleared in the output.
pub fn remove_isolated(map: &Array2<bool>, local_mask: &Array2<bool>) -> Array2<bool> {
    let (rows, cols) = map.dim();
    let mut out = map.clone();
    for ((y, x), &on) in map.indexed_iter() {
        if !on {
            continue;
        }
        let mut supported = false;
        'scan: for dy in 0..3usize {
            for dx in 0..3usize {
                if !local_mask[(dy, dx)] {
                    continue;
                }
                let (ny, nx) = (y + dy, x + dx);
                if ny < 1 || nx < 1 || ny > rows || nx > cols {
                    continue;
                }
                if map[(ny - 1, nx - 1)] {
                    supported = true;
                    break 'scan;
                }
            }
        }
        if !supported {
            for ny in y.saturating_sub(1)..(y + 2).min(rows) {
                for nx in x.saturating_sub(1)..(x + 2).min(cols) {
                    out[(ny, nx)] = false;
                }
            }
        }
    }
    out
}

/// Default isolation neighbourhood: the 8-connected ring, centre excluded
pub fn default_local_mask() -> Array2<bool> {
    let mut mask = Array2::from_elem((3, 3), true);
    mask[(1, 1)] = false;
    mask
}

/// Element-wise AND of two binary maps
pub fn and(a: &Array2<bool>, b: &Array2<bool>) -> Array2<bool> {
    let mut out = a.clone();
    Zip::from(&mut out).and(b).for_each(|o, &v| *o = *o && v);
    out
}

/// OR `src` into `dst`
pub fn or_assign(dst: &mut Array2<bool>, src: &Array2<bool>) {
    Zip::from(dst).and(src).for_each(|d, &s| *d = *d || s);
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_downsample_averages_blocks() {
        let px = array![[0u16, 4, 8, 8, 1], [4, 8, 8, 8, 1], [9, 9, 9, 9, 9]];
        let out = downsample(&px);
        assert_eq!(out.dim(), (1, 2));
        assert_eq!(out[(0, 0)], 4);
        assert_eq!(out[(0, 1)], 8);
    }

    #[test]
    fn test_downsample_mask_requires_full_block() {
        let mask = array![[true, true, true, false], [true, true, true, true]];
        let out = downsample_mask(&mask);
        assert_eq!(out, array![[true, false]]);
    }

    #[test]
    fn test_wide_diff_is_stretched() {
        let diff = array![[0u16, 1000], [2000, 4000]];
        let out = to_u8_range(&diff, true);
        assert_eq!(out[(0, 0)], 0);
        assert_eq!(out[(1, 1)], 255);
        assert_eq!(out[(1, 0)], 128);

        let flat = Array2::from_elem((2, 2), 7u16);
        assert!(to_u8_range(&flat, true).iter().all(|&v| v == 0));
    }

    #[test]
    fn test_masked_stats() {
        let values = array![[10u8, 20], [30, 200]];
        let mask = array![[true, true], [true, false]];
        let (mean, std) = masked_mean_std(&values, &mask);
        assert!((mean - 20.0).abs() < 1e-9);
        assert!((std - (200.0f64 / 3.0).sqrt()).abs() < 1e-9);

        let empty = Array2::from_elem((2, 2), false);
        assert_eq!(masked_mean_std(&values, &empty), (0.0, 0.0));
    }

    #[test]
    fn test_isolated_pixel_removed() {
        let mut map = Array2::from_elem((5, 5), false);
        map[(2, 2)] = true;
        let out = remove_isolated(&map, &default_local_mask());
        assert!(out.iter().all(|&v| !v));
    }

    #[test]
    fn test_connected_pixels_survive() {
        let mut map = Array2::from_elem((5, 5), false);
        map[(2, 2)] = true;
        map[(3, 3)] = true;
        let out = remove_isolated(&map, &default_local_mask());
        assert!(out[(2, 2)] && out[(3, 3)]);
    }

    #[test]
    fn test_threshold_is_strict() {
        let values = array![[60u8, 61]];
        assert_eq!(threshold(&values, 60), array![[false, true]]);
    }
}
