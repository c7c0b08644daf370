use image::{GrayImage, Luma};
use imageproc::region_labelling::{Connectivity, connected_components};
use tracing::debug;

use crate::{error::Result, traits::MaskRefiner, types::BinaryMask};

/// Hole filling and small-component removal, in that order.
#[derive(Debug, Clone)]
pub struct MorphologicalCleaner {
    /// Foreground components smaller than this are removed.
    pub min_object_area: usize,
    /// Background components smaller than this are filled.
    pub max_hole_area: usize,
    /// Keep only the largest surviving component.
    pub keep_largest: bool,
}

impl Default for MorphologicalCleaner {
    fn default() -> Self {
        Self {
            min_object_area: 200,
            max_hole_area: 250,
            keep_largest: true,
        }
    }
}

impl MaskRefiner for MorphologicalCleaner {
    fn refine(&self, mask: &BinaryMask) -> Result<BinaryMask> {
        let filled = fill_holes(mask);
        let without_specks = remove_small_objects(&filled, self.min_object_area);
        let mut cleaned = remove_small_holes(&without_specks, self.max_hole_area);
        if self.keep_largest {
            cleaned = keep_largest_component(&cleaned);
        }
        debug!(
            before = mask.foreground_count(),
            after = cleaned.foreground_count(),
            "mask cleaned"
        );
        Ok(cleaned)
    }
}

/// Per-label statistics of a labelled image; index 0 is the background label.
struct Components {
    labels: image::ImageBuffer<Luma<u32>, Vec<u32>>,
    areas: Vec<usize>,
    touches_border: Vec<bool>,
}

impl Components {
    /// 4-connected components of the non-zero pixels of `image`.
    fn of(image: &GrayImage) -> Self {
        let labels = connected_components(image, Connectivity::Four, Luma([0u8]));
        let count = labels.pixels().map(|p| p[0] as usize).max().unwrap_or(0);
        let (width, height) = labels.dimensions();

        let mut areas = vec![0usize; count + 1];
        let mut touches_border = vec![false; count + 1];
        for (x, y, label) in labels.enumerate_pixels() {
            let l = label[0] as usize;
            if l == 0 {
                continue;
            }
            areas[l] += 1;
            if x == 0 || y == 0 || x + 1 == width || y + 1 == height {
                touches_border[l] = true;
            }
        }
        Self {
            labels,
            areas,
            touches_border,
        }
    }

    fn count(&self) -> usize {
        self.areas.len() - 1
    }

    /// New mask with every pixel whose label satisfies `select` set to `value`.
    fn paint(&self, base: &BinaryMask, value: bool, select: impl Fn(usize) -> bool) -> BinaryMask {
        let mut out = base.clone();
        for (x, y, label) in self.labels.enumerate_pixels() {
            let l = label[0] as usize;
            if l != 0 && select(l) {
                out.set(x, y, value);
            }
        }
        out
    }
}

fn background_of(mask: &BinaryMask) -> GrayImage {
    let mut inverted = mask.as_image().clone();
    for pixel in inverted.pixels_mut() {
        pixel[0] = if pixel[0] > 0 { 0 } else { 255 };
    }
    inverted
}

/// Fill background regions that cannot reach the image border.
pub fn fill_holes(mask: &BinaryMask) -> BinaryMask {
    let background = Components::of(&background_of(mask));
    background.paint(mask, true, |l| !background.touches_border[l])
}

/// Remove foreground components with fewer than `min_area` pixels.
pub fn remove_small_objects(mask: &BinaryMask, min_area: usize) -> BinaryMask {
    let foreground = Components::of(mask.as_image());
    foreground.paint(mask, false, |l| foreground.areas[l] < min_area)
}

/// Fill background components with fewer than `max_area` pixels.
///
/// A mask without foreground has no holes and is returned unchanged.
pub fn remove_small_holes(mask: &BinaryMask, max_area: usize) -> BinaryMask {
    if mask.is_empty() {
        return mask.clone();
    }
    let background = Components::of(&background_of(mask));
    background.paint(mask, true, |l| background.areas[l] < max_area)
}

/// Keep only the largest foreground component; ties keep the first in scan order.
pub fn keep_largest_component(mask: &BinaryMask) -> BinaryMask {
    let foreground = Components::of(mask.as_image());
    if foreground.count() <= 1 {
        return mask.clone();
    }
    let largest = (1..foreground.areas.len())
        .fold(1, |best, l| if foreground.areas[l] > foreground.areas[best] { l } else { best });
    foreground.paint(mask, false, |l| l != largest)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mask_with(width: u32, height: u32, rects: &[(u32, u32, u32, u32)]) -> BinaryMask {
        let mut mask = BinaryMask::empty(width, height);
        for &(x0, y0, w, h) in rects {
            for y in y0..y0 + h {
                for x in x0..x0 + w {
                    mask.set(x, y, true);
                }
            }
        }
        mask
    }

    #[test]
    fn test_fill_holes_fills_enclosed_background() {
        let mut mask = mask_with(20, 20, &[(2, 2, 10, 10)]);
        for y in 5..8 {
            for x in 5..8 {
                mask.set(x, y, false);
            }
        }
        let filled = fill_holes(&mask);
        assert_eq!(filled.foreground_count(), 100);
    }

    #[test]
    fn test_fill_holes_ignores_border_background() {
        // A U-shape open to the top border is not a hole.
        let mut mask = mask_with(10, 10, &[(0, 0, 10, 10)]);
        for y in 0..6 {
            for x in 3..7 {
                mask.set(x, y, false);
            }
        }
        assert_eq!(fill_holes(&mask), mask);
    }

    #[test]
    fn test_small_objects_are_removed() {
        let mask = mask_with(60, 60, &[(0, 0, 5, 5), (20, 20, 20, 20)]);
        let cleaned = remove_small_objects(&mask, 200);
        assert_eq!(cleaned.foreground_count(), 400);
        assert!(!cleaned.is_foreground(1, 1));
    }

    #[test]
    fn test_small_border_gap_counts_as_hole() {
        let mut mask = mask_with(30, 30, &[(0, 0, 30, 30)]);
        for y in 0..3 {
            for x in 0..3 {
                mask.set(x, y, false);
            }
        }
        assert_eq!(remove_small_holes(&mask, 250).foreground_count(), 900);
    }

    #[test]
    fn test_empty_mask_survives_cleaning() {
        let cleaned = MorphologicalCleaner::default()
            .refine(&BinaryMask::empty(40, 40))
            .unwrap();
        assert!(cleaned.is_empty());
    }

    #[test]
    fn test_cleaner_leaves_single_region() {
        // Two large blobs, one with a hole, plus specks.
        let mut mask = mask_with(100, 100, &[(5, 5, 30, 30), (60, 60, 20, 20), (90, 5, 3, 3)]);
        for y in 15..20 {
            for x in 15..20 {
                mask.set(x, y, false);
            }
        }
        let cleaned = MorphologicalCleaner::default().refine(&mask).unwrap();
        assert_eq!(cleaned.foreground_count(), 900);
        assert!(cleaned.is_foreground(17, 17));
        assert!(!cleaned.is_foreground(70, 70));
        assert!(!cleaned.is_foreground(91, 6));
    }

    #[test]
    fn test_only_specks_give_empty_mask() {
        let mask = mask_with(50, 50, &[(2, 2, 4, 4), (30, 30, 5, 5)]);
        let cleaned = MorphologicalCleaner::default().refine(&mask).unwrap();
        assert!(cleaned.is_empty());
    }
}
