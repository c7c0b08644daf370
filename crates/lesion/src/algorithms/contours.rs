use geo_types::Polygon;
use imageproc::contours::{BorderType, find_contours};
use tracing::debug;

use crate::{
    error::Result,
    traits::ShapeAnalyzer,
    types::{BinaryMask, Contour, ContourAnalysis, ShapeDescriptors, isoperimetric_ratio},
};

/// Blur-and-rethreshold pass that removes single-pixel jaggies from a mask.
#[derive(Debug, Clone)]
pub struct MaskSmoothing {
    pub sigma: f32,
    pub threshold: u8,
}

impl Default for MaskSmoothing {
    fn default() -> Self {
        // sigma of OpenCV's 9x9 Gaussian kernel
        Self {
            sigma: 1.7,
            threshold: 127,
        }
    }
}

impl MaskSmoothing {
    pub fn apply(&self, mask: &BinaryMask) -> BinaryMask {
        let blurred = imageproc::filter::gaussian_blur_f32(mask.as_image(), self.sigma);
        BinaryMask::from_gray(&imageproc::contrast::threshold(&blurred, self.threshold))
    }
}

/// Finds the dominant lesion boundary and derives shape descriptors from it.
#[derive(Debug, Clone)]
pub struct ContourAnalyzer {
    /// Contours enclosing less area than this (px²) are not significant.
    pub min_contour_area: f64,
    pub smoothing: Option<MaskSmoothing>,
    /// Douglas-Peucker tolerance (px) removing the pixel staircase before measuring.
    pub simplify_tolerance: f64,
    /// Chaikin passes applied after simplification.
    pub smoothing_iterations: usize,
}

impl Default for ContourAnalyzer {
    fn default() -> Self {
        Self {
            min_contour_area: 100.0,
            smoothing: Some(MaskSmoothing::default()),
            simplify_tolerance: 1.0,
            smoothing_iterations: 2,
        }
    }
}

impl ShapeAnalyzer for ContourAnalyzer {
    fn analyze(&self, mask: &BinaryMask) -> Result<ContourAnalysis> {
        let smoothed = match &self.smoothing {
            Some(smoothing) => smoothing.apply(mask),
            None => mask.clone(),
        };

        let dominant = external_contours(&smoothed)
            .into_iter()
            .map(|contour| {
                let area = contour.area();
                (contour, area)
            })
            .max_by(|a, b| a.1.total_cmp(&b.1));

        let Some((contour, area)) = dominant.filter(|(_, area)| *area >= self.min_contour_area) else {
            debug!("no significant contour");
            return Ok(ContourAnalysis {
                contour: None,
                descriptors: ShapeDescriptors {
                    area_percentage: mask.area_percentage(),
                    border_complexity: 0.0,
                },
                mask: BinaryMask::empty(mask.width(), mask.height()),
            });
        };

        let refined = self.refine(&contour);
        let border_complexity = isoperimetric_ratio(refined.perimeter(), refined.area());
        debug!(
            raw_points = contour.len(),
            refined_points = refined.len(),
            raw_area = area,
            border_complexity,
            "dominant contour measured"
        );

        Ok(ContourAnalysis {
            contour: Some(refined),
            descriptors: ShapeDescriptors {
                area_percentage: smoothed.area_percentage(),
                border_complexity,
            },
            mask: smoothed,
        })
    }
}

impl ContourAnalyzer {
    /// Simplify then smooth the pixel chain; falls back to the raw chain if
    /// refinement collapses it.
    pub fn refine(&self, contour: &Contour) -> Contour {
        use geo::{Area, ChaikinSmoothing, Simplify};

        let mut polygon = contour.to_geo_polygon();
        if self.simplify_tolerance > 0.0 {
            polygon = polygon.simplify(&self.simplify_tolerance);
        }
        if self.smoothing_iterations > 0 {
            polygon = polygon.chaikin_smoothing(self.smoothing_iterations);
        }

        if polygon.exterior().0.len() < 4 || polygon.unsigned_area() <= 0.0 {
            return contour.clone();
        }
        contour_from_polygon(&polygon)
    }
}

fn contour_from_polygon(polygon: &Polygon<f64>) -> Contour {
    let mut points: Vec<[f32; 2]> = polygon
        .exterior()
        .coords()
        .map(|c| [c.x as f32, c.y as f32])
        .collect();
    if points.len() > 1 && points.first() == points.last() {
        points.pop();
    }
    Contour::new(points)
}

/// Outer borders of the top-level foreground regions.
pub fn external_contours(mask: &BinaryMask) -> Vec<Contour> {
    find_contours::<i32>(mask.as_image())
        .into_iter()
        .filter(|c| c.border_type == BorderType::Outer && c.parent.is_none())
        .map(|c| Contour::new(c.points.iter().map(|p| [p.x as f32, p.y as f32]).collect()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma};
    use imageproc::drawing::draw_filled_circle_mut;

    fn disc_mask(size: u32, radius: i32) -> BinaryMask {
        let mut image = GrayImage::new(size, size);
        let c = (size / 2) as i32;
        draw_filled_circle_mut(&mut image, (c, c), radius, Luma([255u8]));
        BinaryMask::from_gray(&image)
    }

    #[test]
    fn test_disc_complexity_is_close_to_one() {
        let analysis = ContourAnalyzer::default().analyze(&disc_mask(224, 50)).unwrap();
        assert!(analysis.contour.is_some());
        let complexity = analysis.descriptors.border_complexity;
        assert!((complexity - 1.0).abs() < 0.1, "complexity was {complexity}");
    }

    #[test]
    fn test_jagged_shape_is_more_complex_than_disc() {
        let mut star = GrayImage::new(200, 200);
        for y in 0..200u32 {
            for x in 0..200u32 {
                let (dx, dy) = (x as f64 - 100.0, y as f64 - 100.0);
                let r = (dx * dx + dy * dy).sqrt();
                let limit = 50.0 + 25.0 * (8.0 * dy.atan2(dx)).cos();
                if r <= limit {
                    star.put_pixel(x, y, Luma([255]));
                }
            }
        }
        let analyzer = ContourAnalyzer::default();
        let star = analyzer.analyze(&BinaryMask::from_gray(&star)).unwrap();
        let disc = analyzer.analyze(&disc_mask(200, 50)).unwrap();
        assert!(star.descriptors.border_complexity > disc.descriptors.border_complexity + 0.5);
    }

    #[test]
    fn test_area_percentage_grows_with_radius() {
        let analyzer = ContourAnalyzer::default();
        let percentages: Vec<f64> = [15, 25, 35, 45]
            .iter()
            .map(|&r| analyzer.analyze(&disc_mask(128, r)).unwrap().descriptors.area_percentage)
            .collect();
        assert!(percentages.windows(2).all(|w| w[1] > w[0]), "{percentages:?}");
    }

    #[test]
    fn test_tiny_patch_is_not_significant() {
        let mut mask = BinaryMask::empty(50, 50);
        for y in 20..25 {
            for x in 20..25 {
                mask.set(x, y, true);
            }
        }
        let analysis = ContourAnalyzer::default().analyze(&mask).unwrap();
        assert!(analysis.contour.is_none());
        assert_eq!(analysis.descriptors.border_complexity, 0.0);
        assert!((analysis.descriptors.area_percentage - 1.0).abs() < 1e-9);
        assert!(analysis.mask.is_empty());
    }

    #[test]
    fn test_empty_mask_has_no_contour() {
        let analysis = ContourAnalyzer::default().analyze(&BinaryMask::empty(30, 30)).unwrap();
        assert!(analysis.contour.is_none());
        assert_eq!(analysis.descriptors, ShapeDescriptors::default());
    }

    #[test]
    fn test_largest_region_is_selected() {
        let mut image = GrayImage::new(200, 100);
        draw_filled_circle_mut(&mut image, (40, 50), 15, Luma([255u8]));
        draw_filled_circle_mut(&mut image, (140, 50), 35, Luma([255u8]));
        let contours = external_contours(&BinaryMask::from_gray(&image));
        assert_eq!(contours.len(), 2);

        let analysis = ContourAnalyzer::default().analyze(&BinaryMask::from_gray(&image)).unwrap();
        let contour = analysis.contour.unwrap();
        assert!(contour.points.iter().all(|p| p[0] > 100.0));
    }

    #[test]
    fn test_smoothing_removes_single_pixel_spur() {
        let mut mask = disc_mask(100, 30);
        mask.set(50, 50 - 31, true);
        let smoothed = MaskSmoothing::default().apply(&mask);
        assert!(!smoothed.is_foreground(50, 50 - 31));
        assert!(smoothed.is_foreground(50, 50));
    }

    #[test]
    fn test_inner_islands_are_not_external() {
        let mut image = GrayImage::new(100, 100);
        draw_filled_circle_mut(&mut image, (50, 50), 40, Luma([255u8]));
        draw_filled_circle_mut(&mut image, (50, 50), 20, Luma([0u8]));
        draw_filled_circle_mut(&mut image, (50, 50), 8, Luma([255u8]));
        let contours = external_contours(&BinaryMask::from_gray(&image));
        assert_eq!(contours.len(), 1);
    }
}
