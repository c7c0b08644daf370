use image::{GrayImage, Luma, RgbImage};
use palette::{FromColor, Lab, LinSrgb, Srgb};
use rand::{Rng, SeedableRng, rngs::StdRng};
use tracing::debug;

use crate::{error::Result, traits::LesionSegmenter, types::BinaryMask};

/// Segments pigmented tissue by k-means on the Lab a* (green-red) channel.
#[derive(Debug, Clone)]
pub struct ChrominanceClusterer {
    pub clusters: usize,
    pub seed: u64,
    pub restarts: usize,
    pub max_iterations: usize,
    /// Clustered intensities strictly above this are lesion.
    pub threshold: u8,
}

impl Default for ChrominanceClusterer {
    fn default() -> Self {
        Self {
            clusters: 7,
            seed: 0,
            restarts: 10,
            max_iterations: 300,
            threshold: 141,
        }
    }
}

impl LesionSegmenter for ChrominanceClusterer {
    fn segment(&self, image: &RgbImage) -> Result<BinaryMask> {
        let channel = chrominance_channel(image);
        let clustered = self.cluster_channel(&channel);

        let mut mask = BinaryMask::empty(image.width(), image.height());
        if let Some(clustered) = clustered {
            for (x, y, pixel) in clustered.enumerate_pixels() {
                if pixel[0] > self.threshold {
                    mask.set(x, y, true);
                }
            }
        }
        debug!(foreground = mask.foreground_count(), "chrominance clustering done");
        Ok(mask)
    }
}

impl ChrominanceClusterer {
    /// Replace every pixel by its cluster centroid (truncated to 8 bits).
    ///
    /// Returns `None` when the channel holds a single value, since there is
    /// nothing to separate.
    pub fn cluster_channel(&self, channel: &GrayImage) -> Option<GrayImage> {
        let mut histogram = [0u64; 256];
        for pixel in channel.pixels() {
            histogram[pixel[0] as usize] += 1;
        }

        let levels: Vec<(f64, u64)> = histogram
            .iter()
            .enumerate()
            .filter(|&(_, &count)| count > 0)
            .map(|(value, &count)| (value as f64, count))
            .collect();

        if levels.len() <= 1 || self.clusters == 0 {
            debug!(levels = levels.len(), "uniform chrominance, nothing to cluster");
            return None;
        }

        let k = self.clusters.min(levels.len());
        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut best: Option<(Vec<f64>, f64)> = None;
        for _ in 0..self.restarts.max(1) {
            let initial = kmeans_plus_plus(&levels, k, &mut rng);
            let (centroids, inertia) = lloyd(&levels, initial, self.max_iterations);
            if best.as_ref().is_none_or(|(_, b)| inertia < *b) {
                best = Some((centroids, inertia));
            }
        }
        let (centroids, inertia) = best?;
        debug!(k, inertia, ?centroids, "k-means converged");

        let mut lut = [0u8; 256];
        for &(value, _) in &levels {
            let centroid = centroids[nearest(&centroids, value)];
            lut[value as usize] = centroid.clamp(0.0, 255.0) as u8;
        }

        let mut clustered = channel.clone();
        for pixel in clustered.pixels_mut() {
            *pixel = Luma([lut[pixel[0] as usize]]);
        }
        Some(clustered)
    }
}

/// Lab a* channel encoded as 8 bits, `a* + 128`.
pub fn chrominance_channel(image: &RgbImage) -> GrayImage {
    let mut channel = GrayImage::new(image.width(), image.height());
    for (x, y, p) in image.enumerate_pixels() {
        let srgb: Srgb<f32> = Srgb::new(p[0] as f32 / 255.0, p[1] as f32 / 255.0, p[2] as f32 / 255.0);
        let linear: LinSrgb<f32> = srgb.into_linear();
        let lab: Lab = Lab::from_color(linear);
        let encoded = (lab.a + 128.0).round().clamp(0.0, 255.0) as u8;
        channel.put_pixel(x, y, Luma([encoded]));
    }
    channel
}

fn nearest(centroids: &[f64], value: f64) -> usize {
    let mut best = 0;
    let mut best_distance = f64::INFINITY;
    for (i, &c) in centroids.iter().enumerate() {
        let d = (value - c).abs();
        if d < best_distance {
            best = i;
            best_distance = d;
        }
    }
    best
}

/// k-means++ seeding over weighted 1-D levels.
fn kmeans_plus_plus(levels: &[(f64, u64)], k: usize, rng: &mut StdRng) -> Vec<f64> {
    let total: u64 = levels.iter().map(|&(_, count)| count).sum();
    let mut pick = rng.random_range(0..total);
    let mut first = levels[0].0;
    for &(value, count) in levels {
        if pick < count {
            first = value;
            break;
        }
        pick -= count;
    }

    let mut centroids = vec![first];
    while centroids.len() < k {
        let weights: Vec<f64> = levels
            .iter()
            .map(|&(value, count)| {
                let d = centroids.iter().map(|c| (value - c).abs()).fold(f64::INFINITY, f64::min);
                d * d * count as f64
            })
            .collect();
        let sum: f64 = weights.iter().sum();
        if sum <= 0.0 {
            break;
        }

        let mut target = rng.random::<f64>() * sum;
        let mut chosen = levels.len() - 1;
        for (i, &w) in weights.iter().enumerate() {
            if w > 0.0 && target < w {
                chosen = i;
                break;
            }
            target -= w;
        }
        // Rounding can land on an already chosen level; take the farthest instead.
        if weights[chosen] <= 0.0 {
            chosen = weights
                .iter()
                .enumerate()
                .fold((0, f64::NEG_INFINITY), |best, (i, &w)| if w > best.1 { (i, w) } else { best })
                .0;
        }
        centroids.push(levels[chosen].0);
    }
    centroids
}

/// Lloyd iterations; returns the centroids and the weighted inertia.
fn lloyd(levels: &[(f64, u64)], mut centroids: Vec<f64>, max_iterations: usize) -> (Vec<f64>, f64) {
    const TOLERANCE: f64 = 1e-4;

    for _ in 0..max_iterations {
        let mut sums = vec![0.0_f64; centroids.len()];
        let mut counts = vec![0u64; centroids.len()];
        for &(value, count) in levels {
            let i = nearest(&centroids, value);
            sums[i] += value * count as f64;
            counts[i] += count;
        }

        let mut shift = 0.0_f64;
        for (i, centroid) in centroids.iter_mut().enumerate() {
            if counts[i] > 0 {
                let updated = sums[i] / counts[i] as f64;
                shift = shift.max((updated - *centroid).abs());
                *centroid = updated;
            }
        }
        if shift <= TOLERANCE {
            break;
        }
    }

    let inertia = levels
        .iter()
        .map(|&(value, count)| {
            let d = value - centroids[nearest(&centroids, value)];
            d * d * count as f64
        })
        .sum();
    (centroids, inertia)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;
    use imageproc::drawing::draw_filled_circle_mut;

    fn red_disc(size: u32, radius: i32) -> RgbImage {
        let mut image = RgbImage::new(size, size);
        let c = (size / 2) as i32;
        draw_filled_circle_mut(&mut image, (c, c), radius, Rgb([255, 0, 0]));
        image
    }

    #[test]
    fn test_chrominance_of_reference_colours() {
        let image = RgbImage::from_fn(3, 1, |x, _| match x {
            0 => Rgb([0, 0, 0]),
            1 => Rgb([255, 255, 255]),
            _ => Rgb([255, 0, 0]),
        });
        let channel = chrominance_channel(&image);
        assert_eq!(channel.get_pixel(0, 0)[0], 128);
        assert_eq!(channel.get_pixel(1, 0)[0], 128);
        let red = channel.get_pixel(2, 0)[0];
        assert!((205..=210).contains(&red), "red a* channel was {red}");
    }

    #[test]
    fn test_solid_colour_gives_empty_mask() {
        let clusterer = ChrominanceClusterer::default();
        for colour in [[255, 0, 0], [0, 0, 0], [200, 150, 120], [20, 200, 40]] {
            let image = RgbImage::from_pixel(32, 32, Rgb(colour));
            let mask = clusterer.segment(&image).unwrap();
            assert!(mask.is_empty(), "solid {colour:?} should not produce a lesion");
        }
    }

    #[test]
    fn test_red_disc_is_foreground() {
        let image = red_disc(64, 15);
        let mask = ChrominanceClusterer::default().segment(&image).unwrap();
        assert!(mask.is_foreground(32, 32));
        assert!(!mask.is_foreground(0, 0));
        let disc_pixels = image.pixels().filter(|p| p.0 == [255, 0, 0]).count();
        assert_eq!(mask.foreground_count(), disc_pixels);
    }

    #[test]
    fn test_clustering_is_reproducible() {
        let image = RgbImage::from_fn(40, 40, |x, y| Rgb([(x * 6) as u8, (y * 3) as u8, 90]));
        let clusterer = ChrominanceClusterer::default();
        let channel = chrominance_channel(&image);
        assert_eq!(clusterer.cluster_channel(&channel), clusterer.cluster_channel(&channel));
    }

    #[test]
    fn test_cluster_count_caps_distinct_levels() {
        let channel = GrayImage::from_fn(10, 10, |x, _| Luma([if x < 5 { 100 } else { 200 }]));
        let clustered = ChrominanceClusterer::default().cluster_channel(&channel).unwrap();
        assert_eq!(clustered, channel);
    }

    /// Pale skin with a saturated brown disc, both jittered by a seeded RNG.
    fn noisy_lesion(size: u32, radius: u32) -> RgbImage {
        let mut rng = StdRng::seed_from_u64(17);
        let c = size / 2;
        RgbImage::from_fn(size, size, |x, y| {
            let inside = x.abs_diff(c).pow(2) + y.abs_diff(c).pow(2) <= radius * radius;
            let base: [u8; 3] = if inside { [140, 60, 50] } else { [225, 200, 185] };
            Rgb(base.map(|v| (v as i16 + rng.random_range(-5i16..=5)).clamp(0, 255) as u8))
        })
    }

    #[test]
    fn test_noisy_image_uses_seven_clusters() {
        let image = noisy_lesion(96, 25);
        let clusterer = ChrominanceClusterer::default();
        let channel = chrominance_channel(&image);

        let mut levels: Vec<u8> = channel.pixels().map(|p| p[0]).collect();
        levels.sort_unstable();
        levels.dedup();
        assert!(levels.len() > 7, "only {} distinct a* levels", levels.len());

        let clustered = clusterer.cluster_channel(&channel).unwrap();
        let mut centroids: Vec<u8> = clustered.pixels().map(|p| p[0]).collect();
        centroids.sort_unstable();
        centroids.dedup();
        assert_eq!(centroids.len(), 7, "centroids {centroids:?}");
        for centroid in &centroids {
            assert!((levels[0]..=levels[levels.len() - 1]).contains(centroid));
        }
        // both sides of the threshold are populated
        assert!(centroids.iter().any(|&c| c > clusterer.threshold));
        assert!(centroids.iter().any(|&c| c <= clusterer.threshold));
    }

    #[test]
    fn test_noisy_lesion_survives_cleaning() {
        use crate::{algorithms::MorphologicalCleaner, traits::MaskRefiner};

        let image = noisy_lesion(96, 25);
        let raw = ChrominanceClusterer::default().segment(&image).unwrap();
        let cleaned = MorphologicalCleaner::default().refine(&raw).unwrap();

        assert!(cleaned.is_foreground(48, 48));
        for (x, y) in [(0, 0), (95, 0), (0, 95), (95, 95), (10, 48)] {
            assert!(!cleaned.is_foreground(x, y), "({x}, {y}) should be skin");
        }
        let disc_area = std::f64::consts::PI * 25.0 * 25.0;
        let ratio = cleaned.foreground_count() as f64 / disc_area;
        assert!((0.9..1.1).contains(&ratio), "area ratio {ratio}");
    }

    #[test]
    fn test_lloyd_separates_two_groups() {
        let levels = vec![(10.0, 5), (12.0, 5), (200.0, 5), (202.0, 5)];
        let (mut centroids, inertia) = lloyd(&levels, vec![10.0, 12.0], 100);
        centroids.sort_by(|a, b| a.total_cmp(b));
        assert!((centroids[0] - 11.0).abs() < 1e-9);
        assert!((centroids[1] - 201.0).abs() < 1e-9);
        assert!((inertia - 20.0).abs() < 1e-9);
    }
}
