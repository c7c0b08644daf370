use base64::{Engine as _, engine::general_purpose::STANDARD};
use geo_types::{Coord, LineString, Polygon};
use image::{GrayImage, ImageBuffer, Luma, RgbImage, imageops::FilterType};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::{LesionError, Result};

/// Channels-last `height x width x channels` activation tensor.
///
/// Used for the classifier's feature map and for both of its gradients, which
/// share the feature map's shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Activations {
    pub height: usize,
    pub width: usize,
    pub channels: usize,
    pub data: Vec<f32>,
}

impl Activations {
    pub fn new(height: usize, width: usize, channels: usize, data: Vec<f32>) -> Result<Self> {
        let expected = height * width * channels;
        if data.len() != expected {
            return Err(LesionError::InvalidPrediction(format!(
                "activation buffer holds {} values, shape {}x{}x{} needs {}",
                data.len(),
                height,
                width,
                channels,
                expected
            )));
        }
        Ok(Self { height, width, channels, data })
    }

    /// Checks that the buffer length matches the declared shape.
    pub fn validate(&self) -> Result<()> {
        if self.data.len() != self.height * self.width * self.channels {
            return Err(LesionError::InvalidPrediction(format!(
                "activation buffer holds {} values, shape {:?} needs {}",
                self.data.len(),
                self.shape(),
                self.height * self.width * self.channels
            )));
        }
        Ok(())
    }

    pub fn zeros(height: usize, width: usize, channels: usize) -> Self {
        Self {
            height,
            width,
            channels,
            data: vec![0.0; height * width * channels],
        }
    }

    pub fn shape(&self) -> [usize; 3] {
        [self.height, self.width, self.channels]
    }

    #[inline]
    pub fn get(&self, y: usize, x: usize, c: usize) -> f32 {
        self.data[(y * self.width + x) * self.channels + c]
    }

    /// Fails with [`LesionError::ShapeMismatch`] unless `other` has this tensor's shape.
    pub fn ensure_same_shape(&self, other: &Activations) -> Result<()> {
        if self.shape() != other.shape() || other.data.len() != self.data.len() {
            return Err(LesionError::ShapeMismatch {
                expected: self.shape(),
                actual: other.shape(),
            });
        }
        Ok(())
    }
}

/// First- and second-order derivatives of a class score with respect to a feature map.
///
/// Either side may be missing when the differentiation backend could not produce it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GradientPair {
    pub first: Option<Activations>,
    pub second: Option<Activations>,
}

impl GradientPair {
    pub fn new(first: Activations, second: Activations) -> Self {
        Self {
            first: Some(first),
            second: Some(second),
        }
    }

    pub fn absent() -> Self {
        Self::default()
    }

    /// Both derivatives, or `None` if either one is missing.
    pub fn both(&self) -> Option<(&Activations, &Activations)> {
        Some((self.first.as_ref()?, self.second.as_ref()?))
    }
}

/// Everything the attribution engine needs from one forward/backward pass.
#[derive(Debug, Clone, PartialEq)]
pub struct GradientTrace {
    pub class_index: usize,
    pub feature_map: Activations,
    pub gradients: GradientPair,
}

/// Row-major scalar field, e.g. a heatmap in `[0, 1]` or a mask in `{0, 255}`.
#[derive(Debug, Clone, PartialEq)]
pub struct ScalarField {
    width: u32,
    height: u32,
    values: Vec<f32>,
}

/// Normalized class-activation map.
pub type Heatmap = ScalarField;

impl ScalarField {
    pub fn new(width: u32, height: u32, values: Vec<f32>) -> Result<Self> {
        if values.len() != (width as usize) * (height as usize) {
            return Err(LesionError::ImageProcessing(format!(
                "scalar field of {}x{} cannot hold {} values",
                width,
                height,
                values.len()
            )));
        }
        Ok(Self { width, height, values })
    }

    pub fn zeros(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            values: vec![0.0; (width as usize) * (height as usize)],
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    #[inline]
    pub fn get(&self, x: u32, y: u32) -> f32 {
        self.values[(y * self.width + x) as usize]
    }

    pub fn max(&self) -> f32 {
        self.values.iter().copied().fold(0.0_f32, f32::max)
    }

    pub fn is_zero(&self) -> bool {
        self.values.iter().all(|&v| v == 0.0)
    }

    /// Bilinear resize; a no-op clone when the size already matches.
    pub fn resize(&self, width: u32, height: u32) -> ScalarField {
        if (width, height) == (self.width, self.height) {
            return self.clone();
        }
        if self.width == 0 || self.height == 0 {
            return ScalarField::zeros(width, height);
        }

        let buffer: ImageBuffer<Luma<f32>, Vec<f32>> =
            ImageBuffer::from_raw(self.width, self.height, self.values.clone())
                .unwrap_or_else(|| ImageBuffer::new(self.width, self.height));
        let resized = image::imageops::resize(&buffer, width, height, FilterType::Triangle);

        ScalarField {
            width,
            height,
            values: resized.into_raw(),
        }
    }

    /// Quantize to 8 bits; values are clamped to `[0, 255]`.
    pub fn to_gray8(&self) -> GrayImage {
        let pixels = self
            .values
            .iter()
            .map(|&v| v.clamp(0.0, 255.0) as u8)
            .collect();
        GrayImage::from_raw(self.width, self.height, pixels)
            .unwrap_or_else(|| GrayImage::new(self.width, self.height))
    }
}

/// Lesion/background mask stored as a 0/255 grayscale image.
#[derive(Debug, Clone, PartialEq)]
pub struct BinaryMask(GrayImage);

impl BinaryMask {
    /// Any non-zero pixel becomes foreground.
    pub fn from_gray(image: &GrayImage) -> Self {
        let mut mask = image.clone();
        for pixel in mask.pixels_mut() {
            pixel[0] = if pixel[0] > 0 { 255 } else { 0 };
        }
        Self(mask)
    }

    pub fn empty(width: u32, height: u32) -> Self {
        Self(GrayImage::new(width, height))
    }

    pub fn width(&self) -> u32 {
        self.0.width()
    }

    pub fn height(&self) -> u32 {
        self.0.height()
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.0.dimensions()
    }

    #[inline]
    pub fn is_foreground(&self, x: u32, y: u32) -> bool {
        self.0.get_pixel(x, y)[0] > 0
    }

    pub fn set(&mut self, x: u32, y: u32, foreground: bool) {
        self.0.put_pixel(x, y, Luma([if foreground { 255 } else { 0 }]));
    }

    pub fn foreground_count(&self) -> usize {
        self.0.pixels().filter(|p| p[0] > 0).count()
    }

    pub fn is_empty(&self) -> bool {
        self.0.pixels().all(|p| p[0] == 0)
    }

    /// Share of foreground pixels, `0.0..=100.0`.
    pub fn area_percentage(&self) -> f64 {
        let total = self.0.width() as usize * self.0.height() as usize;
        if total == 0 {
            return 0.0;
        }
        100.0 * self.foreground_count() as f64 / total as f64
    }

    pub fn as_image(&self) -> &GrayImage {
        &self.0
    }

    pub fn into_image(self) -> GrayImage {
        self.0
    }

    pub fn to_field(&self) -> ScalarField {
        ScalarField {
            width: self.0.width(),
            height: self.0.height(),
            values: self.0.as_raw().iter().map(|&v| v as f32).collect(),
        }
    }
}

/// Closed boundary of a foreground region, in pixel coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contour {
    pub points: Vec<[f32; 2]>,
}

impl Contour {
    pub fn new(points: Vec<[f32; 2]>) -> Self {
        Self { points }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Convert to a geo-types polygon; the ring is closed by `Polygon::new`.
    pub fn to_geo_polygon(&self) -> Polygon<f64> {
        let coords: Vec<Coord<f64>> = self
            .points
            .iter()
            .map(|&[x, y]| Coord { x: x as f64, y: y as f64 })
            .collect();
        Polygon::new(LineString::new(coords), vec![])
    }

    pub fn area(&self) -> f64 {
        use geo::Area;
        self.to_geo_polygon().unsigned_area()
    }

    /// Length of the closed ring.
    pub fn perimeter(&self) -> f64 {
        use geo::EuclideanLength;
        self.to_geo_polygon().exterior().euclidean_length()
    }
}

/// Scalar descriptors of the segmented lesion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ShapeDescriptors {
    #[schemars(description = "Share of the image covered by the lesion, 0-100")]
    pub area_percentage: f64,
    #[schemars(description = "perimeter^2 / (4 pi area); 1.0 for a circle, 0 when no contour")]
    pub border_complexity: f64,
}

/// Isoperimetric ratio `perimeter² / (4π·area)`; 0 for a degenerate area.
pub fn isoperimetric_ratio(perimeter: f64, area: f64) -> f64 {
    if area > 0.0 {
        perimeter * perimeter / (4.0 * std::f64::consts::PI * area)
    } else {
        0.0
    }
}

/// Output of contour analysis on a cleaned mask.
#[derive(Debug, Clone)]
pub struct ContourAnalysis {
    /// Dominant contour, if one passed the significance threshold.
    pub contour: Option<Contour>,
    pub descriptors: ShapeDescriptors,
    /// Mask the descriptors were measured on.
    pub mask: BinaryMask,
}

/// Encoded PNG produced by the overlay compositor.
#[derive(Debug, Clone, PartialEq)]
pub struct OverlayImage {
    bytes: Vec<u8>,
    width: u32,
    height: u32,
}

impl OverlayImage {
    pub fn encode_png(image: &RgbImage) -> Result<Self> {
        let mut bytes = Vec::new();
        image
            .write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageFormat::Png)
            .map_err(LesionError::Encode)?;
        Ok(Self {
            bytes,
            width: image.width(),
            height: image.height(),
        })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn to_base64(&self) -> String {
        STANDARD.encode(&self.bytes)
    }

    pub fn decode(&self) -> Result<RgbImage> {
        Ok(image::load_from_memory(&self.bytes)?.to_rgb8())
    }
}
