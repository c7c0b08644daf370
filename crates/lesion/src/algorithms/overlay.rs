use image::{Rgb, RgbImage};
use imageproc::drawing::draw_line_segment_mut;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::colormap::ColorMap;
use crate::{
    error::{LesionError, Result},
    types::{BinaryMask, Contour, OverlayImage, ScalarField},
};

/// Outline drawn over a composite.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct OutlineStyle {
    pub color: [u8; 3],
    pub thickness: u32,
}

impl Default for OutlineStyle {
    fn default() -> Self {
        Self {
            color: [255, 255, 0], // Yellow
            thickness: 2,
        }
    }
}

/// Colorizes scalar fields and blends them over a base image.
#[derive(Debug, Clone, Default)]
pub struct OverlayCompositor {
    pub colormap: ColorMap,
    pub outline: Option<OutlineStyle>,
}

impl OverlayCompositor {
    pub fn new(colormap: ColorMap) -> Self {
        Self {
            colormap,
            outline: None,
        }
    }

    pub fn with_outline(mut self, style: OutlineStyle) -> Self {
        self.outline = Some(style);
        self
    }

    /// Blend `field` over `base` and encode the result as PNG.
    ///
    /// Fields with a maximum of at most 1.0 are treated as normalized and
    /// rescaled to `[0, 255]` first.
    pub fn composite(&self, base: &RgbImage, field: &ScalarField, blend_weight: f32) -> Result<OverlayImage> {
        let blended = self.blend(base, field, blend_weight)?;
        OverlayImage::encode_png(&blended)
    }

    /// Like [`composite`](Self::composite), tracing `contour` on top when an
    /// outline style is set.
    pub fn composite_with_contour(
        &self,
        base: &RgbImage,
        field: &ScalarField,
        blend_weight: f32,
        contour: Option<&Contour>,
    ) -> Result<OverlayImage> {
        let mut blended = self.blend(base, field, blend_weight)?;
        if let (Some(style), Some(contour)) = (self.outline, contour) {
            draw_outline(&mut blended, contour, style);
        }
        OverlayImage::encode_png(&blended)
    }

    pub fn blend(&self, base: &RgbImage, field: &ScalarField, blend_weight: f32) -> Result<RgbImage> {
        let (width, height) = base.dimensions();
        if width == 0 || height == 0 {
            return Err(LesionError::EmptyImage);
        }
        if !blend_weight.is_finite() {
            return Err(LesionError::ImageProcessing(format!(
                "blend weight must be finite, got {blend_weight}"
            )));
        }

        let resized = field.resize(width, height);
        let scaled = if resized.max() <= 1.0 {
            let values = resized.values().iter().map(|v| v * 255.0).collect();
            ScalarField::new(width, height, values)?
        } else {
            resized
        };
        let colored = self.colormap.apply(&scaled.to_gray8());

        let mut out = base.clone();
        for (x, y, pixel) in out.enumerate_pixels_mut() {
            let color = colored.get_pixel(x, y);
            *pixel = Rgb(blend_colors(pixel.0, color.0, blend_weight));
        }
        Ok(out)
    }
}

/// `alpha * overlay + (1 - alpha) * base`, rounded.
pub fn blend_colors(base: [u8; 3], overlay: [u8; 3], alpha: f32) -> [u8; 3] {
    let alpha = alpha.clamp(0.0, 1.0);
    let inv_alpha = 1.0 - alpha;
    let mix = |b: u8, o: u8| (b as f32 * inv_alpha + o as f32 * alpha).round().clamp(0.0, 255.0) as u8;
    [
        mix(base[0], overlay[0]),
        mix(base[1], overlay[1]),
        mix(base[2], overlay[2]),
    ]
}

/// Closed polyline through the contour points, widened by offset copies.
pub fn draw_outline(image: &mut RgbImage, contour: &Contour, style: OutlineStyle) {
    if contour.len() < 2 {
        return;
    }
    let color = Rgb(style.color);
    let thickness = style.thickness.max(1);
    let next = contour.points.iter().cycle().skip(1);
    for (a, b) in contour.points.iter().zip(next) {
        for dy in 0..thickness {
            for dx in 0..thickness {
                let (ox, oy) = (dx as f32, dy as f32);
                draw_line_segment_mut(image, (a[0] + ox, a[1] + oy), (b[0] + ox, b[1] + oy), color);
            }
        }
    }
}

/// Base image with everything outside `mask` blacked out.
pub fn lesion_cutout(base: &RgbImage, mask: &BinaryMask) -> Result<RgbImage> {
    if base.dimensions() != mask.dimensions() {
        let (bw, bh) = base.dimensions();
        let (mw, mh) = mask.dimensions();
        return Err(LesionError::ImageProcessing(format!(
            "mask is {mw}x{mh} but image is {bw}x{bh}"
        )));
    }
    let mut out = base.clone();
    for (x, y, pixel) in out.enumerate_pixels_mut() {
        if !mask.is_foreground(x, y) {
            *pixel = Rgb([0, 0, 0]);
        }
    }
    Ok(out)
}
