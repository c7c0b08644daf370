use image::{GrayImage, Rgb, RgbImage};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoStaticStr, VariantNames};

/// Fixed colormaps for turning a scalar field into RGB.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq,
    Serialize, Deserialize, JsonSchema,
    Display, EnumString, EnumIter, VariantNames, IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ColorMap {
    /// Blue through cyan, yellow to red
    #[default]
    Jet,
    Gray,
}

impl ColorMap {
    /// RGB colour for an 8-bit intensity.
    pub fn color(self, value: u8) -> [u8; 3] {
        match self {
            ColorMap::Jet => {
                let t = value as f32 / 255.0;
                let channel = |offset: f32| {
                    let v = (1.5 - (4.0 * t - offset).abs()).clamp(0.0, 1.0);
                    (v * 255.0).round() as u8
                };
                [channel(3.0), channel(2.0), channel(1.0)]
            }
            ColorMap::Gray => [value, value, value],
        }
    }

    pub fn apply(self, field: &GrayImage) -> RgbImage {
        let lut: Vec<[u8; 3]> = (0..=255u8).map(|v| self.color(v)).collect();
        let mut out = RgbImage::new(field.width(), field.height());
        for (x, y, pixel) in field.enumerate_pixels() {
            out.put_pixel(x, y, Rgb(lut[pixel[0] as usize]));
        }
        out
    }
}
