use std::{fs, path::Path};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::{
    algorithms::{
        ChrominanceClusterer, ColorMap, ContourAnalyzer, GradCamPlusPlus, MaskSmoothing,
        MorphologicalCleaner, OutlineStyle,
    },
    error::{LesionError, Result},
};

/// Full pipeline configuration. Every field has a default, so an empty file is valid.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct PipelineConfig {
    pub input: InputConfig,
    pub attribution: AttributionConfig,
    pub clustering: ClusteringConfig,
    pub morphology: MorphologyConfig,
    pub contour: ContourConfig,
    pub overlay: OverlayConfig,
    pub diagnosis: DiagnosisConfig,
}

/// Working resolution every request is resized to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct InputConfig {
    pub width: u32,
    pub height: u32,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            width: 224,
            height: 224,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct AttributionConfig {
    /// Classifier layer whose activations are attributed.
    pub layer: String,
    pub output_width: u32,
    pub output_height: u32,
}

impl Default for AttributionConfig {
    fn default() -> Self {
        Self {
            layer: "out_relu".to_string(),
            output_width: 224,
            output_height: 224,
        }
    }
}

impl AttributionConfig {
    pub fn engine(&self) -> GradCamPlusPlus {
        GradCamPlusPlus::new(self.output_width, self.output_height)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct ClusteringConfig {
    pub clusters: usize,
    pub seed: u64,
    pub restarts: usize,
    pub max_iterations: usize,
    /// Clustered a* values strictly above this are lesion.
    pub threshold: u8,
}

impl Default for ClusteringConfig {
    fn default() -> Self {
        let d = ChrominanceClusterer::default();
        Self {
            clusters: d.clusters,
            seed: d.seed,
            restarts: d.restarts,
            max_iterations: d.max_iterations,
            threshold: d.threshold,
        }
    }
}

impl ClusteringConfig {
    pub fn segmenter(&self) -> ChrominanceClusterer {
        ChrominanceClusterer {
            clusters: self.clusters,
            seed: self.seed,
            restarts: self.restarts,
            max_iterations: self.max_iterations,
            threshold: self.threshold,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct MorphologyConfig {
    pub min_object_area: usize,
    pub max_hole_area: usize,
    pub keep_largest: bool,
}

impl Default for MorphologyConfig {
    fn default() -> Self {
        let d = MorphologicalCleaner::default();
        Self {
            min_object_area: d.min_object_area,
            max_hole_area: d.max_hole_area,
            keep_largest: d.keep_largest,
        }
    }
}

impl MorphologyConfig {
    pub fn refiner(&self) -> MorphologicalCleaner {
        MorphologicalCleaner {
            min_object_area: self.min_object_area,
            max_hole_area: self.max_hole_area,
            keep_largest: self.keep_largest,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct ContourConfig {
    pub min_contour_area: f64,
    /// Gaussian sigma of the pre-contour smoothing; `None` disables it.
    pub blur_sigma: Option<f32>,
    pub mask_threshold: u8,
    pub simplify_tolerance: f64,
    pub smoothing_iterations: usize,
}

impl Default for ContourConfig {
    fn default() -> Self {
        let smoothing = MaskSmoothing::default();
        let d = ContourAnalyzer::default();
        Self {
            min_contour_area: d.min_contour_area,
            blur_sigma: Some(smoothing.sigma),
            mask_threshold: smoothing.threshold,
            simplify_tolerance: d.simplify_tolerance,
            smoothing_iterations: d.smoothing_iterations,
        }
    }
}

impl ContourConfig {
    pub fn analyzer(&self) -> ContourAnalyzer {
        ContourAnalyzer {
            min_contour_area: self.min_contour_area,
            smoothing: self.blur_sigma.map(|sigma| MaskSmoothing {
                sigma,
                threshold: self.mask_threshold,
            }),
            simplify_tolerance: self.simplify_tolerance,
            smoothing_iterations: self.smoothing_iterations,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct OverlayConfig {
    pub colormap: ColorMap,
    /// Weight of the colorized heatmap against the base image.
    pub heatmap_blend: f32,
    /// Weight of the colorized mask against the base image.
    pub segmentation_blend: f32,
    /// Contour outline on the segmentation overlay; `None` disables it.
    pub outline: Option<OutlineStyle>,
    /// Also produce the masked lesion cutout.
    pub cutout: bool,
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            colormap: ColorMap::Jet,
            heatmap_blend: 0.4,
            segmentation_blend: 0.6,
            outline: Some(OutlineStyle::default()),
            cutout: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct DiagnosisConfig {
    /// Class names by index.
    pub labels: Vec<String>,
    /// Class whose probability drives the risk interpretation.
    pub risk_class: usize,
    pub high_risk_threshold: f32,
    pub moderate_risk_threshold: f32,
    pub messages: RiskMessages,
}

impl Default for DiagnosisConfig {
    fn default() -> Self {
        Self {
            labels: vec!["Melanoma".to_string(), "Nevus".to_string()],
            risk_class: 0,
            high_risk_threshold: 0.7,
            moderate_risk_threshold: 0.4,
            messages: RiskMessages::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct RiskMessages {
    pub high: String,
    pub moderate: String,
    pub low: String,
}

impl Default for RiskMessages {
    fn default() -> Self {
        Self {
            high: "High probability of melanoma - Consult a dermatologist immediately".to_string(),
            moderate: "Moderate probability of melanoma - Recommended to see a specialist".to_string(),
            low: "Low probability of melanoma - Likely benign nevus".to_string(),
        }
    }
}

impl PipelineConfig {
    /// Load configuration from a TOML file
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: PipelineConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a JSON file
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> Result<Self> {
        let config: PipelineConfig = serde_json::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Auto-detect file format and load configuration
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_ref = path.as_ref();
        match path_ref.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => Self::from_toml_file(path),
            Some("json") => Self::from_json_file(path),
            _ => Err(LesionError::UnsupportedConfigFormat),
        }
    }

    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(LesionError::Config(msg));

        if self.input.width == 0 || self.input.height == 0 {
            return invalid("input resolution must be non-zero".to_string());
        }
        if self.attribution.output_width == 0 || self.attribution.output_height == 0 {
            return invalid("attribution output resolution must be non-zero".to_string());
        }
        if self.attribution.layer.trim().is_empty() {
            return invalid("attribution layer name is empty".to_string());
        }
        if self.clustering.clusters == 0 {
            return invalid("clustering.clusters must be at least 1".to_string());
        }
        if let Some(sigma) = self.contour.blur_sigma {
            if !(sigma.is_finite() && sigma > 0.0) {
                return invalid(format!("contour.blur_sigma must be positive, got {sigma}"));
            }
        }
        if self.contour.min_contour_area.is_nan() || self.contour.min_contour_area < 0.0 {
            return invalid("contour.min_contour_area must be non-negative".to_string());
        }
        for (name, weight) in [
            ("heatmap_blend", self.overlay.heatmap_blend),
            ("segmentation_blend", self.overlay.segmentation_blend),
        ] {
            if !(0.0..=1.0).contains(&weight) {
                return invalid(format!("overlay.{name} must be in [0, 1], got {weight}"));
            }
        }
        let d = &self.diagnosis;
        if !(0.0..=1.0).contains(&d.moderate_risk_threshold)
            || !(0.0..=1.0).contains(&d.high_risk_threshold)
            || d.moderate_risk_threshold > d.high_risk_threshold
        {
            return invalid(format!(
                "risk thresholds must satisfy 0 <= moderate ({}) <= high ({}) <= 1",
                d.moderate_risk_threshold, d.high_risk_threshold
            ));
        }
        Ok(())
    }
}
