pub mod builder;

use image::{RgbImage, imageops::FilterType};
use tracing::{debug, info, warn};

use crate::{
    algorithms::{AttributionOutcome, Degeneracy, GradCamPlusPlus, OverlayCompositor, lesion_cutout},
    classifier::{ClassifierInput, ForwardPass, Prediction},
    config::{DiagnosisConfig, PipelineConfig},
    diagnosis::Diagnosis,
    error::{LesionError, Result},
    traits::{Classifier, LesionSegmenter, MaskRefiner, ShapeAnalyzer},
    types::{BinaryMask, Contour, GradientTrace, OverlayImage, ShapeDescriptors},
};

/// One image to analyze. The class index, when given, overrides the argmax.
#[derive(Debug, Clone, Default)]
pub struct AnalysisRequest {
    pub image_bytes: Vec<u8>,
    pub class_index: Option<usize>,
}

impl AnalysisRequest {
    pub fn new(image_bytes: Vec<u8>) -> Self {
        Self {
            image_bytes,
            class_index: None,
        }
    }

    pub fn with_class_index(mut self, class_index: usize) -> Self {
        self.class_index = Some(class_index);
        self
    }
}

/// Result of the segmentation branch alone.
#[derive(Debug, Clone)]
pub struct SegmentationReport {
    /// Mask straight out of the segmenter.
    pub raw_mask: BinaryMask,
    /// Mask after every refiner ran.
    pub cleaned_mask: BinaryMask,
    /// Mask the descriptors were measured on.
    pub lesion_mask: BinaryMask,
    pub contour: Option<Contour>,
    pub descriptors: ShapeDescriptors,
    pub overlay: OverlayImage,
    pub cutout: Option<OverlayImage>,
}

/// Everything one analysis produced.
#[derive(Debug, Clone)]
pub struct AnalysisReport {
    pub diagnosis: Diagnosis,
    pub attribution: AttributionOutcome,
    pub heatmap_overlay: OverlayImage,
    pub segmentation: SegmentationReport,
}

/// Rendering parameters shared by both branches.
#[derive(Debug, Clone)]
pub struct RenderSettings {
    pub working_width: u32,
    pub working_height: u32,
    pub layer: String,
    pub heatmap_blend: f32,
    pub segmentation_blend: f32,
    pub cutout: bool,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self::from_config(&PipelineConfig::default())
    }
}

impl RenderSettings {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            working_width: config.input.width,
            working_height: config.input.height,
            layer: config.attribution.layer.clone(),
            heatmap_blend: config.overlay.heatmap_blend,
            segmentation_blend: config.overlay.segmentation_blend,
            cutout: config.overlay.cutout,
        }
    }
}

/// Lesion analysis pipeline: attribution and segmentation over one working image.
///
/// Holds no per-request state; the classifier is borrowed for each call.
pub struct Pipeline {
    segmenter: Box<dyn LesionSegmenter>,
    refiners: Vec<Box<dyn MaskRefiner>>,
    analyzer: Box<dyn ShapeAnalyzer>,
    attribution: GradCamPlusPlus,
    heatmap_compositor: OverlayCompositor,
    segmentation_compositor: OverlayCompositor,
    diagnosis: DiagnosisConfig,
    settings: RenderSettings,
}

impl Pipeline {
    /// Create a new pipeline builder
    pub fn builder() -> builder::PipelineBuilder {
        builder::PipelineBuilder::new()
    }

    /// Validate `config` and build the standard pipeline from it.
    pub fn from_config(config: &PipelineConfig) -> Result<Self> {
        config.validate()?;
        Ok(builder::PipelineBuilder::from_config(config).build())
    }

    #[allow(clippy::too_many_arguments)]
    pub fn new(
        segmenter: Box<dyn LesionSegmenter>,
        refiners: Vec<Box<dyn MaskRefiner>>,
        analyzer: Box<dyn ShapeAnalyzer>,
        attribution: GradCamPlusPlus,
        heatmap_compositor: OverlayCompositor,
        segmentation_compositor: OverlayCompositor,
        diagnosis: DiagnosisConfig,
        settings: RenderSettings,
    ) -> Self {
        Self {
            segmenter,
            refiners,
            analyzer,
            attribution,
            heatmap_compositor,
            segmentation_compositor,
            diagnosis,
            settings,
        }
    }

    pub fn settings(&self) -> &RenderSettings {
        &self.settings
    }

    /// Decode `bytes` into an RGB image at the working resolution.
    pub fn prepare_image(&self, bytes: &[u8]) -> Result<RgbImage> {
        let decoded = image::load_from_memory(bytes)?.to_rgb8();
        if decoded.width() == 0 || decoded.height() == 0 {
            return Err(LesionError::EmptyImage);
        }

        let (width, height) = (self.settings.working_width, self.settings.working_height);
        if decoded.dimensions() == (width, height) {
            return Ok(decoded);
        }
        debug!(
            from = ?decoded.dimensions(),
            to = ?(width, height),
            "resizing to working resolution"
        );
        Ok(image::imageops::resize(&decoded, width, height, FilterType::Triangle))
    }

    /// Run both branches on one request.
    ///
    /// Undecodable input and classifier forward failures fail the whole request.
    /// Attribution problems degrade to a zero heatmap; segmentation always runs.
    pub fn analyze(&self, classifier: &dyn Classifier, request: &AnalysisRequest) -> Result<AnalysisReport> {
        let image = self.prepare_image(&request.image_bytes)?;

        let input = ClassifierInput::from_image(&image);
        let pass = classifier.forward(&input, &self.settings.layer)?;
        let prediction = Prediction::normalize(pass.prediction.clone())?;
        let diagnosis = Diagnosis::new(&prediction, request.class_index, &self.diagnosis)?;

        let attribution = self.attribute(classifier, &pass, diagnosis.class_index);
        let heatmap_overlay =
            self.heatmap_compositor
                .composite(&image, attribution.heatmap(), self.settings.heatmap_blend)?;

        let segmentation = self.segment(&image)?;

        info!(
            class_index = diagnosis.class_index,
            label = %diagnosis.label,
            confidence = diagnosis.confidence,
            attribution = attribution.status(),
            area_percentage = segmentation.descriptors.area_percentage,
            border_complexity = segmentation.descriptors.border_complexity,
            "analysis complete"
        );

        Ok(AnalysisReport {
            diagnosis,
            attribution,
            heatmap_overlay,
            segmentation,
        })
    }

    /// Grad-CAM++ for the pass; gradient failures become a zero heatmap.
    fn attribute(&self, classifier: &dyn Classifier, pass: &ForwardPass, class_index: usize) -> AttributionOutcome {
        match classifier.gradients(pass, class_index) {
            Ok(gradients) => self.attribution.attribute(&GradientTrace {
                class_index,
                feature_map: pass.feature_map.clone(),
                gradients,
            }),
            Err(e) => {
                warn!(class_index, error = %e, "gradient computation failed, using zero heatmap");
                AttributionOutcome::degenerate(
                    Degeneracy::ComputationFault(e.to_string()),
                    self.attribution.output_width,
                    self.attribution.output_height,
                )
            }
        }
    }

    /// Segmentation branch: cluster, clean, measure, render.
    pub fn segment(&self, image: &RgbImage) -> Result<SegmentationReport> {
        if image.width() == 0 || image.height() == 0 {
            return Err(LesionError::EmptyImage);
        }

        let raw_mask = self.segmenter.segment(image)?;
        let mut cleaned_mask = raw_mask.clone();
        for refiner in &self.refiners {
            cleaned_mask = refiner.refine(&cleaned_mask)?;
        }

        let analysis = self.analyzer.analyze(&cleaned_mask)?;
        debug!(
            raw = raw_mask.foreground_count(),
            cleaned = cleaned_mask.foreground_count(),
            significant = analysis.contour.is_some(),
            "segmentation done"
        );

        let overlay = self.segmentation_compositor.composite_with_contour(
            image,
            &analysis.mask.to_field(),
            self.settings.segmentation_blend,
            analysis.contour.as_ref(),
        )?;
        let cutout = if self.settings.cutout {
            Some(OverlayImage::encode_png(&lesion_cutout(image, &analysis.mask)?)?)
        } else {
            None
        };

        Ok(SegmentationReport {
            raw_mask,
            cleaned_mask,
            lesion_mask: analysis.mask,
            contour: analysis.contour,
            descriptors: analysis.descriptors,
            overlay,
            cutout,
        })
    }

    /// Get information about the pipeline configuration
    pub fn info(&self) -> String {
        format!(
            "Pipeline: 1 segmenter, {} refiners, 1 shape analyzer, Grad-CAM++ at layer '{}', working size {}x{}",
            self.refiners.len(),
            self.settings.layer,
            self.settings.working_width,
            self.settings.working_height
        )
    }
}
