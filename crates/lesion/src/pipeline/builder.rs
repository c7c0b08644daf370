use crate::{
    algorithms::{
        ChrominanceClusterer, ColorMap, ContourAnalyzer, GradCamPlusPlus, MorphologicalCleaner, OutlineStyle,
        OverlayCompositor,
    },
    config::{DiagnosisConfig, PipelineConfig},
    pipeline::{Pipeline, RenderSettings},
    traits::{LesionSegmenter, MaskRefiner, ShapeAnalyzer},
};

/// Builder for creating analysis pipelines with a fluent API
pub struct PipelineBuilder {
    segmenter: Option<Box<dyn LesionSegmenter>>,
    refiners: Vec<Box<dyn MaskRefiner>>,
    analyzer: Option<Box<dyn ShapeAnalyzer>>,
    attribution: GradCamPlusPlus,
    colormap: ColorMap,
    outline: Option<OutlineStyle>,
    diagnosis: DiagnosisConfig,
    settings: RenderSettings,
}

impl PipelineBuilder {
    /// Create a new pipeline builder
    pub fn new() -> Self {
        Self {
            segmenter: None,
            refiners: Vec::new(),
            analyzer: None,
            attribution: GradCamPlusPlus::default(),
            colormap: ColorMap::default(),
            outline: Some(OutlineStyle::default()),
            diagnosis: DiagnosisConfig::default(),
            settings: RenderSettings::default(),
        }
    }

    /// Builder preloaded with every stage described by `config`.
    ///
    /// Does not validate; [`Pipeline::from_config`] does.
    pub fn from_config(config: &PipelineConfig) -> Self {
        let mut builder = Self::new()
            .set_segmenter(config.clustering.segmenter())
            .add_refiner(config.morphology.refiner())
            .set_analyzer(config.contour.analyzer())
            .with_attribution(config.attribution.engine())
            .with_colormap(config.overlay.colormap)
            .with_diagnosis(config.diagnosis.clone())
            .with_settings(RenderSettings::from_config(config));
        builder.outline = config.overlay.outline;
        builder
    }

    /// Set the segmenter (replaces any existing one)
    pub fn set_segmenter<S>(mut self, segmenter: S) -> Self
    where
        S: LesionSegmenter + 'static,
    {
        self.segmenter = Some(Box::new(segmenter));
        self
    }

    /// Add a mask refiner; refiners run in insertion order
    pub fn add_refiner<R>(mut self, refiner: R) -> Self
    where
        R: MaskRefiner + 'static,
    {
        self.refiners.push(Box::new(refiner));
        self
    }

    /// Set the shape analyzer (replaces any existing one)
    pub fn set_analyzer<A>(mut self, analyzer: A) -> Self
    where
        A: ShapeAnalyzer + 'static,
    {
        self.analyzer = Some(Box::new(analyzer));
        self
    }

    pub fn with_attribution(mut self, attribution: GradCamPlusPlus) -> Self {
        self.attribution = attribution;
        self
    }

    pub fn with_colormap(mut self, colormap: ColorMap) -> Self {
        self.colormap = colormap;
        self
    }

    pub fn with_outline(mut self, outline: OutlineStyle) -> Self {
        self.outline = Some(outline);
        self
    }

    pub fn without_outline(mut self) -> Self {
        self.outline = None;
        self
    }

    pub fn with_diagnosis(mut self, diagnosis: DiagnosisConfig) -> Self {
        self.diagnosis = diagnosis;
        self
    }

    pub fn with_settings(mut self, settings: RenderSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Build the pipeline with default components if not specified.
    ///
    /// With no refiner added, the default [`MorphologicalCleaner`] runs.
    pub fn build(mut self) -> Pipeline {
        let segmenter = self
            .segmenter
            .unwrap_or_else(|| Box::new(ChrominanceClusterer::default()));
        if self.refiners.is_empty() {
            self.refiners.push(Box::new(MorphologicalCleaner::default()));
        }
        let analyzer = self
            .analyzer
            .unwrap_or_else(|| Box::new(ContourAnalyzer::default()));

        let heatmap_compositor = OverlayCompositor::new(self.colormap);
        let segmentation_compositor = OverlayCompositor {
            colormap: self.colormap,
            outline: self.outline,
        };

        Pipeline::new(
            segmenter,
            self.refiners,
            analyzer,
            self.attribution,
            heatmap_compositor,
            segmentation_compositor,
            self.diagnosis,
            self.settings,
        )
    }
}

impl Default for PipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}
