use image::RgbImage;
use crate::{
    classifier::{ClassifierInput, ForwardPass},
    error::Result,
    types::{BinaryMask, ContourAnalysis, GradientPair},
};

/// External classifier handle.
///
/// Implementations are long-lived and read-only from the core's point of view;
/// the pipeline borrows one per request and never stores it.
pub trait Classifier: Send + Sync {
    /// Run the model once, returning its prediction and the activations of `layer`.
    fn forward(&self, input: &ClassifierInput, layer: &str) -> Result<ForwardPass>;

    /// First- and second-order gradients of `class_index`'s score with respect
    /// to the feature map of `pass`. Must refer to that exact forward pass.
    fn gradients(&self, pass: &ForwardPass, class_index: usize) -> Result<GradientPair>;
}

/// Trait for producing a raw lesion mask from a colour image
pub trait LesionSegmenter: Send + Sync {
    fn segment(&self, image: &RgbImage) -> Result<BinaryMask>;
}

/// Trait for mask clean-up steps
pub trait MaskRefiner: Send + Sync {
    fn refine(&self, mask: &BinaryMask) -> Result<BinaryMask>;
}

/// Trait for turning a cleaned mask into a dominant contour and descriptors
pub trait ShapeAnalyzer: Send + Sync {
    fn analyze(&self, mask: &BinaryMask) -> Result<ContourAnalysis>;
}
