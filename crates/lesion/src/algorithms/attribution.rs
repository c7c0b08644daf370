//! Grad-CAM++ class-activation mapping.

use strum::{Display, IntoStaticStr};
use tracing::{debug, warn};

use crate::{
    error::{LesionError, Result},
    types::{Activations, GradientPair, GradientTrace, Heatmap, ScalarField},
};

/// Why an attribution came out all-zero.
#[derive(Debug, Clone, PartialEq, Display, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum Degeneracy {
    /// First- or second-order gradient was not produced.
    MissingGradient,
    /// The class-activation map had no positive value to normalize by.
    ZeroActivation,
    /// Inputs were inconsistent or the classifier failed to differentiate.
    ComputationFault(String),
}

/// Result of one attribution; degenerate outcomes still carry a zero heatmap.
#[derive(Debug, Clone, PartialEq)]
pub enum AttributionOutcome {
    Computed(Heatmap),
    Degenerate { reason: Degeneracy, heatmap: Heatmap },
}

impl AttributionOutcome {
    pub fn degenerate(reason: Degeneracy, width: u32, height: u32) -> Self {
        Self::Degenerate {
            reason,
            heatmap: ScalarField::zeros(width, height),
        }
    }

    pub fn heatmap(&self) -> &Heatmap {
        match self {
            Self::Computed(heatmap) => heatmap,
            Self::Degenerate { heatmap, .. } => heatmap,
        }
    }

    pub fn is_computed(&self) -> bool {
        matches!(self, Self::Computed(_))
    }

    /// Status label for reports: `computed` or the degeneracy name.
    pub fn status(&self) -> &'static str {
        match self {
            Self::Computed(_) => "computed",
            Self::Degenerate { reason, .. } => reason.into(),
        }
    }
}

/// Grad-CAM++ attribution engine.
///
/// Stateless; one instance can serve any number of requests.
#[derive(Debug, Clone)]
pub struct GradCamPlusPlus {
    pub output_width: u32,
    pub output_height: u32,
}

impl Default for GradCamPlusPlus {
    fn default() -> Self {
        Self {
            output_width: 224,
            output_height: 224,
        }
    }
}

impl GradCamPlusPlus {
    pub fn new(output_width: u32, output_height: u32) -> Self {
        Self {
            output_width,
            output_height,
        }
    }

    /// Attribution for a full trace. Never fails: faults become a zero heatmap.
    pub fn attribute(&self, trace: &GradientTrace) -> AttributionOutcome {
        match self.compute_heatmap(&trace.feature_map, &trace.gradients, trace.class_index) {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(class_index = trace.class_index, error = %e, "Grad-CAM++ failed, using zero heatmap");
                AttributionOutcome::degenerate(
                    Degeneracy::ComputationFault(e.to_string()),
                    self.output_width,
                    self.output_height,
                )
            }
        }
    }

    /// Heatmap at the configured output resolution.
    ///
    /// Missing gradients and an all-zero activation map are reported as
    /// [`AttributionOutcome::Degenerate`]; inconsistent shapes are errors.
    pub fn compute_heatmap(
        &self,
        feature_map: &Activations,
        gradients: &GradientPair,
        class_index: usize,
    ) -> Result<AttributionOutcome> {
        let Some((first, second)) = gradients.both() else {
            warn!(class_index, "gradient unavailable, returning zero heatmap");
            return Ok(AttributionOutcome::degenerate(
                Degeneracy::MissingGradient,
                self.output_width,
                self.output_height,
            ));
        };

        feature_map.validate()?;
        feature_map.ensure_same_shape(first)?;
        feature_map.ensure_same_shape(second)?;
        let [height, width, channels] = feature_map.shape();
        if height == 0 || width == 0 || channels == 0 {
            return Err(LesionError::ImageProcessing("feature map is empty".to_string()));
        }

        debug!(class_index, height, width, channels, "computing Grad-CAM++");

        let weights = channel_weights(feature_map, first, second);
        let mut cam = weighted_activation(feature_map, &weights);

        let max = cam.iter().copied().fold(0.0_f32, f32::max);
        if !max.is_finite() {
            return Err(LesionError::ImageProcessing(format!(
                "class-activation map is not finite (max {max})"
            )));
        }
        if max <= 0.0 {
            debug!(class_index, "class-activation map is all zero");
            return Ok(AttributionOutcome::degenerate(
                Degeneracy::ZeroActivation,
                self.output_width,
                self.output_height,
            ));
        }
        for v in &mut cam {
            *v /= max;
        }

        let heatmap = ScalarField::new(width as u32, height as u32, cam)?
            .resize(self.output_width, self.output_height);
        Ok(AttributionOutcome::Computed(heatmap))
    }
}

#[inline]
fn relu(v: f32) -> f32 {
    v.max(0.0)
}

/// `w_c = Σ_{y,x} α · relu(g2)` with `α = g1² / (2·g1² + g2·A)`.
fn channel_weights(feature_map: &Activations, first: &Activations, second: &Activations) -> Vec<f32> {
    let channels = feature_map.channels;
    let mut weights = vec![0.0_f32; channels];

    for ((chunk_a, chunk_g1), chunk_g2) in feature_map
        .data
        .chunks_exact(channels)
        .zip(first.data.chunks_exact(channels))
        .zip(second.data.chunks_exact(channels))
    {
        for c in 0..channels {
            let (a, g1, g2) = (chunk_a[c], chunk_g1[c], chunk_g2[c]);
            let numerator = g1 * g1;
            let mut denominator = 2.0 * g1 * g1 + g2 * a;
            if denominator == 0.0 {
                denominator = 1.0;
            }
            weights[c] += numerator / denominator * relu(g2);
        }
    }
    weights
}

/// `relu(Σ_c w_c · A_c)` per spatial location, row-major.
fn weighted_activation(feature_map: &Activations, weights: &[f32]) -> Vec<f32> {
    feature_map
        .data
        .chunks_exact(feature_map.channels)
        .map(|pixel| relu(pixel.iter().zip(weights).map(|(a, w)| a * w).sum()))
        .collect()
}
