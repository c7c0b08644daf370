//! The boundary with the external classifier.
//!
//! The core never runs a model. It asks a [`Classifier`] for one forward pass
//! and, for that same pass, the first- and second-order gradients of the chosen
//! class score with respect to a named intermediate layer.

use std::{fs, path::Path};

use image::RgbImage;
use serde::{Deserialize, Serialize};

use crate::{
    error::{LesionError, Result},
    traits::Classifier,
    types::{Activations, GradientPair},
};

/// `[1, height, width, 3]` float tensor with channels in RGB order, scaled to `[0, 1]`.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassifierInput {
    pub height: usize,
    pub width: usize,
    pub data: Vec<f32>,
}

impl ClassifierInput {
    pub fn from_image(image: &RgbImage) -> Self {
        let data = image.as_raw().iter().map(|&v| v as f32 / 255.0).collect();
        Self {
            height: image.height() as usize,
            width: image.width() as usize,
            data,
        }
    }

    pub fn shape(&self) -> [usize; 4] {
        [1, self.height, self.width, 3]
    }
}

/// Prediction exactly as the model emitted it.
///
/// Depending on the export, a model returns a plain tensor, a list of tensors,
/// or a tensor with a spurious singleton middle axis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawPrediction {
    Tensor { shape: Vec<usize>, values: Vec<f32> },
    Values(Vec<f32>),
    List(Vec<RawPrediction>),
}

impl RawPrediction {
    pub fn vector(values: Vec<f32>) -> Self {
        Self::Values(values)
    }

    /// Collapse lists by stacking their elements along a new leading axis.
    fn into_tensor(self) -> Result<(Vec<usize>, Vec<f32>)> {
        match self {
            Self::Tensor { shape, values } => {
                let expected: usize = shape.iter().product();
                if expected != values.len() {
                    return Err(LesionError::InvalidPrediction(format!(
                        "shape {:?} needs {} values, got {}",
                        shape,
                        expected,
                        values.len()
                    )));
                }
                Ok((shape, values))
            }
            Self::Values(values) => Ok((vec![values.len()], values)),
            Self::List(items) => {
                let count = items.len();
                let mut stacked_shape: Option<Vec<usize>> = None;
                let mut stacked = Vec::new();
                for item in items {
                    let (shape, values) = item.into_tensor()?;
                    match &stacked_shape {
                        Some(existing) if *existing != shape => {
                            return Err(LesionError::InvalidPrediction(format!(
                                "cannot stack prediction parts of shapes {:?} and {:?}",
                                existing, shape
                            )));
                        }
                        Some(_) => {}
                        None => stacked_shape = Some(shape),
                    }
                    stacked.extend(values);
                }
                let inner = stacked_shape.ok_or_else(|| {
                    LesionError::InvalidPrediction("empty prediction list".to_string())
                })?;
                let mut shape = Vec::with_capacity(inner.len() + 1);
                shape.push(count);
                shape.extend(inner);
                Ok((shape, stacked))
            }
        }
    }
}

/// Rank-1 class-score vector for a single example.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    scores: Vec<f32>,
}

impl Prediction {
    /// The one place where classifier output shapes are normalized.
    ///
    /// Lists are stacked, `[N, 1, C]` is squeezed to `[N, C]`, and the first
    /// example row is kept. The result is always rank-1 and non-empty.
    pub fn normalize(raw: RawPrediction) -> Result<Self> {
        let (mut shape, values) = raw.into_tensor()?;

        if shape.len() == 3 && shape[1] == 1 {
            shape.remove(1);
        }

        let scores = match shape.as_slice() {
            [_] => values,
            [rows, cols] if *rows > 0 => values[..*cols].to_vec(),
            other => {
                return Err(LesionError::InvalidPrediction(format!(
                    "expected a per-example score vector, got shape {:?}",
                    other
                )));
            }
        };

        if scores.is_empty() {
            return Err(LesionError::InvalidPrediction("prediction has no classes".to_string()));
        }
        Ok(Self { scores })
    }

    pub fn from_scores(scores: Vec<f32>) -> Result<Self> {
        Self::normalize(RawPrediction::vector(scores))
    }

    pub fn scores(&self) -> &[f32] {
        &self.scores
    }

    pub fn len(&self) -> usize {
        self.scores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }

    pub fn score(&self, class_index: usize) -> Option<f32> {
        self.scores.get(class_index).copied()
    }

    /// Index of the highest score; ties resolve to the lowest index.
    pub fn argmax(&self) -> usize {
        self.scores
            .iter()
            .enumerate()
            .fold((0, f32::NEG_INFINITY), |best, (i, &s)| if s > best.1 { (i, s) } else { best })
            .0
    }
}

/// Output of one forward pass.
#[derive(Debug, Clone, PartialEq)]
pub struct ForwardPass {
    pub layer: String,
    pub prediction: RawPrediction,
    pub feature_map: Activations,
}

/// Replays a forward/backward trace captured offline from a real model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordedClassifier {
    pub layer: String,
    pub class_index: usize,
    pub prediction: RawPrediction,
    pub feature_map: Activations,
    #[serde(default)]
    pub first_gradient: Option<Activations>,
    #[serde(default)]
    pub second_gradient: Option<Activations>,
}

impl RecordedClassifier {
    pub fn from_json(content: &str) -> Result<Self> {
        let recorded: RecordedClassifier = serde_json::from_str(content)?;
        recorded.feature_map.validate()?;
        for gradient in [&recorded.first_gradient, &recorded.second_gradient].into_iter().flatten() {
            recorded.feature_map.ensure_same_shape(gradient)?;
        }
        Ok(recorded)
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Self::from_json(&content)
    }
}

impl Classifier for RecordedClassifier {
    fn forward(&self, _input: &ClassifierInput, layer: &str) -> Result<ForwardPass> {
        if layer != self.layer {
            return Err(LesionError::Classifier(format!(
                "trace was recorded at layer '{}', not '{}'",
                self.layer, layer
            )));
        }
        Ok(ForwardPass {
            layer: self.layer.clone(),
            prediction: self.prediction.clone(),
            feature_map: self.feature_map.clone(),
        })
    }

    fn gradients(&self, pass: &ForwardPass, class_index: usize) -> Result<GradientPair> {
        if class_index != self.class_index {
            return Err(LesionError::Classifier(format!(
                "trace holds gradients for class {}, not {}",
                self.class_index, class_index
            )));
        }
        if pass.feature_map != self.feature_map {
            return Err(LesionError::Classifier(
                "forward pass does not belong to this trace".to_string(),
            ));
        }
        Ok(GradientPair {
            first: self.first_gradient.clone(),
            second: self.second_gradient.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rank_one_prediction_passes_through() {
        let p = Prediction::normalize(RawPrediction::vector(vec![0.1, 0.7, 0.2])).unwrap();
        assert_eq!(p.scores(), &[0.1, 0.7, 0.2]);
        assert_eq!(p.argmax(), 1);
    }

    #[test]
    fn test_batch_prediction_takes_first_row() {
        let raw = RawPrediction::Tensor {
            shape: vec![2, 2],
            values: vec![0.9, 0.1, 0.3, 0.7],
        };
        let p = Prediction::normalize(raw).unwrap();
        assert_eq!(p.scores(), &[0.9, 0.1]);
    }

    #[test]
    fn test_singleton_middle_axis_is_squeezed() {
        let raw = RawPrediction::Tensor {
            shape: vec![1, 1, 4],
            values: vec![0.1, 0.2, 0.6, 0.1],
        };
        let p = Prediction::normalize(raw).unwrap();
        assert_eq!(p.len(), 4);
        assert_eq!(p.argmax(), 2);
    }

    #[test]
    fn test_list_prediction_is_stacked() {
        let raw = RawPrediction::List(vec![RawPrediction::Tensor {
            shape: vec![1, 3],
            values: vec![0.2, 0.3, 0.5],
        }]);
        let p = Prediction::normalize(raw).unwrap();
        assert_eq!(p.scores(), &[0.2, 0.3, 0.5]);
    }

    #[test]
    fn test_nested_json_arrays_deserialize() {
        let raw: RawPrediction = serde_json::from_str("[[[0.25, 0.75]]]").unwrap();
        let p = Prediction::normalize(raw).unwrap();
        assert_eq!(p.scores(), &[0.25, 0.75]);
    }

    #[test]
    fn test_mismatched_list_is_rejected() {
        let raw = RawPrediction::List(vec![
            RawPrediction::vector(vec![0.1, 0.9]),
            RawPrediction::vector(vec![1.0]),
        ]);
        assert!(Prediction::normalize(raw).is_err());
        assert!(Prediction::normalize(RawPrediction::List(vec![])).is_err());
    }

    #[test]
    fn test_bad_shapes_are_rejected() {
        let wrong_count = RawPrediction::Tensor { shape: vec![2, 2], values: vec![0.0; 3] };
        assert!(Prediction::normalize(wrong_count).is_err());
        let rank_four = RawPrediction::Tensor { shape: vec![1, 1, 1, 2], values: vec![0.0; 2] };
        assert!(Prediction::normalize(rank_four).is_err());
        assert!(Prediction::from_scores(vec![]).is_err());
    }

    #[test]
    fn test_argmax_prefers_first_tie() {
        let p = Prediction::from_scores(vec![0.5, 0.5]).unwrap();
        assert_eq!(p.argmax(), 0);
    }

    #[test]
    fn test_input_is_scaled_to_unit_range() {
        let image = RgbImage::from_pixel(2, 3, image::Rgb([255, 0, 51]));
        let input = ClassifierInput::from_image(&image);
        assert_eq!(input.shape(), [1, 3, 2, 3]);
        assert_eq!(input.data[0], 1.0);
        assert_eq!(input.data[1], 0.0);
        assert!((input.data[2] - 0.2).abs() < 1e-6);
    }

    #[test]
    fn test_recorded_classifier_replays_trace() {
        let json = r#"{
            "layer": "out_relu",
            "class_index": 0,
            "prediction": [{"shape": [1, 2], "values": [0.8, 0.2]}],
            "feature_map": {"height": 1, "width": 2, "channels": 1, "data": [1.0, 2.0]},
            "first_gradient": {"height": 1, "width": 2, "channels": 1, "data": [0.5, 0.5]},
            "second_gradient": null
        }"#;
        let classifier = RecordedClassifier::from_json(json).unwrap();
        let input = ClassifierInput::from_image(&RgbImage::new(2, 2));

        let pass = classifier.forward(&input, "out_relu").unwrap();
        assert_eq!(Prediction::normalize(pass.prediction.clone()).unwrap().argmax(), 0);

        let gradients = classifier.gradients(&pass, 0).unwrap();
        assert!(gradients.first.is_some());
        assert!(gradients.second.is_none());

        assert!(classifier.forward(&input, "conv5").is_err());
        assert!(classifier.gradients(&pass, 1).is_err());
    }

    #[test]
    fn test_recorded_classifier_rejects_mismatched_gradient() {
        let json = r#"{
            "layer": "out_relu",
            "class_index": 0,
            "prediction": [0.5, 0.5],
            "feature_map": {"height": 1, "width": 2, "channels": 1, "data": [1.0, 2.0]},
            "first_gradient": {"height": 2, "width": 1, "channels": 1, "data": [0.5, 0.5]}
        }"#;
        assert!(RecordedClassifier::from_json(json).is_err());
    }
}
