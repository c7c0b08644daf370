use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use strum::{Display, IntoStaticStr};

use crate::{
    classifier::Prediction,
    config::DiagnosisConfig,
    error::{LesionError, Result},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Display, IntoStaticStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RiskLevel {
    High,
    Moderate,
    Low,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RiskAssessment {
    pub level: RiskLevel,
    /// Probability of the configured risk class.
    pub probability: f32,
    pub message: String,
}

impl RiskAssessment {
    pub fn from_probability(probability: f32, config: &DiagnosisConfig) -> Self {
        let (level, message) = if probability > config.high_risk_threshold {
            (RiskLevel::High, &config.messages.high)
        } else if probability > config.moderate_risk_threshold {
            (RiskLevel::Moderate, &config.messages.moderate)
        } else {
            (RiskLevel::Low, &config.messages.low)
        };
        Self {
            level,
            probability,
            message: message.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClassProbability {
    pub label: String,
    pub probability: f32,
}

/// Classification summary attached to every analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Diagnosis {
    /// Class the heatmap explains.
    pub class_index: usize,
    pub label: String,
    /// Score of the predicted class.
    pub confidence: f32,
    pub probabilities: Vec<ClassProbability>,
    /// Absent when the prediction has no risk class.
    pub risk: Option<RiskAssessment>,
}

impl Diagnosis {
    /// Summarize `prediction`, explaining `class_index` or the argmax when none is given.
    pub fn new(prediction: &Prediction, class_index: Option<usize>, config: &DiagnosisConfig) -> Result<Self> {
        let class_index = class_index.unwrap_or_else(|| prediction.argmax());
        let confidence = prediction.score(class_index).ok_or(LesionError::InvalidClassIndex {
            index: class_index,
            classes: prediction.len(),
        })?;

        let probabilities = prediction
            .scores()
            .iter()
            .enumerate()
            .map(|(i, &probability)| ClassProbability {
                label: label_for(config, i),
                probability,
            })
            .collect();

        let risk = prediction
            .score(config.risk_class)
            .map(|p| RiskAssessment::from_probability(p, config));

        Ok(Self {
            class_index,
            label: label_for(config, class_index),
            confidence,
            probabilities,
            risk,
        })
    }
}

fn label_for(config: &DiagnosisConfig, class_index: usize) -> String {
    config
        .labels
        .get(class_index)
        .cloned()
        .unwrap_or_else(|| format!("class_{class_index}"))
}
