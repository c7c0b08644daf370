use schemars::{JsonSchema, schema::RootSchema, schema_for};
use serde::{Deserialize, Serialize};

use crate::{
    config::PipelineConfig,
    diagnosis::Diagnosis,
    error::LesionError,
    pipeline::{AnalysisReport, SegmentationReport},
    types::ShapeDescriptors,
};

/// Wire response for one analyzed image
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResponse {
    #[schemars(description = "Base64 PNG of the Grad-CAM++ heatmap blended over the image")]
    pub heatmap_overlay: String,
    #[schemars(description = "Base64 PNG of the lesion mask blended over the image")]
    pub segmentation_overlay: String,
    #[schemars(description = "Base64 PNG of the image with everything but the lesion blacked out")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lesion_cutout: Option<String>,
    pub shape_descriptors: ShapeDescriptors,
    pub diagnosis: Diagnosis,
    pub attribution: AttributionSummary,
    pub image_dimensions: ImageDimensions,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AttributionSummary {
    #[schemars(description = "`computed`, or why the heatmap is all zero")]
    pub status: String,
    pub class_index: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ImageDimensions {
    pub width: u32,
    pub height: u32,
}

/// Segmentation-only response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SegmentationResponse {
    pub segmentation_overlay: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lesion_cutout: Option<String>,
    pub shape_descriptors: ShapeDescriptors,
}

/// Failure body; never accompanied by partial results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ErrorBody {
    pub error: String,
}

impl From<&LesionError> for ErrorBody {
    fn from(error: &LesionError) -> Self {
        Self {
            error: error.to_string(),
        }
    }
}

impl From<&SegmentationReport> for SegmentationResponse {
    fn from(report: &SegmentationReport) -> Self {
        Self {
            segmentation_overlay: report.overlay.to_base64(),
            lesion_cutout: report.cutout.as_ref().map(|c| c.to_base64()),
            shape_descriptors: report.descriptors,
        }
    }
}

impl From<&AnalysisReport> for AnalysisResponse {
    fn from(report: &AnalysisReport) -> Self {
        let (width, height) = report.heatmap_overlay.dimensions();
        Self {
            heatmap_overlay: report.heatmap_overlay.to_base64(),
            segmentation_overlay: report.segmentation.overlay.to_base64(),
            lesion_cutout: report.segmentation.cutout.as_ref().map(|c| c.to_base64()),
            shape_descriptors: report.segmentation.descriptors,
            diagnosis: report.diagnosis.clone(),
            attribution: AttributionSummary {
                status: report.attribution.status().to_string(),
                class_index: report.diagnosis.class_index,
            },
            image_dimensions: ImageDimensions { width, height },
        }
    }
}

impl AnalysisReport {
    pub fn to_response(&self) -> AnalysisResponse {
        AnalysisResponse::from(self)
    }
}

/// Schema documents the surrounding service publishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::EnumString, strum::EnumIter, strum::VariantNames)]
#[strum(serialize_all = "snake_case")]
pub enum SchemaKind {
    Response,
    Segmentation,
    Error,
    Config,
}

pub fn json_schema(kind: SchemaKind) -> RootSchema {
    match kind {
        SchemaKind::Response => schema_for!(AnalysisResponse),
        SchemaKind::Segmentation => schema_for!(SegmentationResponse),
        SchemaKind::Error => schema_for!(ErrorBody),
        SchemaKind::Config => schema_for!(PipelineConfig),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn test_error_body_shape() {
        let body = ErrorBody::from(&LesionError::EmptyImage);
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json, serde_json::json!({ "error": "Image has no pixels" }));
    }

    #[test]
    fn test_every_schema_is_an_object() {
        for kind in SchemaKind::iter() {
            let schema = serde_json::to_value(json_schema(kind)).unwrap();
            assert_eq!(schema["type"], "object", "{kind} schema");
        }
    }

    #[test]
    fn test_response_schema_uses_wire_names() {
        let schema = serde_json::to_value(json_schema(SchemaKind::Response)).unwrap();
        let properties = &schema["properties"];
        assert!(properties.get("heatmapOverlay").is_some());
        assert!(properties.get("segmentationOverlay").is_some());
        assert!(properties.get("shapeDescriptors").is_some());
    }

    #[test]
    fn test_schema_kind_parses() {
        assert_eq!("config".parse::<SchemaKind>().unwrap(), SchemaKind::Config);
    }
}
