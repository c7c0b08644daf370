use std::{
    fs,
    path::{Path, PathBuf},
};

use lesion::{
    AnalysisRequest, AnalysisResponse, ErrorBody, LesionError, Pipeline, PipelineConfig,
    RecordedClassifier, SchemaKind, SegmentationResponse, json_schema, save_analysis,
    save_segmentation,
};
use thiserror::Error;
use tracing::info;

#[derive(Error, Debug)]
pub enum CliError {
    #[error(transparent)]
    Lesion(#[from] LesionError),
    #[error(transparent)]
    SerdeError(#[from] serde_json::Error),
    #[error(transparent)]
    IoError(#[from] std::io::Error),
    #[error("Input image not found: {0}")]
    MissingInput(PathBuf),
}

impl CliError {
    /// JSON failure body for errors that came from the analysis itself.
    pub fn error_body(&self) -> Option<ErrorBody> {
        match self {
            CliError::Lesion(e) => Some(ErrorBody::from(e)),
            _ => None,
        }
    }
}

/// Config from `path`, or the defaults when no path is given.
pub fn load_config(path: Option<&Path>) -> Result<PipelineConfig, CliError> {
    match path {
        Some(path) => Ok(PipelineConfig::from_file(path)?),
        None => Ok(PipelineConfig::default()),
    }
}

fn read_input(input: &Path) -> Result<Vec<u8>, CliError> {
    if !input.exists() {
        return Err(CliError::MissingInput(input.to_path_buf()));
    }
    Ok(fs::read(input)?)
}

/// Run the segmentation branch on one image file and save its artifacts.
pub fn segment_file(
    pipeline: &Pipeline,
    input: &Path,
    output_dir: &Path,
) -> Result<SegmentationResponse, CliError> {
    let bytes = read_input(input)?;
    let image = pipeline.prepare_image(&bytes)?;
    let report = pipeline.segment(&image)?;

    let saved = save_segmentation(output_dir, &report)?;
    info!(
        input = %input.display(),
        files = saved.files.len(),
        area_percentage = report.descriptors.area_percentage,
        border_complexity = report.descriptors.border_complexity,
        "segmentation saved"
    );
    Ok(SegmentationResponse::from(&report))
}

/// Run the full pipeline against a recorded classifier trace and save its artifacts.
pub fn analyze_file(
    pipeline: &Pipeline,
    trace: &Path,
    input: &Path,
    class_index: Option<usize>,
    output_dir: &Path,
) -> Result<AnalysisResponse, CliError> {
    let classifier = RecordedClassifier::from_json_file(trace)?;
    let request = AnalysisRequest {
        image_bytes: read_input(input)?,
        class_index,
    };
    let report = pipeline.analyze(&classifier, &request)?;

    let saved = save_analysis(output_dir, &report)?;
    info!(
        input = %input.display(),
        files = saved.files.len(),
        label = %report.diagnosis.label,
        attribution = report.attribution.status(),
        "analysis saved"
    );
    Ok(report.to_response())
}

pub fn schema_json(kind: SchemaKind) -> Result<String, CliError> {
    Ok(serde_json::to_string_pretty(&json_schema(kind))?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};
    use imageproc::drawing::draw_filled_circle_mut;

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("lesion-cli-{}-{name}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn write_disc(dir: &Path) -> PathBuf {
        let mut image = RgbImage::new(224, 224);
        draw_filled_circle_mut(&mut image, (112, 112), 50, Rgb([255, 0, 0]));
        let path = dir.join("disc.png");
        image.save(&path).unwrap();
        path
    }

    #[test]
    fn test_default_config_without_path() {
        assert_eq!(load_config(None).unwrap(), PipelineConfig::default());
    }

    #[test]
    fn test_segment_file_writes_report() {
        let dir = scratch_dir("segment");
        let input = write_disc(&dir);
        let pipeline = Pipeline::from_config(&PipelineConfig::default()).unwrap();

        let response = segment_file(&pipeline, &input, &dir.join("out")).unwrap();
        assert!((response.shape_descriptors.area_percentage - 15.63).abs() < 0.3);
        assert!(dir.join("out").join("report.json").exists());
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_analyze_file_with_recorded_trace() {
        let dir = scratch_dir("analyze");
        let input = write_disc(&dir);
        let trace = dir.join("trace.json");
        fs::write(
            &trace,
            r#"{
                "layer": "out_relu",
                "class_index": 0,
                "prediction": [[0.82, 0.18]],
                "feature_map": {"height": 2, "width": 2, "channels": 1, "data": [0.0, 1.0, 0.5, 0.0]},
                "first_gradient": {"height": 2, "width": 2, "channels": 1, "data": [1.0, 1.0, 1.0, 1.0]},
                "second_gradient": {"height": 2, "width": 2, "channels": 1, "data": [0.2, 0.2, 0.2, 0.2]}
            }"#,
        )
        .unwrap();
        let pipeline = Pipeline::from_config(&PipelineConfig::default()).unwrap();

        let response = analyze_file(&pipeline, &trace, &input, None, &dir.join("out")).unwrap();
        assert_eq!(response.attribution.status, "computed");
        assert_eq!(response.diagnosis.label, "Melanoma");
        assert!(response.diagnosis.risk.is_some());
        assert!(dir.join("out").join("heatmap_overlay.png").exists());
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_missing_input_is_reported() {
        let pipeline = Pipeline::from_config(&PipelineConfig::default()).unwrap();
        let err = segment_file(&pipeline, Path::new("/nonexistent/lesion.png"), Path::new("/tmp")).unwrap_err();
        assert!(matches!(err, CliError::MissingInput(_)));
        assert!(err.error_body().is_none());
    }

    #[test]
    fn test_schema_json_is_valid_json() {
        let schema: serde_json::Value = serde_json::from_str(&schema_json(SchemaKind::Config).unwrap()).unwrap();
        assert!(schema["properties"].get("clustering").is_some());
    }
}
