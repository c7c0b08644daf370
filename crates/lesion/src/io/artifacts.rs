use std::{
    fs,
    path::{Path, PathBuf},
};

use tracing::debug;

use crate::{
    error::{LesionError, Result},
    io::response::{AnalysisResponse, SegmentationResponse},
    pipeline::{AnalysisReport, SegmentationReport},
};

pub const HEATMAP_FILE: &str = "heatmap_overlay.png";
pub const SEGMENTATION_FILE: &str = "segmentation_overlay.png";
pub const CUTOUT_FILE: &str = "lesion_cutout.png";
pub const MASK_FILE: &str = "lesion_mask.png";
pub const REPORT_FILE: &str = "report.json";

/// Paths written by [`save_analysis`] or [`save_segmentation`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SavedArtifacts {
    pub files: Vec<PathBuf>,
}

impl SavedArtifacts {
    fn write(&mut self, dir: &Path, name: &str, bytes: &[u8]) -> Result<()> {
        let path = dir.join(name);
        fs::write(&path, bytes)?;
        debug!(path = %path.display(), bytes = bytes.len(), "artifact written");
        self.files.push(path);
        Ok(())
    }
}

fn save_segmentation_images(
    saved: &mut SavedArtifacts,
    dir: &Path,
    report: &SegmentationReport,
) -> Result<()> {
    saved.write(dir, SEGMENTATION_FILE, report.overlay.as_bytes())?;
    if let Some(cutout) = &report.cutout {
        saved.write(dir, CUTOUT_FILE, cutout.as_bytes())?;
    }
    let mut mask_png = Vec::new();
    report
        .lesion_mask
        .as_image()
        .write_to(&mut std::io::Cursor::new(&mut mask_png), image::ImageFormat::Png)
        .map_err(LesionError::Encode)?;
    saved.write(dir, MASK_FILE, &mask_png)
}

/// Write PNG artifacts plus `report.json` for a full analysis.
pub fn save_analysis<P: AsRef<Path>>(dir: P, report: &AnalysisReport) -> Result<SavedArtifacts> {
    let dir = dir.as_ref();
    fs::create_dir_all(dir)?;

    let mut saved = SavedArtifacts::default();
    saved.write(dir, HEATMAP_FILE, report.heatmap_overlay.as_bytes())?;
    save_segmentation_images(&mut saved, dir, &report.segmentation)?;

    let response = AnalysisResponse::from(report);
    saved.write(dir, REPORT_FILE, serde_json::to_string_pretty(&response)?.as_bytes())?;
    Ok(saved)
}

/// Write PNG artifacts plus `report.json` for the segmentation branch.
pub fn save_segmentation<P: AsRef<Path>>(dir: P, report: &SegmentationReport) -> Result<SavedArtifacts> {
    let dir = dir.as_ref();
    fs::create_dir_all(dir)?;

    let mut saved = SavedArtifacts::default();
    save_segmentation_images(&mut saved, dir, report)?;

    let response = SegmentationResponse::from(report);
    saved.write(dir, REPORT_FILE, serde_json::to_string_pretty(&response)?.as_bytes())?;
    Ok(saved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::PipelineConfig, pipeline::Pipeline};
    use image::{Rgb, RgbImage};
    use imageproc::drawing::draw_filled_circle_mut;

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("lesion-artifacts-{}-{name}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        dir
    }

    #[test]
    fn test_segmentation_artifacts_are_written() {
        let mut image = RgbImage::new(96, 96);
        draw_filled_circle_mut(&mut image, (48, 48), 25, Rgb([220, 30, 40]));
        let pipeline = Pipeline::from_config(&PipelineConfig::default()).unwrap();
        let report = pipeline.segment(&image).unwrap();

        let dir = scratch_dir("segment");
        let saved = save_segmentation(&dir, &report).unwrap();
        let names: Vec<String> = saved
            .files
            .iter()
            .filter_map(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
            .collect();
        assert_eq!(names, vec![SEGMENTATION_FILE, CUTOUT_FILE, MASK_FILE, REPORT_FILE]);

        let overlay = image::open(dir.join(SEGMENTATION_FILE)).unwrap().to_rgb8();
        assert_eq!(overlay.dimensions(), (96, 96));
        let mask = image::open(dir.join(MASK_FILE)).unwrap().to_luma8();
        assert_eq!(mask.get_pixel(48, 48)[0], 255);
        assert_eq!(mask.get_pixel(0, 0)[0], 0);

        let json: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(dir.join(REPORT_FILE)).unwrap()).unwrap();
        assert!(json["shapeDescriptors"]["areaPercentage"].as_f64().unwrap() > 0.0);
        fs::remove_dir_all(&dir).unwrap();
    }
}
