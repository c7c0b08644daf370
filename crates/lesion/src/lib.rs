//! # Lesion Analysis Library
//!
//! Explainability and segmentation for dermoscopic skin-lesion images.
//!
//! ## Core Features
//!
//! - **Grad-CAM++ attribution** over a classifier feature map, with explicit
//!   degenerate outcomes instead of silent fallbacks
//! - **Colour-space segmentation**: k-means on the Lab a* channel
//! - **Mask clean-up**: hole filling and small-component removal
//! - **Shape descriptors**: lesion area share and isoperimetric border complexity
//! - **Overlays**: jet-colormapped composites encoded as PNG
//!
//! The classifier itself is external; implement [`Classifier`] to plug one in,
//! or replay a captured trace with [`RecordedClassifier`].
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use lesion::{AnalysisRequest, Pipeline, PipelineConfig, RecordedClassifier};
//!
//! let pipeline = Pipeline::from_config(&PipelineConfig::default())?;
//! let classifier = RecordedClassifier::from_json_file("trace.json")?;
//!
//! let request = AnalysisRequest::new(std::fs::read("lesion.jpg")?);
//! let report = pipeline.analyze(&classifier, &request)?;
//! println!("{}", serde_json::to_string_pretty(&report.to_response())?);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod algorithms;
pub mod classifier;
pub mod config;
pub mod diagnosis;
pub mod error;
pub mod io;
pub mod pipeline;
pub mod traits;
pub mod types;

pub use algorithms::*;
pub use classifier::{ClassifierInput, ForwardPass, Prediction, RawPrediction, RecordedClassifier};
pub use config::PipelineConfig;
pub use diagnosis::{Diagnosis, RiskAssessment, RiskLevel};
pub use error::{LesionError, Result};
pub use io::*;
pub use pipeline::{AnalysisReport, AnalysisRequest, Pipeline, SegmentationReport, builder::PipelineBuilder};
pub use traits::*;
pub use types::*;
