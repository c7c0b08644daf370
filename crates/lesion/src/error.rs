use thiserror::Error;

#[derive(Error, Debug)]
pub enum LesionError {
    #[error("Invalid image: {0}")]
    InvalidImage(#[from] image::ImageError),

    #[error("Image encoding error: {0}")]
    Encode(image::ImageError),

    #[error("Image has no pixels")]
    EmptyImage,

    #[error("Invalid prediction output: {0}")]
    InvalidPrediction(String),

    #[error("Shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        expected: [usize; 3],
        actual: [usize; 3],
    },

    #[error("Class index {index} is out of range for {classes} classes")]
    InvalidClassIndex { index: usize, classes: usize },

    #[error("Classifier error: {0}")]
    Classifier(String),

    #[error("Image processing error: {0}")]
    ImageProcessing(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Unsupported config format. Please use .toml or .json files")]
    UnsupportedConfigFormat,

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("TOML serialization error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl LesionError {
    /// Whether the failure was caused by the caller's input rather than the service.
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::InvalidImage(_) | Self::EmptyImage | Self::InvalidClassIndex { .. })
    }
}

pub type Result<T> = std::result::Result<T, LesionError>;

#[cfg(test)]
mod tests {
    use super::*;
    use image::error::{LimitError, LimitErrorKind};

    #[test]
    fn test_decode_failure_is_client_error() {
        let err: LesionError = image::load_from_memory(b"not an image").unwrap_err().into();
        assert!(matches!(err, LesionError::InvalidImage(_)));
        assert!(err.is_client_error());
    }

    #[test]
    fn test_encode_failure_is_server_error() {
        let err = LesionError::Encode(image::ImageError::Limits(LimitError::from_kind(
            LimitErrorKind::DimensionError,
        )));
        assert!(!err.is_client_error());
        assert!(err.to_string().starts_with("Image encoding error"));
    }
}
