use std::path::Path;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoastlineError {
    /// Missing or corrupt raster, unreadable georeferencing or CRS.
    #[error("Input error: {0}")]
    Input(String),

    /// A stage was handed data it cannot operate on.
    #[error("Precondition failed: {0}")]
    Precondition(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Failed to load image: {0}")]
    ImageLoad(#[from] image::ImageError),

    #[error("TIFF error: {0}")]
    Tiff(#[from] tiff::TiffError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("GeoJSON error: {0}")]
    GeoJson(#[from] geojson::Error),
}

impl CoastlineError {
    /// Whether the error stems from reading the tile's inputs rather than
    /// from processing them or writing products.
    pub fn is_input(&self) -> bool {
        matches!(self, Self::Input(_))
    }

    /// Reclassifies a read failure on `path` as an input error.
    pub fn into_input(self, path: &Path) -> Self {
        match self {
            Self::Input(_) => self,
            other => Self::Input(format!("{}: {other}", path.display())),
        }
    }
}

pub type Result<T> = std::result::Result<T, CoastlineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_failures_become_input_errors() {
        let io = CoastlineError::Io(std::io::Error::new(std::io::ErrorKind::NotFound, "gone"));
        assert!(!io.is_input());
        let input = io.into_input(Path::new("MDV/2020/reference/t1.geojson"));
        assert!(input.is_input());
        assert!(input.to_string().contains("MDV/2020/reference/t1.geojson: IO error: gone"));

        let already = CoastlineError::Input("bad crs".to_string()).into_input(Path::new("x.tif"));
        assert_eq!(already.to_string(), "Input error: bad crs");
        assert!(!CoastlineError::Precondition("two classes".to_string()).is_input());
    }
}
