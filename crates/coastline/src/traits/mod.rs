use crate::{
    error::Result,
    types::{BinaryMask, Contour, PolygonFeature, Raster, TileWarning},
};

/// Raster to raster filtering ahead of binarization.
pub trait RasterPreprocessor: Send + Sync {
    fn preprocess(&self, raster: &Raster) -> Result<Raster>;
}

/// Result of turning a raster into a mask.
#[derive(Debug, Clone)]
pub enum Binarized {
    /// Two-valued mask and the threshold applied, in raster units.
    Mask { mask: BinaryMask, threshold: f64 },
    /// Nothing to separate; the input raster is handed back unchanged.
    Degenerate { passthrough: Raster, reason: String },
}

impl Binarized {
    pub fn is_degenerate(&self) -> bool {
        matches!(self, Binarized::Degenerate { .. })
    }

    pub fn mask(&self) -> Option<&BinaryMask> {
        match self {
            Binarized::Mask { mask, .. } => Some(mask),
            Binarized::Degenerate { .. } => None,
        }
    }
}

/// Foreground/background separation.
pub trait Binarizer: Send + Sync {
    fn binarize(&self, raster: &Raster) -> Result<Binarized>;
}

/// Mask to mask cleanup (component filtering, hole filling).
pub trait MaskProcessor: Send + Sync {
    fn process(&self, mask: &BinaryMask) -> Result<BinaryMask>;
}

/// Isoline extraction from a scalar field.
pub trait ContourExtractor: Send + Sync {
    fn extract_contours(&self, field: &Raster, iso_value: f64) -> Result<Vec<Contour>>;
}

/// Polygons plus any topology warnings raised while building them.
#[derive(Debug, Clone, Default)]
pub struct Polygonized {
    pub features: Vec<PolygonFeature>,
    pub warnings: Vec<TileWarning>,
}

/// Face reconstruction from contour linework.
pub trait Polygonizer: Send + Sync {
    fn polygonize(&self, contours: &[Contour], mask: Option<&BinaryMask>) -> Result<Polygonized>;
}

/// Feature post-processing such as smoothing.
pub trait ShapePostProcessor: Send + Sync {
    fn process(&self, features: &[PolygonFeature]) -> Result<Polygonized>;
}
