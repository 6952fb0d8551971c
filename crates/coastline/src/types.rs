use std::fmt;

use geo::{Area, EuclideanLength};
use geo_types::{Coord, LineString, MultiPolygon, Polygon};
use image::{GrayImage, ImageBuffer, Luma};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::{CoastlineError, Result};

/// Foreground value of a [`BinaryMask`].
pub const FOREGROUND: u8 = 255;
/// Background value of a [`BinaryMask`].
pub const BACKGROUND: u8 = 0;

/// Affine pixel to map transform in GDAL coefficient order:
/// `x = c0 + col * c1 + row * c2`, `y = c3 + col * c4 + row * c5`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct GeoTransform(pub [f64; 6]);

impl GeoTransform {
    /// Pixel space: one map unit per pixel, rows growing downwards.
    pub const IDENTITY: GeoTransform = GeoTransform([0.0, 1.0, 0.0, 0.0, 0.0, 1.0]);

    /// North-up transform anchored at the upper-left corner of the raster.
    pub fn north_up(origin_x: f64, origin_y: f64, pixel_width: f64, pixel_height: f64) -> Self {
        Self([origin_x, pixel_width, 0.0, origin_y, 0.0, -pixel_height.abs()])
    }

    pub fn coefficients(&self) -> [f64; 6] {
        self.0
    }

    /// Map a fractional pixel position to map coordinates. `(0, 0)` is the
    /// upper-left corner of the upper-left pixel.
    pub fn apply(&self, col: f64, row: f64) -> Coord<f64> {
        let c = &self.0;
        Coord {
            x: c[0] + col * c[1] + row * c[2],
            y: c[3] + col * c[4] + row * c[5],
        }
    }

    /// Inverse transform, mapping map coordinates back to `(col, row)`.
    pub fn invert(&self) -> Option<GeoTransform> {
        let c = &self.0;
        let det = c[1] * c[5] - c[2] * c[4];
        if det.abs() < f64::EPSILON * (c[1].abs() + c[5].abs()).max(1.0) || !det.is_finite() {
            return None;
        }
        Some(GeoTransform([
            (c[2] * c[3] - c[5] * c[0]) / det,
            c[5] / det,
            -c[2] / det,
            (c[4] * c[0] - c[1] * c[3]) / det,
            -c[4] / det,
            c[1] / det,
        ]))
    }

    /// Area covered by one pixel, in squared map units.
    pub fn pixel_area(&self) -> f64 {
        let c = &self.0;
        (c[1] * c[5] - c[2] * c[4]).abs()
    }

    pub fn is_north_up(&self) -> bool {
        self.0[2] == 0.0 && self.0[4] == 0.0
    }
}

impl Default for GeoTransform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// Coordinate reference system identifier, e.g. `EPSG:32643`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub struct Crs(String);

impl Crs {
    pub fn epsg(code: u32) -> Self {
        Self(format!("EPSG:{code}"))
    }

    /// Placeholder for rasters without georeferencing (pixel space).
    pub fn local() -> Self {
        Self("LOCAL".to_string())
    }

    pub fn new(identifier: impl Into<String>) -> Self {
        Self(identifier.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn epsg_code(&self) -> Option<u32> {
        self.0
            .strip_prefix("EPSG:")
            .and_then(|code| code.parse().ok())
    }
}

impl Default for Crs {
    fn default() -> Self {
        Self::local()
    }
}

impl fmt::Display for Crs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Single-band georeferenced grid of samples, row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct Raster {
    width: usize,
    height: usize,
    data: Vec<f32>,
    transform: GeoTransform,
    crs: Crs,
    nodata: Option<f64>,
}

impl Raster {
    pub fn new(
        width: usize,
        height: usize,
        data: Vec<f32>,
        transform: GeoTransform,
        crs: Crs,
    ) -> Result<Self> {
        if width.checked_mul(height) != Some(data.len()) {
            return Err(CoastlineError::Input(format!(
                "raster of {width}x{height} cannot hold {} samples",
                data.len()
            )));
        }
        Ok(Self {
            width,
            height,
            data,
            transform,
            crs,
            nodata: None,
        })
    }

    /// A raster holding `value` everywhere.
    pub fn filled(width: usize, height: usize, value: f32, transform: GeoTransform, crs: Crs) -> Self {
        Self {
            width,
            height,
            data: vec![value; width * height],
            transform,
            crs,
            nodata: None,
        }
    }

    pub fn with_nodata(mut self, nodata: Option<f64>) -> Self {
        self.nodata = nodata;
        self
    }

    /// New raster sharing this one's georeferencing and nodata value.
    pub fn with_data(&self, data: Vec<f32>) -> Result<Raster> {
        Ok(Raster::new(self.width, self.height, data, self.transform, self.crs.clone())?
            .with_nodata(self.nodata))
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn transform(&self) -> &GeoTransform {
        &self.transform
    }

    pub fn crs(&self) -> &Crs {
        &self.crs
    }

    pub fn nodata(&self) -> Option<f64> {
        self.nodata
    }

    pub fn get(&self, row: usize, col: usize) -> f32 {
        self.data[row * self.width + col]
    }

    pub fn set(&mut self, row: usize, col: usize, value: f32) {
        self.data[row * self.width + col] = value;
    }

    /// Whether a sample takes part in statistics: finite and not nodata.
    pub fn is_valid(&self, value: f32) -> bool {
        if !value.is_finite() {
            return false;
        }
        match self.nodata {
            // Samples are stored as f32, so compare at that precision.
            Some(nodata) => value != nodata as f32,
            None => true,
        }
    }

    /// Minimum and maximum of the valid samples.
    pub fn valid_range(&self) -> Option<(f32, f32)> {
        self.data
            .iter()
            .copied()
            .filter(|&v| self.is_valid(v))
            .fold(None, |acc, v| match acc {
                None => Some((v, v)),
                Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
            })
    }

    /// True when every valid sample holds the same value (or none is valid).
    pub fn is_uniform(&self) -> bool {
        match self.valid_range() {
            Some((lo, hi)) => lo == hi,
            None => true,
        }
    }

    pub fn pixel_count(&self) -> usize {
        self.data.len()
    }
}

/// Two-valued raster: [`FOREGROUND`] marks candidate land/water pixels.
#[derive(Debug, Clone, PartialEq)]
pub struct BinaryMask {
    image: GrayImage,
    transform: GeoTransform,
    crs: Crs,
}

impl BinaryMask {
    pub fn new(image: GrayImage, transform: GeoTransform, crs: Crs) -> Self {
        Self { image, transform, crs }
    }

    /// Mask from a row-major foreground predicate.
    pub fn from_fn<F>(width: usize, height: usize, transform: GeoTransform, crs: Crs, mut is_foreground: F) -> Self
    where
        F: FnMut(usize, usize) -> bool,
    {
        let image = GrayImage::from_fn(width as u32, height as u32, |x, y| {
            if is_foreground(y as usize, x as usize) {
                Luma([FOREGROUND])
            } else {
                Luma([BACKGROUND])
            }
        });
        Self::new(image, transform, crs)
    }

    /// New mask sharing this one's georeferencing.
    pub fn with_image(&self, image: GrayImage) -> BinaryMask {
        BinaryMask::new(image, self.transform, self.crs.clone())
    }

    pub fn image(&self) -> &GrayImage {
        &self.image
    }

    pub fn into_image(self) -> GrayImage {
        self.image
    }

    pub fn width(&self) -> usize {
        self.image.width() as usize
    }

    pub fn height(&self) -> usize {
        self.image.height() as usize
    }

    pub fn transform(&self) -> &GeoTransform {
        &self.transform
    }

    pub fn crs(&self) -> &Crs {
        &self.crs
    }

    pub fn value(&self, row: usize, col: usize) -> u8 {
        self.image.get_pixel(col as u32, row as u32)[0]
    }

    pub fn is_foreground(&self, row: usize, col: usize) -> bool {
        self.value(row, col) == FOREGROUND
    }

    /// Sorted distinct pixel values.
    pub fn distinct_values(&self) -> Vec<u8> {
        let mut seen = [false; 256];
        for &v in self.image.as_raw() {
            seen[v as usize] = true;
        }
        (0..=255u8).filter(|&v| seen[v as usize]).collect()
    }

    /// A mask holding a single value carries no boundary.
    pub fn is_degenerate(&self) -> bool {
        self.distinct_values().len() < 2
    }

    pub fn foreground_count(&self) -> usize {
        self.image.as_raw().iter().filter(|&&v| v == FOREGROUND).count()
    }

    /// Mask values as a raster in the mask's georeferencing.
    pub fn to_raster(&self) -> Raster {
        Raster {
            width: self.width(),
            height: self.height(),
            data: self.image.as_raw().iter().map(|&v| v as f32).collect(),
            transform: self.transform,
            crs: self.crs.clone(),
            nodata: None,
        }
    }
}

/// Label image of 8-connected foreground regions; label 0 is background.
#[derive(Debug, Clone)]
pub struct LabeledComponents {
    pub labels: ImageBuffer<Luma<u32>, Vec<u32>>,
    pub count: u32,
}

impl LabeledComponents {
    pub fn label_at(&self, row: usize, col: usize) -> u32 {
        self.labels.get_pixel(col as u32, row as u32)[0]
    }
}

/// An isoline in map coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct Contour {
    pub line: LineString<f64>,
    pub closed: bool,
    pub crs: Crs,
}

impl Contour {
    pub fn len(&self) -> usize {
        self.line.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.line.0.is_empty()
    }

    pub fn length(&self) -> f64 {
        self.line.euclidean_length()
    }
}

/// Where a feature came from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub struct Provenance {
    pub tile_id: String,
    pub country: String,
    pub year: u16,
}

/// An extracted polygon, single- or multi-part, with provenance.
#[derive(Debug, Clone, PartialEq)]
pub struct PolygonFeature {
    pub geometry: MultiPolygon<f64>,
    pub provenance: Provenance,
}

impl PolygonFeature {
    pub fn new(polygon: Polygon<f64>, provenance: Provenance) -> Self {
        Self {
            geometry: MultiPolygon::new(vec![polygon]),
            provenance,
        }
    }

    pub fn area(&self) -> f64 {
        self.geometry.unsigned_area()
    }

    /// Summed length of every ring, holes included.
    pub fn perimeter(&self) -> f64 {
        self.geometry
            .0
            .iter()
            .map(|polygon| {
                polygon.exterior().euclidean_length()
                    + polygon
                        .interiors()
                        .iter()
                        .map(|ring| ring.euclidean_length())
                        .sum::<f64>()
            })
            .sum()
    }

    pub fn part_count(&self) -> usize {
        self.geometry.0.len()
    }

    pub fn hole_count(&self) -> usize {
        self.geometry.0.iter().map(|p| p.interiors().len()).sum()
    }

    /// Exterior rings of every part, the linework used for accuracy checks.
    pub fn exteriors(&self) -> impl Iterator<Item = &LineString<f64>> {
        self.geometry.0.iter().map(|p| p.exterior())
    }
}

/// Distance assigned to reference points that found no boundary within the
/// largest threshold.
pub const UNMATCHED_DISTANCE: f64 = -1.0;

/// A reference point under evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplePoint {
    pub id: String,
    pub x: f64,
    pub y: f64,
    /// Distance to the nearest boundary, or [`UNMATCHED_DISTANCE`].
    pub distance: f64,
    /// Nearest boundary position, when any boundary exists.
    pub nearest: Option<[f64; 2]>,
}

impl SamplePoint {
    pub fn new(id: impl Into<String>, x: f64, y: f64) -> Self {
        Self {
            id: id.into(),
            x,
            y,
            distance: UNMATCHED_DISTANCE,
            nearest: None,
        }
    }

    pub fn coord(&self) -> Coord<f64> {
        Coord { x: self.x, y: self.y }
    }

    pub fn is_matched(&self) -> bool {
        self.distance >= 0.0
    }
}

/// Non-fatal conditions raised while processing a tile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TileWarning {
    /// Uniform raster or mask; the remaining stages were skipped.
    Degenerate { stage: String, detail: String },
    /// Linework or rings discarded or rebuilt on the way to valid polygons.
    Topology {
        stage: String,
        discarded: usize,
        repaired: usize,
        detail: String,
    },
}

impl fmt::Display for TileWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Degenerate { stage, detail } => write!(f, "{stage}: degenerate input ({detail})"),
            Self::Topology {
                stage,
                discarded,
                repaired,
                detail,
            } => write!(
                f,
                "{stage}: {discarded} discarded, {repaired} repaired ({detail})"
            ),
        }
    }
}

/// Everything one tile's run produced.
#[derive(Debug, Clone)]
pub struct ComputedCoastline {
    pub features: Vec<PolygonFeature>,
    pub contours: Vec<Contour>,
    pub crs: Crs,
    pub transform: GeoTransform,
    pub width: usize,
    pub height: usize,
    /// Binarization threshold, in raster units.
    pub threshold: Option<f64>,
    /// Level the contours were traced at.
    pub iso_value: Option<f64>,
    /// Cleaned mask the contours were traced against; `None` for
    /// degenerate tiles.
    pub mask: Option<BinaryMask>,
    pub warnings: Vec<TileWarning>,
}

impl ComputedCoastline {
    /// Empty result for tiles that short-circuit.
    pub fn empty(raster: &Raster, warnings: Vec<TileWarning>) -> Self {
        Self {
            features: Vec::new(),
            contours: Vec::new(),
            crs: raster.crs().clone(),
            transform: *raster.transform(),
            width: raster.width(),
            height: raster.height(),
            threshold: None,
            iso_value: None,
            mask: None,
            warnings,
        }
    }

    pub fn is_degenerate(&self) -> bool {
        self.warnings
            .iter()
            .any(|w| matches!(w, TileWarning::Degenerate { .. }))
    }

    pub fn total_area(&self) -> f64 {
        self.features.iter().map(|f| f.area()).sum()
    }

    /// Boundary linework for accuracy evaluation.
    pub fn boundaries(&self) -> Vec<LineString<f64>> {
        self.features
            .iter()
            .flat_map(|f| f.exteriors().cloned())
            .collect()
    }
}
