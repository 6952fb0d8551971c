use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, IntoStaticStr, VariantNames};

use crate::error::{CoastlineError, Result};

/// Speckle suppression ahead of binarization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct NoiseConfig {
    /// Side of the square neighbourhood, odd.
    #[schemars(range(min = 1))]
    pub window_size: usize,
    /// Pixels whose neighbourhood never reaches this value are zeroed.
    pub max_threshold: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum BinarizeMethod {
    /// Threshold chosen per tile by maximizing between-class variance.
    #[default]
    Otsu,
    /// Caller-supplied threshold in raster units; foreground is `value > threshold`.
    Fixed { threshold: f64 },
}

/// Which field the contour extractor interpolates.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq,
    Serialize, Deserialize, JsonSchema,
    Display, EnumString, VariantNames, IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ContourField {
    /// The cleaned binary mask, contoured half way between its two values.
    #[default]
    Mask,
    /// The index raster, constrained to the cleaned mask's topology.
    Index,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct ContourConfig {
    pub field: ContourField,
    /// Iso-value for the `index` field; falls back to the binarization threshold.
    pub iso_value: Option<f64>,
    /// Pad the tile with background so edge-touching shapes close.
    pub close_at_border: bool,
}

impl Default for ContourConfig {
    fn default() -> Self {
        Self {
            field: ContourField::Mask,
            iso_value: None,
            close_at_border: false,
        }
    }
}

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq,
    Serialize, Deserialize, JsonSchema,
    Display, EnumString, VariantNames, IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PartMode {
    /// One polygon per feature.
    #[default]
    SinglePart,
    /// Parts are kept together; with `dissolve` the tile yields one feature.
    MultiPart,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct PolygonizeConfig {
    pub part_mode: PartMode,
    /// Union faces that share boundaries.
    pub dissolve: bool,
    /// Keep faces whose interior lies on mask background.
    pub keep_background_faces: bool,
    /// Grid size, in map units, that nodes are snapped to.
    pub snap_tolerance: f64,
}

impl Default for PolygonizeConfig {
    fn default() -> Self {
        Self {
            part_mode: PartMode::SinglePart,
            dissolve: false,
            keep_background_faces: false,
            snap_tolerance: 1e-7,
        }
    }
}

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq,
    Serialize, Deserialize, JsonSchema,
    Display, EnumString, VariantNames, IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DistanceMetric {
    /// Planar distance in CRS units.
    #[default]
    Euclidean,
    /// Great-circle metres; coordinates must be longitude/latitude degrees.
    Haversine,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct AccuracyConfig {
    /// Ascending distance thresholds.
    pub thresholds: Vec<f64>,
    pub metric: DistanceMetric,
}

impl Default for AccuracyConfig {
    fn default() -> Self {
        Self {
            thresholds: vec![30.0, 60.0, 90.0, 120.0, 150.0],
            metric: DistanceMetric::Euclidean,
        }
    }
}

/// Numeric parameters for one tile's run. Read-only once a tile starts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct ThresholdConfig {
    pub noise: Option<NoiseConfig>,
    pub binarize: BinarizeMethod,
    /// Components smaller than this many pixels are removed.
    pub min_component_size: usize,
    /// Side `k` of the fully-foreground block a component must contain.
    #[schemars(range(min = 1))]
    pub block_size: usize,
    pub fill_holes: bool,
    /// Enclosed pockets larger than this many pixels stay background.
    pub max_hole_area: Option<usize>,
    pub contour: ContourConfig,
    pub polygonize: PolygonizeConfig,
    /// PAEK tolerance in map units; 0 disables smoothing.
    pub smoothing_tolerance: f64,
    pub accuracy: AccuracyConfig,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            noise: None,
            binarize: BinarizeMethod::Otsu,
            min_component_size: 4,
            block_size: 2,
            fill_holes: true,
            max_hole_area: None,
            contour: ContourConfig::default(),
            polygonize: PolygonizeConfig::default(),
            smoothing_tolerance: 0.0,
            accuracy: AccuracyConfig::default(),
        }
    }
}

impl ThresholdConfig {
    pub fn validate(&self) -> Result<()> {
        if let Some(noise) = &self.noise {
            validate_window(noise.window_size)?;
            if !noise.max_threshold.is_finite() {
                return Err(CoastlineError::Config(
                    "noise max_threshold must be finite".to_string(),
                ));
            }
        }
        if let BinarizeMethod::Fixed { threshold } = self.binarize {
            if !threshold.is_finite() {
                return Err(CoastlineError::Config(
                    "fixed threshold must be finite".to_string(),
                ));
            }
        }
        if self.block_size == 0 {
            return Err(CoastlineError::Config("block_size must be at least 1".to_string()));
        }
        if let Some(iso) = self.contour.iso_value {
            if !iso.is_finite() {
                return Err(CoastlineError::Config("iso_value must be finite".to_string()));
            }
        }
        let snap = self.polygonize.snap_tolerance;
        if !(snap.is_finite() && snap > 0.0) {
            return Err(CoastlineError::Config(
                "snap_tolerance must be positive".to_string(),
            ));
        }
        let tolerance = self.smoothing_tolerance;
        if !(tolerance.is_finite() && tolerance >= 0.0) {
            return Err(CoastlineError::Config(
                "smoothing_tolerance must be a non-negative number".to_string(),
            ));
        }
        validate_thresholds(&self.accuracy.thresholds)
    }
}

pub(crate) fn validate_window(window_size: usize) -> Result<()> {
    if window_size == 0 || window_size % 2 == 0 {
        return Err(CoastlineError::Config(format!(
            "window_size must be odd and at least 1, got {window_size}"
        )));
    }
    Ok(())
}

pub(crate) fn validate_thresholds(thresholds: &[f64]) -> Result<()> {
    if thresholds.is_empty() {
        return Err(CoastlineError::Config(
            "at least one distance threshold is required".to_string(),
        ));
    }
    if thresholds.iter().any(|t| !t.is_finite() || *t < 0.0) {
        return Err(CoastlineError::Config(
            "distance thresholds must be finite and non-negative".to_string(),
        ));
    }
    if thresholds.windows(2).any(|w| w[0] >= w[1]) {
        return Err(CoastlineError::Config(
            "distance thresholds must be strictly ascending".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        ThresholdConfig::default().validate().expect("default config validates");
    }

    #[test]
    fn even_window_is_rejected() {
        let config = ThresholdConfig {
            noise: Some(NoiseConfig {
                window_size: 4,
                max_threshold: 0.1,
            }),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(CoastlineError::Config(_))));
    }

    #[test]
    fn unsorted_thresholds_are_rejected() {
        let mut config = ThresholdConfig::default();
        config.accuracy.thresholds = vec![60.0, 30.0];
        assert!(config.validate().is_err());
    }

    #[test]
    fn deserializes_partial_toml_style_json() {
        let config: ThresholdConfig = serde_json::from_str(
            r#"{"binarize": {"method": "fixed", "threshold": 0.2}, "smoothing_tolerance": 15.0}"#,
        )
        .unwrap();
        assert_eq!(config.binarize, BinarizeMethod::Fixed { threshold: 0.2 });
        assert_eq!(config.block_size, 2);
        assert_eq!(config.accuracy.thresholds.len(), 5);
    }

    #[test]
    fn enum_options_parse_from_cli_strings() {
        assert_eq!("index".parse::<ContourField>().unwrap(), ContourField::Index);
        assert_eq!("multi_part".parse::<PartMode>().unwrap(), PartMode::MultiPart);
        assert_eq!(DistanceMetric::Haversine.to_string(), "haversine");
    }
}
