pub mod builder;

use tracing::{info, info_span, warn};

use crate::{
    algorithms::{constrained_field, PaekSmoother, MASK_ISO_VALUE},
    config::{ContourField, ThresholdConfig},
    error::Result,
    traits::{Binarized, Binarizer, ContourExtractor, MaskProcessor, Polygonizer, RasterPreprocessor, ShapePostProcessor},
    types::{BinaryMask, ComputedCoastline, Provenance, Raster, TileWarning},
};

enum Cleaned {
    /// `processed` is the raster after preprocessing.
    Mask { processed: Raster, mask: BinaryMask, threshold: f64 },
    Degenerate { stage: &'static str, detail: String },
}

/// Staged coastline extraction for a single tile
pub struct Pipeline {
    preprocessors: Vec<Box<dyn RasterPreprocessor>>,
    binarizer: Box<dyn Binarizer>,
    mask_processors: Vec<Box<dyn MaskProcessor>>,
    contour_extractor: Box<dyn ContourExtractor>,
    contour_field: ContourField,
    iso_value: Option<f64>,
    polygonizer: Box<dyn Polygonizer>,
    postprocessors: Vec<Box<dyn ShapePostProcessor>>,
    contour_smoother: Option<PaekSmoother>,
}

impl Pipeline {
    /// Create a new pipeline builder
    pub fn builder() -> builder::PipelineBuilder {
        builder::PipelineBuilder::new()
    }

    pub fn from_config(config: &ThresholdConfig) -> Result<Self> {
        builder::PipelineBuilder::from_config(config)
    }

    fn short_circuit(raster: &Raster, stage: &str, detail: String) -> ComputedCoastline {
        let warning = TileWarning::Degenerate {
            stage: stage.to_string(),
            detail,
        };
        warn!(%warning, "tile short-circuited");
        ComputedCoastline::empty(raster, vec![warning])
    }

    /// Preprocessing, binarization and mask cleanup.
    fn clean_mask(&self, raster: &Raster) -> Result<Cleaned> {
        let mut processed = raster.clone();
        for preprocessor in &self.preprocessors {
            processed = preprocessor.preprocess(&processed)?;
        }

        let (mut mask, threshold) = match self.binarizer.binarize(&processed)? {
            Binarized::Mask { mask, threshold } => (mask, threshold),
            Binarized::Degenerate { reason, .. } => {
                return Ok(Cleaned::Degenerate {
                    stage: "binarizer",
                    detail: reason,
                });
            }
        };

        for processor in &self.mask_processors {
            mask = processor.process(&mask)?;
            if mask.is_degenerate() {
                return Ok(Cleaned::Degenerate {
                    stage: "mask cleanup",
                    detail: "mask is single-valued after cleanup".to_string(),
                });
            }
        }
        Ok(Cleaned::Mask {
            processed,
            mask,
            threshold,
        })
    }

    /// Run every stage over one raster. Degenerate inputs end early with an
    /// empty result carrying a warning; stage errors propagate.
    pub fn process(&self, raster: &Raster, provenance: &Provenance) -> Result<ComputedCoastline> {
        let _span = info_span!(
            "tile",
            tile = %provenance.tile_id,
            country = %provenance.country,
            year = provenance.year
        )
        .entered();

        let (processed, mask, threshold) = match self.clean_mask(raster)? {
            Cleaned::Mask {
                processed,
                mask,
                threshold,
            } => (processed, mask, threshold),
            Cleaned::Degenerate { stage, detail } => return Ok(Self::short_circuit(raster, stage, detail)),
        };

        let (field, iso_value) = match self.contour_field {
            ContourField::Mask => (mask.to_raster(), MASK_ISO_VALUE),
            ContourField::Index => {
                let iso = self.iso_value.unwrap_or(threshold);
                (constrained_field(&processed, &mask, iso)?, iso)
            }
        };
        let contours = self.contour_extractor.extract_contours(&field, iso_value)?;

        let polygonized = self.polygonizer.polygonize(&contours, Some(&mask))?;
        let mut warnings = polygonized.warnings;
        let mut features = polygonized.features;
        for postprocessor in &self.postprocessors {
            let out = postprocessor.process(&features)?;
            features = out.features;
            warnings.extend(out.warnings);
        }
        for feature in &mut features {
            feature.provenance = provenance.clone();
        }

        let contours = match &self.contour_smoother {
            Some(smoother) => smoother.smooth_contours(&contours),
            None => contours,
        };

        info!(
            features = features.len(),
            contours = contours.len(),
            threshold,
            iso_value,
            warnings = warnings.len(),
            "tile extracted"
        );

        Ok(ComputedCoastline {
            features,
            contours,
            crs: raster.crs().clone(),
            transform: *raster.transform(),
            width: raster.width(),
            height: raster.height(),
            threshold: Some(threshold),
            iso_value: Some(iso_value),
            mask: Some(mask),
            warnings,
        })
    }

    /// Get information about the pipeline configuration
    pub fn info(&self) -> String {
        format!(
            "Pipeline: {} preprocessors, 1 binarizer, {} mask processors, {} contour field, {} postprocessors",
            self.preprocessors.len(),
            self.mask_processors.len(),
            self.contour_field,
            self.postprocessors.len()
        )
    }
}
