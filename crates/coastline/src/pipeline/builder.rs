use crate::{
    algorithms::{
        ComponentFilter, FixedThresholdBinarizer, HoleFiller, MarchingSquaresExtractor, NoiseSuppressor,
        OtsuBinarizer, PaekSmoother, PlanarPolygonizer,
    },
    config::{BinarizeMethod, ContourField, ThresholdConfig},
    error::Result,
    pipeline::Pipeline,
    traits::{Binarizer, ContourExtractor, MaskProcessor, Polygonizer, RasterPreprocessor, ShapePostProcessor},
};

/// Builder for creating extraction pipelines with a fluent API
pub struct PipelineBuilder {
    preprocessors: Vec<Box<dyn RasterPreprocessor>>,
    binarizer: Option<Box<dyn Binarizer>>,
    mask_processors: Vec<Box<dyn MaskProcessor>>,
    contour_extractor: Option<Box<dyn ContourExtractor>>,
    contour_field: ContourField,
    iso_value: Option<f64>,
    polygonizer: Option<Box<dyn Polygonizer>>,
    postprocessors: Vec<Box<dyn ShapePostProcessor>>,
    contour_smoother: Option<PaekSmoother>,
}

impl PipelineBuilder {
    pub fn new() -> Self {
        Self {
            preprocessors: Vec::new(),
            binarizer: None,
            mask_processors: Vec::new(),
            contour_extractor: None,
            contour_field: ContourField::Mask,
            iso_value: None,
            polygonizer: None,
            postprocessors: Vec::new(),
            contour_smoother: None,
        }
    }

    /// Add a raster filter ahead of binarization
    pub fn add_preprocessor<P>(mut self, preprocessor: P) -> Self
    where
        P: RasterPreprocessor + 'static,
    {
        self.preprocessors.push(Box::new(preprocessor));
        self
    }

    /// Set the binarizer (replaces any existing one)
    pub fn set_binarizer<B>(mut self, binarizer: B) -> Self
    where
        B: Binarizer + 'static,
    {
        self.binarizer = Some(Box::new(binarizer));
        self
    }

    /// Add a mask cleanup step; steps run in insertion order
    pub fn add_mask_processor<M>(mut self, processor: M) -> Self
    where
        M: MaskProcessor + 'static,
    {
        self.mask_processors.push(Box::new(processor));
        self
    }

    /// Set the contour extractor (replaces any existing one)
    pub fn set_contour_extractor<E>(mut self, extractor: E) -> Self
    where
        E: ContourExtractor + 'static,
    {
        self.contour_extractor = Some(Box::new(extractor));
        self
    }

    pub fn contour_field(mut self, field: ContourField) -> Self {
        self.contour_field = field;
        self
    }

    /// Iso-value for index-field contouring; `None` uses the binarization threshold.
    pub fn iso_value(mut self, iso_value: Option<f64>) -> Self {
        self.iso_value = iso_value;
        self
    }

    /// Set the polygonizer (replaces any existing one)
    pub fn set_polygonizer<P>(mut self, polygonizer: P) -> Self
    where
        P: Polygonizer + 'static,
    {
        self.polygonizer = Some(Box::new(polygonizer));
        self
    }

    /// Add a post-processor to the pipeline
    pub fn add_postprocessor<P>(mut self, postprocessor: P) -> Self
    where
        P: ShapePostProcessor + 'static,
    {
        self.postprocessors.push(Box::new(postprocessor));
        self
    }

    pub fn with_noise_suppression(self, window_size: usize, max_threshold: f64) -> Self {
        self.add_preprocessor(NoiseSuppressor {
            window_size,
            max_threshold,
        })
    }

    pub fn with_otsu(self) -> Self {
        self.set_binarizer(OtsuBinarizer)
    }

    pub fn with_fixed_threshold(self, threshold: f64) -> Self {
        self.set_binarizer(FixedThresholdBinarizer { threshold })
    }

    pub fn with_component_filter(self, min_size: usize, block_size: usize) -> Self {
        self.add_mask_processor(ComponentFilter { min_size, block_size })
    }

    pub fn with_hole_filling(self, max_hole_area: Option<usize>) -> Self {
        self.add_mask_processor(HoleFiller { max_hole_area })
    }

    /// PAEK smoothing of polygons and of the returned contour lines
    pub fn with_smoothing(mut self, tolerance: f64) -> Self {
        let smoother = PaekSmoother::new(tolerance);
        self.contour_smoother = Some(smoother.clone());
        self.add_postprocessor(smoother)
    }

    /// Build the pipeline with default components if not specified
    pub fn build(self) -> Pipeline {
        let binarizer = self.binarizer.unwrap_or_else(|| Box::new(OtsuBinarizer));

        let contour_extractor = self
            .contour_extractor
            .unwrap_or_else(|| Box::new(MarchingSquaresExtractor::default()));

        let polygonizer = self
            .polygonizer
            .unwrap_or_else(|| Box::new(PlanarPolygonizer::default()));

        Pipeline {
            preprocessors: self.preprocessors,
            binarizer,
            mask_processors: self.mask_processors,
            contour_extractor,
            contour_field: self.contour_field,
            iso_value: self.iso_value,
            polygonizer,
            postprocessors: self.postprocessors,
            contour_smoother: self.contour_smoother,
        }
    }

    /// Fixed threshold with the default component filter and hole filling
    pub fn build_simple(threshold: f64) -> Pipeline {
        Self::new()
            .with_fixed_threshold(threshold)
            .with_component_filter(4, 2)
            .with_hole_filling(None)
            .build()
    }

    /// Otsu threshold with the default component filter and hole filling
    pub fn build_otsu() -> Pipeline {
        Self::new()
            .with_otsu()
            .with_component_filter(4, 2)
            .with_hole_filling(None)
            .build()
    }

    /// Pipeline for one tile's [`ThresholdConfig`].
    pub fn from_config(config: &ThresholdConfig) -> Result<Pipeline> {
        config.validate()?;

        let mut builder = Self::new();
        if let Some(noise) = &config.noise {
            builder = builder.with_noise_suppression(noise.window_size, noise.max_threshold);
        }
        builder = match config.binarize {
            BinarizeMethod::Otsu => builder.with_otsu(),
            BinarizeMethod::Fixed { threshold } => builder.with_fixed_threshold(threshold),
        };
        builder = builder.with_component_filter(config.min_component_size, config.block_size);
        if config.fill_holes {
            builder = builder.with_hole_filling(config.max_hole_area);
        }
        builder = builder
            .contour_field(config.contour.field)
            .iso_value(config.contour.iso_value)
            .set_contour_extractor(MarchingSquaresExtractor {
                close_at_border: config.contour.close_at_border,
            })
            .set_polygonizer(PlanarPolygonizer::from(&config.polygonize));
        if config.smoothing_tolerance > 0.0 {
            let mut smoother = PaekSmoother::new(config.smoothing_tolerance);
            smoother.snap_tolerance = config.polygonize.snap_tolerance;
            builder.contour_smoother = Some(smoother.clone());
            builder = builder.add_postprocessor(smoother);
        }
        Ok(builder.build())
    }
}

impl Default for PipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}
