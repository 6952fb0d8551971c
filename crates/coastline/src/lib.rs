//! # Coastline Extraction Library
//!
//! Turns single-band water-index rasters into sub-pixel coastline polygons
//! and checks them against reference points.
//!
//! ## Core Features
//!
//! - **Trait-based Architecture**: every stage is a trait with swappable implementations
//! - **Pipeline System**: noise suppression, binarization, mask cleanup, contouring,
//!   polygonization and smoothing composed by a fluent builder or a [`ThresholdConfig`]
//! - **Planar Polygonization**: faces rebuilt from the contour network, holes attached
//! - **Accuracy Evaluation**: distance of reference points to the extracted boundary
//! - **GeoTIFF and GeoJSON I/O**, plus a parallel batch driver over a tile tree
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use coastline::{io::read_raster, Pipeline, Provenance};
//!
//! let raster = read_raster("MDV/2020/index/t001.tif")?;
//! let pipeline = Pipeline::builder()
//!     .with_fixed_threshold(0.1)
//!     .with_component_filter(4, 2)
//!     .with_hole_filling(None)
//!     .build();
//!
//! let provenance = Provenance {
//!     tile_id: "t001".to_string(),
//!     country: "MDV".to_string(),
//!     year: 2020,
//! };
//! let result = pipeline.process(&raster, &provenance)?;
//! result.save_geojson("t001.geojson")?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## From Configuration
//!
//! ```rust,no_run
//! use coastline::{Pipeline, ThresholdConfig};
//!
//! let config: ThresholdConfig = serde_json::from_str(r#"{
//!     "binarize": { "method": "fixed", "threshold": 0.05 },
//!     "contour": { "field": "index", "close_at_border": true },
//!     "smoothing_tolerance": 15.0
//! }"#)?;
//! let pipeline = Pipeline::from_config(&config)?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod error;
pub mod types;
pub mod config;
pub mod traits;
pub mod algorithms;
pub mod pipeline;
pub mod io;
pub mod typed_geojson;
pub mod batch;

pub use error::{CoastlineError, Result};
pub use types::{
    BinaryMask, ComputedCoastline, Contour, Crs, GeoTransform, PolygonFeature, Provenance, Raster, SamplePoint,
    TileWarning,
};
pub use config::ThresholdConfig;
pub use traits::*;
pub use algorithms::{AccuracyEvaluator, AccuracyReport, ThresholdRow};
pub use pipeline::{builder::PipelineBuilder, Pipeline};
pub use batch::{run_batch, BatchOptions, BatchSummary, PathLayout, Stage, TileJob, TileKey, TileStatus};
