//! Multi-tile runs over a `{root}/{country}/{year}/{stage}/{tile}.{ext}` tree.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use rayon::prelude::*;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, IntoStaticStr};
use tracing::{error, info, warn};

use crate::{
    algorithms::{save_csv, AccuracyEvaluator, AccuracyReport, ThresholdRow},
    config::{BinarizeMethod, ContourField, ThresholdConfig},
    error::{CoastlineError, Result},
    io::{read_raster, read_sample_points, save_samples_geojson, write_mask_geotiff},
    pipeline::Pipeline,
    types::{Provenance, TileWarning},
};

/// Identifies one tile of one country and year.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema)]
pub struct TileKey {
    pub country: String,
    pub year: u16,
    pub tile_id: String,
}

impl TileKey {
    pub fn new(country: impl Into<String>, year: u16, tile_id: impl Into<String>) -> Self {
        Self {
            country: country.into(),
            year,
            tile_id: tile_id.into(),
        }
    }

    pub fn provenance(&self) -> Provenance {
        Provenance {
            tile_id: self.tile_id.clone(),
            country: self.country.clone(),
            year: self.year,
        }
    }

    /// Rollup key shared by every tile of a country and year.
    pub fn region(&self) -> String {
        format!("{}_{}", self.country, self.year)
    }
}

impl fmt::Display for TileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.country, self.year, self.tile_id)
    }
}

/// Inputs and products of a tile, each with its own directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum Stage {
    /// Water-index raster.
    Index,
    Mask,
    Coastline,
    Contours,
    /// Reference points for accuracy checks.
    Reference,
    /// Reference points with their measured distances.
    Accuracy,
}

impl Stage {
    pub fn dir(self) -> &'static str {
        self.into()
    }

    pub fn extension(self) -> &'static str {
        match self {
            Stage::Index | Stage::Mask => "tif",
            Stage::Coastline | Stage::Contours | Stage::Reference | Stage::Accuracy => "geojson",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathLayout {
    pub root: PathBuf,
}

impl PathLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn resolve(&self, key: &TileKey, stage: Stage) -> PathBuf {
        self.root
            .join(&key.country)
            .join(key.year.to_string())
            .join(stage.dir())
            .join(format!("{}.{}", key.tile_id, stage.extension()))
    }

    /// Tiles with an index raster for a country and year, sorted by id.
    pub fn discover(&self, country: &str, year: u16) -> Result<Vec<TileKey>> {
        let dir = self.root.join(country).join(year.to_string()).join(Stage::Index.dir());
        if !dir.is_dir() {
            warn!(dir = %dir.display(), "no index directory");
            return Ok(Vec::new());
        }
        let mut keys = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            let is_tiff = path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| e.eq_ignore_ascii_case(Stage::Index.extension()));
            if let (true, Some(stem)) = (is_tiff, path.file_stem().and_then(|s| s.to_str())) {
                keys.push(TileKey::new(country, year, stem));
            }
        }
        keys.sort();
        Ok(keys)
    }
}

/// Hand-tuned settings for a subset of tiles. Unset selectors match
/// anything; unset settings leave the defaults alone.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct ThresholdOverride {
    pub country: Option<String>,
    pub year: Option<u16>,
    pub tile_id: Option<String>,

    pub binarize: Option<BinarizeMethod>,
    pub contour_field: Option<ContourField>,
    pub iso_value: Option<f64>,
    pub min_component_size: Option<usize>,
    pub smoothing_tolerance: Option<f64>,
}

impl ThresholdOverride {
    pub fn matches(&self, key: &TileKey) -> bool {
        self.country.as_ref().is_none_or(|c| *c == key.country)
            && self.year.is_none_or(|y| y == key.year)
            && self.tile_id.as_ref().is_none_or(|t| *t == key.tile_id)
    }

    pub fn apply(&self, config: &mut ThresholdConfig) {
        if let Some(binarize) = &self.binarize {
            config.binarize = binarize.clone();
        }
        if let Some(field) = self.contour_field {
            config.contour.field = field;
        }
        if let Some(iso) = self.iso_value {
            config.contour.iso_value = Some(iso);
        }
        if let Some(size) = self.min_component_size {
            config.min_component_size = size;
        }
        if let Some(tolerance) = self.smoothing_tolerance {
            config.smoothing_tolerance = tolerance;
        }
    }
}

/// One tile and the settings it runs with.
#[derive(Debug, Clone, PartialEq)]
pub struct TileJob {
    pub key: TileKey,
    pub config: ThresholdConfig,
}

impl TileJob {
    /// Applies every matching override in order; later entries win.
    pub fn resolve(key: TileKey, defaults: &ThresholdConfig, overrides: &[ThresholdOverride]) -> Self {
        let mut config = defaults.clone();
        for rule in overrides.iter().filter(|o| o.matches(&key)) {
            rule.apply(&mut config);
        }
        Self { key, config }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TileStatus {
    Success { features: usize },
    /// Degenerate or unreadable input. Degenerate tiles still get an
    /// empty coastline.
    Skipped { reason: String },
    Failed { reason: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct TileReport {
    pub key: TileKey,
    #[serde(flatten)]
    pub status: TileStatus,
    pub warnings: Vec<TileWarning>,
    #[serde(skip)]
    pub accuracy: Option<AccuracyReport>,
}

#[derive(Debug, Clone)]
pub struct BatchOptions {
    pub write_contours: bool,
    pub write_mask: bool,
    /// Evaluate tiles that have reference points.
    pub evaluate: bool,
    /// Worker threads; `None` uses every core.
    pub threads: Option<usize>,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            write_contours: false,
            write_mask: false,
            evaluate: true,
            threads: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchSummary {
    pub succeeded: usize,
    pub skipped: usize,
    pub failed: usize,
    pub tiles: Vec<TileReport>,
    /// Per-tile rows followed by one rollup per country and year.
    pub accuracy: Vec<ThresholdRow>,
}

impl BatchSummary {
    fn from_reports(tiles: Vec<TileReport>) -> Self {
        let count = |f: fn(&TileStatus) -> bool| tiles.iter().filter(|t| f(&t.status)).count();
        let succeeded = count(|s| matches!(s, TileStatus::Success { .. }));
        let skipped = count(|s| matches!(s, TileStatus::Skipped { .. }));
        let failed = count(|s| matches!(s, TileStatus::Failed { .. }));

        let mut accuracy = Vec::new();
        let mut regions: BTreeMap<String, Vec<AccuracyReport>> = BTreeMap::new();
        for tile in &tiles {
            if let Some(report) = &tile.accuracy {
                accuracy.extend(report.rows());
                regions.entry(tile.key.region()).or_default().push(report.clone());
            }
        }
        for (region, reports) in regions {
            match AccuracyReport::rollup(region.as_str(), &reports) {
                Ok(rollup) => accuracy.extend(rollup.rows()),
                Err(e) => warn!(%region, error = %e, "region rollup skipped"),
            }
        }

        Self {
            succeeded,
            skipped,
            failed,
            tiles,
            accuracy,
        }
    }

    pub fn total(&self) -> usize {
        self.tiles.len()
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn save_json<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        fs::write(path, self.to_json()?)?;
        Ok(())
    }

    pub fn save_accuracy_csv<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        save_csv(&self.accuracy, path)
    }
}

impl fmt::Display for BatchSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} tiles: {} succeeded, {} skipped, {} failed",
            self.total(),
            self.succeeded,
            self.skipped,
            self.failed
        )?;
        for tile in &self.tiles {
            match &tile.status {
                TileStatus::Success { .. } => {}
                TileStatus::Skipped { reason } => writeln!(f, "  skipped {}: {reason}", tile.key)?,
                TileStatus::Failed { reason } => writeln!(f, "  failed {}: {reason}", tile.key)?,
            }
        }
        Ok(())
    }
}

fn create_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    Ok(())
}

/// Runs one tile end to end and writes its products.
pub fn process_tile(layout: &PathLayout, job: &TileJob, options: &BatchOptions) -> Result<TileReport> {
    let key = &job.key;
    let pipeline = Pipeline::from_config(&job.config)?;
    let index = layout.resolve(key, Stage::Index);
    let raster = read_raster(&index).map_err(|e| e.into_input(&index))?;
    let coastline = pipeline.process(&raster, &key.provenance())?;

    let output = layout.resolve(key, Stage::Coastline);
    create_parent(&output)?;
    coastline.save_geojson(&output)?;
    if options.write_contours {
        let path = layout.resolve(key, Stage::Contours);
        create_parent(&path)?;
        coastline.save_contours(&path)?;
    }
    if let (true, Some(mask)) = (options.write_mask, &coastline.mask) {
        let path = layout.resolve(key, Stage::Mask);
        create_parent(&path)?;
        write_mask_geotiff(mask, &path)?;
    }

    let reference = layout.resolve(key, Stage::Reference);
    let accuracy = if options.evaluate && reference.is_file() {
        let evaluator = AccuracyEvaluator::from_config(&job.config.accuracy)?;
        let samples = read_sample_points(&reference).map_err(|e| e.into_input(&reference))?;
        let report = evaluator.evaluate(key.tile_id.as_str(), samples, &coastline.boundaries());
        let path = layout.resolve(key, Stage::Accuracy);
        create_parent(&path)?;
        save_samples_geojson(&report.samples, &path)?;
        Some(report)
    } else {
        None
    };

    let status = match coastline.warnings.iter().find(|w| matches!(w, TileWarning::Degenerate { .. })) {
        Some(warning) => TileStatus::Skipped {
            reason: warning.to_string(),
        },
        None => TileStatus::Success {
            features: coastline.features.len(),
        },
    };
    Ok(TileReport {
        key: key.clone(),
        status,
        warnings: coastline.warnings,
        accuracy,
    })
}

/// Processes tiles in parallel. A failing tile is recorded and never stops
/// the others; tiles whose inputs cannot be read are skipped.
pub fn run_batch(layout: &PathLayout, jobs: &[TileJob], options: &BatchOptions) -> Result<BatchSummary> {
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(options.threads.unwrap_or(0))
        .build()
        .map_err(|e| CoastlineError::Config(format!("cannot start worker pool: {e}")))?;

    info!(tiles = jobs.len(), root = %layout.root.display(), "batch started");
    let tiles: Vec<TileReport> = pool.install(|| {
        jobs.par_iter()
            .map(|job| match process_tile(layout, job, options) {
                Ok(report) => {
                    match &report.status {
                        TileStatus::Skipped { reason } => warn!(tile = %job.key, %reason, "tile skipped"),
                        _ => info!(tile = %job.key, "tile done"),
                    }
                    report
                }
                Err(e) => {
                    let reason = e.to_string();
                    let status = if e.is_input() {
                        warn!(tile = %job.key, %reason, "tile skipped");
                        TileStatus::Skipped { reason }
                    } else {
                        error!(tile = %job.key, %reason, "tile failed");
                        TileStatus::Failed { reason }
                    };
                    TileReport {
                        key: job.key.clone(),
                        status,
                        warnings: Vec::new(),
                        accuracy: None,
                    }
                }
            })
            .collect()
    });

    let summary = BatchSummary::from_reports(tiles);
    info!(
        succeeded = summary.succeeded,
        skipped = summary.skipped,
        failed = summary.failed,
        "batch finished"
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::write_geotiff;
    use crate::types::{Crs, GeoTransform, Raster};
    use tempfile::tempdir;

    fn block_tile(layout: &PathLayout, key: &TileKey, value: f32) {
        let mut raster = Raster::filled(12, 12, 0.0, GeoTransform::north_up(1000.0, 2000.0, 10.0, 10.0), Crs::epsg(32643));
        for r in 3..9 {
            for c in 3..9 {
                raster.set(r, c, value);
            }
        }
        let path = layout.resolve(key, Stage::Index);
        create_parent(&path).unwrap();
        write_geotiff(&raster, &path).unwrap();
    }

    fn fixed_config() -> ThresholdConfig {
        ThresholdConfig {
            binarize: BinarizeMethod::Fixed { threshold: 10.0 },
            ..Default::default()
        }
    }

    #[test]
    fn paths_follow_the_layout() {
        let layout = PathLayout::new("/data");
        let key = TileKey::new("MDV", 2020, "t07");
        assert_eq!(layout.resolve(&key, Stage::Index), PathBuf::from("/data/MDV/2020/index/t07.tif"));
        assert_eq!(
            layout.resolve(&key, Stage::Coastline),
            PathBuf::from("/data/MDV/2020/coastline/t07.geojson")
        );
        assert_eq!("accuracy".parse::<Stage>().unwrap(), Stage::Accuracy);
    }

    #[test]
    fn discovery_lists_index_rasters() {
        let dir = tempdir().unwrap();
        let layout = PathLayout::new(dir.path());
        block_tile(&layout, &TileKey::new("TON", 2018, "b"), 50.0);
        block_tile(&layout, &TileKey::new("TON", 2018, "a"), 50.0);
        fs::write(dir.path().join("TON/2018/index/notes.txt"), "x").unwrap();

        let keys = layout.discover("TON", 2018).unwrap();
        let ids: Vec<&str> = keys.iter().map(|k| k.tile_id.as_str()).collect();
        assert_eq!(ids, ["a", "b"]);
        assert!(layout.discover("TON", 1999).unwrap().is_empty());
    }

    #[test]
    fn later_overrides_win() {
        let overrides = vec![
            ThresholdOverride {
                year: Some(2020),
                iso_value: Some(0.2),
                ..Default::default()
            },
            ThresholdOverride {
                country: Some("MDV".to_string()),
                tile_id: Some("t07".to_string()),
                iso_value: Some(0.35),
                contour_field: Some(ContourField::Index),
                ..Default::default()
            },
        ];
        let job = TileJob::resolve(TileKey::new("MDV", 2020, "t07"), &ThresholdConfig::default(), &overrides);
        assert_eq!(job.config.contour.iso_value, Some(0.35));
        assert_eq!(job.config.contour.field, ContourField::Index);

        let other = TileJob::resolve(TileKey::new("MDV", 2020, "t08"), &ThresholdConfig::default(), &overrides);
        assert_eq!(other.config.contour.iso_value, Some(0.2));
        assert_eq!(other.config.contour.field, ContourField::Mask);

        let untouched = TileJob::resolve(TileKey::new("FJI", 2019, "t07"), &ThresholdConfig::default(), &overrides);
        assert_eq!(untouched.config, ThresholdConfig::default());
    }

    #[test]
    fn batch_records_every_tile_status() {
        let dir = tempdir().unwrap();
        let layout = PathLayout::new(dir.path());
        let good = TileKey::new("MDV", 2020, "good");
        let flat = TileKey::new("MDV", 2020, "flat");
        let broken = TileKey::new("MDV", 2020, "broken");
        block_tile(&layout, &good, 50.0);
        block_tile(&layout, &flat, 0.0);
        let broken_path = layout.resolve(&broken, Stage::Index);
        fs::write(&broken_path, b"not a tiff").unwrap();

        let reference = layout.resolve(&good, Stage::Reference);
        create_parent(&reference).unwrap();
        // Block spans x 1030..1090; the first point sits 20 m west of it.
        fs::write(
            &reference,
            r#"{"type": "FeatureCollection", "features": [
                {"type": "Feature", "id": "near", "properties": {},
                 "geometry": {"type": "Point", "coordinates": [1010.0, 1940.0]}},
                {"type": "Feature", "id": "far", "properties": {},
                 "geometry": {"type": "Point", "coordinates": [5000.0, 1940.0]}}
            ]}"#,
        )
        .unwrap();

        let jobs: Vec<TileJob> = [good.clone(), flat.clone(), broken.clone()]
            .into_iter()
            .map(|key| TileJob::resolve(key, &fixed_config(), &[]))
            .collect();
        let options = BatchOptions {
            write_contours: true,
            write_mask: true,
            threads: Some(2),
            ..Default::default()
        };
        let summary = run_batch(&layout, &jobs, &options).unwrap();

        assert_eq!((summary.succeeded, summary.skipped, summary.failed), (1, 2, 0));
        assert!(layout.resolve(&good, Stage::Coastline).is_file());
        assert!(layout.resolve(&good, Stage::Contours).is_file());
        assert!(layout.resolve(&good, Stage::Mask).is_file());
        assert!(!layout.resolve(&flat, Stage::Mask).exists(), "degenerate tiles have no mask");
        assert!(layout.resolve(&good, Stage::Accuracy).is_file());
        assert!(layout.resolve(&flat, Stage::Coastline).is_file(), "degenerate tiles still get output");
        assert!(!layout.resolve(&broken, Stage::Coastline).exists());

        let tile_rows: Vec<&ThresholdRow> = summary.accuracy.iter().filter(|r| r.region == "good").collect();
        assert_eq!(tile_rows.len(), 5);
        assert!(tile_rows.iter().all(|r| r.matched == 1 && r.total == 2));
        assert!(summary.accuracy.iter().any(|r| r.region == "MDV_2020"));

        let text = summary.to_string();
        assert!(text.starts_with("3 tiles: 1 succeeded, 2 skipped, 0 failed"));
        assert!(text.contains("skipped MDV/2020/broken: Input error:"));

        let json: serde_json::Value = serde_json::from_str(&summary.to_json().unwrap()).unwrap();
        assert_eq!(json["tiles"][0]["status"], "success");
        assert_eq!(json["tiles"][2]["status"], "skipped");
    }

    #[test]
    fn missing_raster_skips_the_tile() {
        let dir = tempdir().unwrap();
        let layout = PathLayout::new(dir.path());
        let present = TileKey::new("WSM", 2019, "t1");
        let missing = TileKey::new("WSM", 2019, "t2");
        block_tile(&layout, &present, 50.0);

        let jobs: Vec<TileJob> = [present, missing.clone()]
            .into_iter()
            .map(|key| TileJob::resolve(key, &fixed_config(), &[]))
            .collect();
        let summary = run_batch(&layout, &jobs, &BatchOptions::default()).unwrap();

        assert_eq!((summary.succeeded, summary.skipped, summary.failed), (1, 1, 0));
        let report = &summary.tiles[1];
        assert_eq!(report.key, missing);
        assert!(matches!(
            &report.status,
            TileStatus::Skipped { reason } if reason.contains("cannot open")
        ));
    }

    #[test]
    fn unreadable_reference_points_skip_the_tile() {
        let dir = tempdir().unwrap();
        let layout = PathLayout::new(dir.path());
        let key = TileKey::new("WSM", 2019, "t1");
        block_tile(&layout, &key, 50.0);
        let reference = layout.resolve(&key, Stage::Reference);
        create_parent(&reference).unwrap();
        fs::write(&reference, "not geojson").unwrap();

        let summary = run_batch(&layout, &[TileJob::resolve(key, &fixed_config(), &[])], &BatchOptions::default()).unwrap();
        assert_eq!(summary.skipped, 1);
        assert!(summary.accuracy.is_empty());
    }

    #[test]
    fn invalid_tile_config_fails_only_that_tile() {
        let dir = tempdir().unwrap();
        let layout = PathLayout::new(dir.path());
        let key = TileKey::new("KIR", 2021, "t1");
        block_tile(&layout, &key, 50.0);
        let mut config = fixed_config();
        config.block_size = 0;

        let summary = run_batch(&layout, &[TileJob { key, config }], &BatchOptions::default()).unwrap();
        assert_eq!((summary.skipped, summary.failed), (0, 1));
        assert!(summary.accuracy.is_empty());
    }
}
