use clap::{Parser, Subcommand};
use cli::{load_file, BatchConfig};
use coastline::{
    algorithms::{save_csv, write_csv},
    config::{BinarizeMethod, ContourField, DistanceMetric},
    io::{read_boundaries, read_raster, read_sample_points, save_samples_geojson},
    run_batch, AccuracyEvaluator, Pipeline, Provenance, ThresholdConfig,
};
use color_eyre::eyre::{eyre, Result};
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::{self, EnvFilter};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract the coastline of a single raster
    Extract {
        /// Water-index raster (GeoTIFF, PNG or JPEG)
        #[arg(short, long)]
        input: PathBuf,
        /// Output GeoJSON path
        #[arg(short, long)]
        output: PathBuf,
        /// Threshold configuration file (.toml or .json)
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Fixed binarization threshold instead of Otsu
        #[arg(long)]
        threshold: Option<f64>,
        /// Field the contours are traced on
        #[arg(long)]
        field: Option<ContourField>,
        /// Iso-value for the index field
        #[arg(long)]
        iso_value: Option<f64>,
        /// PAEK smoothing tolerance in map units
        #[arg(long)]
        smoothing: Option<f64>,
        /// Close shapes that touch the raster edge
        #[arg(long)]
        close_at_border: bool,
        /// Also write the contour lines here
        #[arg(long)]
        contours: Option<PathBuf>,
        #[arg(long, default_value = "")]
        country: String,
        #[arg(long, default_value = "0")]
        year: u16,
    },
    /// Process every tile named by a run configuration
    Batch {
        /// Path to the TOML or JSON run configuration
        #[arg(short, long)]
        config: PathBuf,
        /// Worker threads, overriding the configuration
        #[arg(long)]
        threads: Option<usize>,
    },
    /// Measure reference points against boundary GeoJSON
    Evaluate {
        /// Polygon or line GeoJSON
        #[arg(short, long)]
        boundaries: PathBuf,
        /// Point GeoJSON
        #[arg(short, long)]
        reference: PathBuf,
        /// Comma-separated ascending distance thresholds
        #[arg(long, value_delimiter = ',', default_value = "30,60,90,120,150")]
        thresholds: Vec<f64>,
        #[arg(long, default_value = "euclidean")]
        metric: DistanceMetric,
        /// Region label for the report rows
        #[arg(long, default_value = "reference")]
        region: String,
        /// CSV report path; printed to stdout when omitted
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Per-point GeoJSON with distances
        #[arg(long)]
        samples: Option<PathBuf>,
    },
    /// Print the JSON schema of the batch run configuration
    Schema {
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    color_eyre::install()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info"))
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Extract {
            input,
            output,
            config,
            threshold,
            field,
            iso_value,
            smoothing,
            close_at_border,
            contours,
            country,
            year,
        } => {
            let mut config: ThresholdConfig = match config {
                Some(path) => load_file(path)?,
                None => ThresholdConfig::default(),
            };
            if let Some(threshold) = threshold {
                config.binarize = BinarizeMethod::Fixed { threshold };
            }
            if let Some(field) = field {
                config.contour.field = field;
            }
            if iso_value.is_some() {
                config.contour.iso_value = iso_value;
            }
            if let Some(tolerance) = smoothing {
                config.smoothing_tolerance = tolerance;
            }
            config.contour.close_at_border |= close_at_border;
            let provenance = Provenance {
                tile_id: tile_id(&input),
                country,
                year,
            };
            extract(&input, &output, contours.as_deref(), &config, &provenance)?;
        }
        Commands::Batch { config, threads } => {
            let mut config = BatchConfig::from_file(&config)?;
            if threads.is_some() {
                config.threads = threads;
            }
            batch(&config)?;
        }
        Commands::Evaluate {
            boundaries,
            reference,
            thresholds,
            metric,
            region,
            output,
            samples,
        } => {
            let evaluator = AccuracyEvaluator::new(thresholds, metric)?;
            let lines = read_boundaries(&boundaries)?;
            let points = read_sample_points(&reference)?;
            info!(boundaries = lines.len(), points = points.len(), "evaluating");
            let report = evaluator.evaluate(region, points, &lines);
            match output {
                Some(path) => save_csv(&report.rows(), &path)?,
                None => write_csv(&report.rows(), std::io::stdout())?,
            }
            if let Some(path) = samples {
                save_samples_geojson(&report.samples, &path)?;
            }
        }
        Commands::Schema { output } => {
            let schema = schemars::schema_for!(BatchConfig);
            let text = serde_json::to_string_pretty(&schema)?;
            match output {
                Some(path) => std::fs::write(path, text)?,
                None => println!("{text}"),
            }
        }
    }

    Ok(())
}

fn tile_id(input: &Path) -> String {
    input
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("tile")
        .to_string()
}

fn extract(
    input: &Path,
    output: &Path,
    contours: Option<&Path>,
    config: &ThresholdConfig,
    provenance: &Provenance,
) -> Result<()> {
    let pipeline = Pipeline::from_config(config)?;
    info!("{}", pipeline.info());

    let raster = read_raster(input)?;
    let result = pipeline.process(&raster, provenance)?;
    for warning in &result.warnings {
        warn!(%warning, "tile warning");
    }

    result.save_geojson(output)?;
    if let Some(path) = contours {
        result.save_contours(path)?;
    }

    let typed = result.to_typed_geojson()?;
    let largest_area = typed
        .largest_feature()
        .and_then(|feature| feature.properties())
        .map(|props| props.area);
    info!(
        features = result.features.len(),
        with_holes = typed.features_with_holes().len(),
        area = result.total_area(),
        largest_area = ?largest_area,
        crs = typed.crs().unwrap_or("LOCAL"),
        output = %output.display(),
        "✅ Extraction completed!"
    );
    Ok(())
}

fn batch(config: &BatchConfig) -> Result<()> {
    let jobs = config.jobs()?;
    if jobs.is_empty() {
        return Err(eyre!("no tiles found under {}", config.root.display()));
    }

    let summary = run_batch(&config.layout(), &jobs, &config.batch_options())?;
    summary.save_json(config.summary_path())?;
    if !summary.accuracy.is_empty() {
        summary.save_accuracy_csv(config.accuracy_csv_path())?;
    }
    print!("{summary}");
    Ok(())
}
