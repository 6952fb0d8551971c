pub mod geojson;
pub mod geotiff;

pub use self::geojson::{
    contours_to_geojson, parse_boundaries, parse_sample_points, read_boundaries, read_sample_points,
    samples_to_geojson, save_samples_geojson,
};
pub use self::geotiff::{read_geotiff, read_image, read_raster, write_geotiff, write_mask_geotiff};
