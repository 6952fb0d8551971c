use tracing::{debug, warn};

use crate::{
    config::validate_window,
    error::Result,
    traits::{Binarized, Binarizer, RasterPreprocessor},
    types::{BinaryMask, Raster},
};

/// Zeroes pixels whose `window_size` neighbourhood never reaches
/// `max_threshold`, removing isolated low-amplitude speckle.
#[derive(Debug, Clone)]
pub struct NoiseSuppressor {
    pub window_size: usize,
    pub max_threshold: f64,
}

impl NoiseSuppressor {
    pub fn new(window_size: usize, max_threshold: f64) -> Result<Self> {
        validate_window(window_size)?;
        Ok(Self {
            window_size,
            max_threshold,
        })
    }

    /// Neighbourhood maximum with the window clipped at the raster edge.
    /// Invalid samples never contribute.
    fn neighbourhood_max(&self, raster: &Raster) -> Vec<f32> {
        let (width, height) = (raster.width(), raster.height());
        let half = self.window_size / 2;
        let samples: Vec<f32> = raster
            .data()
            .iter()
            .map(|&v| if raster.is_valid(v) { v } else { f32::NEG_INFINITY })
            .collect();

        let mut rows = vec![f32::NEG_INFINITY; samples.len()];
        for row in 0..height {
            let line = &samples[row * width..(row + 1) * width];
            for col in 0..width {
                let lo = col.saturating_sub(half);
                let hi = (col + half).min(width - 1);
                rows[row * width + col] = line[lo..=hi]
                    .iter()
                    .copied()
                    .fold(f32::NEG_INFINITY, f32::max);
            }
        }

        let mut out = vec![f32::NEG_INFINITY; samples.len()];
        for col in 0..width {
            for row in 0..height {
                let lo = row.saturating_sub(half);
                let hi = (row + half).min(height - 1);
                out[row * width + col] = (lo..=hi)
                    .map(|r| rows[r * width + col])
                    .fold(f32::NEG_INFINITY, f32::max);
            }
        }
        out
    }
}

impl Default for NoiseSuppressor {
    fn default() -> Self {
        Self {
            window_size: 3,
            max_threshold: 0.0,
        }
    }
}

impl RasterPreprocessor for NoiseSuppressor {
    fn preprocess(&self, raster: &Raster) -> Result<Raster> {
        validate_window(self.window_size)?;
        if raster.pixel_count() == 0 {
            return raster.with_data(Vec::new());
        }

        let maxima = self.neighbourhood_max(raster);
        let mut suppressed = 0usize;
        let data = raster
            .data()
            .iter()
            .zip(&maxima)
            .map(|(&v, &m)| {
                if raster.is_valid(v) && (m as f64) < self.max_threshold {
                    suppressed += 1;
                    0.0
                } else {
                    v
                }
            })
            .collect();
        debug!(suppressed, window = self.window_size, "noise suppression");
        raster.with_data(data)
    }
}

/// Intensity bin that maximizes between-class variance; bins at or below
/// the returned level form the background class.
pub fn otsu_level(histogram: &[u64; 256]) -> u8 {
    let total: u64 = histogram.iter().sum();
    if total == 0 {
        return 0;
    }
    let total = total as f64;
    let sum: f64 = histogram
        .iter()
        .enumerate()
        .map(|(i, &count)| i as f64 * count as f64)
        .sum();

    let mut sum_b = 0.0;
    let mut weight_b = 0.0;
    let mut max_variance = 0.0;
    let mut level = 0u8;

    for (i, &count) in histogram.iter().enumerate() {
        weight_b += count as f64;
        if weight_b == 0.0 {
            continue;
        }
        let weight_f = total - weight_b;
        if weight_f == 0.0 {
            break;
        }

        sum_b += i as f64 * count as f64;
        let mean_b = sum_b / weight_b;
        let mean_f = (sum - sum_b) / weight_f;
        let variance = weight_b * weight_f * (mean_b - mean_f).powi(2);

        if variance > max_variance {
            max_variance = variance;
            level = i as u8;
        }
    }
    level
}

fn degenerate(raster: &Raster, reason: &str) -> Binarized {
    warn!(reason, "binarization produced a single class");
    Binarized::Degenerate {
        passthrough: raster.clone(),
        reason: reason.to_string(),
    }
}

/// Otsu thresholding over valid samples rescaled to 0..=255.
#[derive(Debug, Clone, Default)]
pub struct OtsuBinarizer;

impl Binarizer for OtsuBinarizer {
    fn binarize(&self, raster: &Raster) -> Result<Binarized> {
        let Some((lo, hi)) = raster.valid_range() else {
            return Ok(degenerate(raster, "no valid samples"));
        };
        if lo == hi {
            return Ok(degenerate(raster, "uniform raster"));
        }

        let scale = 255.0 / (hi as f64 - lo as f64);
        let bin = |v: f32| ((v as f64 - lo as f64) * scale).round().clamp(0.0, 255.0) as usize;

        let mut histogram = [0u64; 256];
        for &v in raster.data() {
            if raster.is_valid(v) {
                histogram[bin(v)] += 1;
            }
        }
        let level = otsu_level(&histogram) as usize;
        let threshold = lo as f64 + (level as f64 + 0.5) / scale;
        debug!(level, threshold, "otsu threshold");

        let mask = BinaryMask::from_fn(
            raster.width(),
            raster.height(),
            *raster.transform(),
            raster.crs().clone(),
            |row, col| {
                let v = raster.get(row, col);
                raster.is_valid(v) && bin(v) > level
            },
        );
        if mask.is_degenerate() {
            return Ok(degenerate(raster, "otsu level separates nothing"));
        }
        Ok(Binarized::Mask { mask, threshold })
    }
}

/// Thresholding at a caller-supplied value; foreground is `value > threshold`.
#[derive(Debug, Clone)]
pub struct FixedThresholdBinarizer {
    pub threshold: f64,
}

impl Binarizer for FixedThresholdBinarizer {
    fn binarize(&self, raster: &Raster) -> Result<Binarized> {
        if raster.is_uniform() {
            return Ok(degenerate(raster, "uniform raster"));
        }
        let mask = BinaryMask::from_fn(
            raster.width(),
            raster.height(),
            *raster.transform(),
            raster.crs().clone(),
            |row, col| {
                let v = raster.get(row, col);
                raster.is_valid(v) && v as f64 > self.threshold
            },
        );
        if mask.is_degenerate() {
            return Ok(degenerate(raster, "threshold separates nothing"));
        }
        Ok(Binarized::Mask {
            mask,
            threshold: self.threshold,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CoastlineError;
    use crate::types::{Crs, GeoTransform, BACKGROUND, FOREGROUND};

    fn raster(width: usize, height: usize, data: Vec<f32>) -> Raster {
        Raster::new(width, height, data, GeoTransform::IDENTITY, Crs::local()).unwrap()
    }

    #[test]
    fn isolated_speckle_is_suppressed() {
        let mut data = vec![0.0; 49];
        data[3 * 7 + 3] = 0.2; // weak isolated pixel
        data[0] = 0.9; // strong corner pixel
        data[1] = 0.1; // weak pixel next to the strong one
        let input = raster(7, 7, data);
        let out = NoiseSuppressor::new(3, 0.5).unwrap().preprocess(&input).unwrap();

        assert_eq!(out.get(3, 3), 0.0);
        assert_eq!(out.get(0, 0), 0.9);
        assert_eq!(out.get(0, 1), 0.1, "neighbour of a strong pixel passes through");
        assert_eq!(input.get(3, 3), 0.2, "input is left untouched");
    }

    #[test]
    fn window_must_be_odd() {
        assert!(matches!(NoiseSuppressor::new(2, 0.1), Err(CoastlineError::Config(_))));
        assert!(matches!(NoiseSuppressor::new(0, 0.1), Err(CoastlineError::Config(_))));
        let bad = NoiseSuppressor {
            window_size: 4,
            max_threshold: 0.0,
        };
        assert!(bad.preprocess(&raster(2, 2, vec![0.0; 4])).is_err());
    }

    #[test]
    fn window_of_one_tests_each_pixel_alone() {
        let input = raster(3, 1, vec![0.1, 0.6, 0.3]);
        let out = NoiseSuppressor::new(1, 0.5).unwrap().preprocess(&input).unwrap();
        assert_eq!(out.data(), &[0.0, 0.6, 0.0]);
    }

    #[test]
    fn nodata_is_preserved() {
        let input = raster(3, 1, vec![-1.0, 0.1, 0.1]).with_nodata(Some(-1.0));
        let out = NoiseSuppressor::new(3, 0.5).unwrap().preprocess(&input).unwrap();
        assert_eq!(out.data(), &[-1.0, 0.0, 0.0]);
        assert_eq!(out.nodata(), Some(-1.0));
    }

    #[test]
    fn otsu_level_splits_bimodal_histogram() {
        let mut histogram = [0u64; 256];
        histogram[20] = 100;
        histogram[30] = 50;
        histogram[200] = 80;
        histogram[220] = 40;
        let level = otsu_level(&histogram);
        assert!((30..200).contains(&level), "level {level}");
    }

    #[test]
    fn otsu_separates_two_populations() {
        let data: Vec<f32> = (0..100)
            .map(|i| if i % 10 < 4 { -0.4 } else { 0.35 })
            .collect();
        let out = OtsuBinarizer.binarize(&raster(10, 10, data)).unwrap();
        let Binarized::Mask { mask, threshold } = out else {
            panic!("expected a mask");
        };
        assert!(threshold > -0.4 && threshold < 0.35);
        assert_eq!(mask.foreground_count(), 60);
        assert_eq!(mask.distinct_values(), vec![BACKGROUND, FOREGROUND]);
    }

    #[test]
    fn uniform_raster_passes_through() {
        let input = raster(4, 4, vec![0.0; 16]);
        for binarizer in [
            Box::new(OtsuBinarizer) as Box<dyn Binarizer>,
            Box::new(FixedThresholdBinarizer { threshold: 10.0 }),
        ] {
            match binarizer.binarize(&input).unwrap() {
                Binarized::Degenerate { passthrough, .. } => assert_eq!(passthrough, input),
                Binarized::Mask { .. } => panic!("uniform input must not produce a mask"),
            }
        }
    }

    #[test]
    fn fixed_threshold_treats_nodata_as_background() {
        let input = raster(2, 2, vec![50.0, 5.0, -9999.0, 60.0]).with_nodata(Some(-9999.0));
        let out = FixedThresholdBinarizer { threshold: 10.0 }.binarize(&input).unwrap();
        let mask = out.mask().expect("mask");
        assert!(mask.is_foreground(0, 0));
        assert!(!mask.is_foreground(0, 1));
        assert!(!mask.is_foreground(1, 0));
        assert!(mask.is_foreground(1, 1));
    }

    #[test]
    fn threshold_above_every_sample_is_degenerate() {
        let input = raster(2, 1, vec![1.0, 2.0]);
        let out = FixedThresholdBinarizer { threshold: 10.0 }.binarize(&input).unwrap();
        assert!(out.is_degenerate());
    }
}
