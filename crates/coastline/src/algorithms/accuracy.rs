use std::io;
use std::path::Path;

use geo::{Closest, ClosestPoint, HaversineDistance};
use geo_types::{Coord, Line, LineString, Point};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    config::{validate_thresholds, AccuracyConfig, DistanceMetric},
    error::{CoastlineError, Result},
    types::{SamplePoint, UNMATCHED_DISTANCE},
};

/// One line of the accuracy table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdRow {
    /// Tile id, or a region key for rollups.
    pub region: String,
    pub threshold: f64,
    pub matched: usize,
    pub total: usize,
    pub fraction: f64,
}

/// Evaluated reference points for one tile or region.
#[derive(Debug, Clone, PartialEq)]
pub struct AccuracyReport {
    pub region: String,
    pub thresholds: Vec<f64>,
    pub samples: Vec<SamplePoint>,
}

impl AccuracyReport {
    /// Points whose boundary distance is within `threshold`.
    pub fn matched_at(&self, threshold: f64) -> usize {
        self.samples
            .iter()
            .filter(|s| s.is_matched() && s.distance <= threshold)
            .count()
    }

    pub fn rows(&self) -> Vec<ThresholdRow> {
        let total = self.samples.len();
        self.thresholds
            .iter()
            .map(|&threshold| {
                let matched = self.matched_at(threshold);
                ThresholdRow {
                    region: self.region.clone(),
                    threshold,
                    matched,
                    total,
                    fraction: if total == 0 { 0.0 } else { matched as f64 / total as f64 },
                }
            })
            .collect()
    }

    /// Pools the points of several reports evaluated with the same thresholds.
    pub fn rollup(region: impl Into<String>, reports: &[AccuracyReport]) -> Result<AccuracyReport> {
        let thresholds = reports
            .first()
            .map(|r| r.thresholds.clone())
            .unwrap_or_default();
        if reports.iter().any(|r| r.thresholds != thresholds) {
            return Err(CoastlineError::Config(
                "cannot roll up reports evaluated with different thresholds".to_string(),
            ));
        }
        Ok(AccuracyReport {
            region: region.into(),
            thresholds,
            samples: reports.iter().flat_map(|r| r.samples.iter().cloned()).collect(),
        })
    }
}

pub fn write_csv<W: io::Write>(rows: &[ThresholdRow], writer: W) -> Result<()> {
    let mut wtr = csv::Writer::from_writer(writer);
    for row in rows {
        wtr.serialize(row)?;
    }
    wtr.flush()?;
    Ok(())
}

pub fn save_csv<P: AsRef<Path>>(rows: &[ThresholdRow], path: P) -> Result<()> {
    let mut wtr = csv::Writer::from_path(path)?;
    for row in rows {
        wtr.serialize(row)?;
    }
    wtr.flush()?;
    Ok(())
}

/// Distance from reference points to extracted boundaries, classified
/// against ascending thresholds.
#[derive(Debug, Clone)]
pub struct AccuracyEvaluator {
    thresholds: Vec<f64>,
    metric: DistanceMetric,
}

impl AccuracyEvaluator {
    pub fn new(thresholds: Vec<f64>, metric: DistanceMetric) -> Result<Self> {
        validate_thresholds(&thresholds)?;
        Ok(Self { thresholds, metric })
    }

    pub fn from_config(config: &AccuracyConfig) -> Result<Self> {
        Self::new(config.thresholds.clone(), config.metric)
    }

    pub fn thresholds(&self) -> &[f64] {
        &self.thresholds
    }

    fn distance(&self, a: Coord<f64>, b: Coord<f64>) -> f64 {
        match self.metric {
            DistanceMetric::Euclidean => (a.x - b.x).hypot(a.y - b.y),
            DistanceMetric::Haversine => Point::from(a).haversine_distance(&Point::from(b)),
        }
    }

    /// Nearest boundary position and its distance.
    fn nearest(&self, p: Coord<f64>, segments: &[Line<f64>]) -> Option<(f64, Coord<f64>)> {
        let point = Point::from(p);
        let mut best: Option<(f64, Coord<f64>)> = None;
        for segment in segments {
            if let (DistanceMetric::Euclidean, Some((limit, _))) = (self.metric, best) {
                // Distance to the segment's bounding box bounds the distance to the segment.
                let dx = (segment.start.x.min(segment.end.x) - p.x)
                    .max(p.x - segment.start.x.max(segment.end.x))
                    .max(0.0);
                let dy = (segment.start.y.min(segment.end.y) - p.y)
                    .max(p.y - segment.start.y.max(segment.end.y))
                    .max(0.0);
                if dx.hypot(dy) >= limit {
                    continue;
                }
            }
            let candidate = match segment.closest_point(&point) {
                Closest::Intersection(q) | Closest::SinglePoint(q) => q.0,
                Closest::Indeterminate => continue,
            };
            let d = self.distance(p, candidate);
            if best.is_none_or(|(current, _)| d < current) {
                best = Some((d, candidate));
            }
        }
        best
    }

    /// Measures every point against the boundary linework. Points farther
    /// than the largest threshold, or in a tile without boundary, get
    /// [`UNMATCHED_DISTANCE`].
    pub fn evaluate(
        &self,
        region: impl Into<String>,
        mut samples: Vec<SamplePoint>,
        boundaries: &[LineString<f64>],
    ) -> AccuracyReport {
        let segments: Vec<Line<f64>> = boundaries.iter().flat_map(|l| l.lines()).collect();
        let max = self.thresholds.last().copied().unwrap_or(0.0);

        samples.par_iter_mut().for_each(|sample| {
            match self.nearest(sample.coord(), &segments) {
                Some((d, q)) => {
                    sample.nearest = Some([q.x, q.y]);
                    sample.distance = if d <= max { d } else { UNMATCHED_DISTANCE };
                }
                None => {
                    sample.nearest = None;
                    sample.distance = UNMATCHED_DISTANCE;
                }
            }
        });

        let report = AccuracyReport {
            region: region.into(),
            thresholds: self.thresholds.clone(),
            samples,
        };
        debug!(
            region = %report.region,
            points = report.samples.len(),
            segments = segments.len(),
            matched = report.matched_at(max),
            "accuracy evaluated"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn square(side: f64) -> LineString<f64> {
        LineString::from(vec![(0.0, 0.0), (side, 0.0), (side, side), (0.0, side), (0.0, 0.0)])
    }

    fn evaluator() -> AccuracyEvaluator {
        AccuracyEvaluator::from_config(&AccuracyConfig::default()).unwrap()
    }

    #[test]
    fn distances_and_nearest_positions_are_recorded() {
        let samples = vec![
            SamplePoint::new("below", 50.0, -20.0),
            SamplePoint::new("inside", 50.0, 45.0),
        ];
        let report = evaluator().evaluate("t1", samples, &[square(100.0)]);
        assert_relative_eq!(report.samples[0].distance, 20.0);
        assert_eq!(report.samples[0].nearest, Some([50.0, 0.0]));
        assert_relative_eq!(report.samples[1].distance, 45.0);
    }

    #[test]
    fn matches_are_monotonic_in_threshold() {
        let samples: Vec<SamplePoint> = (0..40)
            .map(|i| SamplePoint::new(i.to_string(), 50.0, -(i as f64) * 5.0))
            .collect();
        let report = evaluator().evaluate("t1", samples, &[square(100.0)]);
        let rows = report.rows();
        assert_eq!(rows.len(), 5);
        assert!(rows.windows(2).all(|w| w[0].matched <= w[1].matched));
        assert_eq!(rows[0].matched, 7, "0, 5, ... 30");
        assert_eq!(rows[4].matched, 31);
        assert!(rows.iter().all(|r| r.total == 40));
    }

    #[test]
    fn far_points_carry_the_sentinel() {
        let report = evaluator().evaluate("t1", vec![SamplePoint::new("far", 50.0, -500.0)], &[square(100.0)]);
        let sample = &report.samples[0];
        assert_eq!(sample.distance, UNMATCHED_DISTANCE);
        assert!(sample.nearest.is_some());
        assert_eq!(report.rows().iter().map(|r| r.matched).sum::<usize>(), 0);
    }

    #[test]
    fn tile_without_boundary_leaves_everything_unmatched() {
        let samples = vec![SamplePoint::new("a", 0.0, 0.0), SamplePoint::new("b", 1.0, 1.0)];
        let report = evaluator().evaluate("empty", samples, &[]);
        assert_eq!(report.samples.len(), 2, "points are never dropped");
        assert!(report.samples.iter().all(|s| s.distance == UNMATCHED_DISTANCE && s.nearest.is_none()));
        assert!(report.rows().iter().all(|r| r.matched == 0 && r.fraction == 0.0));
    }

    #[test]
    fn haversine_measures_metres() {
        let meridian = LineString::from(vec![(0.0, -1.0), (0.0, 1.0)]);
        let evaluator = AccuracyEvaluator::new(vec![50.0, 150.0], DistanceMetric::Haversine).unwrap();
        let report = evaluator.evaluate("geo", vec![SamplePoint::new("p", 0.001, 0.0)], &[meridian]);
        assert_relative_eq!(report.samples[0].distance, 111.19, epsilon = 0.5);
        assert_eq!(report.matched_at(50.0), 0);
        assert_eq!(report.matched_at(150.0), 1);
    }

    #[test]
    fn thresholds_must_ascend() {
        assert!(AccuracyEvaluator::new(vec![60.0, 30.0], DistanceMetric::Euclidean).is_err());
        assert!(AccuracyEvaluator::new(vec![], DistanceMetric::Euclidean).is_err());
    }

    #[test]
    fn rows_serialize_to_csv() {
        let report = evaluator().evaluate("t9", vec![SamplePoint::new("a", 5.0, -10.0)], &[square(10.0)]);
        let mut buffer = Vec::new();
        write_csv(&report.rows(), &mut buffer).unwrap();
        let text = String::from_utf8(buffer).unwrap();
        let mut lines = text.lines();
        assert_eq!(lines.next(), Some("region,threshold,matched,total,fraction"));
        assert_eq!(lines.next(), Some("t9,30.0,1,1,1.0"));
        assert_eq!(text.lines().count(), 6);
    }

    #[test]
    fn rollup_pools_tiles() {
        let e = evaluator();
        let a = e.evaluate("a", vec![SamplePoint::new("1", 5.0, -10.0)], &[square(10.0)]);
        let b = e.evaluate("b", vec![SamplePoint::new("2", 5.0, -100.0)], &[square(10.0)]);
        let region = AccuracyReport::rollup("MDV_2020", &[a, b]).unwrap();
        let rows = region.rows();
        assert_eq!(rows[0].total, 2);
        assert_eq!(rows[0].matched, 1);
        assert_relative_eq!(rows[0].fraction, 0.5);
        assert_eq!(rows[4].matched, 2);
    }
}
