use geo::InteriorPoint;
use geo_types::{Coord, LineString, MultiPolygon, Polygon};
use tracing::{debug, warn};

use crate::{
    algorithms::polygonize::{dissolve, polygonize_lines, rings_self_intersect},
    error::{CoastlineError, Result},
    traits::{Polygonized, ShapePostProcessor},
    types::{Contour, PolygonFeature, TileWarning},
};

/// Upper bound on samples inserted along one input segment.
const MAX_SAMPLES_PER_SEGMENT: usize = 16;
/// Kernel weight at the edge of the window is `exp(-KERNEL_SHARPNESS)`.
const KERNEL_SHARPNESS: f64 = 3.0;

/// PAEK-style smoothing of a vertex sequence.
///
/// The line is resampled along its arc length, then every sample moves to
/// the kernel-weighted mean of the samples within `tolerance` of arc
/// distance, clamped to a displacement of `tolerance`. Closed rings keep
/// their first vertex and stay closed; open lines keep both endpoints.
pub fn smooth_coords(coords: &[Coord<f64>], closed: bool, tolerance: f64) -> Vec<Coord<f64>> {
    if !(tolerance.is_finite() && tolerance > 0.0) || coords.len() < 3 {
        return coords.to_vec();
    }
    let closed = closed && coords.first() == coords.last();
    let base = if closed { &coords[..coords.len() - 1] } else { coords };
    if base.len() < 3 {
        return coords.to_vec();
    }

    let step = tolerance / 4.0;
    let segment_count = if closed { base.len() } else { base.len() - 1 };
    let mut samples = Vec::new();
    let mut arc = Vec::new();
    let mut total = 0.0;
    for i in 0..segment_count {
        let a = base[i];
        let b = base[(i + 1) % base.len()];
        let length = (b.x - a.x).hypot(b.y - a.y);
        let pieces = ((length / step).ceil() as usize).clamp(1, MAX_SAMPLES_PER_SEGMENT);
        for k in 0..pieces {
            let t = k as f64 / pieces as f64;
            samples.push(a + (b - a) * t);
            arc.push(total + length * t);
        }
        total += length;
    }
    if !closed {
        samples.push(base[base.len() - 1]);
        arc.push(total);
    }
    if total == 0.0 {
        return coords.to_vec();
    }

    let n = samples.len();
    let distance = |i: usize, j: usize| {
        let d = (arc[i] - arc[j]).abs();
        if closed { d.min(total - d) } else { d }
    };

    let mut smoothed = Vec::with_capacity(n + 1);
    for i in 0..n {
        let fixed = i == 0 || (!closed && i == n - 1);
        if fixed {
            smoothed.push(samples[i]);
            continue;
        }

        let mut sum = Coord { x: 0.0, y: 0.0 };
        let mut weights = 0.0;
        let mut add = |j: usize| {
            let d = distance(i, j);
            if d > tolerance {
                return false;
            }
            let w = (-KERNEL_SHARPNESS * (d / tolerance).powi(2)).exp();
            sum = sum + samples[j] * w;
            weights += w;
            true
        };

        add(i);
        // Forward and backward walks never visit the same sample twice.
        let (forward, backward) = if closed { (n / 2, (n - 1) / 2) } else { (n - 1 - i, i) };
        for k in 1..=forward {
            if !add((i + k) % n) {
                break;
            }
        }
        for k in 1..=backward {
            if !add((i + n - k) % n) {
                break;
            }
        }

        let target = sum / weights;
        let shift = target - samples[i];
        let magnitude = shift.x.hypot(shift.y);
        let point = if magnitude > tolerance {
            samples[i] + shift * (tolerance / magnitude)
        } else {
            target
        };
        smoothed.push(point);
    }
    if closed {
        smoothed.push(smoothed[0]);
    }
    smoothed.dedup();
    smoothed
}

/// Structural ring checks: closure, vertex count, finite coordinates and
/// non-zero area. Crossings are tested separately.
pub fn ring_is_well_formed(ring: &LineString<f64>) -> bool {
    let coords = &ring.0;
    if coords.len() < 4 || coords.first() != coords.last() {
        return false;
    }
    if coords.iter().any(|c| !(c.x.is_finite() && c.y.is_finite())) {
        return false;
    }
    let twice_area: f64 = coords
        .windows(2)
        .map(|w| w[0].x * w[1].y - w[1].x * w[0].y)
        .sum();
    twice_area != 0.0
}

pub fn polygon_is_valid(polygon: &Polygon<f64>) -> bool {
    let rings: Vec<&LineString<f64>> = iter_rings(polygon).collect();
    rings.iter().all(|r| ring_is_well_formed(r)) && !rings_self_intersect(&rings)
}

fn iter_rings(polygon: &Polygon<f64>) -> impl Iterator<Item = &LineString<f64>> {
    std::iter::once(polygon.exterior()).chain(polygon.interiors())
}

/// Even-odd point test over every ring of a possibly invalid polygon.
fn even_odd_contains(polygon: &Polygon<f64>, p: Coord<f64>) -> bool {
    let mut inside = false;
    for line in iter_rings(polygon).flat_map(|r| r.lines()) {
        let (a, b) = (line.start, line.end);
        if (a.y > p.y) != (b.y > p.y) {
            let x = a.x + (p.y - a.y) * (b.x - a.x) / (b.y - a.y);
            if p.x < x {
                inside = !inside;
            }
        }
    }
    inside
}

/// Rebuilds an invalid polygon from its own linework: the faces of the
/// noded rings that lie inside it under the even-odd rule, unioned.
pub fn make_valid(polygon: &Polygon<f64>, snap: f64) -> Option<MultiPolygon<f64>> {
    let finite = iter_rings(polygon)
        .flat_map(|r| r.coords())
        .all(|c| c.x.is_finite() && c.y.is_finite());
    if !finite {
        return None;
    }
    let faces = polygonize_lines(iter_rings(polygon), snap);
    let kept: Vec<Polygon<f64>> = faces
        .polygons
        .into_iter()
        .filter(|face| {
            face.interior_point()
                .is_some_and(|p| even_odd_contains(polygon, p.0))
        })
        .collect();
    if kept.is_empty() {
        return None;
    }
    let merged = dissolve(kept);
    (!merged.0.is_empty()).then_some(merged)
}

/// PAEK smoothing of every ring, followed by validation and repair.
#[derive(Debug, Clone)]
pub struct PaekSmoother {
    pub tolerance: f64,
    /// Node snapping used when rebuilding invalid rings.
    pub snap_tolerance: f64,
}

impl PaekSmoother {
    pub fn new(tolerance: f64) -> Self {
        Self {
            tolerance,
            snap_tolerance: 1e-7,
        }
    }

    pub fn smooth_polygon(&self, polygon: &Polygon<f64>) -> Polygon<f64> {
        let smooth = |ring: &LineString<f64>| LineString::new(smooth_coords(&ring.0, true, self.tolerance));
        Polygon::new(
            smooth(polygon.exterior()),
            polygon.interiors().iter().map(smooth).collect(),
        )
    }

    /// Smooths contour polylines; open lines keep their endpoints.
    pub fn smooth_contours(&self, contours: &[Contour]) -> Vec<Contour> {
        contours
            .iter()
            .map(|c| Contour {
                line: LineString::new(smooth_coords(&c.line.0, c.closed, self.tolerance)),
                closed: c.closed,
                crs: c.crs.clone(),
            })
            .collect()
    }
}

impl ShapePostProcessor for PaekSmoother {
    fn process(&self, features: &[PolygonFeature]) -> Result<Polygonized> {
        if !(self.tolerance.is_finite() && self.tolerance >= 0.0) {
            return Err(CoastlineError::Config(format!(
                "smoothing tolerance must be non-negative, got {}",
                self.tolerance
            )));
        }
        if self.tolerance == 0.0 {
            return Ok(Polygonized {
                features: features.to_vec(),
                warnings: Vec::new(),
            });
        }

        let (mut repaired, mut dropped) = (0usize, 0usize);
        let mut out = Vec::with_capacity(features.len());
        for feature in features {
            let mut parts = Vec::new();
            for polygon in &feature.geometry {
                let smoothed = self.smooth_polygon(polygon);
                if polygon_is_valid(&smoothed) {
                    parts.push(smoothed);
                    continue;
                }
                match make_valid(&smoothed, self.snap_tolerance) {
                    Some(fixed) => {
                        repaired += 1;
                        parts.extend(fixed);
                    }
                    None => dropped += 1,
                }
            }

            if feature.part_count() == 1 {
                out.extend(
                    parts
                        .into_iter()
                        .map(|p| PolygonFeature::new(p, feature.provenance.clone())),
                );
            } else if !parts.is_empty() {
                out.push(PolygonFeature {
                    geometry: MultiPolygon::new(parts),
                    provenance: feature.provenance.clone(),
                });
            }
        }

        debug!(tolerance = self.tolerance, features = out.len(), "paek smoothing");
        let mut warnings = Vec::new();
        if repaired + dropped > 0 {
            warn!(repaired, dropped, "smoothing produced invalid rings");
            warnings.push(TileWarning::Topology {
                stage: "smoother".to_string(),
                discarded: dropped,
                repaired,
                detail: format!("tolerance {}", self.tolerance),
            });
        }
        Ok(Polygonized {
            features: out,
            warnings,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Provenance;
    use approx::assert_relative_eq;
    use geo::{Area, EuclideanDistance, Point};

    fn square(side: f64) -> Polygon<f64> {
        Polygon::new(
            LineString::from(vec![(0.0, 0.0), (side, 0.0), (side, side), (0.0, side), (0.0, 0.0)]),
            vec![],
        )
    }

    fn feature(polygon: Polygon<f64>) -> PolygonFeature {
        PolygonFeature::new(polygon, Provenance::default())
    }

    #[test]
    fn zero_tolerance_is_exact_identity() {
        let input = vec![feature(square(3.0))];
        let out = PaekSmoother::new(0.0).process(&input).unwrap();
        assert_eq!(out.features, input);
        assert!(out.warnings.is_empty());
    }

    #[test]
    fn negative_tolerance_is_rejected() {
        let out = PaekSmoother::new(-1.0).process(&[]);
        assert!(matches!(out, Err(CoastlineError::Config(_))));
    }

    #[test]
    fn square_corners_are_rounded_within_tolerance() {
        let original = square(10.0);
        let tolerance = 2.0;
        let out = PaekSmoother::new(tolerance)
            .process(&[feature(original.clone())])
            .unwrap();
        assert_eq!(out.features.len(), 1);

        let smoothed = &out.features[0].geometry.0[0];
        let ring = &smoothed.exterior().0;
        assert_eq!(ring.first(), ring.last());
        assert_eq!(ring[0], Coord { x: 0.0, y: 0.0 }, "first vertex is fixed");

        let area = smoothed.unsigned_area();
        assert!(area < 100.0 && area > 90.0, "area {area}");
        for c in ring {
            let d = Point::from(*c).euclidean_distance(original.exterior());
            assert!(d <= tolerance + 1e-9);
        }
    }

    #[test]
    fn open_line_endpoints_stay_put() {
        let zigzag: Vec<Coord<f64>> = (0..=20)
            .map(|i| Coord {
                x: i as f64,
                y: if i % 2 == 0 { 0.0 } else { 1.0 },
            })
            .collect();
        let smoothed = smooth_coords(&zigzag, false, 3.0);
        assert_eq!(smoothed.first(), zigzag.first());
        assert_eq!(smoothed.last(), zigzag.last());

        let interior = &smoothed[smoothed.len() / 3..2 * smoothed.len() / 3];
        for c in interior {
            assert!((c.y - 0.5).abs() < 0.3, "zigzag amplitude is damped: {c:?}");
        }
    }

    #[test]
    fn short_inputs_pass_through() {
        let two = vec![Coord { x: 0.0, y: 0.0 }, Coord { x: 1.0, y: 1.0 }];
        assert_eq!(smooth_coords(&two, false, 5.0), two);
    }

    #[test]
    fn holes_are_smoothed_too() {
        let polygon = Polygon::new(
            square(20.0).exterior().clone(),
            vec![LineString::from(vec![(8.0, 8.0), (8.0, 12.0), (12.0, 12.0), (12.0, 8.0), (8.0, 8.0)])],
        );
        let smoothed = PaekSmoother::new(1.0).smooth_polygon(&polygon);
        assert_eq!(smoothed.interiors().len(), 1);
        assert!(smoothed.interiors()[0].0.len() > 5);
        assert!(polygon_is_valid(&smoothed));
    }

    #[test]
    fn bowtie_is_rebuilt_from_its_faces() {
        let bowtie = Polygon::new(
            LineString::from(vec![(0.0, 0.0), (2.0, 2.0), (2.0, 0.0), (0.0, 2.0), (0.0, 0.0)]),
            vec![],
        );
        assert!(!polygon_is_valid(&bowtie));
        let fixed = make_valid(&bowtie, 1e-9).expect("repairable");
        assert_relative_eq!(fixed.unsigned_area(), 2.0, epsilon = 1e-9);
    }

    #[test]
    fn degenerate_ring_is_not_well_formed() {
        let flat = LineString::from(vec![(0.0, 0.0), (1.0, 0.0), (2.0, 0.0), (0.0, 0.0)]);
        assert!(!ring_is_well_formed(&flat));
        let open = LineString::from(vec![(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 1.0)]);
        assert!(!ring_is_well_formed(&open));
    }
}
