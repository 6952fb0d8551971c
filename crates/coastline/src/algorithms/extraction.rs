use std::collections::HashMap;

use geo_types::{Coord, LineString};
use tracing::debug;

use crate::{
    error::{CoastlineError, Result},
    traits::ContourExtractor,
    types::{BinaryMask, Contour, Raster},
};

/// Iso-value used when contouring a [`BinaryMask`] field.
pub const MASK_ISO_VALUE: f64 = 127.5;

/// Marching-squares isolines with linear interpolation between pixel centres.
#[derive(Debug, Clone, Default)]
pub struct MarchingSquaresExtractor {
    /// Surround the field with one ring of background so that shapes
    /// touching the tile edge yield closed contours.
    pub close_at_border: bool,
}

/// Sample grid the cells are built over, optionally padded by one sample.
struct Field<'a> {
    raster: &'a Raster,
    pad: usize,
    pad_value: f64,
    iso: f64,
    rows: usize,
    cols: usize,
}

impl Field<'_> {
    fn value(&self, row: usize, col: usize) -> f64 {
        let p = self.pad;
        if row < p || col < p || row >= self.raster.height() + p || col >= self.raster.width() + p {
            return self.pad_value;
        }
        let v = self.raster.get(row - p, col - p);
        if self.raster.is_valid(v) { v as f64 } else { self.iso }
    }

    fn above(&self, row: usize, col: usize) -> bool {
        self.value(row, col) > self.iso
    }
}

/// A grid edge between two neighbouring samples, identified by its first
/// sample and orientation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum EdgeKey {
    Horizontal(usize, usize),
    Vertical(usize, usize),
}

impl MarchingSquaresExtractor {
    /// Cell segments as pairs of crossed edges.
    fn cell_segments(field: &Field<'_>) -> Vec<(EdgeKey, EdgeKey)> {
        use EdgeKey::{Horizontal as H, Vertical as V};

        let mut segments = Vec::new();
        for i in 0..field.rows - 1 {
            for j in 0..field.cols - 1 {
                let case = field.above(i, j) as u8
                    | (field.above(i, j + 1) as u8) << 1
                    | (field.above(i + 1, j + 1) as u8) << 2
                    | (field.above(i + 1, j) as u8) << 3;

                let top = H(i, j);
                let bottom = H(i + 1, j);
                let left = V(i, j);
                let right = V(i, j + 1);

                match case {
                    0 | 15 => {}
                    1 | 14 => segments.push((left, top)),
                    2 | 13 => segments.push((top, right)),
                    3 | 12 => segments.push((left, right)),
                    4 | 11 => segments.push((right, bottom)),
                    6 | 9 => segments.push((top, bottom)),
                    7 | 8 => segments.push((bottom, left)),
                    5 | 10 => {
                        let centre = (field.value(i, j)
                            + field.value(i, j + 1)
                            + field.value(i + 1, j + 1)
                            + field.value(i + 1, j))
                            / 4.0;
                        // Whether the two corners above the iso-value are
                        // joined through the cell centre.
                        let joined = (centre > field.iso) == (case == 5);
                        if joined {
                            segments.push((top, right));
                            segments.push((bottom, left));
                        } else {
                            segments.push((left, top));
                            segments.push((right, bottom));
                        }
                    }
                    _ => unreachable!("case index is four bits"),
                }
            }
        }
        segments
    }

    /// Interpolated crossing position on an edge, in map coordinates.
    fn crossing(field: &Field<'_>, edge: EdgeKey) -> Coord<f64> {
        let (row, col) = match edge {
            EdgeKey::Horizontal(i, j) => {
                let t = interpolate(field.value(i, j), field.value(i, j + 1), field.iso);
                (i as f64, j as f64 + t)
            }
            EdgeKey::Vertical(i, j) => {
                let t = interpolate(field.value(i, j), field.value(i + 1, j), field.iso);
                (i as f64 + t, j as f64)
            }
        };
        let p = field.pad as f64;
        field
            .raster
            .transform()
            .apply(col - p + 0.5, row - p + 0.5)
    }
}

fn interpolate(a: f64, b: f64, iso: f64) -> f64 {
    let span = b - a;
    if span == 0.0 {
        0.5
    } else {
        ((iso - a) / span).clamp(0.0, 1.0)
    }
}

impl ContourExtractor for MarchingSquaresExtractor {
    fn extract_contours(&self, raster: &Raster, iso_value: f64) -> Result<Vec<Contour>> {
        if !iso_value.is_finite() {
            return Err(CoastlineError::Config(format!(
                "iso-value must be finite, got {iso_value}"
            )));
        }
        if raster.is_uniform() {
            debug!("uniform field, no contours");
            return Ok(Vec::new());
        }

        let pad = self.close_at_border as usize;
        let pad_value = raster
            .valid_range()
            .map(|(lo, _)| (lo as f64).min(iso_value))
            .unwrap_or(iso_value);
        let field = Field {
            raster,
            pad,
            pad_value,
            iso: iso_value,
            rows: raster.height() + 2 * pad,
            cols: raster.width() + 2 * pad,
        };
        if field.rows < 2 || field.cols < 2 {
            return Ok(Vec::new());
        }

        let segments = Self::cell_segments(&field);
        let mut incident: HashMap<EdgeKey, Vec<usize>> = HashMap::new();
        for (s, &(a, b)) in segments.iter().enumerate() {
            incident.entry(a).or_default().push(s);
            incident.entry(b).or_default().push(s);
        }

        let mut points: HashMap<EdgeKey, Coord<f64>> = HashMap::new();
        let mut point = |edge: EdgeKey| *points.entry(edge).or_insert_with(|| Self::crossing(&field, edge));

        let mut visited = vec![false; segments.len()];
        let mut contours = Vec::new();

        let mut trace = |start_edge: EdgeKey, first: usize, visited: &mut Vec<bool>| {
            let mut coords = vec![point(start_edge)];
            let mut edge = start_edge;
            let mut segment = first;
            loop {
                visited[segment] = true;
                let (a, b) = segments[segment];
                edge = if a == edge { b } else { a };
                coords.push(point(edge));
                match incident[&edge].iter().copied().find(|&s| !visited[s]) {
                    Some(next) => segment = next,
                    None => break,
                }
            }
            let closed = edge == start_edge && coords.len() > 3;
            Contour {
                line: LineString::new(coords),
                closed,
                crs: raster.crs().clone(),
            }
        };

        // Open contours start at an edge crossed by a single segment.
        for s in 0..segments.len() {
            if visited[s] {
                continue;
            }
            let (a, b) = segments[s];
            let start = if incident[&a].len() == 1 {
                Some(a)
            } else if incident[&b].len() == 1 {
                Some(b)
            } else {
                None
            };
            if let Some(start) = start {
                contours.push(trace(start, s, &mut visited));
            }
        }
        for s in 0..segments.len() {
            if !visited[s] {
                let start = segments[s].0;
                contours.push(trace(start, s, &mut visited));
            }
        }

        debug!(
            contours = contours.len(),
            closed = contours.iter().filter(|c| c.closed).count(),
            iso_value,
            "marching squares"
        );
        Ok(contours)
    }
}

/// Index raster constrained to a cleaned mask: foreground samples are lifted
/// just above `iso`, background and nodata samples held just below it, so
/// the isoline follows the mask's topology while interpolating real values.
pub fn constrained_field(index: &Raster, mask: &BinaryMask, iso: f64) -> Result<Raster> {
    if index.width() != mask.width() || index.height() != mask.height() {
        return Err(CoastlineError::Precondition(format!(
            "index raster is {}x{} but mask is {}x{}",
            index.width(),
            index.height(),
            mask.width(),
            mask.height()
        )));
    }
    let (lo, hi) = index.valid_range().unwrap_or((iso as f32, iso as f32));
    let delta = ((hi as f64 - lo as f64) * 1e-3)
        .max(iso.abs() * 1e-5)
        .max(1e-6);
    let below = (lo as f64).min(iso - delta);

    let mut data = Vec::with_capacity(index.pixel_count());
    for row in 0..index.height() {
        for col in 0..index.width() {
            let v = index.get(row, col);
            let value = if !index.is_valid(v) {
                below
            } else if mask.is_foreground(row, col) {
                (v as f64).max(iso + delta)
            } else {
                (v as f64).min(iso - delta)
            };
            data.push(value as f32);
        }
    }
    Raster::new(index.width(), index.height(), data, *index.transform(), index.crs().clone())
}
