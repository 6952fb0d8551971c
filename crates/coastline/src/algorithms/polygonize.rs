use std::collections::{HashMap, HashSet};

use geo::algorithm::line_intersection::{line_intersection, LineIntersection};
use geo::{BooleanOps, BoundingRect, Contains, InteriorPoint};
use geo_types::{Coord, Line, LineString, MultiPolygon, Polygon};
use tracing::{debug, warn};

use crate::{
    config::{PartMode, PolygonizeConfig},
    error::{CoastlineError, Result},
    traits::{Polygonized, Polygonizer},
    types::{BinaryMask, Contour, PolygonFeature, Provenance, TileWarning},
};

/// Faces recovered from a line network.
#[derive(Debug, Clone, Default)]
pub struct FaceSet {
    pub polygons: Vec<Polygon<f64>>,
    /// Edges with a free end, removed before faces were traced.
    pub dangles: usize,
    /// Edges with the same face on both sides.
    pub cut_edges: usize,
}

/// Splits segments wherever another segment crosses or touches their interior.
pub fn node_segments(segments: &[Line<f64>]) -> Vec<Line<f64>> {
    let min_x = |l: &Line<f64>| l.start.x.min(l.end.x);
    let mut order: Vec<usize> = (0..segments.len()).collect();
    order.sort_by(|&a, &b| min_x(&segments[a]).total_cmp(&min_x(&segments[b])));

    let mut splits: Vec<Vec<Coord<f64>>> = vec![Vec::new(); segments.len()];
    for (n, &i) in order.iter().enumerate() {
        let a = segments[i];
        let a_max_x = a.start.x.max(a.end.x);
        let (a_min_y, a_max_y) = (a.start.y.min(a.end.y), a.start.y.max(a.end.y));

        for &j in &order[n + 1..] {
            let b = segments[j];
            if min_x(&b) > a_max_x {
                break;
            }
            if b.start.y.max(b.end.y) < a_min_y || b.start.y.min(b.end.y) > a_max_y {
                continue;
            }
            match line_intersection(a, b) {
                Some(LineIntersection::SinglePoint { intersection, .. }) => {
                    splits[i].push(intersection);
                    splits[j].push(intersection);
                }
                Some(LineIntersection::Collinear { intersection }) => {
                    for p in [intersection.start, intersection.end] {
                        splits[i].push(p);
                        splits[j].push(p);
                    }
                }
                None => {}
            }
        }
    }

    let mut noded = Vec::with_capacity(segments.len());
    for (segment, mut points) in segments.iter().zip(splits) {
        let d = segment.delta();
        let len2 = d.x * d.x + d.y * d.y;
        if len2 == 0.0 {
            continue;
        }
        let param = |p: &Coord<f64>| ((p.x - segment.start.x) * d.x + (p.y - segment.start.y) * d.y) / len2;
        points.retain(|p| {
            let t = param(p);
            t > 0.0 && t < 1.0
        });
        points.sort_by(|p, q| param(p).total_cmp(&param(q)));

        let mut previous = segment.start;
        for p in points {
            if p != previous {
                noded.push(Line::new(previous, p));
                previous = p;
            }
        }
        if previous != segment.end {
            noded.push(Line::new(previous, segment.end));
        }
    }
    noded
}

/// Whether any two segments of the given rings meet anywhere other than
/// the shared vertex of consecutive segments.
pub fn rings_self_intersect(rings: &[&LineString<f64>]) -> bool {
    let segments: Vec<(usize, usize, Line<f64>)> = rings
        .iter()
        .enumerate()
        .flat_map(|(r, ring)| ring.lines().enumerate().map(move |(s, line)| (r, s, line)))
        .collect();
    let ring_len: Vec<usize> = rings.iter().map(|r| r.lines().len()).collect();

    let min_x = |l: &Line<f64>| l.start.x.min(l.end.x);
    let mut order: Vec<usize> = (0..segments.len()).collect();
    order.sort_by(|&a, &b| min_x(&segments[a].2).total_cmp(&min_x(&segments[b].2)));

    for (n, &i) in order.iter().enumerate() {
        let (ring_a, seg_a, a) = segments[i];
        let a_max_x = a.start.x.max(a.end.x);
        for &j in &order[n + 1..] {
            let (ring_b, seg_b, b) = segments[j];
            if min_x(&b) > a_max_x {
                break;
            }
            let Some(hit) = line_intersection(a, b) else {
                continue;
            };
            let adjacent = ring_a == ring_b && {
                let len = ring_len[ring_a];
                seg_a.abs_diff(seg_b) == 1 || seg_a.abs_diff(seg_b) == len - 1
            };
            match hit {
                LineIntersection::SinglePoint { .. } if adjacent => {}
                _ => return true,
            }
        }
    }
    false
}

/// Undirected edges between snapped nodes.
struct PlanarGraph {
    coords: Vec<Coord<f64>>,
    edges: Vec<(usize, usize)>,
    alive: Vec<bool>,
    incident: Vec<Vec<usize>>,
}

impl PlanarGraph {
    fn build(segments: &[Line<f64>], snap: f64) -> Self {
        let mut nodes: HashMap<(i64, i64), usize> = HashMap::new();
        let mut coords = Vec::new();
        let mut node = |c: Coord<f64>| -> usize {
            let key = ((c.x / snap).round() as i64, (c.y / snap).round() as i64);
            *nodes.entry(key).or_insert_with(|| {
                coords.push(c);
                coords.len() - 1
            })
        };

        let mut seen = HashSet::new();
        let mut edges = Vec::new();
        for segment in segments {
            let (a, b) = (node(segment.start), node(segment.end));
            if a == b {
                continue;
            }
            let key = (a.min(b), a.max(b));
            if seen.insert(key) {
                edges.push(key);
            }
        }

        let mut incident = vec![Vec::new(); coords.len()];
        for (e, &(a, b)) in edges.iter().enumerate() {
            incident[a].push(e);
            incident[b].push(e);
        }
        Self {
            alive: vec![true; edges.len()],
            coords,
            edges,
            incident,
        }
    }

    fn degree(&self, node: usize) -> usize {
        self.incident[node].iter().filter(|&&e| self.alive[e]).count()
    }

    fn origin(&self, half: usize) -> usize {
        let (a, b) = self.edges[half / 2];
        if half % 2 == 0 { a } else { b }
    }

    fn destination(&self, half: usize) -> usize {
        self.origin(half ^ 1)
    }

    /// Repeatedly removes edges ending at a node of degree one.
    fn prune_dangles(&mut self) -> usize {
        let mut removed = 0;
        let mut stack: Vec<usize> = (0..self.coords.len()).filter(|&v| self.degree(v) == 1).collect();
        while let Some(v) = stack.pop() {
            if self.degree(v) != 1 {
                continue;
            }
            let Some(e) = self.incident[v].iter().copied().find(|&e| self.alive[e]) else {
                continue;
            };
            self.alive[e] = false;
            removed += 1;
            let (a, b) = self.edges[e];
            let other = if a == v { b } else { a };
            if self.degree(other) == 1 {
                stack.push(other);
            }
        }
        removed
    }

    /// Traces every face boundary, keeping faces on the left of each
    /// half-edge. Bounded faces come out counter-clockwise.
    fn trace_rings(&self) -> (Vec<Vec<usize>>, Vec<usize>) {
        let half_count = self.edges.len() * 2;
        let mut outgoing: Vec<Vec<usize>> = vec![Vec::new(); self.coords.len()];
        for e in (0..self.edges.len()).filter(|&e| self.alive[e]) {
            outgoing[self.edges[e].0].push(2 * e);
            outgoing[self.edges[e].1].push(2 * e + 1);
        }

        let angle = |half: usize| {
            let from = self.coords[self.origin(half)];
            let to = self.coords[self.destination(half)];
            (to.y - from.y).atan2(to.x - from.x)
        };
        let mut position = vec![usize::MAX; half_count];
        for list in &mut outgoing {
            list.sort_by(|&a, &b| angle(a).total_cmp(&angle(b)));
            for (p, &half) in list.iter().enumerate() {
                position[half] = p;
            }
        }

        let next = |half: usize| {
            let list = &outgoing[self.destination(half)];
            let twin = position[half ^ 1];
            list[(twin + list.len() - 1) % list.len()]
        };

        let mut face_of = vec![usize::MAX; half_count];
        let mut rings = Vec::new();
        for start in 0..half_count {
            if !self.alive[start / 2] || face_of[start] != usize::MAX {
                continue;
            }
            let face = rings.len();
            let mut ring = Vec::new();
            let mut half = start;
            loop {
                face_of[half] = face;
                ring.push(half);
                half = next(half);
                if half == start || ring.len() > half_count {
                    break;
                }
            }
            rings.push(ring);
        }
        (rings, face_of)
    }

    fn ring_coords(&self, ring: &[usize]) -> Vec<Coord<f64>> {
        let coords: Vec<Coord<f64>> = ring.iter().map(|&h| self.coords[self.origin(h)]).collect();
        let first = coords.first().copied();
        coords.into_iter().chain(first).collect()
    }

    /// Connected component id per node.
    fn components(&self) -> Vec<usize> {
        fn find(parent: &mut [usize], mut x: usize) -> usize {
            while parent[x] != x {
                parent[x] = parent[parent[x]];
                x = parent[x];
            }
            x
        }
        let mut parent: Vec<usize> = (0..self.coords.len()).collect();
        for e in (0..self.edges.len()).filter(|&e| self.alive[e]) {
            let (a, b) = self.edges[e];
            let (ra, rb) = (find(&mut parent, a), find(&mut parent, b));
            if ra != rb {
                parent[ra] = rb;
            }
        }
        (0..self.coords.len()).map(|v| find(&mut parent, v)).collect()
    }
}

fn signed_area(coords: &[Coord<f64>]) -> f64 {
    coords
        .windows(2)
        .map(|w| w[0].x * w[1].y - w[1].x * w[0].y)
        .sum::<f64>()
        / 2.0
}

struct Ring {
    coords: Vec<Coord<f64>>,
    area: f64,
    component: usize,
}

/// Minimal bounded faces of the arrangement formed by `lines`.
///
/// Lines are noded at their crossings and endpoints are merged on a grid of
/// `snap` map units. Dangling and cut edges take no part in any face. A
/// hole is attached to the smallest face of another connected component
/// that contains it.
pub fn polygonize_lines<'a>(lines: impl IntoIterator<Item = &'a LineString<f64>>, snap: f64) -> FaceSet {
    let segments: Vec<Line<f64>> = lines.into_iter().flat_map(|l| l.lines()).collect();
    let noded = node_segments(&segments);
    let mut graph = PlanarGraph::build(&noded, snap);

    let mut dangles = graph.prune_dangles();
    let mut cut_edges = 0;
    let rings = loop {
        let (rings, face_of) = graph.trace_rings();
        let cuts: Vec<usize> = (0..graph.edges.len())
            .filter(|&e| graph.alive[e] && face_of[2 * e] == face_of[2 * e + 1])
            .collect();
        if cuts.is_empty() {
            break rings;
        }
        cut_edges += cuts.len();
        for e in cuts {
            graph.alive[e] = false;
        }
        dangles += graph.prune_dangles();
    };

    let component = graph.components();
    let (mut shells, mut holes) = (Vec::new(), Vec::new());
    for ring in &rings {
        let coords = graph.ring_coords(ring);
        let area = signed_area(&coords);
        let ring = Ring {
            coords,
            area,
            component: component[graph.origin(ring[0])],
        };
        if area > 0.0 {
            shells.push(ring);
        } else if area < 0.0 {
            holes.push(ring);
        }
    }

    let outlines: Vec<Polygon<f64>> = shells
        .iter()
        .map(|s| Polygon::new(LineString::new(s.coords.clone()), vec![]))
        .collect();
    let bounds: Vec<_> = outlines.iter().map(|p| p.bounding_rect()).collect();

    let mut interiors: Vec<Vec<LineString<f64>>> = vec![Vec::new(); shells.len()];
    for hole in holes {
        let p = hole.coords[0];
        let owner = shells
            .iter()
            .enumerate()
            .filter(|(i, shell)| {
                shell.component != hole.component
                    && bounds[*i].is_some_and(|b| {
                        p.x >= b.min().x && p.x <= b.max().x && p.y >= b.min().y && p.y <= b.max().y
                    })
                    && outlines[*i].contains(&p)
            })
            .min_by(|(_, a), (_, b)| a.area.total_cmp(&b.area))
            .map(|(i, _)| i);
        if let Some(i) = owner {
            interiors[i].push(LineString::new(hole.coords));
        }
    }

    let polygons = outlines
        .into_iter()
        .zip(interiors)
        .map(|(outline, holes)| {
            let (exterior, _) = outline.into_inner();
            Polygon::new(exterior, holes)
        })
        .collect();

    FaceSet {
        polygons,
        dangles,
        cut_edges,
    }
}

/// Mask value under a pixel centre lying inside the face, if one is found.
fn face_on_foreground(polygon: &Polygon<f64>, mask: &BinaryMask) -> Option<bool> {
    let inverse = mask.transform().invert()?;
    let transform = mask.transform();
    let (width, height) = (mask.width() as i64, mask.height() as i64);
    let inside = |col: i64, row: i64| {
        col >= 0
            && row >= 0
            && col < width
            && row < height
            && polygon.contains(&transform.apply(col as f64 + 0.5, row as f64 + 0.5))
    };
    let sample = |col: i64, row: i64| mask.is_foreground(row as usize, col as usize);

    let point = polygon.interior_point()?;
    let pixel = inverse.apply(point.x(), point.y());
    let (col, row) = (pixel.x.floor() as i64, pixel.y.floor() as i64);
    for dr in -1..=1 {
        for dc in -1..=1 {
            if inside(col + dc, row + dr) {
                return Some(sample(col + dc, row + dr));
            }
        }
    }

    // Slow path over the face's pixel footprint.
    let rect = polygon.bounding_rect()?;
    let corners = [
        inverse.apply(rect.min().x, rect.min().y),
        inverse.apply(rect.max().x, rect.max().y),
        inverse.apply(rect.min().x, rect.max().y),
        inverse.apply(rect.max().x, rect.min().y),
    ];
    let lo_col = corners.iter().map(|c| c.x).fold(f64::INFINITY, f64::min).floor().max(0.0) as i64;
    let hi_col = corners.iter().map(|c| c.x).fold(f64::NEG_INFINITY, f64::max).ceil() as i64;
    let lo_row = corners.iter().map(|c| c.y).fold(f64::INFINITY, f64::min).floor().max(0.0) as i64;
    let hi_row = corners.iter().map(|c| c.y).fold(f64::NEG_INFINITY, f64::max).ceil() as i64;
    for row in lo_row..=hi_row.min(height - 1) {
        for col in lo_col..=hi_col.min(width - 1) {
            if inside(col, row) {
                return Some(sample(col, row));
            }
        }
    }
    None
}

/// Unions polygons that share area or boundary.
pub fn dissolve(polygons: Vec<Polygon<f64>>) -> MultiPolygon<f64> {
    polygons
        .into_iter()
        .fold(MultiPolygon::new(Vec::new()), |merged, polygon| {
            merged.union(&MultiPolygon::new(vec![polygon]))
        })
}

/// Faces from contour linework via a planar arrangement.
#[derive(Debug, Clone)]
pub struct PlanarPolygonizer {
    pub part_mode: PartMode,
    pub dissolve: bool,
    pub keep_background_faces: bool,
    pub snap_tolerance: f64,
}

impl Default for PlanarPolygonizer {
    fn default() -> Self {
        Self::from(&PolygonizeConfig::default())
    }
}

impl From<&PolygonizeConfig> for PlanarPolygonizer {
    fn from(config: &PolygonizeConfig) -> Self {
        Self {
            part_mode: config.part_mode,
            dissolve: config.dissolve,
            keep_background_faces: config.keep_background_faces,
            snap_tolerance: config.snap_tolerance,
        }
    }
}

impl Polygonizer for PlanarPolygonizer {
    fn polygonize(&self, contours: &[Contour], mask: Option<&BinaryMask>) -> Result<Polygonized> {
        if !(self.snap_tolerance.is_finite() && self.snap_tolerance > 0.0) {
            return Err(CoastlineError::Config(format!(
                "snap_tolerance must be positive, got {}",
                self.snap_tolerance
            )));
        }
        if contours.is_empty() {
            return Ok(Polygonized::default());
        }

        let faces = polygonize_lines(contours.iter().map(|c| &c.line), self.snap_tolerance);
        let mut warnings = Vec::new();
        let discarded = faces.dangles + faces.cut_edges;
        if discarded > 0 {
            let open = contours.iter().filter(|c| !c.closed).count();
            warn!(
                dangles = faces.dangles,
                cut_edges = faces.cut_edges,
                open_contours = open,
                "edges discarded from face construction"
            );
            warnings.push(TileWarning::Topology {
                stage: "polygonizer".to_string(),
                discarded,
                repaired: 0,
                detail: format!(
                    "{open} open contour(s); {} dangling and {} cut edge(s) discarded",
                    faces.dangles, faces.cut_edges
                ),
            });
        }

        let mut polygons = faces.polygons;
        if let Some(mask) = mask {
            if !self.keep_background_faces {
                let before = polygons.len();
                polygons.retain(|p| face_on_foreground(p, mask).unwrap_or(true));
                debug!(dropped = before - polygons.len(), "background faces");
            }
        }

        let geometries: Vec<MultiPolygon<f64>> = if self.dissolve && polygons.len() > 1 {
            let merged = dissolve(polygons);
            match self.part_mode {
                PartMode::SinglePart => merged.into_iter().map(|p| MultiPolygon::new(vec![p])).collect(),
                PartMode::MultiPart => vec![merged],
            }
        } else {
            polygons.into_iter().map(|p| MultiPolygon::new(vec![p])).collect()
        };

        let features = geometries
            .into_iter()
            .filter(|g| !g.0.is_empty())
            .map(|geometry| PolygonFeature {
                geometry,
                provenance: Provenance::default(),
            })
            .collect::<Vec<_>>();
        debug!(features = features.len(), "polygonized");

        Ok(Polygonized { features, warnings })
    }
}
