use std::path::Path;

use geo_types::LineString;
use geojson::{feature::Id, FeatureCollection, GeoJson, Geometry, JsonObject, Value};
use serde_json::json;

use crate::{
    error::{CoastlineError, Result},
    typed_geojson::{
        CoastlineGeoJson, CoastlineProperties, ContourGeoJson, ContourProperties, SampleGeoJson, SampleProperties,
        TypedFeature, TypedFeatureCollection, TypedGeoJson,
    },
    types::{ComputedCoastline, Contour, SamplePoint},
};

fn untyped<P>(geojson: TypedGeoJson<P>) -> Result<FeatureCollection> {
    geojson
        .into_feature_collection()
        .map(TypedFeatureCollection::into_untyped)
        .ok_or_else(|| CoastlineError::Input("expected a feature collection".to_string()))
}

impl ComputedCoastline {
    /// Tile metadata carried as foreign members of the collection
    fn metadata(&self) -> Result<JsonObject> {
        let mut foreign_members = JsonObject::new();
        foreign_members.insert("crs".to_string(), json!(self.crs.as_str()));
        foreign_members.insert("width".to_string(), json!(self.width));
        foreign_members.insert("height".to_string(), json!(self.height));
        foreign_members.insert("transform".to_string(), json!(self.transform.coefficients()));
        foreign_members.insert("feature_count".to_string(), json!(self.features.len()));
        foreign_members.insert("threshold".to_string(), json!(self.threshold));
        foreign_members.insert("iso_value".to_string(), json!(self.iso_value));
        foreign_members.insert("warnings".to_string(), serde_json::to_value(&self.warnings)?);
        Ok(foreign_members)
    }

    /// Export to typed GeoJSON format
    pub fn to_typed_geojson(&self) -> Result<CoastlineGeoJson> {
        let features = self
            .features
            .iter()
            .enumerate()
            .map(|(i, feature)| {
                let properties = CoastlineProperties {
                    tile_id: feature.provenance.tile_id.clone(),
                    country: feature.provenance.country.clone(),
                    year: feature.provenance.year,
                    area: feature.area(),
                    perimeter: feature.perimeter(),
                    part_count: feature.part_count(),
                    hole_count: feature.hole_count(),
                };
                let geometry = Geometry::new(Value::from(&feature.geometry));
                TypedFeature::new(Some(geometry), properties).with_id(Id::Number(i.into()))
            })
            .collect();

        Ok(TypedGeoJson::FeatureCollection(TypedFeatureCollection {
            bbox: None,
            features,
            foreign_members: Some(self.metadata()?),
        }))
    }

    pub fn to_geojson(&self) -> Result<FeatureCollection> {
        untyped(self.to_typed_geojson()?)
    }

    /// Export to GeoJSON and serialize to JSON string
    pub fn to_geojson_string(&self) -> Result<String> {
        let geojson = self.to_geojson()?;
        Ok(serde_json::to_string_pretty(&geojson)?)
    }

    /// Save GeoJSON to file
    pub fn save_geojson<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        std::fs::write(path, self.to_geojson_string()?)?;
        Ok(())
    }

    /// Contour polylines as a typed collection
    pub fn contours_to_geojson(&self) -> ContourGeoJson {
        contours_to_geojson(&self.contours, self.crs.as_str())
    }

    pub fn save_contours<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let collection = untyped(self.contours_to_geojson())?;
        std::fs::write(path, serde_json::to_string_pretty(&collection)?)?;
        Ok(())
    }
}

pub fn contours_to_geojson(contours: &[Contour], crs: &str) -> ContourGeoJson {
    let features = contours
        .iter()
        .enumerate()
        .map(|(id, contour)| {
            let properties = ContourProperties {
                id,
                closed: contour.closed,
                length: contour.length(),
                vertex_count: contour.len(),
            };
            TypedFeature::new(Some(Geometry::new(Value::from(&contour.line))), properties)
        })
        .collect();

    let mut foreign_members = JsonObject::new();
    foreign_members.insert("crs".to_string(), json!(crs));
    foreign_members.insert("contour_count".to_string(), json!(contours.len()));
    TypedGeoJson::FeatureCollection(TypedFeatureCollection {
        bbox: None,
        features,
        foreign_members: Some(foreign_members),
    })
}

/// Evaluated points with their distance attributes
pub fn samples_to_geojson(samples: &[SamplePoint]) -> SampleGeoJson {
    let features = samples
        .iter()
        .map(|sample| {
            let properties = SampleProperties {
                id: sample.id.clone(),
                distance: sample.distance,
                matched: sample.is_matched(),
                nearest: sample.nearest,
            };
            let geometry = Geometry::new(Value::Point(vec![sample.x, sample.y]));
            TypedFeature::new(Some(geometry), properties).with_id(Id::String(sample.id.clone()))
        })
        .collect();

    TypedGeoJson::FeatureCollection(TypedFeatureCollection {
        bbox: None,
        features,
        foreign_members: None,
    })
}

pub fn save_samples_geojson<P: AsRef<Path>>(samples: &[SamplePoint], path: P) -> Result<()> {
    let collection = untyped(samples_to_geojson(samples))?;
    std::fs::write(path, serde_json::to_string_pretty(&collection)?)?;
    Ok(())
}

/// Geometries of any GeoJSON document with their feature id and properties.
fn geometries(geojson: GeoJson) -> Vec<(Option<Id>, Option<JsonObject>, Geometry)> {
    match geojson {
        GeoJson::Geometry(geometry) => vec![(None, None, geometry)],
        GeoJson::Feature(feature) => feature
            .geometry
            .map(|g| (feature.id, feature.properties, g))
            .into_iter()
            .collect(),
        GeoJson::FeatureCollection(collection) => collection
            .features
            .into_iter()
            .filter_map(|feature| {
                let geometry = feature.geometry?;
                Some((feature.id, feature.properties, geometry))
            })
            .collect(),
    }
}

fn collect_boundaries(geometry: geo_types::Geometry<f64>, out: &mut Vec<LineString<f64>>) {
    match geometry {
        geo_types::Geometry::Polygon(polygon) => out.push(polygon.exterior().clone()),
        geo_types::Geometry::MultiPolygon(polygons) => {
            out.extend(polygons.0.iter().map(|p| p.exterior().clone()));
        }
        geo_types::Geometry::LineString(line) => out.push(line),
        geo_types::Geometry::MultiLineString(lines) => out.extend(lines.0),
        geo_types::Geometry::GeometryCollection(collection) => {
            for geometry in collection.0 {
                collect_boundaries(geometry, out);
            }
        }
        _ => {}
    }
}

/// Boundary linework from GeoJSON text: polygon exteriors and lines.
pub fn parse_boundaries(text: &str) -> Result<Vec<LineString<f64>>> {
    let geojson: GeoJson = text.parse()?;
    let mut boundaries = Vec::new();
    for (_, _, geometry) in geometries(geojson) {
        collect_boundaries(geo_types::Geometry::try_from(geometry)?, &mut boundaries);
    }
    Ok(boundaries)
}

pub fn read_boundaries<P: AsRef<Path>>(path: P) -> Result<Vec<LineString<f64>>> {
    parse_boundaries(&std::fs::read_to_string(path)?)
}

fn point_id(id: Option<&Id>, properties: Option<&JsonObject>, index: usize) -> String {
    match (id, properties.and_then(|p| p.get("id"))) {
        (Some(Id::String(s)), _) => s.clone(),
        (Some(Id::Number(n)), _) => n.to_string(),
        (None, Some(serde_json::Value::String(s))) => s.clone(),
        (None, Some(serde_json::Value::Number(n))) => n.to_string(),
        _ => index.to_string(),
    }
}

/// Reference points from GeoJSON text. Multi-point features yield one point
/// per member, suffixed `_<n>`.
pub fn parse_sample_points(text: &str) -> Result<Vec<SamplePoint>> {
    let geojson: GeoJson = text.parse()?;
    let mut samples = Vec::new();
    for (index, (id, properties, geometry)) in geometries(geojson).into_iter().enumerate() {
        let id = point_id(id.as_ref(), properties.as_ref(), index);
        match geo_types::Geometry::<f64>::try_from(geometry)? {
            geo_types::Geometry::Point(p) => samples.push(SamplePoint::new(id, p.x(), p.y())),
            geo_types::Geometry::MultiPoint(points) => samples.extend(
                points
                    .0
                    .iter()
                    .enumerate()
                    .map(|(k, p)| SamplePoint::new(format!("{id}_{k}"), p.x(), p.y())),
            ),
            _ => {
                return Err(CoastlineError::Input(format!(
                    "reference feature {id} is not a point"
                )));
            }
        }
    }
    Ok(samples)
}

pub fn read_sample_points<P: AsRef<Path>>(path: P) -> Result<Vec<SamplePoint>> {
    parse_sample_points(&std::fs::read_to_string(path)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Crs, GeoTransform, PolygonFeature, Provenance, TileWarning};
    use geo_types::polygon;
    use tempfile::tempdir;

    fn coastline() -> ComputedCoastline {
        let provenance = Provenance {
            tile_id: "t042".to_string(),
            country: "FJI".to_string(),
            year: 2019,
        };
        let island = polygon![
            exterior: [(x: 0.0, y: 0.0), (x: 10.0, y: 0.0), (x: 10.0, y: 10.0), (x: 0.0, y: 10.0), (x: 0.0, y: 0.0)],
            interiors: [[(x: 4.0, y: 4.0), (x: 6.0, y: 4.0), (x: 6.0, y: 6.0), (x: 4.0, y: 6.0), (x: 4.0, y: 4.0)]],
        ];
        let line = island.exterior().clone();
        ComputedCoastline {
            features: vec![PolygonFeature::new(island, provenance)],
            contours: vec![Contour {
                line,
                closed: true,
                crs: Crs::epsg(32760),
            }],
            crs: Crs::epsg(32760),
            transform: GeoTransform::north_up(0.0, 10.0, 1.0, 1.0),
            width: 10,
            height: 10,
            threshold: Some(0.1),
            iso_value: Some(127.5),
            mask: None,
            warnings: vec![TileWarning::Topology {
                stage: "polygonizer".to_string(),
                discarded: 1,
                repaired: 0,
                detail: "dangling edge".to_string(),
            }],
        }
    }

    #[test]
    fn features_carry_typed_properties() {
        let typed = coastline().to_typed_geojson().unwrap();
        let collection = typed.as_feature_collection().unwrap();
        assert_eq!(collection.len(), 1);

        let props = collection.features()[0].properties().unwrap();
        assert_eq!(props.tile_id, "t042");
        assert_eq!(props.country, "FJI");
        assert_eq!(props.year, 2019);
        assert_eq!(props.area, 96.0);
        assert_eq!(props.perimeter, 48.0);
        assert_eq!(props.hole_count, 1);

        assert_eq!(typed.crs(), Some("EPSG:32760"));
        assert_eq!(typed.features_with_holes().len(), 1);
        let largest = typed.largest_feature().and_then(|f| f.properties()).unwrap();
        assert_eq!(largest.area, 96.0);
    }

    #[test]
    fn plain_geojson_keeps_metadata() {
        let text = coastline().to_geojson_string().unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["type"], "FeatureCollection");
        assert_eq!(value["features"][0]["geometry"]["type"], "MultiPolygon");
        assert_eq!(value["iso_value"], 127.5);
        assert_eq!(value["warnings"][0]["kind"], "topology");
    }

    #[test]
    fn saved_polygons_read_back_as_boundaries() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("coastline.geojson");
        coastline().save_geojson(&path).unwrap();

        let boundaries = read_boundaries(&path).unwrap();
        assert_eq!(boundaries.len(), 1, "holes are not boundary linework");
        assert_eq!(boundaries[0].0.len(), 5);
    }

    #[test]
    fn contours_are_written_as_lines() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("contours.geojson");
        coastline().save_contours(&path).unwrap();
        let boundaries = read_boundaries(&path).unwrap();
        assert_eq!(boundaries.len(), 1);

        let typed = coastline().contours_to_geojson();
        let props = typed.as_feature_collection().unwrap().features()[0].properties().unwrap();
        assert!(props.closed);
        assert_eq!(props.length, 40.0);
    }

    #[test]
    fn sample_ids_come_from_feature_ids_or_properties() {
        let text = r#"{
            "type": "FeatureCollection",
            "features": [
                {"type": "Feature", "id": "ref-1", "properties": null,
                 "geometry": {"type": "Point", "coordinates": [1.0, 2.0]}},
                {"type": "Feature", "properties": {"id": 7},
                 "geometry": {"type": "Point", "coordinates": [3.0, 4.0]}},
                {"type": "Feature", "properties": {},
                 "geometry": {"type": "MultiPoint", "coordinates": [[5.0, 6.0], [7.0, 8.0]]}}
            ]
        }"#;
        let samples = parse_sample_points(text).unwrap();
        let ids: Vec<&str> = samples.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, ["ref-1", "7", "2_0", "2_1"]);
        assert_eq!((samples[3].x, samples[3].y), (7.0, 8.0));
        assert!(samples.iter().all(|s| !s.is_matched()));
    }

    #[test]
    fn non_point_references_are_rejected() {
        let text = r#"{"type": "LineString", "coordinates": [[0, 0], [1, 1]]}"#;
        assert!(matches!(parse_sample_points(text), Err(CoastlineError::Input(_))));
        assert!(matches!(parse_sample_points("not json"), Err(CoastlineError::GeoJson(_))));
    }

    #[test]
    fn evaluated_samples_serialize_distances() {
        let mut sample = SamplePoint::new("a", 1.0, 2.0);
        sample.distance = 12.5;
        sample.nearest = Some([1.0, 14.5]);
        let typed = samples_to_geojson(&[sample, SamplePoint::new("b", 0.0, 0.0)]);
        let features = typed.as_feature_collection().unwrap().features();
        let a = features[0].properties().unwrap();
        assert!(a.matched);
        assert_eq!(a.nearest, Some([1.0, 14.5]));
        let b = features[1].properties().unwrap();
        assert!(!b.matched);
        assert_eq!(b.distance, -1.0);
    }
}
