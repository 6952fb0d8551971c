use std::marker::PhantomData;
use serde::{Deserialize, Serialize};
use geojson::{Geometry, JsonObject};
use schemars::JsonSchema;

/// Properties for coastline polygon features
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, JsonSchema)]
#[schemars(description = "Properties for coastline polygon features")]
pub struct CoastlineProperties {
    #[schemars(description = "Tile the polygon was extracted from")]
    pub tile_id: String,
    #[schemars(description = "Country code of the tile")]
    pub country: String,
    #[schemars(description = "Acquisition year of the tile")]
    pub year: u16,
    #[schemars(description = "Area in squared CRS units")]
    pub area: f64,
    #[schemars(description = "Length of every ring, holes included, in CRS units")]
    pub perimeter: f64,
    #[schemars(description = "Number of polygon parts")]
    pub part_count: usize,
    #[schemars(description = "Number of interior rings")]
    pub hole_count: usize,
}

/// Properties for contour polylines
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, JsonSchema)]
pub struct ContourProperties {
    pub id: usize,
    pub closed: bool,
    pub length: f64,
    pub vertex_count: usize,
}

/// Properties for evaluated reference points
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, JsonSchema)]
pub struct SampleProperties {
    pub id: String,
    #[schemars(description = "Distance to the nearest boundary, -1 when unmatched")]
    pub distance: f64,
    pub matched: bool,
    #[schemars(description = "Nearest boundary position, when any boundary exists")]
    pub nearest: Option<[f64; 2]>,
}

/// Type alias for coastline GeoJSON
pub type CoastlineGeoJson = TypedGeoJson<CoastlineProperties>;
pub type ContourGeoJson = TypedGeoJson<ContourProperties>;
pub type SampleGeoJson = TypedGeoJson<SampleProperties>;

/// A typed GeoJSON Feature that is generic over its properties.
#[derive(Serialize, Deserialize, Debug)]
pub struct TypedFeature<P> {
    #[serde(flatten)]
    pub feature: geojson::Feature,
    #[serde(skip)]
    _properties: PhantomData<P>,
}

impl<P> TypedFeature<P>
where
    for<'de> P: Serialize + Deserialize<'de>,
{
    /// Creates a new TypedFeature.
    pub fn new(geometry: Option<Geometry>, properties: P) -> Self {
        let feature = geojson::Feature {
            bbox: None,
            geometry,
            id: None,
            properties: serde_json::to_value(properties).ok().and_then(|v| v.as_object().cloned()),
            foreign_members: None,
        };
        Self {
            feature,
            _properties: PhantomData,
        }
    }

    pub fn with_id(mut self, id: geojson::feature::Id) -> Self {
        self.feature.id = Some(id);
        self
    }

    /// Tries to access the typed properties of the feature.
    pub fn properties(&self) -> Option<P> {
        self.feature.properties.as_ref().and_then(|p| {
            serde_json::from_value(serde_json::Value::Object(p.clone())).ok()
        })
    }
}

#[derive(Serialize, Deserialize, Debug)]
pub struct TypedFeatureCollection<P> {
    pub bbox: Option<Vec<f64>>,
    pub features: Vec<TypedFeature<P>>,
    pub foreign_members: Option<JsonObject>,
}

#[derive(Serialize, Deserialize, Debug)]
pub enum TypedGeoJson<P> {
    Geometry(Geometry),
    Feature(TypedFeature<P>),
    FeatureCollection(TypedFeatureCollection<P>),
}

impl<P> TypedGeoJson<P> {
    /// Get the underlying FeatureCollection if this is a FeatureCollection variant
    pub fn as_feature_collection(&self) -> Option<&TypedFeatureCollection<P>> {
        match self {
            TypedGeoJson::FeatureCollection(fc) => Some(fc),
            _ => None,
        }
    }

    /// Convert to FeatureCollection, consuming self
    pub fn into_feature_collection(self) -> Option<TypedFeatureCollection<P>> {
        match self {
            TypedGeoJson::FeatureCollection(fc) => Some(fc),
            _ => None,
        }
    }

    fn foreign_member(&self, key: &str) -> Option<&serde_json::Value> {
        self.as_feature_collection()?.foreign_members.as_ref()?.get(key)
    }
}

impl<P> TypedFeatureCollection<P> {
    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    pub fn features(&self) -> &[TypedFeature<P>] {
        &self.features
    }

    /// Plain GeoJSON collection, dropping the property typing.
    pub fn into_untyped(self) -> geojson::FeatureCollection {
        geojson::FeatureCollection {
            bbox: self.bbox,
            features: self.features.into_iter().map(|f| f.feature).collect(),
            foreign_members: self.foreign_members,
        }
    }
}

impl CoastlineGeoJson {
    /// Get features that have holes
    pub fn features_with_holes(&self) -> Vec<&TypedFeature<CoastlineProperties>> {
        match self.as_feature_collection() {
            Some(fc) => fc
                .features
                .iter()
                .filter(|feature| feature.properties().is_some_and(|props| props.hole_count > 0))
                .collect(),
            None => Vec::new(),
        }
    }

    /// Get the largest feature by area
    pub fn largest_feature(&self) -> Option<&TypedFeature<CoastlineProperties>> {
        self.as_feature_collection()?.features.iter().max_by(|a, b| {
            let area_a = a.properties().map(|p| p.area).unwrap_or(0.0);
            let area_b = b.properties().map(|p| p.area).unwrap_or(0.0);
            area_a.total_cmp(&area_b)
        })
    }

    pub fn crs(&self) -> Option<&str> {
        self.foreign_member("crs")?.as_str()
    }
}
