use std::path::Path;

use chrono::NaiveDateTime;
use serde::Serialize;

use crate::coords::GeoCoordinate;
use crate::GeotaggedPhoto;

/// Name of the map document written next to the photos.
pub const GEOJSON_FILE_NAME: &str = "geotags.geojson";

#[derive(Serialize)]
#[serde(tag = "type")]
enum Geometry {
    LineString { coordinates: Vec<[f64; 2]> },
    Point { coordinates: [f64; 2] },
}

#[derive(Serialize)]
#[serde(untagged)]
enum Properties {
    Trail {
        name: &'static str,
    },
    #[serde(rename_all = "camelCase")]
    Photo {
        name: String,
        track_time: NaiveDateTime,
        original_latitude: Option<f64>,
        original_longitude: Option<f64>,
    },
}

#[derive(Serialize)]
struct Feature {
    #[serde(rename = "type")]
    kind: &'static str,
    geometry: Geometry,
    properties: Properties,
}

#[derive(Serialize)]
struct FeatureCollection {
    #[serde(rename = "type")]
    kind: &'static str,
    features: Vec<Feature>,
}

/// GeoJSON positions are `[longitude, latitude]`.
fn position(latitude: f64, longitude: f64) -> [f64; 2] {
    [longitude, latitude]
}

fn feature(geometry: Geometry, properties: Properties) -> Feature {
    Feature {
        kind: "Feature",
        geometry,
        properties,
    }
}

fn collection(trail: &[(f64, f64)], photos: &[GeotaggedPhoto]) -> FeatureCollection {
    let mut features = Vec::with_capacity(photos.len() + 1);

    if !trail.is_empty() {
        features.push(feature(
            Geometry::LineString {
                coordinates: trail.iter().map(|&(lat, lon)| position(lat, lon)).collect(),
            },
            Properties::Trail { name: "track" },
        ));
    }

    for photo in photos {
        let GeoCoordinate { latitude, longitude } = photo.coordinate;
        features.push(feature(
            Geometry::Point {
                coordinates: position(latitude, longitude),
            },
            Properties::Photo {
                name: photo.name.clone(),
                track_time: photo.track_time,
                original_latitude: photo.original_coordinate.map(|c| c.latitude),
                original_longitude: photo.original_coordinate.map(|c| c.longitude),
            },
        ));
    }

    FeatureCollection {
        kind: "FeatureCollection",
        features,
    }
}

/// Write the track trail and the photo positions as a GeoJSON FeatureCollection.
pub fn write_geojson(
    path: &Path,
    trail: &[(f64, f64)],
    photos: &[GeotaggedPhoto],
) -> anyhow::Result<()> {
    let file = std::fs::File::create(path)?;
    serde_json::to_writer_pretty(file, &collection(trail, photos))?;
    Ok(())
}
