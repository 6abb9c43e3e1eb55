use std::path::PathBuf;

use anyhow::{Context, Result};
use geo::MultiPolygon;
use polars::{frame::DataFrame, io::SerWriter, prelude::CsvWriter};
use serde_json::{Value, json};
use tracing::info;

use crate::{dissolve::{DissolveLevel, Dissolved}, sources::write_atomic};

/// Consumer of a dissolved layer (map display, file export, ...).
pub trait Renderer {
    fn render(&mut self, level: DissolveLevel, groups: &[Dissolved]) -> Result<()>;
}

/// Writes every dissolved layer to `<dir>/<level>.geojson`, the group key as the only property.
#[derive(Debug, Clone)]
pub struct GeoJsonSink {
    dir: PathBuf,
}

impl GeoJsonSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self { Self { dir: dir.into() } }

    pub fn path_for(&self, level: DissolveLevel) -> PathBuf {
        self.dir.join(format!("{}.geojson", level.column()))
    }
}

impl Renderer for GeoJsonSink {
    fn render(&mut self, level: DissolveLevel, groups: &[Dissolved]) -> Result<()> {
        let path = self.path_for(level);
        let bytes = to_geojson_bytes(level, groups)?;
        write_atomic(&path, &bytes)?;
        info!(level = %level, features = groups.len(), path = %path.display(), "wrote layer");
        Ok(())
    }
}

/// Serialize a dissolved layer as a GeoJSON FeatureCollection.
pub fn to_geojson_bytes(level: DissolveLevel, groups: &[Dissolved]) -> Result<Vec<u8>> {
    let features = groups.iter()
        .map(|group| json!({
            "type": "Feature",
            "geometry": {
                "type": "MultiPolygon",
                "coordinates": multipolygon_coords(&group.geometry),
            },
            "properties": {
                level.column(): group.key,
                "units": group.units,
            },
        }))
        .collect::<Vec<_>>();

    let collection = json!({
        "type": "FeatureCollection",
        "features": features,
    });

    serde_json::to_vec(&collection).context("Failed to serialize GeoJSON to bytes")
}

/// Attribute table as CSV bytes with a header row.
pub fn to_csv_bytes(df: &DataFrame) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    CsvWriter::new(&mut out)
        .finish(&mut df.clone())
        .context("Failed to write CSV to bytes")?;
    Ok(out)
}

fn multipolygon_coords(mp: &MultiPolygon<f64>) -> Value {
    Value::Array(mp.0.iter()
        .map(|polygon| {
            let rings = std::iter::once(polygon.exterior())
                .chain(polygon.interiors())
                .map(|ring| ring.coords().map(|c| json!([c.x, c.y])).collect::<Vec<_>>())
                .collect::<Vec<_>>();
            json!(rings)
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::tests::rect;

    #[test]
    fn layer_serializes_as_feature_collection() {
        let groups = vec![Dissolved { key: "Vienna".into(), units: 1, geometry: rect(0.0, 1.0) }];
        let value: Value = serde_json::from_slice(&to_geojson_bytes(DissolveLevel::State, &groups).unwrap()).unwrap();

        assert_eq!(value["type"], "FeatureCollection");
        let feature = &value["features"][0];
        assert_eq!(feature["properties"]["state"], "Vienna");
        assert_eq!(feature["geometry"]["type"], "MultiPolygon");
        // one polygon, one ring, five closed coordinates
        assert_eq!(feature["geometry"]["coordinates"][0][0].as_array().unwrap().len(), 5);
    }

    #[test]
    fn table_serializes_as_csv_with_header() {
        let df = DataFrame::new(vec![
            polars::prelude::Column::new("postal_code".into(), &["1010", "3030"]),
            polars::prelude::Column::new("state".into(), &[Some("Vienna"), None]),
        ]).unwrap();
        let text = String::from_utf8(to_csv_bytes(&df).unwrap()).unwrap();
        assert_eq!(text.lines().collect::<Vec<_>>(), vec!["postal_code,state", "1010,Vienna", "3030,"]);
    }

    #[test]
    fn sink_writes_one_file_per_level() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = GeoJsonSink::new(dir.path());
        sink.render(DissolveLevel::PostalCode, &[]).unwrap();
        assert!(dir.path().join("postal_code.geojson").exists());
    }
}
