// src/export.rs
//! Route export for finished walks

use crate::{
    error::{Result, WalkError},
    walk::Walk,
};
use clap::ValueEnum;
use std::{fs::File, io::Write, path::Path};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum RouteFormat {
    Gpx,
    #[value(name = "geojson")]
    GeoJson,
    Csv,
}

impl RouteFormat {
    pub fn extension(&self) -> &str {
        match self {
            RouteFormat::Gpx => "gpx",
            RouteFormat::GeoJson => "geojson",
            RouteFormat::Csv => "csv",
        }
    }

    pub fn display_name(&self) -> &str {
        match self {
            RouteFormat::Gpx => "GPX (GPS Exchange)",
            RouteFormat::GeoJson => "GeoJSON",
            RouteFormat::Csv => "CSV",
        }
    }
}

/// Render a walk's route in the given format.
pub fn export_walk(walk: &Walk, format: RouteFormat) -> Result<String> {
    match format {
        RouteFormat::Gpx => Ok(to_gpx(walk)),
        RouteFormat::GeoJson => to_geojson(walk),
        RouteFormat::Csv => Ok(to_csv(walk)),
    }
}

pub fn export_to_file(walk: &Walk, path: &Path, format: RouteFormat) -> Result<()> {
    if walk.route.is_empty() {
        return Err(WalkError::Other(format!(
            "Walk {} has no recorded points to export",
            walk.id
        )));
    }

    let content = export_walk(walk, format)?;
    let mut file = File::create(path)?;
    file.write_all(content.as_bytes())?;
    Ok(())
}

fn to_gpx(walk: &Walk) -> String {
    let mut gpx = String::from(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<gpx version="1.1" creator="Walk Tracker" xmlns="http://www.topografix.com/GPX/1/1">
"#,
    );

    gpx.push_str(&format!(
        "  <metadata>\n    <time>{}</time>\n  </metadata>\n",
        walk.start_time.to_rfc3339()
    ));
    gpx.push_str("  <trk>\n");
    gpx.push_str(&format!(
        "    <name>Walk {}</name>\n",
        escape_xml(&walk.id)
    ));
    gpx.push_str("    <trkseg>\n");

    for point in &walk.route {
        gpx.push_str(&format!(
            "      <trkpt lat=\"{}\" lon=\"{}\">\n        <time>{}</time>\n      </trkpt>\n",
            point.latitude(),
            point.longitude(),
            point.timestamp.to_rfc3339()
        ));
    }

    gpx.push_str("    </trkseg>\n  </trk>\n</gpx>\n");
    gpx
}

fn to_geojson(walk: &Walk) -> Result<String> {
    let coordinates: Vec<[f64; 2]> = walk
        .route
        .iter()
        .map(|p| [p.longitude(), p.latitude()])
        .collect();
    let times: Vec<String> = walk
        .route
        .iter()
        .map(|p| p.timestamp.to_rfc3339())
        .collect();

    let feature = serde_json::json!({
        "type": "Feature",
        "geometry": {
            "type": "LineString",
            "coordinates": coordinates
        },
        "properties": {
            "id": walk.id,
            "start_time": walk.start_time.to_rfc3339(),
            "end_time": walk.end_time.map(|t| t.to_rfc3339()),
            "distance_meters": walk.distance_meters,
            "duration_seconds": walk.duration_seconds,
            "times": times
        }
    });

    Ok(serde_json::to_string_pretty(&feature)?)
}

fn to_csv(walk: &Walk) -> String {
    let mut csv = String::from("timestamp,latitude,longitude\n");
    for point in &walk.route {
        csv.push_str(&format!(
            "{},{},{}\n",
            point.timestamp.to_rfc3339(),
            point.latitude(),
            point.longitude()
        ));
    }
    csv
}

fn escape_xml(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{geo::Coordinate, walk::PositionSample};
    use chrono::{DateTime, Duration, Utc};
    use tempfile::TempDir;

    fn sample_walk() -> Walk {
        let at = |s| DateTime::<Utc>::UNIX_EPOCH + Duration::seconds(s);
        let mut walk = Walk::new("1700000000000".to_string(), at(0));
        walk.push_sample(PositionSample::new(Coordinate::new(42.0, -71.0), at(1)));
        walk.push_sample(PositionSample::new(Coordinate::new(42.001, -71.0), at(2)));
        walk.finalize(at(10));
        walk
    }

    #[test]
    fn test_gpx_export() {
        let gpx = export_walk(&sample_walk(), RouteFormat::Gpx).unwrap();
        assert!(gpx.contains("<gpx"));
        assert!(gpx.contains("<trkseg>"));
        assert_eq!(gpx.matches("<trkpt").count(), 2);
        assert!(gpx.contains("lat=\"42\" lon=\"-71\""));
        assert!(gpx.contains("<name>Walk 1700000000000</name>"));
    }

    #[test]
    fn test_geojson_export() {
        let walk = sample_walk();
        let json = export_walk(&walk, RouteFormat::GeoJson).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert_eq!(value["geometry"]["type"], "LineString");
        assert_eq!(value["geometry"]["coordinates"][0][0], -71.0);
        assert_eq!(value["geometry"]["coordinates"][1][1], 42.001);
        assert_eq!(value["properties"]["duration_seconds"], 10);
        assert_eq!(
            value["properties"]["distance_meters"].as_f64(),
            Some(walk.distance_meters)
        );
    }

    #[test]
    fn test_csv_export() {
        let csv = export_walk(&sample_walk(), RouteFormat::Csv).unwrap();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines[0], "timestamp,latitude,longitude");
        assert_eq!(lines[1], "1970-01-01T00:00:01+00:00,42,-71");
        assert_eq!(lines.len(), 3);
    }

    #[test]
    fn test_export_to_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("walk.gpx");
        export_to_file(&sample_walk(), &path, RouteFormat::Gpx).unwrap();
        assert!(std::fs::read_to_string(&path).unwrap().contains("<trk>"));

        let empty = Walk::new("2".to_string(), Utc::now());
        assert!(export_to_file(&empty, &path, RouteFormat::Csv).is_err());
    }

    #[test]
    fn test_escape_xml() {
        assert_eq!(escape_xml("a<b & 'c'"), "a&lt;b &amp; &apos;c&apos;");
    }
}
