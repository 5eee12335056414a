//! Serializing export records as JSON, GeoJSON or CSV.
//!
//! GeoJSON positions are `[long, lat]` or `[long, lat, alt]`: longitude
//! comes first. A record without a geographic coordinate becomes a feature
//! with a `null` geometry.

use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::Serialize;
use serde_json::{Map, Value, json};

use crate::error::{Error, Result};
use crate::types::{ExportRecord, GeoCoordinate, RecordKind, SKYBOX_FACES};

/// Output format for exported records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Json,
    GeoJson,
    Csv,
}

impl FromStr for OutputFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "geojson" => Ok(Self::GeoJson),
            "csv" => Ok(Self::Csv),
            other => Err(Error::Config {
                detail: format!("unsupported format: {other} (expected json, geojson or csv)"),
            }),
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Json => "json",
            Self::GeoJson => "geojson",
            Self::Csv => "csv",
        })
    }
}

/// Where output is written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    Stdout,
    File(PathBuf),
}

impl Destination {
    /// Interpret an `--out` argument; no path or `-` means stdout.
    #[must_use]
    pub fn from_arg(path: Option<&Path>) -> Self {
        match path {
            Some(p) if p.as_os_str() != "-" => Self::File(p.to_path_buf()),
            _ => Self::Stdout,
        }
    }

    #[must_use]
    pub fn is_stdout(&self) -> bool {
        matches!(self, Self::Stdout)
    }

    /// Write the full text to the destination.
    pub fn write(&self, text: &str) -> Result<()> {
        match self {
            Self::Stdout => {
                let mut stdout = std::io::stdout().lock();
                stdout
                    .write_all(text.as_bytes())
                    .and_then(|()| stdout.flush())
                    .map_err(|e| Error::Io {
                        context: "stdout".to_string(),
                        message: e.to_string(),
                    })
            }
            Self::File(path) => std::fs::write(path, text).map_err(|e| Error::Io {
                context: path.display().to_string(),
                message: e.to_string(),
            }),
        }
    }
}

/// Convert one record into a GeoJSON `Point` feature.
#[must_use]
pub fn to_geojson_feature(record: &ExportRecord) -> Value {
    let local = record.local();
    let mut properties = Map::new();
    properties.insert("id".to_string(), Value::from(record.id()));
    properties.insert("kind".to_string(), Value::from(record.kind().as_str()));
    properties.insert(
        "local".to_string(),
        json!({"x": local.x, "y": local.y, "z": local.z}),
    );

    match record {
        ExportRecord::Sweep { skybox_images, .. } => {
            if let Some(images) = skybox_images {
                properties.insert("skyboxImages".to_string(), json!(images));
            }
        }
        ExportRecord::Tag { label, .. } => {
            properties.insert("label".to_string(), json!(label));
        }
        ExportRecord::Note { text, .. } => {
            properties.insert("text".to_string(), json!(text));
        }
    }

    let geometry = record.geo().map_or(Value::Null, |geo| {
        json!({"type": "Point", "coordinates": geojson_position(&geo)})
    });

    json!({
        "type": "Feature",
        "geometry": geometry,
        "properties": properties,
    })
}

/// `[long, lat]`, or `[long, lat, alt]` when an altitude is known.
fn geojson_position(geo: &GeoCoordinate) -> Vec<f64> {
    let mut position = vec![geo.long, geo.lat];
    position.extend(geo.alt);
    position
}

/// Wrap every record in a GeoJSON `FeatureCollection`.
#[must_use]
pub fn to_geojson(records: &[ExportRecord]) -> Value {
    json!({
        "type": "FeatureCollection",
        "features": records.iter().map(to_geojson_feature).collect::<Vec<_>>(),
    })
}

/// Serialize any value as JSON text.
pub fn to_json_text<T: Serialize + ?Sized>(value: &T, pretty: bool) -> Result<String> {
    let text = if pretty {
        serde_json::to_string_pretty(value).map(|mut s| {
            s.push('\n');
            s
        })
    } else {
        serde_json::to_string(value)
    };
    text.map_err(|e| Error::Io {
        context: "json".to_string(),
        message: e.to_string(),
    })
}

/// Render records as CSV with a header row.
///
/// Columns depend on the kind of the first record; records are expected to
/// share one kind. Sweep rows gain `skybox_0..skybox_5` columns when any
/// sweep carries skybox images. Missing values are empty cells.
pub fn to_csv(records: &[ExportRecord]) -> Result<String> {
    let Some(first) = records.first() else {
        return Ok(String::new());
    };

    let with_skybox = records.iter().any(|r| {
        matches!(
            r,
            ExportRecord::Sweep {
                skybox_images: Some(_),
                ..
            }
        )
    });

    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(csv_header(first.kind(), with_skybox))?;
    for record in records {
        writer.write_record(csv_row(record, with_skybox))?;
    }

    let bytes = writer.into_inner().map_err(|e| Error::Io {
        context: "csv".to_string(),
        message: e.to_string(),
    })?;
    String::from_utf8(bytes).map_err(|e| Error::Io {
        context: "csv".to_string(),
        message: e.to_string(),
    })
}

fn csv_header(kind: RecordKind, with_skybox: bool) -> Vec<String> {
    let mut header = vec!["id".to_string()];
    match kind {
        RecordKind::Sweep => {}
        RecordKind::Tag => header.push("label".to_string()),
        RecordKind::Note => header.push("text".to_string()),
    }
    header.extend(["lat", "long", "alt", "x", "y", "z"].map(String::from));
    if kind == RecordKind::Sweep && with_skybox {
        header.extend((0..SKYBOX_FACES).map(|i| format!("skybox_{i}")));
    }
    header
}

fn csv_row(record: &ExportRecord, with_skybox: bool) -> Vec<String> {
    fn cell(value: Option<f64>) -> String {
        value.map(|v| v.to_string()).unwrap_or_default()
    }

    let mut row = vec![record.id().to_string()];
    match record {
        ExportRecord::Sweep { .. } => {}
        ExportRecord::Tag { label, .. } => row.push(label.clone().unwrap_or_default()),
        ExportRecord::Note { text, .. } => row.push(text.clone().unwrap_or_default()),
    }

    let geo = record.geo();
    let local = record.local();
    row.extend([
        cell(geo.map(|g| g.lat)),
        cell(geo.map(|g| g.long)),
        cell(geo.and_then(|g| g.alt)),
        local.x.to_string(),
        local.y.to_string(),
        local.z.to_string(),
    ]);

    if let ExportRecord::Sweep { skybox_images, .. } = record {
        if with_skybox {
            let images = skybox_images.as_deref().unwrap_or_default();
            row.extend((0..SKYBOX_FACES).map(|i| images.get(i).cloned().unwrap_or_default()));
        }
    }
    row
}

/// Render records in the given format.
pub fn render(records: &[ExportRecord], format: OutputFormat, pretty: bool) -> Result<String> {
    match format {
        OutputFormat::Json => to_json_text(records, pretty),
        OutputFormat::GeoJson => to_json_text(&to_geojson(records), pretty),
        OutputFormat::Csv => to_csv(records),
    }
}

/// Render records and write them to the destination.
pub fn write_records(
    records: &[ExportRecord],
    format: OutputFormat,
    destination: &Destination,
    pretty: bool,
) -> Result<()> {
    let text = render(records, format, pretty)?;
    destination.write(&text)?;
    tracing::debug!(count = records.len(), %format, "wrote records");
    Ok(())
}
