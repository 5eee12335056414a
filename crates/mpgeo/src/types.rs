//! Data types for model metadata and geocoding results.
//!
//! Wire types mirror the shape of the GraphQL responses (camelCase field
//! names). Export records are the reassembled output of a batch and carry
//! only the fields relevant to their kind.

use glam::{DQuat, DVec3};
use serde::{Deserialize, Serialize};

/// Number of images in a complete skybox cube map.
pub const SKYBOX_FACES: usize = 6;

/// A local model-space coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point3D {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Point3D {
    /// Create a new point.
    #[must_use]
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }
}

impl From<Point3D> for DVec3 {
    fn from(p: Point3D) -> Self {
        DVec3::new(p.x, p.y, p.z)
    }
}

impl From<DVec3> for Point3D {
    fn from(v: DVec3) -> Self {
        Self::new(v.x, v.y, v.z)
    }
}

/// The geographic location of a single model point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoCoordinate {
    /// Latitude in degrees.
    pub lat: f64,
    /// Longitude in degrees.
    pub long: f64,
    /// Altitude in meters, when the server provides one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alt: Option<f64>,
}

impl GeoCoordinate {
    /// Create a coordinate without altitude.
    #[must_use]
    pub const fn new(lat: f64, long: f64) -> Self {
        Self {
            lat,
            long,
            alt: None,
        }
    }

    /// Attach an altitude.
    #[must_use]
    pub const fn with_alt(mut self, alt: f64) -> Self {
        self.alt = Some(alt);
        self
    }
}

/// A skybox cube map attached to a pano.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Skybox {
    /// Image URLs, one per cube face.
    #[serde(default, deserialize_with = "null_as_default")]
    pub children: Vec<String>,
}

/// A panorama captured at a sweep location.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Pano {
    #[serde(default)]
    pub skybox: Option<Skybox>,
}

impl Pano {
    /// Returns the skybox image URLs if all six faces are present.
    #[must_use]
    pub fn complete_skybox(&self) -> Option<&[String]> {
        self.skybox
            .as_ref()
            .map(|s| s.children.as_slice())
            .filter(|children| children.len() == SKYBOX_FACES)
    }
}

/// A sweep location with its panos.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Location {
    pub id: String,
    pub position: Point3D,
    #[serde(default, deserialize_with = "null_as_default")]
    pub panos: Vec<Pano>,
}

/// A tag (Mattertag) anchored in the model.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tag {
    pub id: String,
    #[serde(default)]
    pub label: Option<String>,
    pub anchor_position: Point3D,
}

/// A note anchored in the model.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Note {
    pub id: String,
    #[serde(default)]
    pub label: Option<String>,
    pub anchor_position: Point3D,
}

/// Model-level calibration mapping local space to the globe.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelGeoreference {
    /// Where the calibration came from (e.g. "GPS", "USER").
    pub source: Option<String>,
    /// Altitude of the model origin in meters.
    pub altitude: Option<f64>,
    /// Latitude of the model origin in degrees.
    pub latitude: f64,
    /// Longitude of the model origin in degrees.
    pub longitude: f64,
    /// Translation from local space to the georeferenced frame.
    pub translation: DVec3,
    /// Rotation from local space to the georeferenced frame.
    pub rotation: DQuat,
}

/// Which kind of entity an export record describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordKind {
    Sweep,
    Tag,
    Note,
}

impl RecordKind {
    /// Lowercase name used in output.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sweep => "sweep",
            Self::Tag => "tag",
            Self::Note => "note",
        }
    }
}

/// A single exported entity with both local and geographic coordinates.
///
/// The geographic coordinate is `None` only for local-only exports.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ExportRecord {
    Sweep {
        id: String,
        local: Point3D,
        #[serde(skip_serializing_if = "Option::is_none")]
        geo: Option<GeoCoordinate>,
        #[serde(rename = "skyboxImages", skip_serializing_if = "Option::is_none")]
        skybox_images: Option<Vec<String>>,
    },
    Tag {
        id: String,
        label: Option<String>,
        local: Point3D,
        #[serde(skip_serializing_if = "Option::is_none")]
        geo: Option<GeoCoordinate>,
    },
    Note {
        id: String,
        text: Option<String>,
        local: Point3D,
        #[serde(skip_serializing_if = "Option::is_none")]
        geo: Option<GeoCoordinate>,
    },
}

impl ExportRecord {
    /// The record discriminant.
    #[must_use]
    pub fn kind(&self) -> RecordKind {
        match self {
            Self::Sweep { .. } => RecordKind::Sweep,
            Self::Tag { .. } => RecordKind::Tag,
            Self::Note { .. } => RecordKind::Note,
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        match self {
            Self::Sweep { id, .. } | Self::Tag { id, .. } | Self::Note { id, .. } => id,
        }
    }

    #[must_use]
    pub fn local(&self) -> Point3D {
        match self {
            Self::Sweep { local, .. } | Self::Tag { local, .. } | Self::Note { local, .. } => {
                *local
            }
        }
    }

    #[must_use]
    pub fn geo(&self) -> Option<GeoCoordinate> {
        match self {
            Self::Sweep { geo, .. } | Self::Tag { geo, .. } | Self::Note { geo, .. } => *geo,
        }
    }
}

/// Treat an explicit JSON `null` the same as a missing field.
fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}
