//! Typed client for the model GraphQL API.
//!
//! This module provides the main `Client` type for fetching sweep locations,
//! tags, notes and georeference data, and for geocoding individual points.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value, json};

use crate::error::{Error, Result};
use crate::queries;
use crate::transport::{RateLimiter, Transport, TransportConfig};
use crate::types::{GeoCoordinate, Location, ModelGeoreference, Note, Point3D, Tag};

/// Future type for geocode operations.
pub type GeocodeFuture<'a> = Pin<Box<dyn Future<Output = Result<GeoCoordinate>> + Send + 'a>>;

/// Something that can turn a local point into a geographic coordinate.
///
/// The batch geocoder runs over this trait so it can be driven by the real
/// API client or by a stand-in.
pub trait Geocoder: Send + Sync {
    /// Geocode a single point.
    fn geocode(&self, point: Point3D) -> GeocodeFuture<'_>;

    /// The rate limiter shared by every call, if any.
    ///
    /// Batches use this to apply a temporary `max_rps` override.
    fn limiter(&self) -> Option<&RateLimiter> {
        None
    }
}

/// Client for the model GraphQL API.
///
/// Cloning is cheap; clones share the same [`Transport`] and therefore the
/// same rate limit.
///
/// # Example
///
/// ```ignore
/// let client = Client::new(TransportConfig::new(DEFAULT_URL, auth_header))?;
/// let tags = client.fetch_tags("SxQL3iGyoDo").await?;
/// ```
#[derive(Debug, Clone)]
pub struct Client {
    transport: Arc<Transport>,
}

impl Client {
    /// Create a client with its own transport.
    pub fn new(config: TransportConfig) -> Result<Self> {
        Ok(Self {
            transport: Arc::new(Transport::new(config)?),
        })
    }

    /// Fetch sweep locations with their panos.
    ///
    /// A model without locations yields an empty list.
    pub async fn fetch_locations(&self, model_id: &str) -> Result<Vec<Location>> {
        let data = self.transport.post(queries::GET_SWEEPS, model_vars(model_id)).await?;
        model_list(data, "locations", "locations")
    }

    /// Fetch the model's tags.
    pub async fn fetch_tags(&self, model_id: &str) -> Result<Vec<Tag>> {
        let data = self.transport.post(queries::GET_TAGS, model_vars(model_id)).await?;
        model_list(data, "mattertags", "tags")
    }

    /// Fetch the model's notes.
    pub async fn fetch_notes(&self, model_id: &str) -> Result<Vec<Note>> {
        let data = self.transport.post(queries::GET_NOTES, model_vars(model_id)).await?;
        model_list(data, "notes", "notes")
    }

    /// Geocode one model-space point.
    ///
    /// Returns [`Error::GeocodeUnavailable`] when the server has no location
    /// for the point; this is not retried.
    pub async fn geocode_point(&self, model_id: &str, point: Point3D) -> Result<GeoCoordinate> {
        let mut variables = model_vars(model_id);
        variables.insert(
            "point".to_string(),
            json!({"x": point.x, "y": point.y, "z": point.z}),
        );

        let data = self.transport.post(queries::GET_GEO, variables).await?;
        let geo = Value::Object(data)
            .pointer_mut("/model/geocoordinates/geoLocationOf")
            .map(Value::take)
            .unwrap_or(Value::Null);

        if geo.is_null() {
            return Err(Error::GeocodeUnavailable { point });
        }

        serde_json::from_value(geo).map_err(|e| Error::InvalidData {
            context: "geolocation",
            detail: e.to_string(),
        })
    }

    /// Fetch the model-level georeference.
    ///
    /// Returns `None` if the model is not georeferenced.
    pub async fn fetch_model_georeference(
        &self,
        model_id: &str,
    ) -> Result<Option<ModelGeoreference>> {
        let data = self
            .transport
            .post(queries::GET_MODEL_GEOCOORDINATES, model_vars(model_id))
            .await?;
        let raw = Value::Object(data)
            .pointer_mut("/model/geocoordinates")
            .map(Value::take)
            .unwrap_or(Value::Null);

        if raw.is_null() {
            return Ok(None);
        }

        let raw: RawGeoreference = serde_json::from_value(raw).map_err(|e| Error::InvalidData {
            context: "model geocoordinates",
            detail: e.to_string(),
        })?;
        Ok(raw.into_georeference())
    }

    /// Bind this client to a model for batch geocoding.
    #[must_use]
    pub fn geocoder(&self, model_id: impl Into<String>) -> ModelGeocoder {
        ModelGeocoder {
            client: self.clone(),
            model_id: model_id.into(),
        }
    }
}

/// A [`Geocoder`] that geocodes points of one model through a [`Client`].
#[derive(Debug, Clone)]
pub struct ModelGeocoder {
    client: Client,
    model_id: String,
}

impl Geocoder for ModelGeocoder {
    fn geocode(&self, point: Point3D) -> GeocodeFuture<'_> {
        Box::pin(self.client.geocode_point(&self.model_id, point))
    }

    fn limiter(&self) -> Option<&RateLimiter> {
        Some(self.client.transport.limiter())
    }
}

fn model_vars(model_id: &str) -> Map<String, Value> {
    let mut variables = Map::new();
    variables.insert("modelId".to_string(), Value::String(model_id.to_string()));
    variables
}

/// Pull `data.model.<field>` out as a list; a missing model or field is empty.
fn model_list<T: DeserializeOwned>(
    mut data: Map<String, Value>,
    field: &str,
    context: &'static str,
) -> Result<Vec<T>> {
    let Some(Value::Object(mut model)) = data.remove("model") else {
        return Ok(Vec::new());
    };

    match model.remove(field) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(list) => serde_json::from_value(list).map_err(|e| Error::InvalidData {
            context,
            detail: e.to_string(),
        }),
    }
}

#[derive(Deserialize)]
struct RawQuat {
    x: f64,
    y: f64,
    z: f64,
    w: f64,
}

#[derive(Deserialize)]
struct RawGeoreference {
    #[serde(default)]
    source: Option<String>,
    #[serde(default)]
    altitude: Option<f64>,
    #[serde(default)]
    latitude: Option<f64>,
    #[serde(default)]
    longitude: Option<f64>,
    #[serde(default)]
    translation: Option<Point3D>,
    #[serde(default)]
    rotation: Option<RawQuat>,
}

impl RawGeoreference {
    fn into_georeference(self) -> Option<ModelGeoreference> {
        let (latitude, longitude) = (self.latitude?, self.longitude?);
        Some(ModelGeoreference {
            source: self.source,
            altitude: self.altitude,
            latitude,
            longitude,
            translation: self.translation.map_or(glam::DVec3::ZERO, Into::into),
            rotation: self
                .rotation
                .map_or(glam::DQuat::IDENTITY, |q| glam::DQuat::from_xyzw(q.x, q.y, q.z, q.w)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn test_model_vars() {
        let vars = model_vars("M");
        assert_eq!(vars["modelId"], "M");
    }

    #[test]
    fn test_model_list_missing_model_is_empty() {
        let tags: Vec<Tag> =
            model_list(data(json!({"model": null})), "mattertags", "tags").unwrap();
        assert!(tags.is_empty());

        let tags: Vec<Tag> = model_list(data(json!({})), "mattertags", "tags").unwrap();
        assert!(tags.is_empty());
    }

    #[test]
    fn test_model_list_decodes() {
        let value = json!({"model": {"notes": [
            {"id": "n1", "label": "Hi", "anchorPosition": {"x": 1, "y": 2, "z": 3}},
            {"id": "n2", "label": null, "anchorPosition": {"x": 4, "y": 5, "z": 6}},
        ]}});
        let notes: Vec<Note> = model_list(data(value), "notes", "notes").unwrap();
        assert_eq!(notes.len(), 2);
        assert_eq!(notes[0].label.as_deref(), Some("Hi"));
        assert!(notes[1].label.is_none());
    }

    #[test]
    fn test_model_list_bad_shape() {
        let value = json!({"model": {"notes": [{"id": 5}]}});
        let err = model_list::<Note>(data(value), "notes", "notes").unwrap_err();
        assert!(matches!(err, Error::InvalidData { context: "notes", .. }));
    }

    #[test]
    fn test_raw_georeference_defaults() {
        let raw: RawGeoreference = serde_json::from_value(json!({
            "source": "GPS",
            "latitude": 37.5,
            "longitude": -122.1,
        }))
        .unwrap();
        let georef = raw.into_georeference().unwrap();
        assert_eq!(georef.source.as_deref(), Some("GPS"));
        assert_eq!(georef.translation, glam::DVec3::ZERO);
        assert_eq!(georef.rotation, glam::DQuat::IDENTITY);
    }

    #[test]
    fn test_raw_georeference_without_lat_long() {
        let raw: RawGeoreference =
            serde_json::from_value(json!({"latitude": null, "longitude": null})).unwrap();
        assert!(raw.into_georeference().is_none());
    }
}
