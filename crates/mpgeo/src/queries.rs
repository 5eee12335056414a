//! The fixed GraphQL documents sent to the model API.

/// Sweep locations with their panos and skybox image URLs.
pub const GET_SWEEPS: &str = r"
query getSweeps($modelId: ID!) {
  model(id: $modelId) {
    locations {
      id
      position { x y z }
      panos {
        skybox { children }
      }
    }
  }
}
";

/// Mattertags with their anchor positions.
pub const GET_TAGS: &str = r"
query getTags($modelId: ID!) {
  model(id: $modelId) {
    mattertags {
      id
      label
      anchorPosition { x y z }
    }
  }
}
";

/// Notes with their anchor positions.
pub const GET_NOTES: &str = r"
query getNotes($modelId: ID!) {
  model(id: $modelId) {
    notes {
      id
      label
      anchorPosition { x y z }
    }
  }
}
";

/// Geographic location of a single model-space point.
pub const GET_GEO: &str = r"
query getLatLongOfModelPoint($modelId: ID!, $point: IPoint3D!) {
  model(id: $modelId) {
    geocoordinates {
      geoLocationOf(modelLocation: $point) { lat long alt }
    }
  }
}
";

/// Model-level georeference calibration.
pub const GET_MODEL_GEOCOORDINATES: &str = r"
query getModelGeocoordinates($modelId: ID!) {
  model(id: $modelId) {
    geocoordinates {
      source
      altitude
      latitude
      longitude
      translation { x y z }
      rotation { x y z w }
    }
  }
}
";
