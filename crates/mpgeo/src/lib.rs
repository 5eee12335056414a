//! Rate-limited client for geocoding Matterport model data.
//!
//! This crate talks to the Matterport Model API over GraphQL, fetches sweep
//! locations, tags and notes, converts their model-space positions into
//! geographic coordinates, and renders the results as JSON, GeoJSON or CSV.
//!
//! # Design principles
//!
//! - **One shared transport**: every request goes through a single
//!   rate limiter with retry and exponential backoff
//! - **Bounded batches**: batch geocoding runs a fixed-size worker pool and
//!   returns results in input order
//! - **Typed records**: export records are a closed enum, not loose maps
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use mpgeo::{BatchOptions, Client, TransportConfig, batch_geocode, export};
//!
//! let client = Client::new(TransportConfig::new(mpgeo::DEFAULT_URL, auth_header))?;
//! let tags = client.fetch_tags("SxQL3iGyoDo").await?;
//!
//! let geocoder = Arc::new(client.geocoder("SxQL3iGyoDo"));
//! let points = export::tag_points(&tags);
//! let coords = batch_geocode(geocoder, &points, &BatchOptions::default()).await?;
//! ```

pub mod auth;
pub mod batch;
mod client;
mod error;
pub mod export;
pub mod output;
pub mod queries;
mod transport;
pub mod types;

pub use auth::{CredentialSources, CredentialStore, Credentials, KeyringStore, TerminalPrompt};
pub use batch::{
    BatchOptions, BatchProgress, CancelFlag, DEFAULT_CONCURRENCY, batch_geocode,
    batch_geocode_settled,
};
pub use client::{Client, GeocodeFuture, Geocoder, ModelGeocoder};
pub use error::{Error, Result};
pub use output::{Destination, OutputFormat};
pub use transport::{
    DEFAULT_BACKOFF_BASE, DEFAULT_MAX_RPS, DEFAULT_RETRIES, DEFAULT_TIMEOUT, DEFAULT_URL,
    DEFAULT_USER_AGENT, RateLimiter, Transport, TransportConfig,
};
pub use types::{
    ExportRecord, GeoCoordinate, Location, ModelGeoreference, Note, Pano, Point3D, RecordKind,
    Skybox, Tag,
};
