//! Error types for the mpgeo crate.

use std::fmt;

use crate::types::Point3D;

/// Result type for mpgeo operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in mpgeo operations.
#[derive(Debug)]
pub enum Error {
    /// HTTP request failed before a response arrived.
    Http {
        /// The URL that failed.
        url: String,
        /// The error message.
        message: String,
    },
    /// HTTP response had a non-success status code.
    HttpStatus {
        /// The URL that returned the error.
        url: String,
        /// The HTTP status code.
        status: u16,
    },
    /// The GraphQL response carried an `errors` field.
    GraphQl {
        /// The serialized `errors` value.
        message: String,
    },
    /// Invalid or unexpected data in a response.
    InvalidData {
        /// Context for where the error occurred.
        context: &'static str,
        /// Description of what was invalid.
        detail: String,
    },
    /// The server has no geolocation for this point.
    GeocodeUnavailable {
        /// The point that could not be geocoded.
        point: Point3D,
    },
    /// A required setting could not be resolved.
    Config {
        /// What is missing or invalid.
        detail: String,
    },
    /// Credential lookup, prompt or storage failed.
    Credentials {
        /// The error message.
        message: String,
    },
    /// Writing output failed.
    Io {
        /// What was being written.
        context: String,
        /// The error message.
        message: String,
    },
    /// The batch was cancelled before every point was geocoded.
    Cancelled,
}

impl Error {
    /// Whether another attempt at the same request could succeed.
    ///
    /// Transport and protocol failures are retryable; everything else is
    /// returned to the caller immediately.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Http { .. }
                | Error::HttpStatus { .. }
                | Error::GraphQl { .. }
                | Error::InvalidData { .. }
        )
    }

    /// Whether this is a protocol-level failure (a 2xx response that did not
    /// carry usable `data`).
    #[must_use]
    pub fn is_protocol(&self) -> bool {
        matches!(self, Error::GraphQl { .. } | Error::InvalidData { .. })
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Http { url, message } => {
                write!(f, "http request to {url} failed: {message}")
            }
            Error::HttpStatus { url, status } => {
                write!(f, "http request to {url} returned status {status}")
            }
            Error::GraphQl { message } => write!(f, "graphql error: {message}"),
            Error::InvalidData { context, detail } => {
                write!(f, "invalid {context}: {detail}")
            }
            Error::GeocodeUnavailable { point } => write!(
                f,
                "geolocation not available for point ({}, {}, {})",
                point.x, point.y, point.z
            ),
            Error::Config { detail } => write!(f, "configuration error: {detail}"),
            Error::Credentials { message } => write!(f, "credentials error: {message}"),
            Error::Io { context, message } => {
                write!(f, "failed to write {context}: {message}")
            }
            Error::Cancelled => write!(f, "batch cancelled"),
        }
    }
}

impl std::error::Error for Error {}

impl From<csv::Error> for Error {
    fn from(e: csv::Error) -> Self {
        Error::Io {
            context: "csv".to_string(),
            message: e.to_string(),
        }
    }
}

impl From<keyring::Error> for Error {
    fn from(e: keyring::Error) -> Self {
        Error::Credentials {
            message: e.to_string(),
        }
    }
}
