pub mod bundle;
pub mod client;
pub mod summary;

pub use bundle::*;
pub use client::*;
pub use summary::*;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum FhirError {
    #[error("FHIR server is not reachable at {0}")]
    Connection(String),

    #[error("FHIR request timed out after {0}s")]
    Timeout(u64),

    #[error("FHIR request failed (status {status}): {body}")]
    Server { status: u16, body: String },

    #[error("HTTP client error: {0}")]
    HttpClient(String),

    #[error("Malformed FHIR response: {0}")]
    MalformedResponse(String),
}
