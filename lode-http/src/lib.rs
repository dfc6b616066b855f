//! HTTP functionality for LodeRunner
//!
//! Request definition files, the [`Transport`] the load engine sends
//! requests through, a reqwest-backed implementation and the minimal
//! response checks applied to every reply.

pub mod config;
pub mod errors;
pub mod loader;
pub mod transport;
pub mod types;
pub mod validation;

// Re-export main types for convenience
pub use config::HttpConfig;
pub use errors::HttpError;
pub use loader::{load_requests, RequestSource};
pub use transport::{HttpResponse, ReqwestTransport, Transport, CORRELATION_HEADER};
pub use types::{HttpMethod, HttpMethodError, PerfTarget, RequestDefinition, RequestFile};
pub use validation::{validate_response, ResponseValidation, ValidationResult};
