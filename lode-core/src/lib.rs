//! Core domain models and types for LodeRunner
//!
//! This crate contains the documents exchanged between the control plane and
//! the load-generating workers, the validation rules applied before anything
//! is persisted, and the explicit partial-update payloads. It has minimal
//! dependencies and defines the domain language of the application.

pub mod constants;
pub mod entity;
pub mod error;
pub mod models;
pub mod payload;
pub mod validation;

// Re-export commonly used types at the crate root
pub use entity::{ClientStatusType, Entity, EntityBase, EntityType};
pub use error::{CoreError, Result, ValidationError};
pub use models::{
    AppendOutcome, ClientStatus, LoadClient, LoadResult, LoadTestConfig, TestRun,
};
pub use payload::{LoadTestConfigPayload, TestRunPayload};
pub use validation::Validate;
