//! Domain layer: models and errors, free of I/O.

pub mod errors;
pub mod models;

pub use errors::{DomainError, DomainResult};
