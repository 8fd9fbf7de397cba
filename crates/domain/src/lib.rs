//! Shared domain types for RunTrail: entities, settings resolution,
//! configuration, input validation, and the crate-wide error type.

pub mod config;
pub mod error;
pub mod run;
pub mod settings;
pub mod validate;

pub use error::{Error, Result};
