//! Shared types for the Stemway platform services
//!
//! Holds the error taxonomy and configuration resolution used by every
//! Stemway microservice binary.

pub mod config;
pub mod error;

pub use error::{Error, Result};
