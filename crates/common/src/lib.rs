//! Shared types for the API client workspace

mod error;
mod secret;

pub use error::{Error, Result};
pub use secret::{Secret, SecretString};
