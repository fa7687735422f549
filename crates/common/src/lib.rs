//! Shared types for the village API client workspace

mod error;
mod secret;

pub use error::{Error, Result};
pub use secret::Secret;
