//! Shared types for the Spotify credential engine workspace

mod error;
mod secret;

pub use error::{Error, Result};
pub use secret::Secret;
