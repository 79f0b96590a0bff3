//! Common types shared across the Lance client workspace

mod secret;
mod error;

pub use secret::Secret;
pub use error::{Error, Result};
