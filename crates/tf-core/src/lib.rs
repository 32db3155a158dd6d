//! tf-core: shared types, IDs, errors, configuration, and job events.
//!
//! This crate is the foundational dependency for the other tf-* crates,
//! providing typed identifiers, a unified error type, the texture-domain
//! enums, task and job state machines, structured job events, and the
//! JSON configuration model.

pub mod config;
pub mod error;
pub mod events;
pub mod ids;
pub mod status;
pub mod texture;

// Re-export the most commonly used items at the crate root.
pub use error::{Error, Result};
pub use ids::*;
pub use status::*;
pub use texture::*;
