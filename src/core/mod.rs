//! Core domain models
//!
//! Pipelines, steps, their run state and the error taxonomy, plus the YAML
//! configuration they can be built from.

pub mod config;
pub mod context;
pub mod error;
pub mod pipeline;
pub mod state;
pub mod step;

pub use context::*;
pub use error::*;
pub use pipeline::*;
pub use state::*;
pub use step::*;
