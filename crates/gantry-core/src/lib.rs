//! Gantry Core
//!
//! Core domain types, traits, and error handling for Gantry.
//! This crate has minimal dependencies and defines the shared vocabulary
//! used across all other crates: events, workflow definitions, gate
//! conditions, job instances, artifacts and releases.

pub mod artifact;
pub mod condition;
pub mod error;
pub mod event;
pub mod ids;
pub mod interpolation;
pub mod ports;
pub mod run;
pub mod workflow;

pub use error::{Error, Result};
pub use ids::*;
