//! # hrmatch-core
//!
//! Core types, traits, and abstractions for the hrmatch applicant/job
//! matching pipeline.
//!
//! This crate provides the foundational data structures and trait definitions
//! that other hrmatch crates depend on.

pub mod defaults;
pub mod error;
pub mod logging;
pub mod models;
pub mod scoring;
pub mod traits;
pub mod vector_store;

// Re-export commonly used types at crate root
pub use error::{Error, Result};
pub use models::*;
pub use scoring::{distance_to_similarity, rank, BlendedScore, Ranked, ScoreCalibration};
pub use traits::*;
pub use vector_store::*;
