//! Common types, traits, and error definitions for reactive_ltl
//!
//! This module provides the foundational building blocks used across
//! the geometry, specification, and planning modules.

pub mod error;
pub mod traits;
pub mod types;

pub use error::*;
pub use traits::*;
pub use types::*;
