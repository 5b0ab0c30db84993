//! Common types, traits, and error definitions for miqp_planning
//!
//! This module provides the foundational building blocks shared by the
//! combinatorial planning stage and the smoothing stage.

pub mod types;
pub mod traits;
pub mod error;

pub use types::*;
pub use traits::*;
pub use error::*;
