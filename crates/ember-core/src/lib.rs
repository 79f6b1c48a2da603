//! Ember Core - Foundational types for the Ember particle engine
//!
//! This crate provides the core types that all other Ember crates depend on:
//! - `SystemId` - Unique particle system identifiers
//! - `Aabb` - Axis aligned bounds
//! - `Transform` - Position/rotation/scale with matrix conversion
//! - Error types and Result alias

mod bounds;
mod error;
mod id;
mod types;

pub use bounds::Aabb;
pub use error::{EmberError, Result};
pub use id::SystemId;
pub use types::Transform;
