//! Ember Physics - Rapier 3D integration
//!
//! Provides the physics scene particle systems collide against:
//! - `PhysicsWorld`: wraps Rapier pipeline, body/collider sets and the query pipeline
//! - `ParticleScene` implementation for gravity, box overlap and per-collider ray casts

pub mod world;

pub use world::{collider_handle, collider_id, PhysicsWorld};
