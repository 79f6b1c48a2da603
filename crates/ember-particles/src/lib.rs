//! Ember Particles - CPU particle simulation and render-data staging
//!
//! Provides deterministic, pooled particle effects with:
//! - Struct-of-arrays particle storage with O(1) swap-removal
//! - Emitter shapes (cone, sphere, box, line, circle, rect, static and skinned meshes)
//! - Evolvers for motion, appearance and collisions
//! - A double-buffered manager that simulates every system in parallel
//! - Pooled pixel buffers and GPU upload lists for the renderer

pub mod config;
pub mod curves;
pub mod distribution;
pub mod emitter;
pub mod evolver;
pub mod manager;
pub mod rand;
pub mod render_data;
pub mod set;
pub mod shape;
pub mod state;
pub mod system;

pub use config::{ParticleManagerConfig, ParticleSystemConfig};
pub use distribution::{ColorDistribution, Distribution};
pub use emitter::{ParticleBurst, ParticleEmitter, SpawnedParticles};
pub use evolver::{EvolverProperties, EvolverStage, ParticleEvolver};
pub use manager::{ParticleFrameInputs, ParticleManager, NUM_SYNC_BUFFERS};
pub use render_data::{GpuParticle, ParticleFrame, ParticleRenderData, RenderBuffers};
pub use set::{ParticleSet, ParticleSetData};
pub use shape::ParticleEmitterShape;
pub use state::{AnimationPoses, ParticleMaterial, ParticleScene, ParticleSystemState};
pub use system::{
    ParticleSystem, ParticleSystemSettings, PlaybackState, SimulationContext, SortMode,
};
