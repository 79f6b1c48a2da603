//! Per-frame simulation state and the collaborators the simulation consults

use ember_core::Aabb;
use glam::{Mat4, Quat, Vec3};
use std::collections::HashMap;

/// Identifies a collider inside a [`ParticleScene`]
pub type ColliderId = u64;

/// Result of a successful ray cast
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RayHit {
    pub point: Vec3,
    pub normal: Vec3,
    pub distance: f32,
}

/// Physics scene queried by gravity and world collisions
pub trait ParticleScene: Send + Sync {
    /// Scene gravity in world space
    fn gravity(&self) -> Vec3;

    /// Colliders whose shapes overlap an oriented box, filtered by layer mask
    fn box_overlap(&self, bounds: &Aabb, rotation: Quat, layer: u64) -> Vec<ColliderId>;

    /// Cast a ray against a single collider. `direction` is normalized.
    fn ray_cast(
        &self,
        collider: ColliderId,
        origin: Vec3,
        direction: Vec3,
        max_distance: f32,
    ) -> Option<RayHit>;
}

/// Sprite sheet layout of a texture
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SpriteSheetGrid {
    pub num_rows: u32,
    pub num_columns: u32,
    /// Number of used frames. May be less than rows * columns.
    pub count: u32,
}

/// Material the particles are rendered with
pub trait ParticleMaterial: Send + Sync {
    fn has_texture_param(&self, name: &str) -> bool;

    /// Sprite sheet layout bound to texture parameter `name`, if any
    fn sprite_texture(&self, name: &str) -> Option<SpriteSheetGrid>;
}

/// Current bone matrices of skeletal animations, keyed by animation id
#[derive(Clone, Debug, Default)]
pub struct AnimationPoses {
    poses: HashMap<u64, Vec<Mat4>>,
}

impl AnimationPoses {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, animation_id: u64, bones: Vec<Mat4>) {
        self.poses.insert(animation_id, bones);
    }

    pub fn bones(&self, animation_id: u64) -> Option<&[Mat4]> {
        self.poses.get(&animation_id).map(Vec::as_slice)
    }
}

/// Timing and environment of one simulation step, shared by emitters and evolvers
#[derive(Clone, Copy)]
pub struct ParticleSystemState<'a> {
    /// System time at the start and end of the step, in seconds
    pub time_start: f32,
    pub time_end: f32,
    /// Same times normalized by the system duration. `end < start` when the step wrapped.
    pub nrm_time_start: f32,
    pub nrm_time_end: f32,
    /// System duration in seconds
    pub length: f32,
    pub time_step: f32,
    /// Set while stepping freshly emitted particles that were born across the
    /// frame. Holds the emitter's leftover fraction of a particle.
    pub spacing: Option<f32>,
    pub max_particles: usize,
    pub world_space: bool,
    pub local_to_world: Mat4,
    pub world_to_local: Mat4,
    pub anim: Option<&'a AnimationPoses>,
    pub scene: Option<&'a dyn ParticleScene>,
    pub material: Option<&'a dyn ParticleMaterial>,
}

impl<'a> ParticleSystemState<'a> {
    /// State for a local-space system at time zero
    pub fn new(time_step: f32, length: f32, max_particles: usize) -> Self {
        let length = length.max(f32::EPSILON);
        Self {
            time_start: 0.0,
            time_end: time_step,
            nrm_time_start: 0.0,
            nrm_time_end: time_step / length,
            length,
            time_step,
            spacing: None,
            max_particles,
            world_space: false,
            local_to_world: Mat4::IDENTITY,
            world_to_local: Mat4::IDENTITY,
            anim: None,
            scene: None,
            material: None,
        }
    }

    /// Seconds that particle `i` of a `count` long batch lives through this step.
    /// Spaced particles born later in the frame get a shorter step.
    pub fn particle_time_step(&self, i: usize, count: usize) -> f32 {
        match self.spacing {
            Some(offset) if count > 0 => {
                let born = ((i as f32 + offset) / count as f32).min(1.0);
                self.time_step * (1.0 - born)
            }
            _ => self.time_step,
        }
    }
}
