//! Evolvers mutate live particles every frame
//!
//! Each evolver walks a contiguous range of the particle set. Evolvers that
//! need randomness derive a generator from the particle seed plus a tag that
//! is unique per evolver kind, so two evolvers never draw correlated values
//! for the same particle and repeated evaluation is stable.

mod appearance;
mod collisions;
mod motion;

pub use appearance::{ColorEvolver, RotationEvolver, SizeEvolver, TextureAnimationEvolver};
pub use collisions::{
    calc_collision_response, CollisionMode, CollisionPlane, CollisionsEvolver,
};
pub use motion::{ForceEvolver, GravityEvolver, OrbitEvolver, VelocityEvolver};

use crate::rand::Random;
use crate::set::ParticleSet;
use crate::state::ParticleSystemState;
use serde::Deserialize;

pub(crate) const TEXTURE_ANIMATION_TAG: u32 = 0x1e3a_9b51;
pub(crate) const ORBIT_TAG: u32 = 0x2c7f_41d3;
pub(crate) const VELOCITY_TAG: u32 = 0x3b19_e6a7;
pub(crate) const FORCE_TAG: u32 = 0x4d82_0c35;
pub(crate) const COLOR_TAG: u32 = 0x5a6e_f219;
pub(crate) const SIZE_TAG: u32 = 0x6f04_3b8d;
pub(crate) const ROTATION_TAG: u32 = 0x71d5_a463;

/// Generator for one particle, independent of other evolver kinds
pub(crate) fn particle_random(seed: u32, tag: u32) -> Random {
    Random::new(seed.wrapping_add(tag))
}

/// Normalized age in [0, 1]
pub(crate) fn particle_t(initial_lifetime: f32, lifetime: f32) -> f32 {
    if initial_lifetime > 0.0 {
        ((initial_lifetime - lifetime) / initial_lifetime).clamp(0.0, 1.0)
    } else {
        0.0
    }
}

/// When an evolver runs relative to velocity integration
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EvolverStage {
    #[default]
    BeforeIntegration,
    AfterIntegration,
}

/// Scheduling of an evolver within a system
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EvolverProperties {
    /// Lower runs first within a stage
    pub priority: i32,
    pub stage: EvolverStage,
}

/// Closed set of evolvers. Deserialized from a table tagged by `type`.
#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ParticleEvolver {
    TextureAnimation(TextureAnimationEvolver),
    Orbit(OrbitEvolver),
    Velocity(VelocityEvolver),
    Force(ForceEvolver),
    Gravity(GravityEvolver),
    Color(ColorEvolver),
    Size(SizeEvolver),
    Rotation(RotationEvolver),
    Collisions(CollisionsEvolver),
}

impl ParticleEvolver {
    /// Default scheduling for this kind. Collisions inspect the motion of the
    /// frame, so they run after integration.
    pub fn properties(&self) -> EvolverProperties {
        match self {
            Self::Collisions(_) => EvolverProperties {
                priority: 0,
                stage: EvolverStage::AfterIntegration,
            },
            Self::Force(_) | Self::Gravity(_) => EvolverProperties {
                priority: -10,
                stage: EvolverStage::BeforeIntegration,
            },
            _ => EvolverProperties::default(),
        }
    }

    /// Evolve every live particle
    pub fn evolve(&self, state: &ParticleSystemState, set: &mut ParticleSet) {
        let count = set.particle_count();
        self.evolve_range(state, set, 0, count);
    }

    /// Evolve particles `[start, start + count)`
    pub fn evolve_range(
        &self,
        state: &ParticleSystemState,
        set: &mut ParticleSet,
        start: usize,
        count: usize,
    ) {
        let end = (start + count).min(set.particle_count());
        if start >= end {
            return;
        }

        match self {
            Self::TextureAnimation(e) => e.evolve(state, set, start, end),
            Self::Orbit(e) => e.evolve(state, set, start, end),
            Self::Velocity(e) => e.evolve(state, set, start, end),
            Self::Force(e) => e.evolve(state, set, start, end),
            Self::Gravity(e) => e.evolve(state, set, start, end),
            Self::Color(e) => e.evolve(set, start, end),
            Self::Size(e) => e.evolve(set, start, end),
            Self::Rotation(e) => e.evolve(set, start, end),
            Self::Collisions(e) => e.evolve(state, set, start, end),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::TextureAnimation(_) => "texture_animation",
            Self::Orbit(_) => "orbit",
            Self::Velocity(_) => "velocity",
            Self::Force(_) => "force",
            Self::Gravity(_) => "gravity",
            Self::Color(_) => "color",
            Self::Size(_) => "size",
            Self::Rotation(_) => "rotation",
            Self::Collisions(_) => "collisions",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn particle_t_is_normalized_age() {
        assert_eq!(particle_t(10.0, 10.0), 0.0);
        assert_eq!(particle_t(10.0, 5.0), 0.5);
        assert_eq!(particle_t(10.0, -1.0), 1.0);
        assert_eq!(particle_t(0.0, 0.0), 0.0);
    }

    #[test]
    fn tags_are_distinct() {
        let mut tags = vec![
            TEXTURE_ANIMATION_TAG,
            ORBIT_TAG,
            VELOCITY_TAG,
            FORCE_TAG,
            COLOR_TAG,
            SIZE_TAG,
            ROTATION_TAG,
        ];
        tags.sort_unstable();
        tags.dedup();
        assert_eq!(tags.len(), 7);
    }

    #[test]
    fn collisions_run_after_integration() {
        let collisions = ParticleEvolver::Collisions(CollisionsEvolver::default());
        assert_eq!(collisions.properties().stage, EvolverStage::AfterIntegration);
        let color = ParticleEvolver::Color(ColorEvolver::default());
        assert_eq!(color.properties().stage, EvolverStage::BeforeIntegration);
    }

    #[test]
    fn out_of_range_is_ignored() {
        let mut set = ParticleSet::new(0);
        set.alloc_particles(2);
        let state = ParticleSystemState::new(0.1, 1.0, 10);
        let evolver = ParticleEvolver::Gravity(GravityEvolver::default());
        evolver.evolve_range(&state, &mut set, 5, 3);
        assert_eq!(set.particles().velocity[0], glam::Vec3::ZERO);
    }
}
