//! Evolvers that move particles

use super::{particle_random, particle_t, FORCE_TAG, ORBIT_TAG, VELOCITY_TAG};
use crate::distribution::Distribution;
use crate::set::ParticleSet;
use crate::state::ParticleSystemState;
use glam::{EulerRot, Mat3, Vec3};
use serde::Deserialize;
use std::f32::consts::TAU;

/// Gravity used when no scene is available
pub const DEFAULT_GRAVITY: Vec3 = Vec3::new(0.0, -9.81, 0.0);

/// Convert a direction given in world or local space into the system's simulation space
fn to_simulation_space(state: &ParticleSystemState, v: Vec3, world_space: bool) -> Vec3 {
    match (world_space, state.world_space) {
        (true, false) => state.world_to_local.transform_vector3(v),
        (false, true) => state.local_to_world.transform_vector3(v),
        _ => v,
    }
}

/// Moves particles by a velocity that varies over their lifetime
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct VelocityEvolver {
    pub velocity: Distribution<Vec3>,
    /// Velocity is given in world space rather than in the system's local space
    pub world_space: bool,
}

impl VelocityEvolver {
    pub(crate) fn evolve(
        &self,
        state: &ParticleSystemState,
        set: &mut ParticleSet,
        start: usize,
        end: usize,
    ) {
        let p = set.particles_mut();
        for i in start..end {
            let t = particle_t(p.initial_lifetime[i], p.lifetime[i]);
            let mut random = particle_random(p.seed[i], VELOCITY_TAG);
            let v = self.velocity.evaluate_random(t, &mut random);
            let dt = state.particle_time_step(i - start, end - start);
            p.position[i] += to_simulation_space(state, v, self.world_space) * dt;
        }
    }
}

/// Accelerates particles by a force that varies over their lifetime
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct ForceEvolver {
    pub force: Distribution<Vec3>,
    pub world_space: bool,
}

impl ForceEvolver {
    pub(crate) fn evolve(
        &self,
        state: &ParticleSystemState,
        set: &mut ParticleSet,
        start: usize,
        end: usize,
    ) {
        let p = set.particles_mut();
        for i in start..end {
            let t = particle_t(p.initial_lifetime[i], p.lifetime[i]);
            let mut random = particle_random(p.seed[i], FORCE_TAG);
            let f = self.force.evaluate_random(t, &mut random);
            let dt = state.particle_time_step(i - start, end - start);
            p.velocity[i] += to_simulation_space(state, f, self.world_space) * dt;
        }
    }
}

/// Applies scene gravity
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct GravityEvolver {
    pub scale: f32,
}

impl Default for GravityEvolver {
    fn default() -> Self {
        Self { scale: 1.0 }
    }
}

impl GravityEvolver {
    pub(crate) fn evolve(
        &self,
        state: &ParticleSystemState,
        set: &mut ParticleSet,
        start: usize,
        end: usize,
    ) {
        let gravity = state.scene.map_or(DEFAULT_GRAVITY, |scene| scene.gravity());
        let gravity = to_simulation_space(state, gravity, true);
        let acceleration = gravity * self.scale;

        let p = set.particles_mut();
        for (i, v) in p.velocity[start..end].iter_mut().enumerate() {
            *v += acceleration * state.particle_time_step(i, end - start);
        }
    }
}

/// Rotates particles around a pivot
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct OrbitEvolver {
    pub center: Distribution<Vec3>,
    /// Revolutions per second around each axis
    pub velocity: Distribution<Vec3>,
    /// Speed away from (positive) or toward (negative) the pivot
    pub radial: Distribution<f32>,
    /// Center is given in world space rather than in the system's local space
    pub world_space: bool,
}

impl Default for OrbitEvolver {
    fn default() -> Self {
        Self {
            center: Distribution::Constant(Vec3::ZERO),
            velocity: Distribution::Constant(Vec3::new(0.0, 1.0, 0.0)),
            radial: Distribution::Constant(0.0),
            world_space: false,
        }
    }
}

impl OrbitEvolver {
    pub(crate) fn evolve(
        &self,
        state: &ParticleSystemState,
        set: &mut ParticleSet,
        start: usize,
        end: usize,
    ) {
        let p = set.particles_mut();
        for i in start..end {
            let t = particle_t(p.initial_lifetime[i], p.lifetime[i]);
            let mut random = particle_random(p.seed[i], ORBIT_TAG);

            let mut center = self.center.evaluate_random(t, &mut random);
            match (self.world_space, state.world_space) {
                (true, false) => center = state.world_to_local.transform_point3(center),
                (false, true) => center = state.local_to_world.transform_point3(center),
                _ => {}
            }

            let dt = state.particle_time_step(i - start, end - start);
            let angles = self.velocity.evaluate_random(t, &mut random) * TAU * dt;
            let rotation = Mat3::from_euler(EulerRot::XYZ, angles.x, angles.y, angles.z);

            let offset = p.position[i] - center;
            let mut displacement = rotation * offset - offset;

            let radial = self.radial.evaluate_random(t, &mut random);
            if radial != 0.0 {
                displacement += offset.normalize_or_zero() * radial * dt;
            }

            p.position[i] += displacement;
        }
    }
}
