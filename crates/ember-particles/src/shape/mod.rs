//! Emitter shapes: where new particles appear and which way they face
//!
//! Every shape allocates the requested particles in the set and writes their
//! `position` and `velocity`. Velocity holds the unit emission direction; the
//! emitter scales it by the initial speed afterwards.

mod basic;
mod mesh;

pub use basic::{
    BoxShape, BoxType, CircleShape, ConeShape, ConeType, HemisphereShape, LineShape, RectShape,
    SphereShape,
};
pub use mesh::{
    IndexBuffer, MeshData, MeshEmission, MeshEmissionType, MeshWeightedTriangles, SkinnedMeshShape,
    StaticMeshShape, VertexElement, VertexFormat, VertexSemantic,
};

use crate::rand::Random;
use crate::set::ParticleSet;
use crate::state::ParticleSystemState;
use ember_core::Aabb;
use glam::Vec3;
use serde::Deserialize;

/// How parametric shapes (line, circle, cone) pick the spawn point along their length
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmissionModeType {
    /// Uniformly random position
    #[default]
    Random,
    /// Sweep along the shape over time, wrapping at the end
    Loop,
    /// Sweep back and forth over time
    PingPong,
    /// Space this frame's particles evenly over the whole shape
    Spread,
}

/// Emission mode of a parametric shape
#[derive(Clone, Copy, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct ParticleEmissionMode {
    pub kind: EmissionModeType,
    /// Sweep speed for `Loop`/`PingPong`. Units per second, or degrees per second on arcs.
    pub speed: f32,
    /// When positive, spawn positions snap to multiples of this value
    pub interval: f32,
}

impl Default for ParticleEmissionMode {
    fn default() -> Self {
        Self {
            kind: EmissionModeType::Random,
            speed: 1.0,
            interval: 0.0,
        }
    }
}

/// Closed set of emitter shapes
#[derive(Clone, Debug)]
pub enum ParticleEmitterShape {
    Cone(ConeShape),
    Sphere(SphereShape),
    Hemisphere(HemisphereShape),
    Box(BoxShape),
    Line(LineShape),
    Circle(CircleShape),
    Rect(RectShape),
    StaticMesh(StaticMeshShape),
    SkinnedMesh(SkinnedMeshShape),
}

impl ParticleEmitterShape {
    /// Allocate `count` particles and initialize their position and direction.
    /// Returns the index of the first new particle. Invalid shapes spawn nothing.
    pub fn spawn(
        &mut self,
        random: &mut Random,
        set: &mut ParticleSet,
        count: usize,
        state: &ParticleSystemState,
    ) -> usize {
        if count == 0 || !self.is_valid() {
            return set.particle_count();
        }

        match self {
            Self::Cone(shape) => shape.spawn(random, set, count, state),
            Self::Sphere(shape) => spawn_multiple(set, count, |_| shape.sample(random)),
            Self::Hemisphere(shape) => spawn_multiple(set, count, |_| shape.sample(random)),
            Self::Box(shape) => spawn_multiple(set, count, |_| shape.sample(random)),
            Self::Line(shape) => shape.spawn(random, set, count, state),
            Self::Circle(shape) => shape.spawn(random, set, count, state),
            Self::Rect(shape) => spawn_multiple(set, count, |_| shape.sample(random)),
            Self::StaticMesh(shape) => shape.spawn(random, set, count),
            Self::SkinnedMesh(shape) => shape.spawn(random, set, count, state),
        }
    }

    /// False when the shape failed validation and will not emit
    pub fn is_valid(&self) -> bool {
        match self {
            Self::StaticMesh(shape) => shape.is_valid(),
            Self::SkinnedMesh(shape) => shape.is_valid(),
            _ => true,
        }
    }

    /// Local bounds of spawn positions and of emission directions
    pub fn calc_bounds(&self) -> (Aabb, Aabb) {
        match self {
            Self::Cone(shape) => shape.calc_bounds(),
            Self::Sphere(shape) => shape.calc_bounds(),
            Self::Hemisphere(shape) => shape.calc_bounds(),
            Self::Box(shape) => shape.calc_bounds(),
            Self::Line(shape) => shape.calc_bounds(),
            Self::Circle(shape) => shape.calc_bounds(),
            Self::Rect(shape) => shape.calc_bounds(),
            Self::StaticMesh(shape) => shape.calc_bounds(),
            Self::SkinnedMesh(shape) => shape.calc_bounds(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Cone(_) => "cone",
            Self::Sphere(_) => "sphere",
            Self::Hemisphere(_) => "hemisphere",
            Self::Box(_) => "box",
            Self::Line(_) => "line",
            Self::Circle(_) => "circle",
            Self::Rect(_) => "rect",
            Self::StaticMesh(_) => "static_mesh",
            Self::SkinnedMesh(_) => "skinned_mesh",
        }
    }
}

/// Allocate `count` particles and fill position/direction from `sample`
pub(crate) fn spawn_multiple(
    set: &mut ParticleSet,
    count: usize,
    mut sample: impl FnMut(usize) -> (Vec3, Vec3),
) -> usize {
    let start = set.alloc_particles(count);
    let data = set.particles_mut();

    for i in 0..count {
        let (position, normal) = sample(i);
        data.position[start + i] = position;
        data.velocity[start + i] = normal;
    }

    start
}

/// Shapes that can be sampled at random or at a parameter along their length
pub(crate) trait ParametricShape {
    fn sample_random(&self, random: &mut Random) -> (Vec3, Vec3);
    fn sample_at(&self, t: f32) -> (Vec3, Vec3);
}

fn round_to_multiple(value: f32, multiple: f32) -> f32 {
    (value / multiple).round() * multiple
}

/// Spawn along a parametric shape of total `length` according to `mode`.
/// `speed` and `interval` are in the same units as `length`.
#[allow(clippy::too_many_arguments)]
pub(crate) fn spawn_with_mode<S: ParametricShape>(
    shape: &S,
    kind: EmissionModeType,
    length: f32,
    speed: f32,
    interval: f32,
    random: &mut Random,
    set: &mut ParticleSet,
    count: usize,
    state: &ParticleSystemState,
) -> usize {
    let snap = |t: f32| {
        if interval > 0.0 {
            round_to_multiple(t, interval)
        } else {
            t
        }
    };

    match kind {
        EmissionModeType::Random => {
            spawn_multiple(set, count, |_| shape.sample_random(random))
        }
        EmissionModeType::Loop => {
            let dt = state.time_step / count as f32;
            spawn_multiple(set, count, |i| {
                let t = (state.time_start + dt * i as f32) * speed;
                let t = if length > 0.0 { t.rem_euclid(length) } else { 0.0 };
                shape.sample_at(snap(t))
            })
        }
        EmissionModeType::PingPong => {
            let dt = state.time_step / count as f32;
            spawn_multiple(set, count, |i| {
                let t = (state.time_start + dt * i as f32) * speed;
                let t = if length > 0.0 {
                    let wrapped = t.rem_euclid(length);
                    if ((t / length).floor() as i64) % 2 != 0 {
                        length - wrapped
                    } else {
                        wrapped
                    }
                } else {
                    0.0
                };
                shape.sample_at(snap(t))
            })
        }
        EmissionModeType::Spread => {
            let step = length / count as f32;
            spawn_multiple(set, count, |i| shape.sample_at(snap(step * i as f32)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> ParticleSystemState<'static> {
        ParticleSystemState::new(1.0, 1.0, 1000)
    }

    #[test]
    fn spawn_zero_returns_count() {
        let mut set = ParticleSet::new(4);
        set.alloc_particles(2);
        let mut shape = ParticleEmitterShape::Sphere(SphereShape::default());
        let mut rng = Random::new(0);
        assert_eq!(shape.spawn(&mut rng, &mut set, 0, &state()), 2);
        assert_eq!(set.particle_count(), 2);
    }

    #[test]
    fn spread_line_is_evenly_spaced() {
        let mut shape = ParticleEmitterShape::Line(LineShape {
            length: 4.0,
            mode: ParticleEmissionMode {
                kind: EmissionModeType::Spread,
                ..Default::default()
            },
        });
        let mut set = ParticleSet::new(0);
        let mut rng = Random::new(0);
        let start = shape.spawn(&mut rng, &mut set, 4, &state());
        let xs: Vec<f32> = (start..start + 4)
            .map(|i| set.particles().position[i].x)
            .collect();
        assert_eq!(xs, vec![-2.0, -1.0, 0.0, 1.0]);
    }

    #[test]
    fn loop_mode_wraps_and_snaps() {
        let line = LineShape {
            length: 2.0,
            mode: ParticleEmissionMode {
                kind: EmissionModeType::Loop,
                speed: 1.0,
                interval: 0.5,
            },
        };
        let mut st = state();
        st.time_start = 2.6;
        let mut set = ParticleSet::new(0);
        let mut rng = Random::new(0);
        let mut shape = ParticleEmitterShape::Line(line);
        shape.spawn(&mut rng, &mut set, 1, &st);
        // 2.6 wraps to 0.6, snaps to 0.5, shifted by half the length
        assert!((set.particles().position[0].x - -0.5).abs() < 1e-5);
    }

    #[test]
    fn ping_pong_reverses_on_odd_passes() {
        let line = LineShape {
            length: 2.0,
            mode: ParticleEmissionMode {
                kind: EmissionModeType::PingPong,
                speed: 1.0,
                interval: 0.0,
            },
        };
        let mut st = state();
        st.time_start = 2.5;
        let mut set = ParticleSet::new(0);
        let mut rng = Random::new(0);
        ParticleEmitterShape::Line(line).spawn(&mut rng, &mut set, 1, &st);
        // Second pass runs backwards: t = 2 - 0.5
        assert!((set.particles().position[0].x - 0.5).abs() < 1e-5);
    }

    #[test]
    fn directions_are_written_to_velocity() {
        let mut shape = ParticleEmitterShape::Sphere(SphereShape {
            radius: 2.0,
            thickness: 0.0,
        });
        let mut set = ParticleSet::new(0);
        let mut rng = Random::new(9);
        shape.spawn(&mut rng, &mut set, 32, &state());
        let data = set.particles();
        for i in 0..32 {
            assert!((data.velocity[i].length() - 1.0).abs() < 1e-4);
            assert!((data.position[i].length() - 2.0).abs() < 1e-3);
        }
    }
}
