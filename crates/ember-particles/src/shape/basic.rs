//! Analytic emitter shapes

use super::{spawn_with_mode, ParametricShape, ParticleEmissionMode};
use crate::rand::Random;
use crate::set::ParticleSet;
use crate::state::ParticleSystemState;
use ember_core::Aabb;
use glam::{Vec2, Vec3};
use serde::Deserialize;

const FULL_CIRCLE_DEGREES: f32 = 360.0;

/// Point on a circle or arc shell. Full circles skip the angular clamp.
fn point_in_arc(random: &mut Random, arc_degrees: f32, thickness: f32) -> Vec2 {
    if (arc_degrees - FULL_CIRCLE_DEGREES).abs() < 1e-4 {
        random.get_point_in_circle_shell(thickness)
    } else {
        random.get_point_in_arc_shell(arc_degrees.to_radians(), thickness)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConeType {
    /// Emit from the base circle only
    #[default]
    Base,
    /// Emit from anywhere inside the cone
    Volume,
}

/// Cone opening along +Z
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct ConeShape {
    pub kind: ConeType,
    pub radius: f32,
    /// Half angle in degrees
    pub angle: f32,
    pub length: f32,
    /// 0 emits from the rim only, 1 from the whole base
    pub thickness: f32,
    /// Portion of the base circle to emit from, in degrees
    pub arc: f32,
    /// Mode speed and interval are in degrees
    pub mode: ParticleEmissionMode,
}

impl Default for ConeShape {
    fn default() -> Self {
        Self {
            kind: ConeType::Base,
            radius: 1.0,
            angle: 45.0,
            length: 1.0,
            thickness: 0.0,
            arc: FULL_CIRCLE_DEGREES,
            mode: ParticleEmissionMode::default(),
        }
    }
}

impl ConeShape {
    pub(crate) fn spawn(
        &self,
        random: &mut Random,
        set: &mut ParticleSet,
        count: usize,
        state: &ParticleSystemState,
    ) -> usize {
        spawn_with_mode(
            self,
            self.mode.kind,
            self.arc.to_radians(),
            self.mode.speed.to_radians(),
            self.mode.interval.to_radians(),
            random,
            set,
            count,
            state,
        )
    }

    fn point_in_cone(&self, pos_2d: Vec2, distance: f32) -> (Vec3, Vec3) {
        let (sin, cos) = self.angle.to_radians().sin_cos();
        let normal = Vec3::new(pos_2d.x * sin, pos_2d.y * sin, cos).normalize_or(Vec3::Z);

        let mut position = Vec3::new(pos_2d.x * self.radius, pos_2d.y * self.radius, 0.0);
        if self.kind == ConeType::Volume {
            position += normal * distance;
        }

        (position, normal)
    }

    pub fn calc_bounds(&self) -> (Aabb, Aabb) {
        let (sin, cos) = self.angle.to_radians().sin_cos();

        let shape = match self.kind {
            ConeType::Base => Aabb::new(
                Vec3::new(-self.radius, -self.radius, 0.0),
                Vec3::new(self.radius, self.radius, 0.0),
            ),
            ConeType::Volume => {
                let top = self.radius + self.length * sin;
                Aabb::new(Vec3::new(-top, -top, 0.0), Vec3::new(top, top, self.length * cos))
            }
        };
        let velocity = Aabb::new(Vec3::new(-sin, -sin, 0.0), Vec3::new(sin, sin, 1.0));

        (shape, velocity)
    }
}

impl ParametricShape for ConeShape {
    fn sample_random(&self, random: &mut Random) -> (Vec3, Vec3) {
        let pos_2d = point_in_arc(random, self.arc, self.thickness);
        let distance = random.get_unorm() * self.length;
        self.point_in_cone(pos_2d, distance)
    }

    fn sample_at(&self, t: f32) -> (Vec3, Vec3) {
        let (sin, cos) = t.sin_cos();
        self.point_in_cone(Vec2::new(cos, sin), 0.0)
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct SphereShape {
    pub radius: f32,
    /// 0 emits from the surface, 1 from the whole volume
    pub thickness: f32,
}

impl Default for SphereShape {
    fn default() -> Self {
        Self {
            radius: 1.0,
            thickness: 0.0,
        }
    }
}

impl SphereShape {
    pub(crate) fn sample(&self, random: &mut Random) -> (Vec3, Vec3) {
        let point = random.get_point_in_sphere_shell(self.thickness);
        (point * self.radius, point.normalize_or(Vec3::Z))
    }

    pub fn calc_bounds(&self) -> (Aabb, Aabb) {
        (
            Aabb::new(Vec3::splat(-self.radius), Vec3::splat(self.radius)),
            Aabb::new(-Vec3::ONE, Vec3::ONE),
        )
    }
}

/// Upper (+Z) half of a sphere
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct HemisphereShape {
    pub radius: f32,
    pub thickness: f32,
}

impl Default for HemisphereShape {
    fn default() -> Self {
        Self {
            radius: 1.0,
            thickness: 0.0,
        }
    }
}

impl HemisphereShape {
    pub(crate) fn sample(&self, random: &mut Random) -> (Vec3, Vec3) {
        let mut point = random.get_point_in_sphere_shell(self.thickness);
        if point.z < 0.0 {
            point.z = -point.z;
        }
        (point * self.radius, point.normalize_or(Vec3::Z))
    }

    pub fn calc_bounds(&self) -> (Aabb, Aabb) {
        (
            Aabb::new(
                Vec3::new(-self.radius, -self.radius, 0.0),
                Vec3::splat(self.radius),
            ),
            Aabb::new(Vec3::new(-1.0, -1.0, 0.0), Vec3::ONE),
        )
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoxType {
    #[default]
    Volume,
    Surface,
    Edge,
}

/// Axis aligned box centered at the origin
#[derive(Clone, Debug, PartialEq)]
pub struct BoxShape {
    kind: BoxType,
    extents: Vec3,
    /// Cumulative selection weights: face pairs for `Surface`, edge directions for `Edge`
    weights: [f32; 3],
}

impl Default for BoxShape {
    fn default() -> Self {
        Self::new(BoxType::Volume, Vec3::ONE)
    }
}

impl BoxShape {
    pub fn new(kind: BoxType, extents: Vec3) -> Self {
        let raw = match kind {
            BoxType::Volume => [0.0; 3],
            // Faces normal to Z, Y and X
            BoxType::Surface => [
                extents.x * extents.y,
                extents.x * extents.z,
                extents.y * extents.z,
            ],
            // Edges along X, Y and Z
            BoxType::Edge => extents.to_array(),
        };

        let total: f32 = raw.iter().sum();
        let weights = if total > 0.0 {
            [raw[0] / total, (raw[0] + raw[1]) / total, 1.0]
        } else {
            [1.0 / 3.0, 2.0 / 3.0, 1.0]
        };

        Self {
            kind,
            extents,
            weights,
        }
    }

    pub fn kind(&self) -> BoxType {
        self.kind
    }

    pub fn extents(&self) -> Vec3 {
        self.extents
    }

    fn pick_axis(&self, random: &mut Random) -> usize {
        let rnd = random.get_unorm();
        self.weights.iter().position(|&w| rnd <= w).unwrap_or(2)
    }

    fn random_sign(random: &mut Random, value: f32) -> f32 {
        if random.get_unorm() > 0.5 {
            value
        } else {
            -value
        }
    }

    pub(crate) fn sample(&self, random: &mut Random) -> (Vec3, Vec3) {
        let e = self.extents;
        let position = match self.kind {
            BoxType::Volume => Vec3::new(
                e.x * random.get_snorm(),
                e.y * random.get_snorm(),
                e.z * random.get_snorm(),
            ),
            BoxType::Surface => {
                let u = random.get_snorm();
                let v = random.get_snorm();
                match self.pick_axis(random) {
                    0 => Vec3::new(e.x * u, e.y * v, Self::random_sign(random, e.z)),
                    1 => Vec3::new(e.x * u, Self::random_sign(random, e.y), e.z * v),
                    _ => Vec3::new(Self::random_sign(random, e.x), e.y * v, e.z * u),
                }
            }
            BoxType::Edge => {
                let u = random.get_snorm();
                match self.pick_axis(random) {
                    0 => {
                        let y = Self::random_sign(random, e.y);
                        Vec3::new(e.x * u, y, Self::random_sign(random, e.z))
                    }
                    1 => {
                        let x = Self::random_sign(random, e.x);
                        Vec3::new(x, e.y * u, Self::random_sign(random, e.z))
                    }
                    _ => {
                        let x = Self::random_sign(random, e.x);
                        Vec3::new(x, Self::random_sign(random, e.y), e.z * u)
                    }
                }
            }
        };

        (position, Vec3::Z)
    }

    pub fn calc_bounds(&self) -> (Aabb, Aabb) {
        (
            Aabb::new(-self.extents, self.extents),
            Aabb::new(Vec3::ZERO, Vec3::Z),
        )
    }
}

/// Line along X, centered at the origin
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct LineShape {
    pub length: f32,
    pub mode: ParticleEmissionMode,
}

impl Default for LineShape {
    fn default() -> Self {
        Self {
            length: 1.0,
            mode: ParticleEmissionMode::default(),
        }
    }
}

impl LineShape {
    pub(crate) fn spawn(
        &self,
        random: &mut Random,
        set: &mut ParticleSet,
        count: usize,
        state: &ParticleSystemState,
    ) -> usize {
        spawn_with_mode(
            self,
            self.mode.kind,
            self.length,
            self.mode.speed,
            self.mode.interval,
            random,
            set,
            count,
            state,
        )
    }

    pub fn calc_bounds(&self) -> (Aabb, Aabb) {
        let half = self.length * 0.5;
        (
            Aabb::new(Vec3::new(-half, 0.0, 0.0), Vec3::new(half, 0.0, 0.0)),
            Aabb::new(Vec3::ZERO, Vec3::Z),
        )
    }
}

impl ParametricShape for LineShape {
    fn sample_random(&self, random: &mut Random) -> (Vec3, Vec3) {
        (
            Vec3::new(random.get_snorm() * self.length * 0.5, 0.0, 0.0),
            Vec3::Z,
        )
    }

    fn sample_at(&self, t: f32) -> (Vec3, Vec3) {
        (Vec3::new(t - self.length * 0.5, 0.0, 0.0), Vec3::Z)
    }
}

/// Circle or arc in the XY plane
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct CircleShape {
    pub radius: f32,
    pub thickness: f32,
    /// Degrees
    pub arc: f32,
    /// Mode speed and interval are in degrees
    pub mode: ParticleEmissionMode,
}

impl Default for CircleShape {
    fn default() -> Self {
        Self {
            radius: 1.0,
            thickness: 0.0,
            arc: FULL_CIRCLE_DEGREES,
            mode: ParticleEmissionMode::default(),
        }
    }
}

impl CircleShape {
    pub(crate) fn spawn(
        &self,
        random: &mut Random,
        set: &mut ParticleSet,
        count: usize,
        state: &ParticleSystemState,
    ) -> usize {
        spawn_with_mode(
            self,
            self.mode.kind,
            self.arc.to_radians(),
            self.mode.speed.to_radians(),
            self.mode.interval.to_radians(),
            random,
            set,
            count,
            state,
        )
    }

    pub fn calc_bounds(&self) -> (Aabb, Aabb) {
        (
            Aabb::new(
                Vec3::new(-self.radius, -self.radius, 0.0),
                Vec3::new(self.radius, self.radius, 0.0),
            ),
            Aabb::new(Vec3::ZERO, Vec3::Z),
        )
    }
}

impl ParametricShape for CircleShape {
    fn sample_random(&self, random: &mut Random) -> (Vec3, Vec3) {
        let p = point_in_arc(random, self.arc, self.thickness) * self.radius;
        (p.extend(0.0), Vec3::Z)
    }

    fn sample_at(&self, t: f32) -> (Vec3, Vec3) {
        let (sin, cos) = t.sin_cos();
        (
            Vec3::new(cos * self.radius, sin * self.radius, 0.0),
            Vec3::Z,
        )
    }
}

/// Rectangle in the XY plane with half-size `extents`
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct RectShape {
    pub extents: Vec2,
}

impl Default for RectShape {
    fn default() -> Self {
        Self { extents: Vec2::ONE }
    }
}

impl RectShape {
    pub(crate) fn sample(&self, random: &mut Random) -> (Vec3, Vec3) {
        let x = random.get_snorm() * self.extents.x;
        let y = random.get_snorm() * self.extents.y;
        (Vec3::new(x, y, 0.0), Vec3::Z)
    }

    pub fn calc_bounds(&self) -> (Aabb, Aabb) {
        (
            Aabb::new(
                Vec3::new(-self.extents.x, -self.extents.y, 0.0),
                Vec3::new(self.extents.x, self.extents.y, 0.0),
            ),
            Aabb::new(Vec3::ZERO, Vec3::Z),
        )
    }
}
