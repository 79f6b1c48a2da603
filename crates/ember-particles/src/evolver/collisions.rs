//! Particle collisions against planes or scene geometry

use crate::set::ParticleSet;
use crate::state::ParticleSystemState;
use ember_core::{Aabb, Transform};
use glam::{Mat4, Quat, Vec3};
use serde::Deserialize;

/// Shortest motion segment that is tested against the scene
const MIN_SEGMENT_LENGTH: f32 = 1e-6;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollisionMode {
    /// Collide with a list of infinite planes
    #[default]
    Plane,
    /// Collide with scene colliders through ray casts
    World,
}

/// Infinite plane `dot(normal, p) == distance`. Particles collide from the side the normal faces.
#[derive(Clone, Copy, Debug, PartialEq, Deserialize)]
pub struct CollisionPlane {
    pub normal: Vec3,
    pub distance: f32,
}

impl CollisionPlane {
    pub fn new(normal: Vec3, distance: f32) -> Self {
        Self {
            normal: normal.normalize_or(Vec3::Y),
            distance,
        }
    }

    pub fn from_point_normal(point: Vec3, normal: Vec3) -> Self {
        let normal = normal.normalize_or(Vec3::Y);
        Self {
            normal,
            distance: normal.dot(point),
        }
    }

    /// Plane through an object's origin facing along its local +Y
    pub fn from_transform(transform: &Transform) -> Self {
        Self::from_point_normal(transform.position, transform.rotation() * Vec3::Y)
    }

    pub fn signed_distance(&self, point: Vec3) -> f32 {
        self.normal.dot(point) - self.distance
    }

    fn transformed(&self, m: &Mat4) -> Self {
        let point = self.normal * self.distance;
        Self::from_point_normal(
            m.transform_point3(point),
            m.inverse().transpose().transform_vector3(self.normal),
        )
    }
}

/// Bounces particles off planes or scene geometry
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct CollisionsEvolver {
    pub mode: CollisionMode,
    /// Fraction of the normal velocity kept after a bounce
    pub restitution: f32,
    /// Fraction of the velocity lost on every bounce
    pub dampening: f32,
    /// Fraction of the initial lifetime removed on every bounce
    pub lifetime_loss: f32,
    /// Particle radius used as collision tolerance
    pub radius: f32,
    /// Collision layer mask for `World` mode
    pub layer: u64,
    /// World-space planes for `Plane` mode
    pub planes: Vec<CollisionPlane>,
    /// Objects whose +Y axis defines additional planes
    pub plane_objects: Vec<Transform>,
}

impl Default for CollisionsEvolver {
    fn default() -> Self {
        Self {
            mode: CollisionMode::Plane,
            restitution: 1.0,
            dampening: 0.5,
            lifetime_loss: 0.0,
            radius: 0.01,
            layer: u64::MAX,
            planes: Vec::new(),
            plane_objects: Vec::new(),
        }
    }
}

/// Resolve a collision at `hit_point` with surface `normal`.
///
/// The velocity and the travel left past the hit point are reflected about the
/// normal, scaled by `1 - dampening`, and lose `1 - restitution` of their
/// normal component.
pub fn calc_collision_response(
    position: &mut Vec3,
    velocity: &mut Vec3,
    hit_point: Vec3,
    normal: Vec3,
    restitution: f32,
    dampening: f32,
) {
    let respond = |v: Vec3| {
        let reflected = (v - 2.0 * v.dot(normal) * normal) * (1.0 - dampening);
        reflected - normal * reflected.dot(normal) * (1.0 - restitution)
    };

    *velocity = respond(*velocity);
    *position = hit_point + respond(*position - hit_point);
}

impl CollisionsEvolver {
    pub(crate) fn evolve(
        &self,
        state: &ParticleSystemState,
        set: &mut ParticleSet,
        start: usize,
        end: usize,
    ) {
        match self.mode {
            CollisionMode::Plane => self.collide_planes(state, set, start, end),
            CollisionMode::World => self.collide_world(state, set, start, end),
        }
    }

    fn resolve(&self, set: &mut ParticleSet, i: usize, hit_point: Vec3, normal: Vec3) {
        let p = set.particles_mut();
        calc_collision_response(
            &mut p.position[i],
            &mut p.velocity[i],
            hit_point,
            normal,
            self.restitution,
            self.dampening,
        );
        p.lifetime[i] -= self.lifetime_loss * p.initial_lifetime[i];
    }

    fn collide_planes(
        &self,
        state: &ParticleSystemState,
        set: &mut ParticleSet,
        start: usize,
        end: usize,
    ) {
        let mut planes: Vec<CollisionPlane> = self
            .planes
            .iter()
            .copied()
            .chain(self.plane_objects.iter().map(CollisionPlane::from_transform))
            .collect();
        if planes.is_empty() {
            return;
        }

        // Planes are given in world space
        if !state.world_space {
            for plane in &mut planes {
                *plane = plane.transformed(&state.world_to_local);
            }
        }

        for i in start..end {
            let (prev, pos) = {
                let p = set.particles();
                (p.prev_position[i], p.position[i])
            };

            for plane in &planes {
                let d_prev = plane.signed_distance(prev);
                let d_cur = plane.signed_distance(pos);

                if d_prev < 0.0 || d_cur >= self.radius || d_cur >= d_prev {
                    continue;
                }

                let t = ((d_prev - self.radius) / (d_prev - d_cur)).clamp(0.0, 1.0);
                let hit_point = prev + (pos - prev) * t;
                self.resolve(set, i, hit_point, plane.normal);
                break;
            }
        }
    }

    fn collide_world(
        &self,
        state: &ParticleSystemState,
        set: &mut ParticleSet,
        start: usize,
        end: usize,
    ) {
        let Some(scene) = state.scene else {
            return;
        };

        let to_world = |v: Vec3| {
            if state.world_space {
                v
            } else {
                state.local_to_world.transform_point3(v)
            }
        };

        let segments: Vec<(Vec3, Vec3)> = {
            let p = set.particles();
            (start..end)
                .map(|i| (to_world(p.prev_position[i]), to_world(p.position[i])))
                .collect()
        };

        // One broad query for the whole frame, then narrow ray casts
        let bounds = Aabb::from_points(segments.iter().flat_map(|&(a, b)| [a, b]))
            .expanded(self.radius);
        if bounds.is_empty() {
            return;
        }

        let colliders = scene.box_overlap(&bounds, Quat::IDENTITY, self.layer);
        if colliders.is_empty() {
            return;
        }

        for (offset, &(from, to)) in segments.iter().enumerate() {
            let delta = to - from;
            let length = delta.length();
            if length < MIN_SEGMENT_LENGTH {
                continue;
            }
            let dir = delta / length;

            let nearest = colliders
                .iter()
                .filter_map(|&c| scene.ray_cast(c, from, dir, length + self.radius))
                .min_by(|a, b| a.distance.total_cmp(&b.distance));

            let Some(hit) = nearest else {
                continue;
            };

            let hit_point = hit.point + hit.normal * self.radius;
            let (hit_point, normal) = if state.world_space {
                (hit_point, hit.normal)
            } else {
                // Normals take the inverse transpose of world_to_local
                (
                    state.world_to_local.transform_point3(hit_point),
                    state
                        .local_to_world
                        .transpose()
                        .transform_vector3(hit.normal)
                        .normalize_or(hit.normal),
                )
            };

            self.resolve(set, start + offset, hit_point, normal);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{ColliderId, ParticleScene, RayHit};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Ground plane at y = 0 exposed as a single collider
    #[derive(Default)]
    struct GroundScene {
        overlap_queries: AtomicUsize,
        ray_casts: AtomicUsize,
    }

    impl ParticleScene for GroundScene {
        fn gravity(&self) -> Vec3 {
            Vec3::new(0.0, -9.81, 0.0)
        }

        fn box_overlap(&self, bounds: &Aabb, _: Quat, _: u64) -> Vec<ColliderId> {
            self.overlap_queries.fetch_add(1, Ordering::Relaxed);
            if bounds.min.y <= 0.0 {
                vec![1]
            } else {
                Vec::new()
            }
        }

        fn ray_cast(&self, _: ColliderId, origin: Vec3, dir: Vec3, max: f32) -> Option<RayHit> {
            self.ray_casts.fetch_add(1, Ordering::Relaxed);
            if dir.y >= 0.0 || origin.y < 0.0 {
                return None;
            }
            let distance = origin.y / -dir.y;
            (distance <= max).then(|| RayHit {
                point: origin + dir * distance,
                normal: Vec3::Y,
                distance,
            })
        }
    }

    fn falling(count: usize) -> ParticleSet {
        let mut set = ParticleSet::new(count);
        set.alloc_particles(count);
        let p = set.particles_mut();
        for i in 0..count {
            p.prev_position[i] = Vec3::new(i as f32, 1.0, 0.0);
            p.position[i] = Vec3::new(i as f32 + 0.5, -1.0, 0.0);
            p.velocity[i] = Vec3::new(0.5, -2.0, 0.0);
            p.initial_lifetime[i] = 4.0;
            p.lifetime[i] = 4.0;
        }
        set
    }

    fn ground_planes(restitution: f32, dampening: f32) -> CollisionsEvolver {
        CollisionsEvolver {
            restitution,
            dampening,
            planes: vec![CollisionPlane::from_point_normal(Vec3::ZERO, Vec3::Y)],
            ..Default::default()
        }
    }

    #[test]
    fn elastic_collision_keeps_speed() {
        let mut velocity = Vec3::new(1.0, -3.0, 2.0);
        let before = velocity.length();
        let mut position = Vec3::new(0.0, -0.5, 0.0);
        calc_collision_response(&mut position, &mut velocity, Vec3::ZERO, Vec3::Y, 1.0, 0.0);
        assert!((velocity.length() - before).abs() < 1e-5);
        assert_eq!(velocity, Vec3::new(1.0, 3.0, 2.0));
        assert!((position - Vec3::new(0.0, 0.5, 0.0)).length() < 1e-6);
    }

    #[test]
    fn zero_restitution_removes_bounce() {
        let mut velocity = Vec3::new(1.0, -3.0, 0.0);
        let mut position = Vec3::ZERO;
        calc_collision_response(&mut position, &mut velocity, Vec3::ZERO, Vec3::Y, 0.0, 0.5);
        assert!((velocity - Vec3::new(0.5, 0.0, 0.0)).length() < 1e-6);
    }

    #[test]
    fn plane_collision_bounces_particles() {
        let mut set = falling(3);
        let state = ParticleSystemState::new(0.1, 1.0, 10);
        ground_planes(1.0, 0.0).evolve(&state, &mut set, 0, 3);

        let p = set.particles();
        for i in 0..3 {
            assert!(p.position[i].y > 0.0);
            assert_eq!(p.velocity[i], Vec3::new(0.5, 2.0, 0.0));
        }
    }

    #[test]
    fn particles_above_plane_are_untouched() {
        let mut set = falling(1);
        set.particles_mut().position[0] = Vec3::new(0.0, 0.5, 0.0);
        let state = ParticleSystemState::new(0.1, 1.0, 10);
        ground_planes(1.0, 0.0).evolve(&state, &mut set, 0, 1);
        assert_eq!(set.particles().velocity[0], Vec3::new(0.5, -2.0, 0.0));
    }

    #[test]
    fn lifetime_loss_shortens_life() {
        let mut set = falling(1);
        let mut evolver = ground_planes(1.0, 0.0);
        evolver.lifetime_loss = 0.25;
        let state = ParticleSystemState::new(0.1, 1.0, 10);
        evolver.evolve(&state, &mut set, 0, 1);
        assert_eq!(set.particles().lifetime[0], 3.0);
    }

    #[test]
    fn object_planes_are_used() {
        let mut set = falling(1);
        let evolver = CollisionsEvolver {
            restitution: 1.0,
            dampening: 0.0,
            plane_objects: vec![Transform::default()],
            ..Default::default()
        };
        let state = ParticleSystemState::new(0.1, 1.0, 10);
        evolver.evolve(&state, &mut set, 0, 1);
        assert!(set.particles().velocity[0].y > 0.0);
    }

    #[test]
    fn world_mode_queries_scene_once() {
        let scene = GroundScene::default();
        let mut state = ParticleSystemState::new(0.1, 1.0, 10);
        state.scene = Some(&scene);

        let mut set = falling(8);
        let evolver = CollisionsEvolver {
            mode: CollisionMode::World,
            restitution: 1.0,
            dampening: 0.0,
            ..Default::default()
        };
        evolver.evolve(&state, &mut set, 0, 8);

        assert_eq!(scene.overlap_queries.load(Ordering::Relaxed), 1);
        assert_eq!(scene.ray_casts.load(Ordering::Relaxed), 8);
        for i in 0..8 {
            let p = set.particles();
            assert!(p.position[i].y > 0.0);
            assert!((p.velocity[i].length() - Vec3::new(0.5, -2.0, 0.0).length()).abs() < 1e-5);
        }
    }

    #[test]
    fn world_mode_without_scene_is_noop() {
        let state = ParticleSystemState::new(0.1, 1.0, 10);
        let mut set = falling(1);
        CollisionsEvolver {
            mode: CollisionMode::World,
            ..Default::default()
        }
        .evolve(&state, &mut set, 0, 1);
        assert_eq!(set.particles().position[0], Vec3::new(0.5, -1.0, 0.0));
    }

    /// Every ray hits a 45 degree slope through the origin
    struct SlopeScene;

    impl ParticleScene for SlopeScene {
        fn gravity(&self) -> Vec3 {
            Vec3::ZERO
        }

        fn box_overlap(&self, _: &Aabb, _: Quat, _: u64) -> Vec<ColliderId> {
            vec![1]
        }

        fn ray_cast(&self, _: ColliderId, _: Vec3, _: Vec3, _: f32) -> Option<RayHit> {
            Some(RayHit {
                point: Vec3::ZERO,
                normal: Vec3::new(1.0, 1.0, 0.0).normalize(),
                distance: 1.0,
            })
        }
    }

    #[test]
    fn world_hits_under_non_uniform_scale() {
        let scene = SlopeScene;
        let mut state = ParticleSystemState::new(0.1, 1.0, 10);
        state.scene = Some(&scene);
        state.local_to_world = Mat4::from_scale(Vec3::new(2.0, 1.0, 1.0));
        state.world_to_local = state.local_to_world.inverse();

        let mut set = ParticleSet::new(1);
        set.alloc_particles(1);
        let p = set.particles_mut();
        p.prev_position[0] = Vec3::new(0.0, 1.0, 0.0);
        p.position[0] = Vec3::new(0.0, -1.0, 0.0);
        p.velocity[0] = Vec3::new(0.0, -1.0, 0.0);

        CollisionsEvolver {
            mode: CollisionMode::World,
            restitution: 1.0,
            dampening: 0.0,
            radius: 0.0,
            ..Default::default()
        }
        .evolve(&state, &mut set, 0, 1);

        // The slope is 2x + y = 0 in local space, so its normal there is (2, 1, 0)
        let v = set.particles().velocity[0];
        assert!((v - Vec3::new(0.8, -0.6, 0.0)).length() < 1e-5);
    }
}
