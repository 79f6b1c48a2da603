//! Physics world wrapping Rapier 3D

use ember_core::Aabb;
use ember_particles::state::{ColliderId, ParticleScene, RayHit};
use glam::{Quat, Vec3};
use rapier3d::na::{Quaternion, UnitQuaternion};
use rapier3d::parry::query::RayCast;
use rapier3d::parry::shape::Cuboid;
use rapier3d::prelude::*;

/// Pack a collider handle into a scene collider id
pub fn collider_id(handle: ColliderHandle) -> ColliderId {
    let (index, generation) = handle.into_raw_parts();
    (u64::from(generation) << 32) | u64::from(index)
}

pub fn collider_handle(id: ColliderId) -> ColliderHandle {
    ColliderHandle::from_raw_parts(id as u32, (id >> 32) as u32)
}

fn to_vector(v: Vec3) -> Vector<Real> {
    vector![v.x, v.y, v.z]
}

fn to_point(v: Vec3) -> Point<Real> {
    point![v.x, v.y, v.z]
}

/// Wraps Rapier's physics pipeline and body/collider sets
pub struct PhysicsWorld {
    pub rigid_body_set: RigidBodySet,
    pub collider_set: ColliderSet,
    pub gravity: Vector<Real>,
    pub integration_parameters: IntegrationParameters,
    pub physics_pipeline: PhysicsPipeline,
    pub island_manager: IslandManager,
    pub broad_phase: DefaultBroadPhase,
    pub narrow_phase: NarrowPhase,
    pub impulse_joint_set: ImpulseJointSet,
    pub multibody_joint_set: MultibodyJointSet,
    pub ccd_solver: CCDSolver,
    pub query_pipeline: QueryPipeline,
}

impl PhysicsWorld {
    /// Create a new physics world with standard gravity
    pub fn new() -> Self {
        Self {
            rigid_body_set: RigidBodySet::new(),
            collider_set: ColliderSet::new(),
            gravity: vector![0.0, -9.81, 0.0],
            integration_parameters: IntegrationParameters::default(),
            physics_pipeline: PhysicsPipeline::new(),
            island_manager: IslandManager::new(),
            broad_phase: DefaultBroadPhase::new(),
            narrow_phase: NarrowPhase::new(),
            impulse_joint_set: ImpulseJointSet::new(),
            multibody_joint_set: MultibodyJointSet::new(),
            ccd_solver: CCDSolver::new(),
            query_pipeline: QueryPipeline::new(),
        }
    }

    /// Step the physics simulation by dt seconds. Also refreshes scene queries.
    pub fn step(&mut self, dt: f32) {
        self.integration_parameters.dt = dt;

        self.physics_pipeline.step(
            &self.gravity,
            &self.integration_parameters,
            &mut self.island_manager,
            &mut self.broad_phase,
            &mut self.narrow_phase,
            &mut self.rigid_body_set,
            &mut self.collider_set,
            &mut self.impulse_joint_set,
            &mut self.multibody_joint_set,
            &mut self.ccd_solver,
            Some(&mut self.query_pipeline),
            &(),
            &(),
        );
    }

    /// Rebuild the query acceleration structure without stepping,
    /// e.g. after inserting static colliders
    pub fn refresh_queries(&mut self) {
        self.query_pipeline.update(&self.collider_set);
    }

    /// Insert a rigid body and return its handle
    pub fn insert_rigid_body(&mut self, body: RigidBody) -> RigidBodyHandle {
        self.rigid_body_set.insert(body)
    }

    /// Insert a collider with no parent body
    pub fn insert_collider(&mut self, collider: Collider) -> ColliderHandle {
        self.collider_set.insert(collider)
    }

    /// Insert a collider attached to a rigid body
    pub fn insert_collider_with_parent(
        &mut self,
        collider: Collider,
        parent: RigidBodyHandle,
    ) -> ColliderHandle {
        self.collider_set
            .insert_with_parent(collider, parent, &mut self.rigid_body_set)
    }

    /// Remove a rigid body and its attached colliders
    pub fn remove_rigid_body(&mut self, handle: RigidBodyHandle) {
        self.rigid_body_set.remove(
            handle,
            &mut self.island_manager,
            &mut self.collider_set,
            &mut self.impulse_joint_set,
            &mut self.multibody_joint_set,
            true,
        );
    }

    /// Remove a collider, waking its parent body
    pub fn remove_collider(&mut self, handle: ColliderHandle) {
        self.collider_set.remove(
            handle,
            &mut self.island_manager,
            &mut self.rigid_body_set,
            true,
        );
    }

    /// Get a rigid body by handle
    pub fn get_rigid_body(&self, handle: RigidBodyHandle) -> Option<&RigidBody> {
        self.rigid_body_set.get(handle)
    }

    /// Get a mutable rigid body by handle
    pub fn get_rigid_body_mut(&mut self, handle: RigidBodyHandle) -> Option<&mut RigidBody> {
        self.rigid_body_set.get_mut(handle)
    }
}

impl Default for PhysicsWorld {
    fn default() -> Self {
        Self::new()
    }
}

impl ParticleScene for PhysicsWorld {
    fn gravity(&self) -> Vec3 {
        Vec3::new(self.gravity.x, self.gravity.y, self.gravity.z)
    }

    fn box_overlap(&self, bounds: &Aabb, rotation: Quat, layer: u64) -> Vec<ColliderId> {
        if bounds.is_empty() {
            return Vec::new();
        }

        let center = bounds.center();
        let shape = Cuboid::new(to_vector(bounds.half_extents()));
        let pose = Isometry::from_parts(
            Translation::new(center.x, center.y, center.z),
            UnitQuaternion::new_normalize(Quaternion::new(
                rotation.w, rotation.x, rotation.y, rotation.z,
            )),
        );

        // Layers map onto the low 32 collision group bits
        let groups = InteractionGroups::new(Group::ALL, Group::from_bits_truncate(layer as u32));
        let filter = QueryFilter::default().groups(groups);

        let mut hits = Vec::new();
        self.query_pipeline.intersections_with_shape(
            &self.rigid_body_set,
            &self.collider_set,
            &pose,
            &shape,
            filter,
            |handle| {
                hits.push(collider_id(handle));
                true
            },
        );

        log::trace!("Particle box query found {} collider(s)", hits.len());
        hits
    }

    fn ray_cast(
        &self,
        id: ColliderId,
        origin: Vec3,
        direction: Vec3,
        max_distance: f32,
    ) -> Option<RayHit> {
        let Some(collider) = self.collider_set.get(collider_handle(id)) else {
            log::warn!("Particle ray cast against missing collider {id}");
            return None;
        };

        let ray = Ray::new(to_point(origin), to_vector(direction));
        let hit = collider.shape().cast_ray_and_get_normal(
            collider.position(),
            &ray,
            max_distance,
            true,
        )?;

        let point = ray.point_at(hit.time_of_impact);
        Some(RayHit {
            point: Vec3::new(point.x, point.y, point.z),
            normal: Vec3::new(hit.normal.x, hit.normal.y, hit.normal.z),
            distance: hit.time_of_impact,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ember_particles::evolver::{CollisionMode, CollisionsEvolver, ParticleEvolver};
    use ember_particles::set::ParticleSet;
    use ember_particles::state::ParticleSystemState;

    /// Static ground slab whose top face is y = 0
    fn world_with_ground() -> (PhysicsWorld, ColliderHandle) {
        let mut world = PhysicsWorld::new();
        let ground = ColliderBuilder::cuboid(10.0, 0.5, 10.0)
            .translation(vector![0.0, -0.5, 0.0])
            .collision_groups(InteractionGroups::new(Group::GROUP_1, Group::ALL))
            .build();
        let handle = world.insert_collider(ground);
        world.refresh_queries();
        (world, handle)
    }

    #[test]
    fn test_create_physics_world() {
        let world = PhysicsWorld::new();
        assert_eq!(world.rigid_body_set.len(), 0);
        assert_eq!(world.collider_set.len(), 0);
        assert_eq!(world.gravity(), Vec3::new(0.0, -9.81, 0.0));
    }

    #[test]
    fn test_collider_ids_round_trip() {
        let (_, handle) = world_with_ground();
        assert_eq!(collider_handle(collider_id(handle)), handle);
    }

    #[test]
    fn test_box_overlap_finds_ground() {
        let (world, handle) = world_with_ground();

        let touching = Aabb::new(Vec3::new(-1.0, -0.1, -1.0), Vec3::new(1.0, 1.0, 1.0));
        assert_eq!(
            world.box_overlap(&touching, Quat::IDENTITY, u64::MAX),
            vec![collider_id(handle)]
        );

        let above = Aabb::new(Vec3::new(-1.0, 2.0, -1.0), Vec3::new(1.0, 3.0, 1.0));
        assert!(world.box_overlap(&above, Quat::IDENTITY, u64::MAX).is_empty());
    }

    #[test]
    fn test_box_overlap_respects_layers() {
        let (world, _) = world_with_ground();
        let bounds = Aabb::new(Vec3::splat(-1.0), Vec3::splat(1.0));
        assert_eq!(world.box_overlap(&bounds, Quat::IDENTITY, 0b01).len(), 1);
        assert!(world.box_overlap(&bounds, Quat::IDENTITY, 0b10).is_empty());
    }

    #[test]
    fn test_ray_cast_hits_top_face() {
        let (world, handle) = world_with_ground();
        let hit = world
            .ray_cast(collider_id(handle), Vec3::new(0.0, 1.0, 0.0), -Vec3::Y, 5.0)
            .unwrap();
        assert!(hit.point.y.abs() < 1e-4);
        assert!((hit.normal - Vec3::Y).length() < 1e-4);
        assert!((hit.distance - 1.0).abs() < 1e-4);

        assert!(world
            .ray_cast(collider_id(handle), Vec3::new(0.0, 1.0, 0.0), -Vec3::Y, 0.5)
            .is_none());
    }

    #[test]
    fn test_particles_bounce_off_ground() {
        let (world, _) = world_with_ground();
        let mut state = ParticleSystemState::new(0.1, 1.0, 16);
        state.scene = Some(&world);

        let mut set = ParticleSet::new(4);
        set.alloc_particles(4);
        let p = set.particles_mut();
        for i in 0..4 {
            p.prev_position[i] = Vec3::new(i as f32, 0.5, 0.0);
            p.position[i] = Vec3::new(i as f32, -0.5, 0.0);
            p.velocity[i] = Vec3::new(0.0, -10.0, 0.0);
        }

        let collisions = ParticleEvolver::Collisions(CollisionsEvolver {
            mode: CollisionMode::World,
            restitution: 1.0,
            dampening: 0.0,
            ..Default::default()
        });
        collisions.evolve(&state, &mut set);

        let p = set.particles();
        for i in 0..4 {
            assert!(p.position[i].y > 0.0);
            assert!((p.velocity[i] - Vec3::new(0.0, 10.0, 0.0)).length() < 1e-3);
        }
    }

    #[test]
    fn test_step_moves_falling_colliders_in_queries() {
        let mut world = PhysicsWorld::new();

        let body = RigidBodyBuilder::dynamic()
            .translation(vector![0.0, 10.0, 0.0])
            .build();
        let handle = world.insert_rigid_body(body);
        let ball = world.insert_collider_with_parent(ColliderBuilder::ball(0.5).build(), handle);

        for _ in 0..60 {
            world.step(1.0 / 60.0);
        }

        // About 4.9 m of free fall after one second
        let start = Aabb::new(Vec3::new(-1.0, 9.0, -1.0), Vec3::new(1.0, 11.0, 1.0));
        assert!(world.box_overlap(&start, Quat::IDENTITY, u64::MAX).is_empty());

        let fallen = Aabb::new(Vec3::new(-1.0, 3.5, -1.0), Vec3::new(1.0, 6.5, 1.0));
        assert_eq!(
            world.box_overlap(&fallen, Quat::IDENTITY, u64::MAX),
            vec![collider_id(ball)]
        );

        world.remove_rigid_body(handle);
        world.refresh_queries();
        assert!(world.box_overlap(&fallen, Quat::IDENTITY, u64::MAX).is_empty());
    }
}
