//! A single particle effect: storage, emitters, evolvers and playback state

use crate::emitter::ParticleEmitter;
use crate::evolver::{EvolverProperties, EvolverStage, ParticleEvolver};
use crate::rand::Random;
use crate::set::ParticleSet;
use crate::state::{AnimationPoses, ParticleMaterial, ParticleScene, ParticleSystemState};
use ember_core::{Aabb, EmberError, Result, Transform};
use glam::Vec3;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Upper bound on the storage allocated before the first frame
const INITIAL_CAPACITY: usize = 64;

/// Playback state machine
///
/// `Uninitialized -> Stopped -> Playing <-> Paused -> Stopped`
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum PlaybackState {
    #[default]
    Uninitialized,
    Stopped,
    Playing,
    Paused,
}

impl fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Uninitialized => "Uninitialized",
            Self::Stopped => "Stopped",
            Self::Playing => "Playing",
            Self::Paused => "Paused",
        };
        f.write_str(name)
    }
}

/// Space particles are simulated in
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SimulationSpace {
    /// Particles follow the system transform
    #[default]
    Local,
    /// Particles stay where they were spawned
    World,
}

/// Draw order written into the particle index list after each step
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortMode {
    #[default]
    None,
    /// Back to front from the view origin
    Distance,
    OldToYoung,
    YoungToOld,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RenderMode {
    #[default]
    Billboard,
    Mesh,
}

/// Where staged render data goes
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StagingMode {
    /// Pooled pixel buffers laid out for billboard or mesh rendering
    #[default]
    Cpu,
    /// Flat particle list for GPU upload
    Gpu,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParticleSystemSettings {
    pub simulation_space: SimulationSpace,
    pub max_particles: usize,
    /// Seconds of emission per cycle
    pub duration: f32,
    pub looping: bool,
    pub sort_mode: SortMode,
    pub render_mode: RenderMode,
    pub staging: StagingMode,
    pub seed: u32,
    /// Local-to-world transform of the effect
    pub transform: Transform,
}

impl Default for ParticleSystemSettings {
    fn default() -> Self {
        Self {
            simulation_space: SimulationSpace::Local,
            max_particles: 2000,
            duration: 5.0,
            looping: true,
            sort_mode: SortMode::None,
            render_mode: RenderMode::Billboard,
            staging: StagingMode::Cpu,
            seed: 0,
            transform: Transform::IDENTITY,
        }
    }
}

/// Collaborators supplied by the caller for one simulation step
#[derive(Clone, Copy, Default)]
pub struct SimulationContext<'a> {
    pub anim: Option<&'a AnimationPoses>,
    pub scene: Option<&'a dyn ParticleScene>,
    /// World-space view origin used by distance sorting
    pub view_origin: Option<Vec3>,
}

/// One particle effect instance
pub struct ParticleSystem {
    settings: ParticleSystemSettings,
    emitters: Vec<ParticleEmitter>,
    /// Sorted by (stage, priority), insertion order within equal keys
    evolvers: Vec<(EvolverProperties, ParticleEvolver)>,
    set: ParticleSet,
    random: Random,
    state: PlaybackState,
    /// Seconds into the current cycle
    time: f32,
    material: Option<Arc<dyn ParticleMaterial>>,
}

impl fmt::Debug for ParticleSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParticleSystem")
            .field("state", &self.state)
            .field("time", &self.time)
            .field("particles", &self.set.particle_count())
            .field("emitters", &self.emitters.len())
            .field("evolvers", &self.evolvers.len())
            .finish()
    }
}

impl ParticleSystem {
    pub fn new(settings: ParticleSystemSettings) -> Self {
        let random = Random::new(settings.seed);
        Self {
            settings,
            emitters: Vec::new(),
            evolvers: Vec::new(),
            set: ParticleSet::default(),
            random,
            state: PlaybackState::Uninitialized,
            time: 0.0,
            material: None,
        }
    }

    pub fn settings(&self) -> &ParticleSystemSettings {
        &self.settings
    }

    /// Change settings. Storage is not shrunk when `max_particles` drops.
    pub fn set_settings(&mut self, settings: ParticleSystemSettings) {
        self.settings = settings;
    }

    pub fn set_transform(&mut self, transform: Transform) {
        self.settings.transform = transform;
    }

    pub fn set_material(&mut self, material: Option<Arc<dyn ParticleMaterial>>) {
        self.material = material;
    }

    pub fn material(&self) -> Option<&dyn ParticleMaterial> {
        self.material.as_deref()
    }

    pub fn add_emitter(&mut self, emitter: ParticleEmitter) {
        self.emitters.push(emitter);
    }

    pub fn emitters(&self) -> &[ParticleEmitter] {
        &self.emitters
    }

    pub fn emitters_mut(&mut self) -> &mut [ParticleEmitter] {
        &mut self.emitters
    }

    /// Add an evolver with its kind's default scheduling
    pub fn add_evolver(&mut self, evolver: ParticleEvolver) {
        let properties = evolver.properties();
        self.add_evolver_with(properties, evolver);
    }

    pub fn add_evolver_with(&mut self, properties: EvolverProperties, evolver: ParticleEvolver) {
        let key = (properties.stage, properties.priority);
        let idx = self
            .evolvers
            .partition_point(|(p, _)| (p.stage, p.priority) <= key);
        self.evolvers.insert(idx, (properties, evolver));
    }

    /// Evolvers in execution order
    pub fn evolvers(&self) -> impl Iterator<Item = &ParticleEvolver> {
        self.evolvers.iter().map(|(_, e)| e)
    }

    pub fn clear_evolvers(&mut self) {
        self.evolvers.clear();
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn time(&self) -> f32 {
        self.time
    }

    pub fn particle_set(&self) -> &ParticleSet {
        &self.set
    }

    pub fn particle_count(&self) -> usize {
        self.set.particle_count()
    }

    fn transition(&mut self, to: PlaybackState, from: &[PlaybackState]) -> Result<()> {
        if !from.contains(&self.state) {
            return Err(EmberError::InvalidTransition {
                from: self.state.to_string(),
                to: to.to_string(),
            });
        }

        log::debug!("Particle system {} -> {}", self.state, to);
        self.state = to;
        Ok(())
    }

    /// Allocate storage. `Uninitialized -> Stopped`.
    pub fn initialize(&mut self) -> Result<()> {
        self.transition(PlaybackState::Stopped, &[PlaybackState::Uninitialized])?;
        self.set = ParticleSet::new(self.settings.max_particles.min(INITIAL_CAPACITY));
        Ok(())
    }

    /// `Stopped | Paused -> Playing`
    pub fn play(&mut self) -> Result<()> {
        self.transition(
            PlaybackState::Playing,
            &[PlaybackState::Stopped, PlaybackState::Paused],
        )
    }

    /// `Playing -> Paused`. Particles are kept and stop simulating.
    pub fn pause(&mut self) -> Result<()> {
        self.transition(PlaybackState::Paused, &[PlaybackState::Playing])
    }

    /// `Playing | Paused -> Stopped`. Removes every particle and rewinds.
    pub fn stop(&mut self) -> Result<()> {
        self.transition(
            PlaybackState::Stopped,
            &[PlaybackState::Playing, PlaybackState::Paused],
        )?;

        self.set.clear();
        self.time = 0.0;
        self.random.set_seed(self.settings.seed);
        for emitter in &mut self.emitters {
            emitter.reset();
        }
        Ok(())
    }

    /// Advance the simulation by `time_step` seconds
    pub fn simulate(&mut self, time_step: f32, ctx: &SimulationContext) -> Result<()> {
        if self.state != PlaybackState::Playing {
            return Err(EmberError::NotPlaying(self.state.to_string()));
        }

        let duration = self.settings.duration.max(f32::EPSILON);
        let looping = self.settings.looping;

        let time_start = self.time;
        let mut time_end = time_start + time_step;
        if looping {
            if time_end > duration {
                time_end = time_end.rem_euclid(duration);
            }
        } else {
            time_end = time_end.min(duration);
        }
        let emitting = looping || time_start < duration;

        let local_to_world = self.settings.transform.to_matrix();
        let state = ParticleSystemState {
            time_start,
            time_end,
            nrm_time_start: time_start / duration,
            nrm_time_end: time_end / duration,
            length: duration,
            time_step,
            spacing: None,
            max_particles: self.settings.max_particles,
            world_space: self.settings.simulation_space == SimulationSpace::World,
            local_to_world,
            world_to_local: local_to_world.inverse(),
            anim: ctx.anim,
            scene: ctx.scene,
            material: self.material.as_deref(),
        };

        kill_expired(&mut self.set);

        let existing = self.set.particle_count();
        let mut spawned = Vec::with_capacity(self.emitters.len());
        if emitting {
            for emitter in &mut self.emitters {
                spawned.push(emitter.spawn(&mut self.random, &state, &mut self.set));
            }
        }

        step_particles(&self.evolvers, &state, &mut self.set, 0, existing);
        for batch in &spawned {
            // Continuous particles only live through the rest of the frame after their birth
            let spaced = ParticleSystemState {
                spacing: Some(batch.spacing),
                ..state
            };
            step_particles(&self.evolvers, &spaced, &mut self.set, batch.first, batch.continuous);

            let bursts = batch.first + batch.continuous;
            step_particles(&self.evolvers, &state, &mut self.set, bursts, batch.burst);
        }

        sort_particles(&mut self.set, self.settings.sort_mode, ctx.view_origin, &state);

        self.time = time_end;

        log::trace!(
            "Simulated {} particles to t={:.3}",
            self.set.particle_count(),
            self.time
        );
        Ok(())
    }

    /// Bounds of live particle positions in simulation space
    pub fn calculate_bounds(&self) -> Aabb {
        let count = self.set.particle_count();
        Aabb::from_points(self.set.particles().position[..count].iter().copied())
    }
}

/// Free expired particles. A freed slot receives the last particle, so it is tested again.
fn kill_expired(set: &mut ParticleSet) {
    let mut i = 0;
    while i < set.particle_count() {
        if set.particles().lifetime[i] <= 0.0 {
            set.free_particle(i);
        } else {
            i += 1;
        }
    }
}

/// Evolve, integrate and age particles `[start, start + count)`
fn step_particles(
    evolvers: &[(EvolverProperties, ParticleEvolver)],
    state: &ParticleSystemState,
    set: &mut ParticleSet,
    start: usize,
    count: usize,
) {
    if count == 0 {
        return;
    }

    run_stage(evolvers, EvolverStage::BeforeIntegration, state, set, start, count);
    integrate(set, state, start, count);
    run_stage(evolvers, EvolverStage::AfterIntegration, state, set, start, count);
    age(set, state, start, count);
}

fn run_stage(
    evolvers: &[(EvolverProperties, ParticleEvolver)],
    stage: EvolverStage,
    state: &ParticleSystemState,
    set: &mut ParticleSet,
    start: usize,
    count: usize,
) {
    for (properties, evolver) in evolvers {
        if properties.stage == stage {
            evolver.evolve_range(state, set, start, count);
        }
    }
}

fn integrate(set: &mut ParticleSet, state: &ParticleSystemState, start: usize, count: usize) {
    let p = set.particles_mut();
    for i in 0..count {
        let dt = state.particle_time_step(i, count);
        let idx = start + i;
        p.prev_position[idx] = p.position[idx];
        p.position[idx] += p.velocity[idx] * dt;
    }
}

fn age(set: &mut ParticleSet, state: &ParticleSystemState, start: usize, count: usize) {
    let lifetimes = &mut set.particles_mut().lifetime[start..start + count];
    for (i, lifetime) in lifetimes.iter_mut().enumerate() {
        *lifetime -= state.particle_time_step(i, count);
    }
}

/// Write the draw order into `indices[0..count)`
fn sort_particles(
    set: &mut ParticleSet,
    mode: SortMode,
    view_origin: Option<Vec3>,
    state: &ParticleSystemState,
) {
    let count = set.particle_count();
    let p = set.particles_mut();
    let indices = &mut p.indices[..count];
    for (i, index) in indices.iter_mut().enumerate() {
        *index = i as u32;
    }

    match mode {
        SortMode::None => {}
        SortMode::Distance => {
            // No view point means no meaningful order
            let Some(origin) = view_origin else {
                return;
            };
            let origin = if state.world_space {
                origin
            } else {
                state.world_to_local.transform_point3(origin)
            };
            let position = &p.position;
            indices.sort_by(|&a, &b| {
                let da = position[a as usize].distance_squared(origin);
                let db = position[b as usize].distance_squared(origin);
                db.total_cmp(&da)
            });
        }
        SortMode::OldToYoung | SortMode::YoungToOld => {
            let lifetime = &p.lifetime;
            let initial = &p.initial_lifetime;
            let age = |i: u32| initial[i as usize] - lifetime[i as usize];
            if mode == SortMode::OldToYoung {
                indices.sort_by(|&a, &b| age(b).total_cmp(&age(a)));
            } else {
                indices.sort_by(|&a, &b| age(a).total_cmp(&age(b)));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distribution::Distribution;
    use crate::evolver::{CollisionsEvolver, ColorEvolver, GravityEvolver};
    use crate::emitter::ParticleBurst;
    use crate::shape::{LineShape, ParticleEmitterShape, SphereShape};

    fn playing(settings: ParticleSystemSettings) -> ParticleSystem {
        let mut system = ParticleSystem::new(settings);
        system.initialize().unwrap();
        system.play().unwrap();
        system
    }

    fn sphere_emitter(rate: f32) -> ParticleEmitter {
        let mut emitter = ParticleEmitter::new(ParticleEmitterShape::Sphere(SphereShape {
            radius: 1.0,
            thickness: 0.0,
        }));
        emitter.emission_rate = Distribution::Constant(rate);
        emitter
    }

    /// Place particles with the given remaining and initial lifetimes
    fn seed_particles(system: &mut ParticleSystem, lifetimes: &[(f32, f32)]) {
        let start = system.set.alloc_particles(lifetimes.len());
        let p = system.set.particles_mut();
        for (i, &(lifetime, initial)) in lifetimes.iter().enumerate() {
            p.lifetime[start + i] = lifetime;
            p.initial_lifetime[start + i] = initial;
            p.position[start + i] = Vec3::new(i as f32, 0.0, 0.0);
        }
    }

    #[test]
    fn playback_transitions() {
        let mut system = ParticleSystem::new(ParticleSystemSettings::default());
        assert_eq!(system.state(), PlaybackState::Uninitialized);
        assert!(system.play().is_err());

        system.initialize().unwrap();
        assert_eq!(system.state(), PlaybackState::Stopped);
        assert!(system.pause().is_err());

        system.play().unwrap();
        system.pause().unwrap();
        assert_eq!(system.state(), PlaybackState::Paused);
        system.play().unwrap();
        system.stop().unwrap();
        assert_eq!(system.state(), PlaybackState::Stopped);

        let err = system.initialize().unwrap_err();
        assert!(matches!(err, EmberError::InvalidTransition { .. }));
    }

    #[test]
    fn simulate_requires_playing() {
        let mut system = ParticleSystem::new(ParticleSystemSettings::default());
        system.initialize().unwrap();
        let err = system.simulate(0.1, &SimulationContext::default()).unwrap_err();
        assert!(matches!(err, EmberError::NotPlaying(ref s) if s == "Stopped"));
    }

    #[test]
    fn expired_particles_are_removed_after_swap() {
        let mut system = playing(ParticleSystemSettings::default());
        seed_particles(&mut system, &[(0.0, 1.0), (-1.0, 1.0), (1.0, 1.0), (0.0, 1.0)]);

        system.simulate(0.25, &SimulationContext::default()).unwrap();

        assert_eq!(system.particle_count(), 1);
        assert_eq!(system.particle_set().particles().lifetime[0], 0.75);
    }

    #[test]
    fn sphere_with_gravity_reaches_cap() {
        let mut system = playing(ParticleSystemSettings {
            max_particles: 50,
            ..Default::default()
        });
        system.add_emitter(sphere_emitter(100.0));
        system.add_evolver(ParticleEvolver::Gravity(GravityEvolver { scale: 1.0 }));

        let dt = 1.0 / 60.0;
        let mut previous: Vec<f32> = Vec::new();
        for _ in 0..60 {
            system.simulate(dt, &SimulationContext::default()).unwrap();

            let count = system.particle_count();
            let p = system.particle_set().particles();
            for i in 0..count {
                assert!(p.lifetime[i] <= p.initial_lifetime[i]);
            }
            for (i, &before) in previous.iter().enumerate() {
                assert!(p.lifetime[i] < before);
            }
            previous = p.lifetime[..count].to_vec();
        }

        assert_eq!(system.particle_count(), 50);
        let p = system.particle_set().particles();
        // Gravity pulled the oldest particle down for the whole second
        assert!(p.velocity[0].y < 1.0 - 0.9 * 9.81);
    }

    #[test]
    fn continuous_spawns_are_spread_across_the_frame() {
        let mut system = playing(ParticleSystemSettings::default());
        let mut emitter = ParticleEmitter::new(ParticleEmitterShape::Line(LineShape {
            length: 0.0,
            ..Default::default()
        }));
        emitter.emission_rate = Distribution::Constant(10.0);
        emitter.set_bursts(vec![ParticleBurst::once(0.5, 2.0)]);
        system.add_emitter(emitter);

        system.simulate(1.0, &SimulationContext::default()).unwrap();
        assert_eq!(system.particle_count(), 12);

        // Unit speed along Z, the first particle was born at the start of the frame
        let p = system.particle_set().particles();
        for i in 0..10 {
            let lived = 1.0 - i as f32 * 0.1;
            assert!((p.position[i].z - lived).abs() < 1e-5);
            assert!((p.initial_lifetime[i] - p.lifetime[i] - lived).abs() < 1e-5);
        }
        // Bursts keep the whole step
        assert!((p.position[10].z - 1.0).abs() < 1e-5);
        assert!((p.position[11].z - 1.0).abs() < 1e-5);
    }

    #[test]
    fn evolvers_run_in_stage_then_priority_order() {
        let mut system = ParticleSystem::new(ParticleSystemSettings::default());
        system.add_evolver(ParticleEvolver::Collisions(CollisionsEvolver::default()));
        system.add_evolver(ParticleEvolver::Color(ColorEvolver::default()));
        system.add_evolver(ParticleEvolver::Gravity(GravityEvolver::default()));
        system.add_evolver_with(
            EvolverProperties {
                priority: 0,
                stage: EvolverStage::BeforeIntegration,
            },
            ParticleEvolver::Gravity(GravityEvolver::default()),
        );

        let names: Vec<_> = system.evolvers().map(ParticleEvolver::name).collect();
        assert_eq!(names, ["gravity", "color", "gravity", "collisions"]);
    }

    #[test]
    fn sort_old_to_young() {
        let mut system = playing(ParticleSystemSettings {
            sort_mode: SortMode::OldToYoung,
            ..Default::default()
        });
        seed_particles(&mut system, &[(3.0, 4.0), (1.0, 4.0), (2.0, 4.0)]);
        system.simulate(0.1, &SimulationContext::default()).unwrap();
        assert_eq!(system.particle_set().particles().indices[..3], [1, 2, 0]);

        system.settings.sort_mode = SortMode::YoungToOld;
        system.simulate(0.1, &SimulationContext::default()).unwrap();
        assert_eq!(system.particle_set().particles().indices[..3], [0, 2, 1]);
    }

    #[test]
    fn distance_sort_is_back_to_front() {
        let mut system = playing(ParticleSystemSettings {
            sort_mode: SortMode::Distance,
            ..Default::default()
        });
        seed_particles(&mut system, &[(5.0, 5.0), (5.0, 5.0), (5.0, 5.0)]);

        let ctx = SimulationContext {
            view_origin: Some(Vec3::new(-1.0, 0.0, 0.0)),
            ..Default::default()
        };
        system.simulate(0.1, &ctx).unwrap();
        assert_eq!(system.particle_set().particles().indices[..3], [2, 1, 0]);

        // Without a view origin the order is left as is
        system.simulate(0.1, &SimulationContext::default()).unwrap();
        assert_eq!(system.particle_set().particles().indices[..3], [0, 1, 2]);
    }

    #[test]
    fn looping_time_wraps() {
        let mut system = playing(ParticleSystemSettings {
            duration: 1.0,
            ..Default::default()
        });
        for _ in 0..3 {
            system.simulate(0.4, &SimulationContext::default()).unwrap();
        }
        assert!((system.time() - 0.2).abs() < 1e-5);
    }

    #[test]
    fn non_looping_stops_emitting() {
        let mut system = playing(ParticleSystemSettings {
            duration: 0.5,
            looping: false,
            ..Default::default()
        });
        system.add_emitter(sphere_emitter(10.0));

        for _ in 0..4 {
            system.simulate(0.125, &SimulationContext::default()).unwrap();
        }
        let after_duration = system.particle_count();
        assert_eq!(system.time(), 0.5);

        assert!(after_duration > 0);
        for _ in 0..4 {
            system.simulate(0.125, &SimulationContext::default()).unwrap();
        }
        assert_eq!(system.particle_count(), after_duration);
    }

    #[test]
    fn stop_clears_and_rewinds() {
        let mut system = playing(ParticleSystemSettings::default());
        system.add_emitter(sphere_emitter(100.0));
        system.simulate(0.1, &SimulationContext::default()).unwrap();
        assert!(system.particle_count() > 0);

        system.stop().unwrap();
        assert_eq!(system.particle_count(), 0);
        assert_eq!(system.time(), 0.0);
    }

    #[test]
    fn bounds_cover_live_particles() {
        let mut system = playing(ParticleSystemSettings::default());
        seed_particles(&mut system, &[(1.0, 1.0), (1.0, 1.0), (1.0, 1.0)]);
        let bounds = system.calculate_bounds();
        assert_eq!(bounds.min, Vec3::ZERO);
        assert_eq!(bounds.max, Vec3::new(2.0, 0.0, 0.0));
    }
}
