//! Particle emitters: how many particles spawn each frame and their initial attributes

use crate::distribution::{ColorDistribution, Distribution};
use crate::rand::Random;
use crate::set::ParticleSet;
use crate::shape::ParticleEmitterShape;
use crate::state::ParticleSystemState;
use glam::{Vec3, Vec4};

/// Shortest allowed time between repeats of a burst, in seconds
pub const MIN_BURST_INTERVAL: f32 = 0.01;

/// A number of particles emitted at once at a point in the system's timeline
#[derive(Clone, Debug, PartialEq)]
pub struct ParticleBurst {
    /// Seconds from the start of the system
    pub time: f32,
    pub count: Distribution<f32>,
    /// Repeat period in seconds. Zero or less emits once.
    pub interval: f32,
}

impl ParticleBurst {
    pub fn once(time: f32, count: f32) -> Self {
        Self {
            time,
            count: Distribution::Constant(count),
            interval: 0.0,
        }
    }
}

/// What one call to [`ParticleEmitter::spawn`] added to the set
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct SpawnedParticles {
    /// Index of the first continuous particle. Burst particles follow them.
    pub first: usize,
    pub continuous: usize,
    pub burst: usize,
    /// Fraction of a particle carried into the next frame. Continuous
    /// particles are born across the frame starting from this offset.
    pub spacing: f32,
}

impl SpawnedParticles {
    pub fn total(&self) -> usize {
        self.continuous + self.burst
    }
}

/// Spawns particles from a shape and initializes their attributes
#[derive(Clone, Debug)]
pub struct ParticleEmitter {
    pub shape: Option<ParticleEmitterShape>,
    /// Particles per second
    pub emission_rate: Distribution<f32>,
    pub initial_lifetime: Distribution<f32>,
    pub initial_speed: Distribution<f32>,
    pub initial_size: Distribution<f32>,
    pub initial_size_3d: Distribution<Vec3>,
    pub use_3d_size: bool,
    /// Degrees
    pub initial_rotation: Distribution<f32>,
    pub initial_rotation_3d: Distribution<Vec3>,
    pub use_3d_rotation: bool,
    pub initial_color: ColorDistribution,
    /// Maximum random displacement applied to each spawn position
    pub random_offset: f32,
    flip_u: f32,
    flip_v: f32,
    bursts: Vec<ParticleBurst>,
    burst_accumulator: Vec<f32>,
    emit_accumulator: f32,
}

impl Default for ParticleEmitter {
    fn default() -> Self {
        Self {
            shape: None,
            emission_rate: Distribution::Constant(50.0),
            initial_lifetime: Distribution::Constant(10.0),
            initial_speed: Distribution::Constant(1.0),
            initial_size: Distribution::Constant(0.1),
            initial_size_3d: Distribution::Constant(Vec3::ONE),
            use_3d_size: false,
            initial_rotation: Distribution::Constant(0.0),
            initial_rotation_3d: Distribution::Constant(Vec3::ZERO),
            use_3d_rotation: false,
            initial_color: ColorDistribution::Constant(Vec4::ONE),
            random_offset: 0.0,
            flip_u: 0.0,
            flip_v: 0.0,
            bursts: Vec::new(),
            burst_accumulator: Vec::new(),
            emit_accumulator: 0.0,
        }
    }
}

impl ParticleEmitter {
    pub fn new(shape: ParticleEmitterShape) -> Self {
        Self {
            shape: Some(shape),
            ..Default::default()
        }
    }

    /// Probability in [0, 1] that a particle's texture is flipped horizontally
    pub fn set_flip_u(&mut self, probability: f32) {
        self.flip_u = probability.clamp(0.0, 1.0);
    }

    pub fn flip_u(&self) -> f32 {
        self.flip_u
    }

    /// Probability in [0, 1] that a particle's texture is flipped vertically
    pub fn set_flip_v(&mut self, probability: f32) {
        self.flip_v = probability.clamp(0.0, 1.0);
    }

    pub fn flip_v(&self) -> f32 {
        self.flip_v
    }

    pub fn set_bursts(&mut self, bursts: Vec<ParticleBurst>) {
        self.burst_accumulator = vec![0.0; bursts.len()];
        self.bursts = bursts;
    }

    pub fn bursts(&self) -> &[ParticleBurst] {
        &self.bursts
    }

    /// Forget fractional emission carried over from previous frames
    pub fn reset(&mut self) {
        self.emit_accumulator = 0.0;
        self.burst_accumulator.iter_mut().for_each(|a| *a = 0.0);
    }

    /// Spawn this frame's particles. Continuous particles still need to be
    /// stepped through the part of the frame they were alive for.
    pub fn spawn(
        &mut self,
        random: &mut Random,
        state: &ParticleSystemState,
        set: &mut ParticleSet,
    ) -> SpawnedParticles {
        let first = set.particle_count();
        if !self.shape.as_ref().is_some_and(ParticleEmitterShape::is_valid) {
            return SpawnedParticles {
                first,
                ..Default::default()
            };
        }

        let emitter_t = state.nrm_time_end;

        let rate = self.emission_rate.evaluate_random(emitter_t, random);
        self.emit_accumulator += rate.max(0.0) * state.time_step;
        let num_continuous = self.emit_accumulator.floor() as usize;
        self.emit_accumulator -= num_continuous as f32;

        let num_burst = if state.time_end < state.time_start {
            // The step wrapped around the end of a looping system
            let before = self.emit_bursts(state.time_start, state.length, emitter_t, random);
            self.burst_accumulator.iter_mut().for_each(|a| *a = 0.0);
            before + self.emit_bursts(0.0, state.time_end, emitter_t, random)
        } else {
            self.emit_bursts(state.time_start, state.time_end, emitter_t, random)
        };

        let continuous = self.spawn_batch(num_continuous, random, state, set, true);
        let burst = self.spawn_batch(num_burst, random, state, set, false);
        SpawnedParticles {
            first,
            continuous,
            burst,
            spacing: self.emit_accumulator,
        }
    }

    /// Number of burst particles due in the window `[start, end]`
    fn emit_bursts(&mut self, start: f32, end: f32, emitter_t: f32, random: &mut Random) -> usize {
        let mut total = 0usize;

        for (burst, accumulator) in self.bursts.iter().zip(self.burst_accumulator.iter_mut()) {
            let rel_start = (start - burst.time).max(0.0);
            let rel_end = end - burst.time;
            if rel_end <= 0.0 {
                continue;
            }

            let emit = |random: &mut Random| {
                burst.count.evaluate_random(emitter_t, random).max(0.0) as usize
            };

            // The window crossed the burst time
            if rel_start == 0.0 {
                total += emit(random);
            }

            if burst.interval <= 0.0 {
                continue;
            }

            let interval = burst.interval.max(MIN_BURST_INTERVAL);
            let duration = (rel_end - rel_start) + *accumulator;
            let cycles = (duration / interval).floor().max(0.0) as usize;
            *accumulator = duration - cycles as f32 * interval;

            for _ in 0..cycles {
                total += emit(random);
            }
        }

        total
    }

    fn spawn_batch(
        &mut self,
        count: usize,
        random: &mut Random,
        state: &ParticleSystemState,
        set: &mut ParticleSet,
        spacing: bool,
    ) -> usize {
        let count = count.min(state.max_particles.saturating_sub(set.particle_count()));
        if count == 0 {
            return 0;
        }

        let Some(shape) = self.shape.as_mut() else {
            return 0;
        };
        let first = shape.spawn(random, set, count, state);
        let end = first + count;

        // Continuous particles are spread over the frame, bursts happen at its end
        let sub_frame_spacing = 1.0 / count as f32;
        let nrm_step = state.time_step / state.length;
        let emitter_t: Vec<f32> = (0..count)
            .map(|i| {
                if spacing {
                    let offset = (i as f32 + self.emit_accumulator) * sub_frame_spacing;
                    state.nrm_time_start + nrm_step * offset
                } else {
                    state.nrm_time_end
                }
            })
            .collect();

        let p = set.particles_mut();

        for i in first..end {
            let lifetime = self.initial_lifetime.evaluate_random(emitter_t[i - first], random);
            p.lifetime[i] = lifetime;
            p.initial_lifetime[i] = lifetime;
        }

        for i in first..end {
            p.velocity[i] *= self.initial_speed.evaluate_random(emitter_t[i - first], random);
        }

        // Texture flips are encoded as the sign of size X/Y
        for i in first..end {
            let mut size = if self.use_3d_size {
                self.initial_size_3d.evaluate_random(emitter_t[i - first], random)
            } else {
                Vec3::splat(self.initial_size.evaluate_random(emitter_t[i - first], random))
            };
            if random.get_unorm() < self.flip_u {
                size.x = -size.x;
            }
            if random.get_unorm() < self.flip_v {
                size.y = -size.y;
            }
            p.size[i] = size;
        }

        if self.random_offset > 0.0 {
            for i in first..end {
                let offset = Vec3::new(random.get_snorm(), random.get_snorm(), random.get_snorm());
                p.position[i] += offset * self.random_offset;
            }
        }

        for i in first..end {
            let t = emitter_t[i - first];
            p.rotation[i] = if self.use_3d_rotation {
                self.initial_rotation_3d.evaluate_random(t, random)
            } else {
                Vec3::new(self.initial_rotation.evaluate_random(t, random), 0.0, 0.0)
            };
        }

        for i in first..end {
            p.color[i] = self.initial_color.evaluate_random(emitter_t[i - first], random);
        }

        for i in first..end {
            p.seed[i] = random.get();
            p.frame[i] = 0.0;
        }

        // Local-space systems apply their transform at render time
        if state.world_space {
            for i in first..end {
                p.position[i] = state.local_to_world.transform_point3(p.position[i]);
                p.velocity[i] = state.local_to_world.transform_vector3(p.velocity[i]);
            }
        }

        for i in first..end {
            p.prev_position[i] = p.position[i];
        }

        count
    }
}
