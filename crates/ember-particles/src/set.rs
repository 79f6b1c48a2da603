//! Struct-of-arrays particle storage with O(1) swap-removal

use crate::curves::PackedColor;
use glam::Vec3;

/// Capacity grows to `required * 6 / 5`, rounded up
const GROWTH_NUMERATOR: usize = 6;
const GROWTH_DENOMINATOR: usize = 5;

/// Per-attribute particle arrays. Every vector has length `capacity`.
#[derive(Clone, Debug, Default)]
pub struct ParticleSetData {
    pub position: Vec<Vec3>,
    pub prev_position: Vec<Vec3>,
    pub velocity: Vec<Vec3>,
    /// Sign of X/Y encodes horizontal/vertical texture flips
    pub size: Vec<Vec3>,
    /// Euler rotation in degrees. Billboards use X only.
    pub rotation: Vec<Vec3>,
    /// Remaining lifetime in seconds
    pub lifetime: Vec<f32>,
    pub initial_lifetime: Vec<f32>,
    /// Sprite sheet frame
    pub frame: Vec<f32>,
    pub color: Vec<PackedColor>,
    /// Per-particle seed for evolvers that need stable randomness
    pub seed: Vec<u32>,
    /// Draw order. Identity unless the system sorts.
    pub indices: Vec<u32>,
}

impl ParticleSetData {
    fn resize(&mut self, capacity: usize) {
        let old = self.indices.len();

        self.position.resize(capacity, Vec3::ZERO);
        self.prev_position.resize(capacity, Vec3::ZERO);
        self.velocity.resize(capacity, Vec3::ZERO);
        self.size.resize(capacity, Vec3::ZERO);
        self.rotation.resize(capacity, Vec3::ZERO);
        self.lifetime.resize(capacity, 0.0);
        self.initial_lifetime.resize(capacity, 0.0);
        self.frame.resize(capacity, 0.0);
        self.color.resize(capacity, PackedColor::WHITE);
        self.seed.resize(capacity, 0);

        self.indices.truncate(capacity);
        self.indices.extend((old..capacity).map(|i| i as u32));
    }

    fn swap(&mut self, a: usize, b: usize) {
        self.position.swap(a, b);
        self.prev_position.swap(a, b);
        self.velocity.swap(a, b);
        self.size.swap(a, b);
        self.rotation.swap(a, b);
        self.lifetime.swap(a, b);
        self.initial_lifetime.swap(a, b);
        self.frame.swap(a, b);
        self.color.swap(a, b);
        self.seed.swap(a, b);
    }
}

/// Dense set of live particles. Indices `[0, count)` are always active.
#[derive(Clone, Debug, Default)]
pub struct ParticleSet {
    data: ParticleSetData,
    count: usize,
    capacity: usize,
}

impl ParticleSet {
    pub fn new(capacity: usize) -> Self {
        let mut data = ParticleSetData::default();
        data.resize(capacity);
        Self {
            data,
            count: 0,
            capacity,
        }
    }

    /// Widen the active range by `count` particles and return the first new index.
    /// The new range is contiguous; its contents are stale until written.
    pub fn alloc_particles(&mut self, count: usize) -> usize {
        let start = self.count;
        let required = self.count + count;

        if required > self.capacity {
            let new_capacity =
                (required * GROWTH_NUMERATOR).div_ceil(GROWTH_DENOMINATOR);
            self.data.resize(new_capacity);
            self.capacity = self.data.indices.len();
        }

        self.count = required;
        start
    }

    /// Remove the particle at `idx` by swapping the last active particle into its slot.
    pub fn free_particle(&mut self, idx: usize) {
        debug_assert!(idx < self.count, "freeing inactive particle {idx}");
        if idx >= self.count {
            return;
        }

        let last = self.count - 1;
        if idx != last {
            self.data.swap(idx, last);
        }
        self.count = last;
    }

    pub fn clear(&mut self) {
        self.count = 0;
    }

    pub fn particle_count(&self) -> usize {
        self.count
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn particles(&self) -> &ParticleSetData {
        &self.data
    }

    pub fn particles_mut(&mut self) -> &mut ParticleSetData {
        &mut self.data
    }

    /// Side of the smallest power-of-two square texture that holds every live particle
    pub fn determine_texture_size(&self) -> u32 {
        let texels = (self.count.max(2) as u32).next_power_of_two();

        let mut width = texels;
        let mut height = 1u32;
        while width > height {
            width /= 2;
            height *= 2;
        }

        height
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_is_dense_and_contiguous() {
        let mut set = ParticleSet::new(4);
        let a = set.alloc_particles(3);
        let b = set.alloc_particles(2);
        assert_eq!(a, 0);
        assert_eq!(b, 3);
        assert_eq!(set.particle_count(), 5);
        assert!(set.capacity() >= 5);
    }

    #[test]
    fn growth_uses_factor_and_keeps_data() {
        let mut set = ParticleSet::new(10);
        set.alloc_particles(10);
        set.particles_mut().lifetime[9] = 4.0;

        set.alloc_particles(5);
        assert_eq!(set.capacity(), 18);
        assert_eq!(set.particles().lifetime[9], 4.0);
        assert_eq!(set.particles().position.len(), 18);
        assert_eq!(set.particles().indices[17], 17);
    }

    #[test]
    fn free_swaps_last_into_slot() {
        let mut set = ParticleSet::new(4);
        set.alloc_particles(4);
        for i in 0..4 {
            set.particles_mut().lifetime[i] = i as f32;
            set.particles_mut().position[i] = Vec3::splat(i as f32);
        }

        set.free_particle(1);
        assert_eq!(set.particle_count(), 3);
        assert_eq!(set.particles().lifetime[1], 3.0);
        assert_eq!(set.particles().position[1], Vec3::splat(3.0));
        assert_eq!(set.particles().lifetime[0], 0.0);
        assert_eq!(set.particles().lifetime[2], 2.0);
    }

    #[test]
    fn free_last_only_shrinks() {
        let mut set = ParticleSet::new(2);
        set.alloc_particles(2);
        set.particles_mut().lifetime[0] = 7.0;
        set.free_particle(1);
        assert_eq!(set.particle_count(), 1);
        assert_eq!(set.particles().lifetime[0], 7.0);
    }

    #[test]
    fn clear_keeps_capacity() {
        let mut set = ParticleSet::new(8);
        set.alloc_particles(6);
        set.clear();
        assert_eq!(set.particle_count(), 0);
        assert_eq!(set.capacity(), 8);
    }

    #[test]
    fn texture_size_is_power_of_two_square() {
        let mut set = ParticleSet::new(0);
        assert_eq!(set.determine_texture_size(), 2);

        set.alloc_particles(5);
        // 8 texels fold to 2x4, side 4
        assert_eq!(set.determine_texture_size(), 4);

        set.alloc_particles(11);
        // 16 texels fold to 4x4
        assert_eq!(set.determine_texture_size(), 4);

        set.alloc_particles(1);
        assert_eq!(set.determine_texture_size(), 8);
    }
}
