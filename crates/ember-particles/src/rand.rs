//! Seeded xorshift128 generator used for deterministic emission and evolution

use glam::{Vec2, Vec3};

/// Xorshift128 random number generator.
///
/// Particle systems seed one instance per system, and evolvers derive
/// short-lived per-particle instances from the particle seed, so the same seed
/// always reproduces the same effect.
#[derive(Clone, Debug)]
pub struct Random {
    state: [u32; 4],
}

impl Random {
    pub fn new(seed: u32) -> Self {
        let mut random = Self { state: [0; 4] };
        random.set_seed(seed);
        random
    }

    /// Re-seed the generator. The odd multipliers keep the state non-zero for any seed.
    pub fn set_seed(&mut self, seed: u32) {
        self.state = [
            seed,
            seed.wrapping_mul(0x72e0_447c).wrapping_add(1),
            seed.wrapping_mul(0x5be7_b6ff).wrapping_add(1),
            seed.wrapping_mul(0x137a_03ef).wrapping_add(1),
        ];
    }

    /// Raw 32-bit value
    pub fn get(&mut self) -> u32 {
        let mut t = self.state[3];
        t ^= t << 11;
        t ^= t >> 8;

        self.state[3] = self.state[2];
        self.state[2] = self.state[1];
        self.state[1] = self.state[0];

        let s = self.state[0];
        t ^= s;
        t ^= s >> 19;

        self.state[0] = t;
        t
    }

    /// Uniform float in [0, 1). One is never returned.
    pub fn get_unorm(&mut self) -> f32 {
        // 23 random mantissa bits with a zero exponent give [1, 2)
        let bits = (self.get() & 0x007F_FFFF) | 0x3F80_0000;
        f32::from_bits(bits) - 1.0
    }

    /// Uniform float in [-1, 1)
    pub fn get_snorm(&mut self) -> f32 {
        self.get_unorm() * 2.0 - 1.0
    }

    /// Uniform integer in [min, max], both inclusive
    pub fn get_range(&mut self, min: i32, max: i32) -> i32 {
        if max <= min {
            return min;
        }

        const EPSILON: f32 = 0.0001;
        // Widened so the full i32 range does not overflow
        let span = i64::from(max) - i64::from(min);
        let offset = (self.get_unorm() * (span as f32 + 1.0 - EPSILON)) as i64;
        (i64::from(min) + offset.min(span)) as i32
    }

    /// Uniformly distributed direction on the unit sphere
    pub fn get_unit_vector(&mut self) -> Vec3 {
        loop {
            let v = Vec3::new(self.get_snorm(), self.get_snorm(), self.get_snorm());
            let sqr_len = v.length_squared();
            if sqr_len > 0.001 && sqr_len <= 1.0 {
                return v / sqr_len.sqrt();
            }
        }
    }

    /// Uniformly distributed direction on the unit circle
    pub fn get_unit_vector_2d(&mut self) -> Vec2 {
        loop {
            let v = Vec2::new(self.get_snorm(), self.get_snorm());
            let sqr_len = v.length_squared();
            if sqr_len > 0.001 && sqr_len <= 1.0 {
                return v / sqr_len.sqrt();
            }
        }
    }

    /// Point in a unit sphere shell. `thickness` of 0 samples the surface, 1 the full volume.
    pub fn get_point_in_sphere_shell(&mut self, thickness: f32) -> Vec3 {
        let inner = 1.0 - thickness.clamp(0.0, 1.0);
        let inner3 = inner * inner * inner;
        let rnd = inner3 + self.get_unorm() * (1.0 - inner3);

        self.get_unit_vector() * rnd.powf(1.0 / 3.0)
    }

    /// Point in a unit circle shell. `thickness` of 0 samples the edge, 1 the full disc.
    pub fn get_point_in_circle_shell(&mut self, thickness: f32) -> Vec2 {
        let inner = 1.0 - thickness.clamp(0.0, 1.0);
        let inner2 = inner * inner;
        let rnd = inner2 + self.get_unorm() * (1.0 - inner2);

        self.get_unit_vector_2d() * rnd.sqrt()
    }

    /// Point in an angular portion of a unit circle shell, sweeping `arc` radians from +X.
    pub fn get_point_in_arc_shell(&mut self, arc: f32, thickness: f32) -> Vec2 {
        let inner = 1.0 - thickness.clamp(0.0, 1.0);
        let inner2 = inner * inner;
        let rnd = inner2 + self.get_unorm() * (1.0 - inner2);

        let angle = self.get_unorm() * arc;
        Vec2::new(angle.cos(), angle.sin()) * rnd.sqrt()
    }

    /// Uniform barycentric coordinates over a triangle
    pub fn get_barycentric(&mut self) -> Vec3 {
        let mut u = self.get_unorm();
        let mut v = self.get_unorm();

        if u + v > 1.0 {
            u = 1.0 - u;
            v = 1.0 - v;
        }

        Vec3::new(u, v, 1.0 - u - v)
    }
}

impl Default for Random {
    fn default() -> Self {
        Self::new(0)
    }
}
