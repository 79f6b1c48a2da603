//! Evolvers that change how particles look over their lifetime

use super::{particle_random, particle_t, COLOR_TAG, ROTATION_TAG, SIZE_TAG, TEXTURE_ANIMATION_TAG};
use crate::distribution::{ColorDistribution, Distribution};
use crate::set::ParticleSet;
use crate::state::{ParticleSystemState, SpriteSheetGrid};
use glam::Vec3;
use serde::Deserialize;

/// Texture parameter the sprite sheet is read from by default
pub const DEFAULT_SPRITE_TEXTURE: &str = "gTexture";

/// Steps through the frames of a sprite sheet over each particle's lifetime
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct TextureAnimationEvolver {
    /// Material texture parameter holding the sprite sheet
    pub texture_param: String,
    /// Times the animation loops over a particle's lifetime
    pub num_cycles: u32,
    /// Lock each particle to one randomly chosen row of the sheet
    pub random_row: bool,
}

impl Default for TextureAnimationEvolver {
    fn default() -> Self {
        Self {
            texture_param: DEFAULT_SPRITE_TEXTURE.to_string(),
            num_cycles: 1,
            random_row: false,
        }
    }
}

impl TextureAnimationEvolver {
    fn sprite_grid(&self, state: &ParticleSystemState) -> Option<SpriteSheetGrid> {
        let material = state.material?;
        if !material.has_texture_param(&self.texture_param) {
            return None;
        }
        material
            .sprite_texture(&self.texture_param)
            .filter(|grid| grid.count > 0 && grid.num_columns > 0 && grid.num_rows > 0)
    }

    pub(crate) fn evolve(
        &self,
        state: &ParticleSystemState,
        set: &mut ParticleSet,
        start: usize,
        end: usize,
    ) {
        let p = set.particles_mut();

        let Some(grid) = self.sprite_grid(state) else {
            p.frame[start..end].fill(0.0);
            return;
        };

        let cycles = self.num_cycles.max(1) as f32;
        let columns = grid.num_columns;

        for i in start..end {
            let t = particle_t(p.initial_lifetime[i], p.lifetime[i]);
            let anim_t = (t * cycles).fract();

            let frame = if self.random_row {
                let used_rows = grid.count.div_ceil(columns).min(grid.num_rows);
                let mut random = particle_random(p.seed[i], TEXTURE_ANIMATION_TAG);
                let row = random.get_range(0, used_rows as i32 - 1) as u32;

                let row_start = row * columns;
                let row_frames = columns.min(grid.count - row_start);
                row_start + (anim_t * row_frames as f32) as u32
            } else {
                (anim_t * grid.count as f32) as u32
            };

            p.frame[i] = frame.min(grid.count - 1) as f32;
        }
    }
}

/// Sets particle color from normalized age
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct ColorEvolver {
    pub color: ColorDistribution,
}

impl ColorEvolver {
    pub(crate) fn evolve(&self, set: &mut ParticleSet, start: usize, end: usize) {
        let p = set.particles_mut();
        for i in start..end {
            let t = particle_t(p.initial_lifetime[i], p.lifetime[i]);
            let mut random = particle_random(p.seed[i], COLOR_TAG);
            p.color[i] = self.color.evaluate_random(t, &mut random);
        }
    }
}

/// Sets particle size from normalized age, keeping texture flips
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct SizeEvolver {
    pub size: Distribution<f32>,
    pub size_3d: Distribution<Vec3>,
    pub use_3d: bool,
}

impl Default for SizeEvolver {
    fn default() -> Self {
        Self {
            size: Distribution::Constant(1.0),
            size_3d: Distribution::Constant(Vec3::ONE),
            use_3d: false,
        }
    }
}

impl SizeEvolver {
    pub(crate) fn evolve(&self, set: &mut ParticleSet, start: usize, end: usize) {
        let p = set.particles_mut();
        for i in start..end {
            let t = particle_t(p.initial_lifetime[i], p.lifetime[i]);
            let mut random = particle_random(p.seed[i], SIZE_TAG);

            let size = if self.use_3d {
                self.size_3d.evaluate_random(t, &mut random)
            } else {
                Vec3::splat(self.size.evaluate_random(t, &mut random))
            };

            let old = p.size[i];
            p.size[i] = Vec3::new(
                size.x.abs().copysign(old.x),
                size.y.abs().copysign(old.y),
                size.z,
            );
        }
    }
}

/// Sets particle rotation (degrees) from normalized age
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct RotationEvolver {
    pub rotation: Distribution<f32>,
    pub rotation_3d: Distribution<Vec3>,
    pub use_3d: bool,
}

impl RotationEvolver {
    pub(crate) fn evolve(&self, set: &mut ParticleSet, start: usize, end: usize) {
        let p = set.particles_mut();
        for i in start..end {
            let t = particle_t(p.initial_lifetime[i], p.lifetime[i]);
            let mut random = particle_random(p.seed[i], ROTATION_TAG);

            p.rotation[i] = if self.use_3d {
                self.rotation_3d.evaluate_random(t, &mut random)
            } else {
                Vec3::new(self.rotation.evaluate_random(t, &mut random), 0.0, 0.0)
            };
        }
    }
}
