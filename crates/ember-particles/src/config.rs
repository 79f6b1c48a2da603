//! TOML descriptions of particle systems and of the manager
//!
//! ```toml
//! [settings]
//! max_particles = 500
//! duration = 2.0
//!
//! [[emitters]]
//! emission_rate = 40
//! initial_lifetime = { min = 1, max = 2 }
//! initial_color = { gradient = [[0, 1, 1, 1, 1], [1, 1, 0, 0, 0]] }
//! shape = { type = "cone", angle = 20 }
//!
//! [[evolvers]]
//! type = "gravity"
//! scale = 0.5
//! ```

use crate::distribution::{ColorDistribution, Distribution};
use crate::emitter::{ParticleBurst, ParticleEmitter};
use crate::evolver::ParticleEvolver;
use crate::shape::{
    BoxShape, BoxType, CircleShape, ConeShape, HemisphereShape, LineShape, ParticleEmitterShape,
    RectShape, SphereShape,
};
use crate::system::{ParticleSystem, ParticleSystemSettings};
use ember_core::{EmberError, Result};
use glam::Vec3;
use serde::Deserialize;

/// Box shapes precompute selection weights, so they are built through [`BoxShape::new`]
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct BoxConfig {
    pub kind: BoxType,
    pub extents: Vec3,
}

impl Default for BoxConfig {
    fn default() -> Self {
        Self {
            kind: BoxType::Volume,
            extents: Vec3::ONE,
        }
    }
}

/// Emitter shape table, tagged by `type`
#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ShapeConfig {
    Cone(ConeShape),
    Sphere(SphereShape),
    Hemisphere(HemisphereShape),
    Box(BoxConfig),
    Line(LineShape),
    Circle(CircleShape),
    Rect(RectShape),
    StaticMesh,
    SkinnedMesh,
}

impl ShapeConfig {
    pub fn into_shape(self) -> Result<ParticleEmitterShape> {
        Ok(match self {
            Self::Cone(s) => ParticleEmitterShape::Cone(s),
            Self::Sphere(s) => ParticleEmitterShape::Sphere(s),
            Self::Hemisphere(s) => ParticleEmitterShape::Hemisphere(s),
            Self::Box(b) => ParticleEmitterShape::Box(BoxShape::new(b.kind, b.extents)),
            Self::Line(s) => ParticleEmitterShape::Line(s),
            Self::Circle(s) => ParticleEmitterShape::Circle(s),
            Self::Rect(s) => ParticleEmitterShape::Rect(s),
            Self::StaticMesh | Self::SkinnedMesh => {
                return Err(EmberError::ConfigError(
                    "mesh emitter shapes need mesh data and cannot be described in TOML".into(),
                ))
            }
        })
    }
}

/// One `[[emitters]]` entry. Missing keys keep the emitter defaults.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct EmitterConfig {
    pub shape: Option<ShapeConfig>,
    pub emission_rate: Option<Distribution<f32>>,
    pub initial_lifetime: Option<Distribution<f32>>,
    pub initial_speed: Option<Distribution<f32>>,
    pub initial_size: Option<Distribution<f32>>,
    pub initial_size_3d: Option<Distribution<Vec3>>,
    pub initial_rotation: Option<Distribution<f32>>,
    pub initial_rotation_3d: Option<Distribution<Vec3>>,
    pub initial_color: Option<ColorDistribution>,
    pub random_offset: Option<f32>,
    pub flip_u: Option<f32>,
    pub flip_v: Option<f32>,
    pub bursts: Vec<BurstConfig>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct BurstConfig {
    pub time: f32,
    pub count: Distribution<f32>,
    #[serde(default)]
    pub interval: f32,
}

fn check_unit(field: &str, value: f32) -> Result<f32> {
    if (0.0..=1.0).contains(&value) {
        Ok(value)
    } else {
        Err(EmberError::ValueOutOfRange {
            field: field.to_string(),
            min: 0.0,
            max: 1.0,
            value: value as f64,
        })
    }
}

impl EmitterConfig {
    pub fn build(self) -> Result<ParticleEmitter> {
        let mut emitter = ParticleEmitter::default();

        if let Some(shape) = self.shape {
            emitter.shape = Some(shape.into_shape()?);
        }
        if let Some(v) = self.emission_rate {
            emitter.emission_rate = v;
        }
        if let Some(v) = self.initial_lifetime {
            emitter.initial_lifetime = v;
        }
        if let Some(v) = self.initial_speed {
            emitter.initial_speed = v;
        }
        if let Some(v) = self.initial_size {
            emitter.initial_size = v;
        }
        if let Some(v) = self.initial_size_3d {
            emitter.initial_size_3d = v;
            emitter.use_3d_size = true;
        }
        if let Some(v) = self.initial_rotation {
            emitter.initial_rotation = v;
        }
        if let Some(v) = self.initial_rotation_3d {
            emitter.initial_rotation_3d = v;
            emitter.use_3d_rotation = true;
        }
        if let Some(v) = self.initial_color {
            emitter.initial_color = v;
        }
        if let Some(v) = self.random_offset {
            emitter.random_offset = v;
        }
        if let Some(v) = self.flip_u {
            emitter.set_flip_u(check_unit("flip_u", v)?);
        }
        if let Some(v) = self.flip_v {
            emitter.set_flip_v(check_unit("flip_v", v)?);
        }

        emitter.set_bursts(
            self.bursts
                .into_iter()
                .map(|b| ParticleBurst {
                    time: b.time,
                    count: b.count,
                    interval: b.interval,
                })
                .collect(),
        );

        Ok(emitter)
    }
}

/// A complete particle system description
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct ParticleSystemConfig {
    pub settings: ParticleSystemSettings,
    pub emitters: Vec<EmitterConfig>,
    pub evolvers: Vec<ParticleEvolver>,
}

impl ParticleSystemConfig {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        Ok(toml::from_str(s)?)
    }

    /// Build an uninitialized system
    pub fn build(self) -> Result<ParticleSystem> {
        if self.settings.duration <= 0.0 {
            return Err(EmberError::ConfigError(format!(
                "duration must be positive, got {}",
                self.settings.duration
            )));
        }

        let mut system = ParticleSystem::new(self.settings);
        for emitter in self.emitters {
            system.add_emitter(emitter.build()?);
        }
        for evolver in self.evolvers {
            system.add_evolver(evolver);
        }
        Ok(system)
    }
}

/// Scheduler settings
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ParticleManagerConfig {
    /// Worker threads. 0 uses one per core.
    pub worker_threads: usize,
    /// Row alignment of staged pixel buffers, in texels
    pub row_alignment: u32,
}

impl Default for ParticleManagerConfig {
    fn default() -> Self {
        Self {
            worker_threads: 0,
            row_alignment: 1,
        }
    }
}

impl ParticleManagerConfig {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        Ok(toml::from_str(s)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::curves::PackedColor;
    use crate::evolver::CollisionMode;
    use crate::system::SortMode;
    use glam::Vec4;

    const FOUNTAIN: &str = r#"
        [settings]
        max_particles = 500
        duration = 2
        sort_mode = "old_to_young"

        [[emitters]]
        emission_rate = 40
        initial_lifetime = { min = 1, max = 2.5 }
        initial_size = { curve = [[0, 0.1], [1, 0.3]] }
        initial_color = { gradient = [[0, 1, 1, 1, 1], [1, 1, 0, 0, 0]] }
        flip_u = 0.5
        shape = { type = "cone", angle = 20, mode = { kind = "loop", speed = 90 } }

        [[emitters.bursts]]
        time = 0.5
        count = 20

        [[emitters]]
        initial_size_3d = [1, 2, 3]
        shape = { type = "box", kind = "surface", extents = [2, 1, 1] }

        [[evolvers]]
        type = "gravity"
        scale = 0.5

        [[evolvers]]
        type = "collisions"
        mode = "world"
        restitution = 0.3

        [[evolvers]]
        type = "size"
        size = { min_curve = [[0, 1], [1, 0]], max_curve = [[0, 2], [1, 0]] }
    "#;

    #[test]
    fn parses_full_system() {
        let config = ParticleSystemConfig::from_toml_str(FOUNTAIN).unwrap();
        assert_eq!(config.settings.max_particles, 500);
        assert_eq!(config.settings.duration, 2.0);
        assert_eq!(config.settings.sort_mode, SortMode::OldToYoung);
        assert_eq!(config.emitters.len(), 2);
        assert_eq!(config.evolvers.len(), 3);

        let system = config.build().unwrap();
        let emitter = &system.emitters()[0];
        assert_eq!(emitter.emission_rate, Distribution::Constant(40.0));
        assert_eq!(
            emitter.initial_lifetime,
            Distribution::RandomRange { min: 1.0, max: 2.5 }
        );
        assert!(matches!(emitter.initial_size, Distribution::Curve(_)));
        assert_eq!(emitter.initial_color.evaluate(1.0, 0.0), PackedColor([255, 0, 0, 0]));
        assert_eq!(emitter.flip_u(), 0.5);
        assert_eq!(emitter.bursts().len(), 1);

        match &emitter.shape {
            Some(ParticleEmitterShape::Cone(cone)) => {
                assert_eq!(cone.angle, 20.0);
                assert_eq!(cone.radius, 1.0);
                assert_eq!(cone.mode.speed, 90.0);
            }
            other => panic!("expected cone, got {other:?}"),
        }

        let boxed = &system.emitters()[1];
        assert!(boxed.use_3d_size);
        match &boxed.shape {
            Some(ParticleEmitterShape::Box(b)) => {
                assert_eq!(b.kind(), BoxType::Surface);
                assert_eq!(b.extents(), Vec3::new(2.0, 1.0, 1.0));
            }
            other => panic!("expected box, got {other:?}"),
        }

        let names: Vec<_> = system.evolvers().map(ParticleEvolver::name).collect();
        assert_eq!(names, ["gravity", "size", "collisions"]);
        match system.evolvers().last() {
            Some(ParticleEvolver::Collisions(c)) => {
                assert_eq!(c.mode, CollisionMode::World);
                assert_eq!(c.restitution, 0.3);
                assert_eq!(c.dampening, 0.5);
            }
            other => panic!("expected collisions, got {other:?}"),
        }
    }

    #[test]
    fn color_forms() {
        #[derive(Deserialize)]
        struct Holder {
            color: ColorDistribution,
        }

        let constant: Holder = toml::from_str("color = [1, 0, 0, 1]").unwrap();
        assert_eq!(
            constant.color,
            ColorDistribution::Constant(Vec4::new(1.0, 0.0, 0.0, 1.0))
        );

        let range: Holder =
            toml::from_str("color = { min = [0, 0, 0, 1], max = [1, 1, 1, 1] }").unwrap();
        assert!(matches!(range.color, ColorDistribution::RandomRange { .. }));

        let ranged_gradient: Holder = toml::from_str(
            "color = { min_gradient = [[0, 0, 0, 0, 1]], max_gradient = [[0, 1, 1, 1, 1]] }",
        )
        .unwrap();
        assert!(matches!(
            ranged_gradient.color,
            ColorDistribution::RandomGradientRange { .. }
        ));
    }

    #[test]
    fn mesh_shapes_are_rejected() {
        let config = ParticleSystemConfig::from_toml_str(
            r#"
            [[emitters]]
            shape = { type = "static_mesh" }
            "#,
        )
        .unwrap();
        assert!(matches!(config.build(), Err(EmberError::ConfigError(_))));
    }

    #[test]
    fn flip_probability_is_checked() {
        let config = ParticleSystemConfig::from_toml_str("[[emitters]]\nflip_v = 1.5").unwrap();
        assert!(matches!(
            config.build(),
            Err(EmberError::ValueOutOfRange { ref field, .. }) if field == "flip_v"
        ));
    }

    #[test]
    fn invalid_toml_is_a_parse_error() {
        let err = ParticleSystemConfig::from_toml_str("[settings\n").unwrap_err();
        assert!(matches!(err, EmberError::TomlParseError(_)));

        let err =
            ParticleSystemConfig::from_toml_str("[[evolvers]]\ntype = \"teleport\"").unwrap_err();
        assert!(matches!(err, EmberError::TomlParseError(_)));
    }

    #[test]
    fn manager_config_defaults() {
        let config = ParticleManagerConfig::from_toml_str("worker_threads = 3").unwrap();
        assert_eq!(config.worker_threads, 3);
        assert_eq!(config.row_alignment, 1);
        assert_eq!(
            ParticleManagerConfig::from_toml_str("").unwrap(),
            ParticleManagerConfig::default()
        );
    }
}
