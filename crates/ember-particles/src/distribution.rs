//! Value distributions sampled per particle, and their lookup-table form

use crate::curves::{AnimationCurve, ColorGradient, CurveValue, PackedColor};
use crate::rand::Random;
use glam::Vec4;
use serde::Deserialize;

/// A value that is constant, random within a range, or driven by curves over time
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(
    from = "DistributionForm<T>",
    bound(deserialize = "T: CurveValue + Deserialize<'de>")
)]
pub enum Distribution<T> {
    Constant(T),
    RandomRange { min: T, max: T },
    Curve(AnimationCurve<T>),
    RandomCurveRange {
        min: AnimationCurve<T>,
        max: AnimationCurve<T>,
    },
}

impl<T: CurveValue> Default for Distribution<T> {
    fn default() -> Self {
        Self::Constant(T::default())
    }
}

impl<T: CurveValue> Distribution<T> {
    /// True for variants that blend between a min and a max
    pub fn is_ranged(&self) -> bool {
        matches!(self, Self::RandomRange { .. } | Self::RandomCurveRange { .. })
    }

    /// Evaluate at `t` using `factor` in [0, 1] to blend ranged variants
    pub fn evaluate(&self, t: f32, factor: f32) -> T {
        match self {
            Self::Constant(v) => *v,
            Self::RandomRange { min, max } => T::lerp(*min, *max, factor),
            Self::Curve(curve) => curve.evaluate(t),
            Self::RandomCurveRange { min, max } => {
                T::lerp(min.evaluate(t), max.evaluate(t), factor)
            }
        }
    }

    /// Evaluate at `t`, drawing the blend factor from `random` only when ranged
    pub fn evaluate_random(&self, t: f32, random: &mut Random) -> T {
        match self {
            Self::Constant(v) => *v,
            Self::Curve(curve) => curve.evaluate(t),
            _ => self.evaluate(t, random.get_unorm()),
        }
    }

    /// Union of the time ranges of all curves in this distribution
    pub fn time_range(&self) -> (f32, f32) {
        match self {
            Self::Constant(_) | Self::RandomRange { .. } => (0.0, 0.0),
            Self::Curve(curve) => curve.time_range(),
            Self::RandomCurveRange { min, max } => union(min.time_range(), max.time_range()),
        }
    }

    /// Resample into `num_samples` equally spaced samples per set. Ranged
    /// variants write the max as a second set unless `ignore_range` is set.
    pub fn to_lookup_table(&self, num_samples: u32, ignore_range: bool) -> LookupTable {
        let stride = T::ELEMENTS;
        let mut values = Vec::new();

        match self {
            Self::Constant(v) => {
                v.write_elements(&mut values);
                LookupTable::single(values, stride, 1)
            }
            Self::RandomRange { min, max } => {
                min.write_elements(&mut values);
                if !ignore_range {
                    max.write_elements(&mut values);
                }
                LookupTable::single(values, stride, if ignore_range { 1 } else { 2 })
            }
            Self::Curve(curve) => {
                let (start, end) = curve.time_range();
                let samples = num_samples.max(1);
                sample_into(&mut values, start, end, samples, |t, out| {
                    curve.evaluate(t).write_elements(out)
                });
                LookupTable::resampled(values, stride, samples, 1, start, end)
            }
            Self::RandomCurveRange { min, max } => {
                let (start, end) = self.time_range();
                let samples = num_samples.max(1);
                sample_into(&mut values, start, end, samples, |t, out| {
                    min.evaluate(t).write_elements(out)
                });
                if !ignore_range {
                    sample_into(&mut values, start, end, samples, |t, out| {
                        max.evaluate(t).write_elements(out)
                    });
                }
                let sets = if ignore_range { 1 } else { 2 };
                LookupTable::resampled(values, stride, samples, sets, start, end)
            }
        }
    }
}

/// Color distribution. Colors are stored as linear RGBA floats and packed on evaluation.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(from = "ColorForm")]
pub enum ColorDistribution {
    Constant(Vec4),
    RandomRange { min: Vec4, max: Vec4 },
    Gradient(ColorGradient),
    RandomGradientRange { min: ColorGradient, max: ColorGradient },
}

impl Default for ColorDistribution {
    fn default() -> Self {
        Self::Constant(Vec4::ONE)
    }
}

impl ColorDistribution {
    pub fn is_ranged(&self) -> bool {
        matches!(self, Self::RandomRange { .. } | Self::RandomGradientRange { .. })
    }

    /// Evaluate with a literal factor. The factor is quantized to 8 bits and the
    /// packed endpoints are blended byte-wise.
    pub fn evaluate(&self, t: f32, factor: f32) -> PackedColor {
        let quantized = (factor.clamp(0.0, 1.0) * 255.0).round() as u8;
        match self {
            Self::Constant(c) => PackedColor::from_vec4(*c),
            Self::RandomRange { min, max } => PackedColor::lerp_quantized(
                PackedColor::from_vec4(*min),
                PackedColor::from_vec4(*max),
                quantized,
            ),
            Self::Gradient(gradient) => PackedColor::from_vec4(gradient.evaluate(t)),
            Self::RandomGradientRange { min, max } => PackedColor::lerp_quantized(
                PackedColor::from_vec4(min.evaluate(t)),
                PackedColor::from_vec4(max.evaluate(t)),
                quantized,
            ),
        }
    }

    /// Evaluate with a random factor, blending in full precision before packing
    pub fn evaluate_random(&self, t: f32, random: &mut Random) -> PackedColor {
        let color = match self {
            Self::Constant(c) => *c,
            Self::RandomRange { min, max } => min.lerp(*max, random.get_unorm()),
            Self::Gradient(gradient) => gradient.evaluate(t),
            Self::RandomGradientRange { min, max } => {
                min.evaluate(t).lerp(max.evaluate(t), random.get_unorm())
            }
        };
        PackedColor::from_vec4(color)
    }

    pub fn time_range(&self) -> (f32, f32) {
        match self {
            Self::Constant(_) | Self::RandomRange { .. } => (0.0, 0.0),
            Self::Gradient(gradient) => gradient.time_range(),
            Self::RandomGradientRange { min, max } => union(min.time_range(), max.time_range()),
        }
    }

    /// Resample into a lookup table with a stride of four floats (RGBA)
    pub fn to_lookup_table(&self, num_samples: u32, ignore_range: bool) -> LookupTable {
        const STRIDE: usize = 4;
        let mut values = Vec::new();

        match self {
            Self::Constant(c) => {
                values.extend_from_slice(&c.to_array());
                LookupTable::single(values, STRIDE, 1)
            }
            Self::RandomRange { min, max } => {
                values.extend_from_slice(&min.to_array());
                if !ignore_range {
                    values.extend_from_slice(&max.to_array());
                }
                LookupTable::single(values, STRIDE, if ignore_range { 1 } else { 2 })
            }
            Self::Gradient(gradient) => {
                let (start, end) = gradient.time_range();
                let samples = num_samples.max(1);
                sample_into(&mut values, start, end, samples, |t, out| {
                    out.extend_from_slice(&gradient.evaluate(t).to_array())
                });
                LookupTable::resampled(values, STRIDE, samples, 1, start, end)
            }
            Self::RandomGradientRange { min, max } => {
                let (start, end) = self.time_range();
                let samples = num_samples.max(1);
                sample_into(&mut values, start, end, samples, |t, out| {
                    out.extend_from_slice(&min.evaluate(t).to_array())
                });
                if !ignore_range {
                    sample_into(&mut values, start, end, samples, |t, out| {
                        out.extend_from_slice(&max.evaluate(t).to_array())
                    });
                }
                let sets = if ignore_range { 1 } else { 2 };
                LookupTable::resampled(values, STRIDE, samples, sets, start, end)
            }
        }
    }
}

fn union(a: (f32, f32), b: (f32, f32)) -> (f32, f32) {
    (a.0.min(b.0), a.1.max(b.1))
}

fn sample_into(
    out: &mut Vec<f32>,
    start: f32,
    end: f32,
    samples: u32,
    mut write: impl FnMut(f32, &mut Vec<f32>),
) {
    let step = if samples > 1 {
        (end - start) / (samples - 1) as f32
    } else {
        0.0
    };
    for i in 0..samples {
        write(start + step * i as f32, out);
    }
}

/// Equally spaced samples of a distribution, grouped into sets (min, then max)
#[derive(Clone, Debug, PartialEq)]
pub struct LookupTable {
    pub values: Vec<f32>,
    pub num_samples: u32,
    /// Floats per sample
    pub stride: usize,
    pub num_sets: u32,
    pub time_start: f32,
    /// Samples per unit of time
    pub time_scale: f32,
}

impl LookupTable {
    fn single(values: Vec<f32>, stride: usize, num_sets: u32) -> Self {
        Self {
            values,
            num_samples: 1,
            stride,
            num_sets,
            time_start: 0.0,
            time_scale: 0.0,
        }
    }

    fn resampled(
        values: Vec<f32>,
        stride: usize,
        num_samples: u32,
        num_sets: u32,
        start: f32,
        end: f32,
    ) -> Self {
        let span = end - start;
        let time_scale = if num_samples > 1 && span > 0.0 {
            (num_samples - 1) as f32 / span
        } else {
            0.0
        };
        Self {
            values,
            num_samples,
            stride,
            num_sets,
            time_start: start,
            time_scale,
        }
    }

    /// Nearest sample at time `t` from `set`. Out-of-range sets clamp to the last one.
    pub fn sample(&self, t: f32, set: u32) -> &[f32] {
        let set = set.min(self.num_sets.saturating_sub(1)) as usize;
        let last = self.num_samples.saturating_sub(1) as f32;
        let idx = ((t - self.time_start) * self.time_scale).round().clamp(0.0, last) as usize;

        let offset = (set * self.num_samples as usize + idx) * self.stride;
        &self.values[offset..offset + self.stride]
    }
}

/// Serialized form of a [`Distribution`]: a bare value, `{ min, max }`,
/// `{ curve = [[t, v], ...] }` or `{ min_curve, max_curve }`
#[derive(Deserialize)]
#[serde(untagged)]
enum DistributionForm<T> {
    Constant(T),
    RandomRange { min: T, max: T },
    Curve { curve: Vec<(f32, T)> },
    RandomCurveRange {
        min_curve: Vec<(f32, T)>,
        max_curve: Vec<(f32, T)>,
    },
}

impl<T: CurveValue> From<DistributionForm<T>> for Distribution<T> {
    fn from(form: DistributionForm<T>) -> Self {
        match form {
            DistributionForm::Constant(v) => Self::Constant(v),
            DistributionForm::RandomRange { min, max } => Self::RandomRange { min, max },
            DistributionForm::Curve { curve } => Self::Curve(AnimationCurve::from_points(&curve)),
            DistributionForm::RandomCurveRange {
                min_curve,
                max_curve,
            } => Self::RandomCurveRange {
                min: AnimationCurve::from_points(&min_curve),
                max: AnimationCurve::from_points(&max_curve),
            },
        }
    }
}

/// Serialized form of a [`ColorDistribution`]. Gradient keys are `[t, r, g, b, a]`.
#[derive(Deserialize)]
#[serde(untagged)]
enum ColorForm {
    Constant([f32; 4]),
    RandomRange {
        min: [f32; 4],
        max: [f32; 4],
    },
    Gradient {
        gradient: Vec<[f32; 5]>,
    },
    RandomGradientRange {
        min_gradient: Vec<[f32; 5]>,
        max_gradient: Vec<[f32; 5]>,
    },
}

fn gradient_from_keys(keys: &[[f32; 5]]) -> ColorGradient {
    let points: Vec<(f32, Vec4)> = keys
        .iter()
        .map(|&[t, r, g, b, a]| (t, Vec4::new(r, g, b, a)))
        .collect();
    ColorGradient::from_points(&points)
}

impl From<ColorForm> for ColorDistribution {
    fn from(form: ColorForm) -> Self {
        match form {
            ColorForm::Constant(c) => Self::Constant(Vec4::from_array(c)),
            ColorForm::RandomRange { min, max } => Self::RandomRange {
                min: Vec4::from_array(min),
                max: Vec4::from_array(max),
            },
            ColorForm::Gradient { gradient } => Self::Gradient(gradient_from_keys(&gradient)),
            ColorForm::RandomGradientRange {
                min_gradient,
                max_gradient,
            } => Self::RandomGradientRange {
                min: gradient_from_keys(&min_gradient),
                max: gradient_from_keys(&max_gradient),
            },
        }
    }
}
