//! Keyframe curves, color gradients and packed colors used by distributions

use glam::{Vec3, Vec4};
use std::ops::{Add, Mul, Sub};

/// Linear interpolation between two floats
pub fn lerp_f32(a: f32, b: f32, t: f32) -> f32 {
    a + (b - a) * t
}

/// Values that can be stored in a curve or distribution
pub trait CurveValue:
    Copy
    + Default
    + Send
    + Sync
    + Add<Output = Self>
    + Sub<Output = Self>
    + Mul<f32, Output = Self>
    + 'static
{
    /// Number of floats written by `write_elements`
    const ELEMENTS: usize;

    fn write_elements(&self, out: &mut Vec<f32>);

    fn lerp(a: Self, b: Self, t: f32) -> Self {
        a + (b - a) * t
    }
}

impl CurveValue for f32 {
    const ELEMENTS: usize = 1;

    fn write_elements(&self, out: &mut Vec<f32>) {
        out.push(*self);
    }
}

impl CurveValue for Vec3 {
    const ELEMENTS: usize = 3;

    fn write_elements(&self, out: &mut Vec<f32>) {
        out.extend_from_slice(&self.to_array());
    }
}

/// A keyframe: a value at a point in time, with Hermite tangents
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Keyframe<T> {
    pub time: f32,
    pub value: T,
    pub in_tangent: T,
    pub out_tangent: T,
}

impl<T: CurveValue> Keyframe<T> {
    /// Keyframe with flat tangents
    pub fn new(time: f32, value: T) -> Self {
        Self {
            time,
            value,
            in_tangent: T::default(),
            out_tangent: T::default(),
        }
    }
}

/// Keyframe curve sampled with cubic Hermite interpolation. Keys are kept sorted by time.
#[derive(Clone, Debug, PartialEq)]
pub struct AnimationCurve<T> {
    keyframes: Vec<Keyframe<T>>,
}

impl<T: CurveValue> AnimationCurve<T> {
    pub fn new(mut keyframes: Vec<Keyframe<T>>) -> Self {
        keyframes.sort_by(|a, b| a.time.total_cmp(&b.time));
        Self { keyframes }
    }

    /// Curve through `(time, value)` points. Tangents follow the slope between
    /// neighbours, which makes straight lines stay straight.
    pub fn from_points(points: &[(f32, T)]) -> Self {
        let mut keyframes: Vec<Keyframe<T>> =
            points.iter().map(|&(t, v)| Keyframe::new(t, v)).collect();
        keyframes.sort_by(|a, b| a.time.total_cmp(&b.time));

        let n = keyframes.len();
        for i in 0..n {
            let prev = if i > 0 { i - 1 } else { i };
            let next = if i + 1 < n { i + 1 } else { i };
            let span = keyframes[next].time - keyframes[prev].time;
            if span > 0.0 {
                let slope = (keyframes[next].value - keyframes[prev].value) * (1.0 / span);
                keyframes[i].in_tangent = slope;
                keyframes[i].out_tangent = slope;
            }
        }

        Self { keyframes }
    }

    /// Curve holding a single value
    pub fn constant(value: T) -> Self {
        Self::new(vec![Keyframe::new(0.0, value)])
    }

    pub fn keyframes(&self) -> &[Keyframe<T>] {
        &self.keyframes
    }

    /// Time of the first and last keyframe
    pub fn time_range(&self) -> (f32, f32) {
        match (self.keyframes.first(), self.keyframes.last()) {
            (Some(first), Some(last)) => (first.time, last.time),
            _ => (0.0, 0.0),
        }
    }

    /// Sample the curve, clamping outside the keyframe range
    pub fn evaluate(&self, time: f32) -> T {
        let keyframes = &self.keyframes;
        let Some(first) = keyframes.first() else {
            return T::default();
        };
        if time <= first.time {
            return first.value;
        }

        let last = &keyframes[keyframes.len() - 1];
        if time >= last.time {
            return last.value;
        }

        // First key strictly after `time`; guaranteed in 1..len by the clamps above
        let idx = keyframes.partition_point(|kf| kf.time <= time);
        let prev = &keyframes[idx - 1];
        let next = &keyframes[idx];

        let span = next.time - prev.time;
        if span <= 0.0 {
            return prev.value;
        }
        let t = (time - prev.time) / span;

        cubic_hermite(prev.value, prev.out_tangent, next.value, next.in_tangent, span, t)
    }
}

/// Cubic Hermite spline interpolation. Tangents are per second and scaled by `span`.
pub fn cubic_hermite<T: CurveValue>(p0: T, m0: T, p1: T, m1: T, span: f32, t: f32) -> T {
    let t2 = t * t;
    let t3 = t2 * t;

    let h00 = 2.0 * t3 - 3.0 * t2 + 1.0;
    let h10 = t3 - 2.0 * t2 + t;
    let h01 = -2.0 * t3 + 3.0 * t2;
    let h11 = t3 - t2;

    p0 * h00 + m0 * (h10 * span) + p1 * h01 + m1 * (h11 * span)
}

/// 8-bit RGBA color as stored per particle
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct PackedColor(pub [u8; 4]);

impl PackedColor {
    pub const WHITE: Self = Self([255, 255, 255, 255]);
    pub const BLACK: Self = Self([0, 0, 0, 255]);
    pub const TRANSPARENT: Self = Self([0, 0, 0, 0]);

    /// Pack a linear [0, 1] RGBA color
    pub fn from_vec4(color: Vec4) -> Self {
        let c = (color.clamp(Vec4::ZERO, Vec4::ONE) * 255.0).round();
        Self([c.x as u8, c.y as u8, c.z as u8, c.w as u8])
    }

    pub fn to_vec4(self) -> Vec4 {
        Vec4::new(
            self.0[0] as f32,
            self.0[1] as f32,
            self.0[2] as f32,
            self.0[3] as f32,
        ) / 255.0
    }

    /// Byte-wise blend with an 8-bit factor: 0 returns `a`, 255 returns `b`
    pub fn lerp_quantized(a: Self, b: Self, t: u8) -> Self {
        let t = t as u32;
        let inv = 255 - t;
        let mut out = [0u8; 4];
        for (i, channel) in out.iter_mut().enumerate() {
            *channel = ((a.0[i] as u32 * inv + b.0[i] as u32 * t + 127) / 255) as u8;
        }
        Self(out)
    }
}

/// A color key at a point in time
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ColorKey {
    pub time: f32,
    pub color: Vec4,
}

/// Linearly interpolated color gradient. Keys are kept sorted by time.
#[derive(Clone, Debug, PartialEq)]
pub struct ColorGradient {
    keys: Vec<ColorKey>,
}

impl ColorGradient {
    pub fn new(mut keys: Vec<ColorKey>) -> Self {
        keys.sort_by(|a, b| a.time.total_cmp(&b.time));
        Self { keys }
    }

    pub fn from_points(points: &[(f32, Vec4)]) -> Self {
        Self::new(
            points
                .iter()
                .map(|&(time, color)| ColorKey { time, color })
                .collect(),
        )
    }

    pub fn keys(&self) -> &[ColorKey] {
        &self.keys
    }

    pub fn time_range(&self) -> (f32, f32) {
        match (self.keys.first(), self.keys.last()) {
            (Some(first), Some(last)) => (first.time, last.time),
            _ => (0.0, 0.0),
        }
    }

    pub fn evaluate(&self, time: f32) -> Vec4 {
        let keys = &self.keys;
        let Some(first) = keys.first() else {
            return Vec4::ONE;
        };
        if time <= first.time {
            return first.color;
        }

        let last = &keys[keys.len() - 1];
        if time >= last.time {
            return last.color;
        }

        let idx = keys.partition_point(|k| k.time <= time);
        let prev = &keys[idx - 1];
        let next = &keys[idx];

        let span = next.time - prev.time;
        if span <= 0.0 {
            return prev.color;
        }
        prev.color.lerp(next.color, (time - prev.time) / span)
    }
}
