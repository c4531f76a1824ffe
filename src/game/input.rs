//! Per-Tick Driving Input
//!
//! Throttle and steer are sent as `i8` axes so every participant decodes the
//! exact same `f32` value. Conversion goes through a lookup table.

use serde::{Deserialize, Serialize};

/// Lookup table for converting an i8 axis to `[-1.0, 1.0]`.
///
/// - Index 128 (-128 as i8) = 0.0, so the unused extreme decodes as neutral
/// - ±127 maps to exactly ±1.0
pub static AXIS_LUT: [f32; 256] = {
    let mut lut = [0.0f32; 256];
    let mut i = 0usize;
    while i < 256 {
        // 0..127 = positive, 128..255 = negative (-128..-1)
        let signed = if i < 128 { i as i32 } else { i as i32 - 256 };
        if signed != -128 {
            lut[i] = signed as f32 / 127.0;
        }
        i += 1;
    }
    lut
};

/// Convert an i8 axis to `f32` using the lookup table.
#[inline]
pub fn axis_to_f32(value: i8) -> f32 {
    AXIS_LUT[(value as u8) as usize]
}

/// Quantize an `f32` axis value to i8 (clamped to `[-1.0, 1.0]`).
#[inline]
pub fn axis_from_f32(value: f32) -> i8 {
    let clamped = if value.is_nan() { 0.0 } else { value.clamp(-1.0, 1.0) };
    (clamped * 127.0).round() as i8
}

/// Driving input for a single tick.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputFrame {
    /// Throttle: -127 (full reverse) to +127 (full forward)
    pub throttle: i8,
    /// Steer: -127 (full left) to +127 (full right)
    pub steer: i8,
}

impl InputFrame {
    /// Create from raw axes.
    pub const fn with_axes(throttle: i8, steer: i8) -> Self {
        Self { throttle, steer }
    }

    /// Create from analog axis values.
    pub fn from_analog(throttle: f32, steer: f32) -> Self {
        Self::with_axes(axis_from_f32(throttle), axis_from_f32(steer))
    }

    /// Throttle in `[-1.0, 1.0]`.
    #[inline]
    pub fn throttle(&self) -> f32 {
        axis_to_f32(self.throttle)
    }

    /// Steer in `[-1.0, 1.0]`.
    #[inline]
    pub fn steer(&self) -> f32 {
        axis_to_f32(self.steer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_axis_lut_values() {
        assert_eq!(AXIS_LUT[0], 0.0);
        assert_eq!(AXIS_LUT[127], 1.0);
        assert_eq!(AXIS_LUT[129], -1.0); // 129 as u8 = -127 as i8
        assert_eq!(AXIS_LUT[128], 0.0); // -128 is neutral

        for i in 1..=127usize {
            assert_eq!(AXIS_LUT[i], -AXIS_LUT[256 - i], "LUT should be symmetric for {}", i);
        }
    }

    #[test]
    fn test_analog_quantization() {
        let frame = InputFrame::from_analog(1.0, -0.5);
        assert_eq!(frame.throttle, 127);
        assert_eq!(frame.steer, -64);
        assert_eq!(frame.throttle(), 1.0);
        assert!((frame.steer() + 0.5).abs() < 0.01);

        // Out of range clamps, NaN is neutral
        assert_eq!(InputFrame::from_analog(3.0, f32::NAN), InputFrame::with_axes(127, 0));
    }
}
