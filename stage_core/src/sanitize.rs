//! Numeric sanitization for values crossing the wire boundary.
//!
//! Every float or integer arriving from the network passes through one of
//! these helpers before it touches internal state. The rule is uniform:
//! NaN and ±infinity are replaced by the field's documented default, and
//! finite out-of-range values are clamped to the nearest bound. A single
//! malformed field must never drop an otherwise-useful update.

/// Replace a non-finite value with `default`, then clamp into `[min, max]`.
pub fn sanitize_f32(value: f64, min: f32, max: f32, default: f32) -> f32 {
    if !value.is_finite() {
        return default;
    }
    (value as f32).clamp(min, max)
}

/// Sanitize a value expected to lie in the unit interval `[0, 1]`.
pub fn sanitize_unit(value: f64, default: f32) -> f32 {
    sanitize_f32(value, 0.0, 1.0, default)
}

/// Sanitize a beat-phase value into `[0, 1)`.
///
/// Phase wraps at 1.0, so an inbound 1.0 (or anything above) folds back to
/// just under the wrap point rather than clamping onto it.
pub fn sanitize_phase(value: f64, default: f32) -> f32 {
    if !value.is_finite() {
        return default;
    }
    let v = value as f32;
    if v < 0.0 {
        0.0
    } else if v >= 1.0 {
        f32::from_bits(1.0f32.to_bits() - 1)
    } else {
        v
    }
}

/// Sanitize a tempo estimate. Non-finite or non-positive values mean the
/// estimate is unusable, so they map to `None`.
pub fn sanitize_bpm(value: Option<f64>) -> Option<f32> {
    match value {
        Some(v) if v.is_finite() && v > 0.0 => Some(v as f32),
        _ => None,
    }
}

/// Clamp a brightness level into the host's `0..=15` range.
pub fn sanitize_brightness(value: i64) -> u8 {
    value.clamp(0, 15) as u8
}

/// Sanitize a world coordinate. Non-finite components default to 0.0 and
/// finite values pass through unchanged; world coordinates have no range
/// limit of their own.
pub fn sanitize_coord(value: f64) -> f32 {
    if value.is_finite() {
        value as f32
    } else {
        0.0
    }
}
