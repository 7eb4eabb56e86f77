//! Encoder tick / azimuth angle conversion.
//!
//! The dome reports its position as an encoder tick count in
//! `[0, ticks_per_turn)`, with tick 0 at the home sensor. The home sensor
//! itself sits at a configurable physical bearing (`home_azimuth_deg`), so
//! converting between ticks and azimuth is an offset plus a scale, wrapped
//! onto the circle.

/// Maximum tick error still counted as "on target" after a move settles.
pub const AZIMUTH_TOLERANCE_TICKS: u32 = 3;

/// Wrap an angle into `[0, 360)` degrees.
pub fn normalize_degrees(degrees: f64) -> f64 {
    let wrapped = degrees.rem_euclid(360.0);
    // rem_euclid can land exactly on 360.0 for tiny negative inputs
    if wrapped >= 360.0 {
        wrapped - 360.0
    } else {
        wrapped
    }
}

/// Convert an encoder tick count to an azimuth bearing in degrees.
///
/// Accepts any tick value, including negative or beyond one turn; the
/// result is always in `[0, 360)`.
pub fn ticks_to_azimuth(ticks: i64, home_azimuth_deg: f64, ticks_per_turn: u32) -> f64 {
    normalize_degrees(home_azimuth_deg + ticks as f64 * 360.0 / f64::from(ticks_per_turn))
}

/// Convert an azimuth bearing in degrees to the nearest encoder tick.
///
/// Rounds half-up (`floor(x + 0.5)`), matching the controller firmware's
/// own arithmetic so tick-exact positions survive the round trip. The
/// result is wrapped into `[0, ticks_per_turn)`.
pub fn azimuth_to_ticks(azimuth_deg: f64, home_azimuth_deg: f64, ticks_per_turn: u32) -> u32 {
    let raw = ((azimuth_deg - home_azimuth_deg) * f64::from(ticks_per_turn) / 360.0 + 0.5).floor()
        as i64;
    raw.rem_euclid(i64::from(ticks_per_turn)) as u32
}

/// Circular distance between two tick positions, in ticks.
///
/// Never exceeds `ticks_per_turn / 2`.
pub fn tick_distance(a: u32, b: u32, ticks_per_turn: u32) -> u32 {
    let diff = a.abs_diff(b);
    if diff > ticks_per_turn / 2 {
        ticks_per_turn - diff
    } else {
        diff
    }
}
