use fixed::types::I32F32;

/// Q32.32 fixed-point: 32 integer bits, 32 fractional bits.
///
/// Every flow, pressure, temperature and parameter value in the engine is a
/// `Fixed64`. The type has no NaN or infinity; division by zero panics, so
/// every division by a computed value goes through [`div_or`] or
/// `checked_div`.
pub type Fixed64 = I32F32;

/// Ticks are the atomic unit of simulation time.
pub type Ticks = u64;

/// Convert an f64 to Fixed64. Use only for initialization, never in the tick.
///
/// Out-of-range values saturate and NaN maps to zero.
#[inline]
pub fn f64_to_fixed64(v: f64) -> Fixed64 {
    if v.is_nan() {
        return Fixed64::ZERO;
    }
    Fixed64::saturating_from_num(v)
}

/// Convert Fixed64 to f64. Use only for display and tests.
#[inline]
pub fn fixed64_to_f64(v: Fixed64) -> f64 {
    v.to_num::<f64>()
}

/// Checked multiplication for Fixed64 that returns None on overflow.
#[inline]
pub fn checked_mul_64(a: Fixed64, b: Fixed64) -> Option<Fixed64> {
    a.checked_mul(b)
}

/// Checked division for Fixed64 that returns None on zero divisor.
#[inline]
pub fn checked_div_64(a: Fixed64, b: Fixed64) -> Option<Fixed64> {
    a.checked_div(b)
}

/// Divide, falling back to `fallback` on a zero divisor or overflow.
#[inline]
pub fn div_or(a: Fixed64, b: Fixed64, fallback: Fixed64) -> Fixed64 {
    a.checked_div(b).unwrap_or(fallback)
}

/// `v / 100`, for percentage parameters such as valve opening.
#[inline]
pub fn percent(v: Fixed64) -> Fixed64 {
    v / Fixed64::from_num(100)
}
