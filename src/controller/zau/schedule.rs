//! Batch sizing for the zone-sequenced rollout
//!
//! The deletion batch starts at one pod and grows by `exponentialFactor`
//! each step, capped at the effective maxUnavailable. A factor of 0
//! disables the ramp (every step uses the cap), a factor of 1 deletes
//! one pod at a time.

/// Number of pods the current step may delete.
///
/// Computed in f64 so large steps saturate at the cap instead of
/// overflowing (2^63 and beyond stay finite in floating point).
pub fn max_pods_to_delete(
    max_unavailable: i32,
    update_step: i32,
    exponential_factor: &str,
) -> Result<i32, String> {
    let factor: f64 = exponential_factor
        .trim()
        .parse()
        .map_err(|_| format!("exponentialFactor '{exponential_factor}' is not a number"))?;
    if !factor.is_finite() || factor < 0.0 {
        return Err(format!(
            "exponentialFactor '{exponential_factor}' must be a non-negative decimal"
        ));
    }

    if factor == 0.0 {
        return Ok(max_unavailable);
    }
    if factor == 1.0 {
        return Ok(1);
    }

    let raw = factor.powi(update_step);
    if !raw.is_finite() || raw >= max_unavailable as f64 {
        return Ok(max_unavailable);
    }
    Ok((raw.floor() as i32).max(1))
}
