//! Verdict resolution under materiality.
//!
//! The comparison against the threshold uses the raw exception rate;
//! the reported rate is rounded to two fractional digits half-to-even,
//! so the recorded number never flips a verdict by itself.

use crate::report::Verdict;

/// PASS iff the raw exception rate does not exceed the threshold.
/// Zero population never reaches this function; the engine reports it
/// as an error first.
pub fn resolve(
    exception_count: i64,
    total_population: i64,
    materiality_threshold_percent: f64,
) -> Verdict {
    let rate = raw_rate(exception_count, total_population);
    if rate <= materiality_threshold_percent {
        Verdict::Pass
    } else {
        Verdict::Fail
    }
}

/// The exception rate recorded on the report, rounded half-to-even to
/// two fractional digits.
pub fn exception_rate_percent(exception_count: i64, total_population: i64) -> f64 {
    round_half_even(raw_rate(exception_count, total_population), 2)
}

fn raw_rate(exception_count: i64, total_population: i64) -> f64 {
    if total_population <= 0 {
        return 0.0;
    }
    (exception_count as f64 / total_population as f64) * 100.0
}

pub(crate) fn round_half_even(value: f64, digits: u32) -> f64 {
    let factor = 10f64.powi(digits as i32);
    let scaled = value * factor;
    let floor = scaled.floor();
    let remainder = scaled - floor;
    let rounded = if (remainder - 0.5).abs() < 1e-9 {
        // Exactly halfway: round to the even neighbour.
        if (floor as i64) % 2 == 0 {
            floor
        } else {
            floor + 1.0
        }
    } else {
        scaled.round()
    };
    rounded / factor
}
