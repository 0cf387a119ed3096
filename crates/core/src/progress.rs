//! Progress values shown to owners while a job is generating.
//!
//! The inference server reports a completion fraction and a relative ETA;
//! both are noisy (negative ETAs and fractions slightly above 1.0 show up
//! around step boundaries), so they are normalised here before reaching
//! the presentation layer.

use serde::Serialize;

// ---------------------------------------------------------------------------
// ProgressUpdate
// ---------------------------------------------------------------------------

/// A single progress sample delivered to an owner.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ProgressUpdate {
    /// Completion in `0.0..=1.0`.
    pub fraction: f64,
    /// Estimated seconds remaining, never negative.
    pub eta_secs: f64,
}

impl ProgressUpdate {
    /// The "nothing running" value. Sent whenever progress must not be shown.
    pub const ZERO: Self = Self {
        fraction: 0.0,
        eta_secs: 0.0,
    };

    /// Build an update from raw server values, clamping both into range.
    ///
    /// Non-finite inputs are treated as zero.
    pub fn new(fraction: f64, eta_secs: f64) -> Self {
        Self {
            fraction: finite_or_zero(fraction).clamp(0.0, 1.0),
            eta_secs: finite_or_zero(eta_secs).max(0.0),
        }
    }

    pub fn is_zero(&self) -> bool {
        self.fraction == 0.0 && self.eta_secs == 0.0
    }

    /// Completion as a whole percentage (0-100).
    pub fn percent(&self) -> u8 {
        (self.fraction * 100.0).round() as u8
    }

    /// Human-readable ETA, empty when there is nothing to show.
    pub fn eta_text(&self) -> String {
        if self.is_zero() {
            return String::new();
        }
        format_eta(self.eta_secs)
    }
}

fn finite_or_zero(v: f64) -> f64 {
    if v.is_finite() {
        v
    } else {
        0.0
    }
}

// ---------------------------------------------------------------------------
// Formatting
// ---------------------------------------------------------------------------

/// Format a duration in seconds as `"45s"`, `"3m 07s"` or `"1h 02m"`.
pub fn format_eta(secs: f64) -> String {
    let total = finite_or_zero(secs).max(0.0).round() as u64;
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let seconds = total % 60;

    if hours > 0 {
        format!("{hours}h {minutes:02}m")
    } else if minutes > 0 {
        format!("{minutes}m {seconds:02}s")
    } else {
        format!("{seconds}s")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negative_eta_is_clamped() {
        let p = ProgressUpdate::new(0.5, -3.0);
        assert_eq!(p.eta_secs, 0.0);
        assert_eq!(p.fraction, 0.5);
    }

    #[test]
    fn fraction_is_clamped_to_unit_range() {
        assert_eq!(ProgressUpdate::new(1.02, 0.0).fraction, 1.0);
        assert_eq!(ProgressUpdate::new(-0.1, 0.0).fraction, 0.0);
    }

    #[test]
    fn nan_inputs_become_zero() {
        assert!(ProgressUpdate::new(f64::NAN, f64::INFINITY).is_zero());
    }

    #[test]
    fn zero_has_no_eta_text() {
        assert_eq!(ProgressUpdate::ZERO.eta_text(), "");
        assert_eq!(ProgressUpdate::ZERO.percent(), 0);
    }

    #[test]
    fn eta_formats() {
        assert_eq!(format_eta(0.4), "0s");
        assert_eq!(format_eta(45.0), "45s");
        assert_eq!(format_eta(187.0), "3m 07s");
        assert_eq!(format_eta(3720.0), "1h 02m");
    }

    #[test]
    fn percent_rounds() {
        assert_eq!(ProgressUpdate::new(0.426, 10.0).percent(), 43);
    }
}
