//! Level Engine: cumulative experience in, level standing out.
//!
//! The curve is a monotonically increasing step function. Derivation is
//! idempotent and reads nothing but the ALL_TIME total, so a retroactive
//! point correction costs one re-derivation, not a history replay.

use crate::config::LevelingSettings;
use crate::domain::LevelInfo;

/// Monotonic leveling curve: the experience needed to reach level n is
/// `floor(base * (n-1)^exponent)`, so level 1 starts at zero
#[derive(Debug, Clone, Copy)]
pub struct LevelCurve {
    base: f64,
    exponent: f64,
}

impl LevelCurve {
    pub fn new(settings: &LevelingSettings) -> Self {
        Self {
            base: settings.base,
            exponent: settings.exponent,
        }
    }

    /// Cumulative experience required to reach a level
    pub fn threshold(&self, level: i32) -> i64 {
        if level <= 1 {
            return 0;
        }
        (self.base * f64::from(level - 1).powf(self.exponent)).floor() as i64
    }

    /// Derive the level standing for a cumulative experience total.
    ///
    /// Negative totals (possible after corrective events) clamp to zero.
    pub fn derive(&self, cumulative_experience: i64) -> LevelInfo {
        let experience = cumulative_experience.max(0);

        let mut level = 1;
        while self.threshold(level + 1) <= experience {
            level += 1;
        }

        let floor = self.threshold(level);
        let ceiling = self.threshold(level + 1);

        LevelInfo {
            level,
            current_experience: experience - floor,
            experience_for_next_level: ceiling - floor,
        }
    }
}

impl Default for LevelCurve {
    fn default() -> Self {
        Self::new(&LevelingSettings::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_thresholds_monotonic() {
        let curve = LevelCurve::default();
        for level in 1..50 {
            assert!(curve.threshold(level) < curve.threshold(level + 1));
        }
    }

    #[test]
    fn test_level_one_starts_at_zero() {
        let curve = LevelCurve::default();
        let info = curve.derive(0);
        assert_eq!(info.level, 1);
        assert_eq!(info.current_experience, 0);
        assert_eq!(info.experience_for_next_level, 100);
    }

    #[test]
    fn test_boundary_values() {
        let curve = LevelCurve::default();

        // threshold(2) = 100: one point short stays level 1
        assert_eq!(curve.derive(99).level, 1);
        assert_eq!(curve.derive(100).level, 2);

        // threshold(3) = floor(100 * 2^1.5) = 282
        assert_eq!(curve.threshold(3), 282);
        assert_eq!(curve.derive(281).level, 2);
        assert_eq!(curve.derive(282).level, 3);
    }

    #[test]
    fn test_current_experience_within_level() {
        let curve = LevelCurve::default();
        let info = curve.derive(150);
        assert_eq!(info.level, 2);
        assert_eq!(info.current_experience, 50);
        assert_eq!(info.experience_for_next_level, 182);
    }

    #[test]
    fn test_derivation_is_deterministic() {
        let curve = LevelCurve::default();
        for xp in [0, 1, 99, 100, 5_000, 1_000_000] {
            assert_eq!(curve.derive(xp), curve.derive(xp));
        }
    }

    #[test]
    fn test_negative_experience_clamps() {
        let curve = LevelCurve::default();
        let info = curve.derive(-40);
        assert_eq!(info.level, 1);
        assert_eq!(info.current_experience, 0);
    }
}
