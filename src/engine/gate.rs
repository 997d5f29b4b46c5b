use serde::{Deserialize, Serialize};

use crate::engine::types::GateVerdict;

/// Pass thresholds for one profile.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    pub min_score: f64,
    pub max_violations: usize,
}

/// A profile as written in configuration; missing fields keep the profile default.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct PartialThresholds {
    min_score: Option<f64>,
    max_violations: Option<usize>,
}

impl PartialThresholds {
    fn over(self, base: Thresholds) -> Thresholds {
        Thresholds {
            min_score: self.min_score.unwrap_or(base.min_score),
            max_violations: self.max_violations.unwrap_or(base.max_violations),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct PartialGate {
    enforced: PartialThresholds,
    relaxed: PartialThresholds,
}

impl From<PartialGate> for QualityGate {
    fn from(partial: PartialGate) -> Self {
        let defaults = QualityGate::default();
        Self {
            enforced: partial.enforced.over(defaults.enforced),
            relaxed: partial.relaxed.over(defaults.relaxed),
        }
    }
}

/// Two-profile quality gate over a validation result.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "PartialGate")]
pub struct QualityGate {
    pub enforced: Thresholds,
    pub relaxed: Thresholds,
}

impl Default for QualityGate {
    fn default() -> Self {
        Self {
            enforced: Thresholds {
                min_score: 70.0,
                max_violations: 3,
            },
            relaxed: Thresholds {
                min_score: 40.0,
                max_violations: 8,
            },
        }
    }
}

impl QualityGate {
    /// `passed = score >= min_score && violations <= max_violations` under
    /// the profile selected by `enforce`.
    pub fn evaluate(&self, score: f64, violations: usize, enforce: bool) -> GateVerdict {
        let profile = if enforce { self.enforced } else { self.relaxed };
        GateVerdict {
            passed: score >= profile.min_score && violations <= profile.max_violations,
            enforced: enforce,
            min_score: profile.min_score,
            max_violations: profile.max_violations,
            score,
            violations,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enforced_profile_matches_reference_scenario() {
        let gate = QualityGate::default();
        assert!(gate.evaluate(72.0, 3, true).passed);
        assert!(!gate.evaluate(65.0, 3, true).passed);
        assert!(!gate.evaluate(72.0, 4, true).passed);
    }

    #[test]
    fn relaxed_profile_is_looser() {
        let gate = QualityGate::default();
        let verdict = gate.evaluate(65.0, 3, false);
        assert!(verdict.passed);
        assert!(!verdict.enforced);
        assert_eq!(verdict.min_score, 40.0);
        assert!(!gate.evaluate(39.9, 0, false).passed);
    }

    #[test]
    fn raising_score_never_flips_pass_to_fail() {
        let gate = QualityGate::default();
        for enforce in [true, false] {
            for violations in 0..12 {
                let mut seen_pass = false;
                for tenth in 0..=1000 {
                    let score = tenth as f64 / 10.0;
                    let passed = gate.evaluate(score, violations, enforce).passed;
                    assert!(
                        !(seen_pass && !passed),
                        "flip at score {} violations {} enforce {}",
                        score,
                        violations,
                        enforce
                    );
                    seen_pass |= passed;
                }
            }
        }
    }

    #[test]
    fn partial_profile_keeps_its_own_defaults() {
        let gate: QualityGate =
            serde_json::from_value(serde_json::json!({ "enforced": { "min_score": 85.0 } }))
                .unwrap();
        assert_eq!(gate.enforced.min_score, 85.0);
        assert_eq!(gate.enforced.max_violations, 3);
        assert_eq!(gate.relaxed, QualityGate::default().relaxed);
    }
}
