//! Combines build/test/lint/perf signals into one bounded score, smooths it
//! with an EMA, and tracks strict improvement. All pure; the session owns
//! the best-perf baseline and streak counters.

use serde::Deserialize;
use serde::Serialize;

use crate::error::EngineError;
use crate::error::Result;
use crate::limits::SCORE_EPSILON;
use crate::outputs::TestCounts;

/// Per-signal weights. Normalization divides by `max(sum, 1)` so an
/// all-zero configuration cannot divide by zero.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Weights {
    #[serde(default = "Weights::default_build")]
    pub build: f64,
    #[serde(default = "Weights::default_test")]
    pub test: f64,
    #[serde(default = "Weights::default_lint")]
    pub lint: f64,
    #[serde(default = "Weights::default_perf")]
    pub perf: f64,
}

impl Default for Weights {
    fn default() -> Self {
        Self {
            build: Self::default_build(),
            test: Self::default_test(),
            lint: Self::default_lint(),
            perf: Self::default_perf(),
        }
    }
}

impl Weights {
    fn default_build() -> f64 {
        0.3
    }
    fn default_test() -> f64 {
        0.5
    }
    fn default_lint() -> f64 {
        0.1
    }
    fn default_perf() -> f64 {
        0.1
    }

    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("build", self.build),
            ("test", self.test),
            ("lint", self.lint),
            ("perf", self.perf),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(EngineError::InvalidParameter {
                    name: format!("weights.{name}"),
                    reason: "must be a non-negative finite number".to_string(),
                });
            }
        }
        Ok(())
    }

    fn normalizer(&self) -> f64 {
        (self.build + self.test + self.lint + self.perf).max(1.0)
    }
}

/// Raw signals for one evaluation.
#[derive(Debug, Clone, Copy)]
pub struct Signals {
    pub build_ok: bool,
    pub lint_ok: bool,
    pub tests: Option<TestCounts>,
    pub tests_configured: bool,
    pub perf: Option<f64>,
    pub bench_configured: bool,
}

/// Compute the aggregate score in [0, 1]. `best_perf` is the session's
/// lower-is-better baseline; the first valid reading seeds it and scores
/// 1.0, later readings score `best / value` and may lower the baseline.
pub fn score(weights: &Weights, signals: &Signals, best_perf: &mut Option<f64>) -> f64 {
    let s_build = if signals.build_ok { 1.0 } else { 0.0 };
    let s_lint = if signals.lint_ok { 1.0 } else { 0.0 };

    let s_tests = match signals.tests {
        Some(counts) if counts.total > 0 => {
            (f64::from(counts.passed) / f64::from(counts.total)).clamp(0.0, 1.0)
        }
        // A configured test command that produced nothing parseable counts
        // as a full failure; an unconfigured one contributes nothing and
        // its weight washes out via the fixed normalizer.
        _ => 0.0,
    };

    let s_perf = match signals.perf {
        Some(value) if value.is_finite() && value > 0.0 => match *best_perf {
            None => {
                *best_perf = Some(value);
                1.0
            }
            Some(best) => {
                let component = (best / value).clamp(0.0, 1.0);
                if value < best {
                    *best_perf = Some(value);
                }
                component
            }
        },
        _ => 0.0,
    };

    // Unconfigured signals score as satisfied so they do not drag a
    // weighted sum that still divides by their weight.
    let s_tests = if signals.tests_configured { s_tests } else { 1.0 };
    let s_perf = if signals.bench_configured { s_perf } else { 1.0 };

    let weighted = weights.build * s_build
        + weights.test * s_tests
        + weights.lint * s_lint
        + weights.perf * s_perf;
    (weighted / weights.normalizer()).clamp(0.0, 1.0)
}

/// EMA update: the first observation seeds the average, later ones fold in
/// as `alpha * prev + (1 - alpha) * score`.
pub fn ema_update(previous: Option<f64>, score: f64, alpha: f64) -> f64 {
    match previous {
        None => score,
        Some(prev) => alpha * prev + (1.0 - alpha) * score,
    }
}

/// Strict-improvement bookkeeping. Returns the new `(best, streak)` pair.
pub fn track_improvement(best_score: f64, streak: u32, score: f64) -> (f64, u32) {
    if score > best_score + SCORE_EPSILON {
        (score, 0)
    } else {
        (best_score, streak + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn signals() -> Signals {
        Signals {
            build_ok: true,
            lint_ok: true,
            tests: Some(TestCounts {
                passed: 8,
                failed: 2,
                total: 10,
            }),
            tests_configured: true,
            perf: None,
            bench_configured: false,
        }
    }

    #[test]
    fn weighted_aggregate_is_bounded() {
        let weights = Weights::default();
        let mut best_perf = None;
        let score = score(&weights, &signals(), &mut best_perf);
        // 0.3*1 + 0.5*0.8 + 0.1*1 + 0.1*1 over a sum of 1.0
        assert!((score - 0.9).abs() < 1e-9);
        assert!((0.0..=1.0).contains(&score));
    }

    #[test]
    fn zero_weights_do_not_divide_by_zero() {
        let weights = Weights {
            build: 0.0,
            test: 0.0,
            lint: 0.0,
            perf: 0.0,
        };
        let mut best_perf = None;
        assert_eq!(score(&weights, &signals(), &mut best_perf), 0.0);
    }

    #[test]
    fn configured_but_unparseable_tests_score_zero() {
        let weights = Weights {
            build: 0.0,
            test: 1.0,
            lint: 0.0,
            perf: 0.0,
        };
        let mut best_perf = None;
        let s = Signals {
            tests: None,
            tests_configured: true,
            ..signals()
        };
        assert_eq!(score(&weights, &s, &mut best_perf), 0.0);
    }

    #[test]
    fn first_perf_reading_seeds_baseline_and_scores_one() {
        let weights = Weights {
            build: 0.0,
            test: 0.0,
            lint: 0.0,
            perf: 1.0,
        };
        let mut best_perf = None;
        let s = Signals {
            tests: None,
            tests_configured: false,
            perf: Some(120.0),
            bench_configured: true,
            ..signals()
        };
        assert_eq!(score(&weights, &s, &mut best_perf), 1.0);
        assert_eq!(best_perf, Some(120.0));
    }

    #[test]
    fn slower_perf_scores_proportionally_and_faster_updates_baseline() {
        let weights = Weights {
            build: 0.0,
            test: 0.0,
            lint: 0.0,
            perf: 1.0,
        };
        let mut best_perf = Some(100.0);
        let mut s = Signals {
            tests: None,
            tests_configured: false,
            perf: Some(200.0),
            bench_configured: true,
            ..signals()
        };
        assert_eq!(score(&weights, &s, &mut best_perf), 0.5);
        assert_eq!(best_perf, Some(100.0));

        s.perf = Some(80.0);
        assert_eq!(score(&weights, &s, &mut best_perf), 1.0);
        assert_eq!(best_perf, Some(80.0));
    }

    #[test]
    fn non_positive_or_missing_perf_scores_zero_when_configured() {
        let weights = Weights {
            build: 0.0,
            test: 0.0,
            lint: 0.0,
            perf: 1.0,
        };
        let mut best_perf = Some(100.0);
        let s = Signals {
            tests: None,
            tests_configured: false,
            perf: Some(-1.0),
            bench_configured: true,
            ..signals()
        };
        assert_eq!(score(&weights, &s, &mut best_perf), 0.0);

        let s = Signals { perf: None, ..s };
        assert_eq!(score(&weights, &s, &mut best_perf), 0.0);
        // Baseline is untouched by invalid readings.
        assert_eq!(best_perf, Some(100.0));
    }

    #[test]
    fn ema_seeds_then_folds() {
        let first = ema_update(None, 0.5, 0.9);
        assert_eq!(first, 0.5);
        let second = ema_update(Some(first), 1.0, 0.9);
        assert!((second - 0.55).abs() < 1e-9);
    }

    #[test]
    fn improvement_requires_strict_epsilon_gain() {
        let (best, streak) = track_improvement(0.5, 0, 0.5);
        assert_eq!((best, streak), (0.5, 1));

        let (best, streak) = track_improvement(0.5, 1, 0.5 + 1e-9);
        assert_eq!((best, streak), (0.5, 2));

        let (best, streak) = track_improvement(0.5, 2, 0.6);
        assert_eq!((best, streak), (0.6, 0));
    }

    #[test]
    fn weights_validation_rejects_negatives() {
        let weights = Weights {
            build: -0.1,
            ..Weights::default()
        };
        assert!(weights.validate().is_err());
    }
}
