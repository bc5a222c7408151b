//! Adaptive stopping. Criteria are evaluated in a fixed order and the
//! first match wins, so repeated queries on unchanged state report the
//! same reason class.

use serde::Deserialize;
use serde::Serialize;

use crate::error::EngineError;
use crate::error::Result;
use crate::outputs::TestCounts;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct HaltConfig {
    #[serde(default = "HaltConfig::default_max_steps")]
    pub max_steps: u32,
    #[serde(default = "HaltConfig::default_pass_threshold")]
    pub pass_threshold: f64,
    #[serde(default = "HaltConfig::default_patience")]
    pub patience_no_improve: u32,
    #[serde(default = "HaltConfig::default_min_steps")]
    pub min_steps: u32,
}

impl Default for HaltConfig {
    fn default() -> Self {
        Self {
            max_steps: Self::default_max_steps(),
            pass_threshold: Self::default_pass_threshold(),
            patience_no_improve: Self::default_patience(),
            min_steps: Self::default_min_steps(),
        }
    }
}

impl HaltConfig {
    fn default_max_steps() -> u32 {
        12
    }
    fn default_pass_threshold() -> f64 {
        0.95
    }
    fn default_patience() -> u32 {
        3
    }
    fn default_min_steps() -> u32 {
        1
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_steps < 1 {
            return Err(invalid("halt.maxSteps", "must be at least 1"));
        }
        if !(0.0..=1.0).contains(&self.pass_threshold) || !self.pass_threshold.is_finite() {
            return Err(invalid("halt.passThreshold", "must be within [0, 1]"));
        }
        if self.patience_no_improve < 1 {
            return Err(invalid("halt.patienceNoImprove", "must be at least 1"));
        }
        if self.min_steps < 1 {
            return Err(invalid("halt.minSteps", "must be at least 1"));
        }
        Ok(())
    }
}

fn invalid(name: &str, reason: &str) -> EngineError {
    EngineError::InvalidParameter {
        name: name.to_string(),
        reason: reason.to_string(),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HaltDecision {
    pub should_halt: bool,
    pub reasons: Vec<String>,
}

impl HaltDecision {
    fn stop(reason: String) -> Self {
        Self {
            should_halt: true,
            reasons: vec![reason],
        }
    }

    fn run_on() -> Self {
        Self {
            should_halt: false,
            reasons: Vec::new(),
        }
    }
}

/// Latest-state inputs to the halting decision.
#[derive(Debug, Clone, Copy)]
pub struct HaltInputs<'a> {
    pub step: u32,
    pub score: f64,
    pub tests: Option<&'a TestCounts>,
    pub tests_configured: bool,
    pub no_improve_streak: u32,
}

/// Decide whether to stop. Unconfigured tests count as passing for the
/// first criterion, so a session evaluated only on its build can halt on a
/// perfect step.
pub fn evaluate(config: &HaltConfig, inputs: &HaltInputs<'_>) -> HaltDecision {
    let tests_pass = match inputs.tests {
        Some(counts) => counts.all_passed(),
        None => !inputs.tests_configured,
    };
    if inputs.step >= config.min_steps && tests_pass && inputs.score >= config.pass_threshold {
        return HaltDecision::stop(format!(
            "tests pass and score {:.3} ≥ threshold {:.3}",
            inputs.score, config.pass_threshold
        ));
    }

    if inputs.no_improve_streak >= config.patience_no_improve {
        return HaltDecision::stop(format!(
            "no improvement for {} steps (patience={})",
            inputs.no_improve_streak, config.patience_no_improve
        ));
    }

    if inputs.step >= config.max_steps {
        return HaltDecision::stop(format!("reached max steps {}", config.max_steps));
    }

    HaltDecision::run_on()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn inputs() -> HaltInputs<'static> {
        HaltInputs {
            step: 1,
            score: 0.5,
            tests: None,
            tests_configured: true,
            no_improve_streak: 0,
        }
    }

    #[test]
    fn passing_tests_with_high_score_halts() {
        let counts = TestCounts {
            passed: 4,
            failed: 0,
            total: 4,
        };
        let decision = evaluate(
            &HaltConfig::default(),
            &HaltInputs {
                score: 0.97,
                tests: Some(&counts),
                ..inputs()
            },
        );
        assert!(decision.should_halt);
        assert!(decision.reasons[0].contains("tests pass and score"));
    }

    #[test]
    fn unconfigured_tests_count_as_passing() {
        let decision = evaluate(
            &HaltConfig::default(),
            &HaltInputs {
                score: 1.0,
                tests: None,
                tests_configured: false,
                ..inputs()
            },
        );
        assert!(decision.should_halt);
        assert!(decision.reasons[0].contains("tests pass"));
    }

    #[test]
    fn min_steps_gates_the_pass_criterion() {
        let config = HaltConfig {
            min_steps: 3,
            ..HaltConfig::default()
        };
        let decision = evaluate(
            &config,
            &HaltInputs {
                step: 2,
                score: 1.0,
                tests: None,
                tests_configured: false,
                no_improve_streak: 0,
            },
        );
        assert!(!decision.should_halt);
    }

    #[test]
    fn patience_exhaustion_halts() {
        let decision = evaluate(
            &HaltConfig::default(),
            &HaltInputs {
                no_improve_streak: 3,
                ..inputs()
            },
        );
        assert!(decision.should_halt);
        assert_eq!(
            decision.reasons,
            vec!["no improvement for 3 steps (patience=3)".to_string()]
        );
    }

    #[test]
    fn max_steps_halts_last() {
        let decision = evaluate(
            &HaltConfig::default(),
            &HaltInputs {
                step: 12,
                ..inputs()
            },
        );
        assert!(decision.should_halt);
        assert!(decision.reasons[0].contains("reached max steps 12"));
    }

    #[test]
    fn first_matching_criterion_wins() {
        // Both patience and max-steps hold; patience is reported.
        let decision = evaluate(
            &HaltConfig::default(),
            &HaltInputs {
                step: 12,
                no_improve_streak: 5,
                ..inputs()
            },
        );
        assert!(decision.reasons[0].contains("no improvement"));
    }

    #[test]
    fn otherwise_continues_with_no_reasons() {
        let decision = evaluate(&HaltConfig::default(), &inputs());
        assert_eq!(decision, HaltDecision::run_on());
    }

    #[test]
    fn config_bounds_are_validated() {
        assert!(HaltConfig { max_steps: 0, ..HaltConfig::default() }.validate().is_err());
        assert!(
            HaltConfig { pass_threshold: 1.5, ..HaltConfig::default() }
                .validate()
                .is_err()
        );
        assert!(
            HaltConfig { patience_no_improve: 0, ..HaltConfig::default() }
                .validate()
                .is_err()
        );
        assert!(HaltConfig { min_steps: 0, ..HaltConfig::default() }.validate().is_err());
    }
}
