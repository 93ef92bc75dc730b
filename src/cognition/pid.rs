//! Feedback controller.
//!
//! A PID loop over the scalar distance between the current state vector and
//! the ideal vector, mapped to a discrete corrective action by fixed
//! thresholds checked highest-first.

use crate::config::PidGains;

use super::model::StateVector;

const MAX_INTEGRAL: f64 = 50.0;
/// Below this error, an IDLE decision also flushes the integral so long
/// healthy stretches cannot accumulate residual correction.
const LOW_ERROR_RESET: f64 = 0.1;

const RESTART_THRESHOLD: f64 = 1.5;
const RECOVER_THRESHOLD: f64 = 0.8;
const ADAPT_THRESHOLD: f64 = 0.3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CorrectiveAction {
    Restart,
    Recover,
    Adapt,
    Idle,
}

#[derive(Debug)]
pub struct FeedbackController {
    gains: PidGains,
    last_error: f64,
    integral: f64,
}

impl FeedbackController {
    pub fn new(gains: PidGains) -> Self {
        Self {
            gains,
            last_error: 0.0,
            integral: 0.0,
        }
    }

    pub fn integral(&self) -> f64 {
        self.integral
    }

    pub fn last_error(&self) -> f64 {
        self.last_error
    }

    /// One PID step. Called once per health tick, never on demand.
    pub fn compute(&mut self, vector: StateVector) -> CorrectiveAction {
        let error = vector.distance(&StateVector::IDEAL);

        let p_term = self.gains.kp * error;
        self.integral = (self.integral + error).clamp(-MAX_INTEGRAL, MAX_INTEGRAL);
        let i_term = self.gains.ki * self.integral;
        let d_term = self.gains.kd * (error - self.last_error);
        self.last_error = error;

        let output = p_term + i_term + d_term;
        let action = if output > RESTART_THRESHOLD {
            CorrectiveAction::Restart
        } else if output > RECOVER_THRESHOLD {
            CorrectiveAction::Recover
        } else if output > ADAPT_THRESHOLD {
            CorrectiveAction::Adapt
        } else {
            CorrectiveAction::Idle
        };

        if action == CorrectiveAction::Idle && self.last_error < LOW_ERROR_RESET {
            self.integral = 0.0;
        }

        action
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn vector(c: f64, p: f64, i: f64) -> StateVector {
        StateVector { c, p, i }
    }

    #[test]
    fn degraded_connectivity_maps_to_adapt() {
        let mut pid = FeedbackController::new(PidGains::default());
        let action = pid.compute(vector(0.2, 0.9, 0.95));
        // error ~= 0.808; with default gains the first step lands between the
        // adapt and recover thresholds.
        assert!((pid.last_error() - 0.8078).abs() < 1e-3);
        assert_eq!(action, CorrectiveAction::Adapt);
    }

    #[test]
    fn healthy_vector_is_idle() {
        let mut pid = FeedbackController::new(PidGains::default());
        assert_eq!(pid.compute(StateVector::IDEAL), CorrectiveAction::Idle);
    }

    #[test]
    fn sustained_degradation_escalates_through_priority_order() {
        // With the integral accumulating, a stuck-bad vector must escalate
        // monotonically and eventually reach Restart.
        let mut pid = FeedbackController::new(PidGains::default());
        let bad = vector(0.0, 0.0, 0.0);
        let mut seen_restart = false;
        let mut rank_prev = 0u8;
        for _ in 0..100 {
            let action = pid.compute(bad);
            let rank = match action {
                CorrectiveAction::Idle => 0,
                CorrectiveAction::Adapt => 1,
                CorrectiveAction::Recover => 2,
                CorrectiveAction::Restart => 3,
            };
            assert!(rank >= rank_prev, "action regressed while error persisted");
            rank_prev = rank;
            seen_restart |= action == CorrectiveAction::Restart;
        }
        assert!(seen_restart);
    }

    #[rstest]
    #[case(1000)]
    #[case(10_000)]
    fn integral_never_leaves_clamp(#[case] steps: usize) {
        let mut pid = FeedbackController::new(PidGains::default());
        for _ in 0..steps {
            pid.compute(vector(0.0, 0.0, 0.0));
            assert!(pid.integral().abs() <= MAX_INTEGRAL);
        }
    }

    #[test]
    fn idle_with_low_error_flushes_integral() {
        let mut pid = FeedbackController::new(PidGains::default());
        // Build up some integral, then go healthy.
        for _ in 0..3 {
            pid.compute(vector(0.5, 0.5, 0.5));
        }
        assert!(pid.integral() > 0.0);
        // Healthy ticks: integral keeps the output above Idle briefly, but
        // once the decision is Idle with near-zero error it must reset.
        for _ in 0..50 {
            pid.compute(StateVector::IDEAL);
        }
        assert_eq!(pid.integral(), 0.0);
    }
}
