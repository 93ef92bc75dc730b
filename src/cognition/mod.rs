//! Cognitive Core
//!
//! Rolls the health model, the PID feedback controller, and the disconnect
//! belief estimator into one unit. The supervisor and dispatcher write raw
//! metrics; a fixed-interval tick derives the state vector and picks a
//! corrective action.

pub mod belief;
pub mod model;
pub mod pid;

pub use belief::{BeliefState, BeliefUpdater};
pub use model::{HealthModel, StateVector};
pub use pid::{CorrectiveAction, FeedbackController};

use crate::config::{HealthTuning, PidGains};

#[derive(Debug, Clone)]
pub struct CognitionSnapshot {
    pub vector: StateVector,
    pub beliefs: BeliefState,
    pub error_count: u64,
}

#[derive(Debug)]
pub struct CognitiveCore {
    model: HealthModel,
    controller: FeedbackController,
    beliefs: BeliefUpdater,
    last_vector: StateVector,
}

impl CognitiveCore {
    pub fn new(gains: PidGains, tuning: HealthTuning) -> Self {
        Self {
            model: HealthModel::new(tuning),
            controller: FeedbackController::new(gains),
            beliefs: BeliefUpdater::new(),
            last_vector: StateVector::IDEAL,
        }
    }

    pub fn record_disconnect(&mut self, reason: Option<u16>) {
        self.model.record_disconnect(reason);
        self.beliefs.update(reason);
    }

    pub fn record_latency(&mut self, ms: f64) {
        self.model.record_latency(ms);
    }

    pub fn record_error(&mut self) {
        self.model.record_error();
    }

    /// One health tick: derive the vector, run the controller, hand back the
    /// action for the supervisor to execute.
    pub fn tick(&mut self) -> CorrectiveAction {
        let vector = self.model.compute_vector();
        self.last_vector = vector;
        let action = self.controller.compute(vector);
        tracing::debug!(
            c = vector.c,
            p = vector.p,
            i = vector.i,
            ?action,
            "health tick"
        );
        action
    }

    pub fn snapshot(&self) -> CognitionSnapshot {
        CognitionSnapshot {
            vector: self.last_vector,
            beliefs: self.beliefs.state(),
            error_count: self.model.error_count(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn healthy_core_ticks_idle() {
        let mut core = CognitiveCore::new(PidGains::default(), HealthTuning::default());
        assert_eq!(core.tick(), CorrectiveAction::Idle);
    }

    #[test]
    fn disconnect_updates_both_model_and_beliefs() {
        let mut core = CognitiveCore::new(PidGains::default(), HealthTuning::default());
        core.record_disconnect(Some(408));
        core.tick();
        let snap = core.snapshot();
        assert!(snap.vector.c < 1.0);
        assert!(snap.beliefs.network_issue > 0.5);
    }

    #[test]
    fn errors_degrade_integrity_only() {
        let mut core = CognitiveCore::new(PidGains::default(), HealthTuning::default());
        for _ in 0..5 {
            core.record_error();
        }
        core.tick();
        let snap = core.snapshot();
        assert!(snap.vector.i < 1.0);
        assert_eq!(snap.vector.c, 1.0);
        assert_eq!(snap.error_count, 5);
    }
}
