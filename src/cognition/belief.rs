//! Two-hypothesis disconnect diagnosis.
//!
//! A Bayesian estimator over "the network is flaky" vs "the platform ended
//! the session", updated once per disconnect from a static likelihood table.
//! Advisory telemetry only: nothing in the control path reads it.

use crate::transport::close_code;

/// Likelihood floor for close codes the table does not know, so no amount of
/// novel evidence can collapse a hypothesis to exactly zero.
const UNSEEN_LIKELIHOOD: f64 = 0.05;

fn likelihood_network(code: u16) -> f64 {
    match code {
        close_code::TIMED_OUT => 0.8,
        close_code::CONNECTION_REPLACED => 0.1,
        _ => UNSEEN_LIKELIHOOD,
    }
}

fn likelihood_platform(code: u16) -> f64 {
    match code {
        close_code::TIMED_OUT => 0.2,
        close_code::CONNECTION_REPLACED => 0.9,
        close_code::LOGGED_OUT => 1.0,
        _ => UNSEEN_LIKELIHOOD,
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BeliefState {
    pub network_issue: f64,
    pub platform_issue: f64,
}

#[derive(Debug)]
pub struct BeliefUpdater {
    state: BeliefState,
}

impl Default for BeliefUpdater {
    fn default() -> Self {
        Self::new()
    }
}

impl BeliefUpdater {
    pub fn new() -> Self {
        Self {
            state: BeliefState {
                network_issue: 0.5,
                platform_issue: 0.5,
            },
        }
    }

    pub fn state(&self) -> BeliefState {
        self.state
    }

    /// One Bayesian step against the disconnect evidence. No-op without a
    /// reason code.
    pub fn update(&mut self, reason: Option<u16>) {
        let Some(code) = reason else { return };

        let l_network = likelihood_network(code);
        let l_platform = likelihood_platform(code);
        let prior_network = self.state.network_issue;
        let prior_platform = self.state.platform_issue;

        let evidence = l_network * prior_network + l_platform * prior_platform;
        if evidence == 0.0 {
            return;
        }

        let posterior_network = l_network * prior_network / evidence;
        let posterior_platform = l_platform * prior_platform / evidence;
        let norm = posterior_network + posterior_platform;
        self.state.network_issue = posterior_network / norm;
        self.state.platform_issue = posterior_platform / norm;

        tracing::info!(
            network_issue = self.state.network_issue,
            platform_issue = self.state.platform_issue,
            code,
            "disconnect beliefs updated"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_without_reason_is_noop() {
        let mut b = BeliefUpdater::new();
        let before = b.state();
        b.update(None);
        assert_eq!(b.state(), before);
    }

    #[test]
    fn posterior_stays_normalized() {
        let mut b = BeliefUpdater::new();
        for code in [408, 440, 999, 401, 408] {
            b.update(Some(code));
            let s = b.state();
            assert!((s.network_issue + s.platform_issue - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn timeout_shifts_belief_toward_network() {
        let mut b = BeliefUpdater::new();
        b.update(Some(close_code::TIMED_OUT));
        assert!(b.state().network_issue > b.state().platform_issue);
    }

    #[test]
    fn logged_out_shifts_belief_toward_platform() {
        let mut b = BeliefUpdater::new();
        b.update(Some(close_code::LOGGED_OUT));
        assert!(b.state().platform_issue > b.state().network_issue);
    }

    #[test]
    fn unseen_code_never_collapses_a_hypothesis() {
        let mut b = BeliefUpdater::new();
        for _ in 0..100 {
            b.update(Some(999));
        }
        let s = b.state();
        assert!(s.network_issue > 0.0 && s.platform_issue > 0.0);
    }
}
