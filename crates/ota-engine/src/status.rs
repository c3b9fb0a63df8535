use std::collections::HashSet;

use ota_domain::DeploymentId;

/// Tracks which `(deployment, status)` pairs have already been reported to
/// the server. A status is reported at most once per (deployment, status)
/// tuple; the engine never reports failure twice. Scoped to one deployment's
/// lifetime — the engine resets it when a new deployment starts.
#[derive(Debug, Default)]
pub struct StatusTracker {
    reported: HashSet<(DeploymentId, &'static str)>,
}

impl StatusTracker {
    pub fn new() -> Self {
        StatusTracker::default()
    }

    /// Returns `true` if this is the first time `status` is being reported
    /// for `deployment_id`, and records it as reported.
    pub fn should_report(&mut self, deployment_id: &DeploymentId, status: &'static str) -> bool {
        self.reported.insert((deployment_id.clone(), status))
    }

    pub fn reset_for(&mut self, deployment_id: &DeploymentId) {
        self.reported.retain(|(id, _)| id != deployment_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_report_succeeds_second_is_suppressed() {
        let mut tracker = StatusTracker::new();
        let id = DeploymentId::new("dep-1");
        assert!(tracker.should_report(&id, "failure"));
        assert!(!tracker.should_report(&id, "failure"));
    }

    #[test]
    fn different_statuses_are_independent() {
        let mut tracker = StatusTracker::new();
        let id = DeploymentId::new("dep-1");
        assert!(tracker.should_report(&id, "downloading"));
        assert!(tracker.should_report(&id, "installing"));
    }
}
