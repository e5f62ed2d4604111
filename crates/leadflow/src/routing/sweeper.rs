use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::Duration;
use serde::Serialize;
use tracing::{error, info, warn};

use super::coordinator::{ReassignDisposition, RoutingCoordinator};
use super::domain::RoutingError;
use super::repository::{AgentRepository, AssignmentRepository, AuditSink, LeadRepository};

/// Tally of one sweep pass over stale pending assignments.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepSummary {
    pub examined: usize,
    pub reassigned: usize,
    /// Leads that fell back to the qualified pool because nobody else was
    /// eligible.
    pub unrouted: usize,
    pub failures: usize,
}

/// Background task that expires assignments agents never answered and routes
/// the affected leads to somebody else.
pub struct ExpirySweeper<L, A, S, D> {
    coordinator: Arc<RoutingCoordinator<L, A, S, D>>,
    interval: StdDuration,
}

impl<L, A, S, D> Clone for ExpirySweeper<L, A, S, D> {
    fn clone(&self) -> Self {
        Self {
            coordinator: Arc::clone(&self.coordinator),
            interval: self.interval,
        }
    }
}

impl<L, A, S, D> ExpirySweeper<L, A, S, D>
where
    L: LeadRepository + 'static,
    A: AgentRepository + 'static,
    S: AssignmentRepository + 'static,
    D: AuditSink + 'static,
{
    pub fn new(coordinator: Arc<RoutingCoordinator<L, A, S, D>>, interval: StdDuration) -> Self {
        Self {
            coordinator,
            interval,
        }
    }

    /// One pass: expire and re-route everything stale. A failure on one
    /// assignment is counted and the pass moves on to the next.
    pub fn sweep_once(&self, max_age: Option<Duration>) -> Result<SweepSummary, RoutingError> {
        let stale = self.coordinator.stale_assignments(max_age)?;
        let mut summary = SweepSummary {
            examined: stale.len(),
            ..SweepSummary::default()
        };
        for assignment in stale {
            match self
                .coordinator
                .reassign(&assignment.id, ReassignDisposition::Expired, &[])
            {
                Ok(outcome) if outcome.replacement.is_some() => summary.reassigned += 1,
                Ok(_) => summary.unrouted += 1,
                Err(err) => {
                    warn!(
                        assignment_id = %assignment.id,
                        error = %err,
                        "sweep could not reassign stale assignment"
                    );
                    summary.failures += 1;
                }
            }
        }
        Ok(summary)
    }

    /// Runs sweep passes forever at the configured interval.
    pub async fn run(self) {
        let mut interval = tokio::time::interval(self.interval);
        // First tick completes immediately, skip it
        interval.tick().await;
        loop {
            interval.tick().await;
            match self.sweep_once(None) {
                Ok(summary) => info!(
                    examined = summary.examined,
                    reassigned = summary.reassigned,
                    unrouted = summary.unrouted,
                    failures = summary.failures,
                    "expiry sweep finished"
                ),
                Err(err) => error!(error = %err, "expiry sweep aborted"),
            }
        }
    }
}
