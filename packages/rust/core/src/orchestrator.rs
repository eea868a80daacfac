//! Concurrent fan-out of one run across all registered collectors.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

use threatintel_collectors::{CollectorRegistry, Deadline};

use crate::progress::ProgressReporter;
use threatintel_shared::{
    CollectorOutcome, Outcome, Result, RunId, RunStatus, SessionId, ThreatIntelError,
};

/// Reason recorded when a collector task ends without reporting.
const TASK_LOST: &str = "collector task ended without reporting";

// ---------------------------------------------------------------------------
// Run
// ---------------------------------------------------------------------------

/// Lifecycle of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Pending,
    Dispatched,
    Collecting,
    Merging,
    Completed,
    Failed,
}

impl RunState {
    /// Whether `next` directly follows `self`.
    pub fn can_advance_to(self, next: RunState) -> bool {
        use RunState::*;
        matches!(
            (self, next),
            (Pending, Dispatched)
                | (Dispatched, Collecting)
                | (Collecting, Merging)
                | (Merging, Completed)
                | (Merging, Failed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// One execution of report synthesis.
#[derive(Debug)]
pub struct Run {
    pub id: RunId,
    pub session_id: SessionId,
    pub started_at: DateTime<Utc>,
    pub deadline: Deadline,
    outcomes: Vec<CollectorOutcome>,
    state: RunState,
}

impl Run {
    /// A pending run whose deadline is `budget` from now.
    pub fn new(session_id: SessionId, budget: Duration) -> Self {
        Self {
            id: RunId::new(),
            session_id,
            started_at: Utc::now(),
            deadline: Deadline::after(budget),
            outcomes: Vec::new(),
            state: RunState::Pending,
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    /// Outcomes in collector registration order (empty until collection ends).
    pub fn outcomes(&self) -> &[CollectorOutcome] {
        &self.outcomes
    }

    pub fn into_outcomes(self) -> Vec<CollectorOutcome> {
        self.outcomes
    }

    /// Move to `next`, rejecting out-of-order transitions.
    pub fn advance(&mut self, next: RunState) -> Result<()> {
        if !self.state.can_advance_to(next) {
            return Err(ThreatIntelError::validation(format!(
                "invalid run transition {:?} -> {next:?}",
                self.state
            )));
        }
        debug!(run = %self.id, from = ?self.state, to = ?next, "run transition");
        self.state = next;
        Ok(())
    }

    /// Close the run from `Merging`: `Completed` iff any collector succeeded.
    pub fn finish(&mut self) -> Result<RunStatus> {
        let status = RunStatus::from_outcomes(&self.outcomes);
        self.advance(match status {
            RunStatus::Completed => RunState::Completed,
            RunStatus::Failed => RunState::Failed,
        })?;
        Ok(status)
    }
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

/// Dispatches every registered collector for a run and gathers exactly one
/// outcome per collector by the run deadline.
#[derive(Clone)]
pub struct Orchestrator {
    registry: CollectorRegistry,
}

impl Orchestrator {
    pub fn new(registry: CollectorRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &CollectorRegistry {
        &self.registry
    }

    /// Fan out, collect, and leave the run in `Merging` with its outcomes set.
    ///
    /// Never waits past the run deadline: collectors still running then are
    /// cancelled and recorded as timed out.
    #[instrument(skip_all, fields(run = %run.id, session = %run.session_id))]
    pub async fn collect(&self, run: &mut Run, progress: &dyn ProgressReporter) -> Result<()> {
        if self.registry.is_empty() {
            return Err(ThreatIntelError::validation("no collectors registered"));
        }
        let total = self.registry.len();

        run.advance(RunState::Dispatched)?;
        let (tx, mut rx) = mpsc::channel::<(usize, Outcome)>(total);
        let mut handles = Vec::with_capacity(total);

        for (index, collector) in self.registry.iter().enumerate() {
            let collector = collector.clone();
            let tx = tx.clone();
            let spec = collector.spec();
            let deadline = run
                .deadline
                .capped(spec.timeout_secs.map(Duration::from_secs));
            let query = spec.render_query(run.started_at);

            handles.push(tokio::spawn(async move {
                let name = collector.name().to_string();
                let outcome = match tokio::time::timeout_at(
                    deadline.instant(),
                    collector.invoke(&query, deadline),
                )
                .await
                {
                    Ok(Ok(finding)) if finding.success => Outcome::Success(finding),
                    Ok(Ok(_)) => Outcome::Failure {
                        reason: "collector reported an unsuccessful finding".into(),
                        transient: false,
                    },
                    Ok(Err(e)) => Outcome::from(e),
                    Err(_) => Outcome::TimedOut,
                };
                debug!(collector = %name, success = outcome.is_success(), "collector finished");
                // Receiver gone means the run already gave up on us.
                let _ = tx.send((index, outcome)).await;
            }));
        }
        drop(tx);
        info!(collectors = total, "dispatched collectors");

        run.advance(RunState::Collecting)?;
        let mut slots: Vec<Option<Outcome>> = vec![None; total];
        let mut reported = 0;
        let mut deadline_hit = false;

        let mut record = |index: usize, outcome: Outcome| {
            let (Some(slot), Some(collector)) = (slots.get_mut(index), self.registry.get(index))
            else {
                return;
            };
            if slot.is_some() {
                return;
            }
            reported += 1;
            let tagged = CollectorOutcome {
                collector: collector.name().to_string(),
                capability: collector.spec().capability(),
                outcome,
            };
            progress.collector_reported(&tagged, reported, total);
            *slot = Some(tagged.outcome);
        };

        loop {
            match tokio::time::timeout_at(run.deadline.instant(), rx.recv()).await {
                Ok(Some((index, outcome))) => record(index, outcome),
                // Every task has reported or gone away.
                Ok(None) => break,
                Err(_) => {
                    deadline_hit = true;
                    // Outcomes that landed at the deadline still count.
                    while let Ok((index, outcome)) = rx.try_recv() {
                        record(index, outcome);
                    }
                    break;
                }
            }
        }

        for (handle, slot) in handles.iter().zip(&slots) {
            if slot.is_none() {
                handle.abort();
            }
        }

        let outcomes: Vec<CollectorOutcome> = self
            .registry
            .iter()
            .zip(slots)
            .map(|(collector, slot)| CollectorOutcome {
                collector: collector.name().to_string(),
                capability: collector.spec().capability(),
                outcome: slot.unwrap_or_else(|| {
                    if deadline_hit {
                        Outcome::TimedOut
                    } else {
                        Outcome::Failure {
                            reason: TASK_LOST.into(),
                            transient: false,
                        }
                    }
                }),
            })
            .collect();

        let succeeded = outcomes.iter().filter(|o| o.outcome.is_success()).count();
        if deadline_hit {
            warn!(succeeded, total, "run deadline reached before all collectors reported");
        } else {
            info!(succeeded, total, "all collectors reported");
        }

        run.outcomes = outcomes;
        run.advance(RunState::Merging)?;
        Ok(())
    }
}
