//! Top-level run: dispatch, synthesis, and best-effort persistence.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::{info, instrument, warn};

use threatintel_collectors::CollectorRegistry;
use threatintel_shared::{
    CollectorOutcome, Report, Result, RunConfig, RunId, RunStatus, SessionId, SessionTurn,
    StorageError, ThreatIntelError,
};
use threatintel_storage::{AppendOutcome, SessionStore};

use crate::extract::Extractor;
use crate::orchestrator::{Orchestrator, Run};
use crate::progress::ProgressReporter;
use crate::synthesizer::Synthesizer;

/// Everything a caller learns from one run.
#[derive(Debug)]
pub struct RunReport {
    pub run_id: RunId,
    pub session_id: SessionId,
    pub report: Report,
    pub status: RunStatus,
    /// Per-collector outcomes, registration order.
    pub outcomes: Vec<CollectorOutcome>,
    /// What the store did with the turn; `None` when the write failed.
    pub appended: Option<AppendOutcome>,
    /// Non-fatal persistence failure.
    pub storage_error: Option<StorageError>,
    pub duration: Duration,
}

impl RunReport {
    pub fn into_parts(self) -> (Report, RunStatus) {
        (self.report, self.status)
    }

    /// `RunFailed` listing each collector's reason, when no collector succeeded.
    pub fn failure(&self) -> Option<ThreatIntelError> {
        if self.status == RunStatus::Completed {
            return None;
        }
        let failures = self
            .outcomes
            .iter()
            .map(|o| {
                format!(
                    "{}: {}",
                    o.collector,
                    o.outcome.reason().unwrap_or_else(|| "unknown".into())
                )
            })
            .collect();
        Some(ThreatIntelError::RunFailed { failures })
    }
}

/// Runs report synthesis for sessions against one registry and one store.
pub struct RunController {
    orchestrator: Orchestrator,
    synthesizer: Synthesizer,
    store: Arc<dyn SessionStore>,
    deadline: Duration,
}

impl RunController {
    pub fn new(registry: CollectorRegistry, store: Arc<dyn SessionStore>, config: &RunConfig) -> Self {
        Self {
            orchestrator: Orchestrator::new(registry),
            synthesizer: Synthesizer::new(config),
            store,
            deadline: config.deadline,
        }
    }

    /// Replace the synthesizer's extraction strategy.
    pub fn with_extractor(mut self, extractor: Arc<dyn Extractor>) -> Self {
        self.synthesizer = self.synthesizer.with_extractor(extractor);
        self
    }

    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    /// Produce one report for `session_id` and append it to the session history.
    ///
    /// Collector failures and storage failures never make this return `Err`;
    /// they show up in the report, `status`, and `storage_error`.
    #[instrument(skip_all, fields(session = %session_id))]
    pub async fn produce_report(
        &self,
        session_id: &SessionId,
        progress: &dyn ProgressReporter,
    ) -> Result<RunReport> {
        let start = Instant::now();

        progress.phase("Loading session history");
        let previous = self.previous_report(session_id).await;

        progress.phase("Collecting");
        let mut run = Run::new(session_id.clone(), self.deadline);
        info!(run = %run.id, deadline = %run.deadline.at(), "starting run");
        self.orchestrator.collect(&mut run, progress).await?;

        progress.phase("Merging findings");
        let report = self
            .synthesizer
            .synthesize(run.outcomes(), previous.as_ref(), Utc::now())?;
        let status = run.finish()?;

        progress.phase("Saving session turn");
        let turn = SessionTurn {
            session_id: session_id.clone(),
            run_id: run.id,
            timestamp: report.generated_at,
            report: report.clone(),
        };
        let (appended, storage_error) = match self.store.append(session_id, &turn).await {
            Ok(outcome) => (Some(outcome), None),
            Err(e) => {
                warn!(run = %run.id, error = %e, "failed to persist session turn");
                (None, Some(e))
            }
        };

        let run_id = run.id;
        let result = RunReport {
            run_id,
            session_id: session_id.clone(),
            report,
            status,
            outcomes: run.into_outcomes(),
            appended,
            storage_error,
            duration: start.elapsed(),
        };

        let succeeded = result
            .outcomes
            .iter()
            .filter(|o| o.outcome.is_success())
            .count();
        let summary = format!(
            "{succeeded}/{} collectors succeeded, {} degraded sections",
            result.outcomes.len(),
            result.report.degraded_sections().len()
        );
        info!(run = %run_id, status = ?status, elapsed_ms = result.duration.as_millis() as u64, "{summary}");
        progress.done(&summary);

        Ok(result)
    }

    /// The newest stored report that has any data, for new-entity marking.
    /// Read failures only cost the marking.
    async fn previous_report(&self, session_id: &SessionId) -> Option<Report> {
        match self.store.read_history(session_id).await {
            Ok(history) => history
                .into_iter()
                .rev()
                .map(|turn| turn.report)
                .find(|report| !report.is_empty()),
            Err(e) => {
                warn!(error = %e, "could not read session history");
                None
            }
        }
    }

    /// Stored turns of a session, oldest first.
    pub async fn history(&self, session_id: &SessionId) -> Result<Vec<SessionTurn>> {
        Ok(self.store.read_history(session_id).await?)
    }

    pub async fn sessions(&self) -> Result<Vec<SessionId>> {
        Ok(self.store.list_sessions().await?)
    }
}
