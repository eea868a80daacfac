//! Intelligence collectors and the registry that holds them.
//!
//! This crate provides:
//! - [`Collector`]: the capability interface the orchestrator calls
//! - [`Deadline`]: the absolute time bound passed to every call
//! - [`CollectorRegistry`]: collectors in registration order, unique by name
//! - Variants: [`WebSearchCollector`], [`SocialPostCollector`], [`FeedCollector`]

mod feed;
mod http;
mod social;
mod web;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::time::Instant;

use threatintel_shared::{
    CollectorError, CollectorKind, CollectorSpec, Finding, Result, ThreatIntelError,
};

pub use feed::{FeedCollector, FeedItem, parse_feed};
pub use social::SocialPostCollector;
pub use web::WebSearchCollector;

// ---------------------------------------------------------------------------
// Deadline
// ---------------------------------------------------------------------------

/// Fallback horizon when a budget overflows the monotonic clock (~30 years).
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// An absolute deadline, expressed both as wall-clock time (for collectors and
/// provenance) and as a monotonic instant (for timers).
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    at: DateTime<Utc>,
    instant: Instant,
}

impl Deadline {
    /// A deadline `budget` from now. Budgets past the representable range
    /// saturate to a far-future deadline.
    pub fn after(budget: Duration) -> Self {
        let at = chrono::Duration::from_std(budget)
            .ok()
            .and_then(|d| Utc::now().checked_add_signed(d))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        let now = Instant::now();
        let instant = now
            .checked_add(budget)
            .or_else(|| now.checked_add(FAR_FUTURE))
            .unwrap_or(now);
        Self { at, instant }
    }

    /// Wall-clock time of the deadline.
    pub fn at(&self) -> DateTime<Utc> {
        self.at
    }

    /// Monotonic instant of the deadline, for `tokio::time` timers.
    pub fn instant(&self) -> Instant {
        self.instant
    }

    /// Time left before the deadline (zero once passed).
    pub fn remaining(&self) -> Duration {
        self.instant.saturating_duration_since(Instant::now())
    }

    pub fn is_expired(&self) -> bool {
        self.remaining().is_zero()
    }

    /// The earlier of this deadline and `budget` from now.
    pub fn capped(self, budget: Option<Duration>) -> Self {
        match budget {
            Some(budget) if budget < self.remaining() => Self::after(budget),
            _ => self,
        }
    }
}

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// A unit that gathers findings from one external intelligence source.
///
/// Implementations must return before `deadline` (or fail with
/// [`CollectorError::Timeout`]) and annotate their output with provenance.
#[async_trait]
pub trait Collector: Send + Sync {
    /// The immutable spec this collector was built from.
    fn spec(&self) -> &CollectorSpec;

    /// Convert `query` into one finding.
    async fn invoke(
        &self,
        query: &str,
        deadline: Deadline,
    ) -> std::result::Result<Finding, CollectorError>;

    /// Collector name, unique within a run.
    fn name(&self) -> &str {
        &self.spec().name
    }
}

/// Build the collector variant matching a spec's `kind`.
pub fn build_collector(spec: &CollectorSpec) -> Result<Arc<dyn Collector>> {
    let collector: Arc<dyn Collector> = match &spec.kind {
        CollectorKind::WebSearch { .. } => Arc::new(WebSearchCollector::new(spec.clone())?),
        CollectorKind::SocialPosts { .. } => Arc::new(SocialPostCollector::new(spec.clone())?),
        CollectorKind::Feed { .. } => Arc::new(FeedCollector::new(spec.clone())?),
    };
    Ok(collector)
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Holds registered collectors in registration order.
#[derive(Clone, Default)]
pub struct CollectorRegistry {
    collectors: Vec<Arc<dyn Collector>>,
}

impl CollectorRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate the specs and build one collector per spec, in order.
    pub fn from_specs(specs: &[CollectorSpec]) -> Result<Self> {
        threatintel_shared::validate_collectors(specs)?;
        let mut registry = Self::new();
        for spec in specs {
            registry.register(build_collector(spec)?)?;
        }
        Ok(registry)
    }

    /// Append a collector. Names must be unique.
    pub fn register(&mut self, collector: Arc<dyn Collector>) -> Result<()> {
        if self.collectors.iter().any(|c| c.name() == collector.name()) {
            return Err(ThreatIntelError::config(format!(
                "duplicate collector name: {}",
                collector.name()
            )));
        }
        tracing::debug!(
            name = collector.name(),
            capability = %collector.spec().capability(),
            "registered collector"
        );
        self.collectors.push(collector);
        Ok(())
    }

    /// Collectors in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Collector>> {
        self.collectors.iter()
    }

    /// Collector at registration position `index`.
    pub fn get(&self, index: usize) -> Option<&Arc<dyn Collector>> {
        self.collectors.get(index)
    }

    pub fn len(&self) -> usize {
        self.collectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.collectors.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use threatintel_shared::{AppConfig, Capability};

    struct Fixed(CollectorSpec);

    #[async_trait]
    impl Collector for Fixed {
        fn spec(&self) -> &CollectorSpec {
            &self.0
        }

        async fn invoke(
            &self,
            _query: &str,
            _deadline: Deadline,
        ) -> std::result::Result<Finding, CollectorError> {
            Err(CollectorError::Timeout)
        }
    }

    #[test]
    fn registry_from_default_specs_keeps_order() {
        let config = AppConfig::default();
        let registry = CollectorRegistry::from_specs(&config.collectors).expect("build registry");
        let names: Vec<&str> = registry.iter().map(|c| c.name()).collect();
        assert_eq!(names, ["WebSearchAgent", "XAnalysisAgent", "FeedReaderAgent"]);
        assert_eq!(
            registry.iter().last().map(|c| c.spec().capability()),
            Some(Capability::Feed)
        );
    }

    #[test]
    fn registry_rejects_duplicate_names() {
        let spec = AppConfig::default().collectors[0].clone();
        let mut registry = CollectorRegistry::new();
        registry.register(Arc::new(Fixed(spec.clone()))).unwrap();
        let err = registry.register(Arc::new(Fixed(spec))).unwrap_err();
        assert!(err.to_string().contains("duplicate collector name"));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_tracks_remaining_time() {
        let deadline = Deadline::after(Duration::from_secs(10));
        assert!(!deadline.is_expired());
        tokio::time::advance(Duration::from_secs(4)).await;
        assert_eq!(deadline.remaining(), Duration::from_secs(6));
        tokio::time::advance(Duration::from_secs(7)).await;
        assert!(deadline.is_expired());
    }

    #[tokio::test]
    async fn huge_budget_saturates_instead_of_overflowing() {
        let deadline = Deadline::after(Duration::from_secs(u64::MAX));
        assert!(!deadline.is_expired());
        assert_eq!(deadline.at(), DateTime::<Utc>::MAX_UTC);
        assert!(deadline.remaining() > Duration::from_secs(86_400 * 365));

        let capped = deadline.capped(Some(Duration::from_secs(5)));
        assert!(capped.remaining() <= Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn capped_deadline_takes_earliest() {
        let deadline = Deadline::after(Duration::from_secs(60));
        let capped = deadline.capped(Some(Duration::from_secs(5)));
        assert_eq!(capped.remaining(), Duration::from_secs(5));
        let uncapped = deadline.capped(Some(Duration::from_secs(600)));
        assert_eq!(uncapped.remaining(), Duration::from_secs(60));
        assert_eq!(deadline.capped(None).remaining(), Duration::from_secs(60));
    }
}
