//! Shared types, error model, and configuration for the threat intelligence aggregator.
//!
//! This crate is the foundation depended on by all other crates.
//! It provides:
//! - [`ThreatIntelError`], [`CollectorError`], [`StorageError`]: the error taxonomy
//! - Domain types ([`CollectorSpec`], [`Finding`], [`Outcome`], [`Report`], [`SessionTurn`])
//! - Configuration ([`AppConfig`], [`RunConfig`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, DefaultsConfig, MAX_DEADLINE_SECS, MIN_ENTITIES_PER_SECTION, RunConfig, StorageBackend,
    StorageConfig, config_dir, config_file_path, expand_home, init_config, load_config,
    load_config_from, validate_collectors, validate_table_name,
};
pub use error::{CollectorError, Result, StorageError, ThreatIntelError};
pub use types::{
    Capability, CollectorKind, CollectorOutcome, CollectorSpec, DEFAULT_HEADER, FeedSource,
    Finding, FindingEntity, LOOKBACK_DAYS, NO_DATA, Outcome, Report, ReportEntry, RunId,
    RunStatus, Section, SectionName, SectionStatus, SessionId, SessionTurn,
};
