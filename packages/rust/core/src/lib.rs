//! Orchestration and synthesis for the threat intelligence aggregator.
//!
//! This crate ties collectors, report synthesis, and session storage into one
//! run (`RunController::produce_report`).

pub mod controller;
pub mod extract;
pub mod orchestrator;
pub mod progress;
pub mod synthesizer;

pub use controller::{RunController, RunReport};
pub use extract::{Candidate, Extractor, RuleExtractor, normalize_label, section_for_heading};
pub use orchestrator::{Orchestrator, Run, RunState};
pub use progress::{ProgressReporter, SilentProgress};
pub use synthesizer::Synthesizer;
