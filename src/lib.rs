//! Inbox Triage Engine
//!
//! A classification-and-filtering engine that sorts a mailbox into a fixed
//! set of categories using sender/subject heuristics, applies reversible
//! organizational actions (labeling, archiving) to existing messages, and
//! synthesizes persistent provider-side rules so future matching messages
//! are handled automatically.
//!
//! # Overview
//!
//! - **Classification**: deterministic, precedence-ordered categorization
//!   with protection overrides — designated senders, domains, and keywords
//!   are never auto-archived
//! - **Batch Mutation**: rate-limited, chunked label/archive application
//!   with best-effort partial-failure semantics
//! - **Rule Synthesis**: idempotent creation of standing provider rules for
//!   high-frequency senders, deduplicated against the existing rule set
//! - **Checkpointing**: incremental runs resume from a persisted position
//!   without reprocessing history
//!
//! The mail provider itself (listing, metadata retrieval, label/rule CRUD)
//! is an external collaborator behind the [`gateway::MailGateway`] trait,
//! as are interactive prompts: the confirmation gate is a caller-supplied
//! closure.
//!
//! # Example Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use inbox_triage::{CheckpointStore, Config, Orchestrator};
//! # use inbox_triage::gateway::MailGateway;
//! # fn provider() -> Arc<dyn MailGateway> { unimplemented!() }
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("triage.toml".as_ref()).await?;
//!     let checkpoints = CheckpointStore::new(".inbox-triage/checkpoint.json");
//!
//!     let orchestrator = Orchestrator::new(provider(), config, checkpoints);
//!     let report = orchestrator.run(|summary| {
//!         // show the summary, ask the user
//!         summary.planned_archives > 0
//!     }).await?;
//!
//!     println!("{} messages classified", report.classified);
//!     Ok(())
//! }
//! ```
//!
//! # Module Organization
//!
//! - [`classifier`] - Precedence-ordered message classification
//! - [`checkpoint`] - Resume-position persistence
//! - [`config`] - Configuration management
//! - [`error`] - Error types and result alias
//! - [`gateway`] - Provider gateway interface
//! - [`labels`] - Idempotent label management
//! - [`models`] - Core data structures
//! - [`mutator`] - Rate-limited batch mutation
//! - [`orchestrator`] - Run pipeline sequencing
//! - [`rate_limiter`] - Shared outbound-call gate
//! - [`retry`] - Bounded exponential-backoff retry
//! - [`synthesizer`] - Persistent-rule synthesis

pub mod checkpoint;
pub mod classifier;
pub mod config;
pub mod error;
pub mod gateway;
pub mod labels;
pub mod models;
pub mod mutator;
pub mod orchestrator;
pub mod rate_limiter;
pub mod retry;
pub mod synthesizer;

// Re-export commonly used types for convenience
pub use error::{Result, TriageError};

// Core data models
pub use models::{Category, ClassificationResult, FilterRule, LabelInfo, MessageMetadata};

// Classifier
pub use classifier::{domain_matches, Classifier};

// Configuration
pub use config::{Config, ExecutionConfig, ProtectionConfig, RuleConfig, ScanConfig};

// Gateway types
pub use gateway::{ExistingRule, MailGateway, MessagePage, RawMessage};

// Pipeline components
pub use checkpoint::{Checkpoint, CheckpointStore, CheckpointUpdate};
pub use labels::LabelCatalog;
pub use mutator::{BatchMutator, MutationReport};
pub use orchestrator::{Orchestrator, RunOutcome, RunReport, RunSummary};
pub use rate_limiter::RateLimiter;
pub use retry::RetryPolicy;
pub use synthesizer::{RuleSynthesizer, SynthesisReport};
