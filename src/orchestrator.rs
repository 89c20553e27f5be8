//! Run pipeline: fetch, classify, confirm, mutate, synthesize, checkpoint
//!
//! The orchestrator owns the run-wide resources — configuration, the single
//! shared rate limiter, the retry policy, and the checkpoint store — and
//! sequences one triage pass. The checkpoint is read once at the start and
//! written at most once, after mutation and synthesis have been attempted;
//! a fatal error or a declined confirmation leaves it untouched.

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::checkpoint::{Checkpoint, CheckpointStore, CheckpointUpdate};
use crate::classifier::Classifier;
use crate::config::Config;
use crate::error::{Result, TriageError};
use crate::gateway::{MailGateway, METADATA_HEADERS};
use crate::labels::LabelCatalog;
use crate::models::{Category, ClassificationResult, MessageMetadata};
use crate::mutator::{BatchMutator, MutationReport};
use crate::rate_limiter::RateLimiter;
use crate::retry::RetryPolicy;
use crate::synthesizer::{RuleSynthesizer, SynthesisReport};

/// How a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RunOutcome {
    /// Mutation and synthesis were attempted and the checkpoint advanced
    Completed,
    /// Classification only; nothing was mutated or persisted
    DryRun,
    /// The confirmation gate declined; nothing was mutated or persisted
    Declined,
}

/// Classification summary shown at the confirmation gate
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub total_classified: usize,
    pub category_counts: Vec<(Category, usize)>,
    /// Messages that would leave the inbox under the current archive policy
    pub planned_archives: usize,
    pub fetch_failures: usize,
}

/// A message dropped from the run because its metadata could not be fetched
#[derive(Debug, Clone, Serialize)]
pub struct FetchFailure {
    pub id: String,
    pub reason: String,
}

/// End-of-run accounting across all phases
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: String,
    pub outcome: RunOutcome,
    pub listed: usize,
    pub classified: usize,
    pub fetch_failures: Vec<FetchFailure>,
    pub summary: RunSummary,
    pub mutation: Option<MutationReport>,
    pub synthesis: Option<SynthesisReport>,
    pub checkpoint: Option<Checkpoint>,
}

pub struct Orchestrator {
    gateway: Arc<dyn MailGateway>,
    config: Config,
    checkpoints: CheckpointStore,
    limiter: RateLimiter,
    retry: RetryPolicy,
    classifier: Classifier,
}

impl Orchestrator {
    pub fn new(gateway: Arc<dyn MailGateway>, config: Config, checkpoints: CheckpointStore) -> Self {
        let limiter = RateLimiter::new(config.scan.requests_per_second);
        let retry = RetryPolicy::new(
            config.execution.max_retries,
            Duration::from_millis(config.execution.base_delay_ms),
        );
        Self {
            gateway,
            config,
            checkpoints,
            limiter,
            retry,
            classifier: Classifier::new(),
        }
    }

    /// Execute one triage pass. `confirm` is the human gate between the
    /// classification summary and any mutation; it is consulted once.
    pub async fn run(&self, confirm: impl Fn(&RunSummary) -> bool) -> Result<RunReport> {
        let run_id = uuid::Uuid::new_v4().to_string();
        let checkpoint = self.checkpoints.load().await?;
        let query = build_query(&checkpoint);
        info!("Run {} starting with query '{}'", run_id, query);

        let (ids, carry_token) = self.list_batch(&query, &checkpoint).await?;
        let listed = ids.len();
        info!("Listed {} messages", listed);

        let (messages, fetch_failures) = self.fetch_metadata(ids).await?;

        let mut groups = ClassificationResult::new();
        let mut newest: Option<DateTime<Utc>> = None;
        for message in messages {
            newest = Some(match newest {
                Some(current) => current.max(message.arrival_date),
                None => message.arrival_date,
            });
            let category = self.classifier.classify(&message, &self.config.protection);
            groups.insert(category, message);
        }

        let archive_policy = self.config.rules.archive_policy()?;
        let summary = summarize(&groups, &archive_policy, fetch_failures.len());
        info!(
            "Classified {} messages into {} categories",
            summary.total_classified,
            summary.category_counts.len()
        );

        if self.config.execution.dry_run {
            info!("Dry run: skipping mutation, synthesis, and checkpoint");
            return Ok(RunReport {
                run_id,
                outcome: RunOutcome::DryRun,
                listed,
                classified: groups.total(),
                fetch_failures,
                summary,
                mutation: None,
                synthesis: None,
                checkpoint: None,
            });
        }

        if !confirm(&summary) {
            info!("Run {} declined at the confirmation gate", run_id);
            return Ok(RunReport {
                run_id,
                outcome: RunOutcome::Declined,
                listed,
                classified: groups.total(),
                fetch_failures,
                summary,
                mutation: None,
                synthesis: None,
                checkpoint: None,
            });
        }

        let mut labels = LabelCatalog::load(
            Arc::clone(&self.gateway),
            self.limiter.clone(),
            self.retry,
        )
        .await?;

        let mut label_ids: HashMap<Category, String> = HashMap::new();
        for (category, _) in &summary.category_counts {
            if let Some(name) = category.label_name() {
                label_ids.insert(*category, labels.ensure(name).await?);
            }
        }

        let mutator = BatchMutator::new(
            Arc::clone(&self.gateway),
            self.limiter.clone(),
            self.retry,
        );
        let mutation = mutator
            .apply_category_actions(&groups, &label_ids, &archive_policy)
            .await;

        // One authoritative snapshot of existing rules per run
        self.limiter.wait().await;
        let existing_rules = {
            let gateway = Arc::clone(&self.gateway);
            self.retry
                .execute("list_rules", || {
                    let gateway = Arc::clone(&gateway);
                    async move { gateway.list_rules().await }
                })
                .await?
        };

        let synthesizer = RuleSynthesizer::new(
            Arc::clone(&self.gateway),
            self.limiter.clone(),
            self.retry,
            self.config.rules.min_category_total,
            self.config.rules.min_sender_frequency,
        );
        let synthesis = synthesizer
            .synthesize(
                &groups,
                &existing_rules,
                &archive_policy,
                &self.config.protection,
                &mut labels,
            )
            .await;

        let new_checkpoint = self
            .checkpoints
            .update(CheckpointUpdate {
                last_processed_date: newest.map(|dt| dt.date_naive()),
                last_page_token: Some(carry_token),
                total_processed: Some(checkpoint.total_processed + groups.total() as u64),
                run_id: Some(run_id.clone()),
            })
            .await?;

        info!(
            "Run {} complete: {}/{} mutations confirmed, {} rules created",
            run_id, mutation.confirmed, mutation.attempted, synthesis.created
        );

        Ok(RunReport {
            run_id,
            outcome: RunOutcome::Completed,
            listed,
            classified: groups.total(),
            fetch_failures,
            summary,
            mutation: Some(mutation),
            synthesis: Some(synthesis),
            checkpoint: Some(new_checkpoint),
        })
    }

    /// Page through the listing until the run bound is reached. Returns the
    /// ids plus the page token to persist: `Some(token)` when the window was
    /// cut short, `None` when it was finished.
    async fn list_batch(
        &self,
        query: &str,
        checkpoint: &Checkpoint,
    ) -> Result<(Vec<String>, Option<String>)> {
        let mut ids = Vec::new();
        let mut page_token = checkpoint.last_page_token.clone();

        loop {
            self.limiter.wait().await;
            let page = {
                let gateway = Arc::clone(&self.gateway);
                let query = query.to_string();
                let token = page_token.clone();
                self.retry
                    .execute("list_messages", move || {
                        let gateway = Arc::clone(&gateway);
                        let query = query.clone();
                        let token = token.clone();
                        let page_size = self.config.scan.page_size;
                        async move {
                            gateway
                                .list_messages(&query, token.as_deref(), page_size)
                                .await
                        }
                    })
                    .await?
            };

            ids.extend(page.ids);
            page_token = page.next_page_token;

            if page_token.is_none() {
                return Ok((ids, None));
            }
            if ids.len() >= self.config.scan.max_messages_per_run {
                return Ok((ids, page_token));
            }
        }
    }

    /// Fetch metadata with a bounded fan-out. A message that cannot be
    /// fetched is dropped from all aggregates for this run; authentication
    /// failures abort the run.
    async fn fetch_metadata(
        &self,
        ids: Vec<String>,
    ) -> Result<(Vec<MessageMetadata>, Vec<FetchFailure>)> {
        let fan_out = self.config.scan.fetch_fan_out;

        let results: Vec<(String, Result<MessageMetadata>)> = stream::iter(ids)
            .map(|id| async move {
                self.limiter.wait().await;
                let fetched = {
                    let gateway = Arc::clone(&self.gateway);
                    let id = id.clone();
                    self.retry
                        .execute("get_message_metadata", move || {
                            let gateway = Arc::clone(&gateway);
                            let id = id.clone();
                            async move { gateway.get_message_metadata(&id, METADATA_HEADERS).await }
                        })
                        .await
                };
                let parsed = fetched.and_then(|raw| {
                    MessageMetadata::from_headers(id.clone(), &raw.headers, raw.provider_labels)
                });
                (id, parsed)
            })
            .buffer_unordered(fan_out)
            .collect()
            .await;

        let mut messages = Vec::new();
        let mut failures = Vec::new();
        for (id, result) in results {
            match result {
                Ok(message) => messages.push(message),
                Err(e @ TriageError::Auth(_)) => return Err(e),
                Err(e) => {
                    warn!("Dropping message {} from this run: {}", id, e);
                    failures.push(FetchFailure {
                        id,
                        reason: e.to_string(),
                    });
                }
            }
        }

        Ok((messages, failures))
    }
}

/// Incremental query from the checkpoint's resume position
fn build_query(checkpoint: &Checkpoint) -> String {
    match checkpoint.last_processed_date {
        Some(date) => format!("after:{}", date.format("%Y/%m/%d")),
        None => "in:anywhere".to_string(),
    }
}

fn summarize(
    groups: &ClassificationResult,
    archive_policy: &HashMap<Category, bool>,
    fetch_failures: usize,
) -> RunSummary {
    let category_counts = groups.category_counts();
    let planned_archives = category_counts
        .iter()
        .filter(|(category, _)| archive_policy.get(category).copied().unwrap_or(false))
        .map(|(_, count)| *count)
        .sum();

    RunSummary {
        total_classified: groups.total(),
        category_counts,
        planned_archives,
        fetch_failures,
    }
}
