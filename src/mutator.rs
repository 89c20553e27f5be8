//! Rate-limited batch mutation of existing messages
//!
//! Converts category groups into chunked label/archive mutations. Chunks are
//! best-effort: a failed chunk is recorded and the remaining chunks and
//! categories still run. Categories fan out as bounded-concurrency tasks;
//! within one category chunks apply in list order, and every provider call
//! goes through the one shared rate limiter and the retry policy.

use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::Result;
use crate::gateway::MailGateway;
use crate::models::{Category, ClassificationResult, INBOX_LABEL};
use crate::rate_limiter::RateLimiter;
use crate::retry::RetryPolicy;

/// Message ids per mutation call
pub const CHUNK_SIZE: usize = 50;

/// Concurrent category tasks; outbound calls stay serialized by the limiter
const CATEGORY_FAN_OUT: usize = 4;

pub struct BatchMutator {
    gateway: Arc<dyn MailGateway>,
    limiter: RateLimiter,
    retry: RetryPolicy,
}

/// One failed chunk, with enough context to retry it by hand
#[derive(Debug, Clone, Serialize)]
pub struct MutationFailure {
    pub category: Category,
    pub chunk_index: usize,
    pub message_count: usize,
    pub reason: String,
}

/// Attempted vs confirmed mutation counts for one run
#[derive(Debug, Clone, Default, Serialize)]
pub struct MutationReport {
    pub attempted: usize,
    pub confirmed: usize,
    pub failures: Vec<MutationFailure>,
}

impl MutationReport {
    fn merge(&mut self, other: MutationReport) {
        self.attempted += other.attempted;
        self.confirmed += other.confirmed;
        self.failures.extend(other.failures);
    }
}

impl BatchMutator {
    pub fn new(gateway: Arc<dyn MailGateway>, limiter: RateLimiter, retry: RetryPolicy) -> Self {
        Self {
            gateway,
            limiter,
            retry,
        }
    }

    /// Apply each category's label (and archive action where the policy says
    /// so) to its messages. Categories without a label id are skipped.
    pub async fn apply_category_actions(
        &self,
        groups: &ClassificationResult,
        label_ids: &HashMap<Category, String>,
        archive_policy: &HashMap<Category, bool>,
    ) -> MutationReport {
        let tasks = Category::ALL.iter().filter_map(|category| {
            let label_id = label_ids.get(category)?;
            let messages = groups.group(*category);
            if messages.is_empty() {
                return None;
            }
            let archive = archive_policy.get(category).copied().unwrap_or(false);
            Some(self.apply_category(*category, messages, label_id.clone(), archive))
        });

        let mut report = MutationReport::default();
        let mut partials = stream::iter(tasks).buffer_unordered(CATEGORY_FAN_OUT);
        while let Some(partial) = partials.next().await {
            report.merge(partial);
        }
        report
    }

    async fn apply_category(
        &self,
        category: Category,
        messages: &[crate::models::MessageMetadata],
        label_id: String,
        archive: bool,
    ) -> MutationReport {
        let ids: Vec<String> = messages.iter().map(|m| m.id.clone()).collect();
        let add_label_ids = vec![label_id];
        let remove_label_ids = if archive {
            vec![INBOX_LABEL.to_string()]
        } else {
            Vec::new()
        };

        let mut report = MutationReport::default();

        for (chunk_index, chunk) in ids.chunks(CHUNK_SIZE).enumerate() {
            report.attempted += chunk.len();

            self.limiter.wait().await;
            let result = self.mutate_chunk(chunk, &add_label_ids, &remove_label_ids).await;

            match result {
                Ok(()) => {
                    debug!(
                        "Applied {} actions to {} messages (chunk {})",
                        category,
                        chunk.len(),
                        chunk_index
                    );
                    report.confirmed += chunk.len();
                }
                Err(e) => {
                    warn!(
                        "Chunk {} of category {} failed after retries: {}",
                        chunk_index, category, e
                    );
                    report.failures.push(MutationFailure {
                        category,
                        chunk_index,
                        message_count: chunk.len(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        report
    }

    async fn mutate_chunk(
        &self,
        chunk: &[String],
        add_label_ids: &[String],
        remove_label_ids: &[String],
    ) -> Result<()> {
        let gateway = Arc::clone(&self.gateway);
        let chunk = chunk.to_vec();
        let add = add_label_ids.to_vec();
        let remove = remove_label_ids.to_vec();

        self.retry
            .execute("batch_mutate_labels", move || {
                let gateway = Arc::clone(&gateway);
                let chunk = chunk.clone();
                let add = add.clone();
                let remove = remove.clone();
                async move { gateway.batch_mutate_labels(&chunk, &add, &remove).await }
            })
            .await
    }
}
