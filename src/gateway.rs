//! Provider gateway interface
//!
//! The mail provider's request/response plumbing (authorization, transport,
//! pagination mechanics) lives behind this trait. The core never talks to a
//! provider directly; it consumes these operations through the shared rate
//! limiter and retry policy.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::Result;
use crate::models::{LabelInfo, RuleAction, RuleCriteria};

/// Headers the triage pass needs from each message
pub const METADATA_HEADERS: &[&str] = &["From", "Subject", "Date", "List-Unsubscribe", "List-Id"];

/// One page of a message listing
#[derive(Debug, Clone, Default)]
pub struct MessagePage {
    pub ids: Vec<String>,
    pub next_page_token: Option<String>,
}

/// Raw metadata for one message, before parsing
#[derive(Debug, Clone, Default)]
pub struct RawMessage {
    pub headers: HashMap<String, String>,
    pub provider_labels: Vec<String>,
}

/// A persistent rule already present on the provider
#[derive(Debug, Clone)]
pub struct ExistingRule {
    pub id: String,
    pub criteria: RuleCriteria,
    pub action: RuleAction,
}

/// Operations the provider must expose to the core
#[async_trait]
pub trait MailGateway: Send + Sync {
    /// List message ids matching a query, one page at a time
    async fn list_messages(
        &self,
        query: &str,
        page_token: Option<&str>,
        max_results: u32,
    ) -> Result<MessagePage>;

    /// Fetch the named headers and provider labels for one message
    async fn get_message_metadata(&self, id: &str, header_names: &[&str]) -> Result<RawMessage>;

    /// Add/remove labels on a batch of messages in one call
    async fn batch_mutate_labels(
        &self,
        ids: &[String],
        add_label_ids: &[String],
        remove_label_ids: &[String],
    ) -> Result<()>;

    /// List all labels in the account
    async fn list_labels(&self) -> Result<Vec<LabelInfo>>;

    /// Create a new label
    async fn create_label(&self, name: &str) -> Result<LabelInfo>;

    /// List all persistent rules
    async fn list_rules(&self) -> Result<Vec<ExistingRule>>;

    /// Create a persistent rule, returning its id
    async fn create_rule(&self, criteria: &RuleCriteria, action: &RuleAction) -> Result<String>;

    /// Delete a persistent rule by id
    async fn delete_rule(&self, rule_id: &str) -> Result<()>;
}

// Allow shared ownership of any gateway across pipeline components
#[async_trait]
impl<G: MailGateway + ?Sized> MailGateway for Arc<G> {
    async fn list_messages(
        &self,
        query: &str,
        page_token: Option<&str>,
        max_results: u32,
    ) -> Result<MessagePage> {
        self.as_ref()
            .list_messages(query, page_token, max_results)
            .await
    }

    async fn get_message_metadata(&self, id: &str, header_names: &[&str]) -> Result<RawMessage> {
        self.as_ref().get_message_metadata(id, header_names).await
    }

    async fn batch_mutate_labels(
        &self,
        ids: &[String],
        add_label_ids: &[String],
        remove_label_ids: &[String],
    ) -> Result<()> {
        self.as_ref()
            .batch_mutate_labels(ids, add_label_ids, remove_label_ids)
            .await
    }

    async fn list_labels(&self) -> Result<Vec<LabelInfo>> {
        self.as_ref().list_labels().await
    }

    async fn create_label(&self, name: &str) -> Result<LabelInfo> {
        self.as_ref().create_label(name).await
    }

    async fn list_rules(&self) -> Result<Vec<ExistingRule>> {
        self.as_ref().list_rules().await
    }

    async fn create_rule(&self, criteria: &RuleCriteria, action: &RuleAction) -> Result<String> {
        self.as_ref().create_rule(criteria, action).await
    }

    async fn delete_rule(&self, rule_id: &str) -> Result<()> {
        self.as_ref().delete_rule(rule_id).await
    }
}
