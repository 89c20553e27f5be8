//! Shared fixtures for integration tests

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use inbox_triage::error::{Result, TriageError};
use inbox_triage::gateway::{ExistingRule, MailGateway, MessagePage, RawMessage};
use inbox_triage::models::{LabelInfo, RuleAction, RuleCriteria, INBOX_LABEL};

/// Install a test subscriber once; `RUST_LOG` controls verbosity
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Build raw metadata for one inbox message
pub fn raw_message(from: &str, subject: &str, list_headers: bool) -> RawMessage {
    let mut headers = HashMap::new();
    headers.insert("From".to_string(), from.to_string());
    headers.insert("Subject".to_string(), subject.to_string());
    headers.insert(
        "Date".to_string(),
        "Mon, 24 Nov 2025 10:30:00 +0000".to_string(),
    );
    if list_headers {
        headers.insert(
            "List-Unsubscribe".to_string(),
            "<mailto:unsubscribe@example.com>".to_string(),
        );
    }
    RawMessage {
        headers,
        provider_labels: vec![INBOX_LABEL.to_string()],
    }
}

/// One recorded batch mutation
#[derive(Debug, Clone)]
pub struct MutationCall {
    pub ids: Vec<String>,
    pub add_label_ids: Vec<String>,
    pub remove_label_ids: Vec<String>,
}

/// In-memory provider double: serves seeded messages, records mutations,
/// and persists labels/rules created during a run.
#[derive(Default)]
pub struct FakeProvider {
    /// (id, raw) in listing order
    messages: Vec<(String, RawMessage)>,
    /// ids that fail metadata fetch with NotFound
    missing: Vec<String>,
    pub labels: Mutex<Vec<LabelInfo>>,
    pub rules: Mutex<Vec<ExistingRule>>,
    pub mutations: Mutex<Vec<MutationCall>>,
    counter: AtomicUsize,
}

impl FakeProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed_message(&mut self, id: &str, raw: RawMessage) {
        self.messages.push((id.to_string(), raw));
    }

    pub fn seed_missing(&mut self, id: &str) {
        self.messages.push((id.to_string(), RawMessage::default()));
        self.missing.push(id.to_string());
    }

    pub fn seed_rule(&self, from: &str) {
        self.rules.lock().unwrap().push(ExistingRule {
            id: format!("seeded-{}", from),
            criteria: RuleCriteria {
                from: Some(from.to_string()),
                subject: None,
                negated_subject: None,
            },
            action: RuleAction {
                add_label_ids: vec!["seeded-label".to_string()],
                remove_from_inbox: true,
            },
        });
    }

    pub fn mutation_calls(&self) -> Vec<MutationCall> {
        self.mutations.lock().unwrap().clone()
    }

    pub fn created_rules(&self) -> Vec<ExistingRule> {
        self.rules.lock().unwrap().clone()
    }

    fn next_id(&self, prefix: &str) -> String {
        format!("{}-{}", prefix, self.counter.fetch_add(1, Ordering::SeqCst))
    }
}

#[async_trait]
impl MailGateway for FakeProvider {
    async fn list_messages(
        &self,
        _query: &str,
        page_token: Option<&str>,
        max_results: u32,
    ) -> Result<MessagePage> {
        let start: usize = page_token.map(|t| t.parse().unwrap_or(0)).unwrap_or(0);
        let end = (start + max_results as usize).min(self.messages.len());
        let ids = self.messages[start..end]
            .iter()
            .map(|(id, _)| id.clone())
            .collect();
        let next_page_token = (end < self.messages.len()).then(|| end.to_string());
        Ok(MessagePage {
            ids,
            next_page_token,
        })
    }

    async fn get_message_metadata(&self, id: &str, _header_names: &[&str]) -> Result<RawMessage> {
        if self.missing.iter().any(|m| m == id) {
            return Err(TriageError::NotFound(id.to_string()));
        }
        self.messages
            .iter()
            .find(|(mid, _)| mid == id)
            .map(|(_, raw)| raw.clone())
            .ok_or_else(|| TriageError::NotFound(id.to_string()))
    }

    async fn batch_mutate_labels(
        &self,
        ids: &[String],
        add_label_ids: &[String],
        remove_label_ids: &[String],
    ) -> Result<()> {
        self.mutations.lock().unwrap().push(MutationCall {
            ids: ids.to_vec(),
            add_label_ids: add_label_ids.to_vec(),
            remove_label_ids: remove_label_ids.to_vec(),
        });
        Ok(())
    }

    async fn list_labels(&self) -> Result<Vec<LabelInfo>> {
        Ok(self.labels.lock().unwrap().clone())
    }

    async fn create_label(&self, name: &str) -> Result<LabelInfo> {
        let label = LabelInfo {
            id: self.next_id("label"),
            name: name.to_string(),
        };
        self.labels.lock().unwrap().push(label.clone());
        Ok(label)
    }

    async fn list_rules(&self) -> Result<Vec<ExistingRule>> {
        Ok(self.rules.lock().unwrap().clone())
    }

    async fn create_rule(&self, criteria: &RuleCriteria, action: &RuleAction) -> Result<String> {
        let id = self.next_id("rule");
        self.rules.lock().unwrap().push(ExistingRule {
            id: id.clone(),
            criteria: criteria.clone(),
            action: action.clone(),
        });
        Ok(id)
    }

    async fn delete_rule(&self, rule_id: &str) -> Result<()> {
        let mut rules = self.rules.lock().unwrap();
        let before = rules.len();
        rules.retain(|r| r.id != rule_id);
        if rules.len() == before {
            return Err(TriageError::NotFound(rule_id.to_string()));
        }
        Ok(())
    }
}
