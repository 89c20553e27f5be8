//! Persistent-rule synthesis from run aggregates
//!
//! High-frequency senders in archivable categories become standing provider
//! rules so future matching messages are handled without re-analysis. The
//! existing-rule set is queried once per run and treated as authoritative:
//! a candidate whose `from` criterion already exists (case-insensitive) is
//! skipped, which makes synthesis idempotent across runs. Protected and VIP
//! senders are re-checked here even though the classifier already routed
//! them away.

use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::classifier::domain_matches;
use crate::config::ProtectionConfig;
use crate::error::Result;
use crate::gateway::{ExistingRule, MailGateway};
use crate::labels::LabelCatalog;
use crate::models::{Category, ClassificationResult, FilterRule, RuleAction, RuleCriteria};
use crate::rate_limiter::RateLimiter;
use crate::retry::RetryPolicy;

/// A named service granted two-sided composite rules instead of a plain
/// sender rule: subjects matching `keep_subjects` stay in the inbox under an
/// Important label, everything else archives under a Filtered label.
///
/// Static configuration data, not a discovered pattern.
#[derive(Debug, Clone, Copy)]
pub struct ServiceRule {
    pub service: &'static str,
    pub domain: &'static str,
    pub keep_subjects: &'static [&'static str],
}

/// Fixed table of services with two-sided handling
pub static SERVICE_RULES: &[ServiceRule] = &[
    ServiceRule {
        service: "LinkedIn",
        domain: "linkedin.com",
        keep_subjects: &["message", "invitation"],
    },
    ServiceRule {
        service: "GitHub",
        domain: "github.com",
        keep_subjects: &["security", "invitation"],
    },
    ServiceRule {
        service: "Facebook",
        domain: "facebook.com",
        keep_subjects: &["security", "login"],
    },
];

pub struct RuleSynthesizer {
    gateway: Arc<dyn MailGateway>,
    limiter: RateLimiter,
    retry: RetryPolicy,
    /// A category's run total must exceed this before its senders qualify
    min_category_total: usize,
    /// Minimum messages from one sender in the run
    min_sender_frequency: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct SynthesisFailure {
    pub sender: String,
    pub reason: String,
}

/// Outcome counts for the synthesis phase
#[derive(Debug, Clone, Default, Serialize)]
pub struct SynthesisReport {
    pub candidates: usize,
    pub created: usize,
    pub skipped_existing: usize,
    pub skipped_protected: usize,
    pub failures: Vec<SynthesisFailure>,
}

impl RuleSynthesizer {
    pub fn new(
        gateway: Arc<dyn MailGateway>,
        limiter: RateLimiter,
        retry: RetryPolicy,
        min_category_total: usize,
        min_sender_frequency: usize,
    ) -> Self {
        Self {
            gateway,
            limiter,
            retry,
            min_category_total,
            min_sender_frequency,
        }
    }

    /// Derive and create missing rules from this run's aggregates.
    ///
    /// One candidate failing does not stop the rest; fatal gateway errors
    /// are recorded like any other failure and surface in the report.
    pub async fn synthesize(
        &self,
        groups: &ClassificationResult,
        existing_rules: &[ExistingRule],
        archive_policy: &HashMap<Category, bool>,
        protection: &ProtectionConfig,
        labels: &mut LabelCatalog,
    ) -> SynthesisReport {
        let mut known_from: HashSet<String> = existing_rules
            .iter()
            .filter_map(|r| r.criteria.from.as_ref())
            .map(|f| f.trim().to_lowercase())
            .collect();

        let mut report = SynthesisReport::default();

        let service_senders = self.service_covered_senders(groups, archive_policy);
        let sender_candidates = self.sender_candidates(groups, archive_policy, &service_senders);
        report.candidates = sender_candidates.len();

        for (sender, category) in sender_candidates {
            if known_from.contains(&sender) {
                debug!("Rule for {} already exists, skipping", sender);
                report.skipped_existing += 1;
                continue;
            }
            if is_protected_address(protection, &sender) {
                debug!("Sender {} is protected, skipping rule", sender);
                report.skipped_protected += 1;
                continue;
            }

            // label_name is Some for every archivable category
            let Some(label_name) = category.label_name() else {
                continue;
            };

            match self.create_sender_rule(&sender, label_name, labels).await {
                Ok(rule_id) => {
                    info!("Created rule {} for sender {}", rule_id, sender);
                    known_from.insert(sender);
                    report.created += 1;
                }
                Err(e) => {
                    warn!("Failed to create rule for {}: {}", sender, e);
                    report.failures.push(SynthesisFailure {
                        sender,
                        reason: e.to_string(),
                    });
                }
            }
        }

        self.synthesize_service_rules(
            &service_senders,
            &mut known_from,
            protection,
            labels,
            &mut report,
        )
        .await;

        info!(
            "Rule synthesis: {} candidates, {} created, {} existing, {} protected, {} failed",
            report.candidates,
            report.created,
            report.skipped_existing,
            report.skipped_protected,
            report.failures.len()
        );
        report
    }

    /// Senders from qualifying categories, deterministically ordered.
    /// Senders handled by a composite service rule are left out.
    fn sender_candidates(
        &self,
        groups: &ClassificationResult,
        archive_policy: &HashMap<Category, bool>,
        service_senders: &HashMap<&'static str, usize>,
    ) -> Vec<(String, Category)> {
        let mut candidates = Vec::new();

        for category in Category::ALL {
            if !archive_policy.get(&category).copied().unwrap_or(false) {
                continue;
            }
            if groups.count(category) <= self.min_category_total {
                continue;
            }

            let mut senders: Vec<(String, usize)> = groups
                .sender_frequencies(category)
                .into_iter()
                .filter(|(_, freq)| *freq >= self.min_sender_frequency)
                .collect();
            senders.sort();

            for (sender, _) in senders {
                let covered = SERVICE_RULES.iter().any(|s| {
                    service_senders.contains_key(s.domain) && domain_matches(&sender, s.domain)
                });
                if !covered {
                    candidates.push((sender, category));
                }
            }
        }

        candidates
    }

    /// Per-service message volume across archivable categories, keeping only
    /// services that clear the sender-frequency threshold.
    fn service_covered_senders(
        &self,
        groups: &ClassificationResult,
        archive_policy: &HashMap<Category, bool>,
    ) -> HashMap<&'static str, usize> {
        let mut volumes: HashMap<&'static str, usize> = HashMap::new();

        for category in Category::ALL {
            if !archive_policy.get(&category).copied().unwrap_or(false) {
                continue;
            }
            for message in groups.group(category) {
                for service in SERVICE_RULES {
                    if domain_matches(&message.from_email, service.domain) {
                        *volumes.entry(service.domain).or_default() += 1;
                    }
                }
            }
        }

        volumes.retain(|_, volume| *volume >= self.min_sender_frequency);
        volumes
    }

    async fn create_sender_rule(
        &self,
        sender: &str,
        label_name: &str,
        labels: &mut LabelCatalog,
    ) -> Result<String> {
        let label_id = labels.ensure(label_name).await?;
        let rule = FilterRule {
            criteria: RuleCriteria {
                from: Some(sender.to_string()),
                subject: None,
                negated_subject: None,
            },
            action: RuleAction {
                add_label_ids: vec![label_id],
                remove_from_inbox: true,
            },
        };
        self.create_rule(rule).await
    }

    async fn synthesize_service_rules(
        &self,
        service_senders: &HashMap<&'static str, usize>,
        known_from: &mut HashSet<String>,
        protection: &ProtectionConfig,
        labels: &mut LabelCatalog,
        report: &mut SynthesisReport,
    ) {
        for service in SERVICE_RULES {
            if !service_senders.contains_key(service.domain) {
                continue;
            }

            let from = format!("@{}", service.domain);
            report.candidates += 1;

            if known_from.contains(&from) {
                report.skipped_existing += 1;
                continue;
            }
            if is_protected_address(protection, &format!("postmaster{}", from)) {
                report.skipped_protected += 1;
                continue;
            }

            let terms = service.keep_subjects.join(" OR ");
            let sides = [
                // Subject-positive: keep the inbox, mark important
                (
                    format!("Important/{}", service.service),
                    RuleCriteria {
                        from: Some(from.clone()),
                        subject: Some(terms.clone()),
                        negated_subject: None,
                    },
                    false,
                ),
                // Subject-negative: archive under the filtered label
                (
                    format!("Filtered/{}", service.service),
                    RuleCriteria {
                        from: Some(from.clone()),
                        subject: None,
                        negated_subject: Some(terms.clone()),
                    },
                    true,
                ),
            ];

            let mut all_created = true;
            for (label_name, criteria, remove_from_inbox) in sides {
                let created = async {
                    let label_id = labels.ensure(&label_name).await?;
                    self.create_rule(FilterRule {
                        criteria,
                        action: RuleAction {
                            add_label_ids: vec![label_id],
                            remove_from_inbox,
                        },
                    })
                    .await
                }
                .await;

                match created {
                    Ok(rule_id) => {
                        info!(
                            "Created composite rule {} for service {}",
                            rule_id, service.service
                        );
                        report.created += 1;
                    }
                    Err(e) => {
                        warn!(
                            "Failed composite rule for service {}: {}",
                            service.service, e
                        );
                        all_created = false;
                        report.failures.push(SynthesisFailure {
                            sender: from.clone(),
                            reason: e.to_string(),
                        });
                    }
                }
            }

            if all_created {
                known_from.insert(from);
            }
        }
    }

    async fn create_rule(&self, rule: FilterRule) -> Result<String> {
        self.limiter.wait().await;
        let gateway = Arc::clone(&self.gateway);
        self.retry
            .execute("create_rule", move || {
                let gateway = Arc::clone(&gateway);
                let rule = rule.clone();
                async move { gateway.create_rule(&rule.criteria, &rule.action).await }
            })
            .await
    }
}

/// Defensive protection re-check used right before rule creation
fn is_protected_address(protection: &ProtectionConfig, email: &str) -> bool {
    protection.is_vip(email)
        || protection.is_protected_sender(email)
        || protection
            .protected_domain_patterns()
            .any(|pattern| domain_matches(email, pattern))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TriageError;
    use crate::gateway::{MessagePage, RawMessage};
    use crate::models::{domain_of, LabelInfo, MessageMetadata, INBOX_LABEL};
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    fn message(id: usize, from: &str) -> MessageMetadata {
        MessageMetadata {
            id: format!("msg-{}", id),
            from_raw: from.to_string(),
            from_email: from.to_lowercase(),
            sender_domain: domain_of(&from.to_lowercase()).to_string(),
            subject: "subject".to_string(),
            arrival_date: Utc::now(),
            provider_labels: vec![INBOX_LABEL.to_string()],
            has_list_headers: true,
        }
    }

    /// Records created rules; existing rules are configurable
    struct RuleRecordingGateway {
        existing: Vec<ExistingRule>,
        created: Mutex<Vec<FilterRule>>,
        rule_counter: AtomicUsize,
    }

    impl RuleRecordingGateway {
        fn new(existing: Vec<ExistingRule>) -> Self {
            Self {
                existing,
                created: Mutex::new(Vec::new()),
                rule_counter: AtomicUsize::new(0),
            }
        }

        fn created(&self) -> Vec<FilterRule> {
            self.created.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl MailGateway for RuleRecordingGateway {
        async fn list_messages(
            &self,
            _query: &str,
            _page_token: Option<&str>,
            _max_results: u32,
        ) -> crate::error::Result<MessagePage> {
            Ok(MessagePage::default())
        }

        async fn get_message_metadata(
            &self,
            id: &str,
            _header_names: &[&str],
        ) -> crate::error::Result<RawMessage> {
            Err(TriageError::NotFound(id.to_string()))
        }

        async fn batch_mutate_labels(
            &self,
            _ids: &[String],
            _add: &[String],
            _remove: &[String],
        ) -> crate::error::Result<()> {
            Ok(())
        }

        async fn list_labels(&self) -> crate::error::Result<Vec<LabelInfo>> {
            Ok(vec![])
        }

        async fn create_label(&self, name: &str) -> crate::error::Result<LabelInfo> {
            Ok(LabelInfo {
                id: format!("label-{}", name.to_lowercase().replace('/', "-")),
                name: name.to_string(),
            })
        }

        async fn list_rules(&self) -> crate::error::Result<Vec<ExistingRule>> {
            Ok(self.existing.clone())
        }

        async fn create_rule(
            &self,
            criteria: &RuleCriteria,
            action: &RuleAction,
        ) -> crate::error::Result<String> {
            let n = self.rule_counter.fetch_add(1, Ordering::SeqCst);
            self.created.lock().unwrap().push(FilterRule {
                criteria: criteria.clone(),
                action: action.clone(),
            });
            Ok(format!("rule-{}", n))
        }

        async fn delete_rule(&self, _rule_id: &str) -> crate::error::Result<()> {
            Ok(())
        }
    }

    fn existing_rule(from: &str) -> ExistingRule {
        ExistingRule {
            id: "r-1".to_string(),
            criteria: RuleCriteria {
                from: Some(from.to_string()),
                subject: None,
                negated_subject: None,
            },
            action: RuleAction {
                add_label_ids: vec!["l".to_string()],
                remove_from_inbox: true,
            },
        }
    }

    fn synthesizer(gateway: Arc<RuleRecordingGateway>) -> RuleSynthesizer {
        RuleSynthesizer::new(
            gateway,
            RateLimiter::new(50),
            RetryPolicy::new(0, Duration::from_millis(1)),
            5,
            3,
        )
    }

    async fn empty_catalog(gateway: Arc<RuleRecordingGateway>) -> LabelCatalog {
        LabelCatalog::load(
            gateway as Arc<dyn MailGateway>,
            RateLimiter::new(50),
            RetryPolicy::new(0, Duration::from_millis(1)),
        )
        .await
        .unwrap()
    }

    fn newsletter_groups(sender: &str, count: usize) -> ClassificationResult {
        let mut groups = ClassificationResult::new();
        for i in 0..count {
            groups.insert(Category::Newsletter, message(i, sender));
        }
        groups
    }

    fn default_policy() -> HashMap<Category, bool> {
        Category::ALL
            .iter()
            .map(|c| (*c, c.archives_by_default()))
            .collect()
    }

    #[tokio::test]
    async fn test_creates_rule_for_frequent_sender() {
        let gateway = Arc::new(RuleRecordingGateway::new(vec![]));
        let synthesizer = synthesizer(Arc::clone(&gateway));
        let mut labels = empty_catalog(Arc::clone(&gateway)).await;
        let groups = newsletter_groups("newsletter@x.com", 10);

        let report = synthesizer
            .synthesize(
                &groups,
                &[],
                &default_policy(),
                &ProtectionConfig::default(),
                &mut labels,
            )
            .await;

        assert_eq!(report.created, 1);
        let created = gateway.created();
        assert_eq!(created.len(), 1);
        assert_eq!(
            created[0].criteria.from.as_deref(),
            Some("newsletter@x.com")
        );
        assert!(created[0].action.remove_from_inbox);
    }

    #[tokio::test]
    async fn test_existing_rule_blocks_duplicate() {
        let gateway = Arc::new(RuleRecordingGateway::new(vec![existing_rule(
            "Newsletter@X.com",
        )]));
        let synthesizer = synthesizer(Arc::clone(&gateway));
        let mut labels = empty_catalog(Arc::clone(&gateway)).await;
        let groups = newsletter_groups("newsletter@x.com", 10);

        let existing = gateway.list_rules().await.unwrap();
        let report = synthesizer
            .synthesize(
                &groups,
                &existing,
                &default_policy(),
                &ProtectionConfig::default(),
                &mut labels,
            )
            .await;

        assert_eq!(report.created, 0);
        assert_eq!(report.skipped_existing, 1);
        assert!(gateway.created().is_empty());
    }

    #[tokio::test]
    async fn test_second_run_creates_nothing_new() {
        let gateway = Arc::new(RuleRecordingGateway::new(vec![]));
        let synthesizer = synthesizer(Arc::clone(&gateway));
        let mut labels = empty_catalog(Arc::clone(&gateway)).await;
        let groups = newsletter_groups("newsletter@x.com", 10);
        let policy = default_policy();
        let protection = ProtectionConfig::default();

        let first = synthesizer
            .synthesize(&groups, &[], &policy, &protection, &mut labels)
            .await;
        assert_eq!(first.created, 1);

        // Second run sees the first run's rule in its snapshot
        let snapshot: Vec<ExistingRule> = gateway
            .created()
            .into_iter()
            .enumerate()
            .map(|(i, rule)| ExistingRule {
                id: format!("r-{}", i),
                criteria: rule.criteria,
                action: rule.action,
            })
            .collect();

        let second = synthesizer
            .synthesize(&groups, &snapshot, &policy, &protection, &mut labels)
            .await;
        assert_eq!(second.created, 0);
        assert_eq!(second.skipped_existing, 1);
    }

    #[tokio::test]
    async fn test_thresholds_gate_candidates() {
        let gateway = Arc::new(RuleRecordingGateway::new(vec![]));
        let synthesizer = synthesizer(Arc::clone(&gateway));
        let mut labels = empty_catalog(Arc::clone(&gateway)).await;

        // Category total of 5 does not exceed the threshold
        let groups = newsletter_groups("newsletter@x.com", 5);
        let report = synthesizer
            .synthesize(
                &groups,
                &[],
                &default_policy(),
                &ProtectionConfig::default(),
                &mut labels,
            )
            .await;
        assert_eq!(report.candidates, 0);

        // Total clears the bar but no sender reaches frequency 3
        let mut groups = ClassificationResult::new();
        for i in 0..6 {
            groups.insert(
                Category::Newsletter,
                message(i, &format!("sender-{}@x.com", i / 2)),
            );
        }
        let report = synthesizer
            .synthesize(
                &groups,
                &[],
                &default_policy(),
                &ProtectionConfig::default(),
                &mut labels,
            )
            .await;
        assert_eq!(report.created, 0);
    }

    #[tokio::test]
    async fn test_protected_sender_never_gets_rule() {
        let gateway = Arc::new(RuleRecordingGateway::new(vec![]));
        let synthesizer = synthesizer(Arc::clone(&gateway));
        let mut labels = empty_catalog(Arc::clone(&gateway)).await;
        let groups = newsletter_groups("alerts@chase.com", 10);

        let report = synthesizer
            .synthesize(
                &groups,
                &[],
                &default_policy(),
                &ProtectionConfig::default(),
                &mut labels,
            )
            .await;

        assert_eq!(report.created, 0);
        assert_eq!(report.skipped_protected, 1);
        assert!(gateway.created().is_empty());
    }

    #[tokio::test]
    async fn test_non_archivable_category_is_ignored() {
        let gateway = Arc::new(RuleRecordingGateway::new(vec![]));
        let synthesizer = synthesizer(Arc::clone(&gateway));
        let mut labels = empty_catalog(Arc::clone(&gateway)).await;

        let mut groups = ClassificationResult::new();
        for i in 0..10 {
            groups.insert(Category::Receipt, message(i, "orders@shop.example"));
        }

        let report = synthesizer
            .synthesize(
                &groups,
                &[],
                &default_policy(),
                &ProtectionConfig::default(),
                &mut labels,
            )
            .await;

        assert_eq!(report.candidates, 0);
        assert!(gateway.created().is_empty());
    }

    #[tokio::test]
    async fn test_service_gets_composite_rules() {
        let gateway = Arc::new(RuleRecordingGateway::new(vec![]));
        let synthesizer = synthesizer(Arc::clone(&gateway));
        let mut labels = empty_catalog(Arc::clone(&gateway)).await;
        let groups = newsletter_groups("notifications@linkedin.com", 10);

        let report = synthesizer
            .synthesize(
                &groups,
                &[],
                &default_policy(),
                &ProtectionConfig::default(),
                &mut labels,
            )
            .await;

        // Two-sided composite replaces the per-sender rule
        assert_eq!(report.created, 2);
        let created = gateway.created();
        assert_eq!(created.len(), 2);
        assert!(created
            .iter()
            .all(|r| r.criteria.from.as_deref() == Some("@linkedin.com")));

        let positive = created.iter().find(|r| r.criteria.subject.is_some()).unwrap();
        assert!(!positive.action.remove_from_inbox);

        let negative = created
            .iter()
            .find(|r| r.criteria.negated_subject.is_some())
            .unwrap();
        assert!(negative.action.remove_from_inbox);
    }

    #[tokio::test]
    async fn test_composite_rules_deduplicate() {
        let gateway = Arc::new(RuleRecordingGateway::new(vec![]));
        let synthesizer = synthesizer(Arc::clone(&gateway));
        let mut labels = empty_catalog(Arc::clone(&gateway)).await;
        let groups = newsletter_groups("notifications@linkedin.com", 10);

        let report = synthesizer
            .synthesize(
                &groups,
                &[existing_rule("@linkedin.com")],
                &default_policy(),
                &ProtectionConfig::default(),
                &mut labels,
            )
            .await;

        assert_eq!(report.created, 0);
        assert_eq!(report.skipped_existing, 1);
    }
}
