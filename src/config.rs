use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

use crate::error::{Result, TriageError};
use crate::models::Category;

/// Protected domains that ship with the engine. User configuration extends
/// this list, never replaces it.
pub const BUILT_IN_PROTECTED_DOMAINS: &[&str] = &[
    "chase.com",
    "bankofamerica.com",
    "wellsfargo.com",
    "fidelity.com",
    "vanguard.com",
    "irs.gov",
    "ssa.gov",
    "healthcare.gov",
];

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub scan: ScanConfig,
    #[serde(default)]
    pub protection: ProtectionConfig,
    #[serde(default)]
    pub rules: RuleConfig,
    #[serde(default)]
    pub execution: ExecutionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanConfig {
    /// Page size for message listing
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    /// Upper bound on messages processed in one run
    #[serde(default = "default_max_messages")]
    pub max_messages_per_run: usize,
    /// Concurrent metadata fetches (all serialized through one rate limiter)
    #[serde(default = "default_fetch_fan_out")]
    pub fetch_fan_out: usize,
    /// Outbound request rate shared by every provider call in the run
    #[serde(default = "default_requests_per_second")]
    pub requests_per_second: u32,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            max_messages_per_run: default_max_messages(),
            fetch_fan_out: default_fetch_fan_out(),
            requests_per_second: default_requests_per_second(),
        }
    }
}

/// Senders, domains, and keywords that must never be auto-archived.
/// All matching is case-insensitive; entries are normalized at load time.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProtectionConfig {
    #[serde(default)]
    pub vip_senders: Vec<String>,
    #[serde(default)]
    pub protected_senders: Vec<String>,
    #[serde(default)]
    pub protected_keywords: Vec<String>,
    /// User extensions to [`BUILT_IN_PROTECTED_DOMAINS`]
    #[serde(default)]
    pub protected_domains: Vec<String>,
}

impl ProtectionConfig {
    /// Normalize all entries to lowercase trimmed form.
    pub fn normalize(&mut self) {
        for list in [
            &mut self.vip_senders,
            &mut self.protected_senders,
            &mut self.protected_keywords,
            &mut self.protected_domains,
        ] {
            for entry in list.iter_mut() {
                *entry = entry.trim().to_lowercase();
            }
            list.retain(|e| !e.is_empty());
        }
    }

    pub fn is_vip(&self, from_email: &str) -> bool {
        self.vip_senders.iter().any(|v| v == from_email)
    }

    pub fn is_protected_sender(&self, from_email: &str) -> bool {
        self.protected_senders.iter().any(|s| s == from_email)
    }

    /// Built-in protected domains followed by user extensions.
    pub fn protected_domain_patterns(&self) -> impl Iterator<Item = &str> {
        BUILT_IN_PROTECTED_DOMAINS
            .iter()
            .copied()
            .chain(self.protected_domains.iter().map(String::as_str))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleConfig {
    /// A category must exceed this many messages in a run before its senders
    /// become rule candidates
    #[serde(default = "default_min_category_total")]
    pub min_category_total: usize,
    /// Minimum per-sender message frequency for a rule candidate
    #[serde(default = "default_min_sender_frequency")]
    pub min_sender_frequency: usize,
    /// Categories whose messages are archived (inbox marker removed)
    #[serde(default = "default_auto_archive_categories")]
    pub auto_archive_categories: Vec<String>,
}

impl Default for RuleConfig {
    fn default() -> Self {
        Self {
            min_category_total: default_min_category_total(),
            min_sender_frequency: default_min_sender_frequency(),
            auto_archive_categories: default_auto_archive_categories(),
        }
    }
}

impl RuleConfig {
    /// Archive decisions per category. Categories absent from the configured
    /// list keep the inbox; protection categories always keep it.
    pub fn archive_policy(&self) -> Result<HashMap<Category, bool>> {
        let mut archived = Vec::with_capacity(self.auto_archive_categories.len());
        for name in &self.auto_archive_categories {
            let category: Category = name.parse()?;
            if matches!(category, Category::Vip | Category::Protected) {
                return Err(TriageError::Config(format!(
                    "category '{}' can never be auto-archived",
                    category
                )));
            }
            archived.push(category);
        }

        Ok(Category::ALL
            .iter()
            .map(|c| (*c, archived.contains(c)))
            .collect())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Classify and summarize only; skip mutation, synthesis, and the
    /// checkpoint write
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            dry_run: false,
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
        }
    }
}

fn default_page_size() -> u32 {
    100
}

fn default_max_messages() -> usize {
    500
}

fn default_fetch_fan_out() -> usize {
    8
}

fn default_requests_per_second() -> u32 {
    5
}

fn default_min_category_total() -> usize {
    5
}

fn default_min_sender_frequency() -> usize {
    3
}

fn default_auto_archive_categories() -> Vec<String> {
    Category::ALL
        .iter()
        .filter(|c| c.archives_by_default())
        .map(|c| c.as_str().to_string())
        .collect()
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    1000
}

/// Split a delimited configuration list ("a, b; c") into trimmed lowercase
/// entries. Accepts commas, semicolons, and newlines.
pub fn parse_delimited(input: &str) -> Vec<String> {
    input
        .split(|c| c == ',' || c == ';' || c == '\n')
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}

impl Config {
    pub async fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::warn!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| TriageError::Config(format!("Failed to read config file: {}", e)))?;

        let mut config: Self = toml::from_str(&content)
            .map_err(|e| TriageError::Config(format!("Failed to parse config file: {}", e)))?;

        config.protection.normalize();
        config.validate()?;

        tracing::info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    pub async fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                TriageError::Config(format!("Failed to create config directory: {}", e))
            })?;
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| TriageError::Config(format!("Failed to serialize config: {}", e)))?;

        tokio::fs::write(path, content)
            .await
            .map_err(|e| TriageError::Config(format!("Failed to write config file: {}", e)))?;

        tracing::info!("Saved configuration to {:?}", path);
        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.scan.page_size == 0 || self.scan.page_size > 500 {
            return Err(TriageError::Config(
                "scan.page_size must be between 1 and 500".to_string(),
            ));
        }

        if self.scan.max_messages_per_run == 0 {
            return Err(TriageError::Config(
                "scan.max_messages_per_run must be at least 1".to_string(),
            ));
        }

        if self.scan.fetch_fan_out == 0 || self.scan.fetch_fan_out > 16 {
            return Err(TriageError::Config(
                "scan.fetch_fan_out must be between 1 and 16".to_string(),
            ));
        }

        if self.scan.requests_per_second == 0 || self.scan.requests_per_second > 50 {
            return Err(TriageError::Config(
                "scan.requests_per_second must be between 1 and 50".to_string(),
            ));
        }

        if self.rules.min_sender_frequency == 0 {
            return Err(TriageError::Config(
                "rules.min_sender_frequency must be at least 1".to_string(),
            ));
        }

        // Surfaces unknown category names and protected categories early
        self.rules.archive_policy()?;

        tracing::debug!("Configuration validation passed");
        Ok(())
    }
}
