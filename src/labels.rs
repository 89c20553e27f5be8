//! Idempotent label management
//!
//! Labels are identified by name, exactly one per distinct name. The catalog
//! loads the existing label set once per run into a case-insensitive cache;
//! `ensure` creates a label only when absent and otherwise returns the
//! existing id, so repeated runs never duplicate labels.

use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::Result;
use crate::gateway::MailGateway;
use crate::rate_limiter::RateLimiter;
use crate::retry::RetryPolicy;

pub struct LabelCatalog {
    gateway: Arc<dyn MailGateway>,
    limiter: RateLimiter,
    retry: RetryPolicy,
    /// lowercased name -> id
    cache: HashMap<String, String>,
    created: Vec<String>,
}

impl LabelCatalog {
    /// Load the account's labels into the cache. One listing per run; the
    /// cache is authoritative afterwards.
    pub async fn load(
        gateway: Arc<dyn MailGateway>,
        limiter: RateLimiter,
        retry: RetryPolicy,
    ) -> Result<Self> {
        limiter.wait().await;
        let labels = {
            let gateway = Arc::clone(&gateway);
            retry
                .execute("list_labels", || {
                    let gateway = Arc::clone(&gateway);
                    async move { gateway.list_labels().await }
                })
                .await?
        };

        let mut cache = HashMap::new();
        for label in &labels {
            cache.insert(label.name.to_lowercase(), label.id.clone());
        }
        info!("Loaded {} existing labels into cache", cache.len());

        Ok(Self {
            gateway,
            limiter,
            retry,
            cache,
            created: Vec::new(),
        })
    }

    /// Look up a label id by name, case-insensitive
    pub fn get(&self, name: &str) -> Option<&str> {
        self.cache.get(&name.to_lowercase()).map(String::as_str)
    }

    /// Return the id for `name`, creating the label if absent
    pub async fn ensure(&mut self, name: &str) -> Result<String> {
        if let Some(id) = self.get(name) {
            debug!("Label '{}' already exists", name);
            return Ok(id.to_string());
        }

        self.limiter.wait().await;
        let label = {
            let gateway = Arc::clone(&self.gateway);
            let name = name.to_string();
            self.retry
                .execute("create_label", move || {
                    let gateway = Arc::clone(&gateway);
                    let name = name.clone();
                    async move { gateway.create_label(&name).await }
                })
                .await?
        };

        info!("Created label '{}' with id {}", name, label.id);
        self.cache.insert(name.to_lowercase(), label.id.clone());
        self.created.push(name.to_string());
        Ok(label.id)
    }

    /// Names of labels created during this run
    pub fn created(&self) -> &[String] {
        &self.created
    }
}
