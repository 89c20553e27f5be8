//! Core data structures shared across the triage pipeline

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{Result, TriageError};

/// Provider label marking a message as present in the inbox.
pub const INBOX_LABEL: &str = "INBOX";

/// Immutable snapshot of one message's metadata for a single pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageMetadata {
    pub id: String,
    /// Raw `From:` header value as received
    pub from_raw: String,
    /// Normalized (lowercased, angle-bracket stripped) sender address
    pub from_email: String,
    pub sender_domain: String,
    pub subject: String,
    pub arrival_date: DateTime<Utc>,
    pub provider_labels: Vec<String>,
    /// Message carried a List-Unsubscribe or List-Id header
    pub has_list_headers: bool,
}

impl MessageMetadata {
    /// Build a metadata snapshot from a raw header map and provider labels.
    ///
    /// Missing From is an error; a missing Subject or unparseable Date
    /// degrades to empty/now rather than dropping the message.
    pub fn from_headers(
        id: String,
        headers: &HashMap<String, String>,
        provider_labels: Vec<String>,
    ) -> Result<Self> {
        let mut from_raw = String::new();
        let mut subject = String::new();
        let mut date_str = String::new();
        let mut has_list_headers = false;

        for (name, value) in headers {
            match name.to_lowercase().as_str() {
                "from" => from_raw = value.clone(),
                "subject" => subject = value.clone(),
                "date" => date_str = value.clone(),
                "list-unsubscribe" | "list-id" => has_list_headers = true,
                _ => {}
            }
        }

        if from_raw.is_empty() {
            return Err(TriageError::InvalidMessage(format!(
                "message {} has no From header",
                id
            )));
        }

        let from_email = extract_address(&from_raw);
        let sender_domain = domain_of(&from_email).to_string();
        let arrival_date = parse_date(&date_str).unwrap_or_else(|_| Utc::now());

        Ok(Self {
            id,
            from_raw,
            from_email,
            sender_domain,
            subject,
            arrival_date,
            provider_labels,
            has_list_headers,
        })
    }
}

/// Closed category enumeration; exactly one per message per pass.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Vip,
    Protected,
    Newsletter,
    Promotional,
    Social,
    Forums,
    Automated,
    Receipt,
    Confirmation,
    Unknown,
}

impl Category {
    /// All categories in precedence order.
    pub const ALL: [Category; 10] = [
        Category::Vip,
        Category::Protected,
        Category::Newsletter,
        Category::Promotional,
        Category::Social,
        Category::Forums,
        Category::Automated,
        Category::Receipt,
        Category::Confirmation,
        Category::Unknown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Vip => "vip",
            Category::Protected => "protected",
            Category::Newsletter => "newsletter",
            Category::Promotional => "promotional",
            Category::Social => "social",
            Category::Forums => "forums",
            Category::Automated => "automated",
            Category::Receipt => "receipt",
            Category::Confirmation => "confirmation",
            Category::Unknown => "unknown",
        }
    }

    /// Destination label applied to existing messages and used as the target
    /// of synthesized rules. `Protected` and `Unknown` receive no label and
    /// therefore no actions.
    pub fn label_name(&self) -> Option<&'static str> {
        match self {
            Category::Vip => Some("VIP"),
            Category::Protected => None,
            Category::Newsletter => Some("Filtered/Newsletters"),
            Category::Promotional => Some("Filtered/Promotions"),
            Category::Social => Some("Filtered/Social"),
            Category::Forums => Some("Filtered/Forums"),
            Category::Automated => Some("Filtered/Automated"),
            Category::Receipt => Some("Filtered/Receipts"),
            Category::Confirmation => Some("Filtered/Confirmations"),
            Category::Unknown => None,
        }
    }

    /// Built-in archive default. Receipts and confirmations keep the inbox;
    /// protection categories always keep the inbox.
    pub fn archives_by_default(&self) -> bool {
        matches!(
            self,
            Category::Newsletter
                | Category::Promotional
                | Category::Social
                | Category::Forums
                | Category::Automated
        )
    }
}

impl std::str::FromStr for Category {
    type Err = TriageError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "vip" => Ok(Category::Vip),
            "protected" => Ok(Category::Protected),
            "newsletter" => Ok(Category::Newsletter),
            "promotional" => Ok(Category::Promotional),
            "social" => Ok(Category::Social),
            "forums" => Ok(Category::Forums),
            "automated" => Ok(Category::Automated),
            "receipt" => Ok(Category::Receipt),
            "confirmation" => Ok(Category::Confirmation),
            "unknown" => Ok(Category::Unknown),
            other => Err(TriageError::Config(format!("unknown category '{}'", other))),
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of classifying one batch: every input message lands in exactly one
/// category group. Built by folding classifier output; owned by the
/// orchestrator and passed by reference downstream.
#[derive(Debug, Clone, Default)]
pub struct ClassificationResult {
    groups: HashMap<Category, Vec<MessageMetadata>>,
    total: usize,
}

impl ClassificationResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, category: Category, message: MessageMetadata) {
        self.groups.entry(category).or_default().push(message);
        self.total += 1;
    }

    pub fn group(&self, category: Category) -> &[MessageMetadata] {
        self.groups.get(&category).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn count(&self, category: Category) -> usize {
        self.group(category).len()
    }

    /// Total messages across all groups; equals the number of inserts.
    pub fn total(&self) -> usize {
        self.total
    }

    pub fn is_empty(&self) -> bool {
        self.total == 0
    }

    /// Per-category counts in precedence order, omitting empty groups.
    pub fn category_counts(&self) -> Vec<(Category, usize)> {
        Category::ALL
            .iter()
            .filter_map(|c| {
                let n = self.count(*c);
                (n > 0).then_some((*c, n))
            })
            .collect()
    }

    /// Message frequency per normalized sender within one category group.
    pub fn sender_frequencies(&self, category: Category) -> HashMap<String, usize> {
        let mut frequencies: HashMap<String, usize> = HashMap::new();
        for message in self.group(category) {
            *frequencies.entry(message.from_email.clone()).or_default() += 1;
        }
        frequencies
    }
}

/// Match criteria of a persistent provider-side rule.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleCriteria {
    /// Sender pattern: a full address or an `@domain` form
    pub from: Option<String>,
    /// Subject terms the message must contain
    pub subject: Option<String>,
    /// Subject terms the message must NOT contain
    pub negated_subject: Option<String>,
}

/// Action of a persistent provider-side rule.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleAction {
    pub add_label_ids: Vec<String>,
    pub remove_from_inbox: bool,
}

/// A rule to be created on the provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterRule {
    pub criteria: RuleCriteria,
    pub action: RuleAction,
}

/// Label info returned from the provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelInfo {
    pub id: String,
    pub name: String,
}

/// Extract and normalize the address part of a `From:` header.
///
/// Handles both `Name <email@example.com>` and bare-address forms.
pub fn extract_address(header: &str) -> String {
    let candidate = match (header.find('<'), header.find('>')) {
        (Some(start), Some(end)) if start < end => &header[start + 1..end],
        _ => header,
    };
    candidate.trim().trim_matches('"').to_lowercase()
}

/// Domain part of a normalized address, empty when there is none.
pub fn domain_of(email: &str) -> &str {
    email.rsplit_once('@').map(|(_, d)| d).unwrap_or("")
}

/// Parse an RFC 2822 date string, falling back to RFC 3339.
pub fn parse_date(date_str: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(date_str)
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|_| DateTime::parse_from_rfc3339(date_str).map(|dt| dt.with_timezone(&Utc)))
        .map_err(|e| TriageError::InvalidMessage(format!("invalid date format: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(id: &str, from: &str) -> MessageMetadata {
        MessageMetadata {
            id: id.to_string(),
            from_raw: from.to_string(),
            from_email: from.to_lowercase(),
            sender_domain: domain_of(from).to_string(),
            subject: "subject".to_string(),
            arrival_date: Utc::now(),
            provider_labels: vec![INBOX_LABEL.to_string()],
            has_list_headers: false,
        }
    }

    #[test]
    fn test_extract_address() {
        assert_eq!(
            extract_address("John Doe <John@Example.com>"),
            "john@example.com"
        );
        assert_eq!(
            extract_address("\"Jane Smith\" <jane@example.com>"),
            "jane@example.com"
        );
        assert_eq!(extract_address("plain@example.com"), "plain@example.com");
    }

    #[test]
    fn test_domain_of() {
        assert_eq!(domain_of("user@example.com"), "example.com");
        assert_eq!(domain_of("no-at-sign"), "");
    }

    #[test]
    fn test_parse_date() {
        assert!(parse_date("Mon, 24 Nov 2025 10:30:00 +0000").is_ok());
        assert!(parse_date("2025-11-24T10:30:00Z").is_ok());
        assert!(parse_date("not a date").is_err());
    }

    #[test]
    fn test_from_headers() {
        let mut headers = HashMap::new();
        headers.insert("From".to_string(), "News <NEWS@Example.com>".to_string());
        headers.insert("Subject".to_string(), "Weekly digest".to_string());
        headers.insert(
            "Date".to_string(),
            "Mon, 24 Nov 2025 10:30:00 +0000".to_string(),
        );
        headers.insert("List-Unsubscribe".to_string(), "<mailto:u@x>".to_string());

        let meta = MessageMetadata::from_headers(
            "m1".to_string(),
            &headers,
            vec![INBOX_LABEL.to_string()],
        )
        .unwrap();

        assert_eq!(meta.from_email, "news@example.com");
        assert_eq!(meta.sender_domain, "example.com");
        assert_eq!(meta.subject, "Weekly digest");
        assert!(meta.has_list_headers);
    }

    #[test]
    fn test_from_headers_missing_from() {
        let headers = HashMap::new();
        let result = MessageMetadata::from_headers("m1".to_string(), &headers, vec![]);
        assert!(result.is_err());
    }

    #[test]
    fn test_classification_result_invariants() {
        let mut result = ClassificationResult::new();
        result.insert(Category::Newsletter, message("1", "a@x.com"));
        result.insert(Category::Newsletter, message("2", "a@x.com"));
        result.insert(Category::Receipt, message("3", "b@y.com"));

        assert_eq!(result.total(), 3);
        let sum: usize = result.category_counts().iter().map(|(_, n)| n).sum();
        assert_eq!(sum, result.total());

        let freqs = result.sender_frequencies(Category::Newsletter);
        assert_eq!(freqs.get("a@x.com"), Some(&2));
    }

    #[test]
    fn test_category_label_names() {
        assert_eq!(
            Category::Newsletter.label_name(),
            Some("Filtered/Newsletters")
        );
        assert_eq!(Category::Protected.label_name(), None);
        assert_eq!(Category::Unknown.label_name(), None);
    }

    #[test]
    fn test_category_round_trip() {
        for category in Category::ALL {
            let parsed: Category = category.as_str().parse().unwrap();
            assert_eq!(parsed, category);
        }
        assert!("bogus".parse::<Category>().is_err());
    }
}
