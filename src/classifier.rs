//! Precedence-ordered message classification
//!
//! Classification is deterministic, total, and side-effect free: every
//! message resolves to exactly one [`Category`] by a fixed first-match-wins
//! precedence. Protection checks (VIP sender, protected sender/keyword/
//! domain) are evaluated before any heuristic pattern, so a protected sender
//! is never routed to an archivable category regardless of how spam-like its
//! subject looks — this includes protected domains that would also match a
//! broad automated-sender token.

use crate::config::ProtectionConfig;
use crate::models::{domain_of, Category, MessageMetadata};
use once_cell::sync::Lazy;
use regex::Regex;

/// Tokens marking an automated sender address
static AUTOMATED_TOKENS: &[&str] = &[
    "noreply",
    "no-reply",
    "donotreply",
    "automated",
    "notification",
    "alert",
    "system",
];

/// Bulk-mailer domains whose traffic is transactional
static TRANSACTIONAL_DOMAINS: &[&str] = &[
    "amazonses.com",
    "sendgrid.net",
    "mailgun.org",
    "sparkpostmail.com",
    "mandrillapp.com",
    "postmarkapp.com",
];

static SUBJECT_PATTERNS: Lazy<SubjectPatterns> = Lazy::new(|| SubjectPatterns {
    newsletter: Regex::new(
        r"(?i)(newsletter|weekly digest|daily digest|update from|news from)",
    )
    .unwrap(),

    receipt: Regex::new(
        r"(?i)(receipt|payment|invoice|charged|your purchase|shipped|delivered)",
    )
    .unwrap(),

    confirmation: Regex::new(
        r"(?i)(confirmation|confirmed|appointment|reservation|scheduled|registration)",
    )
    .unwrap(),
});

struct SubjectPatterns {
    newsletter: Regex,
    receipt: Regex,
    confirmation: Regex,
}

/// Provider taxonomy tags mapped to their categories
static TAXONOMY_TAGS: &[(&str, Category)] = &[
    ("CATEGORY_PROMOTIONS", Category::Promotional),
    ("CATEGORY_SOCIAL", Category::Social),
    ("CATEGORY_FORUMS", Category::Forums),
];

/// Rule-based message classifier
pub struct Classifier;

impl Classifier {
    pub fn new() -> Self {
        Self
    }

    /// Assign exactly one category by fixed precedence, first match wins:
    ///
    /// 1. VIP sender (exact address match)
    /// 2. Protected sender, keyword, or domain
    /// 3. Subscription-list headers
    /// 4. Provider taxonomy tag (promotions/social/forums)
    /// 5. Automated-sender address token
    /// 6. Newsletter subject pattern
    /// 7. Receipt subject pattern or transactional sender domain
    /// 8. Confirmation subject pattern
    /// 9. Unknown
    pub fn classify(&self, message: &MessageMetadata, protection: &ProtectionConfig) -> Category {
        let from = message.from_email.as_str();

        if protection.is_vip(from) {
            return Category::Vip;
        }

        if self.is_protected(message, protection) {
            return Category::Protected;
        }

        if message.has_list_headers {
            return Category::Newsletter;
        }

        if let Some(category) = self.taxonomy_category(message) {
            return category;
        }

        if AUTOMATED_TOKENS.iter().any(|token| from.contains(token)) {
            return Category::Automated;
        }

        if SUBJECT_PATTERNS.newsletter.is_match(&message.subject) {
            return Category::Newsletter;
        }

        if SUBJECT_PATTERNS.receipt.is_match(&message.subject)
            || self.is_transactional_domain(&message.sender_domain)
        {
            return Category::Receipt;
        }

        if SUBJECT_PATTERNS.confirmation.is_match(&message.subject) {
            return Category::Confirmation;
        }

        Category::Unknown
    }

    /// Protected sender, protected keyword in the subject, or protected
    /// domain (exact or subdomain)
    fn is_protected(&self, message: &MessageMetadata, protection: &ProtectionConfig) -> bool {
        if protection.is_protected_sender(&message.from_email) {
            return true;
        }

        let subject = message.subject.to_lowercase();
        if protection
            .protected_keywords
            .iter()
            .any(|keyword| subject.contains(keyword.as_str()))
        {
            return true;
        }

        protection
            .protected_domain_patterns()
            .any(|pattern| domain_matches(&message.from_email, pattern))
    }

    fn taxonomy_category(&self, message: &MessageMetadata) -> Option<Category> {
        for (tag, category) in TAXONOMY_TAGS {
            if message.provider_labels.iter().any(|l| l == tag) {
                return Some(*category);
            }
        }
        None
    }

    fn is_transactional_domain(&self, sender_domain: &str) -> bool {
        TRANSACTIONAL_DOMAINS
            .iter()
            .any(|d| sender_domain == *d || sender_domain.ends_with(&format!(".{}", d)))
    }
}

impl Default for Classifier {
    fn default() -> Self {
        Self::new()
    }
}

/// Domain-suffix matcher for protected-domain patterns.
///
/// - `p` without `@`: the email's domain must equal `p` or end with `".p"`.
/// - `p` starting with `@`: strip it, then the same suffix rule.
/// - otherwise `p` is a full address: match when the domains are equal or
///   the full normalized addresses are equal.
pub fn domain_matches(email: &str, pattern: &str) -> bool {
    let email = email.trim().to_lowercase();
    let pattern = pattern.trim().to_lowercase();
    let email_domain = domain_of(&email);

    let suffix_match = |target: &str| {
        email_domain == target || email_domain.ends_with(&format!(".{}", target))
    };

    if !pattern.contains('@') {
        return suffix_match(&pattern);
    }

    if let Some(stripped) = pattern.strip_prefix('@') {
        return suffix_match(stripped);
    }

    email_domain == domain_of(&pattern) || email == pattern
}
