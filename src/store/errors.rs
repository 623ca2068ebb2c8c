//! Error normalization applied at the store boundary.
//!
//! An [`ApiError`] is classified from its shape first: no response is
//! `Network`, and a 401, 404 or 409 status maps straight to its category.
//! Anything else falls back to the message text, matched against an ordered
//! table of rules evaluated top to bottom; the first rule whose markers
//! appear in the message (case-insensitive) wins. The category's
//! presentation string replaces the raw message. Unmatched errors pass
//! through unchanged.
//!
//! The mapping is cosmetic. Stores decide success or failure from the
//! transport's `Result`, never from the mapped text.

use std::fmt;

use crate::api::ApiError;
use crate::config::ErrorMessagesConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// No response from the server
    Network,
    /// Missing, invalid or expired credentials
    Unauthorized,
    /// Name already taken or the resource is in the wrong state
    Conflict,
    NotFound,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Network => "network",
            ErrorCategory::Unauthorized => "unauthorized",
            ErrorCategory::Conflict => "conflict",
            ErrorCategory::NotFound => "not_found",
        }
    }

    fn markers(&self) -> &'static [&'static str] {
        match self {
            ErrorCategory::Network => &[
                "network error",
                "error sending request",
                "connection refused",
                "failed to fetch",
                "timed out",
                "dns error",
            ],
            ErrorCategory::Unauthorized => &[
                "http 401",
                "401 unauthorized",
                "invalid username or password",
                "invalid or expired token",
                "unauthorized",
            ],
            ErrorCategory::Conflict => &[
                "already exists",
                "setup already completed",
                "already running",
                "not running",
            ],
            ErrorCategory::NotFound => &["not found"],
        }
    }

    fn default_message(&self) -> &'static str {
        match self {
            ErrorCategory::Network => "Cannot reach the server. Check your connection.",
            ErrorCategory::Unauthorized => "Invalid credentials or expired session.",
            ErrorCategory::Conflict => "That conflicts with the current state on the server.",
            ErrorCategory::NotFound => "That resource no longer exists.",
        }
    }
}

/// Category implied by the error itself, before looking at its text
fn category_of(err: &ApiError) -> Option<ErrorCategory> {
    if err.is_network() {
        return Some(ErrorCategory::Network);
    }
    if err.is_unauthorized() {
        return Some(ErrorCategory::Unauthorized);
    }
    match err.status() {
        Some(404) => Some(ErrorCategory::NotFound),
        Some(409) => Some(ErrorCategory::Conflict),
        _ => None,
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
struct Rule {
    category: ErrorCategory,
    message: String,
}

impl Rule {
    fn matches(&self, lowered: &str) -> bool {
        self.category
            .markers()
            .iter()
            .any(|marker| lowered.contains(marker))
    }
}

#[derive(Debug, Clone)]
pub struct ErrorPolicy {
    rules: Vec<Rule>,
}

impl ErrorPolicy {
    /// Default table, evaluated in this order
    pub fn new() -> Self {
        let rules = [
            ErrorCategory::Network,
            ErrorCategory::Unauthorized,
            ErrorCategory::Conflict,
            ErrorCategory::NotFound,
        ]
        .into_iter()
        .map(|category| Rule {
            category,
            message: category.default_message().to_string(),
        })
        .collect();

        Self { rules }
    }

    /// Default table with presentation strings overridden from configuration
    pub fn from_config(config: &ErrorMessagesConfig) -> Self {
        let overrides = [
            (ErrorCategory::Network, &config.network),
            (ErrorCategory::Unauthorized, &config.unauthorized),
            (ErrorCategory::Conflict, &config.conflict),
            (ErrorCategory::NotFound, &config.not_found),
        ];

        overrides
            .into_iter()
            .fold(Self::new(), |policy, (category, message)| match message {
                Some(message) => policy.with_message(category, message.clone()),
                None => policy,
            })
    }

    pub fn with_message(mut self, category: ErrorCategory, message: impl Into<String>) -> Self {
        let message = message.into();
        for rule in self.rules.iter_mut().filter(|r| r.category == category) {
            rule.message = message.clone();
        }
        self
    }

    /// Category of a failed request, if any
    pub fn classify(&self, err: &ApiError) -> Option<ErrorCategory> {
        category_of(err).or_else(|| self.classify_message(&err.to_string()))
    }

    /// Presentation string for a failed request
    pub fn present(&self, err: &ApiError) -> String {
        match self.classify(err) {
            Some(category) => self.message_for(category).to_string(),
            None => err.to_string(),
        }
    }

    /// First category whose markers appear in a free-text message
    pub fn classify_message(&self, raw: &str) -> Option<ErrorCategory> {
        let lowered = raw.to_lowercase();
        self.rules
            .iter()
            .find(|rule| rule.matches(&lowered))
            .map(|rule| rule.category)
    }

    /// Presentation string for a free-text message
    pub fn present_message(&self, raw: &str) -> String {
        match self.classify_message(raw) {
            Some(category) => self.message_for(category).to_string(),
            None => raw.to_string(),
        }
    }

    fn message_for(&self, category: ErrorCategory) -> &str {
        self.rules
            .iter()
            .find(|rule| rule.category == category)
            .map(|rule| rule.message.as_str())
            .unwrap_or_else(|| category.default_message())
    }
}

impl Default for ErrorPolicy {
    fn default() -> Self {
        Self::new()
    }
}
