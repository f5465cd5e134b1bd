//! Safety Screen for incoming support queries
//!
//! A pure, deterministic, pattern-based pre-filter that runs before any text
//! leaves the process. The screen is an ordered list of independent
//! [`SafetyRule`]s; the first rule that fires decides the verdict, so cheap
//! and specific checks are registered ahead of expensive ones.
//!
//! Default rule order:
//!
//! 1. `empty` - empty or whitespace-only text
//! 2. `oversize` - more than `max_query_chars` characters
//! 3. `prompt_injection` - curated injection phrases
//! 4. `exfiltration` - phrases targeting internal prompts or data
//! 5. `spam` - degenerate repetition or symbol noise
//!
//! This is a best-effort heuristic, not a security boundary.

pub mod rules;
pub mod sanitize;

pub use rules::{EmptyQueryRule, OversizeRule, PatternRule, SpamRule};
pub use sanitize::sanitize_query;

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::config::SafetyConfig;
use crate::error::Result;

/// Why a query was blocked (`None` when it was allowed)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockReason {
    None,
    PromptInjection,
    Spam,
    Oversize,
    Empty,
    ExfiltrationAttempt,
}

impl BlockReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            BlockReason::None => "none",
            BlockReason::PromptInjection => "prompt_injection",
            BlockReason::Spam => "spam",
            BlockReason::Oversize => "oversize",
            BlockReason::Empty => "empty",
            BlockReason::ExfiltrationAttempt => "exfiltration_attempt",
        }
    }
}

impl fmt::Display for BlockReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Outcome of screening one query
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SafetyVerdict {
    /// Whether the query may be sent to the model
    pub allowed: bool,
    /// Block reason; `none` exactly when `allowed`
    pub reason: BlockReason,
    /// Message from the rule that fired
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl SafetyVerdict {
    pub fn allow() -> Self {
        Self {
            allowed: true,
            reason: BlockReason::None,
            detail: None,
        }
    }

    pub fn block(reason: BlockReason, detail: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason,
            detail: Some(detail.into()),
        }
    }

    pub fn is_blocked(&self) -> bool {
        !self.allowed
    }
}

impl fmt::Display for SafetyVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.detail {
            Some(detail) => write!(f, "{}: {}", self.reason, detail),
            None => write!(f, "{}", self.reason),
        }
    }
}

/// A single screening predicate.
///
/// Rules must be pure and must not panic on any input.
pub trait SafetyRule: Send + Sync {
    /// Rule identifier
    fn id(&self) -> &str;

    /// Reason reported when this rule fires
    fn reason(&self) -> BlockReason;

    /// Returns a detail message when the text violates this rule
    fn check(&self, text: &str) -> Option<String>;
}

/// Ordered collection of safety rules
pub struct SafetyScreen {
    rules: Vec<Box<dyn SafetyRule>>,
}

impl SafetyScreen {
    /// Build the default rule chain from configuration.
    ///
    /// Fails only when a configured extra pattern is not a valid regex.
    pub fn new(config: &SafetyConfig) -> Result<Self> {
        let mut screen = Self::empty();
        screen.register(Box::new(EmptyQueryRule));
        screen.register(Box::new(OversizeRule::new(config.max_query_chars)));
        screen.register(Box::new(PatternRule::prompt_injection(
            &config.extra_injection_patterns,
        )?));
        screen.register(Box::new(PatternRule::exfiltration(
            &config.extra_exfiltration_patterns,
        )?));
        screen.register(Box::new(SpamRule::from_config(config)));
        Ok(screen)
    }

    /// Screen with no rules; allows everything
    pub fn empty() -> Self {
        Self { rules: Vec::new() }
    }

    /// Append a rule to the end of the chain
    pub fn register(&mut self, rule: Box<dyn SafetyRule>) {
        self.rules.push(rule);
    }

    /// Registered rules, in evaluation order
    pub fn rules(&self) -> &[Box<dyn SafetyRule>] {
        &self.rules
    }

    /// Screen a query. First matching rule wins.
    pub fn screen(&self, text: &str) -> SafetyVerdict {
        self.rules
            .iter()
            .find_map(|rule| {
                rule.check(text)
                    .map(|detail| SafetyVerdict::block(rule.reason(), detail))
            })
            .unwrap_or_else(SafetyVerdict::allow)
    }
}
