//! Response Validator
//!
//! Turns raw model text into a [`StructuredResponse`] or a [`SchemaError`].
//!
//! Validation runs in two stages:
//!
//! 1. **Strict**: the trimmed reply must be a single JSON object with exactly
//!    the fields `answer`, `confidence`, `actions` and `category`.
//! 2. **Recovery**: when the strict stage fails, balanced `{...}` substrings
//!    are tried in order of their opening brace and the first object that
//!    passes the same rules is accepted. This handles prose around the
//!    payload, code fences, wrapping arrays and stray objects ahead of it.
//!
//! Missing values are never filled in. If no candidate passes, the error is
//! the strict-stage message when the reply itself was an object, and the
//! first candidate object's message otherwise.

pub mod extract;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use tracing::{debug, warn};

use crate::error::{ParseStage, SchemaError};

/// Fields a response object must carry, and the only ones it may carry
pub const REQUIRED_FIELDS: &[&str] = &["answer", "confidence", "actions", "category"];

/// Opening braces tried by the recovery stage before giving up
pub const MAX_RECOVERY_CANDIDATES: usize = 16;

/// Model's self-assessed confidence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    High,
    Medium,
    Low,
}

impl Confidence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Confidence::High => "high",
            Confidence::Medium => "medium",
            Confidence::Low => "low",
        }
    }
}

impl FromStr for Confidence {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "high" => Ok(Confidence::High),
            "medium" => Ok(Confidence::Medium),
            "low" => Ok(Confidence::Low),
            other => Err(format!(
                "confidence must be one of [high, medium, low], got: {:?}",
                other
            )),
        }
    }
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Recommended follow-up action.
///
/// Known tags get their own variant; any other snake_case tag is kept
/// verbatim as [`ActionTag::Other`] and reported by
/// [`StructuredResponse::unrecognized_actions`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ActionTag {
    SendResponse,
    Escalate,
    EscalateToHuman,
    ProvideDocumentation,
    ReferSpecialist,
    RouteToSales,
    RequestClarification,
    CreateTicket,
    ContactHumanAgent,
    ReviewResponse,
    Other(String),
}

impl ActionTag {
    /// Every recognized tag, in the order the prompt lists them
    pub const KNOWN: &'static [&'static str] = &[
        "send_response",
        "escalate",
        "escalate_to_human",
        "provide_documentation",
        "refer_specialist",
        "route_to_sales",
        "request_clarification",
        "create_ticket",
        "contact_human_agent",
        "review_response",
    ];

    pub fn as_str(&self) -> &str {
        match self {
            ActionTag::SendResponse => "send_response",
            ActionTag::Escalate => "escalate",
            ActionTag::EscalateToHuman => "escalate_to_human",
            ActionTag::ProvideDocumentation => "provide_documentation",
            ActionTag::ReferSpecialist => "refer_specialist",
            ActionTag::RouteToSales => "route_to_sales",
            ActionTag::RequestClarification => "request_clarification",
            ActionTag::CreateTicket => "create_ticket",
            ActionTag::ContactHumanAgent => "contact_human_agent",
            ActionTag::ReviewResponse => "review_response",
            ActionTag::Other(tag) => tag,
        }
    }

    pub fn is_recognized(&self) -> bool {
        !matches!(self, ActionTag::Other(_))
    }
}

impl From<String> for ActionTag {
    fn from(tag: String) -> Self {
        match tag.as_str() {
            "send_response" => ActionTag::SendResponse,
            "escalate" => ActionTag::Escalate,
            "escalate_to_human" => ActionTag::EscalateToHuman,
            "provide_documentation" => ActionTag::ProvideDocumentation,
            "refer_specialist" => ActionTag::ReferSpecialist,
            "route_to_sales" => ActionTag::RouteToSales,
            "request_clarification" => ActionTag::RequestClarification,
            "create_ticket" => ActionTag::CreateTicket,
            "contact_human_agent" => ActionTag::ContactHumanAgent,
            "review_response" => ActionTag::ReviewResponse,
            _ => ActionTag::Other(tag),
        }
    }
}

impl From<&str> for ActionTag {
    fn from(tag: &str) -> Self {
        ActionTag::from(tag.to_string())
    }
}

impl From<ActionTag> for String {
    fn from(tag: ActionTag) -> Self {
        match tag {
            ActionTag::Other(tag) => tag,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for ActionTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A validated support response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StructuredResponse {
    /// Non-empty customer-facing answer
    pub answer: String,
    pub confidence: Confidence,
    /// Non-empty, ordered list of follow-up actions
    pub actions: Vec<ActionTag>,
    /// Non-empty topic label, e.g. `account_access`
    pub category: String,
}

impl StructuredResponse {
    /// Action tags outside the known vocabulary
    pub fn unrecognized_actions(&self) -> Vec<&str> {
        self.actions
            .iter()
            .filter(|a| !a.is_recognized())
            .map(ActionTag::as_str)
            .collect()
    }
}

/// Why strict parsing rejected a reply
#[derive(Debug, Clone, PartialEq)]
enum StrictFailure {
    /// Not a JSON object at all
    NotAnObject(String),
    /// A JSON object that breaks the schema
    Schema(String),
}

/// Validates raw model output against the response schema
#[derive(Debug, Clone)]
pub struct ResponseValidator {
    max_candidates: usize,
}

impl Default for ResponseValidator {
    fn default() -> Self {
        Self::new()
    }
}

impl ResponseValidator {
    pub fn new() -> Self {
        Self {
            max_candidates: MAX_RECOVERY_CANDIDATES,
        }
    }

    /// Limit how many opening braces recovery will try
    pub fn with_max_candidates(mut self, max_candidates: usize) -> Self {
        self.max_candidates = max_candidates;
        self
    }

    /// Validate a raw model reply, falling back to recovery when strict
    /// parsing fails
    pub fn validate(&self, raw: &str) -> Result<StructuredResponse, SchemaError> {
        let strict = match parse_strict(raw) {
            Ok(response) => return Ok(response),
            Err(failure) => failure,
        };

        debug!(failure = ?strict, "Strict parse failed, attempting recovery");

        // First candidate passing the schema wins; otherwise the first
        // object's error is reported
        let mut first_error = None;
        for candidate in extract::balanced_objects(raw, self.max_candidates) {
            let map = match serde_json::from_str::<Value>(candidate) {
                Ok(Value::Object(map)) => map,
                _ => continue,
            };
            match check_object(map) {
                Ok(response) => {
                    warn!(
                        raw_len = raw.len(),
                        "Recovered structured response from non-conforming model output"
                    );
                    return Ok(response);
                }
                Err(message) => {
                    first_error.get_or_insert(message);
                }
            }
        }

        match (first_error, strict) {
            (_, StrictFailure::Schema(message)) => {
                Err(SchemaError::new(message, ParseStage::Strict, raw))
            }
            (Some(message), StrictFailure::NotAnObject(_)) => {
                Err(SchemaError::new(message, ParseStage::Recovery, raw))
            }
            (None, StrictFailure::NotAnObject(reason)) => Err(SchemaError::new(
                format!("No JSON object found in model output ({})", reason),
                ParseStage::Recovery,
                raw,
            )),
        }
    }
}

fn parse_strict(raw: &str) -> Result<StructuredResponse, StrictFailure> {
    match serde_json::from_str::<Value>(raw.trim()) {
        Ok(Value::Object(map)) => check_object(map).map_err(StrictFailure::Schema),
        Ok(other) => Err(StrictFailure::NotAnObject(format!(
            "top-level value is {}",
            json_type(&other)
        ))),
        Err(e) => Err(StrictFailure::NotAnObject(format!("invalid JSON: {}", e))),
    }
}

/// Apply the schema rules to a parsed object
fn check_object(mut map: Map<String, Value>) -> Result<StructuredResponse, String> {
    for field in REQUIRED_FIELDS {
        if !map.contains_key(*field) {
            return Err(format!("Missing required field: {}", field));
        }
    }
    if let Some(extra) = map.keys().find(|k| !REQUIRED_FIELDS.contains(&k.as_str())) {
        return Err(format!("Unexpected field: {}", extra));
    }

    let answer = non_empty_string(map.remove("answer"), "answer")?;
    let confidence: Confidence = non_empty_string(map.remove("confidence"), "confidence")?.parse()?;
    let category = non_empty_string(map.remove("category"), "category")?;

    let raw_actions = match map.remove("actions") {
        Some(Value::Array(items)) => items,
        Some(other) => return Err(format!("actions must be an array, got {}", json_type(&other))),
        None => return Err("Missing required field: actions".to_string()),
    };
    if raw_actions.is_empty() {
        return Err("actions cannot be empty".to_string());
    }

    let mut actions = Vec::with_capacity(raw_actions.len());
    for item in raw_actions {
        let tag = match item {
            Value::String(tag) => tag,
            other => return Err(format!("each action must be a string, got {}", json_type(&other))),
        };
        if !is_snake_case(&tag) {
            return Err(format!("action should be snake_case: {:?}", tag));
        }
        actions.push(ActionTag::from(tag));
    }

    Ok(StructuredResponse {
        answer,
        confidence,
        actions,
        category,
    })
}

fn non_empty_string(value: Option<Value>, field: &str) -> Result<String, String> {
    match value {
        Some(Value::String(s)) if s.trim().is_empty() => Err(format!("{} cannot be empty", field)),
        Some(Value::String(s)) => Ok(s),
        Some(other) => Err(format!("{} must be a string, got {}", field, json_type(&other))),
        None => Err(format!("Missing required field: {}", field)),
    }
}

/// Lowercase ASCII words joined by single underscores
fn is_snake_case(tag: &str) -> bool {
    !tag.is_empty()
        && tag
            .split('_')
            .all(|word| !word.is_empty() && word.bytes().all(|b| b.is_ascii_lowercase()))
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
