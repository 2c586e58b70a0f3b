//! Option identity for choice questions.
//!
//! An option has a stable machine `key` and a mutable human `label`. Submissions
//! store keys; anything shown to people is rendered through the current labels.
//! Raw option input arrives either as plain labels or as structured records and is
//! parsed once, at the boundary, into [`OptionInput`].

use crate::core::error::{self, FormkitError};
use crate::core::time;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

pub const KEY_PREFIX: &str = "opt";
pub const KEY_MAX_LEN: usize = 100;
pub const SLUG_MAX_LEN: usize = 30;
pub const DIGEST_LEN: usize = 8;

static OPTION_KEY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]+$").expect("static regex"));
static SLUG_SEPARATOR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^a-z0-9]+").expect("static regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuestionType {
    Text,
    Textarea,
    Email,
    Number,
    Date,
    Rating,
    Boolean,
    Select,
    Multiselect,
    Radio,
    Checkbox,
}

impl QuestionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuestionType::Text => "text",
            QuestionType::Textarea => "textarea",
            QuestionType::Email => "email",
            QuestionType::Number => "number",
            QuestionType::Date => "date",
            QuestionType::Rating => "rating",
            QuestionType::Boolean => "boolean",
            QuestionType::Select => "select",
            QuestionType::Multiselect => "multiselect",
            QuestionType::Radio => "radio",
            QuestionType::Checkbox => "checkbox",
        }
    }

    /// Only choice questions carry options.
    pub fn requires_options(&self) -> bool {
        matches!(
            self,
            QuestionType::Select
                | QuestionType::Multiselect
                | QuestionType::Radio
                | QuestionType::Checkbox
        )
    }

    /// Multi-valued types store a set of keys.
    pub fn is_multi_valued(&self) -> bool {
        matches!(self, QuestionType::Multiselect | QuestionType::Checkbox)
    }
}

impl fmt::Display for QuestionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QuestionType {
    type Err = FormkitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(QuestionType::Text),
            "textarea" => Ok(QuestionType::Textarea),
            "email" => Ok(QuestionType::Email),
            "number" => Ok(QuestionType::Number),
            "date" => Ok(QuestionType::Date),
            "rating" => Ok(QuestionType::Rating),
            "boolean" => Ok(QuestionType::Boolean),
            "select" => Ok(QuestionType::Select),
            "multiselect" => Ok(QuestionType::Multiselect),
            "radio" => Ok(QuestionType::Radio),
            "checkbox" => Ok(QuestionType::Checkbox),
            other => Err(FormkitError::validation(format!(
                "unknown question type '{other}'"
            ))),
        }
    }
}

/// Persisted option shape: `{key, label, order, metadata, disabled, createdAt}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionOption {
    pub key: String,
    pub label: String,
    pub order: u32,
    #[serde(default = "empty_metadata")]
    pub metadata: Value,
    #[serde(default)]
    pub disabled: bool,
    pub created_at: String,
}

/// One entry of caller-supplied option input, before validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawOption {
    Label(String),
    Structured(StructuredOption),
}

impl From<&str> for RawOption {
    fn from(label: &str) -> Self {
        RawOption::Label(label.to_string())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StructuredOption {
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub order: Option<u32>,
    #[serde(default)]
    pub metadata: Option<Value>,
    #[serde(default)]
    pub disabled: bool,
    #[serde(default)]
    pub created_at: Option<String>,
}

impl StructuredOption {
    pub fn new(key: &str, label: &str) -> Self {
        Self {
            key: Some(key.to_string()),
            label: Some(label.to_string()),
            ..Self::default()
        }
    }
}

/// Option input after the shape check. Mixed input never gets this far.
#[derive(Debug, Clone, PartialEq)]
pub enum OptionInput {
    Labels(Vec<String>),
    Structured(Vec<StructuredOption>),
}

impl OptionInput {
    pub fn parse(raw: &[RawOption]) -> Result<Self, FormkitError> {
        let labels = raw
            .iter()
            .filter(|r| matches!(r, RawOption::Label(_)))
            .count();
        if labels == raw.len() {
            return Ok(OptionInput::Labels(
                raw.iter()
                    .filter_map(|r| match r {
                        RawOption::Label(label) => Some(label.trim().to_string()),
                        RawOption::Structured(_) => None,
                    })
                    .collect(),
            ));
        }
        if labels == 0 {
            return Ok(OptionInput::Structured(
                raw.iter()
                    .filter_map(|r| match r {
                        RawOption::Structured(entry) => Some(entry.clone()),
                        RawOption::Label(_) => None,
                    })
                    .collect(),
            ));
        }
        Err(FormkitError::validation(
            "options must be either all plain labels or all {key, label} objects",
        ))
    }
}

fn empty_metadata() -> Value {
    Value::Object(Map::new())
}

/// Lowercase, collapse non-alphanumeric runs to `_`, trim, truncate.
pub fn slugify(label: &str) -> String {
    let lowered = label.to_lowercase();
    let collapsed = SLUG_SEPARATOR_RE.replace_all(&lowered, "_");
    let trimmed = collapsed.trim_matches('_');
    let truncated: String = trimmed.chars().take(SLUG_MAX_LEN).collect();
    truncated.trim_end_matches('_').to_string()
}

fn short_digest(seed: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(seed.as_bytes());
    let hex = format!("{:x}", hasher.finalize());
    hex[..DIGEST_LEN].to_string()
}

fn key_seed(label: &str, owner_id: Option<&str>, index: usize) -> String {
    match owner_id {
        Some(owner) => format!("{owner}:{label}:{index}"),
        None => format!("{}:{label}:{index}", time::now_nanos()),
    }
}

fn key_from_seed(label: &str, seed: &str) -> String {
    let slug = slugify(label);
    let slug = if slug.is_empty() { "option" } else { slug.as_str() };
    format!("{KEY_PREFIX}_{slug}_{}", short_digest(seed))
}

/// `opt_<slug>_<digest>`. Reproducible for a fixed owner, label and index.
pub fn generate_option_key(label: &str, owner_id: Option<&str>, index: usize) -> String {
    key_from_seed(label, &key_seed(label, owner_id, index))
}

/// Generated key guaranteed not to collide with `used`.
fn unique_option_key(
    label: &str,
    owner_id: Option<&str>,
    index: usize,
    used: &HashSet<String>,
) -> String {
    let seed = key_seed(label, owner_id, index);
    let mut key = key_from_seed(label, &seed);
    let mut attempt = 1u32;
    while used.contains(&key) {
        key = key_from_seed(label, &format!("{seed}#{attempt}"));
        attempt += 1;
    }
    key
}

/// Trim and check charset and length.
pub fn sanitize_key(raw: &str) -> Result<String, String> {
    let key = raw.trim();
    if key.is_empty() {
        return Err("option key must not be empty".to_string());
    }
    if key.len() > KEY_MAX_LEN {
        return Err(format!(
            "option key '{key}' exceeds {KEY_MAX_LEN} characters"
        ));
    }
    if !OPTION_KEY_RE.is_match(key) {
        return Err(format!(
            "option key '{key}' may only contain letters, digits, '_' and '-'"
        ));
    }
    Ok(key.to_string())
}

/// Turn raw option input into canonical options for a brand-new option list.
pub fn normalize(raw: &[RawOption], owner_id: Option<&str>) -> Result<Vec<QuestionOption>, FormkitError> {
    normalize_with_existing(raw, owner_id, &[])
}

/// Like [`normalize`], but reconciles against the options being replaced:
/// plain labels equal to an existing label reuse that option's key, and structured
/// entries naming an existing key keep its `createdAt`.
pub fn normalize_with_existing(
    raw: &[RawOption],
    owner_id: Option<&str>,
    existing: &[QuestionOption],
) -> Result<Vec<QuestionOption>, FormkitError> {
    match OptionInput::parse(raw)? {
        OptionInput::Labels(labels) => {
            let options = from_labels(&labels, owner_id, existing);
            error::check_failures(label_key_collisions(&options))?;
            Ok(options)
        }
        OptionInput::Structured(entries) => from_structured(&entries, existing),
    }
}

/// A label that is also another option's key would resolve to that other option,
/// since keys win over labels in [`resolve_key`].
fn label_key_collisions(options: &[QuestionOption]) -> Vec<String> {
    options
        .iter()
        .filter_map(|opt| {
            options
                .iter()
                .find(|other| other.key != opt.key && other.key == opt.label)
                .map(|other| {
                    format!(
                        "label '{}' of option '{}' is the key of option '{}'",
                        opt.label, opt.key, other.key
                    )
                })
        })
        .collect()
}

/// The option whose key is `key`. Fails if `key` is unknown, or if `new_label` is
/// already another option's key.
pub fn check_relabel(
    options: &[QuestionOption],
    key: &str,
    new_label: &str,
) -> Result<usize, FormkitError> {
    let index = options
        .iter()
        .position(|opt| opt.key == key)
        .ok_or_else(|| FormkitError::NotFound(format!("option '{key}'")))?;
    if options.iter().any(|opt| opt.key != key && opt.key == new_label) {
        return Err(FormkitError::validation(format!(
            "label '{new_label}' is the key of another option"
        )));
    }
    Ok(index)
}

fn from_labels(
    labels: &[String],
    owner_id: Option<&str>,
    existing: &[QuestionOption],
) -> Vec<QuestionOption> {
    let now = time::now_rfc3339();
    let mut used: HashSet<String> = HashSet::new();

    // First pass: carry over keys whose label survived the edit.
    let reused: Vec<Option<&QuestionOption>> = labels
        .iter()
        .map(|label| {
            let hit = existing
                .iter()
                .find(|opt| opt.label == *label && !used.contains(&opt.key));
            if let Some(opt) = hit {
                used.insert(opt.key.clone());
            }
            hit
        })
        .collect();

    labels
        .iter()
        .zip(reused)
        .enumerate()
        .map(|(index, (label, prior))| match prior {
            Some(opt) => QuestionOption {
                key: opt.key.clone(),
                label: label.clone(),
                order: index as u32 + 1,
                metadata: opt.metadata.clone(),
                disabled: opt.disabled,
                created_at: opt.created_at.clone(),
            },
            None => {
                let key = unique_option_key(label, owner_id, index, &used);
                used.insert(key.clone());
                QuestionOption {
                    key,
                    label: label.clone(),
                    order: index as u32 + 1,
                    metadata: empty_metadata(),
                    disabled: false,
                    created_at: now.clone(),
                }
            }
        })
        .collect()
}

fn from_structured(
    entries: &[StructuredOption],
    existing: &[QuestionOption],
) -> Result<Vec<QuestionOption>, FormkitError> {
    let now = time::now_rfc3339();
    let mut failures = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();
    let mut out = Vec::with_capacity(entries.len());

    for (index, entry) in entries.iter().enumerate() {
        let position = index + 1;
        let key = match entry.key.as_deref().map(sanitize_key) {
            Some(Ok(key)) => Some(key),
            Some(Err(msg)) => {
                failures.push(format!("option {position}: {msg}"));
                None
            }
            None => {
                failures.push(format!("option {position}: key is required"));
                None
            }
        };
        let label = match entry.label.as_deref().map(str::trim) {
            Some(label) if !label.is_empty() => Some(label.to_string()),
            _ => {
                failures.push(format!("option {position}: label is required"));
                None
            }
        };
        if let Some(key) = &key {
            if !seen.insert(key.clone()) {
                failures.push(format!("duplicate option key '{key}'"));
            }
        }

        if let (Some(key), Some(label)) = (key, label) {
            let created_at = entry
                .created_at
                .clone()
                .or_else(|| {
                    existing
                        .iter()
                        .find(|opt| opt.key == key)
                        .map(|opt| opt.created_at.clone())
                })
                .unwrap_or_else(|| now.clone());
            out.push(QuestionOption {
                key,
                label,
                order: entry.order.unwrap_or(position as u32),
                metadata: entry.metadata.clone().unwrap_or_else(empty_metadata),
                disabled: entry.disabled,
                created_at,
            });
        }
    }

    failures.extend(label_key_collisions(&out));
    error::check_failures(failures)?;
    Ok(out)
}

/// A key, or the key of the first option carrying this label.
pub fn resolve_key<'a>(value: &str, options: &'a [QuestionOption]) -> Option<&'a str> {
    options
        .iter()
        .find(|opt| opt.key == value)
        .or_else(|| options.iter().find(|opt| opt.label == value))
        .map(|opt| opt.key.as_str())
}

pub fn label_for<'a>(key: &str, options: &'a [QuestionOption]) -> Option<&'a str> {
    options
        .iter()
        .find(|opt| opt.key == key)
        .map(|opt| opt.label.as_str())
}

/// Translate labels to keys. Unknown values pass through unchanged.
pub fn to_keys(value: &Value, options: &[QuestionOption]) -> Value {
    map_strings(value, |s| resolve_key(s, options).map(str::to_string))
}

/// Translate keys to labels. Unknown values pass through unchanged.
pub fn to_labels(value: &Value, options: &[QuestionOption]) -> Value {
    map_strings(value, |s| label_for(s, options).map(str::to_string))
}

fn map_strings<F>(value: &Value, f: F) -> Value
where
    F: Fn(&str) -> Option<String>,
{
    let one = |v: &Value| match v {
        Value::String(s) => Value::String(f(s).unwrap_or_else(|| s.clone())),
        other => other.clone(),
    };
    match value {
        Value::Array(items) => Value::Array(items.iter().map(one).collect()),
        other => one(other),
    }
}

/// `null`, `""` and `[]` all mean "no answer".
pub fn is_empty_answer(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(items) => items.is_empty(),
        _ => false,
    }
}

fn is_known(value: &Value, options: &[QuestionOption]) -> bool {
    match value {
        Value::String(s) => resolve_key(s, options).is_some(),
        _ => false,
    }
}

/// Membership against keys and labels. Empty answers are always valid; whether an
/// answer is required is decided elsewhere.
pub fn is_valid_answer(value: &Value, options: &[QuestionOption], question_type: QuestionType) -> bool {
    if is_empty_answer(value) {
        return true;
    }
    match value {
        Value::Array(items) => {
            question_type.is_multi_valued() && items.iter().all(|item| is_known(item, options))
        }
        scalar => is_known(scalar, options),
    }
}
