//! Submission normalization and persistence.
//!
//! Answers to choice questions are stored as option keys, never labels: a scalar
//! key for select/radio and a set of keys for multiselect/checkbox. Reads can hand
//! back both the stored keys and a copy rendered with the current labels.

use crate::core::error::{self, FormkitError};
use crate::core::store::{DEFAULT_ACTOR, Store};
use crate::core::time;
use crate::plugins::options;
use crate::plugins::questions::{self, Question};
use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub type Payload = Map<String, Value>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Submission {
    pub id: String,
    pub form_id: String,
    pub submission_data: Payload,
    pub created_at: String,
    pub updated_at: String,
}

/// Same read, two renderings: current labels for people, stored keys for machines.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DisplayPayload {
    pub display: Payload,
    pub raw: Payload,
}

fn resolve_one(question: &Question, item: &Value, failures: &mut Vec<String>) -> Option<String> {
    match item {
        Value::String(s) => match options::resolve_key(s, &question.options) {
            Some(key) => Some(key.to_string()),
            None => {
                failures.push(format!(
                    "'{s}' is not an option of question '{}'",
                    question.id
                ));
                None
            }
        },
        other => {
            failures.push(format!(
                "question '{}' expects option keys or labels, got {other}",
                question.id
            ));
            None
        }
    }
}

fn normalize_answer(question: &Question, value: &Value, failures: &mut Vec<String>) -> Option<Value> {
    if options::is_empty_answer(value) {
        return Some(value.clone());
    }
    let multi = question.question_type.is_multi_valued();

    match value {
        Value::Array(items) if !multi => {
            failures.push(format!(
                "question '{}' accepts a single option, got {} values",
                question.id,
                items.len()
            ));
            None
        }
        Value::Array(items) => {
            let before = failures.len();
            let mut keys: Vec<String> = Vec::with_capacity(items.len());
            for item in items {
                if let Some(key) = resolve_one(question, item, failures) {
                    if !keys.contains(&key) {
                        keys.push(key);
                    }
                }
            }
            (failures.len() == before)
                .then(|| Value::Array(keys.into_iter().map(Value::String).collect()))
        }
        scalar => {
            let key = resolve_one(question, scalar, failures)?;
            Some(if multi {
                Value::Array(vec![Value::String(key)])
            } else {
                Value::String(key)
            })
        }
    }
}

/// Convert every choice answer to key form. Every unresolvable value is reported,
/// not just the first. Answers to other question types pass through untouched.
pub fn normalize_for_storage(questions: &[Question], payload: &Payload) -> Result<Payload, FormkitError> {
    let mut failures = Vec::new();
    let mut out = payload.clone();

    for question in questions.iter().filter(|q| q.question_type.requires_options()) {
        let Some(value) = payload.get(&question.id) else {
            continue;
        };
        if let Some(normalized) = normalize_answer(question, value, &mut failures) {
            out.insert(question.id.clone(), normalized);
        }
    }

    error::check_failures(failures)?;
    Ok(out)
}

pub fn denormalize_for_display(questions: &[Question], stored: &Payload) -> DisplayPayload {
    let mut display = stored.clone();
    for question in questions.iter().filter(|q| q.question_type.requires_options()) {
        if let Some(value) = stored.get(&question.id) {
            display.insert(
                question.id.clone(),
                options::to_labels(value, &question.options),
            );
        }
    }
    DisplayPayload {
        display,
        raw: stored.clone(),
    }
}

fn insert_submission(store: &Store, form_id: &str, data: Payload) -> Result<Submission, FormkitError> {
    let now = time::now_rfc3339();
    let submission = Submission {
        id: time::new_id(),
        form_id: form_id.to_string(),
        submission_data: data,
        created_at: now.clone(),
        updated_at: now,
    };

    store
        .broker()
        .with_write(DEFAULT_ACTOR, "submission.create", |conn| {
            conn.execute(
                "INSERT INTO submissions(id, form_id, submission_data, created_at, updated_at)
                 VALUES(?1, ?2, ?3, ?4, ?5)",
                params![
                    submission.id,
                    submission.form_id,
                    serde_json::to_string(&submission.submission_data)?,
                    submission.created_at,
                    submission.updated_at
                ],
            )?;
            Ok(())
        })?;
    Ok(submission)
}

pub fn create_submission(store: &Store, form_id: &str, payload: &Payload) -> Result<Submission, FormkitError> {
    let questions = questions::form_questions(store, form_id)?;
    let data = normalize_for_storage(&questions, payload)?;
    let submission = insert_submission(store, form_id, data)?;

    store.cache.invalidate_stats(form_id);
    tracing::debug!(form_id, submission_id = %submission.id, "submission stored");
    Ok(submission)
}

/// Store many submissions. Each payload succeeds or fails on its own; the outer
/// error is only for failures that affect the whole batch, such as an unknown form.
pub fn create_submissions(
    store: &Store,
    form_id: &str,
    payloads: &[Payload],
) -> Result<Vec<Result<Submission, FormkitError>>, FormkitError> {
    let questions = questions::form_questions(store, form_id)?;

    let results: Vec<Result<Submission, FormkitError>> = payloads
        .iter()
        .map(|payload| {
            let data = normalize_for_storage(&questions, payload)?;
            insert_submission(store, form_id, data)
        })
        .collect();

    let stored = results.iter().filter(|r| r.is_ok()).count();
    if stored > 0 {
        store.cache.invalidate_stats(form_id);
    }
    tracing::info!(
        form_id,
        stored,
        rejected = results.len() - stored,
        "bulk submission finished"
    );
    Ok(results)
}

fn load_submission(conn: &Connection, id: &str) -> Result<Option<Submission>, FormkitError> {
    let row = conn
        .query_row(
            "SELECT id, form_id, submission_data, created_at, updated_at FROM submissions WHERE id = ?1",
            params![id],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                ))
            },
        )
        .optional()?;

    row.map(|(id, form_id, data, created_at, updated_at)| {
        Ok(Submission {
            id,
            form_id,
            submission_data: serde_json::from_str(&data)?,
            created_at,
            updated_at,
        })
    })
    .transpose()
}

pub fn get_submission(store: &Store, id: &str) -> Result<Submission, FormkitError> {
    if let Some(submission) = store.cache.get_submission(id) {
        return Ok(submission);
    }
    let submission = store
        .broker()
        .with_read("submission.get", |conn| load_submission(conn, id))?
        .ok_or_else(|| FormkitError::NotFound(format!("submission '{id}'")))?;
    store.cache.set_submission(&submission);
    Ok(submission)
}

pub fn get_submission_display(store: &Store, id: &str) -> Result<DisplayPayload, FormkitError> {
    let submission = get_submission(store, id)?;
    let questions = questions::form_questions(store, &submission.form_id)?;
    Ok(denormalize_for_display(
        &questions,
        &submission.submission_data,
    ))
}

/// Replace a stored payload. Normalization runs again against the current options.
pub fn update_submission(store: &Store, id: &str, payload: &Payload) -> Result<Submission, FormkitError> {
    let existing = store
        .broker()
        .with_read("submission.get", |conn| load_submission(conn, id))?
        .ok_or_else(|| FormkitError::NotFound(format!("submission '{id}'")))?;

    let questions = questions::form_questions(store, &existing.form_id)?;
    let data = normalize_for_storage(&questions, payload)?;
    let updated = Submission {
        submission_data: data,
        updated_at: time::now_rfc3339(),
        ..existing
    };

    store
        .broker()
        .with_write(DEFAULT_ACTOR, "submission.update", |conn| {
            let changed = conn.execute(
                "UPDATE submissions SET submission_data = ?1, updated_at = ?2 WHERE id = ?3",
                params![
                    serde_json::to_string(&updated.submission_data)?,
                    updated.updated_at,
                    id
                ],
            )?;
            if changed == 0 {
                return Err(FormkitError::NotFound(format!("submission '{id}'")));
            }
            Ok(())
        })?;

    store.cache.invalidate_submission(id);
    store.cache.invalidate_stats(&updated.form_id);
    Ok(updated)
}
