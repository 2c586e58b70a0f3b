//! Option relabeling with an append-only audit trail.
//!
//! Options are located by key only. A relabel touches nothing but `label`, writes
//! one history record in the same transaction, and drops every dependent cache
//! entry before returning.

use crate::core::error::FormkitError;
use crate::core::store::{DEFAULT_ACTOR, Store};
use crate::core::time;
use crate::plugins::options;
use crate::plugins::questions::{self, Question};
use rusqlite::params;
use serde::{Deserialize, Serialize};

/// Persisted shape: `{id, questionId, optionKey, oldLabel, newLabel, changedAt, changedBy, changeReason}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptionHistoryRecord {
    pub id: String,
    pub question_id: String,
    pub option_key: String,
    pub old_label: String,
    pub new_label: String,
    pub changed_at: String,
    pub changed_by: Option<String>,
    pub change_reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LabelChange {
    /// The option already carried this label; nothing was written.
    Unchanged,
    Updated(OptionHistoryRecord),
}

#[derive(Debug, Clone, Default)]
pub struct Relabel {
    pub key: String,
    pub new_label: String,
    pub changed_by: Option<String>,
    pub change_reason: Option<String>,
}

impl Relabel {
    pub fn new(key: &str, new_label: &str) -> Self {
        Self {
            key: key.to_string(),
            new_label: new_label.to_string(),
            ..Self::default()
        }
    }

    pub fn by(mut self, changed_by: &str) -> Self {
        self.changed_by = Some(changed_by.to_string());
        self
    }

    pub fn because(mut self, reason: &str) -> Self {
        self.change_reason = Some(reason.to_string());
        self
    }
}

pub fn update_label(
    store: &Store,
    question_id: &str,
    key: &str,
    new_label: &str,
    changed_by: Option<&str>,
) -> Result<LabelChange, FormkitError> {
    let mut change = Relabel::new(key, new_label);
    change.changed_by = changed_by.map(str::to_string);
    apply_relabel(store, question_id, &change)
}

/// Locate the option by key and check the new label against its siblings.
/// `Ok(None)` means the option already carries `new_label`.
fn relabel_index(
    question: &Question,
    change: &Relabel,
    new_label: &str,
) -> Result<Option<usize>, FormkitError> {
    let index = options::check_relabel(&question.options, &change.key, new_label).map_err(|e| match e {
        FormkitError::NotFound(_) => FormkitError::NotFound(format!(
            "option '{}' on question '{}'",
            change.key, question.id
        )),
        other => other,
    })?;
    Ok((question.options[index].label != new_label).then_some(index))
}

fn require_question(question: Option<Question>, question_id: &str) -> Result<Question, FormkitError> {
    question.ok_or_else(|| FormkitError::NotFound(format!("question '{question_id}'")))
}

pub fn apply_relabel(store: &Store, question_id: &str, change: &Relabel) -> Result<LabelChange, FormkitError> {
    let new_label = change.new_label.trim();
    if new_label.is_empty() {
        return Err(FormkitError::validation("option label must not be empty"));
    }

    // Unchanged labels and invalid targets never reach the write path or the audit log.
    let current = store
        .broker()
        .with_read("option.get", |conn| questions::load_question(conn, question_id))?;
    let current = require_question(current, question_id)?;
    if relabel_index(&current, change, new_label)?.is_none() {
        return Ok(LabelChange::Unchanged);
    }

    let actor = change.changed_by.as_deref().unwrap_or(DEFAULT_ACTOR);
    let (outcome, form_ids) = store
        .broker()
        .with_write(actor, "option.relabel", |conn| {
            let mut question = require_question(questions::load_question(conn, question_id)?, question_id)?;
            let Some(index) = relabel_index(&question, change, new_label)? else {
                return Ok((LabelChange::Unchanged, Vec::new()));
            };
            let option = &mut question.options[index];

            let record = OptionHistoryRecord {
                id: time::new_id(),
                question_id: question_id.to_string(),
                option_key: option.key.clone(),
                old_label: std::mem::replace(&mut option.label, new_label.to_string()),
                new_label: new_label.to_string(),
                changed_at: time::now_rfc3339(),
                changed_by: change.changed_by.clone(),
                change_reason: change.change_reason.clone(),
            };

            questions::save_question_options(conn, question_id, &question.options, &record.changed_at)?;
            conn.execute(
                "INSERT INTO option_history(id, question_id, option_key, old_label, new_label,
                 changed_at, changed_by, change_reason) VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    record.id,
                    record.question_id,
                    record.option_key,
                    record.old_label,
                    record.new_label,
                    record.changed_at,
                    record.changed_by,
                    record.change_reason
                ],
            )?;
            let form_ids = questions::forms_containing(conn, question_id)?;
            Ok((LabelChange::Updated(record), form_ids))
        })?;

    if let LabelChange::Updated(record) = &outcome {
        questions::invalidate_question_dependents(store, question_id, &form_ids);
        tracing::info!(
            question_id,
            option_key = %record.option_key,
            old_label = %record.old_label,
            new_label = %record.new_label,
            "option relabeled"
        );
    }
    Ok(outcome)
}

/// Apply several relabels to one question. Each change is applied and reported on
/// its own, so one unknown key does not block the others.
pub fn update_labels(
    store: &Store,
    question_id: &str,
    changes: &[Relabel],
) -> Vec<Result<LabelChange, FormkitError>> {
    changes
        .iter()
        .map(|change| apply_relabel(store, question_id, change))
        .collect()
}

/// Most recent first, optionally narrowed to one option key.
pub fn get_history(
    store: &Store,
    question_id: &str,
    key: Option<&str>,
) -> Result<Vec<OptionHistoryRecord>, FormkitError> {
    store.broker().with_read("option.history", |conn| {
        let mut stmt = conn.prepare(
            "SELECT id, question_id, option_key, old_label, new_label, changed_at, changed_by, change_reason
             FROM option_history
             WHERE question_id = ?1 AND (?2 IS NULL OR option_key = ?2)
             ORDER BY changed_at DESC, rowid DESC",
        )?;
        let rows = stmt.query_map(params![question_id, key], |row| {
            Ok(OptionHistoryRecord {
                id: row.get(0)?,
                question_id: row.get(1)?,
                option_key: row.get(2)?,
                old_label: row.get(3)?,
                new_label: row.get(4)?,
                changed_at: row.get(5)?,
                changed_by: row.get(6)?,
                change_reason: row.get(7)?,
            })
        })?;

        let mut results = Vec::new();
        for r in rows {
            results.push(r?);
        }
        Ok(results)
    })
}
