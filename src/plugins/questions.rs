//! Form and question definitions.
//!
//! Questions live independently of forms so one question can appear on several
//! forms; `form_questions` keeps each form's ordered list. Any change to a question
//! drops every cached question batch containing it and every form that uses it
//! before the call returns.

use crate::core::error::{self, FormkitError};
use crate::core::store::{DEFAULT_ACTOR, Store};
use crate::core::time;
use crate::plugins::options::{self, QuestionOption, QuestionType, RawOption};
use rusqlite::{Connection, OptionalExtension, params, params_from_iter};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Question {
    pub id: String,
    pub text: String,
    #[serde(rename = "type")]
    pub question_type: QuestionType,
    pub options: Vec<QuestionOption>,
    pub validation: Value,
    pub metadata: Value,
    pub active: bool,
    pub created_at: String,
    pub updated_at: String,
}

impl Question {
    pub fn option(&self, key: &str) -> Option<&QuestionOption> {
        self.options.iter().find(|opt| opt.key == key)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Form {
    pub id: String,
    pub title: String,
    pub description: String,
    pub question_ids: Vec<String>,
    pub settings: Value,
    pub active: bool,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone)]
pub struct NewQuestion {
    /// Supplied by the caller's identity service; generated when absent.
    pub id: Option<String>,
    pub text: String,
    pub question_type: QuestionType,
    pub options: Vec<RawOption>,
    pub validation: Value,
    pub metadata: Value,
}

impl NewQuestion {
    pub fn new(text: &str, question_type: QuestionType) -> Self {
        Self {
            id: None,
            text: text.to_string(),
            question_type,
            options: Vec::new(),
            validation: Value::Object(Map::new()),
            metadata: Value::Object(Map::new()),
        }
    }

    pub fn with_options(mut self, options: Vec<RawOption>) -> Self {
        self.options = options;
        self
    }

    pub fn with_labels(self, labels: &[&str]) -> Self {
        self.with_options(labels.iter().map(|l| RawOption::from(*l)).collect())
    }
}

#[derive(Debug, Clone, Default)]
pub struct QuestionPatch {
    pub text: Option<String>,
    /// Replaces the whole option list.
    pub options: Option<Vec<RawOption>>,
    pub validation: Option<Value>,
    pub metadata: Option<Value>,
    pub active: Option<bool>,
}

#[derive(Debug, Clone, Default)]
pub struct NewForm {
    pub id: Option<String>,
    pub title: String,
    pub description: String,
    pub question_ids: Vec<String>,
    pub settings: Option<Value>,
}

#[derive(Debug, Clone, Default)]
pub struct FormPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub question_ids: Option<Vec<String>>,
    pub settings: Option<Value>,
    pub active: Option<bool>,
}

struct QuestionRow {
    id: String,
    text: String,
    question_type: String,
    options_json: String,
    validation_json: String,
    metadata_json: String,
    active: bool,
    created_at: String,
    updated_at: String,
}

impl QuestionRow {
    fn into_question(self) -> Result<Question, FormkitError> {
        Ok(Question {
            question_type: self.question_type.parse()?,
            options: serde_json::from_str(&self.options_json)?,
            validation: serde_json::from_str(&self.validation_json)?,
            metadata: serde_json::from_str(&self.metadata_json)?,
            id: self.id,
            text: self.text,
            active: self.active,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

const QUESTION_COLUMNS: &str = "id, text, question_type, options_json, validation_json, metadata_json, active, created_at, updated_at";

fn question_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<QuestionRow> {
    Ok(QuestionRow {
        id: row.get(0)?,
        text: row.get(1)?,
        question_type: row.get(2)?,
        options_json: row.get(3)?,
        validation_json: row.get(4)?,
        metadata_json: row.get(5)?,
        active: row.get(6)?,
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
    })
}

pub(crate) fn load_question(conn: &Connection, id: &str) -> Result<Option<Question>, FormkitError> {
    let row = conn
        .query_row(
            &format!("SELECT {QUESTION_COLUMNS} FROM questions WHERE id = ?1"),
            params![id],
            question_row,
        )
        .optional()?;
    row.map(QuestionRow::into_question).transpose()
}

pub(crate) fn save_question_options(
    conn: &Connection,
    question_id: &str,
    options: &[QuestionOption],
    updated_at: &str,
) -> Result<(), FormkitError> {
    conn.execute(
        "UPDATE questions SET options_json = ?1, updated_at = ?2 WHERE id = ?3",
        params![serde_json::to_string(options)?, updated_at, question_id],
    )?;
    Ok(())
}

pub(crate) fn forms_containing(conn: &Connection, question_id: &str) -> Result<Vec<String>, FormkitError> {
    let mut stmt = conn.prepare(
        "SELECT DISTINCT form_id FROM form_questions WHERE question_id = ?1 ORDER BY form_id",
    )?;
    let rows = stmt.query_map(params![question_id], |row| row.get(0))?;
    let mut out = Vec::new();
    for r in rows {
        out.push(r?);
    }
    Ok(out)
}

/// Drop cached question batches and every dependent form, stats and submission entry.
pub(crate) fn invalidate_question_dependents(store: &Store, question_id: &str, form_ids: &[String]) {
    store.cache.invalidate_question(question_id);
    for form_id in form_ids {
        store.cache.invalidate(form_id);
    }
}

fn build_options(
    question_id: &str,
    question_type: QuestionType,
    raw: &[RawOption],
    existing: &[QuestionOption],
) -> Result<Vec<QuestionOption>, FormkitError> {
    if !question_type.requires_options() {
        if !raw.is_empty() {
            tracing::warn!(
                question_id,
                question_type = %question_type,
                "discarding options supplied for a non-choice question"
            );
        }
        return Ok(Vec::new());
    }
    if raw.is_empty() {
        return Err(FormkitError::validation(format!(
            "question type '{question_type}' requires at least one option"
        )));
    }
    options::normalize_with_existing(raw, Some(question_id), existing)
}

pub fn create_question(store: &Store, new: NewQuestion) -> Result<Question, FormkitError> {
    if new.text.trim().is_empty() {
        return Err(FormkitError::validation("question text must not be empty"));
    }
    let id = new.id.clone().unwrap_or_else(time::new_id);
    let options = build_options(&id, new.question_type, &new.options, &[])?;
    let now = time::now_rfc3339();

    let question = Question {
        id,
        text: new.text.trim().to_string(),
        question_type: new.question_type,
        options,
        validation: new.validation,
        metadata: new.metadata,
        active: true,
        created_at: now.clone(),
        updated_at: now,
    };

    store
        .broker()
        .with_write(DEFAULT_ACTOR, "question.create", |conn| {
            conn.execute(
                &format!("INSERT INTO questions({QUESTION_COLUMNS}) VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"),
                params![
                    question.id,
                    question.text,
                    question.question_type.as_str(),
                    serde_json::to_string(&question.options)?,
                    serde_json::to_string(&question.validation)?,
                    serde_json::to_string(&question.metadata)?,
                    question.active,
                    question.created_at,
                    question.updated_at
                ],
            )?;
            Ok(())
        })?;

    tracing::info!(
        question_id = %question.id,
        options = question.options.len(),
        "question created"
    );
    Ok(question)
}

pub fn update_question(store: &Store, id: &str, patch: QuestionPatch) -> Result<Question, FormkitError> {
    if patch.text.as_deref().is_some_and(|t| t.trim().is_empty()) {
        return Err(FormkitError::validation("question text must not be empty"));
    }

    let (question, form_ids) =
        store
            .broker()
            .with_write(DEFAULT_ACTOR, "question.update", |conn| {
                let mut question = load_question(conn, id)?
                    .ok_or_else(|| FormkitError::NotFound(format!("question '{id}'")))?;

                if let Some(text) = &patch.text {
                    question.text = text.trim().to_string();
                }
                if let Some(raw) = &patch.options {
                    question.options =
                        build_options(id, question.question_type, raw, &question.options)?;
                }
                if let Some(validation) = &patch.validation {
                    question.validation = validation.clone();
                }
                if let Some(metadata) = &patch.metadata {
                    question.metadata = metadata.clone();
                }
                if let Some(active) = patch.active {
                    question.active = active;
                }
                question.updated_at = time::now_rfc3339();

                conn.execute(
                    "UPDATE questions SET text = ?1, options_json = ?2, validation_json = ?3,
                     metadata_json = ?4, active = ?5, updated_at = ?6 WHERE id = ?7",
                    params![
                        question.text,
                        serde_json::to_string(&question.options)?,
                        serde_json::to_string(&question.validation)?,
                        serde_json::to_string(&question.metadata)?,
                        question.active,
                        question.updated_at,
                        id
                    ],
                )?;
                let form_ids = forms_containing(conn, id)?;
                Ok((question, form_ids))
            })?;

    invalidate_question_dependents(store, id, &form_ids);
    tracing::info!(question_id = id, forms = form_ids.len(), "question updated");
    Ok(question)
}

pub fn get_question(store: &Store, id: &str) -> Result<Question, FormkitError> {
    let mut batch = get_questions(store, &[id])?;
    batch
        .pop()
        .ok_or_else(|| FormkitError::NotFound(format!("question '{id}'")))
}

/// Batched read, returned in the requested order. Any missing id is `NotFound`.
pub fn get_questions<S: AsRef<str>>(store: &Store, ids: &[S]) -> Result<Vec<Question>, FormkitError> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }

    let batch = match store.cache.get_questions(ids) {
        Some(batch) => batch,
        None => {
            let batch = read_questions(store, ids)?;
            store.cache.set_questions(ids, &batch);
            batch
        }
    };

    let by_id: HashMap<&str, &Question> = batch.iter().map(|q| (q.id.as_str(), q)).collect();
    ids.iter()
        .map(|id| {
            by_id
                .get(id.as_ref())
                .map(|q| (*q).clone())
                .ok_or_else(|| FormkitError::NotFound(format!("question '{}'", id.as_ref())))
        })
        .collect()
}

fn read_questions<S: AsRef<str>>(store: &Store, ids: &[S]) -> Result<Vec<Question>, FormkitError> {
    let unique: Vec<&str> = ids
        .iter()
        .map(|id| id.as_ref())
        .collect::<HashSet<_>>()
        .into_iter()
        .collect();

    let rows = store.broker().with_read("question.batch", |conn| {
        let placeholders = vec!["?"; unique.len()].join(", ");
        let mut stmt = conn.prepare(&format!(
            "SELECT {QUESTION_COLUMNS} FROM questions WHERE id IN ({placeholders}) ORDER BY id"
        ))?;
        let rows = stmt.query_map(params_from_iter(unique.iter()), question_row)?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    })?;

    let questions = rows
        .into_iter()
        .map(QuestionRow::into_question)
        .collect::<Result<Vec<_>, _>>()?;

    let missing: Vec<&str> = unique
        .iter()
        .filter(|id| !questions.iter().any(|q| q.id == **id))
        .copied()
        .collect();
    if !missing.is_empty() {
        return Err(FormkitError::NotFound(format!(
            "questions: {}",
            missing.join(", ")
        )));
    }
    Ok(questions)
}

fn check_question_ids(conn: &Connection, question_ids: &[String]) -> Result<(), FormkitError> {
    let mut failures = Vec::new();
    let mut seen = HashSet::new();
    for id in question_ids {
        if !seen.insert(id.as_str()) {
            failures.push(format!("question '{id}' listed twice"));
            continue;
        }
        let exists: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM questions WHERE id = ?1)",
            params![id],
            |row| row.get(0),
        )?;
        if !exists {
            failures.push(format!("unknown question '{id}'"));
        }
    }
    error::check_failures(failures)
}

fn write_form_questions(conn: &Connection, form_id: &str, question_ids: &[String]) -> Result<(), FormkitError> {
    conn.execute("DELETE FROM form_questions WHERE form_id = ?1", params![form_id])?;
    for (position, question_id) in question_ids.iter().enumerate() {
        conn.execute(
            "INSERT INTO form_questions(form_id, question_id, position) VALUES(?1, ?2, ?3)",
            params![form_id, question_id, position as i64],
        )?;
    }
    Ok(())
}

pub fn create_form(store: &Store, new: NewForm) -> Result<Form, FormkitError> {
    if new.title.trim().is_empty() {
        return Err(FormkitError::validation("form title must not be empty"));
    }
    let now = time::now_rfc3339();
    let form = Form {
        id: new.id.unwrap_or_else(time::new_id),
        title: new.title.trim().to_string(),
        description: new.description,
        question_ids: new.question_ids,
        settings: new.settings.unwrap_or_else(|| Value::Object(Map::new())),
        active: true,
        created_at: now.clone(),
        updated_at: now,
    };

    store.broker().with_write(DEFAULT_ACTOR, "form.create", |conn| {
        check_question_ids(conn, &form.question_ids)?;
        conn.execute(
            "INSERT INTO forms(id, title, description, settings_json, active, created_at, updated_at)
             VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                form.id,
                form.title,
                form.description,
                serde_json::to_string(&form.settings)?,
                form.active,
                form.created_at,
                form.updated_at
            ],
        )?;
        write_form_questions(conn, &form.id, &form.question_ids)
    })?;

    tracing::info!(form_id = %form.id, questions = form.question_ids.len(), "form created");
    Ok(form)
}

fn load_form(conn: &Connection, id: &str) -> Result<Option<Form>, FormkitError> {
    let row = conn
        .query_row(
            "SELECT id, title, description, settings_json, active, created_at, updated_at
             FROM forms WHERE id = ?1",
            params![id],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, bool>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, String>(6)?,
                ))
            },
        )
        .optional()?;

    let Some((id, title, description, settings_json, active, created_at, updated_at)) = row else {
        return Ok(None);
    };

    let mut stmt = conn.prepare(
        "SELECT question_id FROM form_questions WHERE form_id = ?1 ORDER BY position",
    )?;
    let rows = stmt.query_map(params![id], |row| row.get(0))?;
    let mut question_ids = Vec::new();
    for r in rows {
        question_ids.push(r?);
    }

    Ok(Some(Form {
        id,
        title,
        description,
        question_ids,
        settings: serde_json::from_str(&settings_json)?,
        active,
        created_at,
        updated_at,
    }))
}

pub fn get_form(store: &Store, id: &str) -> Result<Form, FormkitError> {
    if let Some(form) = store.cache.get_form(id) {
        return Ok(form);
    }
    let form = store
        .broker()
        .with_read("form.get", |conn| load_form(conn, id))?
        .ok_or_else(|| FormkitError::NotFound(format!("form '{id}'")))?;
    store.cache.set_form(&form);
    Ok(form)
}

pub fn update_form(store: &Store, id: &str, patch: FormPatch) -> Result<Form, FormkitError> {
    if patch.title.as_deref().is_some_and(|t| t.trim().is_empty()) {
        return Err(FormkitError::validation("form title must not be empty"));
    }

    let form = store.broker().with_write(DEFAULT_ACTOR, "form.update", |conn| {
        let mut form = load_form(conn, id)?
            .ok_or_else(|| FormkitError::NotFound(format!("form '{id}'")))?;
        if let Some(title) = &patch.title {
            form.title = title.trim().to_string();
        }
        if let Some(description) = &patch.description {
            form.description = description.clone();
        }
        if let Some(settings) = &patch.settings {
            form.settings = settings.clone();
        }
        if let Some(active) = patch.active {
            form.active = active;
        }
        if let Some(question_ids) = &patch.question_ids {
            check_question_ids(conn, question_ids)?;
            write_form_questions(conn, id, question_ids)?;
            form.question_ids = question_ids.clone();
        }
        form.updated_at = time::now_rfc3339();

        conn.execute(
            "UPDATE forms SET title = ?1, description = ?2, settings_json = ?3, active = ?4,
             updated_at = ?5 WHERE id = ?6",
            params![
                form.title,
                form.description,
                serde_json::to_string(&form.settings)?,
                form.active,
                form.updated_at,
                id
            ],
        )?;
        Ok(form)
    })?;

    store.cache.invalidate(id);
    Ok(form)
}

/// The form's questions in form order.
pub fn form_questions(store: &Store, form_id: &str) -> Result<Vec<Question>, FormkitError> {
    let form = get_form(store, form_id)?;
    get_questions(store, &form.question_ids)
}

pub fn forms_containing_question(store: &Store, question_id: &str) -> Result<Vec<String>, FormkitError> {
    store
        .broker()
        .with_read("form.by_question", |conn| forms_containing(conn, question_id))
}
