//! Per-form answer statistics.
//!
//! Counting happens in SQLite over the stored JSON payloads; submissions are never
//! loaded into memory. Choice questions are counted by option key, which is the
//! ground truth that survives relabeling, and then rendered by current label. Two
//! keys that currently share a label are summed under that label.

use crate::core::error::FormkitError;
use crate::core::store::Store;
use crate::core::time;
use crate::plugins::options::{self, QuestionOption, QuestionType};
use crate::plugins::questions::{self, Question};
use rusqlite::{Connection, params};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub type Distribution = BTreeMap<String, u64>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionStats {
    pub question_id: String,
    pub question_text: String,
    pub question_type: QuestionType,
    pub total_answers: u64,
    pub empty_answers: u64,
    pub unique_answer_count: u64,
    /// Current label (or raw value for non-choice questions) to count.
    pub answer_distribution: Distribution,
    /// Option key to count. Only present for choice questions.
    #[serde(
        rename = "_keyDistribution",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub key_distribution: Option<Distribution>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormStats {
    pub form_id: String,
    pub total_submissions: u64,
    pub first_submission: Option<String>,
    pub last_submission: Option<String>,
    pub question_stats: Vec<QuestionStats>,
    pub computed_at: String,
}

impl FormStats {
    pub fn question(&self, question_id: &str) -> Option<&QuestionStats> {
        self.question_stats
            .iter()
            .find(|q| q.question_id == question_id)
    }
}

// Shared predicate for "no answer": missing, null, "" or [].
const EMPTY_ANSWER_SQL: &str = "(
    json_type(submission_data, ?2) IS NULL
    OR json_type(submission_data, ?2) = 'null'
    OR (json_type(submission_data, ?2) = 'text' AND json_extract(submission_data, ?2) = '')
    OR (json_type(submission_data, ?2) = 'array' AND json_array_length(submission_data, ?2) = 0)
)";

fn answer_path(question_id: &str) -> String {
    format!("$.\"{}\"", question_id.replace('"', "\\\""))
}

/// Fold key counts into label counts using the options as they are right now.
/// Keys with no current option keep the key as their label.
pub fn label_distribution(keys: &Distribution, options: &[QuestionOption]) -> Distribution {
    let mut out = Distribution::new();
    for (key, count) in keys {
        let label = options::label_for(key, options).unwrap_or(key);
        *out.entry(label.to_string()).or_insert(0) += count;
    }
    out
}

fn count_empty(conn: &Connection, form_id: &str, path: &str) -> Result<u64, FormkitError> {
    let n: i64 = conn.query_row(
        &format!("SELECT COUNT(*) FROM submissions WHERE form_id = ?1 AND {EMPTY_ANSWER_SQL}"),
        params![form_id, path],
        |row| row.get(0),
    )?;
    Ok(n as u64)
}

fn collect_distribution(
    conn: &Connection,
    sql: &str,
    form_id: &str,
    path: &str,
) -> Result<Distribution, FormkitError> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params![form_id, path], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
    })?;
    let mut out = Distribution::new();
    for r in rows {
        let (answer, count) = r?;
        out.insert(answer, count as u64);
    }
    Ok(out)
}

/// One count per selected key per submission, whether the stored value is a key or
/// a set of keys.
fn key_distribution(conn: &Connection, form_id: &str, path: &str) -> Result<Distribution, FormkitError> {
    collect_distribution(
        conn,
        "SELECT je.value, COUNT(DISTINCT s.id)
         FROM submissions AS s, json_each(s.submission_data, ?2) AS je
         WHERE s.form_id = ?1 AND je.type = 'text' AND je.value <> ''
         GROUP BY je.value
         ORDER BY je.value",
        form_id,
        path,
    )
}

fn raw_distribution(conn: &Connection, form_id: &str, path: &str) -> Result<Distribution, FormkitError> {
    collect_distribution(
        conn,
        &format!(
            "SELECT CASE json_type(submission_data, ?2)
                        WHEN 'true' THEN 'true'
                        WHEN 'false' THEN 'false'
                        ELSE CAST(json_extract(submission_data, ?2) AS TEXT)
                    END AS answer,
                    COUNT(*)
             FROM submissions
             WHERE form_id = ?1 AND NOT {EMPTY_ANSWER_SQL}
             GROUP BY answer
             ORDER BY answer"
        ),
        form_id,
        path,
    )
}

fn question_stats(
    conn: &Connection,
    form_id: &str,
    total: u64,
    question: &Question,
) -> Result<QuestionStats, FormkitError> {
    let path = answer_path(&question.id);
    let empty_answers = count_empty(conn, form_id, &path)?;

    let (answer_distribution, key_distribution) = if question.question_type.requires_options() {
        let keys = key_distribution(conn, form_id, &path)?;
        (label_distribution(&keys, &question.options), Some(keys))
    } else {
        (raw_distribution(conn, form_id, &path)?, None)
    };
    let unique_answer_count = key_distribution
        .as_ref()
        .unwrap_or(&answer_distribution)
        .len() as u64;

    Ok(QuestionStats {
        question_id: question.id.clone(),
        question_text: question.text.clone(),
        question_type: question.question_type,
        total_answers: total.saturating_sub(empty_answers),
        empty_answers,
        unique_answer_count,
        answer_distribution,
        key_distribution,
    })
}

/// Stats for every question on the form, served from the stats cache when fresh.
pub fn compute_form_stats(store: &Store, form_id: &str) -> Result<FormStats, FormkitError> {
    if let Some(stats) = store.cache.get_stats(form_id) {
        return Ok(stats);
    }

    let questions = questions::form_questions(store, form_id)?;
    let stats = store.broker().with_read("stats.compute", |conn| {
        let (total, first, last): (i64, Option<String>, Option<String>) = conn.query_row(
            "SELECT COUNT(*), MIN(created_at), MAX(created_at) FROM submissions WHERE form_id = ?1",
            params![form_id],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )?;
        let total = total as u64;

        let question_stats = questions
            .iter()
            .map(|q| question_stats(conn, form_id, total, q))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(FormStats {
            form_id: form_id.to_string(),
            total_submissions: total,
            first_submission: first,
            last_submission: last,
            question_stats,
            computed_at: time::now_rfc3339(),
        })
    })?;

    store.cache.set_stats(&stats);
    tracing::debug!(
        form_id,
        total_submissions = stats.total_submissions,
        "form stats computed"
    );
    Ok(stats)
}
