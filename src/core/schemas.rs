//! Centralized schema definitions for the forms database.
//!
//! One SQLite file holds everything:
//! 1. forms / form_questions: form definitions and their ordered question lists.
//! 2. questions: question definitions, options embedded as a JSON array.
//! 3. submissions: one JSON payload per submission, option answers stored as keys.
//! 4. option_history: append-only label change ledger.

pub const FORMS_DB_SCHEMA_FORMS: &str = "
    CREATE TABLE IF NOT EXISTS forms (
        id TEXT PRIMARY KEY,
        title TEXT NOT NULL,
        description TEXT NOT NULL DEFAULT '',
        settings_json TEXT NOT NULL DEFAULT '{}',
        active INTEGER NOT NULL DEFAULT 1,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
";

pub const FORMS_DB_SCHEMA_QUESTIONS: &str = "
    CREATE TABLE IF NOT EXISTS questions (
        id TEXT PRIMARY KEY,
        text TEXT NOT NULL,
        question_type TEXT NOT NULL,
        options_json TEXT NOT NULL DEFAULT '[]',
        validation_json TEXT NOT NULL DEFAULT '{}',
        metadata_json TEXT NOT NULL DEFAULT '{}',
        active INTEGER NOT NULL DEFAULT 1,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
";

pub const FORMS_DB_SCHEMA_FORM_QUESTIONS: &str = "
    CREATE TABLE IF NOT EXISTS form_questions (
        form_id TEXT NOT NULL,
        question_id TEXT NOT NULL,
        position INTEGER NOT NULL,
        PRIMARY KEY(form_id, question_id),
        FOREIGN KEY(form_id) REFERENCES forms(id),
        FOREIGN KEY(question_id) REFERENCES questions(id)
    )
";

pub const FORMS_DB_SCHEMA_SUBMISSIONS: &str = "
    CREATE TABLE IF NOT EXISTS submissions (
        id TEXT PRIMARY KEY,
        form_id TEXT NOT NULL,
        submission_data TEXT NOT NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        FOREIGN KEY(form_id) REFERENCES forms(id)
    )
";

pub const FORMS_DB_SCHEMA_OPTION_HISTORY: &str = "
    CREATE TABLE IF NOT EXISTS option_history (
        id TEXT PRIMARY KEY,
        question_id TEXT NOT NULL,
        option_key TEXT NOT NULL,
        old_label TEXT NOT NULL,
        new_label TEXT NOT NULL,
        changed_at TEXT NOT NULL,
        changed_by TEXT,
        change_reason TEXT,
        FOREIGN KEY(question_id) REFERENCES questions(id)
    )
";

pub const FORMS_DB_SCHEMA_INDEXES: &str = "
    CREATE INDEX IF NOT EXISTS idx_form_questions_question ON form_questions(question_id);
    CREATE INDEX IF NOT EXISTS idx_submissions_form ON submissions(form_id, created_at);
    CREATE INDEX IF NOT EXISTS idx_option_history_question ON option_history(question_id, option_key);
";

/// All statements, in creation order.
pub const FORMS_DB_SCHEMA: &[&str] = &[
    FORMS_DB_SCHEMA_FORMS,
    FORMS_DB_SCHEMA_QUESTIONS,
    FORMS_DB_SCHEMA_FORM_QUESTIONS,
    FORMS_DB_SCHEMA_SUBMISSIONS,
    FORMS_DB_SCHEMA_OPTION_HISTORY,
    FORMS_DB_SCHEMA_INDEXES,
];
