//! Formkit: form definitions, submissions, and answer statistics over SQLite.
//!
//! Every choice option carries a stable key. Submissions store keys, never labels,
//! so an option can be relabeled any number of times without touching stored
//! answers or breaking historical stats. Labels are resolved at read time.
//!
//! # Architecture
//!
//! All state lives under one root directory:
//!
//! - `forms.db`: forms, questions, submissions and the option history ledger
//! - `broker.events.jsonl`: one audit line per write, appended by `DbBroker`
//! - `formkit.toml`: optional database and cache settings
//!
//! Reads go through [`core::cache::FormCache`], a set of bounded LRU caches with
//! per-entry TTL. Writes invalidate every dependent entry before they return.
//!
//! # Example
//!
//! ```no_run
//! use formkit::core::store::Store;
//! use formkit::plugins::options::QuestionType;
//! use formkit::plugins::questions::{self, NewForm, NewQuestion};
//! use formkit::plugins::{history, stats, submissions};
//! use serde_json::json;
//!
//! # fn main() -> Result<(), formkit::FormkitError> {
//! let store = Store::open(std::path::Path::new("./data"))?;
//! let color = questions::create_question(
//!     &store,
//!     NewQuestion::new("Favorite color?", QuestionType::Select).with_labels(&["Red", "Blue"]),
//! )?;
//! let form = questions::create_form(
//!     &store,
//!     NewForm {
//!         title: "Survey".to_string(),
//!         question_ids: vec![color.id.clone()],
//!         ..NewForm::default()
//!     },
//! )?;
//!
//! let answer = json!({ color.id.clone(): "Red" });
//! submissions::create_submission(&store, &form.id, answer.as_object().unwrap())?;
//! history::update_label(&store, &color.id, &color.options[0].key, "Crimson", None)?;
//!
//! let stats = stats::compute_form_stats(&store, &form.id)?;
//! assert_eq!(stats.question_stats[0].answer_distribution["Crimson"], 1);
//! # Ok(())
//! # }
//! ```
//!
//! # Crate Structure
//!
//! - [`core`]: errors, config, the broker, the store, and the cache layer
//! - [`plugins`]: options, questions, submissions, history and stats

pub mod core;
pub mod plugins;

pub use core::error::FormkitError;
pub use core::store::Store;
