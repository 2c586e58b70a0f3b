use formkit::core::broker::{AUDIT_LOG_NAME, BrokerEvent};
use formkit::core::error::FormkitError;
use formkit::core::store::Store;
use formkit::plugins::history::{self, LabelChange, Relabel};
use formkit::plugins::options::{QuestionType, RawOption, StructuredOption};
use formkit::plugins::questions::{self, NewForm, NewQuestion, Question};
use formkit::plugins::submissions;
use serde_json::json;
use std::fs;
use tempfile::tempdir;

fn color_question(store: &Store) -> Question {
    questions::create_question(
        store,
        NewQuestion::new("Color", QuestionType::Select).with_labels(&["Red", "Blue", "Green"]),
    )
    .unwrap()
}

#[test]
fn test_key_survives_repeated_relabels() {
    let tmp = tempdir().unwrap();
    let store = Store::open(tmp.path()).unwrap();
    let q = color_question(&store);
    let key = q.options[0].key.clone();
    let others: Vec<_> = q.options[1..].to_vec();

    for n in 1..=5 {
        let change =
            history::update_label(&store, &q.id, &key, &format!("Red v{n}"), None).unwrap();
        assert!(matches!(change, LabelChange::Updated(_)));
    }

    let current = questions::get_question(&store, &q.id).unwrap();
    assert_eq!(current.options[0].key, key);
    assert_eq!(current.options[0].label, "Red v5");
    assert_eq!(current.options[0].order, q.options[0].order);
    assert_eq!(current.options[0].created_at, q.options[0].created_at);
    assert_eq!(current.options[1..], others[..]);

    let records = history::get_history(&store, &q.id, Some(&key)).unwrap();
    assert_eq!(records.len(), 5);
    assert_eq!(records[0].old_label, "Red v4");
    assert_eq!(records[0].new_label, "Red v5");
    assert_eq!(records[4].old_label, "Red");
}

#[test]
fn test_history_order_and_filter() {
    let tmp = tempdir().unwrap();
    let store = Store::open(tmp.path()).unwrap();
    let q = color_question(&store);
    let red = q.options[0].key.clone();
    let blue = q.options[1].key.clone();

    history::apply_relabel(
        &store,
        &q.id,
        &Relabel::new(&red, "Crimson").by("alice").because("brand refresh"),
    )
    .unwrap();
    history::apply_relabel(&store, &q.id, &Relabel::new(&blue, "Navy")).unwrap();

    let all = history::get_history(&store, &q.id, None).unwrap();
    assert_eq!(all.len(), 2);
    assert_eq!(all[0].option_key, blue);
    assert_eq!(all[1].option_key, red);
    assert_eq!(all[1].changed_by.as_deref(), Some("alice"));
    assert_eq!(all[1].change_reason.as_deref(), Some("brand refresh"));
    assert_eq!(all[0].changed_by, None);

    let only_red = history::get_history(&store, &q.id, Some(&red)).unwrap();
    assert_eq!(only_red.len(), 1);
    assert_eq!(only_red[0].new_label, "Crimson");
    assert!(history::get_history(&store, "other", None).unwrap().is_empty());
}

#[test]
fn test_same_label_is_a_no_op() {
    let tmp = tempdir().unwrap();
    let store = Store::open(tmp.path()).unwrap();
    let q = color_question(&store);

    let change = history::update_label(&store, &q.id, &q.options[0].key, "Red", None).unwrap();
    assert_eq!(change, LabelChange::Unchanged);
    assert!(history::get_history(&store, &q.id, None).unwrap().is_empty());

    let log = fs::read_to_string(tmp.path().join(AUDIT_LOG_NAME)).unwrap_or_default();
    assert!(!log.contains("option.relabel"), "{log}");
}

#[test]
fn test_relabel_to_a_sibling_key_is_rejected() {
    let tmp = tempdir().unwrap();
    let store = Store::open(tmp.path()).unwrap();
    let q = questions::create_question(
        &store,
        NewQuestion::new("Color", QuestionType::Select).with_options(vec![
            RawOption::Structured(StructuredOption::new("red", "Red")),
            RawOption::Structured(StructuredOption::new("blue", "Blue")),
        ]),
    )
    .unwrap();
    let form = questions::create_form(
        &store,
        NewForm {
            title: "F".to_string(),
            question_ids: vec![q.id.clone()],
            ..NewForm::default()
        },
    )
    .unwrap();

    assert!(matches!(
        history::update_label(&store, &q.id, "red", "blue", None),
        Err(FormkitError::ValidationError(_))
    ));
    assert!(history::get_history(&store, &q.id, None).unwrap().is_empty());
    assert_eq!(questions::get_question(&store, &q.id).unwrap().options[0].label, "Red");

    // "Blue" is a label, not a key, so sharing it is allowed and "blue" still means blue.
    history::update_label(&store, &q.id, "red", "Blue", None).unwrap();
    let answer = json!({ q.id.clone(): "blue" });
    let sub = submissions::create_submission(&store, &form.id, answer.as_object().unwrap()).unwrap();
    assert_eq!(sub.submission_data[&q.id], json!("blue"));
}

#[test]
fn test_unknown_targets_and_blank_labels() {
    let tmp = tempdir().unwrap();
    let store = Store::open(tmp.path()).unwrap();
    let q = color_question(&store);

    assert!(matches!(
        history::update_label(&store, "ghost", "k", "X", None),
        Err(FormkitError::NotFound(_))
    ));
    assert!(matches!(
        history::update_label(&store, &q.id, "no_such_key", "X", None),
        Err(FormkitError::NotFound(_))
    ));
    // Labels are never used to locate an option.
    assert!(matches!(
        history::update_label(&store, &q.id, "Red", "X", None),
        Err(FormkitError::NotFound(_))
    ));
    assert!(matches!(
        history::update_label(&store, &q.id, &q.options[0].key, "   ", None),
        Err(FormkitError::ValidationError(_))
    ));
    assert!(history::get_history(&store, &q.id, None).unwrap().is_empty());
}

#[test]
fn test_bulk_relabel_reports_each_change() {
    let tmp = tempdir().unwrap();
    let store = Store::open(tmp.path()).unwrap();
    let q = color_question(&store);

    let results = history::update_labels(
        &store,
        &q.id,
        &[
            Relabel::new(&q.options[0].key, "Scarlet"),
            Relabel::new("missing", "Nope"),
            Relabel::new(&q.options[2].key, "Green"),
        ],
    );
    assert!(matches!(results[0], Ok(LabelChange::Updated(_))));
    assert!(matches!(results[1], Err(FormkitError::NotFound(_))));
    assert!(matches!(results[2], Ok(LabelChange::Unchanged)));

    let current = questions::get_question(&store, &q.id).unwrap();
    assert_eq!(current.options[0].label, "Scarlet");
}

#[test]
fn test_relabel_is_written_to_audit_log() {
    let tmp = tempdir().unwrap();
    let store = Store::open(tmp.path()).unwrap();
    let q = color_question(&store);
    history::update_label(&store, &q.id, &q.options[0].key, "Rouge", Some("translator")).unwrap();

    let log = fs::read_to_string(tmp.path().join(AUDIT_LOG_NAME)).unwrap();
    let events: Vec<BrokerEvent> = log
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    let relabel = events
        .iter()
        .find(|e| e.op == "option.relabel")
        .expect("relabel event");
    assert_eq!(relabel.actor, "translator");
    assert_eq!(relabel.status, "success");
    assert_eq!(relabel.db_id, "forms.db");
}
