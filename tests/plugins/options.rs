use formkit::core::error::FormkitError;
use formkit::plugins::options::{
    self, KEY_MAX_LEN, QuestionOption, QuestionType, RawOption, StructuredOption,
};
use proptest::prelude::*;
use serde_json::json;
use std::collections::HashSet;

fn labels(items: &[&str]) -> Vec<RawOption> {
    items.iter().map(|s| RawOption::from(*s)).collect()
}

fn as_structured(opts: &[QuestionOption]) -> Vec<RawOption> {
    opts.iter()
        .map(|opt| RawOption::Structured(StructuredOption::new(&opt.key, &opt.label)))
        .collect()
}

fn key_is_well_formed(key: &str) -> bool {
    !key.is_empty()
        && key.len() <= KEY_MAX_LEN
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

fn label_set() -> impl Strategy<Value = Vec<String>> {
    prop::collection::hash_set("[A-Za-z]{1,12}", 1..8).prop_map(|s| s.into_iter().collect())
}

proptest! {
    #[test]
    fn normalize_is_idempotent(labels in label_set()) {
        let raw: Vec<RawOption> = labels.iter().map(|l| RawOption::from(l.as_str())).collect();
        let first = options::normalize(&raw, Some("q-prop")).unwrap();
        let second = options::normalize(&as_structured(&first), Some("q-prop")).unwrap();

        let first_pairs: Vec<(&str, &str)> = first.iter().map(|o| (o.key.as_str(), o.label.as_str())).collect();
        let second_pairs: Vec<(&str, &str)> = second.iter().map(|o| (o.key.as_str(), o.label.as_str())).collect();
        prop_assert_eq!(first_pairs, second_pairs);
    }

    #[test]
    fn to_keys_is_idempotent(labels in label_set(), extra in "[a-z_]{0,10}") {
        let raw: Vec<RawOption> = labels.iter().map(|l| RawOption::from(l.as_str())).collect();
        let opts = options::normalize(&raw, Some("q-prop")).unwrap();

        let mut values: Vec<serde_json::Value> = labels.iter().map(|l| json!(l)).collect();
        values.push(json!(extra));
        values.push(json!(opts[0].key));
        values.push(json!(labels));
        values.push(json!(null));
        for value in values {
            let once = options::to_keys(&value, &opts);
            prop_assert_eq!(options::to_keys(&once, &opts), once);
        }
    }

    #[test]
    fn generated_keys_are_unique_and_well_formed(labels in prop::collection::vec("[A-Za-z ]{1,12}", 1..10)) {
        let raw: Vec<RawOption> = labels.iter().map(|l| RawOption::from(l.as_str())).collect();
        let opts = options::normalize(&raw, Some("q-prop")).unwrap();

        let keys: HashSet<&str> = opts.iter().map(|o| o.key.as_str()).collect();
        prop_assert_eq!(keys.len(), opts.len());
        for opt in &opts {
            prop_assert!(key_is_well_formed(&opt.key), "bad key {}", opt.key);
            prop_assert!(opt.key.starts_with("opt_"));
        }
    }

    #[test]
    fn labels_round_trip_through_keys(labels in label_set()) {
        let raw: Vec<RawOption> = labels.iter().map(|l| RawOption::from(l.as_str())).collect();
        let opts = options::normalize(&raw, Some("q-prop")).unwrap();

        for label in &labels {
            let key = options::to_keys(&json!(label), &opts);
            prop_assert_ne!(&key, &json!(label));
            prop_assert_eq!(options::to_labels(&key, &opts), json!(label));
        }
        let all = json!(labels);
        prop_assert_eq!(options::to_labels(&options::to_keys(&all, &opts), &opts), all);
    }
}

#[test]
fn test_key_generation_is_reproducible_for_an_owner() {
    let a = options::generate_option_key("Very Satisfied", Some("q1"), 0);
    let b = options::generate_option_key("Very Satisfied", Some("q1"), 0);
    assert_eq!(a, b);
    assert!(a.starts_with("opt_very_satisfied_"));
    assert_ne!(a, options::generate_option_key("Very Satisfied", Some("q2"), 0));
    assert_ne!(a, options::generate_option_key("Very Satisfied", Some("q1"), 1));
}

#[test]
fn test_slug_is_truncated_and_falls_back_for_symbols() {
    let long = options::generate_option_key(&"x".repeat(80), Some("q"), 0);
    assert!(long.len() <= KEY_MAX_LEN);
    assert_eq!(options::slugify(&"x".repeat(80)).len(), 30);

    let symbols = options::generate_option_key("!!!", Some("q"), 0);
    assert!(symbols.starts_with("opt_option_"), "{symbols}");
}

#[test]
fn test_duplicate_labels_get_distinct_keys() {
    let opts = options::normalize(&labels(&["Same", "Same", "Same"]), Some("q")).unwrap();
    let keys: HashSet<&str> = opts.iter().map(|o| o.key.as_str()).collect();
    assert_eq!(keys.len(), 3);
    assert_eq!(
        opts.iter().map(|o| o.order).collect::<Vec<_>>(),
        vec![1, 2, 3]
    );
}

#[test]
fn test_structured_input_reports_every_failure() {
    let raw = vec![
        RawOption::Structured(StructuredOption::new("red", "Red")),
        RawOption::Structured(StructuredOption::new("red", "Also red")),
        RawOption::Structured(StructuredOption {
            label: Some("No key".to_string()),
            ..StructuredOption::default()
        }),
        RawOption::Structured(StructuredOption::new("bad key!", "Bad")),
        RawOption::Structured(StructuredOption::new("blank", "   ")),
    ];
    let err = options::normalize(&raw, None).unwrap_err();
    assert!(matches!(err, FormkitError::ValidationError(_)));
    let failures = err.failures();
    assert_eq!(failures.len(), 4, "{failures:?}");
    assert!(failures.iter().any(|f| f.contains("duplicate option key 'red'")));
    assert!(failures.iter().any(|f| f.contains("option 3: key is required")));
    assert!(failures.iter().any(|f| f.contains("'bad key!'")));
    assert!(failures.iter().any(|f| f.contains("option 5: label is required")));
}

#[test]
fn test_mixed_input_is_rejected() {
    let raw = vec![
        RawOption::from("Red"),
        RawOption::Structured(StructuredOption::new("blue", "Blue")),
    ];
    let err = options::normalize(&raw, Some("q")).unwrap_err();
    assert!(err.to_string().contains("either all plain labels"));
}

#[test]
fn test_structured_keys_are_trimmed_and_kept() {
    let raw = vec![RawOption::Structured(StructuredOption::new("  keep-me_1 ", " Keep "))];
    let opts = options::normalize(&raw, None).unwrap();
    assert_eq!(opts[0].key, "keep-me_1");
    assert_eq!(opts[0].label, "Keep");
    assert_eq!(opts[0].order, 1);
    assert_eq!(opts[0].metadata, json!({}));
}

#[test]
fn test_relisting_labels_keeps_existing_keys() {
    let first = options::normalize(&labels(&["Red", "Green"]), Some("q")).unwrap();
    let second =
        options::normalize_with_existing(&labels(&["Green", "Blue", "Red"]), Some("q"), &first)
            .unwrap();

    assert_eq!(second[0].key, first[1].key);
    assert_eq!(second[2].key, first[0].key);
    assert!(!first.iter().any(|o| o.key == second[1].key));
    assert_eq!(second[2].created_at, first[0].created_at);
}

#[test]
fn test_lenient_translation_passes_unknown_values_through() {
    let opts = options::normalize(&labels(&["Red"]), Some("q")).unwrap();
    assert_eq!(options::to_keys(&json!("Purple"), &opts), json!("Purple"));
    assert_eq!(options::to_labels(&json!(["nope", 3]), &opts), json!(["nope", 3]));
    assert_eq!(options::to_labels(&json!(null), &opts), json!(null));
}

#[test]
fn test_answer_validity() {
    let opts = options::normalize(&labels(&["A", "B"]), Some("q")).unwrap();
    let key = opts[0].key.clone();

    assert!(options::is_valid_answer(&json!("A"), &opts, QuestionType::Select));
    assert!(options::is_valid_answer(&json!(key), &opts, QuestionType::Radio));
    assert!(options::is_valid_answer(&json!(""), &opts, QuestionType::Select));
    assert!(options::is_valid_answer(&json!(["A", "B"]), &opts, QuestionType::Checkbox));
    assert!(!options::is_valid_answer(&json!(["A", "B"]), &opts, QuestionType::Select));
    assert!(!options::is_valid_answer(&json!("C"), &opts, QuestionType::Select));
    assert!(!options::is_valid_answer(&json!(["A", "C"]), &opts, QuestionType::Multiselect));
}

#[test]
fn test_question_type_parses_from_storage_names() {
    for name in ["select", "multiselect", "radio", "checkbox", "text", "rating"] {
        let parsed: QuestionType = name.parse().unwrap();
        assert_eq!(parsed.as_str(), name);
    }
    assert!("dropdown".parse::<QuestionType>().is_err());
    assert!(QuestionType::Checkbox.is_multi_valued());
    assert!(!QuestionType::Number.requires_options());
}

#[test]
fn test_raw_options_deserialize_from_either_shape() {
    let raw: Vec<RawOption> = serde_json::from_value(json!([
        "Plain",
        {"key": "k1", "label": "Structured", "disabled": true}
    ]))
    .unwrap();
    assert_eq!(raw[0], RawOption::Label("Plain".to_string()));
    match &raw[1] {
        RawOption::Structured(s) => {
            assert_eq!(s.key.as_deref(), Some("k1"));
            assert!(s.disabled);
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn test_label_equal_to_another_key_is_rejected() {
    let raw = vec![
        RawOption::Structured(StructuredOption::new("a", "x")),
        RawOption::Structured(StructuredOption::new("x", "y")),
    ];
    let err = options::normalize(&raw, None).unwrap_err();
    assert!(matches!(err, FormkitError::ValidationError(_)));
    assert!(err.failures()[0].contains("label 'x'"), "{err}");

    // A label may repeat its own key.
    let own = vec![
        RawOption::Structured(StructuredOption::new("a", "a")),
        RawOption::Structured(StructuredOption::new("b", "B")),
    ];
    let opts = options::normalize(&own, None).unwrap();
    assert_eq!(options::to_labels(&options::to_keys(&json!("a"), &opts), &opts), json!("a"));
    assert_eq!(options::to_labels(&options::to_keys(&json!("B"), &opts), &opts), json!("B"));
}

#[test]
fn test_relabel_check_guards_sibling_keys() {
    let opts = options::normalize(
        &[
            RawOption::Structured(StructuredOption::new("red", "Red")),
            RawOption::Structured(StructuredOption::new("blue", "Blue")),
        ],
        None,
    )
    .unwrap();
    assert_eq!(options::check_relabel(&opts, "red", "Crimson").unwrap(), 0);
    assert_eq!(options::check_relabel(&opts, "red", "red").unwrap(), 0);
    assert!(matches!(
        options::check_relabel(&opts, "red", "blue"),
        Err(FormkitError::ValidationError(_))
    ));
    assert!(matches!(
        options::check_relabel(&opts, "green", "Green"),
        Err(FormkitError::NotFound(_))
    ));
}
