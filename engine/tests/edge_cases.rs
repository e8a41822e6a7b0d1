//! Edge case tests for tidepool-engine
//!
//! These tests cover boundary conditions and unusual inputs.

use std::collections::HashMap;

use tidepool_engine::{
    build_schema, classify, define_table, fields, BucketRule, BucketRules, Column, Disposition,
    Fields, Operation, Record, RemoteFailure, Schema, SchemaViolation, Transaction, Value,
};

fn create_test_schema() -> Schema {
    build_schema(vec![
        define_table(
            "items",
            vec![
                Column::text("name"),
                Column::integer("count"),
                Column::real("ratio"),
                Column::boolean("done"),
                Column::text("owner_id"),
            ],
        )
        .unwrap(),
    ])
    .unwrap()
}

// ============================================================================
// String Edge Cases
// ============================================================================

#[test]
fn empty_string_values() {
    let schema = create_test_schema();
    let op = Operation::put("items", "item1", fields([("name", "")]));
    assert!(schema.validate_operation(&op).is_ok());
}

#[test]
fn unicode_record_ids_and_values() {
    let schema = create_test_schema();

    let names = vec![
        "日本語テスト",
        "Привет мир",
        "مرحبا بالعالم",
        "🎉🚀💯",
        "Hello\nWorld\tTab",
        "Null\0Test",
    ];

    for (i, name) in names.iter().enumerate() {
        let op = Operation::put("items", format!("{}-{}", name, i), fields([("name", *name)]));
        assert!(schema.validate_operation(&op).is_ok(), "Failed for: {}", name);

        let json = serde_json::to_string(&op).unwrap();
        let parsed: Operation = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, op);
    }
}

#[test]
fn very_long_strings() {
    let schema = create_test_schema();
    let long_string = "x".repeat(1024 * 1024);

    let op = Operation::put("items", "item1", fields([("name", long_string.as_str())]));
    assert!(schema.validate_operation(&op).is_ok());
}

#[test]
fn table_names_are_case_sensitive() {
    let schema = create_test_schema();
    let op = Operation::delete("Items", "item1");
    assert_eq!(
        schema.validate_operation(&op),
        Err(SchemaViolation::UnknownTable("Items".into()))
    );
}

// ============================================================================
// Numeric Edge Cases
// ============================================================================

#[test]
fn integer_boundaries() {
    let schema = create_test_schema();

    for value in [i64::MIN, i64::MAX, 0, -1, 1] {
        let op = Operation::patch("items", "item1", fields([("count", value)]));
        assert!(schema.validate_operation(&op).is_ok(), "Failed for: {}", value);

        let json = serde_json::to_string(&op).unwrap();
        let parsed: Operation = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.fields().unwrap()["count"], Value::Integer(value));
    }
}

#[test]
fn real_column_accepts_integers_but_not_the_reverse() {
    let schema = create_test_schema();

    let ok = Operation::patch("items", "item1", fields([("ratio", 3i64)]));
    assert!(schema.validate_operation(&ok).is_ok());

    let bad = Operation::patch("items", "item1", fields([("count", 0.5f64)]));
    assert!(matches!(
        schema.validate_operation(&bad),
        Err(SchemaViolation::TypeMismatch { .. })
    ));
}

#[test]
fn booleans_as_integers() {
    let schema = create_test_schema();

    for value in [Value::Integer(0), Value::Integer(1), Value::Boolean(true)] {
        let op = Operation::patch("items", "item1", fields([("done", value.clone())]));
        assert!(schema.validate_operation(&op).is_ok(), "Failed for: {}", value);
    }

    let op = Operation::patch("items", "item1", fields([("done", 7i64)]));
    assert!(schema.validate_operation(&op).is_err());
}

#[test]
fn nulls_are_accepted_everywhere() {
    let schema = create_test_schema();
    let op = Operation::put(
        "items",
        "item1",
        fields([
            ("name", Value::Null),
            ("count", Value::Null),
            ("ratio", Value::Null),
            ("done", Value::Null),
        ]),
    );
    assert!(schema.validate_operation(&op).is_ok());
}

// ============================================================================
// Transaction Edge Cases
// ============================================================================

#[test]
fn empty_transaction_rejected() {
    let schema = create_test_schema();
    assert_eq!(
        schema.validate_transaction(&Transaction::new(vec![])),
        Err(SchemaViolation::EmptyTransaction)
    );
}

#[test]
fn one_bad_operation_rejects_the_transaction() {
    let schema = create_test_schema();
    let tx = Transaction::new(vec![
        Operation::put("items", "item1", fields([("name", "ok")])),
        Operation::put("unknown_table", "r2", Fields::new()),
    ]);
    assert_eq!(
        schema.validate_transaction(&tx),
        Err(SchemaViolation::UnknownTable("unknown_table".into()))
    );
}

#[test]
fn put_with_no_fields_is_allowed() {
    let schema = create_test_schema();
    let op = Operation::put("items", "item1", Fields::new());
    assert!(schema.validate_operation(&op).is_ok());
}

// ============================================================================
// Bucket Rule Edge Cases
// ============================================================================

#[test]
fn owner_column_with_non_text_values() {
    let schema = create_test_schema();
    let rules = BucketRules::new(vec![BucketRule::owner("items", "owner_id")], &schema).unwrap();

    let mut rows = HashMap::new();
    rows.insert(
        "items".to_string(),
        vec![
            Record::new("items", "i-1", fields([("owner_id", "42")])),
            Record::new("items", "i-2", fields([("owner_id", Value::Null)])),
            Record::new("items", "i-3", Fields::new()),
        ],
    );

    let filter = rules.filter_for("items", "42", &rows);
    let visible: Vec<_> = rows["items"].iter().filter(|r| filter.matches(r)).collect();
    assert_eq!(visible.len(), 1);
    assert_eq!(visible[0].id, "i-1");
}

#[test]
fn deep_ownership_chain() {
    let depth = 12;
    let tables = (0..depth)
        .map(|i| define_table(format!("level{}", i), vec![Column::text("up")]).unwrap())
        .collect();
    let schema = build_schema(tables).unwrap();

    let mut rules = vec![BucketRule::owner("level0", "up")];
    for i in 1..depth {
        rules.push(BucketRule::parent(
            format!("level{}", i),
            "up",
            format!("level{}", i - 1),
        ));
    }
    let rules = BucketRules::new(rules, &schema).unwrap();

    let mut rows: HashMap<String, Vec<Record>> = HashMap::new();
    rows.insert(
        "level0".into(),
        vec![Record::new("level0", "n0", fields([("up", "tenant")]))],
    );
    for i in 1..depth {
        rows.insert(
            format!("level{}", i),
            vec![Record::new(
                format!("level{}", i),
                format!("n{}", i),
                fields([("up", format!("n{}", i - 1))]),
            )],
        );
    }

    let leaf = format!("level{}", depth - 1);
    assert_eq!(rules.lineage(&leaf).len(), depth - 1);

    let filter = rules.filter_for(&leaf, "tenant", &rows);
    assert!(filter.matches(&rows[&leaf][0]));

    let filter = rules.filter_for(&leaf, "intruder", &rows);
    assert!(!filter.matches(&rows[&leaf][0]));
}

// ============================================================================
// Classification Edge Cases
// ============================================================================

#[test]
fn malformed_codes_are_transient() {
    for code in ["", "2", "23", "2350", "235050", "ä3505"] {
        let failure = RemoteFailure::coded(code, "odd");
        assert_eq!(classify(&failure), Disposition::Transient, "code {:?}", code);
    }
}

#[test]
fn lowercase_classes_do_not_match() {
    let failure = RemoteFailure::coded("pgrst116", "no rows");
    assert_eq!(classify(&failure), Disposition::Transient);
}
