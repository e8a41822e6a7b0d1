//! Wire protocol tests.
//!
//! These pin the JSON shapes exchanged with clients: row bodies, error bodies,
//! and the bundled rules file.

use serde_json::json;
use tidepool_engine::{
    build_schema, fields, BucketRule, Disposition, Predicate, Record, RemoteFailure,
    TableDefinition, Value, WireRow,
};

#[cfg(test)]
mod protocol_tests {
    use super::*;

    #[test]
    fn test_row_wire_shape() {
        let record = Record::new(
            "patients",
            "p-1",
            fields([
                ("doctor_id", Value::from("d-1")),
                ("age", Value::Integer(41)),
                ("status", Value::Null),
            ]),
        );

        let wire = serde_json::to_value(record.to_wire()).unwrap();
        assert_eq!(
            wire,
            json!({"id": "p-1", "doctor_id": "d-1", "age": 41, "status": null})
        );

        let parsed: WireRow = serde_json::from_value(wire).unwrap();
        assert_eq!(Record::from_wire("patients", parsed), record);
    }

    #[test]
    fn test_error_codes_are_fatal() {
        // (status, code) pairs the server answers rejected writes with.
        let rejections = [
            (400, "42P01"),
            (400, "42703"),
            (400, "22P02"),
            (400, "22023"),
            (403, "42501"),
            (404, "PGRST116"),
            (409, "23505"),
        ];

        for (status, code) in rejections {
            let failure = RemoteFailure::http(status, Some(code.to_string()), "rejected");
            assert_eq!(failure.disposition(), Disposition::Fatal, "{}", code);
        }
    }

    #[test]
    fn test_expired_token_is_retried() {
        let failure = RemoteFailure::http(401, Some("PGRST301".to_string()), "expired");
        assert!(failure.is_unauthorized());
        assert_eq!(failure.disposition(), Disposition::Transient);

        let internal = RemoteFailure::http(500, None, "Internal server error");
        assert_eq!(internal.disposition(), Disposition::Transient);
    }

    #[test]
    fn test_bundled_rules_file() {
        let file: serde_json::Value =
            serde_json::from_str(include_str!("../config/sync_rules.json")).unwrap();

        let tables: Vec<TableDefinition> =
            serde_json::from_value(file["tables"].clone()).unwrap();
        let schema = build_schema(tables).unwrap();
        assert!(schema.contains("doctors"));
        assert!(schema.contains("specialties"));

        let buckets: Vec<BucketRule> = serde_json::from_value(file["buckets"].clone()).unwrap();
        assert_eq!(
            buckets[0].predicate,
            Predicate::Owner {
                column: "owner_id".to_string()
            }
        );
        assert!(buckets
            .iter()
            .all(|rule| schema.contains(&rule.table)));
    }
}
