//! Tests for the wire contract between stash-server and HttpRemote.
//!
//! These need no database.

use chrono::{TimeZone, Utc};
use serde_json::json;
use stash_engine::remote::wire::{self, ChangeKind, ChangeNotice, ErrorBody, ErrorCode};
use stash_engine::{Item, RemoteError};

fn book() -> Item {
    Item::new("b-1", Utc.with_ymd_and_hms(2024, 2, 1, 12, 0, 0).unwrap())
        .with_owner("alice")
        .with_field("title", "Dune")
        .with_field("rating", 5)
}

#[cfg(test)]
mod item_tests {
    use super::*;

    #[test]
    fn test_item_is_a_flat_row() {
        let value = serde_json::to_value(book()).unwrap();
        assert_eq!(
            value,
            json!({
                "id": "b-1",
                "owner_id": "alice",
                "created_at": "2024-02-01T12:00:00Z",
                "title": "Dune",
                "rating": 5
            })
        );
    }

    #[test]
    fn test_item_without_owner_omits_column() {
        let item = Item::new("b-2", Utc::now());
        let value = serde_json::to_value(&item).unwrap();
        assert!(value.get("owner_id").is_none());
    }

    #[test]
    fn test_integer_ids_are_accepted() {
        let item: Item = serde_json::from_value(json!({
            "id": 42,
            "created_at": "2024-02-01T12:00:00+00:00",
            "title": "Numbered"
        }))
        .unwrap();
        assert_eq!(item.id, "42");
        assert_eq!(item.owner_id, None);
        assert_eq!(item.get("title"), Some(&json!("Numbered")));
    }
}

#[cfg(test)]
mod error_tests {
    use super::*;

    #[test]
    fn test_unknown_field_round_trips_to_schema_error() {
        let body = serde_json::to_string(&ErrorBody::unknown_field("owner_id")).unwrap();
        let parsed: ErrorBody = serde_json::from_str(&body).unwrap();

        assert_eq!(
            wire::classify(400, Some(parsed), None),
            RemoteError::Schema {
                field: "owner_id".into()
            }
        );
    }

    #[test]
    fn test_not_found_on_update() {
        let body = ErrorBody::new(ErrorCode::NotFound, "item b-1");
        assert_eq!(
            wire::classify(404, Some(body), Some("b-1")),
            RemoteError::NotFound("b-1".into())
        );
    }

    #[test]
    fn test_non_json_error_body() {
        // e.g. a proxy in front of the server
        assert!(matches!(
            wire::classify(502, None, None),
            RemoteError::Network(_)
        ));
        assert!(matches!(
            wire::classify(422, None, None),
            RemoteError::Query(_)
        ));
    }
}

#[cfg(test)]
mod change_tests {
    use super::*;

    #[test]
    fn test_change_notice_deserialization() {
        let json = r#"{"collection": "books", "kind": "update"}"#;
        let notice: ChangeNotice = serde_json::from_str(json).unwrap();
        assert_eq!(notice.collection, "books");
        assert_eq!(notice.kind, ChangeKind::Update);
    }

    #[test]
    fn test_change_notice_is_a_text_frame_payload() {
        let notice = ChangeNotice {
            collection: "books".into(),
            kind: ChangeKind::Insert,
        };
        let text = serde_json::to_string(&notice).unwrap();
        assert_eq!(text, r#"{"collection":"books","kind":"insert"}"#);
        assert_eq!(wire::OWNER_QUERY, "owner_id");
    }
}
