//! # Lens Tests
//!
//! Lenses over `Node`, `serde_json::Value` and plain structs:
//! - deep writes keep untouched subtrees pointer-identical
//! - one root notification per lens write
//! - typed `focus` composition

mod common;

use std::sync::Arc;

use common::Recorder;
use serde_json::{json, Value};
use tessera::{Node, SessionScope, Store, Structured, TesseraError};

fn library() -> Node {
    Node::from(json!({
        "shelves": [
            {"label": "a", "books": [{"title": "Dune", "loans": 3}, {"title": "Emma", "loans": 1}]},
            {"label": "b", "books": [{"title": "Ubik", "loans": 0}]}
        ],
        "owner": {"name": "city"}
    }))
}

mod structural_sharing_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_depth_four_write_touches_only_the_leaf() {
        let scope = SessionScope::new();
        let session = scope.open_session();
        let store = Store::new(library());
        let before = store.get(&session).unwrap();
        let recorder = Recorder::new();
        let _sub = store.subscribe(&session, recorder.listener()).unwrap();

        store
            .field("shelves")
            .index(0)
            .field("books")
            .index(1)
            .field("loans")
            .set(&session, Node::Int(2))
            .unwrap();

        let after = store.get(&session).unwrap();
        assert_eq!(recorder.len(), 1);

        let shelf = |root: &Node, i: usize| root.get_field("shelves").unwrap().get_index(i).unwrap().clone();
        let book = |root: &Node, i: usize| shelf(root, 0).get_field("books").unwrap().get_index(i).unwrap().clone();

        assert_eq!(book(&after, 1).get_field("loans"), Some(&Node::Int(2)));
        assert!(book(&after, 0).ptr_eq(&book(&before, 0)));
        assert!(shelf(&after, 1).ptr_eq(&shelf(&before, 1)));
        assert!(after
            .get_field("owner")
            .unwrap()
            .ptr_eq(before.get_field("owner").unwrap()));
        assert!(!after.ptr_eq(&before));
    }

    #[test]
    fn test_path_string_matches_chained_steps() {
        let scope = SessionScope::new();
        let session = scope.open_session();
        let store = Store::new(library());

        let chained = store.field("shelves").index(1).field("books").index(0).field("title");
        let parsed = store.at("$.shelves[1].books.0.title").unwrap();

        assert_eq!(chained.get(&session).unwrap(), Node::from("Ubik"));
        assert_eq!(parsed.get(&session).unwrap(), Node::from("Ubik"));
        assert_eq!(chained.path(), parsed.path());
    }

    #[test]
    fn test_bad_path_syntax() {
        let store = Store::new(library());
        let err = store.at("shelves[x").unwrap_err();
        assert_eq!(err.code(), "TSR-022");
    }
}

mod json_value_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_lens_over_json_value() {
        let scope = SessionScope::new();
        let session = scope.open_session();
        let store = Store::new(json!({"user": {"tags": ["x", "y"]}}));

        let tag = store.field("user").field("tags").index(1);
        assert_eq!(tag.get(&session).unwrap(), json!("y"));

        tag.set(&session, json!("z")).unwrap();
        assert_eq!(
            store.get(&session).unwrap(),
            json!({"user": {"tags": ["x", "z"]}})
        );
    }

    #[test]
    fn test_setting_a_new_field_inserts_it() {
        let scope = SessionScope::new();
        let session = scope.open_session();
        let store = Store::new(json!({"user": {}}));

        store
            .field("user")
            .field("email")
            .set(&session, json!("a@b.c"))
            .unwrap();
        assert_eq!(
            store.get(&session).unwrap()["user"]["email"],
            Value::from("a@b.c")
        );
    }

    #[test]
    fn test_out_of_bounds_write_is_path_not_found() {
        let scope = SessionScope::new();
        let session = scope.open_session();
        let store = Store::new(json!({"items": [1]}));

        let err = store
            .field("items")
            .index(4)
            .set(&session, json!(0))
            .unwrap_err();
        assert!(matches!(err, TesseraError::PathNotFound { .. }));
    }
}

mod focus_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[derive(Debug, Clone, PartialEq)]
    struct Address {
        city: String,
        zip: String,
    }

    #[derive(Debug, Clone, PartialEq)]
    struct Customer {
        name: String,
        address: Address,
    }

    fn customer() -> Store<Customer> {
        Store::new(Customer {
            name: "Lin".into(),
            address: Address {
                city: "Oslo".into(),
                zip: "0150".into(),
            },
        })
    }

    #[test]
    fn test_nested_focus_writes_through() {
        let scope = SessionScope::new();
        let session = scope.open_session();
        let store = customer();

        let city = store
            .focus(
                "address",
                |c: &Customer| c.address.clone(),
                |c, address| Customer {
                    address,
                    ..c.clone()
                },
            )
            .focus(
                "city",
                |a: &Address| a.city.clone(),
                |a, city| Address { city, ..a.clone() },
            );

        assert_eq!(city.path(), "address.city");
        city.update(&session, |c| c.to_uppercase()).unwrap();

        let value = store.get(&session).unwrap();
        assert_eq!(value.address.city, "OSLO");
        assert_eq!(value.address.zip, "0150");
        assert_eq!(value.name, "Lin");
    }

    #[test]
    fn test_focused_subscription_ignores_siblings() {
        let scope = SessionScope::new();
        let session = scope.open_session();
        let store = customer();
        let name = store.focus(
            "name",
            |c: &Customer| c.name.clone(),
            |c, name| Customer { name, ..c.clone() },
        );
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let _sub = name
            .subscribe(&session, move |n: &String| sink.lock().push(n.clone()))
            .unwrap();

        store
            .update_with(&session, |c| Customer {
                address: Address {
                    zip: "0151".into(),
                    ..c.address.clone()
                },
                ..c.clone()
            })
            .unwrap();
        name.set(&session, "Mei".into()).unwrap();

        assert_eq!(*seen.lock(), vec!["Mei".to_string()]);
    }
}
