//! # Mutation Detection Tests
//!
//! Stores built with `detect_mutations(true)` hand out deep copies and
//! report in-place changes to them at the next access.

use std::collections::BTreeMap;

use tessera::{MutationError, SessionScope, Shared, Store, StoreSettings, TesseraError};

fn guarded_list() -> Store<Shared<Vec<String>>> {
    Store::builder(Shared::new(vec!["milk".to_string()]))
        .detect_mutations(true)
        .build()
}

mod detection_tests {
    use super::*;

    #[test]
    fn test_mutating_a_read_value_fails_next_access_with_read_site() {
        let scope = SessionScope::new();
        let session = scope.open_session();
        let list = guarded_list();

        let read_line = line!() + 1;
        let value = list.get(&session).unwrap();
        value.write().push("eggs".to_string());

        let err = list.peek(&session).unwrap_err();
        let TesseraError::Mutation(MutationError::MutatedAfterRead { site, .. }) = &err else {
            panic!("expected MutatedAfterRead, got {err}");
        };
        let site = site.expect("read site recorded");
        assert!(site.file().ends_with("mutation_guard_tests.rs"));
        assert_eq!(site.line(), read_line);
        assert_eq!(err.code(), "TSR-001");
    }

    #[test]
    fn test_mutating_the_value_passed_to_set_fails() {
        let scope = SessionScope::new();
        let session = scope.open_session();
        let list = guarded_list();

        let mine = Shared::new(vec!["bread".to_string()]);
        list.set(&session, mine.clone()).unwrap();
        mine.write().clear();

        let err = list.get(&session).unwrap_err();
        assert!(matches!(
            err,
            TesseraError::Mutation(MutationError::MutatedAfterSet { .. })
        ));
    }

    #[test]
    fn test_untouched_values_pass_and_repeat_reads_share_the_copy() {
        let scope = SessionScope::new();
        let session = scope.open_session();
        let list = guarded_list();

        let first = list.get(&session).unwrap();
        let second = list.get(&session).unwrap();
        assert!(first.same_cell(&second));
        assert_eq!(*first.read(), vec!["milk".to_string()]);
    }

    #[test]
    fn test_set_refuses_while_a_mutation_is_pending() {
        let scope = SessionScope::new();
        let session = scope.open_session();
        let list = guarded_list();

        let value = list.get(&session).unwrap();
        value.write().push("eggs".to_string());
        assert!(list.get(&session).is_err());

        let err = list
            .set(&session, Shared::new(vec!["tea".to_string()]))
            .unwrap_err();
        assert!(matches!(err, TesseraError::Mutation(_)));
    }

    #[test]
    fn test_plain_values_are_never_flagged() {
        let scope = SessionScope::new();
        let session = scope.open_session();
        let prices = Store::builder(BTreeMap::from([("apple".to_string(), 3u32)]))
            .detect_mutations(true)
            .build();

        let mut copy = prices.get(&session).unwrap();
        copy.insert("pear".to_string(), 4);
        assert_eq!(prices.get(&session).unwrap().len(), 1);

        prices.set(&session, copy).unwrap();
        assert_eq!(prices.get(&session).unwrap().len(), 2);
    }

    #[test]
    fn test_listeners_see_the_stored_value() {
        let scope = SessionScope::new();
        let session = scope.open_session();
        let list = guarded_list();
        let seen = std::sync::Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = std::sync::Arc::clone(&seen);
        let _sub = list
            .subscribe(&session, move |v: &Shared<Vec<String>>| {
                sink.lock().push(v.read().len())
            })
            .unwrap();

        list.set(&session, Shared::new(vec!["a".into(), "b".into()]))
            .unwrap();
        assert_eq!(*seen.lock(), vec![2]);
    }

    #[test]
    fn test_settings_toggle_detection() {
        let scope = SessionScope::new();
        let session = scope.open_session();
        let build = |mutation_detection: bool| {
            Store::builder(Shared::new(vec!["milk".to_string()]))
                .settings(&StoreSettings { mutation_detection })
                .build()
        };

        let watched = build(true);
        watched.get(&session).unwrap().write().push("eggs".to_string());
        assert!(matches!(
            watched.peek(&session),
            Err(TesseraError::Mutation(_))
        ));

        let unwatched = build(false);
        unwatched.get(&session).unwrap().write().push("eggs".to_string());
        assert!(unwatched.peek(&session).is_ok());
    }
}
