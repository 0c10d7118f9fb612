//! # Session Isolation Tests
//!
//! Rows are per session; closing a session drops its rows, runs its
//! teardown hooks and detaches computed values.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tessera::{Computed, SessionId, SessionScope, Store, TesseraError};

mod isolation_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_sessions_do_not_share_values() {
        let scope = SessionScope::new();
        let alice = scope.open_session();
        let bob = scope.open_session();
        let draft = Store::new(String::new());

        draft.set(&alice, "hello".into()).unwrap();
        assert_eq!(draft.get(&bob).unwrap(), "");
        assert_eq!(draft.get(&alice).unwrap(), "hello");
    }

    #[test]
    fn test_closed_session_rejects_access_and_drops_rows() {
        let scope = SessionScope::new();
        let session = scope.open_session();
        let store = Store::new(1u8);
        store.set(&session, 2).unwrap();
        assert_eq!(scope.row_count(session.id()), 1);

        assert!(session.close());
        assert_eq!(scope.row_count(session.id()), 0);
        assert!(matches!(
            store.get(&session),
            Err(TesseraError::SessionClosed { .. })
        ));
    }

    #[test]
    fn test_reopening_an_id_starts_fresh() {
        let scope = SessionScope::new();
        let id = SessionId::from("tab-1");
        let store = Store::new(0u32);

        let first = scope.session(id.clone());
        store.set(&first, 7).unwrap();
        scope.close_session(&id);

        let second = scope.session(id);
        assert_eq!(store.get(&second).unwrap(), 0);
    }

    #[test]
    fn test_start_hook_cleanup_runs_at_close() {
        let scope = SessionScope::new();
        let started = Arc::new(AtomicUsize::new(0));
        let stopped = Arc::new(AtomicUsize::new(0));
        {
            let (started, stopped) = (Arc::clone(&started), Arc::clone(&stopped));
            scope.on_session_start(move |_session| {
                started.fetch_add(1, Ordering::SeqCst);
                let stopped = Arc::clone(&stopped);
                Some(Box::new(move || {
                    stopped.fetch_add(1, Ordering::SeqCst);
                }) as tessera::session::CloseHook)
            });
        }

        let session = scope.open_session();
        assert_eq!(started.load(Ordering::SeqCst), 1);
        session.close();
        assert_eq!(stopped.load(Ordering::SeqCst), 1);
    }
}

mod computed_lifecycle_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_computed_follows_its_session_only() {
        let scope = SessionScope::new();
        let a = scope.open_session();
        let b = scope.open_session();
        let items = Store::new(vec![1u32, 2, 3]);
        let total = {
            let items = items.clone();
            Computed::new(move |s| Ok(items.get(s)?.iter().sum::<u32>()))
        };

        assert_eq!(total.get(&a).unwrap(), 6);
        assert_eq!(total.get(&b).unwrap(), 6);

        items.set(&a, vec![10]).unwrap();
        assert_eq!(total.get(&a).unwrap(), 10);
        assert_eq!(total.get(&b).unwrap(), 6);
        assert_eq!(total.runs(&b), 1);
    }

    #[test]
    fn test_computed_stops_listening_after_close() {
        let scope = SessionScope::new();
        let session = scope.open_session();
        let source = Store::builder(1i32).shared(true).build();
        let calls = Arc::new(AtomicUsize::new(0));
        let doubled = {
            let (source, calls) = (source.clone(), Arc::clone(&calls));
            Computed::new(move |s| {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(source.get(s)? * 2)
            })
        };

        assert_eq!(doubled.get(&session).unwrap(), 2);
        assert_eq!(doubled.dependency_count(&session), 1);

        session.close();
        assert_eq!(doubled.dependency_count(&session), 0);

        let other = scope.open_session();
        source.set(&other, 5).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(doubled.get(&other).unwrap(), 10);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_computed_notifies_subscribers() {
        let scope = SessionScope::new();
        let session = scope.open_session();
        let first = Store::new("Ada".to_string());
        let last = Store::new("Lovelace".to_string());
        let full = {
            let (first, last) = (first.clone(), last.clone());
            Computed::new(move |s| Ok(format!("{} {}", first.get(s)?, last.get(s)?)))
        };
        let recorder = common::Recorder::new();
        let _sub = full.subscribe(&session, recorder.listener()).unwrap();
        full.get(&session).unwrap();

        last.set(&session, "Byron".into()).unwrap();
        assert_eq!(recorder.values(), vec!["Ada Byron".to_string()]);
    }
}
