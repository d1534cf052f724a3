//! Integration tests for concurrent registration and dispatch.

use docbridge::dispatch::{live_sessions, pack, trampolines};
use docbridge::native::NativeDocument;
use docbridge::{
    ConflictResolution, EngineConfig, ExecutionContext, MemoryEngine, Session, SessionConfig,
    Value, ValueWriter, SESSION_KEY, TOKEN_KEY,
};
use std::collections::{BTreeMap, HashSet};
use std::ffi::CString;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::thread;

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn setup() -> (Arc<MemoryEngine>, Arc<Session>) {
    init_tracing();
    let engine = Arc::new(MemoryEngine::new(EngineConfig::default()).unwrap());
    let session = Arc::new(Session::new(engine.clone(), SessionConfig::default()));
    (engine, session)
}

fn counter_props(n: i64) -> BTreeMap<String, Value> {
    let mut properties = BTreeMap::new();
    properties.insert("n".to_string(), Value::Int(n));
    properties
}

// --- Token Uniqueness ---

#[test]
fn test_tokens_unique_across_threads() {
    let (engine, session) = setup();

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let session = session.clone();
            thread::spawn(move || {
                (0..50)
                    .map(|_| {
                        session
                            .add_database_change_listener(ExecutionContext::new(), &[], |_, _| {})
                            .unwrap()
                            .token()
                            .to_string()
                    })
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    let mut tokens = HashSet::new();
    for handle in handles {
        for token in handle.join().unwrap() {
            assert!(tokens.insert(token), "token issued twice");
        }
    }
    assert_eq!(tokens.len(), 400);
    assert_eq!(session.listener_count(), 400);
    assert_eq!(engine.listener_count(), 400);
}

#[test]
fn test_same_caller_token_races_to_one_winner() {
    let (_engine, session) = setup();

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let session = session.clone();
            thread::spawn(move || {
                session
                    .add_database_change_listener(
                        ExecutionContext::new().with_token("shared"),
                        &[],
                        |_, _| {},
                    )
                    .is_ok()
            })
        })
        .collect();

    let winners = handles
        .into_iter()
        .map(|handle| handle.join().unwrap())
        .filter(|won| *won)
        .count();
    assert_eq!(winners, 1);
    assert_eq!(session.listener_count(), 1);
}

// --- Dispatch and Removal ---

#[test]
fn test_dispatch_after_removal_is_dropped() {
    let (_engine, session) = setup();
    let calls = Arc::new(AtomicUsize::new(0));

    let counter = calls.clone();
    let listener = session
        .add_document_change_listener(
            "doc",
            ExecutionContext::new().with_token("T1"),
            &[],
            move |_, _| {
                counter.fetch_add(1, Ordering::SeqCst);
            },
        )
        .unwrap();

    // A context the engine may still hold for the removed listener.
    let context = ExecutionContext::new()
        .with_token("T1")
        .with(SESSION_KEY, Value::UInt(session.id()));
    let dict = pack(&context, &[TOKEN_KEY, SESSION_KEY], &ValueWriter::default()).unwrap();
    let doc_id = CString::new("doc").unwrap();

    trampolines::document_change_trampoline(dict.as_raw(), doc_id.as_ptr());
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    session.remove_listener(listener).unwrap();
    trampolines::document_change_trampoline(dict.as_raw(), doc_id.as_ptr());

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    let stats = session.dispatch_stats();
    assert_eq!(stats.delivered, 1);
    assert_eq!(stats.unregistered, 1);
}

#[test]
fn test_unregistered_resolver_keeps_local_revision() {
    let (_engine, session) = setup();
    let calls = Arc::new(AtomicUsize::new(0));

    let counter = calls.clone();
    let resolver = session
        .set_conflict_resolver(
            "repl",
            ExecutionContext::new().with_token("R1"),
            &[],
            move |_, _, _, _| {
                counter.fetch_add(1, Ordering::SeqCst);
                ConflictResolution::Remote
            },
        )
        .unwrap();
    session.remove_listener(resolver).unwrap();

    let context = ExecutionContext::new()
        .with_token("R1")
        .with(SESSION_KEY, Value::UInt(session.id()));
    let dict = pack(&context, &[TOKEN_KEY, SESSION_KEY], &ValueWriter::default()).unwrap();
    let doc_id = CString::new("doc").unwrap();

    let writer = ValueWriter::default();
    let local = Arc::new(NativeDocument::new(
        "doc",
        1,
        writer.write_dict(&counter_props(1)).unwrap().into_dict(),
    ));
    let remote = Arc::new(NativeDocument::new(
        "doc",
        2,
        writer.write_dict(&counter_props(2)).unwrap().into_dict(),
    ));
    let before = Arc::strong_count(&local);

    let resolved = trampolines::conflict_resolver_trampoline(
        dict.as_raw(),
        doc_id.as_ptr(),
        Arc::as_ptr(&local),
        Arc::as_ptr(&remote),
    );

    assert_eq!(resolved, Arc::as_ptr(&local));
    assert_eq!(Arc::strong_count(&local), before + 1);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(session.dispatch_stats().unregistered, 1);

    // The engine owns the returned reference; hand it back.
    let adopted = unsafe { NativeDocument::adopt_raw(resolved) }.unwrap();
    assert_eq!(adopted.sequence(), 1);
    drop(adopted);
    assert_eq!(Arc::strong_count(&local), before);
}

#[test]
fn test_dispatch_after_session_closed_is_dropped() {
    let (_engine, session) = setup();
    let calls = Arc::new(AtomicUsize::new(0));

    let counter = calls.clone();
    session
        .add_database_change_listener(
            ExecutionContext::new().with_token("T1"),
            &[],
            move |_, _| {
                counter.fetch_add(1, Ordering::SeqCst);
            },
        )
        .unwrap();
    let context = ExecutionContext::new()
        .with_token("T1")
        .with(SESSION_KEY, Value::UInt(session.id()));
    let dict = pack(&context, &[TOKEN_KEY, SESSION_KEY], &ValueWriter::default()).unwrap();

    session.close();
    trampolines::database_change_trampoline(dict.as_raw(), 0, std::ptr::null());
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[test]
fn test_close_races_with_removal() {
    let (engine, session) = setup();
    let tokens: Vec<String> = (0..32)
        .map(|i| {
            session
                .add_database_change_listener(
                    ExecutionContext::new().with_token(format!("L{}", i)),
                    &[],
                    |_, _| {},
                )
                .unwrap()
                .token()
                .to_string()
        })
        .collect();

    // Removers and close may both claim a token; whichever loses sees
    // ListenerNotFound and moves on.
    let removers: Vec<_> = tokens
        .chunks(8)
        .map(|chunk| {
            let session = session.clone();
            let chunk = chunk.to_vec();
            thread::spawn(move || {
                for token in chunk {
                    let _ = session.remove_listener_by_id(&token);
                }
            })
        })
        .collect();
    session.close();
    for handle in removers {
        handle.join().unwrap();
    }

    assert!(session.is_closed());
    assert_eq!(session.listener_count(), 0);
    assert_eq!(engine.listener_count(), 0);
}

#[test]
fn test_listener_removes_itself_during_dispatch() {
    let (engine, session) = setup();
    let calls = Arc::new(AtomicUsize::new(0));

    let counter = calls.clone();
    let weak: Weak<Session> = Arc::downgrade(&session);
    session
        .add_database_change_listener(
            ExecutionContext::new().with_token("once"),
            &[],
            move |ctx, _| {
                counter.fetch_add(1, Ordering::SeqCst);
                if let (Some(session), Some(token)) = (weak.upgrade(), ctx.token()) {
                    session.remove_listener_by_id(token).unwrap();
                }
            },
        )
        .unwrap();

    session.save_properties("a", &counter_props(1)).unwrap();
    engine.flush();
    session.save_properties("b", &counter_props(2)).unwrap();
    engine.flush();

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(session.listener_count(), 0);
    assert_eq!(engine.listener_count(), 0);
}

#[test]
fn test_register_and_remove_while_events_flow() {
    let (engine, session) = setup();
    let running = Arc::new(AtomicBool::new(true));
    let delivered = Arc::new(AtomicUsize::new(0));

    let writer = {
        let session = session.clone();
        let running = running.clone();
        thread::spawn(move || {
            let mut n = 0;
            loop {
                session
                    .save_properties(&format!("doc{}", n % 16), &counter_props(n))
                    .unwrap();
                n += 1;
                if !running.load(Ordering::SeqCst) {
                    return n;
                }
            }
        })
    };

    let churners: Vec<_> = (0..4)
        .map(|_| {
            let session = session.clone();
            let delivered = delivered.clone();
            thread::spawn(move || {
                for _ in 0..100 {
                    let delivered = delivered.clone();
                    let listener = session
                        .add_database_change_listener(ExecutionContext::new(), &[], move |_, ids| {
                            delivered.fetch_add(ids.len(), Ordering::SeqCst);
                        })
                        .unwrap();
                    session.remove_listener(listener).unwrap();
                }
            })
        })
        .collect();

    for churner in churners {
        churner.join().unwrap();
    }
    running.store(false, Ordering::SeqCst);
    let saves = writer.join().unwrap();
    engine.flush();

    assert!(saves > 0);
    assert_eq!(session.listener_count(), 0);
    assert_eq!(engine.listener_count(), 0);

    // Nothing is delivered once every listener is gone.
    let before = delivered.load(Ordering::SeqCst);
    session.save_properties("after", &counter_props(0)).unwrap();
    engine.flush();
    assert_eq!(delivered.load(Ordering::SeqCst), before);
}

#[test]
fn test_sessions_share_one_engine() {
    let engine = Arc::new(MemoryEngine::new(EngineConfig::default()).unwrap());
    let a = Session::new(engine.clone(), SessionConfig::default());
    let b = Session::new(engine.clone(), SessionConfig::default());
    assert_ne!(a.id(), b.id());
    assert!(live_sessions() >= 2);

    let seen_a = Arc::new(AtomicUsize::new(0));
    let seen_b = Arc::new(AtomicUsize::new(0));
    let counter = seen_a.clone();
    a.add_database_change_listener(ExecutionContext::new().with_token("T1"), &[], move |_, _| {
        counter.fetch_add(1, Ordering::SeqCst);
    })
    .unwrap();
    // Tokens are scoped per session.
    let counter = seen_b.clone();
    b.add_database_change_listener(ExecutionContext::new().with_token("T1"), &[], move |_, _| {
        counter.fetch_add(1, Ordering::SeqCst);
    })
    .unwrap();

    a.save_properties("doc", &counter_props(1)).unwrap();
    engine.flush();
    assert_eq!(seen_a.load(Ordering::SeqCst), 1);
    assert_eq!(seen_b.load(Ordering::SeqCst), 1);

    drop(a);
    b.save_properties("doc", &counter_props(2)).unwrap();
    engine.flush();
    assert_eq!(seen_a.load(Ordering::SeqCst), 1);
    assert_eq!(seen_b.load(Ordering::SeqCst), 2);
}
