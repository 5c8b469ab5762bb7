use std::sync::Arc;

use parking_lot::Mutex;
use rowstage_core::{ChangeKind, RowEdit, SessionId};
use rowstage_engine::{EngineError, LedgerEventKind, RecordOutcome};
use rowstage_harness::{TestSandbox, int, key, orders, row, text, users};

fn keyed_sandbox() -> Result<TestSandbox, EngineError> {
    let sandbox = TestSandbox::new()?;
    sandbox.engine.set_key_columns(users(), vec!["id".into()]);
    sandbox.engine.set_key_columns(orders(), vec!["id".into()]);
    Ok(sandbox)
}

// ============================================================================
// Merge rules
// ============================================================================

#[test]
fn insert_then_update_stays_one_insert() -> Result<(), Box<dyn std::error::Error>> {
    let sandbox = keyed_sandbox()?;
    sandbox.insert(users(), row([("id", int(1)), ("name", text("a"))]))?;
    let outcome = sandbox.update(
        users(),
        Some(key([("id", int(1))])),
        row([("name", text("a"))]),
        row([("name", text("b"))]),
    )?;
    assert!(matches!(outcome, RecordOutcome::Merged(_)));

    let changes = sandbox.engine.changes(&sandbox.session);
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].kind, ChangeKind::Insert);
    assert_eq!(
        changes[0].new_values,
        Some(row([("id", int(1)), ("name", text("b"))]))
    );
    Ok(())
}

#[test]
fn update_then_delete_keeps_the_true_original() -> Result<(), Box<dyn std::error::Error>> {
    let sandbox = keyed_sandbox()?;
    sandbox.update(
        users(),
        Some(key([("id", int(5))])),
        row([("x", int(1))]),
        row([("x", int(2))]),
    )?;
    let outcome = sandbox.delete(users(), Some(key([("id", int(5))])), row([]))?;
    assert!(matches!(outcome, RecordOutcome::Replaced(_)));

    let changes = sandbox.engine.changes(&sandbox.session);
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].kind, ChangeKind::Delete);
    assert_eq!(changes[0].old_values, Some(row([("x", int(1))])));
    assert_eq!(changes[0].new_values, None);
    Ok(())
}

#[test]
fn insert_then_delete_cancels_out() -> Result<(), Box<dyn std::error::Error>> {
    let sandbox = keyed_sandbox()?;
    sandbox.insert(orders(), row([("id", int(10)), ("total", int(99))]))?;
    sandbox.insert(users(), row([("id", int(7)), ("name", text("z"))]))?;
    assert_eq!(sandbox.engine.changes(&sandbox.session).len(), 2);

    let outcome = sandbox.delete(users(), Some(key([("id", int(7))])), row([("name", text("z"))]))?;
    assert!(matches!(outcome, RecordOutcome::Cancelled(_)));

    let changes = sandbox.engine.changes(&sandbox.session);
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].table, orders());
    Ok(())
}

#[test]
fn repeated_updates_diff_against_the_first_pre_image() -> Result<(), Box<dyn std::error::Error>> {
    let sandbox = keyed_sandbox()?;
    let pk = Some(key([("id", int(3))]));
    sandbox.update(users(), pk.clone(), row([("x", int(1))]), row([("x", int(2))]))?;
    sandbox.update(users(), pk.clone(), row([("x", int(2))]), row([("x", int(3))]))?;
    sandbox.update(
        users(),
        pk,
        row([("x", int(3)), ("y", text("old"))]),
        row([("y", text("new"))]),
    )?;

    let changes = sandbox.engine.changes(&sandbox.session);
    assert_eq!(changes.len(), 1);
    assert_eq!(
        changes[0].old_values,
        Some(row([("x", int(1)), ("y", text("old"))]))
    );
    assert_eq!(
        changes[0].new_values,
        Some(row([("x", int(3)), ("y", text("new"))]))
    );
    Ok(())
}

#[test]
fn deleted_row_rejects_edits_until_undone() -> Result<(), Box<dyn std::error::Error>> {
    let sandbox = keyed_sandbox()?;
    let pk = Some(key([("id", int(9))]));
    let deleted = sandbox.delete(users(), pk.clone(), row([("name", text("n"))]))?;

    let result = sandbox.update(users(), pk.clone(), row([("name", text("n"))]), row([("name", text("m"))]));
    assert!(matches!(result, Err(EngineError::Conflict { .. })));
    let result = sandbox.delete(users(), pk.clone(), row([]));
    assert!(matches!(result, Err(EngineError::Conflict { .. })));
    assert_eq!(sandbox.engine.changes(&sandbox.session).len(), 1);

    sandbox.engine.remove(&sandbox.session, deleted.change_id())?;
    let outcome = sandbox.update(users(), pk, row([("name", text("n"))]), row([("name", text("m"))]))?;
    assert!(matches!(outcome, RecordOutcome::Appended(_)));
    Ok(())
}

#[test]
fn keyed_insert_collision_is_a_conflict() -> Result<(), Box<dyn std::error::Error>> {
    let sandbox = keyed_sandbox()?;
    sandbox.insert(users(), row([("id", int(1)), ("name", text("a"))]))?;
    let result = sandbox.insert(users(), row([("id", int(1)), ("name", text("b"))]));
    assert!(matches!(result, Err(EngineError::Conflict { .. })));
    Ok(())
}

#[test]
fn keyless_rows_merge_by_full_row_image() -> Result<(), Box<dyn std::error::Error>> {
    let sandbox = TestSandbox::new()?;
    let original = row([("label", text("a")), ("qty", int(1))]);
    sandbox.update(users(), None, original.clone(), row([("qty", int(2))]))?;

    // The view now shows qty = 2 and addresses the next edit by that image.
    let shown = row([("label", text("a")), ("qty", int(2))]);
    let outcome = sandbox.delete(users(), None, shown)?;
    assert!(matches!(outcome, RecordOutcome::Replaced(_)));

    let changes = sandbox.engine.changes(&sandbox.session);
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].old_values, Some(original));
    Ok(())
}

#[test]
fn update_without_any_address_is_rejected() -> Result<(), Box<dyn std::error::Error>> {
    let sandbox = TestSandbox::new()?;
    let result = sandbox.update(users(), None, row([]), row([("name", text("x"))]));
    assert!(matches!(result, Err(EngineError::Addressing { .. })));
    assert!(sandbox.engine.changes(&sandbox.session).is_empty());
    Ok(())
}

// ============================================================================
// Session lifecycle and listing
// ============================================================================

#[test]
fn inactive_session_does_not_record() -> Result<(), Box<dyn std::error::Error>> {
    let sandbox = keyed_sandbox()?;
    sandbox.insert(users(), row([("id", int(1))]))?;
    sandbox.engine.deactivate(&sandbox.session, false)?;
    assert!(!sandbox.engine.is_active(&sandbox.session));
    assert_eq!(sandbox.engine.changes(&sandbox.session).len(), 1);

    let result = sandbox.insert(users(), row([("id", int(2))]));
    assert!(matches!(result, Err(EngineError::SessionInactive(_))));

    sandbox.engine.activate(&sandbox.session)?;
    sandbox.engine.deactivate(&sandbox.session, true)?;
    assert!(sandbox.engine.changes(&sandbox.session).is_empty());
    Ok(())
}

#[test]
fn grouped_listing_follows_first_change_per_table() -> Result<(), Box<dyn std::error::Error>> {
    let sandbox = keyed_sandbox()?;
    sandbox.insert(orders(), row([("id", int(1))]))?;
    sandbox.insert(users(), row([("id", int(1))]))?;
    sandbox.update(users(), Some(key([("id", int(2))])), row([("n", int(0))]), row([("n", int(1))]))?;
    sandbox.delete(orders(), Some(key([("id", int(3))])), row([("total", int(5))]))?;

    let groups = sandbox.engine.list_grouped(&sandbox.session);
    assert_eq!(groups.len(), 2);
    assert_eq!(groups[0].table, orders());
    assert_eq!((groups[0].inserts, groups[0].updates, groups[0].deletes), (1, 0, 1));
    assert_eq!(groups[1].table, users());
    assert_eq!((groups[1].inserts, groups[1].updates, groups[1].deletes), (1, 1, 0));
    assert_eq!(groups[1].display_name, "app.users");

    assert_eq!(sandbox.engine.clear_table(&sandbox.session, &orders())?, 2);
    assert_eq!(sandbox.engine.list_grouped(&sandbox.session).len(), 1);
    assert_eq!(sandbox.engine.clear_all(&sandbox.session)?, 2);
    Ok(())
}

#[test]
fn sessions_never_share_changes() -> Result<(), Box<dyn std::error::Error>> {
    let sandbox = keyed_sandbox()?;
    let other = SessionId::new("session-2");
    sandbox.engine.activate(&other)?;

    sandbox.insert(users(), row([("id", int(1))]))?;
    sandbox
        .engine
        .record(&other, RowEdit::insert(users(), row([("id", int(1))])))?;

    assert_eq!(sandbox.engine.changes(&sandbox.session).len(), 1);
    assert_eq!(sandbox.engine.changes(&other).len(), 1);
    sandbox.engine.clear_all(&other)?;
    assert_eq!(sandbox.engine.changes(&sandbox.session).len(), 1);
    Ok(())
}

// ============================================================================
// Subscriptions
// ============================================================================

#[test]
fn subscribers_see_every_mutation_with_its_session() -> Result<(), Box<dyn std::error::Error>> {
    let sandbox = keyed_sandbox()?;
    let other = SessionId::new("session-2");
    let seen = Arc::new(Mutex::new(Vec::new()));

    let sink = seen.clone();
    let watched = sandbox.session.clone();
    let subscription = sandbox.engine.subscribe(move |event| {
        if event.session_id == watched {
            sink.lock().push(event.kind.clone());
        }
    });

    let recorded = sandbox.insert(users(), row([("id", int(1))]))?;
    sandbox.engine.activate(&other)?;
    sandbox.engine.remove(&sandbox.session, recorded.change_id())?;

    assert_eq!(
        *seen.lock(),
        vec![
            LedgerEventKind::Recorded(recorded),
            LedgerEventKind::Removed(recorded.change_id()),
        ]
    );

    drop(subscription);
    sandbox.insert(users(), row([("id", int(2))]))?;
    assert_eq!(seen.lock().len(), 2);
    Ok(())
}

#[test]
fn listener_can_query_grouped_changes_during_dispatch() -> Result<(), Box<dyn std::error::Error>> {
    let sandbox = keyed_sandbox()?;
    let totals = Arc::new(Mutex::new(Vec::new()));

    let ledger = sandbox.engine.ledger().clone();
    let sink = totals.clone();
    let _subscription = sandbox.engine.subscribe(move |event| {
        let total: usize = ledger.list_grouped(&event.session_id).iter().map(|g| g.total()).sum();
        sink.lock().push(total);
    });

    sandbox.insert(users(), row([("id", int(1))]))?;
    sandbox.insert(orders(), row([("id", int(1))]))?;
    assert_eq!(*totals.lock(), vec![1, 2]);
    Ok(())
}
