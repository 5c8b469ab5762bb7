use rowstage_engine::{DeleteDisplay, RowOrigin, RowState, SandboxConfig};
use rowstage_harness::{TestSandbox, int, key, row, text, users};

fn fetched_page() -> Vec<rowstage_core::Row> {
    vec![
        row([("id", int(1)), ("name", text("ada")), ("role", text("admin"))]),
        row([("id", int(2)), ("name", text("bob")), ("role", text("user"))]),
        row([("id", int(3)), ("name", text("cy")), ("role", text("user"))]),
    ]
}

// ============================================================================
// Updates and deletes over fetched rows
// ============================================================================

#[test]
fn update_replaces_only_staged_columns() -> Result<(), Box<dyn std::error::Error>> {
    let sandbox = TestSandbox::new()?;
    sandbox.engine.set_key_columns(users(), vec!["id".into()]);
    let outcome = sandbox.update(
        users(),
        Some(key([("id", int(2))])),
        row([("role", text("user"))]),
        row([("role", text("owner"))]),
    )?;

    let fetched = fetched_page();
    let page = sandbox.engine.project(&sandbox.session, &users(), &fetched);
    assert_eq!(page.rows.len(), 3);

    let updated = &page.rows[1];
    assert_eq!(updated.state, RowState::Updated);
    assert_eq!(updated.origin, RowOrigin::Fetched(1));
    assert_eq!(updated.change_id, Some(outcome.change_id()));
    assert_eq!(updated.values.get("role"), Some(&text("owner")));
    assert_eq!(updated.values.get("name"), Some(&text("bob")));
    assert_eq!(updated.pending_columns.len(), 1);
    assert!(updated.pending_columns.contains("role"));

    assert_eq!(page.rows[0].state, RowState::Clean);
    assert_eq!(page.rows[2].state, RowState::Clean);
    assert_eq!(fetched, fetched_page());
    Ok(())
}

#[test]
fn staged_value_already_in_the_fetch_is_still_flagged() -> Result<(), Box<dyn std::error::Error>> {
    let sandbox = TestSandbox::new()?;
    sandbox.update(
        users(),
        Some(key([("id", int(1))])),
        row([("name", text("a"))]),
        row([("name", text("ada"))]),
    )?;

    let page = sandbox.engine.project(&sandbox.session, &users(), &fetched_page());
    let display = &page.rows[0];
    assert_eq!(display.state, RowState::Updated);
    assert_eq!(display.values.get("name"), Some(&text("ada")));
    assert!(display.pending_columns.contains("name"));
    assert_eq!(sandbox.engine.changes(&sandbox.session).len(), 1);
    Ok(())
}

#[test]
fn pending_delete_is_struck_through_by_default() -> Result<(), Box<dyn std::error::Error>> {
    let sandbox = TestSandbox::new()?;
    sandbox.delete(users(), Some(key([("id", int(3))])), row([("name", text("cy"))]))?;

    let page = sandbox.engine.project(&sandbox.session, &users(), &fetched_page());
    assert_eq!(page.rows.len(), 3);
    assert_eq!(page.rows[2].state, RowState::PendingDelete);
    assert!(page.hidden.is_empty());
    Ok(())
}

#[test]
fn hidden_deletes_stay_retrievable_for_undo() -> Result<(), Box<dyn std::error::Error>> {
    let sandbox = TestSandbox::with_config(SandboxConfig {
        delete_display: DeleteDisplay::Hidden,
        ..SandboxConfig::default()
    })?;
    let deleted = sandbox.delete(users(), Some(key([("id", int(3))])), row([("name", text("cy"))]))?;

    let page = sandbox.engine.project(&sandbox.session, &users(), &fetched_page());
    assert_eq!(page.rows.len(), 2);
    assert_eq!(page.hidden.len(), 1);
    let hidden = page.find(deleted.change_id()).ok_or("hidden row missing")?;
    assert_eq!(hidden.values.get("name"), Some(&text("cy")));

    sandbox.engine.remove(&sandbox.session, deleted.change_id())?;
    let page = sandbox.engine.project(&sandbox.session, &users(), &fetched_page());
    assert_eq!(page.rows.len(), 3);
    assert_eq!(page.pending_count(), 0);
    Ok(())
}

// ============================================================================
// Inserts
// ============================================================================

#[test]
fn unmatched_inserts_follow_the_fetched_rows() -> Result<(), Box<dyn std::error::Error>> {
    let sandbox = TestSandbox::new()?;
    sandbox.engine.set_key_columns(users(), vec!["id".into()]);
    let first = sandbox.insert(users(), row([("id", int(10)), ("name", text("dee"))]))?;
    let second = sandbox.insert(users(), row([("id", int(11)), ("name", text("eve"))]))?;

    let page = sandbox.engine.project(&sandbox.session, &users(), &fetched_page());
    assert_eq!(page.rows.len(), 5);
    assert_eq!(page.rows[3].change_id, Some(first.change_id()));
    assert_eq!(page.rows[3].origin, RowOrigin::Synthetic);
    assert_eq!(page.rows[4].change_id, Some(second.change_id()));
    assert_eq!(page.rows[4].state, RowState::Inserted);
    Ok(())
}

#[test]
fn insert_reconciles_with_a_later_fetch_but_stays_staged() -> Result<(), Box<dyn std::error::Error>> {
    let sandbox = TestSandbox::new()?;
    sandbox.engine.set_key_columns(users(), vec!["id".into()]);
    let inserted = sandbox.insert(users(), row([("id", int(4)), ("name", text("dan"))]))?;

    let mut refetched = fetched_page();
    refetched.push(row([("id", int(4)), ("name", text("dan")), ("role", text("user"))]));
    let page = sandbox.engine.project(&sandbox.session, &users(), &refetched);

    assert_eq!(page.rows.len(), 4);
    let matched = page.find(inserted.change_id()).ok_or("insert not displayed")?;
    assert_eq!(matched.origin, RowOrigin::MatchedInsert(3));
    assert_eq!(matched.state, RowState::Inserted);
    assert_eq!(sandbox.engine.changes(&sandbox.session).len(), 1);
    Ok(())
}

#[test]
fn keyless_insert_never_reconciles_with_an_identical_row() -> Result<(), Box<dyn std::error::Error>> {
    let sandbox = TestSandbox::new()?;
    let existing = row([("id", int(1)), ("name", text("ada")), ("role", text("admin"))]);
    sandbox.insert(users(), existing)?;

    let page = sandbox.engine.project(&sandbox.session, &users(), &fetched_page());
    assert_eq!(page.rows.len(), 4);
    assert_eq!(page.rows[0].state, RowState::Clean);
    assert_eq!(page.rows[3].origin, RowOrigin::Synthetic);
    Ok(())
}

// ============================================================================
// Inactive sessions
// ============================================================================

#[test]
fn inactive_session_passes_rows_through() -> Result<(), Box<dyn std::error::Error>> {
    let sandbox = TestSandbox::new()?;
    sandbox.delete(users(), Some(key([("id", int(1))])), row([("name", text("ada"))]))?;
    sandbox.engine.deactivate(&sandbox.session, false)?;

    let page = sandbox.engine.project(&sandbox.session, &users(), &fetched_page());
    assert_eq!(page.rows.len(), 3);
    assert_eq!(page.pending_count(), 0);
    assert!(page.rows.iter().all(|display| display.state == RowState::Clean));
    Ok(())
}
