//! Session-keyed change ledger.
//!
//! Holds every staged row mutation per working session, collapses repeated
//! edits of one row through [`crate::merge`], persists each session to a
//! [`PreferenceStore`] after every mutation and notifies subscribers.
//!
//! The ledger is internally synchronized. Listeners are invoked after all
//! internal locks are released, so a listener may read or mutate the ledger
//! it is subscribed to.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tracing::{debug, info, warn};

use rowstage_core::hlc::HlcClock;
use rowstage_core::{
    ChangeId, ChangeKind, CoreError, Hlc, RowAddress, RowEdit, RowKey, SandboxChange, SessionId,
    TableRef, project_key,
};
use rowstage_storage::document::{self, PersistedSession};
use rowstage_storage::{MemoryPreferenceStore, PreferenceStore};

use crate::compiler::KeyColumnMap;
use crate::error::EngineError;
use crate::merge::{self, RecordOutcome};

/// Changes of one table, as shown in the pending-changes panel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SandboxChangeGroup {
    pub table: TableRef,
    pub display_name: String,
    pub inserts: usize,
    pub updates: usize,
    pub deletes: usize,
    pub first_timestamp: Hlc,
    pub change_ids: Vec<ChangeId>,
}

impl SandboxChangeGroup {
    pub fn total(&self) -> usize {
        self.inserts + self.updates + self.deletes
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerEventKind {
    Activated,
    Deactivated { discarded: bool },
    Recorded(RecordOutcome),
    Removed(ChangeId),
    KeyAssigned(ChangeId),
    Cleared { removed: usize },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerEvent {
    pub session_id: SessionId,
    pub kind: LedgerEventKind,
}

type Listener = Arc<dyn Fn(&LedgerEvent) + Send + Sync>;

#[derive(Default)]
struct Listeners {
    next_id: AtomicU64,
    entries: RwLock<BTreeMap<u64, Listener>>,
}

/// Keeps a listener registered. Dropping the handle unsubscribes.
pub struct Subscription {
    id: u64,
    listeners: Weak<Listeners>,
}

impl Subscription {
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(listeners) = self.listeners.upgrade() {
            listeners.entries.write().remove(&self.id);
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

#[derive(Debug, Default)]
struct SessionState {
    active: bool,
    /// Set while an apply is in flight.
    frozen: bool,
    changes: Vec<SandboxChange>,
}

impl SessionState {
    fn is_vacant(&self) -> bool {
        !self.active && !self.frozen && self.changes.is_empty()
    }
}

struct LedgerState {
    clock: HlcClock,
    sessions: HashMap<SessionId, SessionState>,
    key_columns: KeyColumnMap,
}

pub struct ChangeLedger {
    store: Arc<dyn PreferenceStore>,
    prefix: String,
    state: Mutex<LedgerState>,
    listeners: Arc<Listeners>,
}

impl ChangeLedger {
    pub fn new(store: Arc<dyn PreferenceStore>, prefix: impl Into<String>) -> Self {
        Self {
            store,
            prefix: prefix.into(),
            state: Mutex::new(LedgerState {
                clock: HlcClock::new(),
                sessions: HashMap::new(),
                key_columns: HashMap::new(),
            }),
            listeners: Arc::new(Listeners::default()),
        }
    }

    /// A ledger that persists nowhere beyond its own lifetime.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryPreferenceStore::new()), "sandbox")
    }

    // ========================================================================
    // Session lifecycle
    // ========================================================================

    pub fn activate(&self, session_id: &SessionId) -> Result<(), EngineError> {
        self.mutate(session_id, |session| {
            session.active = true;
            Ok(())
        })?;
        info!(session = %session_id, "sandbox activated");
        self.notify(session_id, LedgerEventKind::Activated);
        Ok(())
    }

    /// Turn the sandbox off. Pending changes survive unless `discard` is set;
    /// confirming that with the user is the caller's job.
    pub fn deactivate(&self, session_id: &SessionId, discard: bool) -> Result<(), EngineError> {
        let dropped = self.mutate(session_id, |session| {
            session.active = false;
            Ok(if discard { std::mem::take(&mut session.changes).len() } else { 0 })
        })?;
        info!(session = %session_id, discard, dropped, "sandbox deactivated");
        self.notify(session_id, LedgerEventKind::Deactivated { discarded: discard });
        Ok(())
    }

    pub fn is_active(&self, session_id: &SessionId) -> bool {
        self.read(session_id, |session| session.active)
    }

    // ========================================================================
    // Recording
    // ========================================================================

    /// Stage one edit, merging it with the change already pending for the
    /// same row.
    pub fn record(&self, session_id: &SessionId, edit: RowEdit) -> Result<RecordOutcome, EngineError> {
        edit.validate()?;
        let outcome = {
            let mut guard = self.state.lock();
            let LedgerState {
                clock,
                sessions,
                key_columns,
            } = &mut *guard;
            let session = self.session_entry(sessions, clock, session_id);
            ensure_mutable(session_id, session)?;
            if !session.active {
                return Err(EngineError::SessionInactive(session_id.clone()));
            }

            let edit = derive_primary_key(edit, key_columns);
            let table = edit.table().clone();
            let kind = edit.kind();
            let at = clock.tick()?;
            let outcome = merge::merge_change(&mut session.changes, edit.into_change(ChangeId::new(), at))?;
            debug!(
                session = %session_id,
                table = %table,
                kind = kind.as_str(),
                outcome = ?outcome,
                pending = session.changes.len(),
                "change recorded"
            );
            self.persist(session_id, session);
            outcome
        };
        self.notify(session_id, LedgerEventKind::Recorded(outcome));
        Ok(outcome)
    }

    /// Undo one staged change. No merge side effects.
    pub fn remove(&self, session_id: &SessionId, change_id: ChangeId) -> Result<SandboxChange, EngineError> {
        let removed = self.mutate(session_id, |session| {
            let index = session
                .changes
                .iter()
                .position(|change| change.id == change_id)
                .ok_or(EngineError::ChangeNotFound(change_id))?;
            Ok(session.changes.remove(index))
        })?;
        debug!(session = %session_id, change = %change_id, "change removed");
        self.notify(session_id, LedgerEventKind::Removed(change_id));
        Ok(removed)
    }

    pub fn clear_all(&self, session_id: &SessionId) -> Result<usize, EngineError> {
        let removed = self.mutate(session_id, |session| Ok(std::mem::take(&mut session.changes).len()))?;
        self.notify(session_id, LedgerEventKind::Cleared { removed });
        Ok(removed)
    }

    pub fn clear_table(&self, session_id: &SessionId, table: &TableRef) -> Result<usize, EngineError> {
        let removed = self.mutate(session_id, |session| {
            let before = session.changes.len();
            session.changes.retain(|change| &change.table != table);
            Ok(before - session.changes.len())
        })?;
        self.notify(session_id, LedgerEventKind::Cleared { removed });
        Ok(removed)
    }

    /// Drop exactly the listed changes. Used once an apply committed them,
    /// which is why it bypasses the apply freeze.
    pub(crate) fn clear_applied(&self, session_id: &SessionId, ids: &[ChangeId]) -> usize {
        let removed = {
            let mut guard = self.state.lock();
            let LedgerState { clock, sessions, .. } = &mut *guard;
            let session = self.session_entry(sessions, clock, session_id);
            let before = session.changes.len();
            session.changes.retain(|change| !ids.contains(&change.id));
            let removed = before - session.changes.len();
            self.persist(session_id, session);
            removed
        };
        self.notify(session_id, LedgerEventKind::Cleared { removed });
        removed
    }

    // ========================================================================
    // Keys
    // ========================================================================

    /// Register the unique key columns of a table. Edits arriving without a
    /// primary key get one derived from these columns when the row image
    /// carries all of them.
    pub fn set_key_columns(&self, table: TableRef, columns: Vec<String>) {
        let mut state = self.state.lock();
        if columns.is_empty() {
            state.key_columns.remove(&table);
        } else {
            debug!(table = %table, ?columns, "key columns registered");
            state.key_columns.insert(table, columns);
        }
    }

    pub fn key_columns(&self, table: &TableRef) -> Option<Vec<String>> {
        self.state.lock().key_columns.get(table).cloned()
    }

    pub fn key_column_map(&self) -> KeyColumnMap {
        self.state.lock().key_columns.clone()
    }

    /// Give a staged insert the key the database generated for it.
    pub fn assign_primary_key(
        &self,
        session_id: &SessionId,
        change_id: ChangeId,
        key: RowKey,
    ) -> Result<(), EngineError> {
        if key.is_empty() {
            return Err(CoreError::InvalidChange("empty primary key".into()).into());
        }
        self.mutate(session_id, |session| {
            let index = session
                .changes
                .iter()
                .position(|change| change.id == change_id)
                .ok_or(EngineError::ChangeNotFound(change_id))?;
            let target = &session.changes[index];
            if target.kind != ChangeKind::Insert {
                return Err(CoreError::InvalidChange(format!(
                    "only inserts take a generated key, {change_id} is an {}",
                    target.kind.as_str()
                ))
                .into());
            }
            let address = RowAddress::Key(key.clone());
            let taken = session.changes.iter().enumerate().any(|(i, other)| {
                i != index && other.table == target.table && merge::targets(other, &address)
            });
            if taken {
                return Err(EngineError::Conflict {
                    table: target.table.display_name(),
                    reason: "another staged change already owns this key".into(),
                });
            }
            session.changes[index].primary_key = Some(key);
            Ok(())
        })?;
        self.notify(session_id, LedgerEventKind::KeyAssigned(change_id));
        Ok(())
    }

    // ========================================================================
    // Reads
    // ========================================================================

    pub fn changes(&self, session_id: &SessionId) -> Vec<SandboxChange> {
        self.read(session_id, |session| session.changes.clone())
    }

    pub fn changes_for_table(&self, session_id: &SessionId, table: &TableRef) -> Vec<SandboxChange> {
        self.read(session_id, |session| {
            session
                .changes
                .iter()
                .filter(|change| &change.table == table)
                .cloned()
                .collect()
        })
    }

    pub fn change(&self, session_id: &SessionId, change_id: ChangeId) -> Option<SandboxChange> {
        self.read(session_id, |session| {
            session.changes.iter().find(|change| change.id == change_id).cloned()
        })
    }

    pub fn change_count(&self, session_id: &SessionId) -> usize {
        self.read(session_id, |session| session.changes.len())
    }

    /// Pending changes bucketed per table, ordered by each table's earliest
    /// change.
    pub fn list_grouped(&self, session_id: &SessionId) -> Vec<SandboxChangeGroup> {
        self.read(session_id, |session| {
            let mut groups: Vec<SandboxChangeGroup> = Vec::new();
            for change in &session.changes {
                let index = match groups.iter().position(|group| group.table == change.table) {
                    Some(index) => index,
                    None => {
                        groups.push(SandboxChangeGroup {
                            table: change.table.clone(),
                            display_name: change.table.display_name(),
                            inserts: 0,
                            updates: 0,
                            deletes: 0,
                            first_timestamp: change.timestamp,
                            change_ids: Vec::new(),
                        });
                        groups.len() - 1
                    }
                };
                let group = &mut groups[index];
                match change.kind {
                    ChangeKind::Insert => group.inserts += 1,
                    ChangeKind::Update => group.updates += 1,
                    ChangeKind::Delete => group.deletes += 1,
                }
                group.first_timestamp = group.first_timestamp.min(change.timestamp);
                group.change_ids.push(change.id);
            }
            groups.sort_by(|a, b| a.first_timestamp.cmp(&b.first_timestamp).then_with(|| a.table.cmp(&b.table)));
            groups
        })
    }

    /// Sessions with a persisted document, whether loaded yet or not.
    pub fn stored_sessions(&self) -> Result<Vec<SessionId>, EngineError> {
        Ok(document::stored_sessions(self.store.as_ref(), &self.prefix)?)
    }

    pub fn is_frozen(&self, session_id: &SessionId) -> bool {
        self.read(session_id, |session| session.frozen)
    }

    // ========================================================================
    // Subscriptions
    // ========================================================================

    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&LedgerEvent) + Send + Sync + 'static,
    {
        let id = self.listeners.next_id.fetch_add(1, Ordering::Relaxed);
        self.listeners.entries.write().insert(id, Arc::new(listener));
        Subscription {
            id,
            listeners: Arc::downgrade(&self.listeners),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.listeners.entries.read().len()
    }

    // ========================================================================
    // Apply freeze
    // ========================================================================

    pub(crate) fn freeze(&self, session_id: &SessionId) -> Result<(), EngineError> {
        let mut guard = self.state.lock();
        let LedgerState { clock, sessions, .. } = &mut *guard;
        let session = self.session_entry(sessions, clock, session_id);
        ensure_mutable(session_id, session)?;
        session.frozen = true;
        Ok(())
    }

    pub(crate) fn unfreeze(&self, session_id: &SessionId) {
        let mut guard = self.state.lock();
        if let Some(session) = guard.sessions.get_mut(session_id) {
            session.frozen = false;
            if session.is_vacant() {
                guard.sessions.remove(session_id);
            }
        }
    }

    // ========================================================================
    // Internals
    // ========================================================================

    /// Fetch the session's state, recovering it from the store on first use.
    fn session_entry<'a>(
        &self,
        sessions: &'a mut HashMap<SessionId, SessionState>,
        clock: &mut HlcClock,
        session_id: &SessionId,
    ) -> &'a mut SessionState {
        sessions
            .entry(session_id.clone())
            .or_insert_with(|| self.recover(clock, session_id))
    }

    fn recover(&self, clock: &mut HlcClock, session_id: &SessionId) -> SessionState {
        match document::load_session(self.store.as_ref(), &self.prefix, session_id) {
            Ok(Some(document)) => {
                for change in &document.changes {
                    clock.observe(change.updated_at);
                }
                debug!(
                    session = %session_id,
                    changes = document.changes.len(),
                    active = document.active,
                    "ledger recovered"
                );
                SessionState {
                    active: document.active,
                    frozen: false,
                    changes: document.changes,
                }
            }
            Ok(None) => SessionState::default(),
            Err(e) => {
                warn!(session = %session_id, error = %e, "discarding unreadable ledger document");
                SessionState::default()
            }
        }
    }

    /// Run `f` against a mutable session, persist, and hand back its result.
    /// Fails without touching anything while an apply holds the session.
    fn mutate<T>(
        &self,
        session_id: &SessionId,
        f: impl FnOnce(&mut SessionState) -> Result<T, EngineError>,
    ) -> Result<T, EngineError> {
        let mut guard = self.state.lock();
        let LedgerState { clock, sessions, .. } = &mut *guard;
        let session = self.session_entry(sessions, clock, session_id);
        ensure_mutable(session_id, session)?;
        let value = f(session)?;
        self.persist(session_id, session);
        Ok(value)
    }

    /// Reads never leave an entry behind for a session with nothing in it.
    fn read<T>(&self, session_id: &SessionId, f: impl FnOnce(&SessionState) -> T) -> T {
        let mut guard = self.state.lock();
        let LedgerState { clock, sessions, .. } = &mut *guard;
        if let Some(session) = sessions.get(session_id) {
            return f(session);
        }
        let recovered = self.recover(clock, session_id);
        let value = f(&recovered);
        if !recovered.is_vacant() {
            sessions.insert(session_id.clone(), recovered);
        }
        value
    }

    /// Persistence is best effort: a failed write loses at most the latest
    /// edit on crash, so it is logged and not surfaced.
    fn persist(&self, session_id: &SessionId, session: &SessionState) {
        let document = PersistedSession::new(session_id.clone(), session.active, session.changes.clone());
        if let Err(e) = document::save_session(self.store.as_ref(), &self.prefix, &document) {
            warn!(session = %session_id, error = %e, "failed to persist ledger");
        }
    }

    fn notify(&self, session_id: &SessionId, kind: LedgerEventKind) {
        let listeners: Vec<Listener> = self.listeners.entries.read().values().cloned().collect();
        if listeners.is_empty() {
            return;
        }
        let event = LedgerEvent {
            session_id: session_id.clone(),
            kind,
        };
        for listener in listeners {
            listener(&event);
        }
    }
}

fn ensure_mutable(session_id: &SessionId, session: &SessionState) -> Result<(), EngineError> {
    if session.frozen {
        return Err(EngineError::ApplyInProgress(session_id.clone()));
    }
    Ok(())
}

/// Fill in a missing primary key from the table's registered key columns.
fn derive_primary_key(edit: RowEdit, key_columns: &KeyColumnMap) -> RowEdit {
    if edit.primary_key().is_some_and(|key| !key.is_empty()) {
        return edit;
    }
    let Some(columns) = key_columns.get(edit.table()) else {
        return edit;
    };
    match edit {
        RowEdit::Insert { table, values, .. } => RowEdit::Insert {
            primary_key: project_key(&values, columns),
            table,
            values,
        },
        RowEdit::Update {
            table,
            old_values,
            new_values,
            ..
        } => RowEdit::Update {
            primary_key: project_key(&old_values, columns),
            table,
            old_values,
            new_values,
        },
        RowEdit::Delete { table, old_values, .. } => RowEdit::Delete {
            primary_key: project_key(&old_values, columns),
            table,
            old_values,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rowstage_core::{CellValue, Namespace, Row};
    use std::sync::atomic::AtomicUsize;

    fn users() -> TableRef {
        TableRef::new(Namespace::new("app"), "users")
    }

    fn orders() -> TableRef {
        TableRef::new(Namespace::new("app"), "orders")
    }

    fn row(pairs: &[(&str, CellValue)]) -> Row {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    fn active_ledger(session: &SessionId) -> ChangeLedger {
        let ledger = ChangeLedger::in_memory();
        ledger.activate(session).unwrap();
        ledger
    }

    #[test]
    fn reading_unknown_sessions_loads_nothing() {
        let ledger = ChangeLedger::in_memory();
        for n in 0..3 {
            let stray = SessionId::new(format!("stray-{n}"));
            assert!(!ledger.is_active(&stray));
            assert!(ledger.changes(&stray).is_empty());
            assert!(!ledger.is_frozen(&stray));
        }
        assert!(ledger.state.lock().sessions.is_empty());

        let session = SessionId::new("s1");
        ledger.freeze(&session).unwrap();
        ledger.unfreeze(&session);
        assert!(ledger.state.lock().sessions.is_empty());

        ledger.activate(&session).unwrap();
        assert_eq!(ledger.state.lock().sessions.len(), 1);
    }

    #[test]
    fn recording_requires_an_active_session() {
        let ledger = ChangeLedger::in_memory();
        let session = SessionId::new("s1");
        let err = ledger
            .record(&session, RowEdit::insert(users(), row(&[("id", 1i64.into())])))
            .unwrap_err();
        assert!(matches!(err, EngineError::SessionInactive(_)));
    }

    #[test]
    fn key_is_derived_from_registered_columns() {
        let session = SessionId::new("s1");
        let ledger = active_ledger(&session);
        ledger.set_key_columns(users(), vec!["id".into()]);

        ledger
            .record(&session, RowEdit::insert(users(), row(&[("id", 1i64.into()), ("name", "a".into())])))
            .unwrap();
        ledger
            .record(
                &session,
                RowEdit::update(users(), None, row(&[("id", 1i64.into()), ("name", "a".into())]), row(&[("name", "b".into())])),
            )
            .unwrap();

        let changes = ledger.changes(&session);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].primary_key, Some(row(&[("id", 1i64.into())])));
        assert_eq!(
            changes[0].new_values,
            Some(row(&[("id", 1i64.into()), ("name", "b".into())]))
        );
    }

    #[test]
    fn grouped_view_orders_tables_by_first_change() {
        let session = SessionId::new("s1");
        let ledger = active_ledger(&session);
        ledger
            .record(&session, RowEdit::insert(orders(), row(&[("id", 1i64.into())])))
            .unwrap();
        ledger
            .record(&session, RowEdit::delete(users(), Some(row(&[("id", 1i64.into())])), Row::new()))
            .unwrap();
        ledger
            .record(&session, RowEdit::insert(orders(), row(&[("id", 2i64.into())])))
            .unwrap();

        let groups = ledger.list_grouped(&session);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].display_name, "app.orders");
        assert_eq!(groups[0].inserts, 2);
        assert_eq!(groups[1].display_name, "app.users");
        assert_eq!(groups[1].deletes, 1);
        assert_eq!(groups[1].total(), 1);
    }

    #[test]
    fn clear_table_leaves_other_tables() {
        let session = SessionId::new("s1");
        let ledger = active_ledger(&session);
        ledger
            .record(&session, RowEdit::insert(orders(), row(&[("id", 1i64.into())])))
            .unwrap();
        ledger
            .record(&session, RowEdit::insert(users(), row(&[("id", 1i64.into())])))
            .unwrap();

        assert_eq!(ledger.clear_table(&session, &orders()).unwrap(), 1);
        let remaining = ledger.changes(&session);
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].table, users());
    }

    #[test]
    fn deactivate_with_discard_clears_changes() {
        let session = SessionId::new("s1");
        let ledger = active_ledger(&session);
        ledger
            .record(&session, RowEdit::insert(users(), row(&[("id", 1i64.into())])))
            .unwrap();

        ledger.deactivate(&session, false).unwrap();
        assert_eq!(ledger.change_count(&session), 1);
        assert!(!ledger.is_active(&session));

        ledger.deactivate(&session, true).unwrap();
        assert_eq!(ledger.change_count(&session), 0);
    }

    #[test]
    fn frozen_session_rejects_mutations_but_serves_reads() {
        let session = SessionId::new("s1");
        let ledger = active_ledger(&session);
        let outcome = ledger
            .record(&session, RowEdit::insert(users(), row(&[("id", 1i64.into())])))
            .unwrap();

        ledger.freeze(&session).unwrap();
        assert!(matches!(
            ledger.remove(&session, outcome.change_id()),
            Err(EngineError::ApplyInProgress(_))
        ));
        assert!(matches!(ledger.freeze(&session), Err(EngineError::ApplyInProgress(_))));
        assert_eq!(ledger.change_count(&session), 1);

        ledger.unfreeze(&session);
        ledger.remove(&session, outcome.change_id()).unwrap();
        assert_eq!(ledger.change_count(&session), 0);
    }

    #[test]
    fn assigned_key_makes_insert_key_addressed() {
        let session = SessionId::new("s1");
        let ledger = active_ledger(&session);
        let values = row(&[("name", "a".into())]);
        let outcome = ledger.record(&session, RowEdit::insert(users(), values)).unwrap();
        let key = row(&[("id", 42i64.into())]);

        ledger.assign_primary_key(&session, outcome.change_id(), key.clone()).unwrap();
        let change = ledger.change(&session, outcome.change_id()).unwrap();
        assert_eq!(change.primary_key, Some(key.clone()));

        ledger
            .record(&session, RowEdit::delete(users(), Some(key), Row::new()))
            .unwrap();
        assert_eq!(ledger.change_count(&session), 0);
    }

    #[test]
    fn subscription_lives_until_dropped() {
        let session = SessionId::new("s1");
        let ledger = active_ledger(&session);
        let seen = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&seen);
        let subscription = ledger.subscribe(move |event| {
            assert_eq!(event.session_id.as_str(), "s1");
            counter.fetch_add(1, Ordering::SeqCst);
        });
        ledger
            .record(&session, RowEdit::insert(users(), row(&[("id", 1i64.into())])))
            .unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 1);

        subscription.unsubscribe();
        assert_eq!(ledger.subscriber_count(), 0);
        ledger.clear_all(&session).unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn listeners_may_reenter_the_ledger() {
        let session = SessionId::new("s1");
        let ledger = Arc::new(active_ledger(&session));
        let groups_seen = Arc::new(AtomicUsize::new(0));

        let weak = Arc::downgrade(&ledger);
        let seen = Arc::clone(&groups_seen);
        let _subscription = ledger.subscribe(move |event| {
            if let Some(ledger) = weak.upgrade() {
                seen.store(ledger.list_grouped(&event.session_id).len(), Ordering::SeqCst);
            }
        });

        ledger
            .record(&session, RowEdit::insert(users(), row(&[("id", 1i64.into())])))
            .unwrap();
        assert_eq!(groups_seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn timestamps_increase_across_records() {
        let session = SessionId::new("s1");
        let ledger = active_ledger(&session);
        for id in 0..5i64 {
            ledger
                .record(&session, RowEdit::insert(users(), row(&[("id", id.into())])))
                .unwrap();
        }
        let changes = ledger.changes(&session);
        assert!(changes.windows(2).all(|pair| pair[0].timestamp < pair[1].timestamp));
    }
}
