//! Apply protocol: environment gate, stale-script guard, one transaction.
//!
//! ```text
//! idle -> confirming -> applying -> succeeded | failed
//!   \________________/^
//! ```
//!
//! `confirming` is not a blocking prompt. The call returns
//! [`ApplyOutcome::NeedsConfirmation`] and the caller retries with the
//! token (or the full-row acknowledgement) set.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use rowstage_core::{ApplyId, ChangeId, SessionId};

use crate::compiler::{MigrationCompiler, MigrationScript};
use crate::error::EngineError;
use crate::execution::{ConnectionHandle, ExecutionService};
use crate::ledger::ChangeLedger;

/// Literal a user must type before anything runs against production.
pub const CONFIRMATION_TOKEN: &str = "APPLY";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Environment {
    Development,
    Staging,
    Production,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Staging => "staging",
            Self::Production => "production",
        }
    }

    pub fn requires_confirmation(&self) -> bool {
        matches!(self, Self::Production)
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Environment {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(Self::Development),
            "staging" | "stage" => Ok(Self::Staging),
            "production" | "prod" => Ok(Self::Production),
            other => Err(EngineError::Config(format!("unknown environment: {other}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplyPhase {
    #[default]
    Idle,
    Confirming,
    Applying,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone)]
pub struct ApplyRequest {
    pub session_id: SessionId,
    pub connection: ConnectionHandle,
    pub environment: Environment,
    pub confirmation: Option<String>,
    pub acknowledge_full_row_matches: bool,
}

impl ApplyRequest {
    pub fn new(session_id: SessionId, connection: ConnectionHandle, environment: Environment) -> Self {
        Self {
            session_id,
            connection,
            environment,
            confirmation: None,
            acknowledge_full_row_matches: false,
        }
    }

    pub fn with_confirmation(mut self, input: impl Into<String>) -> Self {
        self.confirmation = Some(input.into());
        self
    }

    pub fn acknowledging_full_row_matches(mut self) -> Self {
        self.acknowledge_full_row_matches = true;
        self
    }

    fn token_confirmed(&self) -> bool {
        !self.environment.requires_confirmation() || self.confirmation.as_deref() == Some(CONFIRMATION_TOKEN)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApplySandboxResult {
    pub apply_id: ApplyId,
    pub success: bool,
    pub applied_count: usize,
    /// The database's error message, verbatim.
    pub error: Option<String>,
}

impl ApplySandboxResult {
    pub fn into_result(self) -> Result<usize, EngineError> {
        if self.success {
            Ok(self.applied_count)
        } else {
            Err(EngineError::ApplyFailure(self.error.unwrap_or_default()))
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", content = "change_ids", rename_all = "snake_case")]
pub enum ConfirmationReason {
    /// Production needs the typed token.
    ProductionToken,
    /// These updates/deletes match rows by full-row equality.
    FullRowMatches(Vec<ChangeId>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    NeedsConfirmation(ConfirmationReason),
    Completed(ApplySandboxResult),
}

#[derive(Debug, Default)]
struct SessionSlot {
    phase: ApplyPhase,
    in_flight: Option<ApplyId>,
}

pub struct ApplyOrchestrator {
    ledger: Arc<ChangeLedger>,
    service: Arc<dyn ExecutionService>,
    compiler: MigrationCompiler,
    slots: Mutex<HashMap<SessionId, SessionSlot>>,
}

impl ApplyOrchestrator {
    pub fn new(ledger: Arc<ChangeLedger>, service: Arc<dyn ExecutionService>, compiler: MigrationCompiler) -> Self {
        Self {
            ledger,
            service,
            compiler,
            slots: Mutex::new(HashMap::new()),
        }
    }

    pub fn phase(&self, session_id: &SessionId) -> ApplyPhase {
        self.slots
            .lock()
            .get(session_id)
            .map(|slot| slot.phase)
            .unwrap_or_default()
    }

    pub fn is_applying(&self, session_id: &SessionId) -> bool {
        self.slots
            .lock()
            .get(session_id)
            .is_some_and(|slot| slot.in_flight.is_some())
    }

    /// Run `script` against the request's connection.
    ///
    /// Gates, in order: another apply in flight (error), production token,
    /// stale script (error), empty script (immediate success), full-row
    /// acknowledgement. The staleness check runs with the ledger already
    /// frozen, so no edit can land between the check and the transaction.
    /// On success exactly the script's changes leave the ledger; on failure
    /// the ledger is untouched.
    pub async fn apply(&self, request: &ApplyRequest, script: &MigrationScript) -> Result<ApplyOutcome, EngineError> {
        let session_id = &request.session_id;
        if self.is_applying(session_id) {
            return Err(EngineError::ApplyInProgress(session_id.clone()));
        }

        if !request.token_confirmed() {
            info!(session = %session_id, environment = %request.environment, "apply awaiting confirmation token");
            self.set_phase(session_id, ApplyPhase::Confirming);
            return Ok(ApplyOutcome::NeedsConfirmation(ConfirmationReason::ProductionToken));
        }

        let mut guard = self.claim(session_id)?;
        self.ensure_current(session_id, script)?;

        if script.is_empty() {
            guard.finish(ApplyPhase::Succeeded);
            return Ok(ApplyOutcome::Completed(ApplySandboxResult {
                apply_id: guard.apply_id,
                success: true,
                applied_count: 0,
                error: None,
            }));
        }

        if script.needs_full_row_acknowledgement() && !request.acknowledge_full_row_matches {
            info!(
                session = %session_id,
                changes = script.full_row_changes.len(),
                "apply awaiting full-row acknowledgement"
            );
            guard.finish(ApplyPhase::Confirming);
            return Ok(ApplyOutcome::NeedsConfirmation(ConfirmationReason::FullRowMatches(
                script.full_row_changes.clone(),
            )));
        }

        info!(
            session = %session_id,
            apply = %guard.apply_id,
            environment = %request.environment,
            statements = script.statement_count,
            "apply started"
        );

        let result = match self
            .service
            .execute_transaction(&request.connection, &script.statements)
            .await
        {
            Ok(executed) => {
                let cleared = self.ledger.clear_applied(session_id, &script.change_ids);
                info!(
                    session = %session_id,
                    apply = %guard.apply_id,
                    executed,
                    cleared,
                    "apply committed"
                );
                guard.finish(ApplyPhase::Succeeded);
                ApplySandboxResult {
                    apply_id: guard.apply_id,
                    success: true,
                    applied_count: script.statement_count,
                    error: None,
                }
            }
            Err(e) => {
                warn!(session = %session_id, apply = %guard.apply_id, error = %e, "apply rolled back");
                guard.finish(ApplyPhase::Failed);
                ApplySandboxResult {
                    apply_id: guard.apply_id,
                    success: false,
                    applied_count: 0,
                    error: Some(e.message().to_string()),
                }
            }
        };
        Ok(ApplyOutcome::Completed(result))
    }

    /// Reject a script compiled against a ledger state that has since moved.
    fn ensure_current(&self, session_id: &SessionId, script: &MigrationScript) -> Result<(), EngineError> {
        let current = self.compiler.compile(
            &self.ledger.changes(session_id),
            script.dialect,
            script.scope.as_ref(),
            &self.ledger.key_column_map(),
        )?;
        if current.fingerprint != script.fingerprint {
            return Err(EngineError::StaleScript(session_id.clone()));
        }
        Ok(())
    }

    fn set_phase(&self, session_id: &SessionId, phase: ApplyPhase) {
        self.slots.lock().entry(session_id.clone()).or_default().phase = phase;
    }

    /// Take the session's in-flight slot and freeze its ledger. Both are
    /// released when the returned guard drops.
    fn claim(&self, session_id: &SessionId) -> Result<InFlight<'_>, EngineError> {
        let apply_id = ApplyId::new();
        {
            let mut slots = self.slots.lock();
            let slot = slots.entry(session_id.clone()).or_default();
            if slot.in_flight.is_some() {
                return Err(EngineError::ApplyInProgress(session_id.clone()));
            }
            self.ledger.freeze(session_id)?;
            slot.in_flight = Some(apply_id);
            slot.phase = ApplyPhase::Applying;
        }
        Ok(InFlight {
            orchestrator: self,
            session_id: session_id.clone(),
            apply_id,
            outcome: None,
        })
    }
}

/// Owns a session's in-flight slot for one apply. Dropping it without a
/// recorded outcome (the apply future was cancelled) returns the session to
/// idle.
struct InFlight<'a> {
    orchestrator: &'a ApplyOrchestrator,
    session_id: SessionId,
    apply_id: ApplyId,
    outcome: Option<ApplyPhase>,
}

impl InFlight<'_> {
    fn finish(&mut self, phase: ApplyPhase) {
        self.outcome = Some(phase);
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.orchestrator.ledger.unfreeze(&self.session_id);
        let mut slots = self.orchestrator.slots.lock();
        if let Some(slot) = slots.get_mut(&self.session_id)
            && slot.in_flight == Some(self.apply_id)
        {
            slot.in_flight = None;
            slot.phase = self.outcome.unwrap_or(ApplyPhase::Idle);
            if slot.phase == ApplyPhase::Idle {
                slots.remove(&self.session_id);
            }
        }
    }
}
