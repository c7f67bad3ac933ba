use coachlog_core::access::{AccessDecision, AccessSignal, SignalOutcome};
use coachlog_core::logs::WriterRole;
use tokio::task::JoinSet;
use uuid::Uuid;

use super::{LedgerError, LedgerStore};
use crate::store::{Collection, Filter, StoreError};

/// Decides whether a coach may touch a student's records.
///
/// A coach is known to the store by trainer slug; every trust signal is
/// recorded against that slug. Any store failure counts as "not granted".
#[derive(Clone)]
pub struct AccessControlGate {
    store: LedgerStore,
}

/// Where each signal lives and what row proves it.
fn signal_query(signal: AccessSignal, student: Uuid, trainer_slug: &str) -> (Collection, Filter) {
    match signal {
        AccessSignal::Chat => (
            Collection::Chats,
            Filter::new()
                .eq("user_id", student.to_string())
                .eq("trainer_slug", trainer_slug),
        ),
        AccessSignal::Relationship => (
            Collection::StudentTrainers,
            Filter::new()
                .eq("student_id", student.to_string())
                .eq("trainer_slug", trainer_slug)
                .eq("status", "active"),
        ),
        AccessSignal::ApprovedRequest => (
            Collection::AccessRequests,
            Filter::new()
                .eq("student_id", student.to_string())
                .eq("trainer_slug", trainer_slug)
                .eq("status", "approved"),
        ),
    }
}

impl AccessControlGate {
    pub fn new(store: LedgerStore) -> Self {
        Self { store }
    }

    /// Trainer profile slug for a coach user, if they have one.
    pub async fn trainer_slug_for(&self, coach: Uuid) -> Result<Option<String>, StoreError> {
        let rows = self
            .store
            .get(
                Collection::Trainers,
                &Filter::new().eq("user_id", coach.to_string()).limit(1),
            )
            .await?;
        Ok(rows
            .into_iter()
            .next()
            .and_then(|row| row.get("slug").and_then(|v| v.as_str()).map(str::to_string)))
    }

    /// Check every signal concurrently and union the results.
    pub async fn authorize(&self, coach: Uuid, student: Uuid) -> AccessDecision {
        let trainer_slug = match self.trainer_slug_for(coach).await {
            Ok(Some(slug)) => slug,
            Ok(None) => {
                tracing::warn!(
                    coach_id = %coach,
                    student_id = %student,
                    decision = "deny",
                    "coach has no trainer profile"
                );
                return AccessDecision::denied();
            }
            Err(e) => {
                tracing::warn!(
                    coach_id = %coach,
                    student_id = %student,
                    decision = "deny",
                    error = %e,
                    "trainer lookup failed"
                );
                return AccessDecision::denied();
            }
        };

        let mut checks = JoinSet::new();
        for signal in AccessSignal::ALL {
            let store = self.store.clone();
            let (collection, filter) = signal_query(signal, student, &trainer_slug);
            checks.spawn(async move {
                let outcome = match store.exists(collection, &filter).await {
                    Ok(true) => SignalOutcome::Present,
                    Ok(false) => SignalOutcome::Absent,
                    Err(e) => {
                        tracing::warn!(
                            signal = signal.as_str(),
                            error = %e,
                            "access signal check failed, treating as absent"
                        );
                        SignalOutcome::Failed
                    }
                };
                (signal, outcome)
            });
        }

        let mut outcomes = Vec::with_capacity(AccessSignal::ALL.len());
        while let Some(joined) = checks.join_next().await {
            match joined {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => tracing::warn!(error = %e, "access signal task aborted"),
            }
        }

        let decision = AccessDecision::from_outcomes(outcomes);
        if decision.granted {
            tracing::info!(
                coach_id = %coach,
                student_id = %student,
                trainer_slug = %trainer_slug,
                matched = ?decision.matched,
                decision = "allow",
                "coach access granted"
            );
        } else {
            tracing::warn!(
                coach_id = %coach,
                student_id = %student,
                trainer_slug = %trainer_slug,
                failed = ?decision.failed,
                decision = "deny",
                "coach access denied"
            );
        }
        decision
    }

    /// Like [`authorize`](Self::authorize) but turns a denial into `Forbidden`.
    pub async fn require(&self, coach: Uuid, student: Uuid) -> Result<AccessDecision, LedgerError> {
        let decision = self.authorize(coach, student).await;
        if decision.granted {
            Ok(decision)
        } else {
            Err(LedgerError::forbidden_with_hint(
                "No chat, active relationship or approved access request \
                 links this coach to the student",
                "Coaches need a chat, an active relationship or an approved \
                 access request with the student.",
            ))
        }
    }

    /// Gate a write whose role the caller declared.
    pub async fn authorize_writer(
        &self,
        owner: Uuid,
        role: WriterRole,
        writer: Uuid,
    ) -> Result<(), LedgerError> {
        match role {
            WriterRole::Student if writer == owner => Ok(()),
            WriterRole::Student => Err(LedgerError::forbidden_with_hint(
                "Students may only write to their own records",
                "Omit user_id to act on your own records.",
            )),
            WriterRole::Coach => self.require(writer, owner).await.map(|_| ()),
        }
    }

    /// Gate an operation by `caller` on `owner`'s records. Acting on someone
    /// else's records makes the caller a coach.
    pub async fn authorize_caller(
        &self,
        caller: Uuid,
        owner: Uuid,
    ) -> Result<WriterRole, LedgerError> {
        let role = if caller == owner {
            WriterRole::Student
        } else {
            WriterRole::Coach
        };
        self.authorize_writer(owner, role, caller).await?;
        Ok(role)
    }
}
