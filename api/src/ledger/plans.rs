use chrono::{DateTime, Utc};
use coachlog_core::logs::WriterRole;
use coachlog_core::plans::{CreatePlanRequest, Plan, PlanKind, PlanQuery, UpdatePlanRequest};
use serde::Deserialize;
use serde_json::{Value, json};
use uuid::Uuid;

use super::{AccessControlGate, LedgerError, LedgerStore, decode, single_row};
use crate::store::{Collection, Direction, Filter, Row, StoreError, UnitOfWork, UnitOutcome, row};

fn collection(kind: PlanKind) -> Collection {
    match kind {
        PlanKind::Workout => Collection::Workouts,
        PlanKind::Diet => Collection::Diets,
    }
}

/// Plan columns shared by both kinds; the payload column is pulled out first.
#[derive(Deserialize)]
struct PlanRow {
    id: Uuid,
    user_id: Uuid,
    trainer_slug: String,
    title: String,
    is_active: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

fn plan_from_row(kind: PlanKind, mut row: Row) -> Result<Plan, LedgerError> {
    let data = row.remove(kind.payload_field()).unwrap_or(Value::Null);
    let plan: PlanRow = decode(collection(kind), row)?;
    Ok(Plan {
        id: plan.id,
        kind,
        user_id: plan.user_id,
        trainer_slug: plan.trainer_slug,
        title: plan.title,
        is_active: plan.is_active,
        data,
        created_at: plan.created_at,
        updated_at: plan.updated_at,
    })
}

/// Serialises activations for one (owner, trainer, kind) across replicas.
fn activation_lock_key(kind: PlanKind, owner: Uuid, trainer_slug: &str) -> String {
    format!("plan-activation:{kind}:{owner}:{trainer_slug}")
}

fn validate_title(title: &str) -> Result<(), LedgerError> {
    if title.trim().is_empty() {
        return Err(LedgerError::validation("title must not be empty", "title"));
    }
    Ok(())
}

/// Keeps at most one active plan of each kind per (student, trainer).
///
/// Every path that turns a plan on deactivates its siblings first, inside
/// the same locked unit of work, so no interleaving can leave two plans
/// active or none half-switched.
#[derive(Clone)]
pub struct PlanActivationManager {
    store: LedgerStore,
    gate: AccessControlGate,
}

impl PlanActivationManager {
    pub fn new(store: LedgerStore, gate: AccessControlGate) -> Self {
        Self { store, gate }
    }

    /// Locked unit whose first op switches off every active sibling. Callers
    /// append the op that turns the new plan on; both commit together.
    fn activation_unit(
        kind: PlanKind,
        owner: Uuid,
        trainer_slug: &str,
        now: DateTime<Utc>,
    ) -> UnitOfWork {
        UnitOfWork::locked(activation_lock_key(kind, owner, trainer_slug)).update(
            collection(kind),
            Filter::new()
                .eq("user_id", owner.to_string())
                .eq("trainer_slug", trainer_slug)
                .eq("is_active", true),
            row([("is_active", json!(false)), ("updated_at", json!(now))]),
        )
    }

    /// Commit an activation unit, retrying once if a concurrent writer won.
    async fn commit_activation(
        &self,
        kind: PlanKind,
        unit: UnitOfWork,
    ) -> Result<UnitOutcome, LedgerError> {
        match self.store.commit(unit.clone()).await {
            Err(StoreError::Conflict { detail, .. }) => {
                tracing::warn!(
                    kind = %kind,
                    detail = %detail,
                    "activation lost a race, retrying once"
                );
                self.store.commit(unit).await.map_err(|e| match e {
                    StoreError::Conflict { .. } => LedgerError::Conflict {
                        message: format!(
                            "Another {kind} plan was activated concurrently; retry the request"
                        ),
                    },
                    other => other.into(),
                })
            }
            other => other.map_err(Into::into),
        }
    }

    /// Activate `plan_id` and deactivate every other plan of the same kind
    /// for (owner, trainer). `patch` carries any other edits to apply to the
    /// plan in the same unit of work.
    pub async fn activate_exclusive(
        &self,
        kind: PlanKind,
        owner: Uuid,
        trainer_slug: &str,
        plan_id: Uuid,
        mut patch: Row,
    ) -> Result<Plan, LedgerError> {
        let now = Utc::now();
        patch.insert("is_active".to_string(), json!(true));
        patch.insert("updated_at".to_string(), json!(now));

        let unit = Self::activation_unit(kind, owner, trainer_slug, now).update_required(
            collection(kind),
            Filter::new()
                .eq("id", plan_id.to_string())
                .eq("user_id", owner.to_string())
                .eq("trainer_slug", trainer_slug),
            patch,
        );
        let outcome = self.commit_activation(kind, unit).await?;
        let plan = plan_from_row(kind, single_row(outcome, collection(kind))?)?;

        tracing::info!(
            kind = %kind,
            user_id = %owner,
            trainer_slug = %trainer_slug,
            plan_id = %plan_id,
            "plan activated"
        );
        Ok(plan)
    }

    async fn load(&self, kind: PlanKind, plan_id: Uuid) -> Result<Plan, LedgerError> {
        let rows = self
            .store
            .get(collection(kind), &Filter::new().eq("id", plan_id.to_string()).limit(1))
            .await?;
        let row = rows.into_iter().next().ok_or_else(|| LedgerError::NotFound {
            resource: format!("{kind} plan {plan_id}"),
        })?;
        plan_from_row(kind, row)
    }

    /// Gate `caller` on the plan's owner. Coaches may only change plans
    /// attributed to their own trainer profile.
    async fn authorize_mutation(
        &self,
        caller: Uuid,
        owner: Uuid,
        trainer_slug: &str,
    ) -> Result<WriterRole, LedgerError> {
        let role = self.gate.authorize_caller(caller, owner).await?;
        if role == WriterRole::Coach {
            let own_slug = self.gate.trainer_slug_for(caller).await.map_err(|e| {
                tracing::warn!(coach_id = %caller, error = %e, "trainer lookup failed");
                LedgerError::forbidden("Could not confirm the coach's trainer profile")
            })?;
            if own_slug.as_deref() != Some(trainer_slug) {
                return Err(LedgerError::forbidden_with_hint(
                    "Coaches may only manage plans attributed to their own trainer profile",
                    "Set trainer_slug to the slug of your own trainer profile.",
                ));
            }
        }
        Ok(role)
    }

    pub async fn create(
        &self,
        caller: Uuid,
        kind: PlanKind,
        req: CreatePlanRequest,
    ) -> Result<Plan, LedgerError> {
        let owner = req.user_id.unwrap_or(caller);
        validate_title(&req.title)?;
        let trainer_slug = req.trainer_slug.trim().to_string();
        if trainer_slug.is_empty() {
            return Err(LedgerError::validation(
                "trainer_slug must not be empty",
                "trainer_slug",
            ));
        }
        if req.data.is_null() {
            return Err(LedgerError::validation("data is required", "data"));
        }
        self.authorize_mutation(caller, owner, &trainer_slug).await?;

        let now = Utc::now();
        let plan_id = Uuid::now_v7();
        let active = req.is_active.unwrap_or(true);
        let record = row([
            ("id", json!(plan_id.to_string())),
            ("user_id", json!(owner.to_string())),
            ("trainer_slug", json!(trainer_slug)),
            ("title", json!(req.title.trim())),
            ("is_active", json!(active)),
            (kind.payload_field(), req.data),
            ("created_at", json!(now)),
            ("updated_at", json!(now)),
        ]);

        let outcome = if active {
            let unit = Self::activation_unit(kind, owner, &trainer_slug, now)
                .insert(collection(kind), record);
            self.commit_activation(kind, unit).await?
        } else {
            self.store
                .commit(UnitOfWork::new().insert(collection(kind), record))
                .await?
        };
        let plan = plan_from_row(kind, single_row(outcome, collection(kind))?)?;

        tracing::info!(
            kind = %kind,
            plan_id = %plan.id,
            user_id = %owner,
            trainer_slug = %plan.trainer_slug,
            active = active,
            "plan created"
        );
        Ok(plan)
    }

    pub async fn get(
        &self,
        caller: Uuid,
        kind: PlanKind,
        plan_id: Uuid,
    ) -> Result<Plan, LedgerError> {
        let plan = self.load(kind, plan_id).await?;
        self.gate.authorize_caller(caller, plan.user_id).await?;
        Ok(plan)
    }

    /// Newest first.
    pub async fn list(
        &self,
        caller: Uuid,
        kind: PlanKind,
        query: PlanQuery,
    ) -> Result<Vec<Plan>, LedgerError> {
        let owner = query.user_id.unwrap_or(caller);
        self.gate.authorize_caller(caller, owner).await?;

        let mut filter = Filter::new().eq("user_id", owner.to_string());
        if let Some(slug) = &query.trainer_slug {
            filter = filter.eq("trainer_slug", slug.as_str());
        }
        if query.active_only {
            filter = filter.eq("is_active", true);
        }
        let filter = filter.order_by("created_at", Direction::Desc);

        self.store
            .get(collection(kind), &filter)
            .await?
            .into_iter()
            .map(|row| plan_from_row(kind, row))
            .collect()
    }

    pub async fn activate(
        &self,
        caller: Uuid,
        kind: PlanKind,
        plan_id: Uuid,
    ) -> Result<Plan, LedgerError> {
        let plan = self.load(kind, plan_id).await?;
        self.authorize_mutation(caller, plan.user_id, &plan.trainer_slug)
            .await?;
        self.activate_exclusive(kind, plan.user_id, &plan.trainer_slug, plan.id, Row::new())
            .await
    }

    /// Turn one plan off. Siblings are untouched.
    pub async fn deactivate(
        &self,
        caller: Uuid,
        kind: PlanKind,
        plan_id: Uuid,
    ) -> Result<Plan, LedgerError> {
        let plan = self.load(kind, plan_id).await?;
        self.authorize_mutation(caller, plan.user_id, &plan.trainer_slug)
            .await?;
        let patch = row([("is_active", json!(false)), ("updated_at", json!(Utc::now()))]);
        let updated = self.update_one(kind, plan.id, patch).await?;
        tracing::info!(
            kind = %kind,
            plan_id = %plan_id,
            user_id = %plan.user_id,
            "plan deactivated"
        );
        Ok(updated)
    }

    /// Edit title or payload. `is_active: true` goes through the activation
    /// sequence together with the edits.
    pub async fn update(
        &self,
        caller: Uuid,
        kind: PlanKind,
        plan_id: Uuid,
        req: UpdatePlanRequest,
    ) -> Result<Plan, LedgerError> {
        if req.is_empty() {
            return Err(LedgerError::Validation {
                message: "Provide at least one of title, data or is_active".to_string(),
                field: None,
                received: None,
            });
        }
        let plan = self.load(kind, plan_id).await?;
        self.authorize_mutation(caller, plan.user_id, &plan.trainer_slug)
            .await?;

        let mut patch = Row::new();
        if let Some(title) = req.title {
            validate_title(&title)?;
            patch.insert("title".to_string(), json!(title.trim()));
        }
        if let Some(data) = req.data {
            if data.is_null() {
                return Err(LedgerError::validation("data must not be null", "data"));
            }
            patch.insert(kind.payload_field().to_string(), data);
        }

        match req.is_active {
            Some(true) => {
                self.activate_exclusive(kind, plan.user_id, &plan.trainer_slug, plan.id, patch)
                    .await
            }
            Some(false) | None => {
                if req.is_active == Some(false) {
                    patch.insert("is_active".to_string(), json!(false));
                }
                patch.insert("updated_at".to_string(), json!(Utc::now()));
                self.update_one(kind, plan.id, patch).await
            }
        }
    }

    async fn update_one(
        &self,
        kind: PlanKind,
        plan_id: Uuid,
        patch: Row,
    ) -> Result<Plan, LedgerError> {
        let outcome = self
            .store
            .commit(UnitOfWork::new().update_required(
                collection(kind),
                Filter::new().eq("id", plan_id.to_string()),
                patch,
            ))
            .await?;
        plan_from_row(kind, single_row(outcome, collection(kind))?)
    }
}
