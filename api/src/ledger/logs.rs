use chrono::{NaiveDate, Utc};
use coachlog_core::logs::{
    ExerciseLog, LogQuery, UpsertLogRequest, UpsertLogResponse, WriterRole, resolve_notes,
};
use coachlog_core::sets::{SetEntry, merge_sets, parse_sets, sorted_for_display};
use serde_json::json;
use uuid::Uuid;

use super::{
    AccessControlGate, LedgerError, LedgerStore, RelatedWorkoutResolver, decode, encode,
};
use crate::store::{Collection, Direction, Filter, Row, StoreError, UnitOfWork};

/// Read, merge and write attempts before a contended upsert gives up.
const MAX_UPSERT_ATTEMPTS: usize = 3;

/// One fully-resolved log write.
#[derive(Debug, Clone)]
pub struct UpsertCommand {
    pub owner: Uuid,
    pub workout_id: Uuid,
    pub related_workout_ids: Vec<Uuid>,
    pub include_block: bool,
    pub exercise_name: String,
    pub log_date: NaiveDate,
    pub sets: Vec<SetEntry>,
    pub notes: Option<String>,
    pub writer_role: WriterRole,
    pub writer_id: Uuid,
}

impl UpsertCommand {
    /// Validate a request body. Writing to someone else's log makes the
    /// caller a coach.
    pub fn from_request(caller: Uuid, req: UpsertLogRequest) -> Result<Self, LedgerError> {
        let exercise_name = req.exercise_name.trim().to_string();
        if exercise_name.is_empty() {
            return Err(LedgerError::validation(
                "exercise_name must not be empty",
                "exercise_name",
            ));
        }
        let sets = parse_sets(&req.sets).map_err(|e| LedgerError::Validation {
            message: e.to_string(),
            field: Some(e.field()),
            received: e.received(),
        })?;
        let owner = req.user_id.unwrap_or(caller);
        let writer_role = if owner == caller {
            WriterRole::Student
        } else {
            WriterRole::Coach
        };
        Ok(Self {
            owner,
            workout_id: req.workout_id,
            related_workout_ids: req.related_workout_ids,
            include_block: req.include_block,
            exercise_name,
            log_date: req.log_date,
            sets,
            notes: req.notes,
            writer_role,
            writer_id: caller,
        })
    }
}

/// Serves log reads and writes for students and their coaches.
#[derive(Clone)]
pub struct ExerciseLogService {
    store: LedgerStore,
    gate: AccessControlGate,
    blocks: RelatedWorkoutResolver,
}

impl ExerciseLogService {
    pub fn new(
        store: LedgerStore,
        gate: AccessControlGate,
        blocks: RelatedWorkoutResolver,
    ) -> Self {
        Self { store, gate, blocks }
    }

    /// Merge `cmd` into the matching log, or create one.
    ///
    /// The lookup tries the exact (owner, workout, exercise, date) key first,
    /// then the same exercise and date under any related workout, so a block
    /// keeps one log per occurrence. Merged writes compare-and-swap on
    /// `revision`; a lost race re-reads and merges again.
    pub async fn upsert(&self, mut cmd: UpsertCommand) -> Result<UpsertLogResponse, LedgerError> {
        self.gate
            .authorize_writer(cmd.owner, cmd.writer_role, cmd.writer_id)
            .await?;

        if cmd.related_workout_ids.is_empty() && cmd.include_block {
            cmd.related_workout_ids = self.blocks.siblings(cmd.owner, cmd.workout_id).await?;
        }
        cmd.related_workout_ids.retain(|id| *id != cmd.workout_id);

        for attempt in 1..=MAX_UPSERT_ATTEMPTS {
            let written = match self.find_existing(&cmd).await? {
                Some(existing) => self.merge_into(existing, &cmd).await?,
                None => self.create(&cmd).await?,
            };
            if let Some(response) = written {
                tracing::info!(
                    user_id = %cmd.owner,
                    log_id = %response.log.id,
                    workout_id = %response.log.workout_id,
                    exercise = %cmd.exercise_name,
                    writer_role = cmd.writer_role.as_str(),
                    created = response.created,
                    "exercise log written"
                );
                return Ok(response);
            }
            tracing::debug!(
                user_id = %cmd.owner,
                exercise = %cmd.exercise_name,
                attempt = attempt,
                "exercise log write raced, retrying"
            );
        }

        tracing::warn!(
            user_id = %cmd.owner,
            exercise = %cmd.exercise_name,
            log_date = %cmd.log_date,
            "exercise log upsert exhausted retries"
        );
        Err(LedgerError::Conflict {
            message: "The log was changed concurrently too many times; retry the request"
                .to_string(),
        })
    }

    async fn find_existing(&self, cmd: &UpsertCommand) -> Result<Option<ExerciseLog>, LedgerError> {
        let key = Filter::new()
            .eq("user_id", cmd.owner.to_string())
            .eq("exercise_name", cmd.exercise_name.as_str())
            .eq("log_date", cmd.log_date.to_string());

        let exact = key.clone().eq("workout_id", cmd.workout_id.to_string()).limit(1);
        let exact_rows = self.store.get(Collection::ExerciseLogs, &exact).await?;
        if let Some(row) = exact_rows.into_iter().next() {
            return decode(Collection::ExerciseLogs, row).map(Some);
        }
        if cmd.related_workout_ids.is_empty() {
            return Ok(None);
        }

        let broadened = key
            .any_of("workout_id", cmd.related_workout_ids.iter().map(|id| id.to_string()))
            .order_by("created_at", Direction::Asc)
            .limit(1);
        let related_rows = self.store.get(Collection::ExerciseLogs, &broadened).await?;
        match related_rows.into_iter().next() {
            Some(row) => {
                let log: ExerciseLog = decode(Collection::ExerciseLogs, row)?;
                tracing::debug!(
                    log_id = %log.id,
                    requested_workout = %cmd.workout_id,
                    found_workout = %log.workout_id,
                    "merging into related workout's log"
                );
                Ok(Some(log))
            }
            None => Ok(None),
        }
    }

    /// `None` means another writer bumped the revision first.
    async fn merge_into(
        &self,
        existing: ExerciseLog,
        cmd: &UpsertCommand,
    ) -> Result<Option<UpsertLogResponse>, LedgerError> {
        let merged = merge_sets(&existing.sets, cmd.sets.clone());
        let mut patch = Row::new();
        patch.insert(
            "sets".to_string(),
            serde_json::to_value(&merged)
                .map_err(|e| LedgerError::Internal(format!("Failed to serialize sets: {e}")))?,
        );
        if cmd.notes.is_some() {
            patch.insert(
                "notes".to_string(),
                json!(resolve_notes(existing.notes.clone(), cmd.notes.clone())),
            );
        }
        patch.insert("revision".to_string(), json!(existing.revision + 1));
        patch.insert("updated_at".to_string(), json!(Utc::now()));
        stamp_provenance(&mut patch, cmd);

        let cas = Filter::new()
            .eq("id", existing.id.to_string())
            .eq("revision", existing.revision);
        let mut outcome = self
            .store
            .commit(UnitOfWork::new().update(Collection::ExerciseLogs, cas, patch))
            .await?;
        match outcome.pop().and_then(|mut rows| rows.pop()) {
            Some(row) => Ok(Some(UpsertLogResponse {
                log: decode(Collection::ExerciseLogs, row)?,
                created: false,
            })),
            None => Ok(None),
        }
    }

    /// `None` means a concurrent writer created the same log first.
    async fn create(&self, cmd: &UpsertCommand) -> Result<Option<UpsertLogResponse>, LedgerError> {
        let now = Utc::now();
        let log = ExerciseLog {
            id: Uuid::now_v7(),
            user_id: cmd.owner,
            workout_id: cmd.workout_id,
            exercise_name: cmd.exercise_name.clone(),
            log_date: cmd.log_date,
            sets: merge_sets(&[], cmd.sets.clone()),
            notes: cmd.notes.clone(),
            updated_by_role: None,
            updated_by_user_id: None,
            revision: 1,
            created_at: now,
            updated_at: now,
        };
        let mut record = encode(&log)?;
        stamp_provenance(&mut record, cmd);

        match self
            .store
            .commit(UnitOfWork::new().insert(Collection::ExerciseLogs, record))
            .await
        {
            Ok(mut outcome) => match outcome.pop().and_then(|mut rows| rows.pop()) {
                Some(row) => Ok(Some(UpsertLogResponse {
                    log: decode(Collection::ExerciseLogs, row)?,
                    created: true,
                })),
                None => Err(LedgerError::Internal("Insert returned no row".to_string())),
            },
            Err(StoreError::Conflict { .. }) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Logs newest date first; each log's sets in `set_number` order.
    pub async fn get_logs(
        &self,
        caller: Uuid,
        query: LogQuery,
    ) -> Result<Vec<ExerciseLog>, LedgerError> {
        if query.has_inverted_range() {
            return Err(LedgerError::validation("from must not be after to", "from"));
        }
        let owner = query.user_id.unwrap_or(caller);
        self.gate.authorize_caller(caller, owner).await?;

        let mut filter = Filter::new().eq("user_id", owner.to_string());
        if let Some(workout_id) = query.workout_id {
            filter = filter.eq("workout_id", workout_id.to_string());
        }
        if let Some(name) = &query.exercise_name {
            filter = filter.eq("exercise_name", name.trim());
        }
        if let Some(date) = query.date {
            filter = filter.eq("log_date", date.to_string());
        }
        if let Some(from) = query.from {
            filter = filter.gte("log_date", from.to_string());
        }
        if let Some(to) = query.to {
            filter = filter.lte("log_date", to.to_string());
        }
        let filter = filter
            .order_by("log_date", Direction::Desc)
            .order_by("created_at", Direction::Desc);

        self.store
            .get(Collection::ExerciseLogs, &filter)
            .await?
            .into_iter()
            .map(|row| {
                let mut log: ExerciseLog = decode(Collection::ExerciseLogs, row)?;
                log.sets = sorted_for_display(log.sets);
                Ok(log)
            })
            .collect()
    }

    /// Only the owning student may delete a log.
    pub async fn delete_log(&self, caller: Uuid, log_id: Uuid) -> Result<(), LedgerError> {
        let by_id = Filter::new().eq("id", log_id.to_string());
        let row = self
            .store
            .get(Collection::ExerciseLogs, &by_id.clone().limit(1))
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| LedgerError::NotFound {
                resource: format!("exercise log {log_id}"),
            })?;
        let log: ExerciseLog = decode(Collection::ExerciseLogs, row)?;
        if log.user_id != caller {
            return Err(LedgerError::forbidden_with_hint(
                "Only the owner may delete an exercise log",
                "Coaches can correct a student's log with PUT /v1/logs instead of deleting it.",
            ));
        }

        let deleted = self.store.delete(Collection::ExerciseLogs, &by_id).await?;
        if deleted == 0 {
            return Err(LedgerError::NotFound {
                resource: format!("exercise log {log_id}"),
            });
        }
        tracing::info!(user_id = %caller, log_id = %log_id, "exercise log deleted");
        Ok(())
    }
}

/// Coach writes record who made them. Student writes leave the last coach
/// edit in place.
fn stamp_provenance(row: &mut Row, cmd: &UpsertCommand) {
    if cmd.writer_role == WriterRole::Coach {
        row.insert("updated_by_role".to_string(), json!(WriterRole::Coach.as_str()));
        row.insert("updated_by_user_id".to_string(), json!(cmd.writer_id.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use serde_json::Value;

    use super::*;
    use crate::store::{Clause, MemoryStore, RecordStore, UnitOutcome, WriteOp, row};

    const SLUG: &str = "coach-maya";

    fn service(store: Arc<dyn RecordStore>) -> ExerciseLogService {
        let store = LedgerStore::new(store);
        let gate = AccessControlGate::new(store.clone());
        ExerciseLogService::new(store.clone(), gate, RelatedWorkoutResolver::new(store))
    }

    fn date(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, day).expect("valid date")
    }

    fn request(workout_id: Uuid, sets: Value) -> UpsertLogRequest {
        serde_json::from_value(json!({
            "workout_id": workout_id,
            "exercise_name": "Squat",
            "log_date": "2024-06-10",
            "sets": sets,
        }))
        .expect("request fixture")
    }

    fn command(owner: Uuid, workout_id: Uuid, sets: Value) -> UpsertCommand {
        UpsertCommand::from_request(owner, request(workout_id, sets)).expect("valid command")
    }

    async fn seed_workout(store: &MemoryStore, owner: Uuid, title: &str) -> Uuid {
        seed_workout_for(store, owner, SLUG, title).await
    }

    async fn seed_workout_for(store: &MemoryStore, owner: Uuid, slug: &str, title: &str) -> Uuid {
        let id = Uuid::now_v7();
        store
            .insert(
                Collection::Workouts,
                row([
                    ("id", json!(id.to_string())),
                    ("user_id", json!(owner.to_string())),
                    ("trainer_slug", json!(slug)),
                    ("title", json!(title)),
                    ("is_active", json!(false)),
                    ("workout_data", json!({})),
                    ("created_at", json!(Utc::now())),
                ]),
            )
            .await
            .expect("seed workout");
        id
    }

    async fn grant_coach(store: &MemoryStore, coach: Uuid, student: Uuid) {
        store
            .insert(
                Collection::Trainers,
                row([
                    ("id", json!(Uuid::now_v7().to_string())),
                    ("user_id", json!(coach.to_string())),
                    ("slug", json!(SLUG)),
                ]),
            )
            .await
            .expect("trainer");
        store
            .insert(
                Collection::StudentTrainers,
                row([
                    ("id", json!(Uuid::now_v7().to_string())),
                    ("student_id", json!(student.to_string())),
                    ("trainer_slug", json!(SLUG)),
                    ("status", json!("active")),
                ]),
            )
            .await
            .expect("relationship");
    }

    /// Lets another writer land first on the next `races` revision-checked
    /// log updates: just before each one commits, the stored row gets a new
    /// set numbered from 91 and its revision bumped.
    struct RacingStore {
        inner: MemoryStore,
        races: Mutex<usize>,
        lost: Mutex<usize>,
    }

    impl RacingStore {
        fn new(races: usize) -> Self {
            Self {
                inner: MemoryStore::new(),
                races: Mutex::new(races),
                lost: Mutex::new(0),
            }
        }

        fn lost(&self) -> usize {
            *self.lost.lock().expect("lock")
        }

        /// The `id` of a compare-and-swap log update, if `unit` is one.
        fn cas_target(unit: &UnitOfWork) -> Option<Value> {
            let Some(WriteOp::Update {
                collection: Collection::ExerciseLogs,
                filter,
                ..
            }) = unit.ops.first()
            else {
                return None;
            };
            if !filter.clauses.iter().any(|c| matches!(c, Clause::Eq(f, _) if f == "revision")) {
                return None;
            }
            filter.clauses.iter().find_map(|c| match c {
                Clause::Eq(f, id) if f == "id" => Some(id.clone()),
                _ => None,
            })
        }

        async fn interleave(&self, id: Value) -> Result<(), StoreError> {
            let by_id = Filter::new().eq("id", id);
            let current = self.inner.get(Collection::ExerciseLogs, &by_id).await?;
            let Some(current) = current.into_iter().next() else {
                return Ok(());
            };
            let lost = {
                let mut lost = self.lost.lock().expect("lock");
                *lost += 1;
                *lost
            };
            let mut sets = current["sets"].as_array().cloned().unwrap_or_default();
            sets.push(json!({"set_number": 90 + lost, "reps": 1}));
            let revision = current["revision"].as_i64().unwrap_or(0) + 1;
            self.inner
                .update(
                    Collection::ExerciseLogs,
                    &by_id,
                    row([("sets", json!(sets)), ("revision", json!(revision))]),
                )
                .await?;
            Ok(())
        }
    }

    #[async_trait]
    impl RecordStore for RacingStore {
        async fn get(
            &self,
            collection: Collection,
            filter: &Filter,
        ) -> Result<Vec<Row>, StoreError> {
            self.inner.get(collection, filter).await
        }

        async fn insert(&self, collection: Collection, row: Row) -> Result<Row, StoreError> {
            self.inner.insert(collection, row).await
        }

        async fn update(
            &self,
            collection: Collection,
            filter: &Filter,
            patch: Row,
        ) -> Result<Vec<Row>, StoreError> {
            self.inner.update(collection, filter, patch).await
        }

        async fn delete(&self, collection: Collection, filter: &Filter) -> Result<u64, StoreError> {
            self.inner.delete(collection, filter).await
        }

        async fn commit(&self, unit: UnitOfWork) -> Result<UnitOutcome, StoreError> {
            if let Some(id) = Self::cas_target(&unit) {
                let race = {
                    let mut races = self.races.lock().expect("lock");
                    let race = *races > 0;
                    if race {
                        *races -= 1;
                    }
                    race
                };
                if race {
                    self.interleave(id).await?;
                }
            }
            self.inner.commit(unit).await
        }

        async fn ping(&self) -> Result<(), StoreError> {
            Ok(())
        }
    }

    fn set_numbers(log: &ExerciseLog) -> Vec<u32> {
        log.sets.iter().map(|s| s.set_number).collect()
    }

    async fn log_count(store: &MemoryStore) -> usize {
        store
            .get(Collection::ExerciseLogs, &Filter::new())
            .await
            .expect("all logs")
            .len()
    }

    #[tokio::test]
    async fn first_write_creates_then_later_writes_merge() {
        let store = Arc::new(MemoryStore::new());
        let logs = service(store.clone());
        let (student, workout) = (Uuid::now_v7(), Uuid::now_v7());

        let created = logs
            .upsert(command(student, workout, json!([{"set_number": 1, "reps": 8, "weight": 60}])))
            .await
            .expect("create");
        assert!(created.created);
        assert_eq!(created.log.revision, 1);

        let merged = logs
            .upsert(command(
                student,
                workout,
                json!([
                    {"set_number": 1, "weight": 62.5},
                    {"set_number": 2, "reps": 10, "weight": 50}
                ]),
            ))
            .await
            .expect("merge");
        assert!(!merged.created);
        assert_eq!(merged.log.id, created.log.id);
        assert_eq!(merged.log.revision, 2);
        assert_eq!(
            serde_json::to_value(&merged.log.sets).expect("sets"),
            json!([
                {"set_number": 1, "reps": 8, "weight": 62.5},
                {"set_number": 2, "reps": 10, "weight": 50}
            ])
        );
        assert_eq!(log_count(&store).await, 1);
    }

    #[tokio::test]
    async fn related_workout_log_is_merged_instead_of_duplicated() {
        let store = Arc::new(MemoryStore::new());
        let logs = service(store.clone());
        let student = Uuid::now_v7();
        let (w1, w2) = (Uuid::now_v7(), Uuid::now_v7());

        let original = logs
            .upsert(command(student, w1, json!([{"set_number": 1, "reps": 5}])))
            .await
            .expect("week 1 log");

        let mut cmd = command(student, w2, json!([{"set_number": 2, "reps": 5}]));
        cmd.related_workout_ids = vec![w1];
        let merged = logs.upsert(cmd).await.expect("week 2 write");

        assert!(!merged.created);
        assert_eq!(merged.log.id, original.log.id);
        assert_eq!(merged.log.workout_id, w1);
        assert_eq!(merged.log.sets.len(), 2);
        assert_eq!(log_count(&store).await, 1);
    }

    #[tokio::test]
    async fn include_block_resolves_siblings_server_side() {
        let store = Arc::new(MemoryStore::new());
        let logs = service(store.clone());
        let student = Uuid::now_v7();
        let w1 = seed_workout(&store, student, "Push Pull Legs - Week 1").await;
        let w2 = seed_workout(&store, student, "Push Pull Legs - Week 2").await;
        let unrelated = seed_workout(&store, student, "Conditioning").await;

        logs.upsert(command(student, w1, json!([{"set_number": 1, "reps": 5}])))
            .await
            .expect("week 1 log");

        let mut other = command(student, unrelated, json!([{"set_number": 1, "reps": 20}]));
        other.include_block = true;
        assert!(logs.upsert(other).await.expect("unrelated").created);

        let mut cmd = command(student, w2, json!([{"set_number": 2, "reps": 5}]));
        cmd.include_block = true;
        let merged = logs.upsert(cmd).await.expect("week 2 write");
        assert!(!merged.created);
        assert_eq!(merged.log.workout_id, w1);
    }

    #[tokio::test]
    async fn without_related_ids_other_workouts_are_not_searched() {
        let store = Arc::new(MemoryStore::new());
        let logs = service(store.clone());
        let student = Uuid::now_v7();

        logs.upsert(command(student, Uuid::now_v7(), json!([{"set_number": 1}])))
            .await
            .expect("first");
        let second = logs
            .upsert(command(student, Uuid::now_v7(), json!([{"set_number": 1}])))
            .await
            .expect("second");
        assert!(second.created);
        assert_eq!(log_count(&store).await, 2);
    }

    #[tokio::test]
    async fn notes_absent_keep_present_overwrite() {
        let logs = service(Arc::new(MemoryStore::new()));
        let (student, workout) = (Uuid::now_v7(), Uuid::now_v7());

        let mut first = command(student, workout, json!([{"set_number": 1}]));
        first.notes = Some("knees caved".to_string());
        logs.upsert(first).await.expect("create");

        let kept = logs
            .upsert(command(student, workout, json!([{"set_number": 2}])))
            .await
            .expect("no notes");
        assert_eq!(kept.log.notes.as_deref(), Some("knees caved"));

        let mut clear = command(student, workout, json!([]));
        clear.notes = Some(String::new());
        let cleared = logs.upsert(clear).await.expect("clear notes");
        assert_eq!(cleared.log.notes.as_deref(), Some(""));
        assert_eq!(cleared.log.sets.len(), 2);
    }

    #[tokio::test]
    async fn coach_writes_are_gated_and_stamped() {
        let store = Arc::new(MemoryStore::new());
        let logs = service(store.clone());
        let (coach, student, workout) = (Uuid::now_v7(), Uuid::now_v7(), Uuid::now_v7());

        let mut req = request(workout, json!([{"set_number": 1, "reps": 3}]));
        req.user_id = Some(student);
        let cmd = UpsertCommand::from_request(coach, req).expect("command");
        assert_eq!(cmd.writer_role, WriterRole::Coach);

        let err = logs.upsert(cmd.clone()).await.expect_err("no grant yet");
        assert!(matches!(err, LedgerError::Forbidden { .. }));
        assert_eq!(log_count(&store).await, 0);

        grant_coach(&store, coach, student).await;
        let written = logs.upsert(cmd).await.expect("granted");
        assert_eq!(written.log.user_id, student);
        assert_eq!(written.log.updated_by_role, Some(WriterRole::Coach));
        assert_eq!(written.log.updated_by_user_id, Some(coach));

        let student_edit = logs
            .upsert(command(student, workout, json!([{"set_number": 1, "rpe": 8}])))
            .await
            .expect("student edit");
        assert_eq!(student_edit.log.updated_by_user_id, Some(coach));
    }

    #[tokio::test]
    async fn malformed_sets_are_rejected_with_field_path() {
        let err = UpsertCommand::from_request(
            Uuid::now_v7(),
            request(Uuid::now_v7(), json!([{"set_number": 1}, {"reps": 5}])),
        )
        .expect_err("missing set_number");
        match err {
            LedgerError::Validation { field, .. } => {
                assert_eq!(field.as_deref(), Some("sets[1].set_number"))
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn concurrent_first_writes_end_in_one_log_with_both_sets() {
        let store = Arc::new(MemoryStore::new());
        let logs = service(store.clone());
        let (student, workout) = (Uuid::now_v7(), Uuid::now_v7());

        let (a, b) = (logs.clone(), logs.clone());
        let (ra, rb) = tokio::join!(
            tokio::spawn(async move {
                a.upsert(command(student, workout, json!([{"set_number": 1, "reps": 5}]))).await
            }),
            tokio::spawn(async move {
                b.upsert(command(student, workout, json!([{"set_number": 2, "reps": 5}]))).await
            }),
        );
        ra.expect("join a").expect("write a");
        rb.expect("join b").expect("write b");

        let stored = logs
            .get_logs(student, LogQuery::default())
            .await
            .expect("read back");
        assert_eq!(stored.len(), 1);
        let numbers: Vec<u32> = stored[0].sets.iter().map(|s| s.set_number).collect();
        assert_eq!(numbers, vec![1, 2]);
    }

    #[tokio::test]
    async fn reads_filter_by_range_and_sort_for_display() {
        let logs = service(Arc::new(MemoryStore::new()));
        let (student, workout) = (Uuid::now_v7(), Uuid::now_v7());

        for day in [8, 10, 12] {
            let mut cmd = command(student, workout, json!([{"set_number": 3}, {"set_number": 1}]));
            cmd.log_date = date(day);
            logs.upsert(cmd).await.expect("seed");
        }

        let query = LogQuery {
            from: Some(date(9)),
            to: Some(date(12)),
            ..Default::default()
        };
        let found = logs.get_logs(student, query).await.expect("range");
        let dates: Vec<NaiveDate> = found.iter().map(|l| l.log_date).collect();
        assert_eq!(dates, vec![date(12), date(10)]);
        let numbers: Vec<u32> = found[0].sets.iter().map(|s| s.set_number).collect();
        assert_eq!(numbers, vec![1, 3]);

        let inverted = LogQuery {
            from: Some(date(12)),
            to: Some(date(9)),
            ..Default::default()
        };
        assert!(matches!(
            logs.get_logs(student, inverted).await,
            Err(LedgerError::Validation { .. })
        ));
    }

    #[tokio::test]
    async fn only_owner_deletes() {
        let store = Arc::new(MemoryStore::new());
        let logs = service(store.clone());
        let (student, workout) = (Uuid::now_v7(), Uuid::now_v7());
        let written = logs
            .upsert(command(student, workout, json!([{"set_number": 1}])))
            .await
            .expect("seed");

        assert!(matches!(
            logs.delete_log(Uuid::now_v7(), written.log.id).await,
            Err(LedgerError::Forbidden { .. })
        ));
        logs.delete_log(student, written.log.id).await.expect("owner delete");
        assert_eq!(log_count(&store).await, 0);
        assert!(matches!(
            logs.delete_log(student, written.log.id).await,
            Err(LedgerError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn lost_revision_races_are_remerged_without_losing_sets() {
        let store = Arc::new(RacingStore::new(2));
        let logs = service(store.clone());
        let (student, workout) = (Uuid::now_v7(), Uuid::now_v7());

        logs.upsert(command(student, workout, json!([{"set_number": 1, "reps": 5}])))
            .await
            .expect("create");
        let merged = logs
            .upsert(command(student, workout, json!([{"set_number": 2, "reps": 5}])))
            .await
            .expect("third attempt wins");

        assert_eq!(store.lost(), 2);
        assert!(!merged.created);
        assert_eq!(merged.log.revision, 4);
        assert_eq!(set_numbers(&merged.log), vec![1, 91, 92, 2]);
    }

    #[tokio::test]
    async fn endless_revision_races_surface_conflict() {
        let store = Arc::new(RacingStore::new(usize::MAX));
        let logs = service(store.clone());
        let (student, workout) = (Uuid::now_v7(), Uuid::now_v7());

        logs.upsert(command(student, workout, json!([{"set_number": 1}])))
            .await
            .expect("create");
        let err = logs
            .upsert(command(student, workout, json!([{"set_number": 2}])))
            .await
            .expect_err("every attempt loses");

        assert!(matches!(err, LedgerError::Conflict { .. }));
        assert_eq!(store.lost(), MAX_UPSERT_ATTEMPTS);
        let stored = logs
            .get_logs(student, LogQuery::default())
            .await
            .expect("read back");
        assert_eq!(set_numbers(&stored[0]), vec![1, 91, 92, 93]);
    }

    #[tokio::test]
    async fn include_block_stays_within_the_trainer() {
        let store = Arc::new(MemoryStore::new());
        let logs = service(store.clone());
        let student = Uuid::now_v7();
        let other_w1 = seed_workout_for(&store, student, "coach-leo", "Strength - Week 1").await;
        let own_w2 = seed_workout(&store, student, "Strength - Week 2").await;

        logs.upsert(command(student, other_w1, json!([{"set_number": 1}])))
            .await
            .expect("other trainer's log");

        let mut cmd = command(student, own_w2, json!([{"set_number": 1}]));
        cmd.include_block = true;
        let written = logs.upsert(cmd).await.expect("own block write");
        assert!(written.created);
        assert_eq!(written.log.workout_id, own_w2);
        assert_eq!(log_count(&store).await, 2);
    }
}
