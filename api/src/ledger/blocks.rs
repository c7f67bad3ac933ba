use coachlog_core::blocks::{BlockWorkout, TrainingBlock, block_siblings, resolve_blocks};
use serde::Deserialize;
use uuid::Uuid;

use super::{LedgerError, LedgerStore, decode};
use crate::store::{Collection, Direction, Filter};

/// The columns block resolution needs from a workout row.
#[derive(Deserialize)]
struct WorkoutRef {
    id: Uuid,
    trainer_slug: String,
    title: String,
    is_active: bool,
}

impl From<WorkoutRef> for BlockWorkout {
    fn from(workout: WorkoutRef) -> Self {
        BlockWorkout::new(workout.id, workout.title, workout.is_active)
    }
}

/// Groups a student's workouts into multi-week blocks.
///
/// A block never spans trainers: two coaches may both publish
/// "Strength - Week N" for the same student.
#[derive(Clone)]
pub struct RelatedWorkoutResolver {
    store: LedgerStore,
}

impl RelatedWorkoutResolver {
    pub fn new(store: LedgerStore) -> Self {
        Self { store }
    }

    async fn owner_workouts(
        &self,
        owner: Uuid,
        trainer_slug: Option<&str>,
    ) -> Result<Vec<WorkoutRef>, LedgerError> {
        let mut filter = Filter::new().eq("user_id", owner.to_string());
        if let Some(slug) = trainer_slug {
            filter = filter.eq("trainer_slug", slug);
        }
        let filter = filter.order_by("created_at", Direction::Asc);
        self.store
            .get(Collection::Workouts, &filter)
            .await?
            .into_iter()
            .map(|row| decode(Collection::Workouts, row))
            .collect()
    }

    /// Blocks across all of `owner`'s trainers, or one trainer's when given.
    pub async fn blocks_for(
        &self,
        owner: Uuid,
        trainer_slug: Option<&str>,
    ) -> Result<Vec<TrainingBlock>, LedgerError> {
        let workouts = self.owner_workouts(owner, trainer_slug).await?;
        let mut blocks = Vec::new();
        for slug in trainer_slugs(&workouts) {
            let members = workouts
                .iter()
                .filter(|w| w.trainer_slug == slug)
                .map(|w| BlockWorkout::new(w.id, w.title.clone(), w.is_active))
                .collect();
            blocks.extend(resolve_blocks(members));
        }
        Ok(blocks)
    }

    /// Other workouts of `workout_id`'s block under the same trainer, in week order.
    pub async fn siblings(&self, owner: Uuid, workout_id: Uuid) -> Result<Vec<Uuid>, LedgerError> {
        let workouts = self.owner_workouts(owner, None).await?;
        let Some(trainer_slug) = workouts
            .iter()
            .find(|w| w.id == workout_id)
            .map(|w| w.trainer_slug.clone())
        else {
            return Ok(Vec::new());
        };
        let same_trainer = workouts
            .into_iter()
            .filter(|w| w.trainer_slug == trainer_slug)
            .map(BlockWorkout::from)
            .collect();
        let siblings = block_siblings(same_trainer, workout_id);
        tracing::debug!(
            user_id = %owner,
            workout_id = %workout_id,
            trainer_slug = %trainer_slug,
            siblings = siblings.len(),
            "resolved block siblings"
        );
        Ok(siblings)
    }
}

/// Distinct trainer slugs in first-seen order.
fn trainer_slugs(workouts: &[WorkoutRef]) -> Vec<String> {
    let mut slugs: Vec<String> = Vec::new();
    for workout in workouts {
        if !slugs.contains(&workout.trainer_slug) {
            slugs.push(workout.trainer_slug.clone());
        }
    }
    slugs
}
