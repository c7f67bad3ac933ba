//! Multi-week training blocks.
//!
//! Coaches publish a program as one workout per week ("Push Pull Legs - Week 1",
//! "Push Pull Legs - Week 2", ...). Grouping those rows by their base title lets
//! callers step between weeks and widen an exercise-log lookup to the whole block.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

static WEEK_SUFFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\s*-\s*week\s*(\d+)\s*$").expect("week suffix pattern is valid")
});

/// Anything that can be placed in a block: it needs a title to group on.
pub trait BlockMember {
    fn title(&self) -> &str;
}

/// Split a workout title into its normalized base title and week number.
///
/// `"Push Pull Legs - week 3"` becomes `("Push Pull Legs", Some(3))`. Titles
/// without the trailing marker are returned trimmed, with no week.
pub fn split_week_marker(title: &str) -> (String, Option<u32>) {
    if let Some(caps) = WEEK_SUFFIX.captures(title) {
        let week = caps.get(1).and_then(|m| m.as_str().parse::<u32>().ok());
        if let (Some(week), Some(whole)) = (week, caps.get(0)) {
            let base = title[..whole.start()].trim();
            if !base.is_empty() {
                return (base.to_string(), Some(week));
            }
        }
    }
    (title.trim().to_string(), None)
}

/// Group members by normalized base title, each group ordered by week ascending.
///
/// Members without a week marker sort as week 0, ahead of numbered weeks. Ties
/// keep their input order.
pub fn group_blocks<T: BlockMember>(members: Vec<T>) -> BTreeMap<String, Vec<T>> {
    let mut groups: BTreeMap<String, Vec<(u32, T)>> = BTreeMap::new();
    for member in members {
        let (base, week) = split_week_marker(member.title());
        groups
            .entry(base)
            .or_default()
            .push((week.unwrap_or(0), member));
    }

    groups
        .into_iter()
        .map(|(base, mut entries)| {
            entries.sort_by_key(|(week, _)| *week);
            (base, entries.into_iter().map(|(_, member)| member).collect())
        })
        .collect()
}

/// A workout reference as seen by block resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct BlockWorkout {
    pub id: Uuid,
    pub title: String,
    /// Week number parsed from the title, if it carries one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub week: Option<u32>,
    pub is_active: bool,
}

impl BlockWorkout {
    pub fn new(id: Uuid, title: impl Into<String>, is_active: bool) -> Self {
        let title = title.into();
        let (_, week) = split_week_marker(&title);
        Self {
            id,
            title,
            week,
            is_active,
        }
    }
}

impl BlockMember for BlockWorkout {
    fn title(&self) -> &str {
        &self.title
    }
}

/// One resolved block: every workout sharing a base title, in week order.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct TrainingBlock {
    pub base_title: String,
    pub workouts: Vec<BlockWorkout>,
}

pub fn resolve_blocks(workouts: Vec<BlockWorkout>) -> Vec<TrainingBlock> {
    group_blocks(workouts)
        .into_iter()
        .map(|(base_title, workouts)| TrainingBlock {
            base_title,
            workouts,
        })
        .collect()
}

/// Ids of every workout in the same block as `workout_id`, excluding itself.
/// Empty when the workout is unknown or alone in its block.
pub fn block_siblings(workouts: Vec<BlockWorkout>, workout_id: Uuid) -> Vec<Uuid> {
    group_blocks(workouts)
        .into_values()
        .find(|group| group.iter().any(|w| w.id == workout_id))
        .map(|group| {
            group
                .into_iter()
                .map(|w| w.id)
                .filter(|id| *id != workout_id)
                .collect()
        })
        .unwrap_or_default()
}
