use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Independent trust signals between a coach and a student.
/// Any single present signal grants the coach write access.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum AccessSignal {
    /// A chat conversation exists between the student and the trainer
    Chat,
    /// An active student-trainer relationship row exists
    Relationship,
    /// The student approved an access request from the trainer
    ApprovedRequest,
}

impl AccessSignal {
    pub const ALL: [AccessSignal; 3] = [
        AccessSignal::Chat,
        AccessSignal::Relationship,
        AccessSignal::ApprovedRequest,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            AccessSignal::Chat => "chat",
            AccessSignal::Relationship => "relationship",
            AccessSignal::ApprovedRequest => "approved_request",
        }
    }
}

/// Result of checking one signal against the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalOutcome {
    Present,
    Absent,
    /// The check itself failed; counts as absent.
    Failed,
}

/// Union of all signal checks for one (coach, student) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct AccessDecision {
    pub granted: bool,
    /// Signals that were found
    pub matched: Vec<AccessSignal>,
    /// Signals whose check errored (treated as absent)
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failed: Vec<AccessSignal>,
}

impl AccessDecision {
    /// Capability union: granted iff at least one signal is present.
    pub fn from_outcomes(
        outcomes: impl IntoIterator<Item = (AccessSignal, SignalOutcome)>,
    ) -> Self {
        let mut matched = Vec::new();
        let mut failed = Vec::new();
        for (signal, outcome) in outcomes {
            match outcome {
                SignalOutcome::Present => matched.push(signal),
                SignalOutcome::Failed => failed.push(signal),
                SignalOutcome::Absent => {}
            }
        }
        matched.sort();
        failed.sort();
        Self {
            granted: !matched.is_empty(),
            matched,
            failed,
        }
    }

    /// Denied without consulting any signal (e.g. the coach has no trainer profile).
    pub fn denied() -> Self {
        Self {
            granted: false,
            matched: Vec::new(),
            failed: Vec::new(),
        }
    }
}
