use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// One performed set inside an exercise log.
///
/// `set_number` is caller-assigned and unique within a log; it does not have to
/// be contiguous. Everything else (reps, weight, tempo, rest, notes, ...) is kept
/// as free-form fields so coaches can record whatever their program tracks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetEntry {
    pub set_number: u32,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl SetEntry {
    pub fn new(set_number: u32) -> Self {
        Self {
            set_number,
            fields: Map::new(),
        }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Shallow field-wise merge: incoming keys overwrite, untouched keys stay.
    fn absorb(&mut self, incoming: SetEntry) {
        for (key, value) in incoming.fields {
            self.fields.insert(key, value);
        }
    }
}

/// Why a raw set payload was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SetValidationError {
    #[error("sets[{index}] must be a JSON object")]
    NotAnObject { index: usize },
    #[error("sets[{index}].set_number is required")]
    MissingSetNumber { index: usize },
    #[error("sets[{index}].set_number must be a positive integer")]
    InvalidSetNumber { index: usize, received: Value },
}

impl SetValidationError {
    pub fn field(&self) -> String {
        match self {
            Self::NotAnObject { index } => format!("sets[{index}]"),
            Self::MissingSetNumber { index } | Self::InvalidSetNumber { index, .. } => {
                format!("sets[{index}].set_number")
            }
        }
    }

    pub fn received(&self) -> Option<Value> {
        match self {
            Self::InvalidSetNumber { received, .. } => Some(received.clone()),
            _ => None,
        }
    }
}

/// Parse raw JSON sets coming from a request body.
///
/// `set_number` must be present and a positive integer; every other key is
/// carried through untouched.
pub fn parse_sets(raw: &[Value]) -> Result<Vec<SetEntry>, SetValidationError> {
    raw.iter()
        .enumerate()
        .map(|(index, value)| {
            let object = value
                .as_object()
                .ok_or(SetValidationError::NotAnObject { index })?;
            let number = object
                .get("set_number")
                .ok_or(SetValidationError::MissingSetNumber { index })?;
            let set_number = number
                .as_u64()
                .filter(|n| *n >= 1)
                .and_then(|n| u32::try_from(n).ok())
                .ok_or_else(|| SetValidationError::InvalidSetNumber {
                    index,
                    received: number.clone(),
                })?;

            let mut fields = object.clone();
            fields.remove("set_number");
            Ok(SetEntry { set_number, fields })
        })
        .collect()
}

/// Merge an incoming batch of set updates into the sets already stored on a log.
///
/// Existing sets keep their relative order; sets with an unseen `set_number`
/// are appended in arrival order. A duplicate `set_number` inside the batch is
/// applied in array order, so the later entry wins.
pub fn merge_sets(existing: &[SetEntry], incoming: Vec<SetEntry>) -> Vec<SetEntry> {
    let mut merged = existing.to_vec();
    for set in incoming {
        match merged.iter_mut().find(|s| s.set_number == set.set_number) {
            Some(current) => current.absorb(set),
            None => merged.push(set),
        }
    }
    merged
}

/// Display order: ascending `set_number`. Only applied when reading.
pub fn sorted_for_display(mut sets: Vec<SetEntry>) -> Vec<SetEntry> {
    sets.sort_by_key(|s| s.set_number);
    sets
}
