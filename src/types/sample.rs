use std::collections::{BTreeMap, VecDeque};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One timestamped value in a field's history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub value: Value,
    /// Wall-clock arrival time, Unix epoch milliseconds.
    pub timestamp: u64,
}

/// Ordered samples for a single field, oldest first.
pub type Series = VecDeque<Sample>;

/// Storage for one group. The representation is picked per message by the
/// source through `noHistoryFields`, so a group may switch between the two.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum GroupData {
    Series(BTreeMap<String, Series>),
    Scalar(Value),
}

impl GroupData {
    pub fn is_series(&self) -> bool {
        matches!(self, GroupData::Series(_))
    }

    pub fn as_series(&self) -> Option<&BTreeMap<String, Series>> {
        match self {
            GroupData::Series(fields) => Some(fields),
            GroupData::Scalar(_) => None,
        }
    }

    pub fn as_scalar(&self) -> Option<&Value> {
        match self {
            GroupData::Scalar(value) => Some(value),
            GroupData::Series(_) => None,
        }
    }
}
