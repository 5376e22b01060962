//! Append-only, gap-free history of round records.

use crate::domain::errors::{EngineError, EngineResult};
use crate::domain::models::RoundRecord;

/// Ordered history of completed rounds.
///
/// Records can only be appended in sequence; read access hands out shared
/// slices so callers cannot rewrite history.
#[derive(Debug, Clone, Default)]
pub struct RoundAccumulator {
    records: Vec<RoundRecord>,
}

impl RoundAccumulator {
    pub const fn new() -> Self {
        Self {
            records: Vec::new(),
        }
    }

    /// Append the next record. Its `index` must equal the current length.
    pub fn append(&mut self, record: RoundRecord) -> EngineResult<()> {
        let expected = self.records.len();
        if usize::try_from(record.index).ok() != Some(expected) {
            return Err(EngineError::invariant(format!(
                "out-of-sequence round record: expected index {expected}, got {}",
                record.index
            )));
        }
        self.records.push(record);
        Ok(())
    }

    /// Every record, oldest first.
    pub fn all(&self) -> &[RoundRecord] {
        &self.records
    }

    /// The last `k` records, oldest first. Fewer when history is shorter.
    pub fn last(&self, k: usize) -> &[RoundRecord] {
        let start = self.records.len().saturating_sub(k);
        &self.records[start..]
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Labels of every record, oldest first.
    pub fn labels(&self) -> Vec<String> {
        self.records.iter().map(|r| r.label.clone()).collect()
    }
}
