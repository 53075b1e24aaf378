use std::fmt;

use serde::{Deserialize, Serialize};

use keel_batch::StateRecord;

/// Temporary id of an unconfirmed record.
///
/// A separate type from canonical ids, so the two can never be confused or
/// collide in the ordered store.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TempId(u64);

impl TempId {
    pub(crate) fn new(seq: u64) -> Self {
        Self(seq)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for TempId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tmp-{}", self.0)
    }
}

impl fmt::Debug for TempId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TempId({})", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum OptimisticStatus {
    Pending,
    Confirmed,
    Failed,
}

/// A client-visible record awaiting the backend's answer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OptimisticEntry<P> {
    pub temp_id: TempId,
    pub scope: String,
    pub payload: P,
    pub status: OptimisticStatus,
    pub created_at: u64,
}

impl<P> OptimisticEntry<P> {
    pub fn is_pending(&self) -> bool {
        self.status == OptimisticStatus::Pending
    }

    pub fn is_failed(&self) -> bool {
        self.status == OptimisticStatus::Failed
    }
}

/// One row of the merged read view.
#[derive(Clone, Debug, PartialEq)]
pub enum ViewItem<I, P> {
    Canonical(StateRecord<I, P>),
    Optimistic(OptimisticEntry<P>),
}

impl<I, P> ViewItem<I, P> {
    pub fn payload(&self) -> &P {
        match self {
            Self::Canonical(record) => &record.payload,
            Self::Optimistic(entry) => &entry.payload,
        }
    }

    pub fn is_optimistic(&self) -> bool {
        matches!(self, Self::Optimistic(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn temp_id_formatting() {
        let id = TempId::new(12);
        assert_eq!(id.to_string(), "tmp-12");
        assert_eq!(format!("{id:?}"), "TempId(12)");
        assert!(TempId::new(1) < TempId::new(2));
    }
}
