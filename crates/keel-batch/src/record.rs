use serde::{Deserialize, Serialize};

/// A flushed record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateRecord<I, P> {
    pub id: I,
    pub payload: P,
    /// 1 when first added; bumped once by every flush that changes it.
    pub version: u64,
}

impl<I, P> StateRecord<I, P> {
    pub(crate) fn new(id: I, payload: P) -> Self {
        Self {
            id,
            payload,
            version: 1,
        }
    }
}
