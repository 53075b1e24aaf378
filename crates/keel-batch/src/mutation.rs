use serde::{Deserialize, Serialize};

/// A queued change, applied at the next flush.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mutation<I, P> {
    Add { id: I, payload: P },
    Update { id: I, patch: P },
    Delete { id: I },
}

impl<I, P> Mutation<I, P> {
    pub fn id(&self) -> &I {
        match self {
            Self::Add { id, .. } | Self::Update { id, .. } | Self::Delete { id } => id,
        }
    }
}
