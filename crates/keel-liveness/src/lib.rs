//! Weak liveness registry for Keel.
//!
//! The registry records which shared objects are currently alive, for leak
//! auditing and diagnostics. It stores only [`Weak`](std::sync::Weak)
//! references, so registering an object never extends its lifetime, and an
//! entry stops counting as live as soon as the last strong reference is
//! dropped. Dead entries are pruned opportunistically.
//!
//! Registry contents are a diagnostic signal only. Never branch on whether
//! something is registered.

pub mod error;
pub mod registry;

pub use error::{LivenessError, LivenessResult};
pub use registry::{HandleId, HandleInfo, HandleMetadata, LivenessRegistry, LivenessReport};
