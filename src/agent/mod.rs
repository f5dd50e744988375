//! Agent core: lifecycle, shared registry, admission control and failure
//! classification.

pub mod classifier;
pub mod registry;
pub mod runtime;
pub mod throttle;

pub use classifier::{Classification, classify};
pub use registry::{AgentRegistry, ShutdownReason, ShutdownState};
pub use runtime::{Agent, AgentDeps};
pub use throttle::{AdmissionPermit, AdmissionThrottle, MAX_IN_FLIGHT};
