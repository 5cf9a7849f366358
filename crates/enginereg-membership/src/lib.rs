//! enginereg-membership — membership rules for the alerting-engine registry.
//!
//! Sits on top of an injected [`BindingStore`](enginereg_state::BindingStore)
//! and enforces the `(instance, cluster)` uniqueness rule, heartbeat upsert
//! semantics, and the lookups used by operators and by workers at startup.
//!
//! # Architecture
//!
//! ```text
//! Operator / control plane
//!   └── MembershipManager
//!       ├── register / reassign / deregister
//!       ├── heartbeat(instance[, cluster])
//!       ├── list_instances / list_clusters / clusters_for_instance
//!       └── liveness() → read-time staleness, nothing deleted
//!
//! Worker process
//!   └── HeartbeatAgent
//!       └── periodic heartbeat through the same MembershipManager
//! ```
//!
//! Duplicate detection has two layers: a count pre-check that yields a
//! readable error, and the store's unique index, whose `DuplicateKey` is
//! mapped to the same [`MembershipError::DuplicateAssignment`].

pub mod agent;
pub mod clock;
pub mod error;
pub mod membership;

pub use agent::{AgentConfig, HeartbeatAgent};
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{MembershipError, MembershipResult};
pub use membership::{BindingLiveness, MembershipManager};
