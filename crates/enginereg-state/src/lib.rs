//! enginereg-state — binding store for the alerting-engine registry.
//!
//! Backed by [redb](https://docs.rs/redb), persists one row per
//! `(instance, cluster)` binding together with its last heartbeat.
//!
//! # Architecture
//!
//! Bindings are JSON-serialized into redb's `&[u8]` value column, keyed by
//! a store-assigned `u64` id. A second table maps the natural key
//! `(instance, cluster)` to the id and acts as the unique constraint:
//! redb serializes write transactions, so the index check and the row
//! write always commit together.
//!
//! Callers depend on the [`BindingStore`] trait; [`StateStore`] is the
//! redb implementation. `StateStore` is `Clone` + `Send` + `Sync` (backed
//! by `Arc<Database>`) and can be shared across threads and async tasks.

pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::{BindingStore, StateStore};
pub use types::*;
