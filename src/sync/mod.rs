//! Outbox-driven reconciliation between the primary store and the mirror.

pub mod backoff;
pub mod drain;
pub mod engine;
pub mod enqueue;
pub mod guard;
pub mod worker;

pub use backoff::{backoff_delay, next_failure};
pub use drain::{DrainReport, Settlement};
pub use engine::{ReconcileEngine, ReconcileEngineBuilder};
pub use enqueue::{MirrorOutcome, Mirrored};
pub use guard::{OrgGuard, OrgLease};
pub use worker::{DrainWorker, spawn_drain_worker};
