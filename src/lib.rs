//! Idle Task Queue
//!
//! Background task-execution engine for idle games: each player has a
//! single ordered queue of long-running tasks that execute unattended,
//! accrue rewards over wall-clock time, and survive crashes, connectivity
//! gaps, and concurrent writes.
//!
//! The crate splits into five layers:
//! - [`types`] / [`queue`]: the task and queue data model
//! - [`validation`]: pure checks of tasks against player state
//! - [`state`] over [`store`]: persistence with optimistic versioning,
//!   checksums, and validation-driven repair
//! - [`pipeline`]: scheduling, completion, retries, pause/resume
//! - [`offline`]: client-side mirror and reconnect synchronization

pub mod checksum;
pub mod clock;
pub mod config;
pub mod error;
pub mod events;
pub mod logging;
pub mod offline;
pub mod pipeline;
pub mod queue;
pub mod rewards;
pub mod state;
pub mod store;
pub mod types;
pub mod validation;
