//! Outbox for writes made while the network is unreachable.
//!
//! Failed POST/PUT/DELETE calls to the API are snapshotted into a durable
//! queue and replayed oldest-first once connectivity returns. Delivery is
//! at-least-once: a replay whose response is lost may reach the server twice.

mod coordinator;
mod store;

pub use coordinator::{replay, OutboxCoordinator, ReplayOutcome, SyncReport};
pub use store::{OutboxStore, QueueEntry};
