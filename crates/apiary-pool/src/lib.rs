//! Bounded resource pooling for external-integration clients.
//!
//! The orchestration core never talks to the outside world directly; the
//! simulated object-store and warehouse clients in [`clients`] do, and they
//! share one [`ResourcePool`] discipline: a hard min/max size, FIFO waiting
//! with an acquire timeout, validate-on-acquire with discard-and-retry, and
//! idle reaping above the min floor. Waiting is semaphore-based wait/notify,
//! never a poll loop.

/// Mocked object-store and warehouse clients.
pub mod clients;
/// The generic bounded pool.
pub mod pool;

pub use clients::{ObjectStoreClient, WarehouseClient};
pub use pool::{PoolConfig, PoolStats, PooledResource, ResourceFactory, ResourcePool};
