use apiary_core::{ApiaryError, ApiaryResult};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, warn};

/// Creates and validates pooled resources.
#[async_trait]
pub trait ResourceFactory: Send + Sync + 'static {
    /// The pooled resource type.
    type Resource: Send + 'static;

    /// Create a fresh resource.
    async fn create(&self) -> ApiaryResult<Self::Resource>;

    /// Whether an idle resource is still usable. Invalid resources are
    /// discarded on acquire and replaced with a fresh one.
    async fn validate(&self, resource: &Self::Resource) -> bool {
        let _ = resource;
        true
    }
}

/// Sizing and timing limits for a [`ResourcePool`].
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Floor kept alive by warming and reaping.
    pub min_size: usize,
    /// Hard cap on live resources (idle + checked out).
    pub max_size: usize,
    /// Deadline for an acquire waiting on a free slot.
    pub acquire_timeout_ms: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_size: 1,
            max_size: 8,
            acquire_timeout_ms: 5_000,
        }
    }
}

struct IdleResource<R> {
    resource: R,
    idle_since: Instant,
}

/// A bounded pool of reusable resources.
///
/// Acquisition order is FIFO: waiters queue on a fair semaphore and wake in
/// arrival order as resources free up. An acquire past the configured
/// deadline fails with [`ApiaryError::PoolTimeout`].
pub struct ResourcePool<F: ResourceFactory> {
    factory: F,
    config: PoolConfig,
    permits: Arc<Semaphore>,
    idle: Mutex<VecDeque<IdleResource<F::Resource>>>,
    // Live resources: idle + checked out.
    size: AtomicUsize,
    closed: AtomicBool,
}

impl<F: ResourceFactory> ResourcePool<F> {
    /// Create a pool. Call [`warm`](Self::warm) to pre-create the min floor.
    pub fn new(factory: F, config: PoolConfig) -> Arc<Self> {
        Arc::new(Self {
            permits: Arc::new(Semaphore::new(config.max_size)),
            factory,
            config,
            idle: Mutex::new(VecDeque::new()),
            size: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        })
    }

    /// Pre-create resources up to the min floor.
    pub async fn warm(&self) -> ApiaryResult<()> {
        while self.size.load(Ordering::Acquire) < self.config.min_size {
            let resource = self.factory.create().await?;
            self.size.fetch_add(1, Ordering::AcqRel);
            self.idle.lock().push_back(IdleResource {
                resource,
                idle_since: Instant::now(),
            });
        }
        Ok(())
    }

    /// Check a resource out of the pool, waiting FIFO for a free slot.
    ///
    /// Idle resources are validated before reuse; an invalid one is dropped
    /// and replaced. Fails with [`ApiaryError::PoolTimeout`] past the acquire
    /// deadline and [`ApiaryError::PoolClosed`] after [`close`](Self::close).
    pub async fn acquire(self: &Arc<Self>) -> ApiaryResult<PooledResource<F>> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ApiaryError::PoolClosed);
        }

        let deadline = Duration::from_millis(self.config.acquire_timeout_ms);
        let permit = match tokio::time::timeout(
            deadline,
            Arc::clone(&self.permits).acquire_owned(),
        )
        .await
        {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return Err(ApiaryError::PoolClosed),
            Err(_) => {
                return Err(ApiaryError::PoolTimeout {
                    after_ms: self.config.acquire_timeout_ms,
                })
            }
        };

        loop {
            let candidate = self.idle.lock().pop_front();
            match candidate {
                Some(idle) => {
                    if self.factory.validate(&idle.resource).await {
                        return Ok(PooledResource {
                            resource: Some(idle.resource),
                            pool: Arc::clone(self),
                            _permit: permit,
                        });
                    }
                    // Stale resource: discard and try the next one.
                    debug!("Discarding pooled resource that failed validation");
                    self.size.fetch_sub(1, Ordering::AcqRel);
                }
                None => {
                    let resource = self.factory.create().await?;
                    self.size.fetch_add(1, Ordering::AcqRel);
                    return Ok(PooledResource {
                        resource: Some(resource),
                        pool: Arc::clone(self),
                        _permit: permit,
                    });
                }
            }
        }
    }

    /// Drop idle resources older than `max_idle_age`, never shrinking the
    /// pool below its min floor. The owner typically drives this from a
    /// periodic task.
    pub fn reap_idle(&self, max_idle_age: Duration) -> usize {
        let mut idle = self.idle.lock();
        let mut reaped = 0;
        while let Some(oldest) = idle.front() {
            if self.size.load(Ordering::Acquire) <= self.config.min_size {
                break;
            }
            if oldest.idle_since.elapsed() < max_idle_age {
                break;
            }
            idle.pop_front();
            self.size.fetch_sub(1, Ordering::AcqRel);
            reaped += 1;
        }
        if reaped > 0 {
            debug!(reaped, "Reaped idle pool resources");
        }
        reaped
    }

    /// Close the pool: pending and future acquires fail, idle resources are
    /// dropped. Checked-out resources are dropped as their guards return.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.permits.close();
        let mut idle = self.idle.lock();
        let dropped = idle.len();
        self.size.fetch_sub(dropped, Ordering::AcqRel);
        idle.clear();
        if dropped > 0 {
            debug!(dropped, "Dropped idle resources on pool close");
        }
    }

    /// A point-in-time view of pool occupancy.
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            size: self.size.load(Ordering::Acquire),
            idle: self.idle.lock().len(),
            available_slots: self.permits.available_permits(),
        }
    }

    fn release(&self, resource: F::Resource) {
        if self.closed.load(Ordering::Acquire) {
            self.size.fetch_sub(1, Ordering::AcqRel);
            return;
        }
        self.idle.lock().push_back(IdleResource {
            resource,
            idle_since: Instant::now(),
        });
    }
}

/// Point-in-time pool occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    /// Live resources, idle + checked out.
    pub size: usize,
    /// Idle resources ready for reuse.
    pub idle: usize,
    /// Free acquire slots.
    pub available_slots: usize,
}

/// A checked-out resource. Returned to the pool on drop.
pub struct PooledResource<F: ResourceFactory> {
    resource: Option<F::Resource>,
    pool: Arc<ResourcePool<F>>,
    _permit: OwnedSemaphorePermit,
}

impl<F: ResourceFactory> Deref for PooledResource<F> {
    type Target = F::Resource;

    fn deref(&self) -> &Self::Target {
        match &self.resource {
            Some(resource) => resource,
            // The slot is only emptied in Drop.
            None => unreachable!("pooled resource accessed after drop"),
        }
    }
}

impl<F: ResourceFactory> DerefMut for PooledResource<F> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        match &mut self.resource {
            Some(resource) => resource,
            None => unreachable!("pooled resource accessed after drop"),
        }
    }
}

impl<F: ResourceFactory> Drop for PooledResource<F> {
    fn drop(&mut self) {
        if let Some(resource) = self.resource.take() {
            self.pool.release(resource);
        } else {
            warn!("Pooled resource guard dropped twice");
        }
    }
}
