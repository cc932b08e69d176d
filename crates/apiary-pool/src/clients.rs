use crate::pool::{PoolConfig, ResourceFactory, ResourcePool};
use apiary_core::ApiaryResult;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

/// A simulated connection to an external service.
pub struct SimulatedConn {
    /// Connection identity, for tracing.
    pub id: Uuid,
}

/// Factory for [`SimulatedConn`]s with a fixed simulated dial latency.
pub struct SimulatedConnFactory {
    dial_latency: Duration,
}

impl SimulatedConnFactory {
    /// A factory dialing with the given simulated latency.
    pub fn new(dial_latency: Duration) -> Self {
        Self { dial_latency }
    }
}

#[async_trait]
impl ResourceFactory for SimulatedConnFactory {
    type Resource = SimulatedConn;

    async fn create(&self) -> ApiaryResult<SimulatedConn> {
        tokio::time::sleep(self.dial_latency).await;
        Ok(SimulatedConn { id: Uuid::new_v4() })
    }
}

/// Mocked object-storage client. Objects live in process memory; access is
/// gated through the connection pool like a real client's would be.
pub struct ObjectStoreClient {
    pool: Arc<ResourcePool<SimulatedConnFactory>>,
    objects: RwLock<HashMap<String, serde_json::Value>>,
}

impl ObjectStoreClient {
    /// A client with its own connection pool.
    pub fn new(pool_config: PoolConfig) -> Self {
        Self {
            pool: ResourcePool::new(
                SimulatedConnFactory::new(Duration::from_millis(2)),
                pool_config,
            ),
            objects: RwLock::new(HashMap::new()),
        }
    }

    /// Store an object under a key.
    pub async fn put_object(&self, key: &str, value: serde_json::Value) -> ApiaryResult<()> {
        let conn = self.pool.acquire().await?;
        debug!(connection = %conn.id, key, "object store put");
        self.objects.write().insert(key.to_string(), value);
        Ok(())
    }

    /// Fetch an object by key.
    pub async fn get_object(&self, key: &str) -> ApiaryResult<Option<serde_json::Value>> {
        let conn = self.pool.acquire().await?;
        debug!(connection = %conn.id, key, "object store get");
        Ok(self.objects.read().get(key).cloned())
    }
}

/// Mocked data-warehouse client returning deterministic rollups.
pub struct WarehouseClient {
    pool: Arc<ResourcePool<SimulatedConnFactory>>,
    query_latency: Duration,
}

impl WarehouseClient {
    /// A client with its own connection pool.
    pub fn new(pool_config: PoolConfig) -> Self {
        Self {
            pool: ResourcePool::new(
                SimulatedConnFactory::new(Duration::from_millis(2)),
                pool_config,
            ),
            query_latency: Duration::from_millis(5),
        }
    }

    /// Run a rollup query for a metric. The result is deterministic per
    /// metric name so downstream aggregation stays testable.
    pub async fn query_rollup(&self, metric: &str) -> ApiaryResult<serde_json::Value> {
        let conn = self.pool.acquire().await?;
        tokio::time::sleep(self.query_latency).await;

        let seed: u64 = metric.bytes().map(u64::from).sum();
        debug!(connection = %conn.id, metric, "warehouse rollup");
        Ok(serde_json::json!({
            "metric": metric,
            "rows": 100 + seed % 400,
            "sum": (seed * 37) % 10_000,
            "p50": (seed * 13) % 100,
        }))
    }
}
